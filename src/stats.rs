//! Per-state geographic extremes over zip-code records. Used by the verify
//! front-end to prove that a blocked file and its source CSV describe the
//! same data, independent of storage order.

use std::collections::BTreeMap;
use std::io::Write;

use crate::record::zip::ZipRecord;

/// The four extreme records observed for one state.
#[derive(Clone, Debug)]
pub struct Extremes {
    pub easternmost: ZipRecord,
    pub westernmost: ZipRecord,
    pub northernmost: ZipRecord,
    pub southernmost: ZipRecord,
}

impl Extremes {
    fn new(record: &ZipRecord) -> Self {
        Self {
            easternmost: record.clone(),
            westernmost: record.clone(),
            northernmost: record.clone(),
            southernmost: record.clone(),
        }
    }

    fn observe(&mut self, record: &ZipRecord) {
        // Longitude grows eastward, latitude northward.
        if record.longitude > self.easternmost.longitude {
            self.easternmost = record.clone();
        }
        if record.longitude < self.westernmost.longitude {
            self.westernmost = record.clone();
        }
        if record.latitude > self.northernmost.latitude {
            self.northernmost = record.clone();
        }
        if record.latitude < self.southernmost.latitude {
            self.southernmost = record.clone();
        }
    }
}

/// Extremes keyed by two-letter state code, in sorted order.
#[derive(Clone, Debug, Default)]
pub struct StateExtremes {
    states: BTreeMap<String, Extremes>,
}

impl StateExtremes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ZipRecord>) -> Self {
        let mut extremes = Self::new();
        for record in records {
            extremes.observe(record);
        }
        extremes
    }

    /// Folds one record in. Records without a two-letter state are ignored.
    pub fn observe(&mut self, record: &ZipRecord) {
        if record.state.len() != 2 {
            return;
        }
        self.states
            .entry(record.state.clone())
            .and_modify(|e| e.observe(record))
            .or_insert_with(|| Extremes::new(record));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn write_table(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(
            out,
            "State, EasternmostZIP, WesternmostZIP, NorthernmostZIP, SouthernmostZIP"
        )?;
        for (state, ex) in &self.states {
            writeln!(
                out,
                "{state}, {}, {}, {}, {}",
                ex.easternmost.zip_code,
                ex.westernmost.zip_code,
                ex.northernmost.zip_code,
                ex.southernmost.zip_code
            )?;
        }
        Ok(())
    }

    /// A canonical string of the extremes table. Two data sets with the
    /// same records produce the same signature regardless of input order.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        for (state, ex) in &self.states {
            out.push_str(&format!(
                "{state}:{}|{}|{}|{}\n",
                ex.easternmost.zip_code,
                ex.westernmost.zip_code,
                ex.northernmost.zip_code,
                ex.southernmost.zip_code
            ));
        }
        out
    }
}
