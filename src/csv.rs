//! Line-oriented CSV intake for zip-code records. The expected layout is
//! the six-column `zip,place,state,county,lat,lon` used by the bulk loader.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::error::{Error, Result};
use crate::record::zip::ZipRecord;

/// Streams `ZipRecord`s out of a CSV source. The first line is treated as a
/// column header when it does not parse as a record; blank lines are
/// skipped. Each yielded item carries its own parse outcome so one bad line
/// does not abort the stream.
pub struct CsvReader<B: BufRead> {
    lines: Lines<B>,
    line_number: u64,
}

impl CsvReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Io(format!("open {path:?}: {e}")))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<B: BufRead> CsvReader<B> {
    pub fn new(reader: B) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// The 1-based number of the most recently read line.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

impl<B: BufRead> Iterator for CsvReader<B> {
    type Item = Result<ZipRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            match ZipRecord::parse_line(&line) {
                Ok(record) => return Some(Ok(record)),
                // A non-parsing first line is the column header.
                Err(_) if self.line_number == 1 => continue,
                Err(e) => {
                    return Some(Err(Error::MalformedBlock(format!(
                        "line {}: {e}",
                        self.line_number
                    ))))
                }
            }
        }
    }
}

/// Reads every parseable record from a CSV file, logging and skipping bad
/// lines rather than aborting.
pub fn load_records(path: &Path) -> Result<Vec<ZipRecord>> {
    let mut records = Vec::new();
    for item in CsvReader::open(path)? {
        match item {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(error = %e, "skipping unparseable CSV line"),
        }
    }
    Ok(records)
}
