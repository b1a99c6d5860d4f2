//! The US zip-code record and its comma-separated ASCII codec.

use crate::error::{Error, Result};
use crate::record::{FieldDef, FieldType, Record, Schema};

/// A single zip-code record. The zip code is the primary key; state codes
/// are exactly two ASCII letters.
#[derive(Clone, Debug, PartialEq)]
pub struct ZipRecord {
    pub zip_code: u32,
    pub place_name: String,
    pub state: String,
    pub county: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl ZipRecord {
    pub fn new(
        zip_code: u32,
        place_name: &str,
        state: &str,
        county: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            zip_code,
            place_name: place_name.to_string(),
            state: state.to_string(),
            county: county.to_string(),
            latitude,
            longitude,
        }
    }

    /// Parses a `zip,place,state,county,lat,lon` text line.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 6 {
            return Err(Error::MalformedBlock(format!(
                "expected 6 record fields, got {}",
                fields.len()
            )));
        }

        let zip_code = fields[0]
            .parse::<u32>()
            .map_err(|e| Error::MalformedBlock(format!("zipcode: {e}")))?;

        let state = fields[2];
        if state.len() != 2 {
            return Err(Error::MalformedBlock(format!(
                "state must be two characters, got {state:?}"
            )));
        }

        let latitude = parse_coord(fields[4], "latitude")?;
        let longitude = parse_coord(fields[5], "longitude")?;

        Ok(Self::new(
            zip_code, fields[1], state, fields[3], latitude, longitude,
        ))
    }
}

fn parse_coord(field: &str, name: &str) -> Result<f64> {
    let value = field
        .parse::<f64>()
        .map_err(|e| Error::MalformedBlock(format!("{name}: {e}")))?;
    if !value.is_finite() {
        return Err(Error::MalformedBlock(format!(
            "{name} must be finite, got {field:?}"
        )));
    }
    Ok(value)
}

impl Record for ZipRecord {
    fn key(&self) -> u32 {
        self.zip_code
    }

    fn encode(&self) -> Vec<u8> {
        // Six decimal places keeps float formatting stable across
        // encode/decode cycles.
        format!(
            "{},{},{},{},{:.6},{:.6}",
            self.zip_code, self.place_name, self.state, self.county, self.latitude, self.longitude
        )
        .into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(bytes)
            .map_err(|e| Error::MalformedBlock(format!("record is not utf-8: {e}")))?;
        Self::parse_line(line)
    }

    fn schema() -> Schema {
        Schema {
            fields: vec![
                FieldDef::new("zipcode", FieldType::UInt32),
                FieldDef::new("location", FieldType::Text),
                FieldDef::new("state", FieldType::StateCode),
                FieldDef::new("county", FieldType::Text),
                FieldDef::new("latitude", FieldType::Float),
                FieldDef::new("longitude", FieldType::Float),
            ],
            primary_key: 0,
        }
    }
}
