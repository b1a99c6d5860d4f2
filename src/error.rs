use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Blockseq errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An IO error during open, seek, read, or write.
    Io(String),
    /// The file header failed to decode: bad magic, truncation, or a size
    /// field that disagrees with the bytes on disk.
    MalformedHeader(String),
    /// Block metadata is inconsistent, or a declared record length exceeds
    /// the remaining payload.
    MalformedBlock(String),
    /// The requested key is not present. Non-fatal.
    NotFound(u32),
    /// An insert collided with an existing key. Non-fatal.
    Duplicate(u32),
    /// The preceding/succeeding links do not form a valid doubly-linked
    /// chain at traversal time.
    CorruptedChain(String),
    /// The stale flag was set and rebuilding the block index failed.
    IndexStale(String),
    /// A single record, plus its 4-byte length prefix and the block
    /// metadata, cannot fit in one block. The payload is the record's
    /// serialized size in bytes.
    CapacityExceeded(u32),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::MalformedHeader(msg) => write!(f, "malformed header: {msg}"),
            Error::MalformedBlock(msg) => write!(f, "malformed block: {msg}"),
            Error::NotFound(key) => write!(f, "key {key} not found"),
            Error::Duplicate(key) => write!(f, "duplicate key {key}"),
            Error::CorruptedChain(msg) => write!(f, "corrupted chain: {msg}"),
            Error::IndexStale(msg) => write!(f, "stale index: {msg}"),
            Error::CapacityExceeded(size) => {
                write!(f, "record of {size} bytes exceeds block capacity")
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// A blockseq Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error is informational rather than fatal. Front-ends
    /// report these without a non-zero exit.
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Duplicate(_))
    }
}
