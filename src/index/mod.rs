//! The block index: an ordered sequence of (highest key, RBN) entries, one
//! per active block. It accelerates navigation from a key to the block that
//! could contain it; the retrieved block is always scanned to confirm.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::file::blockio::BlockFile;
use crate::record::Record;

const TERMINATOR: &str = "|";

/// One index entry: the highest key in the active block at `rbn`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: u32,
    pub rbn: u32,
}

/// The in-memory block index, sorted ascending by key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockIndex {
    entries: Vec<IndexEntry>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Returns the RBN of the first block whose highest key is >= `key`, or
    /// None when `key` exceeds every key in the file.
    pub fn find_rbn(&self, key: u32) -> Option<u32> {
        let idx = self.entries.partition_point(|e| e.key < key);
        self.entries.get(idx).map(|e| e.rbn)
    }

    /// The RBN of the tail block (the one holding the largest keys).
    pub fn last_rbn(&self) -> Option<u32> {
        self.entries.last().map(|e| e.rbn)
    }

    /// Inserts an entry at its sorted position.
    pub fn add_entry(&mut self, entry: IndexEntry) {
        let idx = self.entries.partition_point(|e| e.key < entry.key);
        self.entries.insert(idx, entry);
    }

    /// Drops the entry for `rbn`, if any.
    pub fn remove_rbn(&mut self, rbn: u32) {
        self.entries.retain(|e| e.rbn != rbn);
    }

    /// Replaces the entry for `rbn` with a new highest key, keeping the
    /// sequence sorted. Inserts if the RBN was not yet indexed.
    pub fn update(&mut self, rbn: u32, key: u32) {
        self.remove_rbn(rbn);
        self.add_entry(IndexEntry { key, rbn });
    }

    /// Persists the index as whitespace-separated text:
    /// `{ KEY RBN } { KEY RBN } ... |`
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            write!(writer, "{{ {} {} }} ", entry.key, entry.rbn)?;
        }
        write!(writer, "{TERMINATOR}")?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Loads an index previously persisted by `write`. The format is token
    /// oriented and insensitive to line breaks.
    pub fn read(path: &Path) -> Result<Self> {
        let mut text = String::new();
        File::open(path)?.read_to_string(&mut text)?;

        let mut tokens = text.split_whitespace();
        let mut entries = Vec::new();
        loop {
            match tokens.next() {
                Some(TERMINATOR) => break,
                Some("{") => {
                    let key = parse_token(tokens.next(), "key")?;
                    let rbn = parse_token(tokens.next(), "rbn")?;
                    match tokens.next() {
                        Some("}") => entries.push(IndexEntry { key, rbn }),
                        other => {
                            return Err(Error::IndexStale(format!(
                                "expected closing brace, got {other:?}"
                            )))
                        }
                    }
                }
                other => {
                    return Err(Error::IndexStale(format!(
                        "expected entry or terminator, got {other:?}"
                    )))
                }
            }
        }

        if !entries.windows(2).all(|w| w[0].key < w[1].key) {
            return Err(Error::IndexStale(
                "index entries are not strictly ascending".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    /// Rebuilds the index from the authoritative block chain: walks the
    /// active list from `head`, taking each block's last key.
    pub fn build<R: Record>(
        file: &mut BlockFile<R>,
        head: u32,
        block_count: u32,
    ) -> Result<Self> {
        let mut index = Self::new();
        let mut rbn = head;
        let mut visited = 0u32;

        while rbn != 0 {
            visited += 1;
            if visited > block_count {
                return Err(Error::CorruptedChain(format!(
                    "active chain revisits blocks after {visited} steps (block count {block_count})"
                )));
            }

            let block = match file.read_block(rbn)? {
                Block::Active(active) => active,
                Block::Avail(_) => {
                    return Err(Error::CorruptedChain(format!(
                        "active chain reached available block {rbn}"
                    )))
                }
            };
            let key = block.highest_key().ok_or_else(|| {
                Error::MalformedBlock(format!("active block {rbn} has no records"))
            })?;
            index.entries.push(IndexEntry { key, rbn });
            rbn = block.succeeding;
        }

        if !index.entries.windows(2).all(|w| w[0].key < w[1].key) {
            return Err(Error::CorruptedChain(
                "chain walk produced non-ascending highest keys".to_string(),
            ));
        }
        Ok(index)
    }
}

fn parse_token(token: Option<&str>, field: &str) -> Result<u32> {
    let token =
        token.ok_or_else(|| Error::IndexStale(format!("index truncated before {field}")))?;
    token
        .parse::<u32>()
        .map_err(|e| Error::IndexStale(format!("bad {field} token {token:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> BlockIndex {
        let mut index = BlockIndex::new();
        index.add_entry(IndexEntry { key: 300, rbn: 1 });
        index.add_entry(IndexEntry { key: 700, rbn: 2 });
        index.add_entry(IndexEntry { key: 900, rbn: 4 });
        index
    }

    #[test]
    fn test_find_rbn_boundaries() {
        let index = sample_index();
        // At or below a block's highest key lands in that block.
        assert_eq!(index.find_rbn(1), Some(1));
        assert_eq!(index.find_rbn(300), Some(1));
        assert_eq!(index.find_rbn(301), Some(2));
        assert_eq!(index.find_rbn(700), Some(2));
        assert_eq!(index.find_rbn(900), Some(4));
        // Larger than every key: no block claims it.
        assert_eq!(index.find_rbn(901), None);
    }

    #[test]
    fn test_find_rbn_empty() {
        let index = BlockIndex::new();
        assert_eq!(index.find_rbn(5), None);
        assert_eq!(index.last_rbn(), None);
    }

    #[test]
    fn test_add_entry_keeps_order() {
        let mut index = BlockIndex::new();
        index.add_entry(IndexEntry { key: 700, rbn: 2 });
        index.add_entry(IndexEntry { key: 300, rbn: 1 });
        index.add_entry(IndexEntry { key: 500, rbn: 3 });

        let keys: Vec<u32> = index.entries().iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![300, 500, 700]);
    }

    #[test]
    fn test_update_moves_entry() {
        let mut index = sample_index();
        // Block 1's highest key grew past block 2's.
        index.update(1, 800);

        let pairs: Vec<(u32, u32)> = index.entries().iter().map(|e| (e.key, e.rbn)).collect();
        assert_eq!(pairs, vec![(700, 2), (800, 1), (900, 4)]);
    }

    #[test]
    fn test_remove_rbn() {
        let mut index = sample_index();
        index.remove_rbn(2);
        assert_eq!(index.len(), 2);
        assert_eq!(index.find_rbn(400), Some(4));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("test.idx");

        let index = sample_index();
        index.write(&path).expect("Failed to write index");
        let read = BlockIndex::read(&path).expect("Failed to read index");
        assert_eq!(read, index);
    }

    #[test]
    fn test_write_read_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("empty.idx");

        let index = BlockIndex::new();
        index.write(&path).expect("Failed to write index");
        let read = BlockIndex::read(&path).expect("Failed to read index");
        assert!(read.is_empty());
    }

    #[test]
    fn test_read_is_insensitive_to_line_breaks() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("wrapped.idx");
        std::fs::write(&path, "{ 300 1 }\n{ 700 2 }\n  { 900 4 }\n|\n")
            .expect("Failed to write index text");

        let read = BlockIndex::read(&path).expect("Failed to read index");
        assert_eq!(read, sample_index());
    }

    #[test]
    fn test_read_rejects_missing_terminator() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, "{ 300 1 } { 700 2 }").expect("Failed to write index text");

        let result = BlockIndex::read(&path);
        assert!(matches!(result, Err(Error::IndexStale(_))));
    }

    #[test]
    fn test_read_rejects_garbage_token() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, "{ 300 one } |").expect("Failed to write index text");

        let result = BlockIndex::read(&path);
        assert!(matches!(result, Err(Error::IndexStale(_))));
    }

    #[test]
    fn test_read_rejects_unsorted_entries() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, "{ 700 2 } { 300 1 } |").expect("Failed to write index text");

        let result = BlockIndex::read(&path);
        assert!(matches!(result, Err(Error::IndexStale(_))));
    }
}
