//! The sequence-set engine: a keyed collection of records in fixed-size
//! blocks, chained in key order, with a highest-key block index on the side.

pub mod alloc;
pub mod build;
mod insert;
mod remove;

use std::io::Write;
use std::path::{Path, PathBuf};

use itertools::Itertools as _;

use crate::block::{record_cost, ActiveBlock, Block, ACTIVE_META_SIZE, AVAIL_META_SIZE};
use crate::error::{Error, Result};
use crate::file::blockio::BlockFile;
use crate::file::header::FileHeader;
use crate::index::BlockIndex;
use crate::record::Record;

/// Parameters for a new blocked file.
#[derive(Clone, Debug)]
pub struct Options {
    pub block_size: u32,
    /// Minimum used size below which a deletion triggers rebalancing.
    pub min_block_size: u16,
    /// Stored in the header; a relative name is resolved against the data
    /// file's directory.
    pub index_file_name: String,
    pub schema_info: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: 1024,
            min_block_size: 256,
            index_file_name: "blockseq.idx".to_string(),
            schema_info: "primary key: zipcode".to_string(),
        }
    }
}

/// An open blocked sequence set. One writer, no concurrent readers; every
/// operation completes synchronously before returning.
pub struct SeqSet<R: Record> {
    file: BlockFile<R>,
    header: FileHeader,
    index: BlockIndex,
    index_path: PathBuf,
    mutated: bool,
}

impl<R: Record> SeqSet<R> {
    /// Creates a new empty blocked file and its (empty) index file.
    pub fn create(path: &Path, options: Options) -> Result<Self> {
        if options.block_size < ACTIVE_META_SIZE + AVAIL_META_SIZE {
            return Err(Error::MalformedHeader(format!(
                "block size {} cannot hold block metadata",
                options.block_size
            )));
        }
        if options.min_block_size as u32 > options.block_size {
            return Err(Error::MalformedHeader(format!(
                "min block size {} exceeds block size {}",
                options.min_block_size, options.block_size
            )));
        }

        let header = FileHeader::new(
            options.block_size,
            options.min_block_size,
            &options.index_file_name,
            &options.schema_info,
            &R::schema(),
        );
        let file = BlockFile::create(path, &header)?;
        let index_path = resolve_index_path(path, &header.index_file_name);

        let mut set = Self {
            file,
            header,
            index: BlockIndex::new(),
            index_path,
            mutated: false,
        };
        set.index.write(&set.index_path)?;
        set.header.stale_flag = false;
        set.file.write_header(&set.header)?;
        set.file.sync()?;
        Ok(set)
    }

    /// Opens an existing blocked file. A set stale flag forces an index
    /// rebuild from the authoritative chain; so does an unreadable index.
    pub fn open(path: &Path) -> Result<Self> {
        let (mut file, header) = BlockFile::open(path)?;
        let index_path = resolve_index_path(path, &header.index_file_name);

        let index = if header.stale_flag {
            tracing::warn!(path = %path.display(), "stale flag set, rebuilding block index");
            BlockIndex::build(&mut file, header.sequence_set_head, header.block_count)
                .map_err(|e| Error::IndexStale(format!("rebuild failed: {e}")))?
        } else {
            match BlockIndex::read(&index_path) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(error = %e, "index file unreadable, rebuilding from chain");
                    BlockIndex::build(&mut file, header.sequence_set_head, header.block_count)?
                }
            }
        };

        Ok(Self {
            file,
            header,
            index,
            index_path,
            mutated: false,
        })
    }

    /// Writes the index and clears the stale flag, in that order, so a
    /// failed index write leaves the flag set for the next open.
    pub fn close(mut self) -> Result<()> {
        if self.mutated {
            self.index.write(&self.index_path)?;
            self.header.stale_flag = false;
            self.file.write_header(&self.header)?;
            self.file.sync()?;
        }
        Ok(())
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Point lookup. The index only narrows the search to one block; the
    /// block itself is scanned to confirm presence.
    pub fn lookup(&mut self, key: u32) -> Result<Option<R>> {
        let Some(rbn) = self.index.find_rbn(key) else {
            return Ok(None);
        };
        let block = self.file.read_active(rbn)?;
        match block.records.binary_search_by_key(&key, R::key) {
            Ok(position) => Ok(Some(block.records[position].clone())),
            Err(_) => Ok(None),
        }
    }

    /// Inserts a record, splitting or redistributing as needed. Duplicate
    /// keys are rejected and leave all state unchanged.
    pub fn insert(&mut self, record: R) -> Result<()> {
        let key = record.key();
        if ACTIVE_META_SIZE + record_cost(&record) > self.header.block_size {
            return Err(Error::CapacityExceeded(record.encoded_size()));
        }

        let target = self.index.find_rbn(key).or_else(|| self.index.last_rbn());
        let updates = match target {
            Some(rbn) => insert::add_record(&mut self.file, &mut self.header, rbn, record)?,
            None => {
                // Empty chain: seed it with a single one-record block.
                let rbn = alloc::allocate(&mut self.file, &mut self.header)?;
                self.file
                    .write_block(rbn, &Block::Active(ActiveBlock::new(0, 0, vec![record])))?;
                self.header.sequence_set_head = rbn;
                vec![(rbn, key)]
            }
        };

        self.header.record_count += 1;
        self.commit_header()?;
        for (rbn, highest) in updates {
            self.index.update(rbn, highest);
        }
        Ok(())
    }

    /// Removes a record by key, borrowing or merging as needed. Returns
    /// whether a merge occurred (a borrow is not a merge).
    pub fn remove(&mut self, key: u32) -> Result<bool> {
        let Some(rbn) = self.index.find_rbn(key) else {
            return Err(Error::NotFound(key));
        };
        let effect = remove::remove_record(&mut self.file, &mut self.header, rbn, key)?;

        self.header.record_count -= 1;
        self.commit_header()?;
        for freed in &effect.freed {
            self.index.remove_rbn(*freed);
        }
        for (rbn, highest) in effect.updates {
            self.index.update(rbn, highest);
        }
        Ok(effect.merged)
    }

    /// Persists the header after a mutation's block writes, keeping the
    /// stale flag set until close. A crash mid-mutation therefore leaves
    /// either the pre-state header or a structurally complete post-state.
    fn commit_header(&mut self) -> Result<()> {
        self.header.stale_flag = true;
        self.file.write_header(&self.header)?;
        self.mutated = true;
        Ok(())
    }

    /// Iterates every record in key order by walking the active chain.
    pub fn scan(&mut self) -> Scan<'_, R> {
        Scan {
            next_rbn: self.header.sequence_set_head,
            visited: 0,
            block_count: self.header.block_count,
            pending: Vec::new().into_iter(),
            file: &mut self.file,
        }
    }

    /// Prints every block slot in on-disk order with its type and links.
    pub fn dump_physical(&mut self, out: &mut impl Write) -> Result<()> {
        for rbn in 1..=self.header.block_count {
            match self.file.read_block(rbn)? {
                Block::Active(block) => {
                    let keys = block.records.iter().map(R::key).join(" ");
                    writeln!(
                        out,
                        "RBN {rbn} active prev={} next={} keys: {keys}",
                        block.preceding, block.succeeding
                    )?;
                }
                Block::Avail(block) => {
                    writeln!(out, "RBN {rbn} *avail* next={}", block.next_avail)?;
                }
            }
        }
        Ok(())
    }

    /// Prints the active chain in key order, one block per line.
    pub fn dump_logical(&mut self, out: &mut impl Write) -> Result<()> {
        let mut rbn = self.header.sequence_set_head;
        let mut visited = 0u32;
        while rbn != 0 {
            visited += 1;
            if visited > self.header.block_count {
                return Err(Error::CorruptedChain(format!(
                    "logical dump revisits blocks after {visited} steps"
                )));
            }
            let block = self.file.read_active(rbn)?;
            let keys = block.records.iter().map(R::key).join(" ");
            writeln!(out, "RBN {rbn}: {keys}")?;
            rbn = block.succeeding;
        }
        Ok(())
    }

    /// Full structural check: chain link symmetry, key ordering within and
    /// across blocks, the size floor and ceiling, the active/available
    /// partition of RBNs, and the header's counters.
    pub fn verify_integrity(&mut self) -> Result<()> {
        let block_count = self.header.block_count;
        let min_size = self.header.min_block_size as u32;
        let mut seen = vec![false; block_count as usize + 1];
        let mut records = 0u32;

        let mut rbn = self.header.sequence_set_head;
        let mut prev_rbn = 0u32;
        let mut prev_high: Option<u32> = None;
        let mut steps = 0u32;
        while rbn != 0 {
            steps += 1;
            if steps > block_count {
                return Err(Error::CorruptedChain(
                    "active chain is longer than the block count".to_string(),
                ));
            }
            if rbn > block_count {
                return Err(Error::CorruptedChain(format!(
                    "active chain reaches RBN {rbn} beyond block count {block_count}"
                )));
            }
            if seen[rbn as usize] {
                return Err(Error::CorruptedChain(format!(
                    "RBN {rbn} appears twice in the active chain"
                )));
            }
            seen[rbn as usize] = true;

            let block = self.file.read_active(rbn)?;
            if block.preceding != prev_rbn {
                return Err(Error::CorruptedChain(format!(
                    "block {rbn} claims preceding {} but follows {prev_rbn}",
                    block.preceding
                )));
            }

            let keys: Vec<u32> = block.records.iter().map(R::key).collect();
            if !keys.windows(2).all(|w| w[0] < w[1]) {
                return Err(Error::MalformedBlock(format!(
                    "block {rbn} keys are not strictly ascending"
                )));
            }
            if let (Some(high), Some(&low)) = (prev_high, keys.first()) {
                if high >= low {
                    return Err(Error::CorruptedChain(format!(
                        "block {rbn} overlaps its predecessor ({high} >= {low})"
                    )));
                }
            }

            if block.used_size() > self.header.block_size {
                return Err(Error::MalformedBlock(format!(
                    "block {rbn} used size {} exceeds block size",
                    block.used_size()
                )));
            }
            if !block.is_tail() && block.used_size() < min_size {
                return Err(Error::MalformedBlock(format!(
                    "non-tail block {rbn} used size {} is below the floor {min_size}",
                    block.used_size()
                )));
            }

            records += block.records.len() as u32;
            prev_high = keys.last().copied().or(prev_high);
            prev_rbn = rbn;
            rbn = block.succeeding;
        }

        if records != self.header.record_count {
            return Err(Error::MalformedBlock(format!(
                "chain holds {records} records but the header claims {}",
                self.header.record_count
            )));
        }

        let mut avail = self.header.available_list_head;
        let mut steps = 0u32;
        while avail != 0 {
            steps += 1;
            if steps > block_count {
                return Err(Error::CorruptedChain(
                    "available list is longer than the block count".to_string(),
                ));
            }
            if avail > block_count || seen[avail as usize] {
                return Err(Error::CorruptedChain(format!(
                    "RBN {avail} is on the available list and elsewhere"
                )));
            }
            seen[avail as usize] = true;
            match self.file.read_block(avail)? {
                Block::Avail(block) => avail = block.next_avail,
                Block::Active(_) => {
                    return Err(Error::CorruptedChain(format!(
                        "available list reaches active block {avail}"
                    )))
                }
            }
        }

        if let Some(unaccounted) = (1..=block_count).find(|&r| !seen[r as usize]) {
            return Err(Error::CorruptedChain(format!(
                "RBN {unaccounted} is in neither the active chain nor the available list"
            )));
        }
        Ok(())
    }
}

fn resolve_index_path(data_path: &Path, index_file_name: &str) -> PathBuf {
    let index = Path::new(index_file_name);
    if index.is_absolute() {
        index.to_path_buf()
    } else {
        match data_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(index),
            _ => index.to_path_buf(),
        }
    }
}

/// A key-ordered record iterator over the active chain.
pub struct Scan<'a, R: Record> {
    file: &'a mut BlockFile<R>,
    next_rbn: u32,
    visited: u32,
    block_count: u32,
    pending: std::vec::IntoIter<R>,
}

impl<R: Record> Iterator for Scan<'_, R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                return Some(Ok(record));
            }
            if self.next_rbn == 0 {
                return None;
            }
            self.visited += 1;
            if self.visited > self.block_count {
                return Some(Err(Error::CorruptedChain(format!(
                    "scan revisits blocks after {} steps",
                    self.visited
                ))));
            }
            match self.file.read_active(self.next_rbn) {
                Ok(block) => {
                    self.next_rbn = block.succeeding;
                    self.pending = block.records.into_iter();
                }
                Err(e) => {
                    self.next_rbn = 0;
                    return Some(Err(e));
                }
            }
        }
    }
}
