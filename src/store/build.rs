//! Bulk load: seed a new blocked file from a record stream. Records are
//! sorted by key, packed greedily into blocks, and chained; the index is
//! built from the blocks just written and the stale flag cleared last.

use std::path::Path;

use crate::block::{record_cost, ActiveBlock, Block, ACTIVE_META_SIZE};
use crate::error::{Error, Result};
use crate::index::{BlockIndex, IndexEntry};
use crate::record::Record;
use crate::store::{Options, SeqSet};

/// Creates a blocked file at `path` holding `records`. Input order does not
/// matter; duplicate keys are rejected before anything is written.
pub fn create_from_records<R: Record>(
    path: &Path,
    options: Options,
    records: impl IntoIterator<Item = R>,
) -> Result<SeqSet<R>> {
    let mut records: Vec<R> = records.into_iter().collect();
    records.sort_by_key(R::key);
    if let Some(dup) = records.windows(2).find(|w| w[0].key() == w[1].key()) {
        return Err(Error::Duplicate(dup[0].key()));
    }

    let block_size = options.block_size;
    for record in &records {
        if ACTIVE_META_SIZE + record_cost(record) > block_size {
            return Err(Error::CapacityExceeded(record.encoded_size()));
        }
    }

    let mut set = SeqSet::create(path, options)?;
    if records.is_empty() {
        return Ok(set);
    }

    // Greedy fill: start a new block when the next record would overflow.
    let mut runs: Vec<Vec<R>> = vec![Vec::new()];
    let mut used = ACTIVE_META_SIZE;
    for record in records {
        let cost = record_cost(&record);
        if used + cost > block_size {
            runs.push(Vec::new());
            used = ACTIVE_META_SIZE;
        }
        used += cost;
        if let Some(run) = runs.last_mut() {
            run.push(record);
        }
    }

    write_chain(&mut set, runs)?;
    Ok(set)
}

fn write_chain<R: Record>(set: &mut SeqSet<R>, runs: Vec<Vec<R>>) -> Result<()> {
    let total_blocks = runs.len() as u32;
    let mut index = BlockIndex::new();
    let mut record_count = 0u32;

    for (i, run) in runs.into_iter().enumerate() {
        let rbn = i as u32 + 1;
        let preceding = if rbn == 1 { 0 } else { rbn - 1 };
        let succeeding = if rbn == total_blocks { 0 } else { rbn + 1 };

        record_count += run.len() as u32;
        let block = ActiveBlock::new(preceding, succeeding, run);
        if let Some(key) = block.highest_key() {
            index.add_entry(IndexEntry { key, rbn });
        }
        set.file.write_block(rbn, &Block::Active(block))?;
    }

    set.header.record_count = record_count;
    set.header.block_count = total_blocks;
    set.header.sequence_set_head = 1;
    set.header.stale_flag = true;
    set.file.write_header(&set.header)?;

    // Persist the index, then clear the stale flag; never the other way.
    index.write(&set.index_path)?;
    set.index = index;
    set.header.stale_flag = false;
    set.file.write_header(&set.header)?;
    set.file.sync()?;

    tracing::info!(
        blocks = total_blocks,
        records = record_count,
        "bulk load complete"
    );
    Ok(())
}
