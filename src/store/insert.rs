//! The insertion protocol: fit in place, redistribute into a neighbor, and
//! only then split. The first strategy that preserves the ordering and size
//! invariants wins.

use crate::block::{payload_size, record_cost, ActiveBlock, Block, ACTIVE_META_SIZE};
use crate::error::{Error, Result};
use crate::file::blockio::BlockFile;
use crate::file::header::FileHeader;
use crate::record::Record;
use crate::store::alloc;

/// Inserts `record` into the chain at `target_rbn`, the block whose highest
/// key is >= the record's key (or the tail). Returns the (rbn, highest key)
/// pairs the block index must be updated with. All block writes happen
/// before returning; the caller persists the header afterwards.
pub(crate) fn add_record<R: Record>(
    file: &mut BlockFile<R>,
    header: &mut FileHeader,
    target_rbn: u32,
    record: R,
) -> Result<Vec<(u32, u32)>> {
    let block_size = header.block_size;
    let mut target = file.read_active(target_rbn)?;

    let key = record.key();
    let position = match target.records.binary_search_by_key(&key, R::key) {
        Ok(_) => return Err(Error::Duplicate(key)),
        Err(position) => position,
    };

    // Fit in place.
    if target.used_size() + record_cost(&record) <= block_size {
        target.records.insert(position, record);
        let highest = highest_key(&target, target_rbn)?;
        file.write_block(target_rbn, &Block::Active(target))?;
        return Ok(vec![(target_rbn, highest)]);
    }

    // The working list is the target's records with the new one in sorted
    // position; rebalancing decisions are made over it so that a record
    // sorting before (or after) everything in the block is handled the same
    // as any other.
    let mut working = target.records.clone();
    working.insert(position, record);

    // Redistribute left: the working minimum moves to the preceding block.
    if target.preceding != 0 {
        let left_rbn = target.preceding;
        let mut left = file.read_active(left_rbn)?;

        let moved_cost = record_cost(&working[0]);
        let rest_size = ACTIVE_META_SIZE + payload_size(&working[1..]);
        if left.used_size() + moved_cost <= block_size && rest_size <= block_size {
            left.records.push(working.remove(0));
            target.records = working;

            tracing::debug!(
                block = target_rbn,
                left = left_rbn,
                key,
                "redistributed one record left to make room"
            );

            let left_high = highest_key(&left, left_rbn)?;
            let target_high = highest_key(&target, target_rbn)?;
            file.write_block(left_rbn, &Block::Active(left))?;
            file.write_block(target_rbn, &Block::Active(target))?;
            return Ok(vec![(left_rbn, left_high), (target_rbn, target_high)]);
        }
    }

    // Redistribute right: the working maximum moves to the succeeding block.
    if target.succeeding != 0 {
        let right_rbn = target.succeeding;
        let mut right = file.read_active(right_rbn)?;

        let last = working.len() - 1;
        let moved_cost = record_cost(&working[last]);
        let rest_size = ACTIVE_META_SIZE + payload_size(&working[..last]);
        if right.used_size() + moved_cost <= block_size && rest_size <= block_size {
            if let Some(moved) = working.pop() {
                right.records.insert(0, moved);
            }
            target.records = working;

            tracing::debug!(
                block = target_rbn,
                right = right_rbn,
                key,
                "redistributed one record right to make room"
            );

            let target_high = highest_key(&target, target_rbn)?;
            let right_high = highest_key(&right, right_rbn)?;
            file.write_block(target_rbn, &Block::Active(target))?;
            file.write_block(right_rbn, &Block::Active(right))?;
            return Ok(vec![(target_rbn, target_high), (right_rbn, right_high)]);
        }
    }

    // Split. The lower half keeps floor(n/2) records; ties send the extra
    // record to the new upper block.
    let split_at = working.len() / 2;
    let upper = working.split_off(split_at);
    let lower = working;

    if ACTIVE_META_SIZE + payload_size(&lower) > block_size
        || ACTIVE_META_SIZE + payload_size(&upper) > block_size
    {
        return Err(Error::MalformedBlock(format!(
            "split of block {target_rbn} produces an oversized half"
        )));
    }

    let new_rbn = alloc::allocate(file, header)?;
    let new_block = ActiveBlock::new(target_rbn, target.succeeding, upper);

    if new_block.succeeding != 0 {
        let succ_rbn = new_block.succeeding;
        let mut succ = file.read_active(succ_rbn)?;
        succ.preceding = new_rbn;
        file.write_block(succ_rbn, &Block::Active(succ))?;
    }

    target.records = lower;
    target.succeeding = new_rbn;

    tracing::info!(
        block = target_rbn,
        new = new_rbn,
        key,
        "split block on insert"
    );

    let target_high = highest_key(&target, target_rbn)?;
    let new_high = highest_key(&new_block, new_rbn)?;
    file.write_block(target_rbn, &Block::Active(target))?;
    file.write_block(new_rbn, &Block::Active(new_block))?;

    Ok(vec![(target_rbn, target_high), (new_rbn, new_high)])
}

fn highest_key<R: Record>(block: &ActiveBlock<R>, rbn: u32) -> Result<u32> {
    block
        .highest_key()
        .ok_or_else(|| Error::MalformedBlock(format!("active block {rbn} has no records")))
}
