//! The deletion protocol: remove in place while the block stays above the
//! size floor, otherwise borrow from a neighbor before merging with one.
//! Borrowing moves records one at a time, re-evaluating the fit after each
//! move, because record sizes vary. A borrow commits only when it restores
//! the floor; otherwise the records stay put and the merge path runs.

use crate::block::{payload_size, record_cost, Block, ACTIVE_META_SIZE};
use crate::error::{Error, Result};
use crate::file::blockio::BlockFile;
use crate::file::header::FileHeader;
use crate::record::Record;
use crate::store::alloc;

/// What a deletion did to the chain, for index maintenance and reporting.
pub(crate) struct RemoveEffect {
    /// True when two blocks were consolidated and one was freed. A borrow
    /// is not a merge.
    pub merged: bool,
    /// (rbn, new highest key) pairs for the block index.
    pub updates: Vec<(u32, u32)>,
    /// RBNs freed onto the available list; their index entries must go.
    pub freed: Vec<u32>,
}

/// How many trailing (for a left lender) or leading (right) records can
/// move into the target before it reaches the floor, without overflowing
/// the target, emptying the lender, or dropping a floor-bound lender below
/// the floor. Returns the move count, or 0 when the floor stays out of
/// reach.
fn plan_borrow<'a, R: Record>(
    candidates: impl Iterator<Item = &'a R>,
    lender_used: u32,
    lender_len: usize,
    lender_floor_bound: bool,
    target_used: u32,
    block_size: u32,
    min_size: u32,
) -> usize
where
    R: 'a,
{
    let mut take = 0;
    let mut target_used = target_used;
    let mut lender_used = lender_used;
    let mut lender_len = lender_len;

    for record in candidates {
        if target_used >= min_size || lender_len <= 1 {
            break;
        }
        let cost = record_cost(record);
        if target_used + cost > block_size {
            break;
        }
        if lender_floor_bound && lender_used - cost < min_size {
            break;
        }
        target_used += cost;
        lender_used -= cost;
        lender_len -= 1;
        take += 1;
    }

    if target_used >= min_size {
        take
    } else {
        0
    }
}

/// Removes `key` from the block at `target_rbn`. All block writes happen
/// before returning; the caller persists the header afterwards.
pub(crate) fn remove_record<R: Record>(
    file: &mut BlockFile<R>,
    header: &mut FileHeader,
    target_rbn: u32,
    key: u32,
) -> Result<RemoveEffect> {
    let block_size = header.block_size;
    let min_size = header.min_block_size as u32;
    let mut target = file.read_active(target_rbn)?;

    let position = target
        .records
        .binary_search_by_key(&key, R::key)
        .map_err(|_| Error::NotFound(key))?;
    target.records.remove(position);

    // The chain's only block just emptied: free it and reset the head.
    if target.records.is_empty() && target.preceding == 0 && target.succeeding == 0 {
        alloc::free(file, header, target_rbn)?;
        header.sequence_set_head = 0;
        tracing::info!(rbn = target_rbn, "freed the last block of the chain");
        return Ok(RemoveEffect {
            merged: false,
            updates: vec![],
            freed: vec![target_rbn],
        });
    }

    // Still at or above the floor: write and return. An exactly-at-floor
    // block must not rebalance.
    if !target.records.is_empty() && target.used_size() >= min_size {
        let highest = highest_key(&target, target_rbn)?;
        file.write_block(target_rbn, &Block::Active(target))?;
        return Ok(RemoveEffect {
            merged: false,
            updates: vec![(target_rbn, highest)],
            freed: vec![],
        });
    }

    // Borrow left. The left neighbor always has a successor, so the size
    // floor binds it: it may lend only while staying at or above the floor.
    if target.preceding != 0 {
        let left_rbn = target.preceding;
        let mut left = file.read_active(left_rbn)?;

        let take = plan_borrow(
            left.records.iter().rev(),
            left.used_size(),
            left.records.len(),
            true,
            target.used_size(),
            block_size,
            min_size,
        );
        if take > 0 {
            let moved = left.records.split_off(left.records.len() - take);
            target.records.splice(0..0, moved);

            tracing::debug!(
                block = target_rbn,
                left = left_rbn,
                moved = take,
                "borrowed records from the left neighbor"
            );
            let left_high = highest_key(&left, left_rbn)?;
            let target_high = highest_key(&target, target_rbn)?;
            file.write_block(left_rbn, &Block::Active(left))?;
            file.write_block(target_rbn, &Block::Active(target))?;
            return Ok(RemoveEffect {
                merged: false,
                updates: vec![(left_rbn, left_high), (target_rbn, target_high)],
                freed: vec![],
            });
        }
    }

    // Borrow right. A tail lender is exempt from the floor (the tail may be
    // underfull) but must never be emptied.
    if target.succeeding != 0 {
        let right_rbn = target.succeeding;
        let mut right = file.read_active(right_rbn)?;
        let right_is_tail = right.succeeding == 0;

        let take = plan_borrow(
            right.records.iter(),
            right.used_size(),
            right.records.len(),
            !right_is_tail,
            target.used_size(),
            block_size,
            min_size,
        );
        if take > 0 {
            let moved: Vec<R> = right.records.drain(..take).collect();
            target.records.extend(moved);

            tracing::debug!(
                block = target_rbn,
                right = right_rbn,
                moved = take,
                "borrowed records from the right neighbor"
            );
            let target_high = highest_key(&target, target_rbn)?;
            let right_high = highest_key(&right, right_rbn)?;
            file.write_block(target_rbn, &Block::Active(target))?;
            file.write_block(right_rbn, &Block::Active(right))?;
            return Ok(RemoveEffect {
                merged: false,
                updates: vec![(target_rbn, target_high), (right_rbn, right_high)],
                freed: vec![],
            });
        }
    }

    // Merge, preferring the left neighbor. The target survives; the chosen
    // neighbor is re-linked out of the chain and freed.
    if target.preceding != 0 {
        let left_rbn = target.preceding;
        let left = file.read_active(left_rbn)?;

        let combined =
            ACTIVE_META_SIZE + payload_size(&left.records) + payload_size(&target.records);
        if combined <= block_size {
            let mut records = left.records;
            records.append(&mut target.records);
            target.records = records;
            target.preceding = left.preceding;

            if left.preceding != 0 {
                let prev_rbn = left.preceding;
                let mut prev = file.read_active(prev_rbn)?;
                prev.succeeding = target_rbn;
                file.write_block(prev_rbn, &Block::Active(prev))?;
            } else {
                header.sequence_set_head = target_rbn;
            }

            tracing::info!(
                block = target_rbn,
                freed = left_rbn,
                "merged with the left neighbor on delete"
            );
            let highest = highest_key(&target, target_rbn)?;
            file.write_block(target_rbn, &Block::Active(target))?;
            alloc::free(file, header, left_rbn)?;
            return Ok(RemoveEffect {
                merged: true,
                updates: vec![(target_rbn, highest)],
                freed: vec![left_rbn],
            });
        }
    }

    if target.succeeding != 0 {
        let right_rbn = target.succeeding;
        let right = file.read_active(right_rbn)?;

        let combined =
            ACTIVE_META_SIZE + payload_size(&target.records) + payload_size(&right.records);
        if combined <= block_size {
            target.records.extend(right.records);
            target.succeeding = right.succeeding;

            if target.succeeding != 0 {
                let succ_rbn = target.succeeding;
                let mut succ = file.read_active(succ_rbn)?;
                succ.preceding = target_rbn;
                file.write_block(succ_rbn, &Block::Active(succ))?;
            }

            tracing::info!(
                block = target_rbn,
                freed = right_rbn,
                "merged with the right neighbor on delete"
            );
            let highest = highest_key(&target, target_rbn)?;
            file.write_block(target_rbn, &Block::Active(target))?;
            alloc::free(file, header, right_rbn)?;
            return Ok(RemoveEffect {
                merged: true,
                updates: vec![(target_rbn, highest)],
                freed: vec![right_rbn],
            });
        }
    }

    // Neither borrow nor merge applies: the underfull block is an accepted
    // steady state for short chains.
    tracing::debug!(
        rbn = target_rbn,
        used = target.used_size(),
        "leaving block underfull, no rebalance possible"
    );
    let highest = highest_key(&target, target_rbn)?;
    file.write_block(target_rbn, &Block::Active(target))?;
    Ok(RemoveEffect {
        merged: false,
        updates: vec![(target_rbn, highest)],
        freed: vec![],
    })
}

fn highest_key<R: Record>(block: &crate::block::ActiveBlock<R>, rbn: u32) -> Result<u32> {
    block
        .highest_key()
        .ok_or_else(|| Error::MalformedBlock(format!("active block {rbn} has no records")))
}
