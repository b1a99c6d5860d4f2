//! The free-list allocator. Reclaimed blocks form a singly-linked LIFO list
//! from the header's available-list head; allocation pops the head or, with
//! an empty list, extends the file by one slot.

use crate::block::{AvailBlock, Block};
use crate::error::{Error, Result};
use crate::file::blockio::BlockFile;
use crate::file::header::FileHeader;
use crate::record::Record;

/// Returns a newly-usable RBN. The caller must overwrite the slot before
/// reading it back.
pub fn allocate<R: Record>(file: &mut BlockFile<R>, header: &mut FileHeader) -> Result<u32> {
    if header.available_list_head != 0 {
        let rbn = header.available_list_head;
        match file.read_block(rbn)? {
            Block::Avail(avail) => {
                header.available_list_head = avail.next_avail;
                tracing::debug!(rbn, next = avail.next_avail, "reused block from free list");
                Ok(rbn)
            }
            Block::Active(_) => Err(Error::CorruptedChain(format!(
                "available list head {rbn} is an active block"
            ))),
        }
    } else {
        header.block_count += 1;
        tracing::debug!(rbn = header.block_count, "extended file by one block slot");
        Ok(header.block_count)
    }
}

/// Pushes `rbn` onto the available list. The caller must have re-linked the
/// block's active-chain neighbors before freeing it.
pub fn free<R: Record>(file: &mut BlockFile<R>, header: &mut FileHeader, rbn: u32) -> Result<()> {
    file.write_block(
        rbn,
        &Block::Avail(AvailBlock {
            next_avail: header.available_list_head,
        }),
    )?;
    header.available_list_head = rbn;
    tracing::debug!(rbn, "freed block onto available list");
    Ok(())
}
