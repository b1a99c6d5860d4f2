//! Whole-block positional I/O. Every access seeks first; nothing is assumed
//! about the file cursor between operations.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::block::{codec, ActiveBlock, AvailBlock, Block};
use crate::error::{Error, Result};
use crate::file::header::FileHeader;
use crate::record::Record;

/// A handle on an open blocked file. Reads and writes whole block slots by
/// RBN; the slot offset is `header_size + rbn * block_size`.
#[derive(Debug)]
pub struct BlockFile<R> {
    file: File,
    block_size: u32,
    header_size: u32,
    _record: PhantomData<R>,
}

impl<R: Record> BlockFile<R> {
    /// Creates a new blocked file containing only the serialized header.
    pub fn create(path: &Path, header: &FileHeader) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;

        let bytes = header.encode()?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        Ok(Self {
            file,
            block_size: header.block_size,
            header_size: header.header_size,
            _record: PhantomData,
        })
    }

    /// Opens an existing blocked file, decoding and returning its header.
    pub fn open(path: &Path) -> Result<(Self, FileHeader)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut reader = BufReader::new(file.try_clone()?);
        let header = FileHeader::decode(&mut reader)?;

        let block_file = Self {
            file,
            block_size: header.block_size,
            header_size: header.header_size,
            _record: PhantomData,
        };
        Ok((block_file, header))
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn offset(&self, rbn: u32) -> u64 {
        self.header_size as u64 + rbn as u64 * self.block_size as u64
    }

    /// Reads and parses the block slot at `rbn`. The leading record count
    /// dispatches between the active and available variants.
    pub fn read_block(&mut self, rbn: u32) -> Result<Block<R>> {
        if rbn == 0 {
            return Err(Error::MalformedBlock(
                "RBN 0 is reserved and never stores a block".to_string(),
            ));
        }

        let mut buf = vec![0u8; self.block_size as usize];
        self.file.seek(SeekFrom::Start(self.offset(rbn)))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| Error::Io(format!("read block {rbn}: {e}")))?;

        let mut cursor = &buf[..];
        let record_count = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| Error::MalformedBlock(format!("block {rbn} record count: {e}")))?;

        if record_count == 0 {
            let next_avail = cursor
                .read_u32::<LittleEndian>()
                .map_err(|e| Error::MalformedBlock(format!("block {rbn} next avail: {e}")))?;
            return Ok(Block::Avail(AvailBlock { next_avail }));
        }

        let preceding = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::MalformedBlock(format!("block {rbn} preceding RBN: {e}")))?;
        let succeeding = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::MalformedBlock(format!("block {rbn} succeeding RBN: {e}")))?;

        let records = codec::unpack(cursor, record_count)
            .map_err(|e| match e {
                Error::MalformedBlock(msg) => Error::MalformedBlock(format!("block {rbn}: {msg}")),
                other => other,
            })?;

        Ok(Block::Active(ActiveBlock {
            preceding,
            succeeding,
            records,
        }))
    }

    /// Reads the block at `rbn`, requiring it to be active. Reaching an
    /// available block through a chain link means the links are wrong.
    pub fn read_active(&mut self, rbn: u32) -> Result<ActiveBlock<R>> {
        match self.read_block(rbn)? {
            Block::Active(active) => Ok(active),
            Block::Avail(_) => Err(Error::CorruptedChain(format!(
                "expected active block at RBN {rbn}, found available block"
            ))),
        }
    }

    /// Serializes and writes one whole block slot, padding to the block
    /// size. The padding bytes are undefined; zeroes are written.
    pub fn write_block(&mut self, rbn: u32, block: &Block<R>) -> Result<()> {
        if rbn == 0 {
            return Err(Error::MalformedBlock(
                "RBN 0 is reserved and never stores a block".to_string(),
            ));
        }

        let mut buf = Vec::with_capacity(self.block_size as usize);
        match block {
            Block::Active(active) => {
                if active.records.is_empty() {
                    return Err(Error::MalformedBlock(format!(
                        "active block {rbn} must hold at least one record"
                    )));
                }
                buf.write_u16::<LittleEndian>(active.records.len() as u16)
                    .map_err(|e| Error::Io(e.to_string()))?;
                buf.write_u32::<LittleEndian>(active.preceding)
                    .map_err(|e| Error::Io(e.to_string()))?;
                buf.write_u32::<LittleEndian>(active.succeeding)
                    .map_err(|e| Error::Io(e.to_string()))?;
                let payload = codec::pack(&active.records, self.block_size)?;
                buf.extend_from_slice(&payload);
            }
            Block::Avail(avail) => {
                buf.write_u16::<LittleEndian>(0)
                    .map_err(|e| Error::Io(e.to_string()))?;
                buf.write_u32::<LittleEndian>(avail.next_avail)
                    .map_err(|e| Error::Io(e.to_string()))?;
            }
        }
        buf.resize(self.block_size as usize, 0);

        self.file.seek(SeekFrom::Start(self.offset(rbn)))?;
        self.file
            .write_all(&buf)
            .map_err(|e| Error::Io(format!("write block {rbn}: {e}")))?;
        Ok(())
    }

    /// Rewrites the header at the start of the file. The header's variable
    /// parts are fixed at creation, so the byte length never changes.
    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        let bytes = header.encode()?;
        if bytes.len() != self.header_size as usize {
            return Err(Error::MalformedHeader(format!(
                "header grew from {} to {} bytes",
                self.header_size,
                bytes.len()
            )));
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, ZipRecord};
    use tempfile::TempDir;

    fn rec(zip: u32) -> ZipRecord {
        ZipRecord::new(zip, "Town", "MN", "County", 45.0, -93.0)
    }

    fn test_header() -> FileHeader {
        FileHeader::new(512, 256, "test.idx", "primary key: zipcode", &ZipRecord::schema())
    }

    fn create_temp_file(dir: &TempDir) -> BlockFile<ZipRecord> {
        let path = dir.path().join("blocks.bsq");
        BlockFile::create(&path, &test_header()).expect("Failed to create block file")
    }

    #[test]
    fn test_active_block_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = create_temp_file(&dir);

        let block = Block::Active(ActiveBlock::new(0, 2, vec![rec(100), rec(200)]));
        file.write_block(1, &block).expect("Failed to write block");

        let read = file.read_block(1).expect("Failed to read block");
        assert_eq!(read, block);
    }

    #[test]
    fn test_avail_block_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = create_temp_file(&dir);

        let block = Block::Avail(AvailBlock { next_avail: 7 });
        file.write_block(1, &block).expect("Failed to write block");

        let read = file.read_block(1).expect("Failed to read block");
        assert_eq!(read, block);
    }

    #[test]
    fn test_freed_slot_reads_as_avail_despite_stale_payload() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = create_temp_file(&dir);

        // An active block later freed: the record count of zero is the type
        // tag, so the old payload bytes are irrelevant.
        let active = Block::Active(ActiveBlock::new(0, 0, vec![rec(100), rec(200)]));
        file.write_block(1, &active).expect("Failed to write block");
        let avail = Block::Avail(AvailBlock { next_avail: 0 });
        file.write_block(1, &avail).expect("Failed to write block");

        let read = file.read_block(1).expect("Failed to read block");
        assert_eq!(read, avail);
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = create_temp_file(&dir);

        let first = Block::Active(ActiveBlock::new(0, 2, vec![rec(100)]));
        let second = Block::Active(ActiveBlock::new(1, 0, vec![rec(200)]));
        file.write_block(1, &first).expect("Failed to write block");
        file.write_block(2, &second).expect("Failed to write block");

        assert_eq!(file.read_block(1).expect("read"), first);
        assert_eq!(file.read_block(2).expect("read"), second);
    }

    #[test]
    fn test_rbn_zero_is_rejected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = create_temp_file(&dir);

        assert!(matches!(
            file.read_block(0),
            Err(Error::MalformedBlock(_))
        ));
        let block = Block::Avail(AvailBlock { next_avail: 0 });
        assert!(matches!(
            file.write_block(0, &block),
            Err(Error::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_empty_active_block_is_rejected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut file = create_temp_file(&dir);

        let block = Block::Active(ActiveBlock::<ZipRecord>::new(0, 0, vec![]));
        assert!(matches!(
            file.write_block(1, &block),
            Err(Error::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_open_reads_back_header() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("blocks.bsq");
        let header = test_header();
        BlockFile::<ZipRecord>::create(&path, &header).expect("Failed to create block file");

        let (_, read_header) = BlockFile::<ZipRecord>::open(&path).expect("Failed to open");
        assert_eq!(read_header, header);
    }

    #[test]
    fn test_header_rewrite_preserves_blocks() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("blocks.bsq");
        let mut header = test_header();
        let mut file =
            BlockFile::<ZipRecord>::create(&path, &header).expect("Failed to create block file");

        let block = Block::Active(ActiveBlock::new(0, 0, vec![rec(100)]));
        file.write_block(1, &block).expect("Failed to write block");

        header.record_count = 1;
        header.block_count = 1;
        header.sequence_set_head = 1;
        header.stale_flag = false;
        file.write_header(&header).expect("Failed to rewrite header");

        let (mut reopened, read_header) =
            BlockFile::<ZipRecord>::open(&path).expect("Failed to open");
        assert_eq!(read_header, header);
        assert_eq!(reopened.read_block(1).expect("read"), block);
    }
}
