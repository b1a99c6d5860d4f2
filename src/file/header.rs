use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::record::{FieldDef, FieldType, Schema};

/// File structure type tag, the first four bytes of every blocked file.
pub const MAGIC: [u8; 4] = *b"BSEQ";

/// Current file format version.
pub const VERSION: u16 = 1;

/// How record payloads are serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeFormat {
    /// Records are ASCII text.
    Ascii = 0,
    /// Records are binary.
    Binary = 1,
}

impl SizeFormat {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SizeFormat::Ascii),
            1 => Some(SizeFormat::Binary),
            _ => None,
        }
    }
}

/// The file header. A fixed prefix followed by two length-prefixed strings,
/// the field-descriptor table, the list heads, and the stale flag as the
/// final byte. All integers little-endian.
#[derive(Clone, Debug, PartialEq)]
pub struct FileHeader {
    pub version: u16,
    pub header_size: u32,
    pub size_format: SizeFormat,
    pub block_size: u32,
    /// Minimum used size below which a deletion triggers rebalancing.
    pub min_block_size: u16,
    pub index_file_name: String,
    pub schema_info: String,
    /// Records across the whole active chain.
    pub record_count: u32,
    /// Blocks in use: active chain plus available list.
    pub block_count: u32,
    pub fields: Vec<FieldDef>,
    pub primary_key_field: u8,
    /// RBN of the first free block, 0 if the list is empty.
    pub available_list_head: u32,
    /// RBN of the first active block, 0 if the chain is empty.
    pub sequence_set_head: u32,
    /// When set, the block index file must be rebuilt before it is trusted.
    pub stale_flag: bool,
}

impl FileHeader {
    pub fn new(
        block_size: u32,
        min_block_size: u16,
        index_file_name: &str,
        schema_info: &str,
        schema: &Schema,
    ) -> Self {
        let mut header = Self {
            version: VERSION,
            header_size: 0,
            size_format: SizeFormat::Ascii,
            block_size,
            min_block_size,
            index_file_name: index_file_name.to_string(),
            schema_info: schema_info.to_string(),
            record_count: 0,
            block_count: 0,
            fields: schema.fields.clone(),
            primary_key_field: schema.primary_key,
            available_list_head: 0,
            sequence_set_head: 0,
            stale_flag: true,
        };
        header.header_size = header.encoded_len();
        header
    }

    /// The exact byte length of the serialized header. The variable parts
    /// (strings, field table) are fixed at creation, so this never changes
    /// over a file's lifetime.
    pub fn encoded_len(&self) -> u32 {
        let fixed = 4 + 2 + 4 + 1 + 4 + 2   // magic, version, size, format, block size, min
            + 2 + 2                          // two string length prefixes
            + 4 + 4                          // record count, block count
            + 1                              // field count
            + 1                              // primary key field
            + 4 + 4                          // list heads
            + 1; // stale flag
        let fields: usize = self.fields.iter().map(|f| 2 + f.name.len() + 1).sum();
        (fixed + self.index_file_name.len() + self.schema_info.len() + fields) as u32
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        let mut encoder = HeaderEncoder::new(&mut buf);
        encoder.encode(self)?;
        Ok(buf)
    }

    pub fn decode(reader: &mut impl Read) -> Result<Self> {
        let mut decoder = HeaderDecoder::new(reader);
        decoder.decode()
    }
}

impl TryInto<Vec<u8>> for &FileHeader {
    type Error = Error;

    fn try_into(self) -> Result<Vec<u8>> {
        self.encode()
    }
}

impl TryFrom<&[u8]> for FileHeader {
    type Error = Error;

    fn try_from(mut bytes: &[u8]) -> Result<Self> {
        FileHeader::decode(&mut bytes)
    }
}

pub struct HeaderEncoder<W: Write> {
    writer: W,
}

impl<W: Write> HeaderEncoder<W> {
    pub fn new(writer: W) -> Self {
        HeaderEncoder { writer }
    }

    pub fn encode(&mut self, header: &FileHeader) -> Result<()> {
        let err = |field: &str, e: std::io::Error| Error::Io(format!("encode {field}: {e}"));

        self.writer
            .write_all(&MAGIC)
            .map_err(|e| err("structure type", e))?;
        self.writer
            .write_u16::<LittleEndian>(header.version)
            .map_err(|e| err("version", e))?;
        self.writer
            .write_u32::<LittleEndian>(header.encoded_len())
            .map_err(|e| err("header size", e))?;
        self.writer
            .write_u8(header.size_format as u8)
            .map_err(|e| err("size format", e))?;
        self.writer
            .write_u32::<LittleEndian>(header.block_size)
            .map_err(|e| err("block size", e))?;
        self.writer
            .write_u16::<LittleEndian>(header.min_block_size)
            .map_err(|e| err("min block size", e))?;

        self.encode_string("index file name", &header.index_file_name)?;
        self.encode_string("schema info", &header.schema_info)?;

        self.writer
            .write_u32::<LittleEndian>(header.record_count)
            .map_err(|e| err("record count", e))?;
        self.writer
            .write_u32::<LittleEndian>(header.block_count)
            .map_err(|e| err("block count", e))?;

        self.writer
            .write_u8(header.fields.len() as u8)
            .map_err(|e| err("field count", e))?;
        for field in &header.fields {
            self.encode_string("field name", &field.name)?;
            self.writer
                .write_u8(field.field_type.tag())
                .map_err(|e| err("field type", e))?;
        }

        self.writer
            .write_u8(header.primary_key_field)
            .map_err(|e| err("primary key field", e))?;
        self.writer
            .write_u32::<LittleEndian>(header.available_list_head)
            .map_err(|e| err("available list head", e))?;
        self.writer
            .write_u32::<LittleEndian>(header.sequence_set_head)
            .map_err(|e| err("sequence set head", e))?;
        self.writer
            .write_u8(header.stale_flag as u8)
            .map_err(|e| err("stale flag", e))?;

        Ok(())
    }

    fn encode_string(&mut self, field: &str, value: &str) -> Result<()> {
        self.writer
            .write_u16::<LittleEndian>(value.len() as u16)
            .map_err(|e| Error::Io(format!("encode {field} length: {e}")))?;
        self.writer
            .write_all(value.as_bytes())
            .map_err(|e| Error::Io(format!("encode {field}: {e}")))?;
        Ok(())
    }
}

pub struct HeaderDecoder<R: Read> {
    reader: R,
}

impl<R: Read> HeaderDecoder<R> {
    pub fn new(reader: R) -> Self {
        HeaderDecoder { reader }
    }

    pub fn decode(&mut self) -> Result<FileHeader> {
        let mut magic = [0u8; 4];
        self.reader
            .read_exact(&mut magic)
            .map_err(|e| Error::MalformedHeader(format!("structure type: {e}")))?;
        if magic != MAGIC {
            return Err(Error::MalformedHeader(format!(
                "bad magic {magic:?}, expected {MAGIC:?}"
            )));
        }

        let version = self.read_u16("version")?;
        if version != VERSION {
            return Err(Error::MalformedHeader(format!(
                "unsupported version {version}"
            )));
        }

        let header_size = self.read_u32("header size")?;

        let format_tag = self.read_u8("size format")?;
        let size_format = SizeFormat::from_tag(format_tag).ok_or_else(|| {
            Error::MalformedHeader(format!("unknown size format tag {format_tag}"))
        })?;

        let block_size = self.read_u32("block size")?;
        let min_block_size = self.read_u16("min block size")?;
        let index_file_name = self.read_string("index file name")?;
        let schema_info = self.read_string("schema info")?;
        let record_count = self.read_u32("record count")?;
        let block_count = self.read_u32("block count")?;

        let field_count = self.read_u8("field count")?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let name = self.read_string("field name")?;
            let tag = self.read_u8("field type")?;
            let field_type = FieldType::from_tag(tag).ok_or_else(|| {
                Error::MalformedHeader(format!("unknown field type tag {tag} for {name:?}"))
            })?;
            fields.push(FieldDef { name, field_type });
        }

        let primary_key_field = self.read_u8("primary key field")?;
        if primary_key_field >= field_count {
            return Err(Error::MalformedHeader(format!(
                "primary key field {primary_key_field} out of range for {field_count} fields"
            )));
        }

        let available_list_head = self.read_u32("available list head")?;
        let sequence_set_head = self.read_u32("sequence set head")?;
        let stale_tag = self.read_u8("stale flag")?;
        let stale_flag = match stale_tag {
            0 => false,
            1 => true,
            _ => {
                return Err(Error::MalformedHeader(format!(
                    "stale flag must be 0 or 1, got {stale_tag}"
                )))
            }
        };

        let header = FileHeader {
            version,
            header_size,
            size_format,
            block_size,
            min_block_size,
            index_file_name,
            schema_info,
            record_count,
            block_count,
            fields,
            primary_key_field,
            available_list_head,
            sequence_set_head,
            stale_flag,
        };

        if header.encoded_len() != header_size {
            return Err(Error::MalformedHeader(format!(
                "stored header size {header_size} disagrees with actual {}",
                header.encoded_len()
            )));
        }

        Ok(header)
    }

    fn read_u8(&mut self, field: &str) -> Result<u8> {
        self.reader
            .read_u8()
            .map_err(|e| Error::MalformedHeader(format!("{field}: {e}")))
    }

    fn read_u16(&mut self, field: &str) -> Result<u16> {
        self.reader
            .read_u16::<LittleEndian>()
            .map_err(|e| Error::MalformedHeader(format!("{field}: {e}")))
    }

    fn read_u32(&mut self, field: &str) -> Result<u32> {
        self.reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::MalformedHeader(format!("{field}: {e}")))
    }

    fn read_string(&mut self, field: &str) -> Result<String> {
        let len = self.read_u16(field)?;
        let mut buf = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| Error::MalformedHeader(format!("{field}: {e}")))?;
        String::from_utf8(buf)
            .map_err(|e| Error::MalformedHeader(format!("{field} is not utf-8: {e}")))
    }
}
