//! Packs an ordered record run into a block payload and back. Each entry is
//! a little-endian u32 length followed by the record's serialized bytes.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::block::ACTIVE_META_SIZE;
use crate::error::{Error, Result};
use crate::record::Record;

/// Packs `records`, in order, into a payload buffer. `capacity` is the full
/// block size; the payload plus the active metadata must not exceed it.
pub fn pack<R: Record>(records: &[R], capacity: u32) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    for record in records {
        let bytes = record.encode();
        payload
            .write_u32::<LittleEndian>(bytes.len() as u32)
            .map_err(|e| Error::Io(e.to_string()))?;
        payload.extend_from_slice(&bytes);
    }

    if ACTIVE_META_SIZE as usize + payload.len() > capacity as usize {
        return Err(Error::MalformedBlock(format!(
            "packed payload of {} bytes exceeds block capacity {}",
            ACTIVE_META_SIZE as usize + payload.len(),
            capacity
        )));
    }
    Ok(payload)
}

/// Unpacks exactly `count` records from a payload. The count comes from the
/// block's metadata and is authoritative; trailing padding past the last
/// record is never touched. A declared length that overruns the remaining
/// payload is a malformed block.
pub fn unpack<R: Record>(payload: &[u8], count: u16) -> Result<Vec<R>> {
    let mut cursor = Cursor::new(payload);
    let mut records = Vec::with_capacity(count as usize);

    for i in 0..count {
        let len = cursor.read_u32::<LittleEndian>().map_err(|_| {
            Error::MalformedBlock(format!(
                "payload exhausted reading length of record {i} of {count}"
            ))
        })? as usize;

        let start = cursor.position() as usize;
        if start + len > payload.len() {
            return Err(Error::MalformedBlock(format!(
                "record {i} declares {len} bytes but only {} remain",
                payload.len() - start
            )));
        }

        records.push(R::decode(&payload[start..start + len])?);
        cursor.set_position((start + len) as u64);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ZipRecord;

    fn rec(zip: u32) -> ZipRecord {
        ZipRecord::new(zip, "Town", "MN", "County", 45.0, -93.0)
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let records = vec![rec(100), rec(200), rec(300)];
        let payload = pack(&records, 4096).expect("Failed to pack");
        let unpacked: Vec<ZipRecord> =
            unpack(&payload, records.len() as u16).expect("Failed to unpack");
        assert_eq!(unpacked, records);
    }

    #[test]
    fn test_unpack_ignores_trailing_padding() {
        let records = vec![rec(100), rec(200)];
        let mut payload = pack(&records, 4096).expect("Failed to pack");
        // Padding in a block slot is undefined; the count keeps it inert.
        payload.extend_from_slice(&[0xAB; 64]);

        let unpacked: Vec<ZipRecord> = unpack(&payload, 2).expect("Failed to unpack");
        assert_eq!(unpacked, records);
    }

    #[test]
    fn test_pack_rejects_overflow() {
        let records = vec![rec(100), rec(200), rec(300)];
        let needed = crate::block::payload_size(&records) + ACTIVE_META_SIZE;
        let result = pack(&records, needed - 1);
        assert!(matches!(result, Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_pack_fills_exactly_to_capacity() {
        let records = vec![rec(100), rec(200)];
        let needed = crate::block::payload_size(&records) + ACTIVE_META_SIZE;
        assert!(pack(&records, needed).is_ok());
    }

    #[test]
    fn test_unpack_rejects_overlong_declared_length() {
        let records = vec![rec(100)];
        let mut payload = pack(&records, 4096).expect("Failed to pack");
        // Corrupt the length prefix to point past the end of the payload.
        payload[0] = 0xFF;
        payload[1] = 0xFF;

        let result: Result<Vec<ZipRecord>> = unpack(&payload, 1);
        assert!(matches!(result, Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_unpack_rejects_truncated_payload() {
        let records = vec![rec(100), rec(200)];
        let payload = pack(&records, 4096).expect("Failed to pack");
        // Claim three records when only two are present.
        let result: Result<Vec<ZipRecord>> = unpack(&payload, 3);
        assert!(matches!(result, Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_unpack_empty_payload_zero_count() {
        let unpacked: Vec<ZipRecord> = unpack(&[], 0).expect("Failed to unpack empty");
        assert!(unpacked.is_empty());
    }
}
