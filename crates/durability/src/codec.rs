//! Binary codec for persist records
//!
//! Layout: MessagePack body (named fields) followed by a little-endian CRC32
//! of the body. Decoding verifies the checksum before touching the body.

use crate::record::PersistRecord;
use timeline_core::{HistoryError, Result};

const CRC_LEN: usize = 4;

/// Encode a record with a trailing checksum
pub fn encode_record(record: &PersistRecord) -> Result<Vec<u8>> {
    let mut bytes =
        rmp_serde::to_vec_named(record).map_err(|e| HistoryError::Serialization(e.to_string()))?;
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(bytes)
}

/// Decode a record, verifying its checksum
pub fn decode_record(bytes: &[u8]) -> Result<PersistRecord> {
    if bytes.len() < CRC_LEN {
        return Err(HistoryError::Corruption(format!(
            "record too short: {} bytes",
            bytes.len()
        )));
    }
    let (body, footer) = bytes.split_at(bytes.len() - CRC_LEN);
    let mut crc_bytes = [0u8; CRC_LEN];
    crc_bytes.copy_from_slice(footer);
    let expected = u32::from_le_bytes(crc_bytes);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(HistoryError::Corruption(format!(
            "checksum mismatch: expected {:08x}, computed {:08x}",
            expected, actual
        )));
    }
    rmp_serde::from_slice(body).map_err(|e| HistoryError::Serialization(e.to_string()))
}
