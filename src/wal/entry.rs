//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VkvError};
use crate::store::ObjectVersion;

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest data section accepted when reading (64 MB)
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to replay
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Mutations of the primary store that are logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// A new object-version was committed
    Put { record: ObjectVersion },

    /// An object-version was removed
    Delete { object_key: String, version_node: u64 },

    /// Version high-water mark with no live record behind it
    Reserve { object_key: String, version_node: u64 },
}

impl WalEntry {
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Serialize into a framed record
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(&(self.timestamp, &self.operation))?;
        if data.len() > MAX_ENTRY_SIZE as usize {
            return Err(VkvError::Storage(format!(
                "WAL entry too large: {} bytes (max {})",
                data.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let crc = Self::compute_crc(self.lsn, &data);

        let mut out = Vec::with_capacity(HEADER_SIZE + data.len());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Deserialize one framed record, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(VkvError::Storage(format!(
                "WAL entry truncated: {} bytes, header needs {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let (lsn, crc, len) = Self::parse_header(&bytes[..HEADER_SIZE]);
        let end = HEADER_SIZE + len as usize;
        if bytes.len() < end {
            return Err(VkvError::Storage(format!(
                "WAL entry truncated: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }

        Self::decode_body(lsn, crc, &bytes[HEADER_SIZE..end])
    }

    /// Split a header into (lsn, crc, data length)
    pub(super) fn parse_header(header: &[u8]) -> (u64, u32, u32) {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);
        (
            u64::from_le_bytes(lsn),
            u32::from_le_bytes(crc),
            u32::from_le_bytes(len),
        )
    }

    /// Verify and decode the data section of a frame
    pub(super) fn decode_body(lsn: u64, crc: u32, data: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(lsn, data);
        if actual != crc {
            return Err(VkvError::Storage(format!(
                "WAL corruption at lsn {}: crc {:08x} != {:08x}",
                lsn, actual, crc
            )));
        }

        let (timestamp, operation): (u64, Operation) = bincode::deserialize(data)?;
        Ok(Self {
            lsn,
            operation,
            timestamp,
        })
    }

    fn compute_crc(lsn: u64, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(data);
        hasher.finalize()
    }
}
