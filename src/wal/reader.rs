//! WAL Reader
//!
//! Sequential frame reader used by recovery.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;

use super::entry::{HEADER_SIZE, MAX_ENTRY_SIZE};
use super::WalEntry;

/// What the reader found at the current position
#[derive(Debug)]
pub enum Frame {
    /// A complete, checksum-valid entry
    Entry(WalEntry),
    /// Clean end of file
    Eof,
    /// The file ends partway through a frame
    Torn,
    /// A complete frame whose checksum or body is invalid
    Corrupt,
}

/// Reads entries from the WAL file
pub struct WalReader {
    file: BufReader<File>,
    /// Offset just past the last complete, valid frame
    valid_offset: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: BufReader::new(file),
            valid_offset: 0,
        })
    }

    /// Read the next frame
    pub fn next_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.file, &mut header)? {
            0 => return Ok(Frame::Eof),
            n if n < HEADER_SIZE => return Ok(Frame::Torn),
            _ => {}
        }

        let (lsn, crc, len) = WalEntry::parse_header(&header);
        if len > MAX_ENTRY_SIZE {
            return Ok(Frame::Corrupt);
        }

        let mut data = vec![0u8; len as usize];
        if read_full(&mut self.file, &mut data)? < data.len() {
            return Ok(Frame::Torn);
        }

        match WalEntry::decode_body(lsn, crc, &data) {
            Ok(entry) => {
                self.valid_offset += (HEADER_SIZE + data.len()) as u64;
                Ok(Frame::Entry(entry))
            }
            Err(_) => Ok(Frame::Corrupt),
        }
    }

    /// Offset just past the last valid frame read so far
    pub fn valid_offset(&self) -> u64 {
        self.valid_offset
    }
}

impl Iterator for WalReader {
    type Item = Result<WalEntry>;

    /// Yields valid entries until the first non-entry frame
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Ok(Frame::Entry(entry)) => Some(Ok(entry)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
