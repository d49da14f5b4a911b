//! Key encoding and decoding
//!
//! See the module docs for the byte layout.

use crate::error::{Result, VkvError};

/// Maximum encoded length of a hash-key component (bytes of UTF-8)
pub const MAX_HASH_KEY_LEN: usize = 2048;

/// Maximum encoded length of a string range-key component
pub const MAX_RANGE_KEY_LEN: usize = 1024;

/// Escape byte written after a literal zero byte
const ESCAPED_ZERO: u8 = 0xFF;

/// Second byte of the component terminator
const TERMINATOR: u8 = 0x01;

/// Size of the big-endian version suffix
const VERSION_SIZE: usize = 8;

// =============================================================================
// Primary Key
// =============================================================================

/// Encode `(object_key, version_node)` into its ordered byte form
pub fn encode_primary(object_key: &str, version_node: u64) -> Result<Vec<u8>> {
    let mut out = primary_prefix(object_key)?;
    out.extend_from_slice(&version_node.to_be_bytes());
    Ok(out)
}

/// Prefix shared by every version of `object_key`
pub fn primary_prefix(object_key: &str) -> Result<Vec<u8>> {
    check_component("object-key", object_key, MAX_HASH_KEY_LEN)?;
    let mut out = Vec::with_capacity(object_key.len() + 2 + VERSION_SIZE);
    write_component(&mut out, object_key);
    Ok(out)
}

/// Decode bytes produced by [`encode_primary`]
pub fn decode_primary(bytes: &[u8]) -> Result<(String, u64)> {
    let (object_key, rest) = read_component(bytes, "object-key")?;

    if rest.len() != VERSION_SIZE {
        return Err(VkvError::Encoding(format!(
            "primary key: expected {} version bytes, got {}",
            VERSION_SIZE,
            rest.len()
        )));
    }

    let mut raw = [0u8; VERSION_SIZE];
    raw.copy_from_slice(rest);
    Ok((object_key, u64::from_be_bytes(raw)))
}

/// The version after `current`, failing on overflow
pub fn checked_next_version(current: u64) -> Result<u64> {
    current.checked_add(1).ok_or_else(|| {
        VkvError::Encoding(format!("version-node overflow after {}", current))
    })
}

// =============================================================================
// Index Key
// =============================================================================

/// Encode `(job_hash, job_range)` into its ordered byte form
pub fn encode_index(job_hash: &str, job_range: &str) -> Result<Vec<u8>> {
    check_component("ingest-job-range", job_range, MAX_RANGE_KEY_LEN)?;
    let mut out = index_prefix(job_hash)?;
    write_component(&mut out, job_range);
    Ok(out)
}

/// Prefix shared by every index entry of `job_hash`
pub fn index_prefix(job_hash: &str) -> Result<Vec<u8>> {
    check_component("ingest-job-hash", job_hash, MAX_HASH_KEY_LEN)?;
    let mut out = Vec::with_capacity(job_hash.len() + 2);
    write_component(&mut out, job_hash);
    Ok(out)
}

/// Decode bytes produced by [`encode_index`]
pub fn decode_index(bytes: &[u8]) -> Result<(String, String)> {
    let (job_hash, rest) = read_component(bytes, "ingest-job-hash")?;
    let (job_range, rest) = read_component(rest, "ingest-job-range")?;

    if !rest.is_empty() {
        return Err(VkvError::Encoding(format!(
            "index key: {} trailing bytes",
            rest.len()
        )));
    }

    Ok((job_hash, job_range))
}

/// Interpret raw bytes as a UTF-8 key component
pub fn utf8_component<'a>(name: &str, bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|e| VkvError::Encoding(format!("{} is not valid UTF-8: {}", name, e)))
}

// =============================================================================
// Private Helpers
// =============================================================================

fn check_component(name: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(VkvError::Encoding(format!("{} must not be empty", name)));
    }
    if value.len() > max_len {
        return Err(VkvError::Encoding(format!(
            "{} is {} bytes (max {})",
            name,
            value.len(),
            max_len
        )));
    }
    Ok(())
}

fn write_component(out: &mut Vec<u8>, value: &str) {
    for &b in value.as_bytes() {
        out.push(b);
        if b == 0 {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(0);
    out.push(TERMINATOR);
}

/// Read one escaped component; returns it and the remaining bytes
fn read_component<'a>(bytes: &'a [u8], name: &str) -> Result<(String, &'a [u8])> {
    let mut raw = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != 0 {
            raw.push(b);
            i += 1;
            continue;
        }

        match bytes.get(i + 1) {
            Some(&ESCAPED_ZERO) => {
                raw.push(0);
                i += 2;
            }
            Some(&TERMINATOR) => {
                let value = utf8_component(name, &raw)?.to_string();
                return Ok((value, &bytes[i + 2..]));
            }
            Some(other) => {
                return Err(VkvError::Encoding(format!(
                    "{}: invalid escape 0x00 0x{:02x} at offset {}",
                    name, other, i
                )));
            }
            None => break,
        }
    }

    Err(VkvError::Encoding(format!("{}: missing terminator", name)))
}
