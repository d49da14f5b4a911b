//! Key Codec Module
//!
//! Order-preserving byte encodings for the two composite keys.
//!
//! ## Primary Key
//! ```text
//! ┌──────────────────────────────┬────────────┬──────────────────────┐
//! │ object-key (escaped UTF-8)   │ 0x00 0x01  │ version-node (u64 BE)│
//! └──────────────────────────────┴────────────┴──────────────────────┘
//! ```
//!
//! ## Index Key
//! ```text
//! ┌────────────────────────┬───────────┬─────────────────────────┬───────────┐
//! │ ingest-job-hash (esc.) │ 0x00 0x01 │ ingest-job-range (esc.) │ 0x00 0x01 │
//! └────────────────────────┴───────────┴─────────────────────────┴───────────┘
//! ```
//!
//! A zero byte inside a string component is written as `0x00 0xFF`, so the
//! `0x00 0x01` terminator sorts below every continuation. Byte order of the
//! encoded keys therefore equals (component, component) order, and all
//! versions of one object-key sit contiguously under its prefix.

mod key;

pub use key::{
    checked_next_version, decode_index, decode_primary, encode_index, encode_primary,
    index_prefix, primary_prefix, utf8_component, MAX_HASH_KEY_LEN, MAX_RANGE_KEY_LEN,
};
