//! WAL test suite
//!
//! One binary covering framing, appends and crash recovery.

mod recovery_tests;
