//! Engine test suite
//!
//! Exercises the public engine surface end to end: versioning, the job index,
//! admission control and restart.

mod ingest_tests;
