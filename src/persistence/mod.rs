//! Append-Only Persistence
//!
//! Every mutating command can be captured as one line in an append-only log
//! (AOL) and replayed on startup to rebuild the keyspace. The log is a
//! recovery mechanism, not a storage index: reads never touch it.

pub mod aol;

pub use aol::{replay, AolError, AolWriter};
