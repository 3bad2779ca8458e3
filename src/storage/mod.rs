//! In-Memory Keyspace with TTL Support
//!
//! The storage layer has two halves:
//!
//! - [`keyspace`]: a thread-safe, sharded map from string keys to string
//!   values with an optional expiration instant per key. Expired entries are
//!   treated as absent by every read path (lazy expiry).
//! - [`sweeper`]: a background task that reclaims expired entries once per
//!   second, so memory is released even for keys nobody reads again.
//!
//! Correctness never depends on the sweeper running; the lazy checks in the
//! keyspace cover the gap between expiry and reclamation.

pub mod keyspace;
pub mod sweeper;

pub use keyspace::{Keyspace, NotAnInteger};
pub use sweeper::Sweeper;
