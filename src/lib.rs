//! # emberkv - An In-Memory Key-Value Database Server
//!
//! emberkv is a Redis-inspired, in-memory key-value database reachable over a
//! TLS-encrypted, line-oriented text protocol. It stores short string values
//! under string keys, supports per-key time-to-live, offers atomic integer
//! counters, and can persist every mutating command to an append-only log
//! (AOL) that is replayed on startup to rebuild the keyspace.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              emberkv                                 │
//! │                                                                      │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────┐         │
//! │  │ TLS Server  │───>│  Connection  │───>│ Command Registry │         │
//! │  │ (accept +   │    │  worker      │    │ (AUTH, SET, GET, │         │
//! │  │  admission) │    │  (per-client)│    │  INCR, KEYS, …)  │         │
//! │  └─────────────┘    └──────────────┘    └────────┬─────────┘         │
//! │                                                  │                   │
//! │                                   ┌──────────────┴──────────────┐    │
//! │                                   ▼                             ▼    │
//! │                          ┌─────────────────┐          ┌────────────┐ │
//! │                          │    Keyspace     │          │ AOL writer │ │
//! │                          │ (sharded, TTL)  │          │ (replayed  │ │
//! │                          └────────▲────────┘          │ on startup)│ │
//! │                                   │                   └────────────┘ │
//! │                          ┌────────┴────────┐                         │
//! │                          │     Sweeper     │                         │
//! │                          │  (1s reclaim)   │                         │
//! │                          └─────────────────┘                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire protocol
//!
//! All framing is text: one newline-terminated request per command, one
//! newline-terminated reply per request. Error replies start with `ERR `,
//! absence is the literal `nil`, and multi-line replies (`HELP`) substitute
//! the sentinel `<br>` for embedded newlines.
//!
//! ## Supported commands
//!
//! - `AUTH <password>` - authenticate when auth is enabled
//! - `PING` - liveness check
//! - `SET <key> <value> [EX <seconds>]` - store a value, optionally with TTL
//! - `GET <key>` - fetch a value or `nil`
//! - `DEL <key>` - remove a key
//! - `EXPIRE <key> <seconds>` - set a TTL on an existing key
//! - `TTL <key>` - remaining lifetime (`-2` absent, `-1` no expiry, `<n>s`)
//! - `FLUSHDB` - clear the keyspace
//! - `KEYS <pattern>` - glob-match live keys (truncated past 20 matches)
//! - `INCR <key>` / `DECR <key>` - atomic counter step
//! - `HELP` - command table
//!
//! ## Module Overview
//!
//! - [`storage`]: sharded keyspace with lazy expiry plus the background sweeper
//! - [`persistence`]: append-only log writer and startup replay
//! - [`commands`]: command trait, the twelve handlers, and the registry
//! - [`connection`]: per-client worker (handshake, framing, rate limit, auth)
//! - [`server`]: TLS listener, admission control, graceful shutdown
//! - [`config`]: TOML configuration
//! - [`tls`]: PEM certificate/key loading

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod server;
pub mod storage;
pub mod tls;

// Re-export the types most callers need
pub use commands::{CommandRegistry, Reply, Session};
pub use config::Config;
pub use persistence::AolWriter;
pub use server::Server;
pub use storage::{Keyspace, Sweeper};

/// The default address the server binds to.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7379";

/// Version of emberkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
