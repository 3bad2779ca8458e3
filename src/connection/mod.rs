//! Per-Connection Worker
//!
//! Every accepted client gets its own task running a
//! [`ConnectionHandler`]: TLS handshake, then a loop of
//! rate-limit gate → read one line → dispatch → write reply.
//!
//! The worker owns all per-connection state (the buffered stream, the
//! session's `authenticated` flag, the rate-limit interval), so closing the
//! connection cleans everything up without touching shared maps.

pub mod handler;

pub use handler::{ConnectionError, ConnectionHandler};
