//! Command Registry and Executor
//!
//! Every command the server understands is one implementation of the
//! [`Command`] trait, with three facets:
//!
//! - `info()` describes the command for the `HELP` table;
//! - `execute()` runs the interactive effect against the keyspace, returning
//!   the reply lines and appending to the append-only log where the command
//!   mutates state;
//! - `replay()` runs the recovery effect used when the log is replayed on
//!   startup. Read-only and session-scoped commands replay as no-ops.
//!
//! The [`CommandRegistry`] maps uppercase command names to handlers and
//! preserves registration order so `HELP` lists commands stably.
//!
//! ## Reply contract
//!
//! A reply is one or more text lines, each written to the client with a
//! trailing `\n`. Almost every command replies with a single line; `KEYS`
//! prefixes a warning line when it truncates. Error lines start with `ERR `.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use crate::persistence::AolWriter;
use crate::storage::{Keyspace, NotAnInteger};

/// Static description of one command, rendered by `HELP`.
#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    /// Uppercase wire name, also the registry key.
    pub name: &'static str,
    /// Human-readable name.
    pub title: &'static str,
    /// Invocation syntax.
    pub syntax: &'static str,
    /// One-line description.
    pub summary: &'static str,
}

/// Reply lines produced by executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
}

impl Reply {
    /// A single-line reply.
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
        }
    }

    /// An `ERR `-prefixed client error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::line(format!("ERR {}", message.into()))
    }

    /// The literal `OK`.
    pub fn ok() -> Self {
        Self::line("OK")
    }

    /// The literal `nil`, signaling absence of data.
    pub fn nil() -> Self {
        Self::line("nil")
    }

    /// A reply preceded by a separate warning line.
    pub fn with_warning(warning: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            lines: vec![warning.into(), body.into()],
        }
    }

    /// The lines to write, in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether this reply reports a client error.
    pub fn is_error(&self) -> bool {
        self.lines
            .first()
            .is_some_and(|line| line.starts_with("ERR "))
    }
}

/// Per-connection session state.
///
/// Lives inside the connection worker; it is never shared between
/// connections and dies with the worker.
#[derive(Debug, Default)]
pub struct Session {
    /// Whether this connection has passed `AUTH`. Only consulted when
    /// authentication is enabled.
    pub authenticated: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

/// State shared by every command handler.
pub struct CommandContext {
    pub keyspace: Arc<Keyspace>,
    /// `None` disables persistence.
    pub aol: Option<Arc<AolWriter>>,
    /// Shared secret checked by `AUTH`.
    pub password: String,
    /// Keys starting with this prefix skip the append-only log. Empty
    /// disables the filter.
    pub benchmark_key_prefix: String,
}

impl CommandContext {
    /// Appends a mutation record for `key`, unless the key is excluded by
    /// the benchmark prefix. Append failures are logged, not surfaced: the
    /// mutation has already been applied.
    fn persist(&self, key: &str, record: &str) {
        if !self.benchmark_key_prefix.is_empty() && key.starts_with(&self.benchmark_key_prefix) {
            return;
        }
        self.persist_always(record);
    }

    /// Appends a mutation record unconditionally (used by `FLUSHDB`).
    fn persist_always(&self, record: &str) {
        if let Some(aol) = &self.aol {
            if let Err(e) = aol.append(record) {
                error!(error = %e, "failed to append to the append-only log");
            }
        }
    }
}

/// Error from a command's replay effect. Replay logs these and continues.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("invalid arguments for '{0}'")]
    InvalidArguments(&'static str),

    #[error("invalid TTL value")]
    InvalidTtl,

    #[error(transparent)]
    Counter(#[from] NotAnInteger),
}

/// One server command: description, interactive effect, recovery effect.
pub trait Command: Send + Sync {
    fn info(&self) -> CommandInfo;

    /// Executes the command for a connected client. `args` excludes the
    /// command name itself.
    fn execute(&self, session: &mut Session, args: &[&str]) -> Reply;

    /// Applies the command's recovery effect during log replay.
    fn replay(&self, args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError>;
}

/// Registry of all commands, keyed by uppercase name.
pub struct CommandRegistry {
    commands: Vec<Box<dyn Command>>,
    index: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    /// Builds the registry with every command registered.
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        let commands = handlers::all_commands(ctx);
        let index = commands
            .iter()
            .enumerate()
            .map(|(i, command)| (command.info().name, i))
            .collect();
        Self { commands, index }
    }

    /// Looks up a command by its uppercase name.
    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.index.get(name).map(|&i| self.commands[i].as_ref())
    }

    /// Command descriptions in registration order.
    pub fn descriptions(&self) -> Vec<CommandInfo> {
        self.commands.iter().map(|command| command.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CommandRegistry {
        CommandRegistry::new(Arc::new(CommandContext {
            keyspace: Arc::new(Keyspace::new()),
            aol: None,
            password: "hunter2".to_string(),
            benchmark_key_prefix: String::new(),
        }))
    }

    #[test]
    fn registry_holds_all_twelve_commands() {
        let registry = registry();
        let names: Vec<&str> = registry.descriptions().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            [
                "AUTH", "PING", "SET", "GET", "DEL", "EXPIRE", "TTL", "FLUSHDB", "KEYS", "INCR",
                "DECR", "HELP"
            ]
        );
    }

    #[test]
    fn lookup_is_exact_uppercase() {
        let registry = registry();
        assert!(registry.get("SET").is_some());
        assert!(registry.get("set").is_none());
        assert!(registry.get("AUTHENTICATE").is_none());
    }

    #[test]
    fn reply_classification() {
        assert!(Reply::error("unknown command").is_error());
        assert!(!Reply::ok().is_error());
        assert!(!Reply::nil().is_error());
        assert_eq!(Reply::error("missing key").lines(), ["ERR missing key"]);
    }
}
