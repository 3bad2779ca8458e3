//! The Twelve Command Handlers
//!
//! One struct per command, each holding the shared [`CommandContext`].
//! Mutating commands append their record to the append-only log *after* the
//! keyspace mutation has been applied and *before* the reply is returned,
//! so a replayed log reconstructs a superset of every success a client
//! observed.

use std::sync::Arc;
use std::time::Duration;

use crate::commands::{Command, CommandContext, CommandInfo, Reply, ReplayError, Session};
use crate::storage::Keyspace;

/// Sentinel substituted for `\n` in multi-line replies; clients translate
/// it back on receipt.
const LINE_BREAK: &str = "<br>";

/// How many keys `KEYS` will list before truncating.
const KEYS_DISPLAY_LIMIT: usize = 20;

/// Instantiates every command, in the order `HELP` lists them.
pub fn all_commands(ctx: Arc<CommandContext>) -> Vec<Box<dyn Command>> {
    vec![
        Box::new(Auth { ctx: Arc::clone(&ctx) }),
        Box::new(Ping),
        Box::new(Set { ctx: Arc::clone(&ctx) }),
        Box::new(Get { ctx: Arc::clone(&ctx) }),
        Box::new(Del { ctx: Arc::clone(&ctx) }),
        Box::new(Expire { ctx: Arc::clone(&ctx) }),
        Box::new(Ttl { ctx: Arc::clone(&ctx) }),
        Box::new(FlushDb { ctx: Arc::clone(&ctx) }),
        Box::new(Keys { ctx: Arc::clone(&ctx) }),
        Box::new(Incr { ctx: Arc::clone(&ctx) }),
        Box::new(Decr { ctx: Arc::clone(&ctx) }),
        Box::new(Help { ctx }),
    ]
}

/// Parses a TTL argument: a positive number of whole seconds.
fn parse_ttl(arg: &str) -> Option<Duration> {
    match arg.parse::<i64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
        _ => None,
    }
}

struct Auth {
    ctx: Arc<CommandContext>,
}

impl Command for Auth {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "AUTH",
            title: "Authenticate",
            syntax: "AUTH <password>",
            summary: "Authenticate with the server",
        }
    }

    fn execute(&self, session: &mut Session, args: &[&str]) -> Reply {
        if args.len() != 1 {
            return Reply::error("missing password");
        }
        if args[0] == self.ctx.password {
            session.authenticated = true;
            Reply::ok()
        } else {
            Reply::error("invalid password")
        }
    }

    fn replay(&self, _args: &[&str], _keyspace: &Keyspace) -> Result<(), ReplayError> {
        Ok(()) // session-scoped
    }
}

struct Ping;

impl Command for Ping {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "PING",
            title: "Ping",
            syntax: "PING",
            summary: "Check if the server is alive",
        }
    }

    fn execute(&self, _session: &mut Session, _args: &[&str]) -> Reply {
        Reply::line("PONG")
    }

    fn replay(&self, _args: &[&str], _keyspace: &Keyspace) -> Result<(), ReplayError> {
        Ok(())
    }
}

struct Set {
    ctx: Arc<CommandContext>,
}

impl Command for Set {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "SET",
            title: "Set",
            syntax: "SET <key> <value> [EX <seconds>]",
            summary: "Set a key with a value and an optional expiration",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.len() < 2 {
            return Reply::error("wrong number of arguments for 'SET' command");
        }
        let (key, value) = (args[0], args[1]);
        if args.len() == 4 && args[2] == "EX" {
            let Some(ttl) = parse_ttl(args[3]) else {
                return Reply::error("invalid TTL");
            };
            self.ctx.keyspace.set_with_ttl(key, value, ttl);
            self.ctx
                .persist(key, &format!("SET {key} {value} EX {}", args[3]));
            Reply::ok()
        } else if args.len() == 2 {
            self.ctx.keyspace.set(key, value);
            self.ctx.persist(key, &format!("SET {key} {value}"));
            Reply::ok()
        } else {
            Reply::error("invalid arguments for 'SET' command")
        }
    }

    fn replay(&self, args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError> {
        if args.len() == 2 {
            keyspace.set(args[0], args[1]);
            Ok(())
        } else if args.len() == 4 && args[2] == "EX" {
            let ttl = parse_ttl(args[3]).ok_or(ReplayError::InvalidTtl)?;
            keyspace.set_with_ttl(args[0], args[1], ttl);
            Ok(())
        } else {
            Err(ReplayError::InvalidArguments("SET"))
        }
    }
}

struct Get {
    ctx: Arc<CommandContext>,
}

impl Command for Get {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "GET",
            title: "Get",
            syntax: "GET <key>",
            summary: "Get the value of a key",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.len() != 1 {
            return Reply::error("wrong number of arguments for 'GET' command");
        }
        match self.ctx.keyspace.get(args[0]) {
            Some(value) => Reply::line(value),
            None => Reply::nil(),
        }
    }

    fn replay(&self, _args: &[&str], _keyspace: &Keyspace) -> Result<(), ReplayError> {
        Ok(()) // read-only
    }
}

struct Del {
    ctx: Arc<CommandContext>,
}

impl Command for Del {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "DEL",
            title: "Delete",
            syntax: "DEL <key>",
            summary: "Delete a key",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.len() != 1 {
            return Reply::error("wrong number of arguments for 'DEL' command");
        }
        let key = args[0];
        if self.ctx.keyspace.del(key) {
            self.ctx.persist(key, &format!("DEL {key}"));
            Reply::ok()
        } else {
            Reply::nil()
        }
    }

    fn replay(&self, args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError> {
        if args.len() != 1 {
            return Err(ReplayError::InvalidArguments("DEL"));
        }
        keyspace.del(args[0]);
        Ok(())
    }
}

struct Expire {
    ctx: Arc<CommandContext>,
}

impl Command for Expire {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "EXPIRE",
            title: "Expire",
            syntax: "EXPIRE <key> <seconds>",
            summary: "Set a key's time to live in seconds",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.len() != 2 {
            return Reply::error("wrong number of arguments for 'EXPIRE' command");
        }
        let key = args[0];
        let Some(ttl) = parse_ttl(args[1]) else {
            return Reply::error("invalid TTL");
        };
        if self.ctx.keyspace.set_expire(key, ttl) {
            self.ctx.persist(key, &format!("EXPIRE {key} {}", args[1]));
            Reply::ok()
        } else {
            Reply::error("key does not exist")
        }
    }

    fn replay(&self, args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError> {
        if args.len() != 2 {
            return Err(ReplayError::InvalidArguments("EXPIRE"));
        }
        let ttl = parse_ttl(args[1]).ok_or(ReplayError::InvalidTtl)?;
        // Applied as if issued now; the sweeper reclaims anything stale.
        keyspace.set_expire(args[0], ttl);
        Ok(())
    }
}

struct Ttl {
    ctx: Arc<CommandContext>,
}

impl Command for Ttl {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "TTL",
            title: "Time to Live",
            syntax: "TTL <key>",
            summary: "Get the time to live of a key",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.len() != 1 {
            return Reply::error("wrong number of arguments for 'TTL' command");
        }
        match self.ctx.keyspace.ttl(args[0]) {
            -2 => Reply::line("-2"),
            -1 => Reply::line("-1"),
            secs => Reply::line(format!("{secs}s")),
        }
    }

    fn replay(&self, _args: &[&str], _keyspace: &Keyspace) -> Result<(), ReplayError> {
        Ok(()) // read-only
    }
}

struct FlushDb {
    ctx: Arc<CommandContext>,
}

impl Command for FlushDb {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "FLUSHDB",
            title: "Flush Database",
            syntax: "FLUSHDB",
            summary: "Remove all keys from the database",
        }
    }

    fn execute(&self, _session: &mut Session, _args: &[&str]) -> Reply {
        self.ctx.keyspace.flush();
        self.ctx.persist_always("FLUSHDB");
        Reply::ok()
    }

    fn replay(&self, _args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError> {
        keyspace.flush();
        Ok(())
    }
}

struct Keys {
    ctx: Arc<CommandContext>,
}

impl Command for Keys {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "KEYS",
            title: "Keys",
            syntax: "KEYS <pattern>",
            summary: "Find all keys matching the given pattern",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.is_empty() {
            return Reply::error("missing pattern");
        }
        let mut keys = self.ctx.keyspace.keys(args[0]);
        if keys.len() > KEYS_DISPLAY_LIMIT {
            keys.truncate(KEYS_DISPLAY_LIMIT);
            return Reply::with_warning(
                format!(
                    "WARNING: More than {KEYS_DISPLAY_LIMIT} keys detected, \
                     displaying first {KEYS_DISPLAY_LIMIT} keys only."
                ),
                keys.join(", "),
            );
        }
        Reply::line(keys.join(", "))
    }

    fn replay(&self, _args: &[&str], _keyspace: &Keyspace) -> Result<(), ReplayError> {
        Ok(()) // read-only
    }
}

struct Incr {
    ctx: Arc<CommandContext>,
}

impl Command for Incr {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "INCR",
            title: "Increment",
            syntax: "INCR <key>",
            summary: "Increment the integer value of a key by one",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.is_empty() {
            return Reply::error("missing key");
        }
        let key = args[0];
        match self.ctx.keyspace.incr(key) {
            Ok(value) => {
                self.ctx.persist(key, &format!("INCR {key}"));
                Reply::line(value.to_string())
            }
            Err(e) => Reply::error(e.to_string()),
        }
    }

    fn replay(&self, args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError> {
        if args.len() != 1 {
            return Err(ReplayError::InvalidArguments("INCR"));
        }
        keyspace.incr(args[0])?;
        Ok(())
    }
}

struct Decr {
    ctx: Arc<CommandContext>,
}

impl Command for Decr {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "DECR",
            title: "Decrement",
            syntax: "DECR <key>",
            summary: "Decrement the integer value of a key by one",
        }
    }

    fn execute(&self, _session: &mut Session, args: &[&str]) -> Reply {
        if args.is_empty() {
            return Reply::error("missing key");
        }
        let key = args[0];
        match self.ctx.keyspace.decr(key) {
            Ok(value) => {
                self.ctx.persist(key, &format!("DECR {key}"));
                Reply::line(value.to_string())
            }
            Err(e) => Reply::error(e.to_string()),
        }
    }

    fn replay(&self, args: &[&str], keyspace: &Keyspace) -> Result<(), ReplayError> {
        if args.len() != 1 {
            return Err(ReplayError::InvalidArguments("DECR"));
        }
        keyspace.decr(args[0])?;
        Ok(())
    }
}

struct Help {
    ctx: Arc<CommandContext>,
}

impl Command for Help {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "HELP",
            title: "Help",
            syntax: "HELP",
            summary: "Show this help message",
        }
    }

    fn execute(&self, _session: &mut Session, _args: &[&str]) -> Reply {
        let infos: Vec<CommandInfo> = all_commands(Arc::clone(&self.ctx))
            .iter()
            .map(|command| command.info())
            .collect();
        Reply::line(render_table(&infos).replace('\n', LINE_BREAK))
    }

    fn replay(&self, _args: &[&str], _keyspace: &Keyspace) -> Result<(), ReplayError> {
        Ok(())
    }
}

/// Renders the bordered three-column help table.
fn render_table(infos: &[CommandInfo]) -> String {
    let headers = ["NAME", "SYNTAX", "DESCRIPTION"];
    let mut widths = headers.map(str::len);
    for info in infos {
        widths[0] = widths[0].max(info.title.len());
        widths[1] = widths[1].max(info.syntax.len());
        widths[2] = widths[2].max(info.summary.len());
    }

    let border = {
        let segments: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("+{}+", segments.join("+"))
    };
    let row = |cells: [&str; 3]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!(" {cell:<w$} "))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut table = String::new();
    table.push_str(&border);
    table.push('\n');
    table.push_str(&row(headers));
    table.push('\n');
    table.push_str(&border);
    table.push('\n');
    for info in infos {
        table.push_str(&row([info.title, info.syntax, info.summary]));
        table.push('\n');
        table.push_str(&border);
        table.push('\n');
    }
    table
}
