//! Append-Only Log Writer and Replay
//!
//! ## File format
//!
//! One record per line, plain text:
//!
//! ```text
//! <unix_seconds> <COMMAND> [arg ...]\n
//! ```
//!
//! Records are appended in the order commands commit against the keyspace.
//! There are no checksums; a record is immutable once written.
//!
//! ## Durability
//!
//! The writer pushes each record through the OS write syscall but does not
//! fsync by default, so persistence is crash-tolerant only to the extent the
//! OS flushes its page cache. `fsync_every_write` opts into `sync_data`
//! after each record for stronger guarantees at a throughput cost.
//!
//! ## Replay
//!
//! [`replay`] scans the log line by line and applies each record's replay
//! effect through the command registry. Malformed lines, unknown commands
//! and failed effects are warned about and skipped; replay always continues
//! with the next line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::commands::CommandRegistry;
use crate::storage::Keyspace;

/// Errors opening, appending to, or reading the append-only log.
#[derive(Debug, thiserror::Error)]
pub enum AolError {
    #[error("failed to open append-only log: {0}")]
    Open(#[source] std::io::Error),

    #[error("failed to append to log: {0}")]
    Append(#[source] std::io::Error),

    #[error("failed to read log: {0}")]
    Read(#[source] std::io::Error),
}

/// Single-writer handle to the append-only log.
///
/// Appends are serialized by an internal mutex, independent of the keyspace
/// locks; the timestamp is taken while the mutex is held so records land in
/// append order.
#[derive(Debug)]
pub struct AolWriter {
    file: Mutex<File>,
    fsync_every_write: bool,
}

impl AolWriter {
    /// Opens `path` in append/create mode.
    pub fn open(path: impl AsRef<Path>, fsync_every_write: bool) -> Result<Self, AolError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(AolError::Open)?;
        Ok(Self {
            file: Mutex::new(file),
            fsync_every_write,
        })
    }

    /// Appends one record, prefixed with the current Unix time in seconds.
    pub fn append(&self, record: &str) -> Result<(), AolError> {
        let mut file = self.file.lock().unwrap();
        let timestamp = unix_seconds();
        file.write_all(format!("{timestamp} {record}\n").as_bytes())
            .map_err(AolError::Append)?;
        if self.fsync_every_write {
            file.sync_data().map_err(AolError::Append)?;
        }
        Ok(())
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Replays the log at `path` into `keyspace`, record by record.
///
/// Each line is split on whitespace; the first field must be a decimal Unix
/// timestamp, the second names the command (case-insensitive), the rest are
/// its arguments. Anomalies are logged and skipped. Returns the number of
/// records applied.
pub fn replay(
    path: impl AsRef<Path>,
    registry: &CommandRegistry,
    keyspace: &Keyspace,
) -> Result<usize, AolError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(AolError::Open)?;
    let reader = BufReader::new(file);

    let mut applied = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(AolError::Read)?;
        let line_no = index + 1;

        let mut fields = line.split_whitespace();
        let (Some(timestamp), Some(name)) = (fields.next(), fields.next()) else {
            warn!(line = line_no, "skipping record with fewer than two fields");
            continue;
        };
        if timestamp.parse::<i64>().is_err() {
            warn!(line = line_no, timestamp, "skipping record with non-numeric timestamp");
            continue;
        }

        let name = name.to_ascii_uppercase();
        let args: Vec<&str> = fields.collect();
        match registry.get(&name) {
            Some(command) => match command.replay(&args, keyspace) {
                Ok(()) => applied += 1,
                Err(e) => warn!(line = line_no, command = %name, error = %e, "replay effect failed"),
            },
            None => warn!(line = line_no, command = %name, "unknown command in log"),
        }
    }

    info!(applied, path = %path.display(), "append-only log replayed");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;

    use crate::commands::{CommandContext, CommandRegistry};

    fn registry(keyspace: &Arc<Keyspace>) -> CommandRegistry {
        CommandRegistry::new(Arc::new(CommandContext {
            keyspace: Arc::clone(keyspace),
            aol: None,
            password: String::new(),
            benchmark_key_prefix: String::new(),
        }))
    }

    #[test]
    fn append_frames_records_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aol");

        let writer = AolWriter::open(&path, false).unwrap();
        writer.append("SET a 1").unwrap();
        writer.append("DEL a").unwrap();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for (line, rest) in lines.iter().zip(["SET a 1", "DEL a"]) {
            let (ts, record) = line.split_once(' ').unwrap();
            assert!(ts.parse::<i64>().unwrap() > 0);
            assert_eq!(record, rest);
        }
    }

    #[test]
    fn append_reopens_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aol");

        AolWriter::open(&path, false).unwrap().append("SET a 1").unwrap();
        AolWriter::open(&path, false).unwrap().append("SET b 2").unwrap();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn replay_rebuilds_the_keyspace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aol");

        let writer = AolWriter::open(&path, false).unwrap();
        writer.append("SET a 1").unwrap();
        writer.append("SET b 2 EX 60").unwrap();
        writer.append("SET gone bye").unwrap();
        writer.append("DEL gone").unwrap();
        writer.append("INCR hits").unwrap();
        writer.append("INCR hits").unwrap();
        writer.append("DECR hits").unwrap();

        let keyspace = Arc::new(Keyspace::new());
        let registry = registry(&keyspace);
        let applied = replay(&path, &registry, &keyspace).unwrap();

        assert_eq!(applied, 7);
        assert_eq!(keyspace.get("a"), Some("1".to_string()));
        assert_eq!(keyspace.get("b"), Some("2".to_string()));
        let ttl = keyspace.ttl("b");
        assert!((0..=60).contains(&ttl), "ttl was {ttl}");
        assert_eq!(keyspace.get("gone"), None);
        assert_eq!(keyspace.get("hits"), Some("1".to_string()));
    }

    #[test]
    fn replay_skips_anomalies_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aol");

        let mut file = File::create(&path).unwrap();
        writeln!(file, "1700000000 SET a 1").unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, "not-a-timestamp SET b 2").unwrap();
        writeln!(file, "1700000001 WOBBLE x").unwrap();
        writeln!(file, "1700000002 SET c 3 EX nope").unwrap();
        writeln!(file, "1700000003 set d 4").unwrap();

        let keyspace = Arc::new(Keyspace::new());
        let registry = registry(&keyspace);
        let applied = replay(&path, &registry, &keyspace).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(keyspace.get("a"), Some("1".to_string()));
        assert_eq!(keyspace.get("b"), None);
        assert_eq!(keyspace.get("c"), None);
        // Command names replay case-insensitively.
        assert_eq!(keyspace.get("d"), Some("4".to_string()));
    }

    #[test]
    fn replay_of_read_commands_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aol");

        let mut file = File::create(&path).unwrap();
        writeln!(file, "1700000000 GET a").unwrap();
        writeln!(file, "1700000001 PING").unwrap();
        writeln!(file, "1700000002 AUTH hunter2").unwrap();

        let keyspace = Arc::new(Keyspace::new());
        let registry = registry(&keyspace);
        replay(&path, &registry, &keyspace).unwrap();

        assert!(keyspace.is_empty());
    }
}
