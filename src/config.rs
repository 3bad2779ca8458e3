//! Configuration
//!
//! Settings load from a TOML file with `[server]` and `[log]` tables.
//! Every field has a default, so a partial (or empty) file is valid. The
//! loaded config is immutable after startup.
//!
//! ```toml
//! [server]
//! address = "127.0.0.1:7379"
//! tls_cert = "server-cert.pem"
//! tls_key = "server-key.pem"
//! auth_enabled = true
//! password = "s3cret"
//! persistent_aof_path = "emberkv.aol"   # empty disables persistence
//! replay_aof_on_startup = true
//! max_connections = 100                 # 0 = unlimited
//! rate_limit = 50                       # commands/sec per connection, 0 = unlimited
//! benchmark_key_prefix = ""             # keys with this prefix skip the log
//! aof_fsync_every_write = false
//!
//! [log]
//! file = "emberkv.log"                  # empty = stderr only
//! debug = false
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::DEFAULT_ADDRESS;

/// Root configuration: `[server]` and `[log]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Server settings, immutable after startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// `host:port` to bind the TLS listener on.
    pub address: String,
    /// PEM certificate chain presented to clients.
    pub tls_cert: PathBuf,
    /// PEM private key for the certificate.
    pub tls_key: PathBuf,
    /// Whether clients must `AUTH` before other commands.
    pub auth_enabled: bool,
    /// Shared secret for `AUTH`; meaningful only when auth is enabled.
    pub password: String,
    /// Append-only log path; empty disables persistence.
    pub persistent_aof_path: String,
    /// Whether to rebuild the keyspace from the log before accepting.
    pub replay_aof_on_startup: bool,
    /// Concurrent connection cap; `0` means unlimited.
    pub max_connections: usize,
    /// Per-connection command rate in commands/second; `0` means unlimited.
    pub rate_limit: u32,
    /// Keys starting with this prefix skip the append-only log; empty
    /// disables the filter.
    pub benchmark_key_prefix: String,
    /// Fsync the log after every record instead of trusting the OS page
    /// cache.
    pub aof_fsync_every_write: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            tls_cert: PathBuf::from("server-cert.pem"),
            tls_key: PathBuf::from("server-key.pem"),
            auth_enabled: false,
            password: String::new(),
            persistent_aof_path: String::new(),
            replay_aof_on_startup: true,
            max_connections: 0,
            rate_limit: 0,
            benchmark_key_prefix: String::new(),
            aof_fsync_every_write: false,
        }
    }
}

/// Logging sink and verbosity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Log file path; empty logs to stderr only.
    pub file: String,
    /// Enables debug-level logging.
    pub debug: bool,
}

impl Config {
    /// Loads configuration from a TOML file. Callers are expected to
    /// [`validate`](Self::validate) the result and surface the warnings.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Rejects configurations the server cannot run with and returns
    /// warnings for the ones it can but probably should not.
    pub fn validate(&self) -> Result<Vec<String>> {
        let server = &self.server;

        if server.address.is_empty() {
            bail!("server.address cannot be empty");
        }
        let (_, port) = server
            .address
            .rsplit_once(':')
            .context("server.address must be host:port")?;
        port.parse::<u16>()
            .with_context(|| format!("invalid port in server.address: {port:?}"))?;

        if server.auth_enabled && server.password.is_empty() {
            bail!("server.auth_enabled requires a non-empty server.password");
        }

        let mut warnings = Vec::new();
        if server.persistent_aof_path.is_empty() {
            warnings.push(
                "persistence is disabled because server.persistent_aof_path is empty".to_string(),
            );
        } else if !server.replay_aof_on_startup {
            warnings.push(
                "the append-only log is written but will not be replayed on startup".to_string(),
            );
        }
        if !server.auth_enabled && !server.password.is_empty() {
            warnings.push("server.password is set but server.auth_enabled is false".to_string());
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.address, DEFAULT_ADDRESS);
        assert!(!config.server.auth_enabled);
        assert!(config.server.replay_aof_on_startup);
        assert_eq!(config.server.max_connections, 0);
        assert!(config.log.file.is_empty());
    }

    #[test]
    fn full_file_parses() {
        let config: Config = toml::from_str(
            r#"
            [server]
            address = "0.0.0.0:6400"
            tls_cert = "cert.pem"
            tls_key = "key.pem"
            auth_enabled = true
            password = "s3cret"
            persistent_aof_path = "data.aol"
            replay_aof_on_startup = false
            max_connections = 10
            rate_limit = 100
            benchmark_key_prefix = "emberkv-benchmark:"
            aof_fsync_every_write = true

            [log]
            file = "emberkv.log"
            debug = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.address, "0.0.0.0:6400");
        assert!(config.server.auth_enabled);
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.rate_limit, 100);
        assert!(config.server.aof_fsync_every_write);
        assert!(config.log.debug);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[server]\nshards = 4\n");
        assert!(result.is_err());
    }

    #[test]
    fn auth_without_password_is_invalid() {
        let config: Config = toml::from_str("[server]\nauth_enabled = true\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_address_is_invalid() {
        let config: Config = toml::from_str("[server]\naddress = \"nonsense\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[server]\naddress = \"host:notaport\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_persistence_warns() {
        let config = Config::default();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("persistence is disabled")));
    }
}
