//! Layered configuration for the command executor.
//!
//! Configuration is resolved once, before the stream loop starts, from
//! (highest precedence first): CLI flags, environment variables, an
//! optional TOML config file, and built-in defaults. A bad configuration
//! is a fatal startup error ([`ExecutorError::Config`]); nothing about
//! per-item dispatch depends on this module beyond reading the resolved
//! values.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::errors::{ExecutorError, ExecutorResult};

/// Command-line surface. Deliberately thin: every field here either
/// overrides one `Config` value or toggles a startup-only behavior.
/// No business logic is reachable from here alone.
#[derive(Parser, Debug)]
#[command(name = "gridexec")]
#[command(about = "Streaming JSON command executor for a remote data-grid storage service")]
pub struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Parse and validate envelopes without opening a backend connection.
    #[arg(long)]
    pub dry_run: bool,

    /// Override for `max_connect_time` (seconds, 0 disables recycling).
    #[arg(long)]
    pub max_connect_time: Option<u64>,

    /// Override for `buffer_size` (bytes).
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Override for `zone_name`.
    #[arg(long)]
    pub zone: Option<String>,

    /// Override for the backend's base URL.
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Process-wide default: every `get` behaves as if `PRINT_RAW` were
    /// set, unless per-envelope `arguments` are also consulted.
    #[arg(long)]
    pub raw: bool,
}

/// On-disk representation of the optional config file; every field is
/// optional so a file only needs to mention what it overrides.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    max_connect_time: Option<u64>,
    buffer_size: Option<usize>,
    zone_name: Option<String>,
    backend_url: Option<String>,
    flush: Option<bool>,
    log_level: Option<String>,
}

/// Resolved configuration used by the rest of the executor.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a connection may stay open before the stream loop forces
    /// a reconnect. Zero disables recycling entirely.
    pub max_connect_time: Duration,
    /// Upper bound on in-memory buffering for `get`/`put` transfers.
    pub buffer_size: usize,
    /// Default zone qualifier applied to catalog queries, if any.
    pub zone_name: Option<String>,
    /// Base URL of the backend's catalog/data REST API.
    pub backend_url: String,
    /// Flush stdout after every emitted response.
    pub flush: bool,
    /// Skip connecting to the backend; used for envelope validation only.
    pub dry_run: bool,
    /// Process-wide default for `get`'s `PRINT_RAW` mode; OR'd into every
    /// call's flag set before the per-envelope `arguments` are applied.
    pub raw: bool,
    /// `tracing_subscriber` filter directive. `-v/--verbose` overrides
    /// this to `"debug"` regardless of what the file/env/default say.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_connect_time: Duration::from_secs(600),
            buffer_size: 1024 * 1024,
            zone_name: None,
            backend_url: "http://localhost:1247".to_string(),
            flush: true,
            dry_run: false,
            raw: false,
            log_level: "gridexec=info".to_string(),
        }
    }
}

impl Config {
    /// Resolves configuration from CLI flags, environment variables, an
    /// optional config file, and defaults, in that precedence order.
    pub fn load(cli: &Cli) -> ExecutorResult<Config> {
        let mut config = Config::default();

        if let Some(path) = &cli.config {
            let file = Self::load_file(path)?;
            config.apply_file(file);
        }

        config.apply_env()?;
        config.apply_cli(cli)?;
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &PathBuf) -> ExecutorResult<FileConfig> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| ExecutorError::Config(format!("invalid config file {}: {e}", path.display())))
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.max_connect_time {
            self.max_connect_time = Duration::from_secs(v);
        }
        if let Some(v) = file.buffer_size {
            self.buffer_size = v;
        }
        if let Some(v) = file.zone_name {
            self.zone_name = Some(v);
        }
        if let Some(v) = file.backend_url {
            self.backend_url = v;
        }
        if let Some(v) = file.flush {
            self.flush = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
    }

    fn apply_env(&mut self) -> ExecutorResult<()> {
        if let Ok(v) = std::env::var("MAX_CONNECT_TIME") {
            self.max_connect_time = Duration::from_secs(parse_env("MAX_CONNECT_TIME", &v)?);
        }
        if let Ok(v) = std::env::var("BUFFER_SIZE") {
            self.buffer_size = parse_env("BUFFER_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("ZONE_NAME") {
            self.zone_name = Some(v);
        }
        if let Ok(v) = std::env::var("BACKEND_URL") {
            self.backend_url = v;
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &Cli) -> ExecutorResult<()> {
        if let Some(v) = cli.max_connect_time {
            self.max_connect_time = Duration::from_secs(v);
        }
        if let Some(v) = cli.buffer_size {
            self.buffer_size = v;
        }
        if let Some(v) = &cli.zone {
            self.zone_name = Some(v.clone());
        }
        if let Some(v) = &cli.backend_url {
            self.backend_url = v.clone();
        }
        self.dry_run = cli.dry_run;
        self.raw = self.raw || cli.raw;
        Ok(())
    }

    /// The process-wide default flag set every call starts from, before
    /// the dispatcher OR's in flags derived from that envelope's
    /// `arguments` (see `dispatcher::dispatch`).
    pub fn default_flags(&self) -> crate::flags::OptionFlags {
        let mut flags = crate::flags::OptionFlags::new();
        if self.raw {
            flags.set(crate::flags::Flag::PrintRaw);
        }
        flags
    }

    fn validate(&self) -> ExecutorResult<()> {
        if self.buffer_size == 0 {
            return Err(ExecutorError::Config("buffer_size must be > 0".to_string()));
        }
        if self.backend_url.is_empty() {
            return Err(ExecutorError::Config("backend_url must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> ExecutorResult<T> {
    raw.parse::<T>()
        .map_err(|_| ExecutorError::Config(format!("invalid value for {name}: {raw:?}")))
}
