//! Client CLI implementation.
//!
//! Provides command-line argument parsing using clap.

use std::fmt;
use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Parser, ValueEnum};

use tether_core::constants::DEFAULT_DETACH_KEYS;
use tether_core::{DetachKeys, SessionConfig};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for tether_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => tether_core::LogFormat::Text,
            CliLogFormat::Json => tether_core::LogFormat::Json,
        }
    }
}

/// Where the raw TTY stream is exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Attach the local terminal to a remote TTY stream.
#[derive(Debug, Parser)]
#[command(
    name = "tether",
    version,
    about = "Attach the local terminal to a remote TTY stream"
)]
#[command(group(ArgGroup::new("endpoint").required(true).args(["unix", "tcp"])))]
pub struct Cli {
    /// Unix socket exporting the TTY stream
    #[arg(long, value_name = "PATH")]
    pub unix: Option<PathBuf>,

    /// TCP address exporting the TTY stream (host:port)
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<String>,

    /// Session id reported in logs (defaults to the endpoint)
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Key sequence for detaching, e.g. ctrl-p,ctrl-q (empty disables)
    #[arg(long = "detach-keys", value_name = "KEYS", default_value = DEFAULT_DETACH_KEYS)]
    pub detach_keys: DetachKeys,

    /// Do not follow local window size changes
    #[arg(long = "no-resize-watch")]
    pub no_resize_watch: bool,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// The endpoint selected on the command line.
    pub fn endpoint(&self) -> Option<Endpoint> {
        if let Some(path) = &self.unix {
            return Some(Endpoint::Unix(path.clone()));
        }
        self.tcp.clone().map(Endpoint::Tcp)
    }

    /// Session id: `--id`, or the endpoint when not given.
    pub fn session_id(&self) -> String {
        match (&self.id, self.endpoint()) {
            (Some(id), _) => id.clone(),
            (None, Some(endpoint)) => endpoint.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Session settings derived from the flags.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_detach_keys(self.detach_keys.clone())
            .with_watch_resize(!self.no_resize_watch)
    }
}
