//! Node configuration
//!
//! Static settings read once at startup, plus the regex lists used to
//! filter which peers we are willing to join.

pub mod regex_list;

pub use regex_list::RegexList;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8000;

/// Default CGI path of the node
pub const DEFAULT_PATH: &str = "/server.cgi";

/// Timeout for a single protocol request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the relay task idles after a pass without any usable relay
pub const DEFAULT_RELAY_RETRY_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid pattern {pattern:?}: {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },
}

/// How this node is reachable from the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// The listening port is reachable directly
    PortOpened,
    /// Behind NAT; tunnel through a peer
    Relay,
}

/// Node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub path: String,
    /// Public host name; the observed IP is used when empty
    pub server_name: String,
    pub mode: NetworkMode,
    pub node_allow_file: PathBuf,
    pub node_deny_file: PathBuf,
    pub initnode_list: PathBuf,
    pub request_timeout_secs: u64,
    pub relay_retry_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            server_name: String::new(),
            mode: NetworkMode::PortOpened,
            node_allow_file: PathBuf::from("file/node_allow.txt"),
            node_deny_file: PathBuf::from("file/node_deny.txt"),
            initnode_list: PathBuf::from("file/initnode.txt"),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            relay_retry_secs: DEFAULT_RELAY_RETRY_INTERVAL.as_secs(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the first existing default
    /// location. Falls back to defaults when nothing is found.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        for candidate in Self::default_locations() {
            if candidate.is_file() {
                log::info!("Loading config from {:?}", candidate);
                return Self::from_file(&candidate);
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Parse a JSON settings file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut files = vec![
            PathBuf::from("file/saku.json"),
            PathBuf::from("/usr/local/etc/saku/saku.json"),
            PathBuf::from("/etc/saku/saku.json"),
        ];
        if let Some(home) = std::env::var_os("HOME") {
            files.push(PathBuf::from(home).join(".saku").join("saku.json"));
        }
        files
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn relay_retry_interval(&self) -> Duration {
        Duration::from_secs(self.relay_retry_secs)
    }
}
