//! Configuration loading for idle-heartbeatd.
//!
//! The broker settings live in a JSON file:
//!
//! ```json
//! {
//!   "BridgeUrl": "localhost",
//!   "BridgePort": 1883,
//!   "BridgeTls": false,
//!   "BridgeUser": { "UserName": "", "Password": "", "ClientId": "pc1" }
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// File name looked up next to the executable and in the user config dir.
pub const CONFIG_FILE_NAME: &str = "config.json";

const APP_DIR_NAME: &str = "idle-heartbeatd";

/// Errors while loading the configuration. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found. Expected at: {}", join_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration in {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// On-disk layout. Field names follow the file format, not Rust naming.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigFile {
    bridge_port: i64,
    bridge_url: String,
    #[serde(default)]
    bridge_tls: bool,
    #[serde(default)]
    bridge_user: UserSection,
    #[serde(default)]
    status_topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserSection {
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

/// Broker connection parameters. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub use_tls: bool,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Plain TCP connection without credentials.
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            broker_host: host.into(),
            broker_port: port,
            use_tls: false,
            client_id: client_id.into(),
            username: None,
            password: None,
        }
    }

    /// `host:port` of the broker.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    /// Username and password, only when both are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    /// Username for diagnostics, or an empty string.
    pub fn username_or_empty(&self) -> &str {
        self.username.as_deref().unwrap_or("")
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("use_tls", &self.use_tls)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything the daemon reads from its config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionConfig,

    /// Topic the idle/active status is published to.
    pub status_topic: String,
}

impl Config {
    /// Load from an explicit path, or search the default locations.
    pub fn load_or_search(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_path(path)?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                searched: vec![path.to_path_buf()],
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content, path)
    }

    /// Parse JSON content. `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let invalid = |reason: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let broker_host = file.bridge_url.trim().to_string();
        if broker_host.is_empty() {
            return Err(invalid("BridgeUrl must not be empty".to_string()));
        }

        let broker_port = u16::try_from(file.bridge_port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                invalid(format!(
                    "BridgePort must be between 1 and 65535, got {}",
                    file.bridge_port
                ))
            })?;

        let client_id = match file.bridge_user.client_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                let host = default_client_id();
                debug!("No ClientId configured, using hostname '{}'", host);
                host
            }
        };

        let status_topic = match file.status_topic {
            Some(topic) if !topic.trim().is_empty() => topic.trim().to_string(),
            _ => default_status_topic(&client_id),
        };
        validate_topic(&status_topic).map_err(|reason| {
            invalid(format!("status topic '{status_topic}' {reason}"))
        })?;

        Ok(Self {
            connection: ConnectionConfig {
                broker_host,
                broker_port,
                use_tls: file.bridge_tls,
                client_id,
                username: file.bridge_user.user_name,
                password: file.bridge_user.password,
            },
            status_topic,
        })
    }
}

/// Topic used when the config does not set one.
pub fn default_status_topic(client_id: &str) -> String {
    format!("heartbeat/{client_id}")
}

/// Check that `topic` can be published to. Wildcards are only valid in
/// subscriptions.
fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("must not be empty");
    }
    if topic.contains(['+', '#']) {
        return Err("must not contain MQTT wildcards ('+' or '#')");
    }
    if topic.contains('\0') {
        return Err("must not contain NUL characters");
    }
    if topic.len() > usize::from(u16::MAX) {
        return Err("is longer than 65535 bytes");
    }
    Ok(())
}

fn default_client_id() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Candidate config locations, in lookup order.
pub fn default_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        paths.push(dir.join(CONFIG_FILE_NAME));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    paths
}

fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => first_existing(default_paths()),
    }
}

/// First candidate that exists on disk.
fn first_existing(candidates: Vec<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(found) = candidates.iter().find(|p| p.exists()) {
        debug!("Using config file {}", found.display());
        return Ok(found.clone());
    }

    Err(ConfigError::NotFound {
        searched: candidates,
    })
}
