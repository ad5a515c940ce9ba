//! TOML configuration for the `devlink` client.
//!
//! Every field has a default, so a missing file (first run) or a file written
//! by an older version still loads:
//!
//! ```toml
//! discovery_timeout_secs = 30
//! io_timeout_secs = 30
//! approval_timeout_secs = 60
//! data_dir = "/home/alice/.local/share/devlink"
//! device_name = "alice-laptop"
//! worker_socket_name = "devlink-worker"
//! ```
//!
//! `#[serde(default = "some_fn")]` fills a field from `some_fn()` whenever the
//! key is absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Client settings stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// How long discovery waits for a matching service.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    /// Read/write timeout on pairing and wire sockets.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    /// How long to wait for the user to approve a new key on the device.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Directory holding the identity files and the worker token.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Name this client announces during pairing.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Socket name the privileged worker was started with.
    #[serde(default = "default_worker_socket_name")]
    pub worker_socket_name: String,
}

fn default_discovery_timeout() -> u64 {
    30
}

fn default_io_timeout() -> u64 {
    30
}

fn default_approval_timeout() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    platform_data_dir().unwrap_or_else(|| PathBuf::from(".devlink"))
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "devlink-client".to_string())
}

fn default_worker_socket_name() -> String {
    "devlink-worker".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: default_discovery_timeout(),
            io_timeout_secs: default_io_timeout(),
            approval_timeout_secs: default_approval_timeout(),
            data_dir: default_data_dir(),
            device_name: default_device_name(),
            worker_socket_name: default_worker_socket_name(),
        }
    }
}

impl ClientConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Full path of the privileged worker's socket.
    pub fn worker_socket_path(&self) -> PathBuf {
        self.data_dir
            .join(devlink_core::protocol::privileged::socket_file_name(&self.worker_socket_name))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    platform_config_dir()
        .unwrap_or_else(|| PathBuf::from(".devlink"))
        .join("config.toml")
}

/// Loads `ClientConfig` from `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .map(|base| base.join("devlink"))
}

fn platform_data_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .map(|base| base.join("devlink"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_timeouts() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.discovery_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.io_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.approval_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.worker_socket_name, "devlink-worker");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_partial_file_fills_missing_fields() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "io_timeout_secs = 5\ndevice_name = \"bench-rig\"\n").unwrap();

        // Act
        let cfg = load_config(&path).unwrap();

        // Assert
        assert_eq!(cfg.io_timeout_secs, 5);
        assert_eq!(cfg.device_name, "bench-rig");
        assert_eq!(cfg.discovery_timeout_secs, 30);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "io_timeout_secs = \"soon\"").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        let mut cfg = ClientConfig::default();
        cfg.data_dir = dir.path().to_path_buf();
        cfg.approval_timeout_secs = 120;

        save_config(&path, &cfg).unwrap();

        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn test_worker_socket_path_is_inside_data_dir() {
        let cfg = ClientConfig {
            data_dir: PathBuf::from("/data/devlink"),
            worker_socket_name: "injector".into(),
            ..ClientConfig::default()
        };
        assert_eq!(
            cfg.worker_socket_path(),
            PathBuf::from("/data/devlink/injector.sock")
        );
    }
}
