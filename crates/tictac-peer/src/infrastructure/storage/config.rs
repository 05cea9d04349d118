//! TOML-based configuration persistence for the peer.
//!
//! Reads and writes [`PeerConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\TicTacPeer\config.toml`
//! - Linux:    `~/.config/tictac-peer/config.toml`
//! - macOS:    `~/Library/Application Support/TicTacPeer/config.toml`
//!
//! # What is TOML? (for beginners)
//!
//! TOML (Tom's Obvious Minimal Language) is a configuration file format
//! designed to be easy to read and write.  Example:
//!
//! ```toml
//! [peer]
//! log_level = "info"
//! default_role = "x"
//!
//! [network]
//! address = "127.0.0.1"
//! port = 5050
//! bind_address = "0.0.0.0"
//! start_delay_ms = 5000
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  The peer
//! therefore works on first run, before a config file exists, and with older
//! files that lack newer fields.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tictac_core::Role;

use crate::application::session::{is_valid_port, SessionConfig, DEFAULT_PORT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

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

    /// The configured port is outside `1024..=65535`.
    #[error("port {0} is outside the allowed range 1024-65535")]
    InvalidPort(u16),

    /// An address field is not a valid IP address.
    #[error("invalid IP address: '{0}'")]
    InvalidAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    #[serde(default)]
    pub peer: PeerSettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

/// General peer behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSettings {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Role selected at startup (`"x"` or `"o"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_role: Option<Role>,
}

/// Peer address, listen interface and start delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// IP address the second peer connects to.
    #[serde(default = "default_address")]
    pub address: String,
    /// TCP port shared by both peers.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface the first peer listens on.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Delay between a verified handshake and the starting-player decision.
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_start_delay_ms() -> u64 {
    5000
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_role: None,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            bind_address: default_bind_address(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

impl PeerConfig {
    /// Validates the network section and converts it to a [`SessionConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] for ports below 1024 and
    /// [`ConfigError::InvalidAddress`] for unparsable IP addresses.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let net = &self.network;
        if !is_valid_port(net.port) {
            return Err(ConfigError::InvalidPort(net.port));
        }
        let ip: IpAddr = parse_ip(&net.address)?;
        let bind_address: IpAddr = parse_ip(&net.bind_address)?;
        Ok(SessionConfig {
            peer_addr: SocketAddr::new(ip, net.port),
            bind_address,
            start_delay: Duration::from_millis(net.start_delay_ms),
        })
    }
}

fn parse_ip(s: &str) -> Result<IpAddr, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(s.to_string()))
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform path, or defaults if absent.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<PeerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `PeerConfig` from `path`, returning `PeerConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<PeerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform path.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &PeerConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &PeerConfig, path: &Path) -> Result<(), ConfigError> {
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

/// Resolves the platform config directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TicTacPeer"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("tictac-peer"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TicTacPeer")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tictac_test_{}_{tag}", std::process::id()))
            .join("config.toml")
    }

    #[test]
    fn test_default_config_targets_localhost_5050() {
        // Arrange / Act
        let cfg = PeerConfig::default();

        // Assert
        assert_eq!(cfg.network.address, "127.0.0.1");
        assert_eq!(cfg.network.port, 5050);
        assert_eq!(cfg.network.start_delay_ms, 5000);
        assert_eq!(cfg.peer.log_level, "info");
        assert_eq!(cfg.peer.default_role, None);
    }

    #[test]
    fn test_default_session_config_matches_defaults() {
        let session = PeerConfig::default().session_config().unwrap();
        assert_eq!(session, SessionConfig::default());
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: PeerConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, PeerConfig::default());
    }

    #[test]
    fn test_deserialize_partial_network_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[peer]
default_role = "o"
[network]
port = 6000
"#;

        // Act
        let cfg: PeerConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.port, 6000);
        assert_eq!(cfg.network.address, "127.0.0.1");
        assert_eq!(cfg.peer.default_role, Some(Role::Second));
    }

    #[test]
    fn test_absent_role_is_omitted_from_toml() {
        let toml_str = toml::to_string_pretty(&PeerConfig::default()).unwrap();
        assert!(!toml_str.contains("default_role"));
    }

    #[test]
    fn test_session_config_rejects_low_port() {
        let mut cfg = PeerConfig::default();
        cfg.network.port = 1023;
        assert!(matches!(
            cfg.session_config(),
            Err(ConfigError::InvalidPort(1023))
        ));
    }

    #[test]
    fn test_session_config_rejects_bad_address() {
        let mut cfg = PeerConfig::default();
        cfg.network.address = "not.an.ip".to_string();
        assert!(matches!(
            cfg.session_config(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let path = temp_config_path("invalid");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config_from(&path).unwrap(), PeerConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let path = temp_config_path("roundtrip");
        let mut cfg = PeerConfig::default();
        cfg.network.port = 12345;
        cfg.peer.default_role = Some(Role::First);
        cfg.peer.log_level = "debug".to_string();

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir in a stripped environment is also acceptable.
    }
}
