//! TOML-based configuration for adbtun.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\adbtun\config.toml`
//! - Linux:    `~/.config/adbtun/config.toml`
//! - macOS:    `~/Library/Application Support/adbtun/config.toml`
//!
//! Example:
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [bridge]
//! executable = "/opt/android-sdk/platform-tools/adb"
//!
//! [tunnel]
//! port_range = "27183:27199"
//! force_forward = false
//!
//! [device]
//! select_usb = true
//! ```
//!
//! Every field has a serde default, so a missing file (first run) or a file
//! written by an older version still loads.
//!
//! # The bridge executable
//!
//! The path to `adb` is resolved once at start-up into a [`BridgeConfig`]
//! (config file, then the `ADB` environment variable, then plain `"adb"`
//! looked up on `PATH`) and handed to the bridge client explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use adbtun_core::{DeviceSelector, PortRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the bridge executable.
pub const ADB_ENV_VAR: &str = "ADB";

/// Executable used when neither the config nor the environment names one.
pub const DEFAULT_ADB: &str = "adb";

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

    /// The values parse but contradict each other or are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// `[bridge]` section as written in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Path to the `adb` executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
}

/// Tunnel negotiation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelConfig {
    /// Local ports to try, `"first:last"` or a single port.
    #[serde(default = "default_port_range")]
    pub port_range: String,
    /// Skip the reverse tunnel and go straight to forward mode.
    #[serde(default)]
    pub force_forward: bool,
    /// Device-side `localabstract` socket name.
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
    /// Forward mode: how many times to try connecting to the device.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Forward mode: delay between two connection attempts.
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
}

/// Which device to use when several are attached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default)]
    pub select_usb: bool,
    #[serde(default)]
    pub select_tcpip: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port_range() -> String {
    let range = PortRange::DEFAULT;
    format!("{}:{}", range.first(), range.last())
}
fn default_socket_name() -> String {
    "adbtun".to_string()
}
fn default_connect_attempts() -> u32 {
    100
}
fn default_connect_retry_delay_ms() -> u64 {
    100
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port_range: default_port_range(),
            force_forward: false,
            socket_name: default_socket_name(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
        }
    }
}

impl TunnelConfig {
    /// Parsed [`port_range`](Self::port_range).
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the string is not a valid range.
    pub fn port_range(&self) -> Result<PortRange, ConfigError> {
        self.port_range
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("tunnel.port_range: {e}")))
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

impl AppConfig {
    /// Builds the device selector from the `[device]` section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when more than one way of selecting is given.
    pub fn selector(&self) -> Result<DeviceSelector, ConfigError> {
        let d = &self.device;
        match (&d.serial, d.select_usb, d.select_tcpip) {
            (None, false, false) => Ok(DeviceSelector::All),
            (Some(serial), false, false) => Ok(DeviceSelector::BySerial(serial.clone())),
            (None, true, false) => Ok(DeviceSelector::ByUsb),
            (None, false, true) => Ok(DeviceSelector::ByTcpIp),
            _ => Err(ConfigError::Invalid(
                "device.serial, device.select_usb and device.select_tcpip are mutually exclusive"
                    .to_string(),
            )),
        }
    }

    /// Resolves the bridge executable: this config, then `$ADB`, then `"adb"`.
    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig::resolve(
            self.bridge.executable.as_deref(),
            std::env::var(ADB_ENV_VAR).ok().as_deref(),
        )
    }
}

// ── Resolved bridge settings ──────────────────────────────────────────────────

/// The bridge executable, resolved once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub executable: String,
}

impl BridgeConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Picks the first non-empty candidate, falling back to [`DEFAULT_ADB`].
    pub fn resolve(configured: Option<&str>, env: Option<&str>) -> Self {
        let executable = [configured, env]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ADB);
        Self::new(executable)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADB)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let dir = platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)?;
    Ok(dir.join("config.toml"))
}

/// Loads the config from the platform path, or defaults if it does not exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if the port range does not parse.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no config file at {}, using defaults", path.display());
            AppConfig::default()
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    cfg.tunnel.port_range()?;
    Ok(cfg)
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
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

/// Resolves the platform config directory including the `adbtun` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("adbtun"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("adbtun"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("adbtun")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
