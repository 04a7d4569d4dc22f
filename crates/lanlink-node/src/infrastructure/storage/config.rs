//! TOML-based configuration for the node binary.
//!
//! Reads and writes [`NodeConfig`] at the platform-appropriate location:
//! - Windows:  `%APPDATA%\lanlink\config.toml`
//! - Linux:    `~/.config/lanlink/config.toml`
//! - macOS:    `~/Library/Application Support/lanlink/config.toml`
//!
//! Every field has a serde default so a partial (or absent) file works on
//! first run and across upgrades. The timing values are the engine's policy
//! constants; overriding them here is how an operator tunes advertisement
//! cadence or liveness patience without touching code.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lanlink_core::domain::descriptor::{SecurityMode, NODE_TABLE_CAPACITY};
use lanlink_core::domain::session::CreateNetworkConfig;

use crate::application::engine::EngineConfig;

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

    /// An address field does not parse as IPv4.
    #[error("invalid IPv4 address in config: {0:?}")]
    BadAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// Identity and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Nickname this node records into node tables it appears in.
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Socket addressing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Address all sockets bind to. `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// UDP port for discovery probes and advertisements.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port for session connections while hosting.
    #[serde(default = "default_session_port")]
    pub session_port: u16,
    /// Destination address for discovery broadcasts.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Netmask reported by the address query.
    #[serde(default = "default_netmask")]
    pub netmask: String,
    /// Optional static local address; autodetected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
}

/// Engine timing policy. All durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    /// Consecutive advertisement failures that force-destroy a session.
    #[serde(default = "default_advertise_failure_threshold")]
    pub advertise_failure_threshold: u32,
}

/// Defaults for the `host` subcommand's session parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_network_name")]
    pub network_name: String,
    #[serde(default)]
    pub local_communication_id: u64,
    #[serde(default)]
    pub scene_id: u16,
    #[serde(default = "default_version")]
    pub local_communication_version: u16,
    #[serde(default)]
    pub security_mode: SecurityMode,
    /// Shared-key material as a UTF-8 passphrase; empty for open networks.
    #[serde(default)]
    pub passphrase: String,
    #[serde(default = "default_node_count_max")]
    pub node_count_max: u8,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_nickname() -> String {
    "lanlink-node".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_discovery_port() -> u16 {
    11452
}
fn default_session_port() -> u16 {
    11453
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_netmask() -> String {
    "255.255.255.0".to_string()
}
fn default_advertise_interval_ms() -> u64 {
    500
}
fn default_scan_window_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_join_timeout_ms() -> u64 {
    2000
}
fn default_ping_interval_ms() -> u64 {
    2000
}
fn default_liveness_timeout_ms() -> u64 {
    6000
}
fn default_advertise_failure_threshold() -> u32 {
    8
}
fn default_network_name() -> String {
    "lanlink".to_string()
}
fn default_version() -> u16 {
    1
}
fn default_node_count_max() -> u8 {
    NODE_TABLE_CAPACITY as u8
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            discovery_port: default_discovery_port(),
            session_port: default_session_port(),
            broadcast_address: default_broadcast_address(),
            netmask: default_netmask(),
            local_address: None,
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            advertise_interval_ms: default_advertise_interval_ms(),
            scan_window_ms: default_scan_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            advertise_failure_threshold: default_advertise_failure_threshold(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            network_name: default_network_name(),
            local_communication_id: 0,
            scene_id: 0,
            local_communication_version: default_version(),
            security_mode: SecurityMode::default(),
            passphrase: String::new(),
            node_count_max: default_node_count_max(),
        }
    }
}

// ── Derivations ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Builds the engine configuration from the addressing and timing
    /// sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadAddress`] when an address field does not
    /// parse as IPv4.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let local_ipv4 = match &self.network.local_address {
            Some(s) => Some(parse_ipv4(s)?),
            None => None,
        };
        Ok(EngineConfig {
            bind_addr: parse_ipv4(&self.network.bind_address)?,
            discovery_port: self.network.discovery_port,
            session_port: self.network.session_port,
            broadcast_addr: parse_ipv4(&self.network.broadcast_address)?,
            local_ipv4,
            netmask: parse_ipv4(&self.network.netmask)?,
            advertise_interval: Duration::from_millis(self.timing.advertise_interval_ms),
            scan_window: Duration::from_millis(self.timing.scan_window_ms),
            connect_timeout: Duration::from_millis(self.timing.connect_timeout_ms),
            join_timeout: Duration::from_millis(self.timing.join_timeout_ms),
            ping_interval: Duration::from_millis(self.timing.ping_interval_ms),
            liveness_timeout: Duration::from_millis(self.timing.liveness_timeout_ms),
            advertise_failure_threshold: self.timing.advertise_failure_threshold,
        })
    }

    /// Builds the host-session parameters from the session section.
    pub fn create_network_config(&self) -> CreateNetworkConfig {
        CreateNetworkConfig {
            network_name: self.session.network_name.clone(),
            local_communication_id: self.session.local_communication_id,
            scene_id: self.session.scene_id,
            local_communication_version: self.session.local_communication_version,
            security_mode: self.session.security_mode,
            security_key: self.session.passphrase.as_bytes().to_vec(),
            node_count_max: self.session.node_count_max,
            host_nickname: self.node.nickname.clone(),
            advertise_data: Vec::new(),
        }
    }
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr, ConfigError> {
    s.parse()
        .map_err(|_| ConfigError::BadAddress(s.to_string()))
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory
/// cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory
/// cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`NodeConfig`] from disk, returning the defaults if the file does
/// not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    let path = config_file_path()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &NodeConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("lanlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("lanlink")
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

    #[test]
    fn test_default_config_has_expected_ports() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.network.discovery_port, 11452);
        assert_eq!(cfg.network.session_port, 11453);
    }

    #[test]
    fn test_default_timing_matches_documented_policy() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.timing.advertise_interval_ms, 500);
        assert_eq!(cfg.timing.scan_window_ms, 1000);
        assert_eq!(cfg.timing.connect_timeout_ms, 5000);
        assert_eq!(cfg.timing.liveness_timeout_ms, 6000);
        assert_eq!(cfg.timing.advertise_failure_threshold, 8);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = NodeConfig::default();
        cfg.node.nickname = "corner-desk".to_string();
        cfg.network.discovery_port = 20000;
        cfg.session.network_name = "friday-lobby".to_string();

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: NodeConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_empty_toml_deserializes_to_defaults() {
        let cfg: NodeConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, NodeConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: NodeConfig = toml::from_str(
            r#"
[network]
discovery_port = 9999
"#,
        )
        .expect("deserialize partial");
        assert_eq!(cfg.network.discovery_port, 9999);
        assert_eq!(cfg.network.session_port, 11453);
        assert_eq!(cfg.node.nickname, "lanlink-node");
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<NodeConfig, _> = toml::from_str("[[[ not valid");
        assert!(result.is_err());
    }

    #[test]
    fn test_engine_config_parses_addresses() {
        let cfg = NodeConfig::default();
        let engine = cfg.engine_config().expect("valid default addresses");
        assert_eq!(engine.bind_addr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(engine.broadcast_addr, Ipv4Addr::BROADCAST);
        assert_eq!(engine.advertise_interval, Duration::from_millis(500));
        assert!(engine.local_ipv4.is_none());
    }

    #[test]
    fn test_engine_config_rejects_bad_address() {
        let mut cfg = NodeConfig::default();
        cfg.network.bind_address = "not-an-address".to_string();
        assert!(matches!(
            cfg.engine_config(),
            Err(ConfigError::BadAddress(_))
        ));
    }

    #[test]
    fn test_create_network_config_uses_nickname_and_passphrase() {
        let mut cfg = NodeConfig::default();
        cfg.node.nickname = "host-nick".to_string();
        cfg.session.security_mode = SecurityMode::SharedKey;
        cfg.session.passphrase = "open sesame".to_string();

        let create = cfg.create_network_config();
        assert_eq!(create.host_nickname, "host-nick");
        assert_eq!(create.security_key, b"open sesame".to_vec());
        assert_eq!(create.validate(), Ok(()));
    }

    #[test]
    fn test_local_address_omitted_when_absent() {
        let cfg = NodeConfig::default();
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        assert!(!text.contains("local_address"));
    }
}
