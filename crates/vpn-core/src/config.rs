//! Configuration
//!
//! Provides the Smart Protocol settings (candidate ports, enabled
//! protocols, probe timeout), the App State Manager settings, and the
//! file-level `ProbeSettings` that bundles them.
//!
//! Candidate ports come from three layers, first match wins:
//!
//! 1. per-server overrides on the [`ServerProbeTarget`](crate::ServerProbeTarget)
//! 2. the remote `{"DefaultPorts": {"UDP": [..], "TCP": [..]}}` document
//! 3. the hardcoded defaults below

use crate::probe::packet::parse_static_key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// OpenVPN TCP candidate ports used when nothing else is configured
pub const DEFAULT_OPENVPN_TCP_PORTS: [u16; 3] = [443, 5995, 8443];

/// OpenVPN UDP candidate ports used when nothing else is configured
pub const DEFAULT_OPENVPN_UDP_PORTS: [u16; 5] = [80, 443, 4569, 1194, 5060];

/// IKEv2 candidate ports
pub const DEFAULT_IKE_PORTS: [u16; 1] = [500];

/// WireGuard candidate ports
pub const DEFAULT_WIREGUARD_PORTS: [u16; 1] = [51820];

/// tls-auth key shipped with the client configuration (hex, 256 bytes)
pub const DEFAULT_OPENVPN_STATIC_KEY: &str = "\
6acef03f62675b4b1bbd03e53b187727423cea742242106cb2916a8a4c829756\
3d22c7e5cef430b1103c6f66eb1fc5b375a672f158e2e2e936c3faa48b035a6d\
e17beaac23b5f03b10b868d53d03521d8ba115059da777a60cbfd7b2c9c57472\
78a15b8f6e68a3ef7fd583ec9f398c8bd4735dab40cbd1e3c62a822e97489186\
c30a0b48c7c38ea32ceb056d3fa5a710e10ccc7a0ddb363b08c3d2777a3395e1\
0c0b6080f56309192ab5aacd4b45f55da61fc77af39bd81a19218a79762c3386\
2df55785075f37d8c71dc8a42097ee43344739a0dd48d03025b0450cf1fb5e8c\
aeb893d9a96d1f15519bb3c4dcb40ee316672ea16c012664f8a9f11255518deb";

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_static_key() -> String {
    DEFAULT_OPENVPN_STATIC_KEY.to_string()
}

fn default_openvpn_udp_ports() -> Vec<u16> {
    DEFAULT_OPENVPN_UDP_PORTS.to_vec()
}

fn default_openvpn_tcp_ports() -> Vec<u16> {
    DEFAULT_OPENVPN_TCP_PORTS.to_vec()
}

fn default_ike_ports() -> Vec<u16> {
    DEFAULT_IKE_PORTS.to_vec()
}

fn default_wireguard_ports() -> Vec<u16> {
    DEFAULT_WIREGUARD_PORTS.to_vec()
}

fn default_stuck_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default candidate ports per protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPorts {
    #[serde(default = "default_openvpn_udp_ports")]
    pub openvpn_udp: Vec<u16>,
    #[serde(default = "default_openvpn_tcp_ports")]
    pub openvpn_tcp: Vec<u16>,
    #[serde(default = "default_ike_ports")]
    pub ike: Vec<u16>,
    #[serde(default = "default_wireguard_ports")]
    pub wireguard: Vec<u16>,
}

impl Default for DefaultPorts {
    fn default() -> Self {
        Self {
            openvpn_udp: default_openvpn_udp_ports(),
            openvpn_tcp: default_openvpn_tcp_ports(),
            ike: default_ike_ports(),
            wireguard: default_wireguard_ports(),
        }
    }
}

/// Smart Protocol settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartProtocolConfig {
    /// Probe OpenVPN (UDP and TCP)
    #[serde(default = "default_true")]
    pub openvpn: bool,
    /// Probe IKEv2
    #[serde(default = "default_true")]
    pub ikev2: bool,
    /// Probe WireGuard (off unless the backend enables it)
    #[serde(default)]
    pub wireguard: bool,
    /// Default candidate ports
    #[serde(default)]
    pub ports: DefaultPorts,
    /// Per-checker time budget in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// OpenVPN tls-auth static key (hex or key block)
    #[serde(default = "default_static_key")]
    pub openvpn_static_key: String,
}

impl Default for SmartProtocolConfig {
    fn default() -> Self {
        Self {
            openvpn: true,
            ikev2: true,
            wireguard: false,
            ports: DefaultPorts::default(),
            timeout_ms: default_timeout_ms(),
            openvpn_static_key: default_static_key(),
        }
    }
}

impl SmartProtocolConfig {
    /// Build from an optional remote document.
    ///
    /// `None` or malformed JSON leaves the hardcoded defaults in place.
    pub fn from_remote_json(json: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(json) = json {
            config.apply_remote_json(json);
        }
        config
    }

    /// Override the OpenVPN default ports from a remote document of shape
    /// `{"DefaultPorts": {"UDP": [..], "TCP": [..]}}`.
    ///
    /// UDP and TCP are resolved independently: a missing or malformed entry
    /// falls back to the hardcoded list for that transport only.
    pub fn apply_remote_json(&mut self, json: &str) {
        let document: Option<Value> = match serde_json::from_str(json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed remote port config: {}", e);
                None
            }
        };
        let ports = document.as_ref().and_then(|d| d.get("DefaultPorts"));

        self.ports.openvpn_udp = remote_port_list(ports, "UDP").unwrap_or_else(|| {
            debug!("No remote UDP ports, using defaults");
            default_openvpn_udp_ports()
        });
        self.ports.openvpn_tcp = remote_port_list(ports, "TCP").unwrap_or_else(|| {
            debug!("No remote TCP ports, using defaults");
            default_openvpn_tcp_ports()
        });
    }

    /// Per-checker time budget
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Decoded static key (empty when the configured text is not hex)
    pub fn static_key(&self) -> Vec<u8> {
        let key = parse_static_key(&self.openvpn_static_key);
        if key.is_empty() {
            warn!("OpenVPN static key is not valid hex, probes will carry an unkeyed HMAC");
        }
        key
    }
}

/// Every element must be an integer in port range, otherwise the list is
/// treated as absent.
fn remote_port_list(ports: Option<&Value>, key: &str) -> Option<Vec<u16>> {
    ports?
        .get(key)?
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u16::try_from(n).ok()))
        .collect()
}

/// App State Manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Seconds in `connecting` before the stuck advisory fires
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stuck_timeout_secs: default_stuck_timeout_secs(),
        }
    }
}

impl ManagerConfig {
    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    #[serde(default)]
    pub smart_protocol: SmartProtocolConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProbeSettings {
    /// Load from file, format chosen by extension (`.toml` or `.json`)
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,
}
