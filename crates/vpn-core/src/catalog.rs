//! Server catalog
//!
//! Where probe targets come from. The application keeps its own server
//! list; this crate only needs to look a server up by id and to know which
//! one is active.

use crate::config::SmartProtocolConfig;
use crate::smart::VpnProtocol;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One server as seen by the availability checkers.
///
/// Port overrides are optional: `None` uses the configured defaults,
/// `Some(vec![])` means the server offers no port for that protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProbeTarget {
    /// Catalog id
    pub server_id: String,
    /// Hostname or IP literal
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ike_ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openvpn_udp_ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openvpn_tcp_ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wireguard_ports: Option<Vec<u16>>,
}

impl ServerProbeTarget {
    /// Target with no port overrides
    pub fn new(server_id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            domain: domain.into(),
            ike_ports: None,
            openvpn_udp_ports: None,
            openvpn_tcp_ports: None,
            wireguard_ports: None,
        }
    }

    /// Override the candidate ports for one protocol
    pub fn with_ports(mut self, protocol: VpnProtocol, ports: Vec<u16>) -> Self {
        let slot = match protocol {
            VpnProtocol::Ike => &mut self.ike_ports,
            VpnProtocol::OpenVpnUdp => &mut self.openvpn_udp_ports,
            VpnProtocol::OpenVpnTcp => &mut self.openvpn_tcp_ports,
            VpnProtocol::WireGuard => &mut self.wireguard_ports,
        };
        *slot = Some(ports);
        self
    }

    /// Candidate ports for `protocol`: the override if any, else the default
    pub fn candidate_ports(&self, protocol: VpnProtocol, config: &SmartProtocolConfig) -> Vec<u16> {
        let (own, default) = match protocol {
            VpnProtocol::Ike => (&self.ike_ports, &config.ports.ike),
            VpnProtocol::OpenVpnUdp => (&self.openvpn_udp_ports, &config.ports.openvpn_udp),
            VpnProtocol::OpenVpnTcp => (&self.openvpn_tcp_ports, &config.ports.openvpn_tcp),
            VpnProtocol::WireGuard => (&self.wireguard_ports, &config.ports.wireguard),
        };
        own.clone().unwrap_or_else(|| default.clone())
    }
}

/// Lookup of probe targets
pub trait ServerCatalog: Send + Sync {
    /// Target by server id
    fn target(&self, server_id: &str) -> Option<ServerProbeTarget>;

    /// Currently selected server, if any
    fn active_target(&self) -> Option<ServerProbeTarget>;
}

/// Catalog read from a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCatalog {
    /// Id of the active server
    #[serde(default)]
    pub active: Option<String>,
    /// Known servers
    #[serde(default)]
    pub servers: Vec<ServerProbeTarget>,
}

impl StaticCatalog {
    /// Catalog from a list of targets, first one active
    pub fn new(servers: Vec<ServerProbeTarget>) -> Self {
        Self {
            active: servers.first().map(|s| s.server_id.clone()),
            servers,
        }
    }

    /// Load from file, format chosen by extension
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Self::from_toml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(CatalogError::UnsupportedFormat),
        }
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let catalog: Self = toml::from_str(content)
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;
        catalog.validate()
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(content)
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;
        catalog.validate()
    }

    /// Make a server the active one
    pub fn set_active(&mut self, server_id: &str) -> Result<(), CatalogError> {
        if !self.servers.iter().any(|s| s.server_id == server_id) {
            return Err(CatalogError::UnknownServer(server_id.to_string()));
        }
        self.active = Some(server_id.to_string());
        Ok(())
    }

    fn validate(self) -> Result<Self, CatalogError> {
        if let Some(active) = &self.active {
            if !self.servers.iter().any(|s| &s.server_id == active) {
                return Err(CatalogError::UnknownServer(active.clone()));
            }
        }
        Ok(self)
    }
}

impl ServerCatalog for StaticCatalog {
    fn target(&self, server_id: &str) -> Option<ServerProbeTarget> {
        self.servers.iter().find(|s| s.server_id == server_id).cloned()
    }

    fn active_target(&self) -> Option<ServerProbeTarget> {
        self.active.as_deref().and_then(|id| self.target(id))
    }
}

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported catalog format")]
    UnsupportedFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
active = "de-1"

[[servers]]
server_id = "de-1"
domain = "de-1.vpn.example"
openvpn_udp_ports = [1194]

[[servers]]
server_id = "us-1"
domain = "198.51.100.7"
openvpn_tcp_ports = []
"#;

    #[test]
    fn test_catalog_from_toml() {
        let catalog = StaticCatalog::from_toml(CATALOG).unwrap();
        let active = catalog.active_target().unwrap();
        assert_eq!(active.domain, "de-1.vpn.example");
        assert_eq!(active.openvpn_udp_ports, Some(vec![1194]));
        assert_eq!(active.ike_ports, None);
        assert!(catalog.target("nope").is_none());
    }

    #[test]
    fn test_candidate_ports() {
        let catalog = StaticCatalog::from_toml(CATALOG).unwrap();
        let config = SmartProtocolConfig::default();

        let de = catalog.target("de-1").unwrap();
        assert_eq!(de.candidate_ports(VpnProtocol::OpenVpnUdp, &config), vec![1194]);
        assert_eq!(de.candidate_ports(VpnProtocol::OpenVpnTcp, &config), vec![443, 5995, 8443]);
        assert_eq!(de.candidate_ports(VpnProtocol::Ike, &config), vec![500]);

        let us = catalog.target("us-1").unwrap();
        assert!(us.candidate_ports(VpnProtocol::OpenVpnTcp, &config).is_empty());
    }

    #[test]
    fn test_unknown_active_rejected() {
        let result = StaticCatalog::from_json(r#"{"active": "x", "servers": []}"#);
        assert!(matches!(result, Err(CatalogError::UnknownServer(id)) if id == "x"));
    }

    #[test]
    fn test_set_active() {
        let mut catalog = StaticCatalog::new(vec![
            ServerProbeTarget::new("a", "a.example"),
            ServerProbeTarget::new("b", "b.example"),
        ]);
        assert_eq!(catalog.active_target().unwrap().server_id, "a");
        catalog.set_active("b").unwrap();
        assert_eq!(catalog.active_target().unwrap().server_id, "b");
        assert!(catalog.set_active("c").is_err());
    }

    #[test]
    fn test_with_ports() {
        let target = ServerProbeTarget::new("a", "a.example").with_ports(VpnProtocol::WireGuard, vec![51821]);
        assert_eq!(target.wireguard_ports, Some(vec![51821]));
    }
}
