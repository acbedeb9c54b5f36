//! The shipped configuration files parse and mean what they say.

use std::path::PathBuf;
use vpn_core::{ProbeSettings, ServerCatalog, SmartProtocolConfig, StaticCatalog, VpnProtocol};

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[test]
fn settings_file_matches_defaults() {
    let settings = ProbeSettings::load(&config_dir().join("vpn-probe.toml")).unwrap();
    assert_eq!(settings, ProbeSettings::default());
}

#[test]
fn catalog_file() {
    let catalog = StaticCatalog::load(&config_dir().join("servers.toml")).unwrap();
    let config = SmartProtocolConfig::default();

    let active = catalog.active_target().unwrap();
    assert_eq!(active.server_id, "de-fra-1");

    let us = catalog.target("us-nyc-3").unwrap();
    assert!(us.candidate_ports(VpnProtocol::OpenVpnUdp, &config).is_empty());
    assert_eq!(us.candidate_ports(VpnProtocol::OpenVpnTcp, &config), vec![443, 5995, 8443]);
}

#[test]
fn remote_ports_file() {
    let json = std::fs::read_to_string(config_dir().join("remote-ports.json")).unwrap();
    let config = SmartProtocolConfig::from_remote_json(Some(&json));
    assert_eq!(config, SmartProtocolConfig::default());
}
