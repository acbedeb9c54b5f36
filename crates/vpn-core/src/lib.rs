//! vpn-core - Smart Protocol selection and connection state
//!
//! Client-side core of a VPN application: decides which transport is
//! usable on the current network and keeps the one authoritative
//! connection state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AppStateManager                        │
//! │                                                               │
//! │  prepare ──▶ SmartProtocol ──▶ connect ──▶ TunnelLayer        │
//! │                   │                             │             │
//! │      ┌────────────┼────────────┐                │ status      │
//! │      ▼            ▼            ▼                ▼             │
//! │  OpenVPN UDP  OpenVPN TCP    IKEv2      handle_tunnel_status  │
//! │   (probe)      (probe)     (probe)              │             │
//! │                                                 ▼             │
//! │                                      AppState ──▶ subscribers │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Availability probes**: synthetic IKEv2, OpenVPN (UDP/TCP) and
//!   WireGuard first packets, every port raced under one deadline
//! - **Smart Protocol**: WireGuard > OpenVPN UDP > OpenVPN TCP > IKEv2
//! - **State machine**: legal transitions only, published over broadcast
//! - **Collaborators as traits**: tunnel, alerts and properties are injected

mod catalog;
mod config;
mod manager;
mod smart;
mod state;

pub mod probe;

pub use catalog::{CatalogError, ServerCatalog, ServerProbeTarget, StaticCatalog};
pub use config::{
    ConfigError, DefaultPorts, LoggingConfig, ManagerConfig, ProbeSettings, SmartProtocolConfig,
    DEFAULT_IKE_PORTS, DEFAULT_OPENVPN_STATIC_KEY, DEFAULT_OPENVPN_TCP_PORTS,
    DEFAULT_OPENVPN_UDP_PORTS, DEFAULT_WIREGUARD_PORTS,
};
pub use manager::{
    Advisory, AlertService, AppStateManager, ConnectionConfiguration, LogAlerts, MemoryProperties,
    PropertiesStore, TunnelLayer, TunnelStatus,
};
pub use probe::{AvailabilityChecker, AvailabilityResult};
pub use smart::{decide, ProtocolDecision, SmartProtocol, VpnProtocol};
pub use state::{AppState, ConnectionError, ServerDescriptor};
