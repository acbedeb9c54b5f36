//! Smart Protocol
//!
//! Runs every enabled availability checker against one server at the
//! same time and turns their answers into a single [`ProtocolDecision`].
//!
//! Preference order, first available wins:
//!
//! | Protocol      | Priority |
//! |---------------|----------|
//! | WireGuard     | 0 (only when enabled) |
//! | OpenVPN (UDP) | 1 |
//! | OpenVPN (TCP) | 2 |
//! | IKEv2         | fallback, always chosen when nothing else answered |

use crate::catalog::ServerProbeTarget;
use crate::config::SmartProtocolConfig;
use crate::probe::{
    AvailabilityChecker, AvailabilityResult, IkeChecker, OpenVpnTcpChecker, OpenVpnUdpChecker,
    WireGuardChecker,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// VPN transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VpnProtocol {
    Ike,
    OpenVpnUdp,
    OpenVpnTcp,
    WireGuard,
}

impl VpnProtocol {
    /// All protocols
    pub fn all() -> &'static [VpnProtocol] {
        &[
            VpnProtocol::Ike,
            VpnProtocol::OpenVpnUdp,
            VpnProtocol::OpenVpnTcp,
            VpnProtocol::WireGuard,
        ]
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            VpnProtocol::Ike => "IKEv2",
            VpnProtocol::OpenVpnUdp => "OpenVPN (UDP)",
            VpnProtocol::OpenVpnTcp => "OpenVPN (TCP)",
            VpnProtocol::WireGuard => "WireGuard",
        }
    }

    /// Lower is preferred
    pub fn priority(&self) -> u8 {
        match self {
            VpnProtocol::WireGuard => 0,
            VpnProtocol::OpenVpnUdp => 1,
            VpnProtocol::OpenVpnTcp => 2,
            VpnProtocol::Ike => 3,
        }
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selected protocol and the ports that answered for it.
///
/// `ports` is empty only for the degraded IKEv2 fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDecision {
    pub protocol: VpnProtocol,
    pub ports: Vec<u16>,
}

impl ProtocolDecision {
    pub fn new(protocol: VpnProtocol, ports: Vec<u16>) -> Self {
        Self { protocol, ports }
    }

    /// Can a tunnel be started from this decision?
    pub fn has_ports(&self) -> bool {
        !self.ports.is_empty()
    }
}

impl fmt::Display for ProtocolDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.protocol, self.ports)
    }
}

/// Smart Protocol coordinator
pub struct SmartProtocol {
    config: SmartProtocolConfig,
    checkers: Vec<Box<dyn AvailabilityChecker>>,
}

impl SmartProtocol {
    /// Build the checkers for every protocol enabled in `config`
    pub fn new(config: SmartProtocolConfig) -> Self {
        let timeout = config.timeout();
        let mut checkers: Vec<Box<dyn AvailabilityChecker>> = Vec::new();

        if config.openvpn {
            let key = config.static_key();
            checkers.push(Box::new(OpenVpnUdpChecker::new(timeout, key.clone())));
            checkers.push(Box::new(OpenVpnTcpChecker::new(timeout, key)));
        }
        if config.ikev2 {
            checkers.push(Box::new(IkeChecker::new(timeout)));
        }
        if config.wireguard {
            checkers.push(Box::new(WireGuardChecker::new(timeout)));
        }

        Self::with_checkers(config, checkers)
    }

    /// Use a caller-supplied checker set; enable flags are not consulted
    pub fn with_checkers(config: SmartProtocolConfig, checkers: Vec<Box<dyn AvailabilityChecker>>) -> Self {
        Self { config, checkers }
    }

    pub fn config(&self) -> &SmartProtocolConfig {
        &self.config
    }

    /// Protocols that will be probed
    pub fn protocols(&self) -> Vec<VpnProtocol> {
        self.checkers.iter().map(|c| c.protocol()).collect()
    }

    /// Probe `target` with every checker and pick a protocol.
    ///
    /// Never fails. When nothing answers the result is IKEv2 with no ports.
    pub async fn determine_best_protocol(&self, target: &ServerProbeTarget) -> ProtocolDecision {
        info!("Determining best protocol for {} ({})", target.server_id, target.domain);

        let candidates: Vec<Vec<u16>> = self
            .checkers
            .iter()
            .map(|checker| target.candidate_ports(checker.protocol(), &self.config))
            .collect();

        let checks = self.checkers.iter().zip(candidates.iter()).map(|(checker, ports)| async move {
            let result = checker.check(&target.domain, ports).await;
            debug!("{} result for {}: {:?}", checker.protocol(), target.domain, result);
            (checker.protocol(), result)
        });

        let results = join_all(checks).await;
        let decision = decide(&results);

        info!("Smart Protocol picked {} for {}", decision, target.domain);
        decision
    }
}

impl fmt::Debug for SmartProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartProtocol")
            .field("config", &self.config)
            .field("protocols", &self.protocols())
            .finish()
    }
}

/// Apply the preference order to a set of checker results.
pub fn decide(results: &[(VpnProtocol, AvailabilityResult)]) -> ProtocolDecision {
    let best = results
        .iter()
        .filter(|(protocol, result)| *protocol != VpnProtocol::Ike && result.is_available())
        .min_by_key(|(protocol, _)| protocol.priority());

    if let Some((protocol, result)) = best {
        return ProtocolDecision::new(*protocol, result.ports().to_vec());
    }

    let ike_answered = results
        .iter()
        .any(|(protocol, result)| *protocol == VpnProtocol::Ike && result.is_available());

    // IKEv2 ports are never carried over; an empty list fails the connect
    warn!(
        "No OpenVPN or WireGuard port answered (IKEv2 answered: {}), falling back to IKEv2 without ports",
        ike_answered
    );
    ProtocolDecision::new(VpnProtocol::Ike, vec![])
}
