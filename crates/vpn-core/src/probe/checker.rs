//! Per-protocol checkers

use super::packet::{ike_probe, openvpn_probe, wireguard_probe};
use super::{check_ports, tcp_exchange, udp_exchange, AvailabilityChecker, AvailabilityResult, DEFAULT_TIMEOUT};
use crate::smart::VpnProtocol;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a TCP answer came from a real endpoint
pub type ResponsePredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// IKEv2 over UDP
#[derive(Debug, Clone)]
pub struct IkeChecker {
    timeout: Duration,
}

impl IkeChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for IkeChecker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl AvailabilityChecker for IkeChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::Ike
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn check<'a>(&'a self, host: &'a str, ports: &'a [u16]) -> BoxFuture<'a, AvailabilityResult> {
        Box::pin(check_ports(self.protocol(), host, ports, self.timeout, move |port| async move {
            udp_exchange(host, port, &ike_probe()).await
        }))
    }
}

/// OpenVPN over UDP
#[derive(Debug, Clone)]
pub struct OpenVpnUdpChecker {
    timeout: Duration,
    static_key: Vec<u8>,
}

impl OpenVpnUdpChecker {
    /// `static_key` is the decoded tls-auth key
    pub fn new(timeout: Duration, static_key: Vec<u8>) -> Self {
        Self { timeout, static_key }
    }
}

impl AvailabilityChecker for OpenVpnUdpChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpnUdp
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn check<'a>(&'a self, host: &'a str, ports: &'a [u16]) -> BoxFuture<'a, AvailabilityResult> {
        Box::pin(check_ports(self.protocol(), host, ports, self.timeout, move |port| async move {
            let packet = openvpn_probe(&self.static_key, false);
            udp_exchange(host, port, &packet).await
        }))
    }
}

/// OpenVPN over TCP
///
/// Any open TCP port accepts a connection, so the bytes read back
/// are run through a predicate to tell OpenVPN apart from other services.
#[derive(Clone)]
pub struct OpenVpnTcpChecker {
    timeout: Duration,
    static_key: Vec<u8>,
    send_handshake: bool,
    /// Bytes to collect before the predicate runs
    want: usize,
    accept: ResponsePredicate,
}

impl OpenVpnTcpChecker {
    /// Send the hard-reset probe and accept any non-empty answer
    pub fn new(timeout: Duration, static_key: Vec<u8>) -> Self {
        Self {
            timeout,
            static_key,
            send_handshake: true,
            want: 1,
            accept: Arc::new(|response: &[u8]| !response.is_empty()),
        }
    }

    /// Replace the acceptance predicate
    pub fn with_predicate<F>(mut self, accept: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.accept = Arc::new(accept);
        self
    }

    /// Only accept answers of exactly `len` bytes
    pub fn expecting_len(self, len: usize) -> Self {
        let mut checker = self.with_predicate(move |response| response.len() == len);
        checker.want = len;
        checker
    }

    /// Connect without writing anything and judge whatever the server says first
    pub fn without_handshake(mut self) -> Self {
        self.send_handshake = false;
        self
    }
}

impl fmt::Debug for OpenVpnTcpChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenVpnTcpChecker")
            .field("timeout", &self.timeout)
            .field("send_handshake", &self.send_handshake)
            .field("want", &self.want)
            .finish_non_exhaustive()
    }
}

impl AvailabilityChecker for OpenVpnTcpChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpnTcp
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn check<'a>(&'a self, host: &'a str, ports: &'a [u16]) -> BoxFuture<'a, AvailabilityResult> {
        Box::pin(check_ports(self.protocol(), host, ports, self.timeout, move |port| async move {
            let packet = self
                .send_handshake
                .then(|| openvpn_probe(&self.static_key, true));
            tcp_exchange(host, port, packet.as_deref(), self.want, &self.accept).await
        }))
    }
}

/// WireGuard over UDP
#[derive(Debug, Clone)]
pub struct WireGuardChecker {
    timeout: Duration,
}

impl WireGuardChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WireGuardChecker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl AvailabilityChecker for WireGuardChecker {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::WireGuard
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn check<'a>(&'a self, host: &'a str, ports: &'a [u16]) -> BoxFuture<'a, AvailabilityResult> {
        Box::pin(check_ports(self.protocol(), host, ports, self.timeout, move |port| async move {
            udp_exchange(host, port, &wireguard_probe()).await
        }))
    }
}
