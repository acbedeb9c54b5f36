//! Availability Checkers
//!
//! Each checker sends one synthetic packet per candidate port and reports
//! every port that answered before a single shared deadline.
//!
//! ```text
//!            ┌──── port 443 ──── send probe ── recv? ──┐
//! check() ───┼──── port 1194 ─── send probe ── recv? ──┼──▶ Available { [443, 1194] }
//!            └──── port 5060 ─── send probe ── ✗ ──────┘
//!                           (deadline = start + timeout)
//! ```
//!
//! Failures are per port and silent: a refused, unreachable or silent port
//! is left out of the result, it never fails the whole check.

mod checker;
pub mod packet;

pub use checker::{
    IkeChecker, OpenVpnTcpChecker, OpenVpnUdpChecker, ResponsePredicate, WireGuardChecker,
};

use crate::smart::VpnProtocol;
use futures::future::{join_all, BoxFuture};
use rand::seq::SliceRandom;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Default per-checker time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest datagram we bother reading back
const MAX_DATAGRAM: usize = 1500;

/// Read size for TCP answers
const TCP_READ_CHUNK: usize = 1024;

/// Outcome of one checker invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityResult {
    /// No port answered in time
    Unavailable,
    /// These ports answered (never empty)
    Available { ports: Vec<u16> },
}

impl AvailabilityResult {
    /// Build from the answering ports
    pub fn from_ports(ports: Vec<u16>) -> Self {
        if ports.is_empty() {
            AvailabilityResult::Unavailable
        } else {
            AvailabilityResult::Available { ports }
        }
    }

    /// Did at least one port answer?
    pub fn is_available(&self) -> bool {
        matches!(self, AvailabilityResult::Available { .. })
    }

    /// Answering ports (empty when unavailable)
    pub fn ports(&self) -> &[u16] {
        match self {
            AvailabilityResult::Available { ports } => ports,
            AvailabilityResult::Unavailable => &[],
        }
    }
}

/// A transport prober.
///
/// Implementations must not fail: every error is folded into the result.
pub trait AvailabilityChecker: Send + Sync {
    /// Protocol this checker vouches for
    fn protocol(&self) -> VpnProtocol;

    /// Hard ceiling for one `check` call
    fn timeout(&self) -> Duration;

    /// Probe `ports` on `host`
    fn check<'a>(&'a self, host: &'a str, ports: &'a [u16]) -> BoxFuture<'a, AvailabilityResult>;
}

/// Run `probe` for every port concurrently under one deadline.
///
/// Empty input returns `Unavailable` without touching the network.
/// Duplicate ports are probed once. The result keeps the caller's order.
pub(crate) async fn check_ports<F, Fut>(
    protocol: VpnProtocol,
    host: &str,
    ports: &[u16],
    timeout: Duration,
    probe: F,
) -> AvailabilityResult
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = io::Result<bool>>,
{
    if ports.is_empty() {
        debug!("{} has no candidate ports for {}, skipping", protocol, host);
        return AvailabilityResult::Unavailable;
    }

    let mut candidates: Vec<u16> = Vec::with_capacity(ports.len());
    for port in ports {
        if !candidates.contains(port) {
            candidates.push(*port);
        }
    }
    candidates.shuffle(&mut rand::thread_rng());

    debug!("Checking {} availability for {} on {:?}", protocol, host, candidates);

    let deadline = Instant::now() + timeout;
    let probes = candidates.iter().map(|&port| {
        let attempt = probe(port);
        async move {
            match timeout_at(deadline, attempt).await {
                Ok(Ok(true)) => {
                    debug!("{} available for {} on port {}", protocol, host, port);
                    Some(port)
                }
                Ok(Ok(false)) => {
                    debug!("{} NOT available for {} on port {} (unexpected response)", protocol, host, port);
                    None
                }
                Ok(Err(e)) => {
                    debug!("{} NOT available for {} on port {} ({})", protocol, host, port, e);
                    None
                }
                Err(_) => {
                    debug!("{} NOT available for {} on port {} (timeout)", protocol, host, port);
                    None
                }
            }
        }
    });

    let answered: Vec<u16> = join_all(probes).await.into_iter().flatten().collect();
    let ordered = candidates_in_caller_order(ports, &answered);

    AvailabilityResult::from_ports(ordered)
}

fn candidates_in_caller_order(ports: &[u16], answered: &[u16]) -> Vec<u16> {
    let mut ordered = Vec::with_capacity(answered.len());
    for port in ports {
        if answered.contains(port) && !ordered.contains(port) {
            ordered.push(*port);
        }
    }
    ordered
}

/// Send one datagram and wait for any answer.
pub(crate) async fn udp_exchange(host: &str, port: u16, packet: &[u8]) -> io::Result<bool> {
    let addr = lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host has no address"))?;

    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    socket.send(packet).await?;

    let mut buf = [0u8; MAX_DATAGRAM];
    socket.recv(&mut buf).await?;
    Ok(true)
}

/// Connect, optionally send `packet`, then judge the answer.
///
/// Reads until at least `want` bytes arrived or the peer closed, picks up
/// whatever else is already buffered, and hands all of it to `accept`.
pub(crate) async fn tcp_exchange(
    host: &str,
    port: u16,
    packet: Option<&[u8]>,
    want: usize,
    accept: &ResponsePredicate,
) -> io::Result<bool> {
    let mut stream = TcpStream::connect((host, port)).await?;

    if let Some(packet) = packet {
        stream.write_all(packet).await?;
    }

    let mut response = Vec::with_capacity(want.min(TCP_READ_CHUNK));
    let mut chunk = [0u8; TCP_READ_CHUNK];

    while response.len() < want.max(1) {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(accept(&response));
        }
        response.extend_from_slice(&chunk[..n]);
    }

    loop {
        match stream.try_read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }

    Ok(accept(&response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_ports() {
        assert_eq!(AvailabilityResult::from_ports(vec![]), AvailabilityResult::Unavailable);
        let result = AvailabilityResult::from_ports(vec![443]);
        assert!(result.is_available());
        assert_eq!(result.ports(), &[443]);
    }

    #[tokio::test]
    async fn test_empty_ports_never_probe() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let started = std::time::Instant::now();
        let result = check_ports(VpnProtocol::OpenVpnUdp, "example.invalid", &[], DEFAULT_TIMEOUT, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            async { Ok(true) }
        })
        .await;
        assert_eq!(result, AvailabilityResult::Unavailable);
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 0);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_result_is_subset_in_caller_order() {
        let ports = [80, 443, 4569, 1194, 5060];
        let result = check_ports(VpnProtocol::OpenVpnUdp, "host", &ports, DEFAULT_TIMEOUT, |port| async move {
            Ok(port == 1194 || port == 80)
        })
        .await;
        assert_eq!(result.ports(), &[80, 1194]);
        assert!(result.ports().iter().all(|p| ports.contains(p)));
    }

    #[tokio::test]
    async fn test_errors_are_excluded() {
        let result = check_ports(VpnProtocol::OpenVpnTcp, "host", &[1, 2], DEFAULT_TIMEOUT, |port| async move {
            if port == 1 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                Ok(true)
            }
        })
        .await;
        assert_eq!(result.ports(), &[2]);
    }

    #[tokio::test]
    async fn test_deadline_is_shared() {
        let started = std::time::Instant::now();
        let result = check_ports(
            VpnProtocol::Ike,
            "host",
            &[500, 4500],
            Duration::from_millis(50),
            |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(true)
            },
        )
        .await;
        assert_eq!(result, AvailabilityResult::Unavailable);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_duplicate_ports_probed_once() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let result = check_ports(VpnProtocol::OpenVpnUdp, "host", &[443, 443], DEFAULT_TIMEOUT, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            async { Ok(true) }
        })
        .await;
        assert_eq!(result.ports(), &[443]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
