//! End-to-end: real responders on 127.0.0.1, Smart Protocol picks, the
//! manager connects (or refuses to).

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use vpn_core::{
    Advisory, AlertService, AppState, AppStateManager, ConnectionConfiguration, ConnectionError,
    ManagerConfig, MemoryProperties, ProtocolDecision, ServerDescriptor, ServerProbeTarget,
    SmartProtocol, SmartProtocolConfig, TunnelLayer, TunnelStatus, VpnProtocol,
};

#[derive(Default)]
struct FakeTunnel {
    started: Mutex<Vec<ConnectionConfiguration>>,
    stops: Mutex<usize>,
}

impl TunnelLayer for FakeTunnel {
    fn start(&self, configuration: ConnectionConfiguration) {
        self.started.lock().unwrap().push(configuration);
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }
}

#[derive(Default)]
struct FakeAlerts {
    pushed: Mutex<Vec<Advisory>>,
}

impl AlertService for FakeAlerts {
    fn push(&self, advisory: Advisory) {
        self.pushed.lock().unwrap().push(advisory);
    }
}

async fn udp_responder() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n.min(16)], peer).await;
        }
    });
    port
}

async fn tcp_responder() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 128];
                if stream.read(&mut buf).await.is_ok() {
                    let _ = stream.write_all(&[0x40; 16]).await;
                }
            });
        }
    });
    port
}

/// Bound UDP socket that never answers; held open for the test's duration
async fn silent_udp() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

async fn closed_tcp() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn smart() -> SmartProtocol {
    SmartProtocol::new(SmartProtocolConfig {
        timeout_ms: 500,
        ..SmartProtocolConfig::default()
    })
}

fn manager() -> (AppStateManager, Arc<FakeTunnel>, Arc<FakeAlerts>) {
    let tunnel = Arc::new(FakeTunnel::default());
    let alerts = Arc::new(FakeAlerts::default());
    let manager = AppStateManager::new(
        tunnel.clone(),
        alerts.clone(),
        Arc::new(MemoryProperties::new(true)),
        ManagerConfig::default(),
    );
    (manager, tunnel, alerts)
}

fn descriptor() -> ServerDescriptor {
    ServerDescriptor::new("user", "127.0.0.1")
}

#[tokio::test]
async fn udp_wins_when_both_answer() {
    let udp = udp_responder().await;
    let tcp = tcp_responder().await;
    let (_ike_socket, ike) = silent_udp().await;

    let target = ServerProbeTarget::new("local", "127.0.0.1")
        .with_ports(VpnProtocol::OpenVpnUdp, vec![udp])
        .with_ports(VpnProtocol::OpenVpnTcp, vec![tcp])
        .with_ports(VpnProtocol::Ike, vec![ike]);

    let decision = smart().determine_best_protocol(&target).await;
    assert_eq!(decision, ProtocolDecision::new(VpnProtocol::OpenVpnUdp, vec![udp]));
}

#[tokio::test]
async fn tcp_wins_when_udp_is_blocked() {
    let tcp = tcp_responder().await;
    let (_udp_socket, udp) = silent_udp().await;

    let target = ServerProbeTarget::new("local", "127.0.0.1")
        .with_ports(VpnProtocol::OpenVpnUdp, vec![udp])
        .with_ports(VpnProtocol::OpenVpnTcp, vec![tcp])
        .with_ports(VpnProtocol::Ike, vec![]);

    let decision = smart().determine_best_protocol(&target).await;
    assert_eq!(decision, ProtocolDecision::new(VpnProtocol::OpenVpnTcp, vec![tcp]));
}

#[tokio::test]
async fn smart_connect_starts_tunnel_with_decision() {
    let udp = udp_responder().await;
    let (manager, tunnel, _) = manager();

    let target = ServerProbeTarget::new("local", "127.0.0.1")
        .with_ports(VpnProtocol::OpenVpnUdp, vec![udp])
        .with_ports(VpnProtocol::OpenVpnTcp, vec![])
        .with_ports(VpnProtocol::Ike, vec![]);

    let decision = manager
        .connect_with_smart_protocol(&smart(), &target, descriptor())
        .await
        .unwrap();
    assert_eq!(decision.protocol, VpnProtocol::OpenVpnUdp);

    let started = tunnel.started.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].server_id, "local");
    assert_eq!(started[0].decision, decision);

    manager.handle_tunnel_status(TunnelStatus::Connecting(descriptor())).await;
    manager.handle_tunnel_status(TunnelStatus::Connected(descriptor())).await;
    assert!(manager.state().await.is_connected());
}

#[tokio::test]
async fn nothing_answers_means_error_without_tunnel() {
    let (_udp_socket, udp) = silent_udp().await;
    let (_ike_socket, ike) = silent_udp().await;
    let tcp = closed_tcp().await;
    let (manager, tunnel, alerts) = manager();

    let target = ServerProbeTarget::new("local", "127.0.0.1")
        .with_ports(VpnProtocol::OpenVpnUdp, vec![udp])
        .with_ports(VpnProtocol::OpenVpnTcp, vec![tcp])
        .with_ports(VpnProtocol::Ike, vec![ike]);

    let started = std::time::Instant::now();
    let decision = smart().determine_best_protocol(&target).await;
    assert_eq!(decision, ProtocolDecision::new(VpnProtocol::Ike, vec![]));
    assert!(started.elapsed() < Duration::from_secs(3));

    manager.prepare_to_connect().await;
    let result = manager
        .connect(ConnectionConfiguration::new("local", descriptor(), decision))
        .await;

    assert_eq!(result, Err(ConnectionError::NoAvailablePorts));
    assert_eq!(manager.state().await, AppState::Error(ConnectionError::NoAvailablePorts));
    assert!(tunnel.started.lock().unwrap().is_empty());
    assert_eq!(
        *alerts.pushed.lock().unwrap(),
        vec![Advisory::ConnectionFailed(ConnectionError::NoAvailablePorts)]
    );
}

#[tokio::test]
async fn cancel_while_probing_skips_connect() {
    let (_udp_socket, udp) = silent_udp().await;
    let (manager, tunnel, _) = manager();

    let target = ServerProbeTarget::new("local", "127.0.0.1")
        .with_ports(VpnProtocol::OpenVpnUdp, vec![udp])
        .with_ports(VpnProtocol::OpenVpnTcp, vec![])
        .with_ports(VpnProtocol::Ike, vec![]);

    let canceller = manager.clone();
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel_connection_attempt(true).await;
    });

    let result = manager
        .connect_with_smart_protocol(&smart(), &target, descriptor())
        .await;
    cancel.await.unwrap();

    assert_eq!(result, Err(ConnectionError::Aborted));
    assert_eq!(manager.state().await, AppState::Aborted { user_initiated: true });
    assert!(tunnel.started.lock().unwrap().is_empty());
}
