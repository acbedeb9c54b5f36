//! Collaborators injected into the App State Manager

use crate::smart::ProtocolDecision;
use crate::state::{ConnectionError, ServerDescriptor};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Everything the tunnel layer needs to bring a tunnel up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfiguration {
    pub server_id: String,
    pub descriptor: ServerDescriptor,
    pub decision: ProtocolDecision,
}

impl ConnectionConfiguration {
    pub fn new(server_id: impl Into<String>, descriptor: ServerDescriptor, decision: ProtocolDecision) -> Self {
        Self {
            server_id: server_id.into(),
            descriptor,
            decision,
        }
    }
}

/// Status reported by the platform tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    Connecting(ServerDescriptor),
    Connected(ServerDescriptor),
    Disconnecting(ServerDescriptor),
    Disconnected,
    /// Re-negotiating, still up
    Reasserting(ServerDescriptor),
    Error(ConnectionError),
}

impl TunnelStatus {
    /// Is a tunnel up or on its way up/down?
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TunnelStatus::Connecting(_)
                | TunnelStatus::Connected(_)
                | TunnelStatus::Disconnecting(_)
                | TunnelStatus::Reasserting(_)
        )
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Connecting(d) => write!(f, "connecting ({})", d),
            TunnelStatus::Connected(d) => write!(f, "connected ({})", d),
            TunnelStatus::Disconnecting(d) => write!(f, "disconnecting ({})", d),
            TunnelStatus::Disconnected => f.write_str("disconnected"),
            TunnelStatus::Reasserting(d) => write!(f, "reasserting ({})", d),
            TunnelStatus::Error(e) => write!(f, "error ({})", e),
        }
    }
}

/// Alerts the manager asks the UI to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// First connection ever, it may take a while
    FirstTimeConnecting,
    /// The attempt has not settled in time
    StuckConnection,
    ConnectionFailed(ConnectionError),
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::FirstTimeConnecting => f.write_str("first connection may take a while"),
            Advisory::StuckConnection => f.write_str("connection is taking longer than usual"),
            Advisory::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
        }
    }
}

/// The platform tunnel.
///
/// Both calls return immediately; progress is reported back through
/// [`TunnelStatus`] values.
pub trait TunnelLayer: Send + Sync {
    fn start(&self, configuration: ConnectionConfiguration);
    fn stop(&self);
}

/// Presents advisories to the user
pub trait AlertService: Send + Sync {
    fn push(&self, advisory: Advisory);

    /// Withdraw an advisory that no longer applies
    fn dismiss(&self, _advisory: &Advisory) {}
}

/// Persistent user properties
pub trait PropertiesStore: Send + Sync {
    /// Has the user ever completed a connection?
    fn has_connected(&self) -> bool;
    fn set_has_connected(&self, value: bool);
    fn last_connected(&self) -> Option<SystemTime>;
    fn set_last_connected(&self, at: SystemTime);
}

/// In-memory properties
#[derive(Debug, Default)]
pub struct MemoryProperties {
    has_connected: AtomicBool,
    /// Seconds since the epoch, 0 when unset
    last_connected: AtomicU64,
}

impl MemoryProperties {
    pub fn new(has_connected: bool) -> Self {
        Self {
            has_connected: AtomicBool::new(has_connected),
            last_connected: AtomicU64::new(0),
        }
    }
}

impl PropertiesStore for MemoryProperties {
    fn has_connected(&self) -> bool {
        self.has_connected.load(Ordering::Acquire)
    }

    fn set_has_connected(&self, value: bool) {
        self.has_connected.store(value, Ordering::Release);
    }

    fn last_connected(&self) -> Option<SystemTime> {
        match self.last_connected.load(Ordering::Acquire) {
            0 => None,
            secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    fn set_last_connected(&self, at: SystemTime) {
        let secs = at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.last_connected.store(secs, Ordering::Release);
    }
}

/// Writes advisories to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl AlertService for LogAlerts {
    fn push(&self, advisory: Advisory) {
        match advisory {
            Advisory::ConnectionFailed(_) | Advisory::StuckConnection => warn!("Advisory: {}", advisory),
            Advisory::FirstTimeConnecting => info!("Advisory: {}", advisory),
        }
    }

    fn dismiss(&self, advisory: &Advisory) {
        debug!("Advisory withdrawn: {}", advisory);
    }
}
