//! App State Manager
//!
//! Owns the one [`AppState`] and moves it in response to user intent
//! (`prepare_to_connect`, `connect`, `disconnect`, `cancel_connection_attempt`)
//! and to tunnel status callbacks.
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = AppStateManager::new(tunnel, Arc::new(LogAlerts), properties, ManagerConfig::default());
//! manager.spawn_status_listener(status_rx);
//!
//! let mut changes = manager.subscribe();
//! manager
//!     .connect_with_smart_protocol(&smart, &target, descriptor)
//!     .await?;
//!
//! while let Ok(state) = changes.recv().await {
//!     if state.is_connected() {
//!         break;
//!     }
//! }
//! ```

mod services;

pub use services::{
    Advisory, AlertService, ConnectionConfiguration, LogAlerts, MemoryProperties, PropertiesStore,
    TunnelLayer, TunnelStatus,
};

use crate::catalog::ServerProbeTarget;
use crate::config::ManagerConfig;
use crate::smart::{ProtocolDecision, SmartProtocol};
use crate::state::{AppState, ConnectionError, ServerDescriptor};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the state change channel
const STATE_CHANNEL_CAPACITY: usize = 64;

struct Inner {
    state: AppState,
    /// A connection attempt is in flight
    attempting: bool,
    /// Bumped for every new attempt so stale timers can tell
    attempt_id: u64,
    /// Last status the tunnel reported
    tunnel_status: Option<TunnelStatus>,
    /// A tunnel status arrived since the last move out of a stable state
    status_seen: bool,
    /// Start deferred until the running tunnel reports `Disconnected`
    pending: Option<ConnectionConfiguration>,
    /// Descriptor of the most recent attempt
    descriptor: Option<ServerDescriptor>,
    /// `FirstTimeConnecting` is on screen
    first_time_shown: bool,
    connected_at: Option<SystemTime>,
    stuck_timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: AppState::Disconnected,
            attempting: false,
            attempt_id: 0,
            tunnel_status: None,
            status_seen: false,
            pending: None,
            descriptor: None,
            first_time_shown: false,
            connected_at: None,
            stuck_timer: None,
        }
    }

    fn tunnel_active(&self) -> bool {
        self.tunnel_status.as_ref().map_or(false, TunnelStatus::is_active)
    }

    fn cancel_stuck_timer(&mut self) {
        if let Some(timer) = self.stuck_timer.take() {
            timer.abort();
        }
    }

    /// Forget the in-flight attempt
    fn end_attempt(&mut self) {
        self.attempting = false;
        self.pending = None;
        self.cancel_stuck_timer();
    }
}

/// App State Manager
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct AppStateManager {
    inner: Arc<Mutex<Inner>>,
    tunnel: Arc<dyn TunnelLayer>,
    alerts: Arc<dyn AlertService>,
    properties: Arc<dyn PropertiesStore>,
    changes: broadcast::Sender<AppState>,
    config: ManagerConfig,
}

impl AppStateManager {
    /// Create a manager in `Disconnected`
    pub fn new(
        tunnel: Arc<dyn TunnelLayer>,
        alerts: Arc<dyn AlertService>,
        properties: Arc<dyn PropertiesStore>,
        config: ManagerConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            tunnel,
            alerts,
            properties,
            changes,
            config,
        }
    }

    /// Current state
    pub async fn state(&self) -> AppState {
        self.inner.lock().await.state.clone()
    }

    /// Receive every state the manager publishes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.changes.subscribe()
    }

    pub async fn is_attempting(&self) -> bool {
        self.inner.lock().await.attempting
    }

    /// When the current connection came up (`None` unless connected)
    pub async fn connected_at(&self) -> Option<SystemTime> {
        let inner = self.inner.lock().await;
        if !inner.state.is_connected() {
            return None;
        }
        inner.connected_at.or_else(|| self.properties.last_connected())
    }

    /// Announce a connection attempt.
    ///
    /// First-time users get the `FirstTimeConnecting` advisory before
    /// anything else happens.
    pub async fn prepare_to_connect(&self) {
        let mut inner = self.inner.lock().await;

        if !self.properties.has_connected() {
            self.alerts.push(Advisory::FirstTimeConnecting);
            inner.first_time_shown = true;
        }

        inner.pending = None;
        inner.cancel_stuck_timer();
        inner.attempting = true;
        inner.attempt_id += 1;
        info!("Preparing connection (attempt {})", inner.attempt_id);

        self.transition(&mut inner, AppState::PreparingConnection);
    }

    /// Start the tunnel for `configuration`.
    ///
    /// A running tunnel is stopped first and the start happens once it
    /// reports `Disconnected`.
    pub async fn connect(&self, configuration: ConnectionConfiguration) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().await;

        if let AppState::Aborted { .. } = inner.state {
            warn!("Ignoring connect request, attempt was aborted");
            return Err(ConnectionError::Aborted);
        }

        if !configuration.decision.has_ports() {
            let error = ConnectionError::NoAvailablePorts;
            warn!(
                "Cannot connect to {} over {}: {}",
                configuration.server_id, configuration.decision.protocol, error
            );
            inner.end_attempt();
            if inner.tunnel_active() {
                debug!("Tearing down the previous tunnel, nothing to replace it with");
                self.tunnel.stop();
            }
            self.transition(&mut inner, AppState::Error(error.clone()));
            self.alerts.push(Advisory::ConnectionFailed(error.clone()));
            return Err(error);
        }

        if !inner.attempting {
            inner.attempting = true;
            inner.attempt_id += 1;
        }
        inner.descriptor = Some(configuration.descriptor.clone());
        self.start_stuck_timer(&mut inner);

        info!(
            "Connecting to {} over {}",
            configuration.server_id, configuration.decision
        );

        if inner.tunnel_active() {
            debug!("Tunnel still up, stopping it before connecting");
            inner.pending = Some(configuration);
            self.tunnel.stop();
        } else {
            inner.pending = None;
            self.tunnel.start(configuration);
        }

        Ok(())
    }

    /// Prepare, probe `target`, then connect with the winning protocol.
    pub async fn connect_with_smart_protocol(
        &self,
        smart: &SmartProtocol,
        target: &ServerProbeTarget,
        descriptor: ServerDescriptor,
    ) -> Result<ProtocolDecision, ConnectionError> {
        self.prepare_to_connect().await;

        let decision = smart.determine_best_protocol(target).await;

        if !self.is_attempting().await {
            debug!("Attempt ended while probing, not connecting");
            return Err(ConnectionError::Aborted);
        }

        let configuration = ConnectionConfiguration::new(target.server_id.clone(), descriptor, decision.clone());
        self.connect(configuration).await?;
        Ok(decision)
    }

    /// Tear the tunnel down and end any attempt.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        info!("Disconnect requested");

        inner.end_attempt();

        let descriptor = match inner.state.descriptor() {
            Some(d) => Some(d.clone()),
            None if inner.tunnel_active() => inner.descriptor.clone(),
            None => None,
        };

        match descriptor {
            Some(d) => self.transition(&mut inner, AppState::Disconnecting(d)),
            None if !inner.state.is_stable() => self.transition(&mut inner, AppState::Disconnected),
            None => {}
        }

        self.tunnel.stop();
    }

    /// Abort the attempt in flight.
    pub async fn cancel_connection_attempt(&self, user_initiated: bool) {
        let mut inner = self.inner.lock().await;
        info!("Connection attempt cancelled (user initiated: {})", user_initiated);

        inner.end_attempt();
        self.transition(&mut inner, AppState::Aborted { user_initiated });

        self.tunnel.stop();
    }

    /// Feed one tunnel status callback into the state machine.
    pub async fn handle_tunnel_status(&self, status: TunnelStatus) {
        let mut inner = self.inner.lock().await;
        debug!("Tunnel status: {}", status);

        if let TunnelStatus::Error(error) = &status {
            if !inner.status_seen {
                warn!("Suppressing first tunnel error: {}", error);
                inner.status_seen = true;
                inner.tunnel_status = Some(status);
                inner.end_attempt();
                self.transition(&mut inner, AppState::Disconnected);
                return;
            }
        }

        inner.tunnel_status = Some(status.clone());

        match status {
            TunnelStatus::Connecting(d) => {
                inner.descriptor = Some(d.clone());
                self.transition(&mut inner, AppState::Connecting(d));
            }
            TunnelStatus::Connected(d) => {
                inner.end_attempt();
                if inner.first_time_shown {
                    inner.first_time_shown = false;
                    self.alerts.dismiss(&Advisory::FirstTimeConnecting);
                }

                let now = SystemTime::now();
                inner.connected_at = Some(now);
                self.properties.set_has_connected(true);
                self.properties.set_last_connected(now);

                info!("Connected to {}", d);
                self.transition(&mut inner, AppState::Connected(d));
            }
            TunnelStatus::Reasserting(_) => {
                debug!("Tunnel reasserting, keeping {}", inner.state);
            }
            TunnelStatus::Disconnecting(d) => {
                if !inner.attempting {
                    self.transition(&mut inner, AppState::Disconnecting(d));
                } else if let AppState::Connecting(_) = inner.state {
                    info!("Tunnel went down while connecting, stopping attempt");
                    inner.end_attempt();
                } else {
                    self.transition(&mut inner, AppState::PreparingConnection);
                }
            }
            TunnelStatus::Disconnected => {
                inner.connected_at = None;
                if inner.attempting {
                    self.transition(&mut inner, AppState::PreparingConnection);
                    if let Some(configuration) = inner.pending.take() {
                        debug!("Previous tunnel down, starting {}", configuration.server_id);
                        self.tunnel.start(configuration);
                    }
                } else {
                    inner.cancel_stuck_timer();
                    self.transition(&mut inner, AppState::Disconnected);
                }
            }
            TunnelStatus::Error(error) => {
                warn!("Connection failed: {}", error);
                inner.end_attempt();
                self.transition(&mut inner, AppState::Error(error.clone()));
                self.alerts.push(Advisory::ConnectionFailed(error));
            }
        }

        inner.status_seen = true;
    }

    /// Drive the manager from a stream of tunnel statuses.
    pub fn spawn_status_listener(&self, mut statuses: mpsc::Receiver<TunnelStatus>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                manager.handle_tunnel_status(status).await;
            }
            debug!("Tunnel status stream closed");
        })
    }

    /// Publish `next`, going through the intermediate state when the hop
    /// is not legal on its own.
    fn transition(&self, inner: &mut Inner, next: AppState) {
        if inner.state == next {
            return;
        }

        if !inner.state.can_transition_to(&next) {
            let bridge = match (&inner.state, &next) {
                (AppState::Connected(d), _) => Some(AppState::Disconnecting(d.clone())),
                (_, AppState::Connected(d)) => Some(AppState::Connecting(d.clone())),
                _ => None,
            };
            if let Some(bridge) = bridge {
                self.publish(inner, bridge);
            }
        }

        self.publish(inner, next);
    }

    fn publish(&self, inner: &mut Inner, next: AppState) {
        debug!("App state: {} -> {}", inner.state, next);

        if inner.state.is_stable() && !next.is_stable() {
            inner.status_seen = false;
        }

        inner.state = next.clone();
        let _ = self.changes.send(next);
    }

    fn start_stuck_timer(&self, inner: &mut Inner) {
        inner.cancel_stuck_timer();

        let manager = self.clone();
        let attempt = inner.attempt_id;
        let budget = self.config.stuck_timeout();

        inner.stuck_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            manager.stuck_timer_fired(attempt).await;
        }));
    }

    async fn stuck_timer_fired(&self, attempt: u64) {
        let mut inner = self.inner.lock().await;
        if inner.attempt_id != attempt {
            debug!("Stale stuck timer for attempt {}", attempt);
            return;
        }
        inner.stuck_timer = None;

        let still_trying = matches!(inner.state, AppState::PreparingConnection | AppState::Connecting(_));
        if !inner.attempting || !still_trying {
            debug!("Attempt {} settled before its stuck timer fired", attempt);
            return;
        }

        warn!(
            "Connection attempt {} has not settled after {:?}",
            attempt,
            self.config.stuck_timeout()
        );

        // First-timers already saw FirstTimeConnecting
        if self.properties.has_connected() {
            self.alerts.push(Advisory::StuckConnection);
        }
    }
}
