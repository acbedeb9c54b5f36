//! Connection State Machine
//!
//! `AppState` is the single authoritative answer to "are we connected?".
//! It is owned and mutated by [`AppStateManager`](crate::AppStateManager);
//! everything else only observes clones of it.
//!
//! # Transitions
//!
//! ```text
//! Disconnected ─▶ PreparingConnection ─▶ Connecting ─▶ Connected
//!      ▲                  ▲                  │             │
//!      │                  └──────────────────┤             ▼
//!      └──────────────────────────────── Disconnecting ◀───┘
//!
//! Connecting ─▶ Error | Aborted | Disconnecting | PreparingConnection
//! Connected  ─▶ Disconnecting | PreparingConnection   (nothing else)
//! ```

use std::fmt;

/// Opaque identifier of the server/credentials pair in use.
///
/// Passed through the state machine, never interpreted by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServerDescriptor {
    /// VPN username
    pub username: String,
    /// Server address the tunnel points at
    pub address: String,
}

impl ServerDescriptor {
    /// Create a new descriptor
    pub fn new(username: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.address)
    }
}

/// Connection attempt failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("No port answered for the selected protocol")]
    NoAvailablePorts,

    #[error("Connection attempt was aborted")]
    Aborted,

    #[error("Tunnel error: {0}")]
    Tunnel(String),
}

/// Application connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    /// Idle, no tunnel
    Disconnected,
    /// A connection was requested; protocol selection / teardown in progress
    PreparingConnection,
    /// Tunnel is being brought up
    Connecting(ServerDescriptor),
    /// Tunnel is up
    Connected(ServerDescriptor),
    /// Tunnel is going down
    Disconnecting(ServerDescriptor),
    /// Attempt was cancelled
    Aborted { user_initiated: bool },
    /// Attempt failed
    Error(ConnectionError),
}

impl Default for AppState {
    fn default() -> Self {
        AppState::Disconnected
    }
}

impl AppState {
    /// True only while the tunnel is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, AppState::Connected(_))
    }

    /// True for every state that gives no connectivity guarantee.
    ///
    /// `Disconnecting` is deliberately neither connected nor disconnected.
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            AppState::Disconnected
                | AppState::PreparingConnection
                | AppState::Connecting(_)
                | AppState::Aborted { .. }
                | AppState::Error(_)
        )
    }

    /// States the system does not leave on its own.
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            AppState::Disconnected
                | AppState::Connected(_)
                | AppState::Aborted { .. }
                | AppState::Error(_)
        )
    }

    /// States from which the process may be torn down, or a new attempt
    /// started, without disconnecting first.
    pub fn is_safe_to_end(&self) -> bool {
        matches!(
            self,
            AppState::Disconnected
                | AppState::PreparingConnection
                | AppState::Aborted { .. }
                | AppState::Error(_)
        )
    }

    /// Descriptor carried by the tunnel-bound states
    pub fn descriptor(&self) -> Option<&ServerDescriptor> {
        match self {
            AppState::Connecting(d) | AppState::Connected(d) | AppState::Disconnecting(d) => Some(d),
            _ => None,
        }
    }

    /// Check the legal-transition table.
    ///
    /// `Connected` can only be entered from `Connecting` and only be left
    /// towards `Disconnecting` or `PreparingConnection`. Staying in the same
    /// variant is always allowed.
    pub fn can_transition_to(&self, next: &AppState) -> bool {
        if std::mem::discriminant(self) == std::mem::discriminant(next) {
            return true;
        }

        match (self, next) {
            (AppState::Connected(_), AppState::Disconnecting(_) | AppState::PreparingConnection) => true,
            (AppState::Connected(_), _) => false,
            (AppState::Connecting(_), AppState::Connected(_)) => true,
            (_, AppState::Connected(_)) => false,
            _ => true,
        }
    }

    /// Short lowercase name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            AppState::Disconnected => "disconnected",
            AppState::PreparingConnection => "preparingConnection",
            AppState::Connecting(_) => "connecting",
            AppState::Connected(_) => "connected",
            AppState::Disconnecting(_) => "disconnecting",
            AppState::Aborted { .. } => "aborted",
            AppState::Error(_) => "error",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Connecting(d) | AppState::Connected(d) | AppState::Disconnecting(d) => {
                write!(f, "{} ({})", self.name(), d)
            }
            AppState::Aborted { user_initiated } => {
                write!(f, "aborted (user initiated: {})", user_initiated)
            }
            AppState::Error(e) => write!(f, "error ({})", e),
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> ServerDescriptor {
        ServerDescriptor::new("user", "10.0.0.1")
    }

    fn all_states() -> Vec<AppState> {
        vec![
            AppState::Disconnected,
            AppState::PreparingConnection,
            AppState::Connecting(desc()),
            AppState::Connected(desc()),
            AppState::Disconnecting(desc()),
            AppState::Aborted { user_initiated: true },
            AppState::Error(ConnectionError::NoAvailablePorts),
        ]
    }

    #[test]
    fn test_connected_predicates() {
        let state = AppState::Connected(desc());
        assert!(state.is_connected());
        assert!(!state.is_disconnected());
        assert!(state.is_stable());
        assert!(!state.is_safe_to_end());
    }

    #[test]
    fn test_disconnecting_is_neither() {
        let state = AppState::Disconnecting(desc());
        assert!(!state.is_connected());
        assert!(!state.is_disconnected());
        assert!(!state.is_stable());
        assert!(!state.is_safe_to_end());
    }

    #[test]
    fn test_only_connected_is_connected() {
        for state in all_states() {
            assert_eq!(state.is_connected(), matches!(state, AppState::Connected(_)));
        }
    }

    #[test]
    fn test_stable_and_safe_to_end() {
        let stable: Vec<_> = all_states().into_iter().filter(|s| s.is_stable()).map(|s| s.name()).collect();
        assert_eq!(stable, vec!["disconnected", "connected", "aborted", "error"]);

        let safe: Vec<_> = all_states().into_iter().filter(|s| s.is_safe_to_end()).map(|s| s.name()).collect();
        assert_eq!(safe, vec!["disconnected", "preparingConnection", "aborted", "error"]);
    }

    #[test]
    fn test_aborted_is_disconnected() {
        let state = AppState::Aborted { user_initiated: true };
        assert!(state.is_disconnected());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            AppState::Disconnected,
            AppState::PreparingConnection,
            AppState::Connecting(desc()),
            AppState::Connected(desc()),
            AppState::Disconnecting(desc()),
            AppState::Disconnected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_connected_exits() {
        let connected = AppState::Connected(desc());
        assert!(connected.can_transition_to(&AppState::Disconnecting(desc())));
        assert!(connected.can_transition_to(&AppState::PreparingConnection));
        assert!(!connected.can_transition_to(&AppState::Disconnected));
        assert!(!connected.can_transition_to(&AppState::Error(ConnectionError::Aborted)));
        assert!(!connected.can_transition_to(&AppState::Aborted { user_initiated: true }));
    }

    #[test]
    fn test_connecting_exits() {
        let connecting = AppState::Connecting(desc());
        for next in [
            AppState::Disconnecting(desc()),
            AppState::Error(ConnectionError::Tunnel("x".into())),
            AppState::Aborted { user_initiated: false },
            AppState::PreparingConnection,
            AppState::Connected(desc()),
        ] {
            assert!(connecting.can_transition_to(&next), "connecting -> {}", next);
        }
    }

    #[test]
    fn test_connected_only_from_connecting() {
        assert!(!AppState::Disconnected.can_transition_to(&AppState::Connected(desc())));
        assert!(!AppState::PreparingConnection.can_transition_to(&AppState::Connected(desc())));
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(AppState::Connecting(desc()).descriptor(), Some(&desc()));
        assert_eq!(AppState::Disconnected.descriptor(), None);
    }
}
