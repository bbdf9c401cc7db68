//! Connection lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Where a connection is in its lifecycle.
///
/// ```text
///                 ┌──────────────── failed ────────────────┐
///                 ▼                                        │
/// Disconnected → Connecting → Connected → Disconnecting → Disconnected
///                                 │  ▲
///                     drop        ▼  │ success
///                             Reconnecting ── exhausted ──→ Disconnected
/// ```
///
/// - **Disconnected**: no transport, nothing in flight.
/// - **Connecting**: first connection attempt running (transport open and
///   handshake).
/// - **Connected**: handshake done, packets flow.
/// - **Reconnecting**: a previously established connection dropped and the
///   backoff loop is retrying.
/// - **Disconnecting**: the application asked to close; the transport is
///   being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl ConnectionState {
    /// Returns `true` once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a connection exists or is being established.
    /// `connect()` is a no-op in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Disconnecting)
                | (Connected, Reconnecting)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
                | (Reconnecting, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }

    /// Validates a transition and returns the new state.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] if the lifecycle forbids it.
    pub fn transition_to(self, target: Self) -> Result<Self, SessionError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(SessionError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}
