//! Connection finite-state machine (FSM) types.
//!
//! Transitions live in [`crate::connection`]; this module only names the
//! states.
//!
//! ```text
//!  CONNECTING ──Handshake reply──▶ ESTABLISHED ──disconnect()──▶ DISCONNECTING
//!      │                               │                              │
//!      │ timeout                       │ Disconnect rcvd / dead link  │ drained or
//!      ▼                               ▼ idle timeout / congestion    ▼ flush ticks spent
//!    CLOSED ◀──────────────────────── CLOSED ◀─────────────────────── CLOSED
//! ```
//!
//! Server-side connections are created directly in `Established`.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Client sent `Handshake`; waiting for the server's reply.
    #[default]
    Connecting,
    /// Data transfer in progress.
    Established,
    /// Local close requested; draining queued data before `Disconnect`.
    Disconnecting,
    /// Terminal. The owner removes the connection on its next tick.
    Closed,
}

impl ConnectionState {
    /// Whether application data may still be queued.
    pub fn accepts_sends(self) -> bool {
        matches!(self, Self::Established)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_established_accepts_sends() {
        assert!(ConnectionState::Established.accepts_sends());
        assert!(!ConnectionState::Connecting.accepts_sends());
        assert!(!ConnectionState::Disconnecting.accepts_sends());
        assert!(!ConnectionState::Closed.accepts_sends());
    }

    #[test]
    fn default_is_connecting() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }
}
