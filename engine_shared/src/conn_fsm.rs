//! Connection state machine shared by client and server.
//!
//! Both sides walk the same five states; the server just mirrors one
//! instance per connecting peer instead of a single instance for "the"
//! connection.

use crate::wire::DisconnectReason;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No session. Initial state, and final state after any disconnect.
    Disconnected,
    /// Handshake sent/received, protocol version being negotiated.
    Connecting,
    /// Handshake agreed; waiting on credential exchange.
    Authenticating,
    /// Fully joined: input/snapshot flow is active.
    Connected,
    /// Disconnect initiated locally or by the remote; draining in-flight state.
    Disconnecting,
}

/// A requested transition the current state doesn't allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot go from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub from: ConnState,
    pub to: ConnState,
}

/// Events that drive the state machine. Distinct from `wire::Message` so the
/// FSM doesn't need to know about envelope/ack details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    HandshakeSent,
    HandshakeAccepted,
    AuthSucceeded,
    AuthRejected,
    DisconnectRequested,
    RemoteDisconnected,
    TimedOut,
    DrainComplete,
}

/// Owns one side's view of the connection lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionFsm {
    state: ConnState,
    last_reason: Option<DisconnectReason>,
}

impl Default for ConnectionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFsm {
    pub fn new() -> Self {
        Self {
            state: ConnState::Disconnected,
            last_reason: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn last_disconnect_reason(&self) -> Option<DisconnectReason> {
        self.last_reason
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// Applies `event`, returning the new state or the illegal transition it
    /// would have required.
    pub fn apply(&mut self, event: ConnEvent) -> Result<ConnState, IllegalTransition> {
        use ConnEvent::*;
        use ConnState::*;

        let next = match (self.state, event) {
            (Disconnected, HandshakeSent) => Connecting,
            (Connecting, HandshakeAccepted) => Authenticating,
            (Authenticating, AuthSucceeded) => Connected,
            (Authenticating, AuthRejected) => {
                self.last_reason = Some(DisconnectReason::AuthRejected);
                Disconnecting
            }
            (Connecting | Authenticating | Connected, DisconnectRequested) => {
                self.last_reason = Some(DisconnectReason::ClientQuit);
                Disconnecting
            }
            (Connecting | Authenticating | Connected, RemoteDisconnected) => {
                self.last_reason = Some(DisconnectReason::ClientQuit);
                Disconnecting
            }
            (Connecting | Authenticating | Connected, TimedOut) => {
                self.last_reason = Some(DisconnectReason::Timeout);
                Disconnecting
            }
            (Disconnecting, DrainComplete) => Disconnected,
            (from, to_event) => {
                return Err(IllegalTransition {
                    from,
                    to: target_hint(to_event),
                })
            }
        };

        self.state = next;
        Ok(next)
    }

    /// Forces an immediate, reason-carrying disconnect regardless of current
    /// state (e.g. a protocol error or a kicked-for-cheating decision).
    pub fn force_disconnect(&mut self, reason: DisconnectReason) {
        self.last_reason = Some(reason);
        self.state = ConnState::Disconnecting;
    }
}

/// Best-effort label for the state an event was aiming at, for error messages only.
fn target_hint(event: ConnEvent) -> ConnState {
    match event {
        ConnEvent::HandshakeSent => ConnState::Connecting,
        ConnEvent::HandshakeAccepted => ConnState::Authenticating,
        ConnEvent::AuthSucceeded => ConnState::Connected,
        ConnEvent::AuthRejected
        | ConnEvent::DisconnectRequested
        | ConnEvent::RemoteDisconnected
        | ConnEvent::TimedOut => ConnState::Disconnecting,
        ConnEvent::DrainComplete => ConnState::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_connected() {
        let mut fsm = ConnectionFsm::new();
        fsm.apply(ConnEvent::HandshakeSent).unwrap();
        fsm.apply(ConnEvent::HandshakeAccepted).unwrap();
        let state = fsm.apply(ConnEvent::AuthSucceeded).unwrap();
        assert_eq!(state, ConnState::Connected);
    }

    #[test]
    fn auth_rejection_routes_through_disconnecting_with_reason() {
        let mut fsm = ConnectionFsm::new();
        fsm.apply(ConnEvent::HandshakeSent).unwrap();
        fsm.apply(ConnEvent::HandshakeAccepted).unwrap();
        fsm.apply(ConnEvent::AuthRejected).unwrap();
        assert_eq!(fsm.state(), ConnState::Disconnecting);
        assert_eq!(fsm.last_disconnect_reason(), Some(DisconnectReason::AuthRejected));
        let state = fsm.apply(ConnEvent::DrainComplete).unwrap();
        assert_eq!(state, ConnState::Disconnected);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut fsm = ConnectionFsm::new();
        let err = fsm.apply(ConnEvent::AuthSucceeded).unwrap_err();
        assert_eq!(err.from, ConnState::Disconnected);
        assert_eq!(fsm.state(), ConnState::Disconnected);
    }

    #[test]
    fn force_disconnect_overrides_any_state() {
        let mut fsm = ConnectionFsm::new();
        fsm.apply(ConnEvent::HandshakeSent).unwrap();
        fsm.force_disconnect(DisconnectReason::Cheat);
        assert_eq!(fsm.state(), ConnState::Disconnecting);
        assert_eq!(fsm.last_disconnect_reason(), Some(DisconnectReason::Cheat));
    }
}
