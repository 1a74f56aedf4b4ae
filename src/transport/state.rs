use serde::Serialize;
use std::fmt;

/// Link lifecycle, one per role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Advertising,
    Scanning,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Legal edges: `Idle → Advertising|Scanning → Connecting → Connected`,
    /// `Idle → Connecting` for a reconnect to a known peer, and any state
    /// back to `Idle`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Advertising)
                | (Idle, Scanning)
                | (Advertising, Connecting)
                | (Scanning, Connecting)
                | (Idle, Connecting)
                | (Connecting, Connected)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Apply `next` if the edge is legal. Illegal edges are logged and ignored.
pub(crate) fn transition(role: &str, state: &mut ConnectionState, next: ConnectionState) -> bool {
    if *state == next {
        return false;
    }
    if !state.can_transition_to(next) {
        log::error!("[link] {}: illegal transition {} -> {}", role, state, next);
        return false;
    }
    log::info!("[link] {}: {} -> {}", role, state, next);
    *state = next;
    true
}
