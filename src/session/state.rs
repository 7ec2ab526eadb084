//! Session lifecycle state machine
//!
//! Tracks a session from negotiation to termination. Transitions are reported
//! by the negotiation layer; the relay only reacts to them.

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Offer accepted, transport not yet established
    Negotiating,
    /// Transport established, media can flow
    Connected,
    /// Transport lost
    Disconnected,
    /// Transport could not be established or broke irrecoverably
    Failed,
    /// Peer connection closed
    Closed,
}

impl SessionState {
    /// Whether this state ends the session
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Failed | SessionState::Closed
        )
    }

    /// Whether frames may be written in this state
    pub fn is_active(self) -> bool {
        self == SessionState::Connected
    }

    /// Whether a session in this state may move to `next`
    ///
    /// Terminal states are final.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        !self.is_terminal() && self != next
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
