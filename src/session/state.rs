//! Session lifecycle state

use serde::Serialize;

/// Lifecycle of one peer connection.
///
/// Allowed moves are `Negotiating -> Open -> Closing -> Closed`, plus
/// `Negotiating -> Closing` for peers that never open a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Negotiating, Open) | (Negotiating, Closing) | (Open, Closing) | (Closing, Closed)
        )
    }

    /// Teardown already started or finished
    pub fn is_terminating(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_moves() {
        use SessionState::*;
        assert!(Negotiating.can_transition_to(Open));
        assert!(Negotiating.can_transition_to(Closing));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Negotiating));
        assert!(!Closing.can_transition_to(Closing));
        assert!(!Closed.can_transition_to(Open));
        assert!(Closing.is_terminating() && Closed.is_terminating());
        assert!(!Open.is_terminating());
    }

    #[test]
    fn test_no_skipping_teardown() {
        use SessionState::*;
        assert!(!Negotiating.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Closed));
        assert!(!Negotiating.can_transition_to(Negotiating));
        assert!(!Closed.can_transition_to(Closed));
    }
}
