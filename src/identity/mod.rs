use tracing::debug;

use crate::transcript::Session;

/// Where a conversation stands with respect to its server-assigned identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdentityState {
    /// Brand new, no turn completed.
    #[default]
    Unidentified,
    /// A turn is streaming and no `meta` event has confirmed an id yet.
    Pending,
    Identified(String),
}

/// Keeps the externally visible identifier (deep link / history key) in step
/// with the one adopted by the session.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    state: IdentityState,
    fresh_requested: bool,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &IdentityState {
        &self.state
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match &self.state {
            IdentityState::Identified(id) => Some(id),
            _ => None,
        }
    }

    /// Explicit "new conversation": back to unidentified whatever came before.
    pub fn start_new(&mut self) {
        self.state = IdentityState::Unidentified;
        self.fresh_requested = true;
    }

    /// Navigation to a persisted conversation withdraws a pending "new" request.
    pub fn resume(&mut self) {
        self.fresh_requested = false;
        self.end_turn();
    }

    pub fn begin_turn(&mut self) {
        if self.state == IdentityState::Unidentified {
            self.state = IdentityState::Pending;
        }
    }

    /// A turn that finished without any `meta` leaves the conversation unidentified.
    pub fn end_turn(&mut self) {
        if self.state == IdentityState::Pending {
            self.state = IdentityState::Unidentified;
        }
    }

    /// Adopts the session's identifier. Returns true when the visible identifier changed.
    pub fn sync(&mut self, session: &Session) -> bool {
        match session.conversation_id.as_deref() {
            Some(id) if self.conversation_id() != Some(id) => {
                debug!("Conversation identified as {id}");
                self.state = IdentityState::Identified(id.to_string());
                self.fresh_requested = false;
                true
            }
            Some(_) => false,
            None => match self.state {
                IdentityState::Identified(_) => {
                    self.state = IdentityState::Unidentified;
                    true
                }
                _ => false,
            },
        }
    }

    /// Query string that reopens the current conversation.
    pub fn deep_link(&self) -> String {
        match &self.state {
            IdentityState::Identified(id) => format!("?id={id}"),
            _ if self.fresh_requested => "?new=true".to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_without_meta_returns_to_unidentified() {
        let mut resolver = IdentityResolver::new();
        resolver.begin_turn();
        assert_eq!(resolver.state(), &IdentityState::Pending);
        resolver.end_turn();
        assert_eq!(resolver.state(), &IdentityState::Unidentified);
    }

    #[test]
    fn sync_adopts_session_id_and_updates_link() {
        let mut resolver = IdentityResolver::new();
        resolver.start_new();
        assert_eq!(resolver.deep_link(), "?new=true");

        resolver.begin_turn();
        let session = Session::identified("c-42");
        assert!(resolver.sync(&session));
        assert!(!resolver.sync(&session));
        assert_eq!(resolver.conversation_id(), Some("c-42"));
        assert_eq!(resolver.deep_link(), "?id=c-42");

        // Identified is sticky across turn end.
        resolver.end_turn();
        assert_eq!(resolver.state(), &IdentityState::Identified("c-42".to_string()));
    }

    #[test]
    fn resume_drops_the_fresh_link() {
        let mut resolver = IdentityResolver::new();
        resolver.start_new();
        resolver.begin_turn();
        resolver.resume();
        assert_eq!(resolver.state(), &IdentityState::Unidentified);
        assert_eq!(resolver.deep_link(), "");
    }

    #[test]
    fn start_new_forces_unidentified() {
        let mut resolver = IdentityResolver::new();
        resolver.sync(&Session::identified("x"));
        resolver.start_new();
        assert_eq!(resolver.state(), &IdentityState::Unidentified);
        assert_eq!(resolver.conversation_id(), None);
    }
}
