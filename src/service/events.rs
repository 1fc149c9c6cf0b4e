use tracing::{debug, warn};

use crate::decoder::parse_event_value;
use crate::models::{Event, Role, TranscriptMessage, Vote};
use crate::transcript::Session;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// An `end` event arrived.
    Completed,
    /// The server reported an error; the text is in the transcript.
    ServerError(String),
    /// The transport failed mid-read. Already-applied events are kept.
    Aborted(String),
    /// The body ended without an `end` event.
    SourceClosed,
    /// The session the turn belonged to is no longer the active one.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnFlow {
    Continue,
    Finished(TurnOutcome),
}

/// Applies one decoded event to `session`. No I/O; the caller decides what a
/// finished turn means for its own state.
pub fn apply_event(session: &mut Session, event: Event) -> TurnFlow {
    match event {
        Event::Message { role, content, agent_name, confidence } => {
            let agent_name = match role {
                Role::Assistant => agent_name,
                _ => Some(role.label().to_string()),
            };
            let message = TranscriptMessage::new(role, content)
                .with_agent_name(agent_name)
                .with_confidence(confidence);
            session.replace_placeholder(message);
            TurnFlow::Continue
        }
        Event::Meta { conversation_id: Some(id) } => {
            if let Some(current) = session.conversation_id.as_deref() {
                if current != id {
                    warn!("Conversation id changed from {current} to {id}; keeping the latest");
                }
            }
            session.conversation_id = Some(id);
            TurnFlow::Continue
        }
        Event::Meta { conversation_id: None } => {
            debug!("Meta event without a conversation id");
            TurnFlow::Continue
        }
        Event::Typing { .. } => TurnFlow::Continue,
        Event::VoteResults { votes } => {
            session.set_votes(votes);
            TurnFlow::Continue
        }
        Event::Phase { phase } => {
            session.set_phase(phase);
            TurnFlow::Continue
        }
        Event::Error { error } => {
            session.replace_placeholder(TranscriptMessage::system(format!("Error: {error}")));
            TurnFlow::Finished(TurnOutcome::ServerError(error))
        }
        Event::End { .. } => {
            session.clear_placeholder();
            TurnFlow::Finished(TurnOutcome::Completed)
        }
    }
}

/// Transcript and vote tally rebuilt from persisted history entries.
#[derive(Debug, Default)]
pub struct HistorySeed {
    pub messages: Vec<TranscriptMessage>,
    pub votes: Option<Vec<Vote>>,
}

pub fn seed_from_history(entries: Vec<serde_json::Value>) -> HistorySeed {
    let mut seed = HistorySeed::default();
    for entry in entries {
        match parse_event_value(entry) {
            Ok(Some(Event::Message { role, content, agent_name, confidence })) => {
                let agent_name = agent_name.or_else(|| Some(role.label().to_string()));
                seed.messages.push(
                    TranscriptMessage::new(role, content)
                        .with_agent_name(agent_name)
                        .with_confidence(confidence),
                );
            }
            Ok(Some(Event::VoteResults { votes })) => seed.votes = Some(votes),
            Ok(Some(other)) => debug!("Skipping '{}' entry in history", other.kind()),
            Ok(None) => debug!("Skipping unrecognized history entry"),
            Err(e) => warn!("Skipping malformed history entry: {e}"),
        }
    }
    seed
}
