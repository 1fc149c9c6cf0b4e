use tracing::warn;
use uuid::Uuid;

use crate::models::{TranscriptMessage, Vote};

/// Phase label shown before a debate has started.
pub const READY_PHASE: &str = "Hazır";

/// Ordered message list with at most one optimistic placeholder.
///
/// Entries are identified by position only; nothing is ever reordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<TranscriptMessage>,
    placeholder: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn append(&mut self, message: TranscriptMessage) {
        if message.is_placeholder {
            self.insert_placeholder();
            return;
        }
        self.messages.push(message);
    }

    /// Adds the "awaiting first response" entry. A second placeholder is never created.
    pub fn insert_placeholder(&mut self) {
        if self.placeholder.is_some() {
            warn!("Placeholder already present; not inserting another");
            return;
        }
        self.placeholder = Some(self.messages.len());
        self.messages.push(TranscriptMessage::placeholder());
    }

    /// Equivalent to "remove the placeholder, then append `message`". When the
    /// placeholder is the last entry (the normal case) it is overwritten in place.
    pub fn replace_placeholder(&mut self, message: TranscriptMessage) {
        match self.placeholder.take() {
            Some(index) if index + 1 == self.messages.len() => self.messages[index] = message,
            Some(index) => {
                self.messages.remove(index);
                self.messages.push(message);
            }
            None => self.messages.push(message),
        }
    }

    /// Drops the placeholder if one is pending. Returns whether one was removed.
    pub fn clear_placeholder(&mut self) -> bool {
        match self.placeholder.take() {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Atomic swap of the whole list; any pending placeholder is discarded.
    pub fn load_wholesale(&mut self, messages: Vec<TranscriptMessage>) {
        self.messages = messages.into_iter().filter(|m| !m.is_placeholder).collect();
        self.placeholder = None;
    }
}

/// Full client-side state of one logical conversation.
///
/// `instance` tags this particular session object; streams opened for it carry
/// the tag so events arriving after navigation can be recognized and dropped.
#[derive(Debug, Clone)]
pub struct Session {
    instance: Uuid,
    pub conversation_id: Option<String>,
    pub phase: String,
    pub votes: Option<Vec<Vote>>,
    pub transcript: Transcript,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Fresh-chat state: no identifier, empty transcript, ready phase.
    pub fn new() -> Self {
        Self {
            instance: Uuid::new_v4(),
            conversation_id: None,
            phase: READY_PHASE.to_string(),
            votes: None,
            transcript: Transcript::new(),
        }
    }

    /// An identified conversation that has no turns yet.
    pub fn identified(conversation_id: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.conversation_id = Some(conversation_id.into());
        session
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Gives this session a new instance tag, disowning every stream opened so far.
    pub fn retag(&mut self) {
        self.instance = Uuid::new_v4();
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        self.transcript.messages()
    }

    pub fn append(&mut self, message: TranscriptMessage) {
        self.transcript.append(message);
    }

    pub fn insert_placeholder(&mut self) {
        self.transcript.insert_placeholder();
    }

    pub fn replace_placeholder(&mut self, message: TranscriptMessage) {
        self.transcript.replace_placeholder(message);
    }

    pub fn clear_placeholder(&mut self) -> bool {
        self.transcript.clear_placeholder()
    }

    pub fn set_phase(&mut self, label: impl Into<String>) {
        self.phase = label.into();
    }

    pub fn set_votes(&mut self, votes: Vec<Vote>) {
        self.votes = Some(votes);
    }

    pub fn reset_votes(&mut self) {
        self.votes = None;
    }

    pub fn load_wholesale(&mut self, messages: Vec<TranscriptMessage>) {
        self.transcript.load_wholesale(messages);
    }
}
