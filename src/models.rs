use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Label the placeholder entry is shown under while the council has not answered yet.
pub const PLACEHOLDER_AGENT: &str = "Sistem";

const CONTEXT_MARKER: &str = "EK BAĞLAM";
const CONTEXT_SEPARATOR: &str = " | ";

// ── Roles ────────────────────────────────────────────────────────────────────

/// Speaker of a transcript entry.
///
/// The wire carries free text: the three well-known roles are matched
/// case-insensitively, anything else (a persona name, a localized "Sistem")
/// is kept verbatim as a named speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
    Speaker(String),
}

impl Role {
    pub fn label(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Speaker(name) => name,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::Speaker(s),
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role::from(s.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Speaker(name) => name,
            other => other.label().to_string(),
        }
    }
}

// ── Votes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vote {
    #[serde(deserialize_with = "lenient_text")]
    pub agent: String,
    #[serde(deserialize_with = "lenient_text")]
    pub persona: String,
    #[serde(deserialize_with = "lenient_text")]
    pub decision: String,
    #[serde(deserialize_with = "lenient_text")]
    pub reason: String,
}

/// Model-written vote fields may be null or non-string; keep their text
/// instead of losing the whole ballot.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

/// Presentation grouping of a free-form decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteBucket {
    Accept,
    Reject,
    Neutral,
}

impl Vote {
    /// Substring heuristic over the upper-cased decision; accept tokens win ties.
    pub fn bucket(&self) -> VoteBucket {
        let normalized = self.decision.trim().to_uppercase();
        if normalized.contains("KABUL") || normalized.contains("EVET") {
            VoteBucket::Accept
        } else if normalized.contains("RED") || normalized.contains("HAYIR") {
            VoteBucket::Reject
        } else {
            VoteBucket::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCount {
    pub decision: String,
    pub count: usize,
    pub bucket: VoteBucket,
}

/// Distinct decisions with their counts, in order of first appearance.
pub fn tally(votes: &[Vote]) -> Vec<DecisionCount> {
    let mut counts: Vec<DecisionCount> = Vec::new();
    for vote in votes {
        match counts.iter_mut().find(|c| c.decision == vote.decision) {
            Some(entry) => entry.count += 1,
            None => counts.push(DecisionCount {
                decision: vote.decision.clone(),
                count: 1,
                bucket: vote.bucket(),
            }),
        }
    }
    counts
}

// ── Stream events ────────────────────────────────────────────────────────────

/// One decoded, semantically typed unit of the council stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message {
        role: Role,
        content: String,
        agent_name: Option<String>,
        confidence: Option<u8>,
    },
    Meta { conversation_id: Option<String> },
    /// Reserved: an agent is composing. Never rendered.
    Typing { agent: Option<String> },
    VoteResults { votes: Vec<Vote> },
    Phase { phase: String },
    Error { error: String },
    End { reason: Option<String> },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Message { .. } => "message",
            Event::Meta { .. } => "meta",
            Event::Typing { .. } => "typing",
            Event::VoteResults { .. } => "vote_results",
            Event::Phase { .. } => "phase",
            Event::Error { .. } => "error",
            Event::End { .. } => "end",
        }
    }
}

// ── Transcript ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
    pub agent_name: Option<String>,
    pub confidence: Option<u8>,
    pub is_placeholder: bool,
}

impl TranscriptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            agent_name: None,
            confidence: None,
            is_placeholder: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::System, content);
        msg.agent_name = Some(Role::System.label().to_string());
        msg
    }

    /// "Awaiting first response" entry for the active turn.
    pub fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            agent_name: Some(PLACEHOLDER_AGENT.to_string()),
            confidence: None,
            is_placeholder: true,
        }
    }

    pub fn with_agent_name(mut self, agent_name: Option<String>) -> Self {
        self.agent_name = agent_name;
        self
    }

    pub fn with_confidence(mut self, confidence: Option<u8>) -> Self {
        self.confidence = confidence;
        self
    }

    /// Name shown next to the entry.
    pub fn speaker(&self) -> &str {
        self.agent_name.as_deref().unwrap_or_else(|| self.role.label())
    }
}

// ── Outbound request ─────────────────────────────────────────────────────────

/// Organization snapshot sent with every turn as `company_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationContext {
    pub name: String,
    pub industry: String,
    pub description: String,
    pub website_url: String,
}

/// Optional pre-debate details appended to the next submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextDetails {
    pub budget: String,
    pub timeline: String,
    pub constraints: String,
}

impl ContextDetails {
    pub fn is_empty(&self) -> bool {
        self.budget.trim().is_empty()
            && self.timeline.trim().is_empty()
            && self.constraints.trim().is_empty()
    }

    /// Appends the bracketed context block to `input`, or returns it untouched
    /// when no field is filled in.
    pub fn annotate(&self, input: &str) -> String {
        let parts: Vec<String> = [
            ("Bütçe", &self.budget),
            ("Süre", &self.timeline),
            ("Kısıtlar", &self.constraints),
        ]
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(label, value)| format!("{label}: {}", value.trim()))
        .collect();

        if parts.is_empty() {
            input.to_string()
        } else {
            format!("{input}\n\n[{CONTEXT_MARKER}: {}]", parts.join(CONTEXT_SEPARATOR))
        }
    }
}

/// Request body for the streaming turn endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub message: String,
    pub company_info: OrganizationContext,
    pub image: Option<String>,
    pub conversation_id: Option<String>,
}

// ── History / conversation list ──────────────────────────────────────────────

/// Response of the history endpoint. Entries are event-shaped objects and are
/// decoded with the same rules as stream lines.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ConversationSummary {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => "Untitled debate",
        }
    }
}

/// Timestamps that fail to parse are dropped rather than failing the whole list.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }))
}
