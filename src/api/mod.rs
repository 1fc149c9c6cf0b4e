pub mod http;

use async_trait::async_trait;

use crate::decoder::EventStream;
use crate::errors::ClientError;
use crate::models::{ConversationSummary, HistoryPage, TurnRequest};

pub use http::HttpCouncilApi;

/// Outbound calls the conversation controller depends on.
#[async_trait]
pub trait CouncilApi: Send + Sync {
    /// Opens the streaming request for one turn. An error here means the
    /// stream never started.
    async fn submit_turn(&self, request: TurnRequest) -> Result<EventStream, ClientError>;

    /// Persisted history; `None` asks for the most recent conversation.
    async fn fetch_history(&self, conversation_id: Option<&str>) -> Result<HistoryPage, ClientError>;

    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError>;
}
