use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use crate::api::CouncilApi;
use crate::config::ClientConfig;
use crate::decoder::{decode_stream, EventStream};
use crate::errors::ClientError;
use crate::models::{ConversationSummary, HistoryPage, TurnRequest};

/// [`CouncilApi`] over HTTP.
#[derive(Clone)]
pub struct HttpCouncilApi {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    request_timeout: Duration,
}

impl HttpCouncilApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            request_timeout: config.request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ClientError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::from_status(url, status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl CouncilApi for HttpCouncilApi {
    async fn submit_turn(&self, request: TurnRequest) -> Result<EventStream, ClientError> {
        let url = self.url("/api/chat-stream");
        debug!(
            "Opening turn stream (conversation: {})",
            request.conversation_id.as_deref().unwrap_or("new")
        );
        let response = self.send(&url, self.client.post(&url).json(&request)).await?;

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::StreamAborted { message: e.to_string() }));
        Ok(decode_stream(chunks).boxed())
    }

    async fn fetch_history(&self, conversation_id: Option<&str>) -> Result<HistoryPage, ClientError> {
        let url = self.url("/api/history");
        let mut request = self.client.get(&url).timeout(self.request_timeout);
        if let Some(id) = conversation_id {
            request = request.query(&[("conversation_id", id)]);
        }

        self.send(&url, request)
            .await?
            .json::<HistoryPage>()
            .await
            .map_err(|e| ClientError::transport(&url, e))
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let url = self.url("/api/conversations");
        let request = self.client.get(&url).timeout(self.request_timeout);

        self.send(&url, request)
            .await?
            .json::<Vec<ConversationSummary>>()
            .await
            .map_err(|e| ClientError::transport(&url, e))
    }
}
