use thiserror::Error;

/// Top-level client error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Stream read failed: {message}")]
    StreamAborted { message: String },

    #[error("Credential rejected by {url} (status {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("Server returned status {status} for {url}")]
    ServerStatus { url: String, status: u16 },

    // ── Decoding errors ──────────────────────────────────────────────────────
    #[error("Invalid payload: {message}")]
    InvalidPayload {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Invalid configuration value for '{key}': '{value}'")]
    InvalidConfig { key: String, value: String },

    // ── Local I/O ────────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        ClientError::Transport { url: url.into(), source }
    }

    pub fn invalid_payload(message: impl Into<String>, source: serde_json::Error) -> Self {
        ClientError::InvalidPayload { message: message.into(), source }
    }

    /// Status codes 401/403 mean the credential is gone; everything else is a plain server error.
    pub fn from_status(url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        if status == 401 || status == 403 {
            ClientError::Unauthorized { url, status }
        } else {
            ClientError::ServerStatus { url, status }
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Transport { .. }
                | ClientError::StreamAborted { .. }
                | ClientError::ServerStatus { .. }
                | ClientError::Unauthorized { .. }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_unauthorized() {
        assert!(ClientError::from_status("http://x/api", 401).is_auth());
        assert!(ClientError::from_status("http://x/api", 403).is_auth());

        let err = ClientError::from_status("http://x/api", 502);
        assert!(!err.is_auth());
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Server returned status 502 for http://x/api");
    }

    #[test]
    fn config_errors_are_not_transport() {
        let err = ClientError::InvalidConfig {
            key: "COUNCIL_REQUEST_TIMEOUT_SECS".to_string(),
            value: "soon".to_string(),
        };
        assert!(!err.is_transport());
    }
}
