use std::time::Duration;

use crate::errors::ClientError;
use crate::models::OrganizationContext;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub access_token: Option<String>,
    /// Applies to history and conversation-list requests, never to a turn stream.
    pub request_timeout: Duration,
    pub organization: OrganizationContext,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            organization: OrganizationContext::default(),
        }
    }
}

impl ClientConfig {
    /// Reads `COUNCIL_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_base_url = non_empty("COUNCIL_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let request_timeout = match non_empty("COUNCIL_REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ClientError::InvalidConfig {
                    key: "COUNCIL_REQUEST_TIMEOUT_SECS".to_string(),
                    value: raw.clone(),
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let organization = OrganizationContext {
            name: non_empty("COUNCIL_ORG_NAME").unwrap_or_default(),
            industry: non_empty("COUNCIL_ORG_INDUSTRY").unwrap_or_default(),
            description: non_empty("COUNCIL_ORG_DESCRIPTION").unwrap_or_default(),
            website_url: non_empty("COUNCIL_ORG_WEBSITE").unwrap_or_default(),
        };

        Ok(Self {
            api_base_url,
            access_token: non_empty("COUNCIL_ACCESS_TOKEN"),
            request_timeout,
            organization,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.access_token, None);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn reads_values_and_trims_trailing_slash() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("COUNCIL_API_URL", "https://board.example.com/"),
            ("COUNCIL_ACCESS_TOKEN", "tok"),
            ("COUNCIL_REQUEST_TIMEOUT_SECS", "5"),
            ("COUNCIL_ORG_NAME", "Choice Foods"),
            ("COUNCIL_ORG_INDUSTRY", "Food Wholesale"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "https://board.example.com");
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.organization.name, "Choice Foods");
        assert_eq!(config.organization.industry, "Food Wholesale");
    }

    #[test]
    fn bad_timeout_is_a_config_error() {
        let err = ClientConfig::from_lookup(lookup_from(&[("COUNCIL_REQUEST_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig { .. }));
    }
}
