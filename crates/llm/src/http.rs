use std::time::Duration;

use async_trait::async_trait;
use pipeline::{LlmClient, LlmError, LlmRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Connection settings for [`HttpLlmClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpLlmConfig {
    /// Scheme, host and optional port; `/v1/messages` is appended.
    pub base_url: String,
    /// Sent as `x-api-key`. Usually supplied through the environment.
    pub api_key: String,
    pub max_tokens: u32,
    /// Back-off assumed when a 429 carries no `retry-after` header.
    pub default_retry_after_secs: u64,
}

impl Default for HttpLlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: String::new(),
            max_tokens: 8_192,
            default_retry_after_secs: 30,
        }
    }
}

/// [`LlmClient`] over a Messages-style HTTP API.
///
/// The per-call timeout comes from each [`LlmRequest`], not from the HTTP
/// client, so stages can use different budgets.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    config: HttpLlmConfig,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &LlmRequest) -> serde_json::Value {
        let prompt = format!(
            "{}\n\nRespond with a single JSON document of this shape and nothing else:\n{}",
            request.prompt, request.response_schema
        );
        serde_json::json!({
            "model": request.model.as_str(),
            "max_tokens": self.config.max_tokens,
            "system": request.system,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }

    fn map_send_error(err: reqwest::Error, timeout: Duration) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout { after: timeout }
        } else {
            LlmError::Provider {
                message: format!("request failed: {err}"),
            }
        }
    }
}

/// Wire shape of a Messages API reply; only text blocks are of interest.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    #[instrument(skip(self, request), fields(stage = %request.stage, model = %request.model))]
    async fn invoke(&self, request: LlmRequest) -> Result<serde_json::Value, LlmError> {
        let response = self
            .client
            .post(self.endpoint())
            .timeout(request.timeout)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_body(&request))
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, request.timeout))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(self.config.default_retry_after_secs);
            warn!(retry_after, "Provider rate limit hit");
            return Err(LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(retry_after)),
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                message: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Self::map_send_error(e, request.timeout))?;

        let text: String = body
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                message: "response had no text content".into(),
            });
        }
        debug!(chars = text.len(), "Model response received");
        crate::extract_json(&text)
    }
}
