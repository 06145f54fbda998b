//! OpenAI chat completions over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Llm, LlmMessage, ResponseFormat};
use crate::error::LlmError;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default planner model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat completion provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    model: String,
    api_key: String,
    base_url: String,
    /// Sampling temperature; omitted from the request when `None`.
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Retries after the first attempt for 429 and 5xx responses.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub retry_delay: Duration,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    /// Create a provider. Fails immediately without an API key.
    pub fn new(model: impl Into<String>, api_key: Option<String>, base_url: Option<String>) -> Result<Self, LlmError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            model: model.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: None,
            max_tokens: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            client,
        })
    }

    /// Read `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(
            model,
            std::env::var("OPENAI_API_KEY").ok(),
            std::env::var("OPENAI_BASE_URL").ok(),
        )
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, messages: &[LlmMessage], format: &ResponseFormat) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if let Some(rf) = format.to_request() {
            body["response_format"] = rf;
        }
        body
    }
}

fn parse_content(response: &Value) -> Result<String, LlmError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::Parse("response has no choices[0].message.content".to_string()))
}

#[async_trait]
impl Llm for OpenAiCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[LlmMessage], format: ResponseFormat) -> Result<String, LlmError> {
        tracing::debug!("OpenAiCompletion.complete: model={}, messages={}", self.model, messages.len());
        let endpoint = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, &format);

        let mut last_error = String::new();
        let mut retry_delay = self.retry_delay;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!("OpenAI API retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self
                .client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = "Rate limited by OpenAI API (429)".to_string();
                continue;
            }
            if status.is_server_error() {
                last_error = format!("OpenAI API server error: {}", status);
                continue;
            }

            let text = response.text().await?;
            if status.is_client_error() {
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                LlmError::Parse(format!(
                    "{} - Body: {}",
                    e,
                    text.chars().take(500).collect::<String>()
                ))
            })?;
            return parse_content(&parsed);
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::services::test_support::spawn;

    #[test]
    fn test_missing_key_fails_fast() {
        assert!(matches!(
            OpenAiCompletion::new("gpt-4o", None, None),
            Err(LlmError::MissingApiKey)
        ));
        assert!(matches!(
            OpenAiCompletion::new("gpt-4o", Some("  ".into()), None),
            Err(LlmError::MissingApiKey)
        ));
    }

    #[test]
    fn test_request_body() {
        let llm = OpenAiCompletion::new("gpt-4o", Some("sk-test".into()), Some("http://x/v1/".into()))
            .unwrap()
            .with_temperature(0.1);
        assert_eq!(llm.base_url(), "http://x/v1");
        let body = llm.request_body(&[LlmMessage::user("hi")], &ResponseFormat::JsonObject);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}]})),
                        )
                    }
                }
            }),
        );
        let base = spawn(app).await;
        let mut llm = OpenAiCompletion::new("gpt-4o", Some("sk-test".into()), Some(base)).unwrap();
        llm.retry_delay = Duration::from_millis(5);

        let reply = llm.complete(&[LlmMessage::user("plan")], ResponseFormat::JsonObject).await.unwrap();
        assert_eq!(reply, "{\"ok\": true}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = spawn(app).await;
        let llm = OpenAiCompletion::new("gpt-4o", Some("sk-test".into()), Some(base)).unwrap();
        let err = llm.complete(&[LlmMessage::user("plan")], ResponseFormat::Text).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = spawn(app).await;
        let mut llm = OpenAiCompletion::new("gpt-4o", Some("sk-test".into()), Some(base)).unwrap();
        llm.max_retries = 1;
        llm.retry_delay = Duration::from_millis(1);
        let err = llm.complete(&[LlmMessage::user("plan")], ResponseFormat::Text).await.unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
    }
}
