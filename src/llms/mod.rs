//! LLM provider seam.
//!
//! The agent system and the judge talk to a model only through [`Llm`], so
//! tests can swap in a scripted model and the runner can use
//! [`OpenAiCompletion`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;

pub mod openai;

pub use openai::OpenAiCompletion;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    /// Any JSON object.
    JsonObject,
    /// JSON matching a named schema.
    JsonSchema { name: String, schema: Value },
}

impl ResponseFormat {
    /// The `response_format` request field, if any.
    pub fn to_request(&self) -> Option<Value> {
        match self {
            Self::Text => None,
            Self::JsonObject => Some(serde_json::json!({"type": "json_object"})),
            Self::JsonSchema { name, schema } => Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {"name": name, "schema": schema},
            })),
        }
    }
}

/// A chat completion model.
#[async_trait]
pub trait Llm: Send + Sync + fmt::Debug {
    /// Model identifier.
    fn model(&self) -> &str;

    /// Complete a conversation and return the assistant's text.
    async fn complete(&self, messages: &[LlmMessage], format: ResponseFormat) -> Result<String, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned replies in order; errors once they run out.
    #[derive(Debug, Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        pub prompts: Mutex<Vec<Vec<LlmMessage>>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Llm for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[LlmMessage], _format: ResponseFormat) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Parse("no scripted reply left".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_role_lowercase() {
        let msg = LlmMessage::system("plan");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"role": "system", "content": "plan"})
        );
    }

    #[test]
    fn test_response_format_request() {
        assert!(ResponseFormat::Text.to_request().is_none());
        assert_eq!(ResponseFormat::JsonObject.to_request().unwrap()["type"], "json_object");
        let schema = ResponseFormat::JsonSchema {
            name: "plan".into(),
            schema: serde_json::json!({"type": "object"}),
        };
        assert_eq!(schema.to_request().unwrap()["json_schema"]["name"], "plan");
    }

    #[test]
    fn test_scripted_llm_replays_in_order() {
        let llm = testing::ScriptedLlm::new(&["one", "two"]);
        let msgs = [LlmMessage::user("hi")];
        let first = tokio_test::block_on(llm.complete(&msgs, ResponseFormat::Text)).unwrap();
        let second = tokio_test::block_on(llm.complete(&msgs, ResponseFormat::Text)).unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("one", "two"));
        assert!(tokio_test::block_on(llm.complete(&msgs, ResponseFormat::Text)).is_err());
        assert_eq!(llm.prompts.lock().unwrap().len(), 3);
    }
}
