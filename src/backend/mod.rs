//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over model providers. [`LlmCall`] builds
//! a provider-agnostic [`LlmRequest`] (role-tagged messages plus
//! [`LlmConfig`]) and hands it to whichever backend the unit or the
//! [`ExecCtx`](crate::ExecCtx) supplies.
//!
//! ```text
//! LlmCall ──► LlmRequest ──► Backend::complete()           ──► LlmResponse
//!                          └► Backend::complete_streaming() ──► tokens + LlmResponse
//! ```
//!
//! Only [`MockBackend`] ships with this crate; provider clients implement
//! [`Backend`] in their own crates.
//!
//! [`LlmCall`]: crate::LlmCall

pub mod mock;

pub use mock::MockBackend;

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration for model requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Sequences that end generation when produced.
    #[serde(default)]
    pub stop: Vec<String>,

    /// Request JSON format output from the model.
    #[serde(default)]
    pub json_mode: bool,

    /// Provider-specific options passed through untouched.
    #[serde(default)]
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            stop: Vec::new(),
            json_mode: false,
            options: None,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    /// Overlay bound invocation parameters onto this config.
    ///
    /// `stop` (string or string array), `temperature`, `max_tokens`, and
    /// `json_mode` map to their fields; any other key is merged into
    /// `options`.
    pub fn apply_params(mut self, params: &Map<String, Value>) -> Result<Self> {
        for (key, value) in params {
            match key.as_str() {
                "stop" => self.stop = stop_sequences(value)?,
                "temperature" => {
                    self.temperature = value
                        .as_f64()
                        .ok_or_else(|| invalid_param(key, "a number", value))?
                }
                "max_tokens" => {
                    self.max_tokens = value
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| invalid_param(key, "a positive integer", value))?
                }
                "json_mode" => {
                    self.json_mode = value
                        .as_bool()
                        .ok_or_else(|| invalid_param(key, "a boolean", value))?
                }
                _ => {
                    let options = self
                        .options
                        .get_or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(map) = options {
                        map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(self)
    }
}

fn stop_sequences(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid_param("stop", "a string or array of strings", value))
            })
            .collect(),
        other => Err(invalid_param("stop", "a string or array of strings", other)),
    }
}

fn invalid_param(key: &str, expected: &str, got: &Value) -> PipelineError {
    PipelineError::InvalidConfig(format!(
        "bound param '{}' must be {}, got {}",
        key, expected, got
    ))
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    #[serde(alias = "user")]
    Human,
    /// Model response.
    #[serde(alias = "assistant")]
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Ai => "ai",
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    /// Read a message from its JSON form.
    ///
    /// Accepts `{"role": ..., "content": ...}` objects and bare strings
    /// (treated as human messages).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::human(text.clone())),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "role": self.role.as_str(), "content": self.content })
    }
}

/// A normalized model request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// Model identifier understood by the backend.
    pub model: String,

    /// Ordered, role-tagged conversation.
    pub messages: Vec<ChatMessage>,

    /// Generation settings, with bound params already applied.
    pub config: LlmConfig,
}

impl LlmRequest {
    /// Content of the last human message, if any.
    pub fn last_human(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Human)
            .map(|m| m.content.as_str())
    }
}

/// A normalized model response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,

    /// Provider-specific metadata (token counts, timing, model info).
    pub metadata: Option<Value>,
}

/// Abstraction over model providers.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming call.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Execute a streaming call.
    ///
    /// `on_token` is called for each token as it arrives. The accumulated
    /// text is returned as an [`LlmResponse`].
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn test_apply_params_known_keys() {
        let config = LlmConfig::default()
            .apply_params(&params(json!({
                "stop": ["\nSQLResult:"],
                "temperature": 0.0,
                "max_tokens": 64,
                "json_mode": true,
            })))
            .unwrap();
        assert_eq!(config.stop, vec!["\nSQLResult:"]);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 64);
        assert!(config.json_mode);
        assert!(config.options.is_none());
    }

    #[test]
    fn test_apply_params_single_stop_and_extras() {
        let config = LlmConfig::default()
            .apply_params(&params(json!({"stop": "END", "seed": 7})))
            .unwrap();
        assert_eq!(config.stop, vec!["END"]);
        assert_eq!(config.options, Some(json!({"seed": 7})));
    }

    #[test]
    fn test_apply_params_rejects_bad_types() {
        let err = LlmConfig::default()
            .apply_params(&params(json!({"temperature": "hot"})))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(LlmConfig::default()
            .apply_params(&params(json!({"stop": [1, 2]})))
            .is_err());
    }

    #[test]
    fn test_role_serde_aliases() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "assistant", "content": "hi"})).unwrap();
        assert_eq!(msg.role, Role::Ai);
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(msg.role, Role::Human);
        assert_eq!(
            ChatMessage::system("be brief").to_value(),
            json!({"role": "system", "content": "be brief"})
        );
    }

    #[test]
    fn test_message_from_value() {
        assert_eq!(
            ChatMessage::from_value(&json!("hello")),
            Some(ChatMessage::human("hello"))
        );
        assert_eq!(ChatMessage::from_value(&json!(42)), None);
        assert_eq!(ChatMessage::from_value(&json!({"role": "wizard", "content": ""})), None);
    }

    #[test]
    fn test_last_human() {
        let request = LlmRequest {
            model: "m".into(),
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::human("first"),
                ChatMessage::ai("reply"),
                ChatMessage::human("second"),
            ],
            config: LlmConfig::default(),
        };
        assert_eq!(request.last_human(), Some("second"));
    }
}
