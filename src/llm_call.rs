//! Model call payload.
//!
//! [`LlmCall`] sends its input to a [`Backend`] and returns the generated
//! text. A string input becomes one human message; an array input is read
//! as a chat conversation (what [`ChatPromptTemplate`] produces). Bound
//! params such as `stop` are merged into the request config on every call.
//!
//! [`ChatPromptTemplate`]: crate::prompt::ChatPromptTemplate

use crate::{
    backend::{Backend, ChatMessage, LlmConfig, LlmRequest},
    chunk::type_name,
    dispatch::{drive, guarded, observed},
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    output_parser::{split_thinking, ThinkFilter},
    payload::{BoxFut, ChunkStream, Payload, PayloadOutput},
    PipelineError,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Model name sent when none is set; backends map it to their own default.
pub const DEFAULT_MODEL: &str = "default";

/// A payload that calls a model backend.
///
/// `<think>` blocks are removed from the answer and kept in
/// [`PayloadOutput::thinking`]. Streaming yields the answer token by token
/// (think blocks filtered out), and always at least one chunk.
///
/// # Example
///
/// ```
/// use llm_runnable::backend::MockBackend;
/// use llm_runnable::{ExecCtx, LlmCall, Payload};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let model = LlmCall::new("shout").with_backend(Arc::new(MockBackend::uppercase()));
/// let out = model.invoke(&ExecCtx::default(), json!("hello")).await.unwrap();
/// assert_eq!(out.value, json!("HELLO"));
/// # });
/// ```
#[derive(Clone)]
pub struct LlmCall {
    name: String,
    model: String,
    config: LlmConfig,
    /// Overrides `ExecCtx::backend` when set.
    backend: Option<Arc<dyn Backend>>,
}

impl LlmCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: DEFAULT_MODEL.to_string(),
            config: LlmConfig::default(),
            backend: None,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this backend instead of the context's.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn messages(&self, input: Value) -> Result<Vec<ChatMessage>> {
        match input {
            Value::String(text) => Ok(vec![ChatMessage::human(text)]),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    ChatMessage::from_value(item).ok_or_else(|| {
                        PipelineError::contract(
                            &self.name,
                            format!("not a chat message: {}", item),
                        )
                    })
                })
                .collect(),
            other => Err(PipelineError::contract(
                &self.name,
                format!(
                    "expected a prompt string or message array, got {}",
                    type_name(&other)
                ),
            )),
        }
    }

    fn backend<'c>(&'c self, ctx: &'c ExecCtx) -> Result<&'c Arc<dyn Backend>> {
        self.backend
            .as_ref()
            .or(ctx.backend.as_ref())
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "model unit '{}' has no backend and the context provides none",
                    self.name
                ))
            })
    }

    fn request(&self, ctx: &ExecCtx, input: Value) -> Result<LlmRequest> {
        Ok(LlmRequest {
            model: self.model.clone(),
            messages: self.messages(input)?,
            config: self.config.clone().apply_params(&ctx.params)?,
        })
    }

    async fn call(&self, ctx: &ExecCtx, input: Value) -> Result<PayloadOutput> {
        let backend = self.backend(ctx)?;
        let request = self.request(ctx, input)?;
        debug!(
            unit = %self.name,
            backend = backend.name(),
            model = %self.model,
            messages = request.messages.len(),
            "calling model"
        );

        let response = guarded(ctx, backend.complete(&request)).await?;
        let (thinking, answer) = split_thinking(&response.text);
        Ok(PayloadOutput {
            value: Value::String(answer),
            raw_response: response.text,
            thinking,
            model: Some(self.model.clone()),
        })
    }
}

impl Payload for LlmCall {
    fn kind(&self) -> &'static str {
        "llm-call"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(observed(ctx, &self.name, "llm-call", self.call(ctx, input)))
    }

    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        drive(move |tx| async move {
            let prepared = self
                .backend(ctx)
                .and_then(|backend| Ok((backend, self.request(ctx, input)?)));
            let (backend, request) = match prepared {
                Ok(prepared) => prepared,
                Err(err) => {
                    let _ = tx.unbounded_send(Err(err));
                    return;
                }
            };
            emit(
                &ctx.event_handler,
                Event::PayloadStart {
                    name: self.name.clone(),
                    kind: "llm-call",
                },
            );

            let mut filter = ThinkFilter::new();
            let mut sent_any = false;
            let mut on_token = |token: String| {
                emit(
                    &ctx.event_handler,
                    Event::Token {
                        name: self.name.clone(),
                        chunk: token.clone(),
                    },
                );
                let visible = filter.push(&token);
                if !visible.is_empty() {
                    sent_any = true;
                    let _ = tx.unbounded_send(Ok(Value::String(visible)));
                }
            };
            let result = guarded(ctx, backend.complete_streaming(&request, &mut on_token)).await;

            let ok = result.is_ok();
            match result {
                Ok(_) => {
                    let rest = filter.finish();
                    if !rest.is_empty() || !sent_any {
                        let _ = tx.unbounded_send(Ok(Value::String(rest)));
                    }
                }
                Err(err) => {
                    warn!(unit = %self.name, error = %err, "model stream failed");
                    let _ = tx.unbounded_send(Err(err));
                }
            }
            emit(
                &ctx.event_handler,
                Event::PayloadEnd {
                    name: self.name.clone(),
                    ok,
                },
            );
        })
    }
}

impl std::fmt::Debug for LlmCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCall")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("config", &self.config)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}
