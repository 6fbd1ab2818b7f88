//! Mock backend for testing without a live model.
//!
//! [`MockBackend`] either returns pre-configured responses in order or
//! computes each response from the request, and records every request it
//! receives. Stop sequences in the request config are honored.
//!
//! # Example
//!
//! ```
//! use llm_runnable::backend::MockBackend;
//!
//! let canned = MockBackend::new(vec!["Hello, world!".to_string()]);
//! let shouty = MockBackend::uppercase();
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;

type ReplyFn = Arc<dyn Fn(&LlmRequest) -> String + Send + Sync>;

enum Reply {
    Canned {
        responses: Vec<String>,
        index: AtomicUsize,
    },
    Computed(ReplyFn),
}

/// A test backend with deterministic replies.
///
/// Canned responses cycle back to the beginning when all have been
/// consumed. Streaming emits the reply in word-sized tokens.
pub struct MockBackend {
    reply: Reply,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    /// Create a mock backend with the given canned responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_reply(Reply::Canned {
            responses,
            index: AtomicUsize::new(0),
        })
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a mock that computes each reply from the request.
    pub fn from_fn(f: impl Fn(&LlmRequest) -> String + Send + Sync + 'static) -> Self {
        Self::with_reply(Reply::Computed(Arc::new(f)))
    }

    /// Create a mock that replies with the last human message in upper case.
    pub fn uppercase() -> Self {
        Self::from_fn(|request| request.last_human().unwrap_or_default().to_uppercase())
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn respond(&self, request: &LlmRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let text = match &self.reply {
            Reply::Canned { responses, index } => {
                if responses.is_empty() {
                    return Err(PipelineError::execution(
                        "mock",
                        "MockBackend has no canned responses",
                    ));
                }
                let idx = index.fetch_add(1, Ordering::Relaxed) % responses.len();
                responses[idx].clone()
            }
            Reply::Computed(f) => f(request),
        };
        Ok(truncate_at_stop(text, &request.config.stop))
    }
}

/// Cut `text` at the earliest occurrence of any stop sequence.
fn truncate_at_stop(mut text: String, stop: &[String]) -> String {
    let cut = stop
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min();
    if let Some(end) = cut {
        text.truncate(end);
    }
    text
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let text = self.respond(request)?;
        Ok(LlmResponse {
            text,
            metadata: None,
        })
    }

    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<LlmResponse> {
        let text = self.respond(request)?;
        for token in text.split_inclusive(' ') {
            on_token(token.to_string());
            tokio::task::yield_now().await;
        }
        Ok(LlmResponse {
            text,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.reply {
            Reply::Canned { responses, .. } => format!("canned({})", responses.len()),
            Reply::Computed(_) => "computed".to_string(),
        };
        f.debug_struct("MockBackend")
            .field("reply", &mode)
            .field("calls", &self.call_count())
            .finish()
    }
}
