//! Execution context shared across payload invocations.
//!
//! [`ExecCtx`] carries the default model backend, template variables, bound
//! invocation parameters, cancellation token, concurrency bound, and optional
//! event handler. It is constructed once and passed by reference into every
//! payload in a graph; nothing in this crate reads process-global state.

use crate::backend::Backend;
use crate::events::EventHandler;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared execution context for payload invocations.
///
/// Carries everything a payload needs from the runtime environment
/// without coupling to any specific orchestrator.
///
/// # Example
///
/// ```
/// use llm_runnable::ExecCtx;
///
/// let ctx = ExecCtx::builder()
///     .var("domain", "science")
///     .var("audience", "researchers")
///     .max_concurrency(4)
///     .build();
/// assert_eq!(ctx.concurrency_limit(10), 4);
/// ```
#[derive(Clone, Default)]
pub struct ExecCtx {
    /// Default model backend for [`LlmCall`](crate::LlmCall) units without their own.
    pub backend: Option<Arc<dyn Backend>>,
    /// Template variables used when a prompt's input lacks a placeholder value.
    pub vars: HashMap<String, String>,
    /// Invocation parameters injected by [`Bound`](crate::Bound) units.
    pub params: Map<String, Value>,
    /// Optional cancellation token; observed by every composite.
    pub cancellation: Option<CancellationToken>,
    /// Upper bound on concurrently running sub-invocations. `None` = unbounded.
    pub max_concurrency: Option<usize>,
    /// Optional event handler for streaming tokens and lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder() -> ExecCtxBuilder {
        ExecCtxBuilder::default()
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.is_cancelled())
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            return Err(crate::PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once cancellation is requested. Never resolves without a token.
    pub async fn cancelled(&self) {
        match &self.cancellation {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Number of sub-invocations allowed in flight for `items` pending items.
    pub fn concurrency_limit(&self, items: usize) -> usize {
        let unbounded = items.max(1);
        match self.max_concurrency {
            Some(limit) => limit.clamp(1, unbounded),
            None => unbounded,
        }
    }

    /// A copy of this context with `params` merged over the current ones.
    pub fn with_params(&self, params: &Map<String, Value>) -> ExecCtx {
        let mut scoped = self.clone();
        for (key, value) in params {
            scoped.params.insert(key.clone(), value.clone());
        }
        scoped
    }

    /// Look up a single bound parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("vars_count", &self.vars.len())
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("has_cancellation", &self.cancellation.is_some())
            .field("max_concurrency", &self.max_concurrency)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
#[derive(Default)]
pub struct ExecCtxBuilder {
    backend: Option<Arc<dyn Backend>>,
    vars: HashMap<String, String>,
    params: Map<String, Value>,
    cancellation: Option<CancellationToken>,
    max_concurrency: Option<usize>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtxBuilder {
    /// Set the default model backend.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set all template variables at once.
    pub fn vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    /// Insert a single template variable.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Insert a caller-level invocation parameter.
    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Set the cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Bound concurrent sub-invocations in batch and parallel fan-out.
    ///
    /// A limit of 0 is treated as 1.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        ExecCtx {
            backend: self.backend,
            vars: self.vars,
            params: self.params,
            cancellation: self.cancellation,
            max_concurrency: self.max_concurrency,
            event_handler: self.event_handler,
        }
    }
}
