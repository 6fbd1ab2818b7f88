//! Function adapters.
//!
//! [`Lambda`] turns a plain function or closure into a [`Payload`]. The
//! function receives the input value (and, for [`Lambda::with_params`], the
//! parameters bound around it) and returns the output value.

use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, Payload, PayloadOutput};
use crate::PipelineError;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

type SyncFn = Arc<dyn Fn(Value, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>;
type AsyncFn = Arc<dyn Fn(Value) -> BoxFut<'static, anyhow::Result<Value>> + Send + Sync>;

enum Body {
    Sync(SyncFn),
    Async(AsyncFn),
}

/// A payload backed by a function.
///
/// ```
/// use llm_runnable::{ExecCtx, Lambda, Payload};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let lastname = Lambda::map("lastname", |v| {
///     json!(format!("{}ovich", v.as_str().unwrap_or_default()))
/// });
/// let out = lastname.invoke(&ExecCtx::default(), json!("Abram")).await.unwrap();
/// assert_eq!(out.value, json!("Abramovich"));
/// # });
/// ```
pub struct Lambda {
    name: String,
    body: Body,
}

impl Lambda {
    /// Wrap a fallible function.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Body::Sync(Arc::new(move |input: Value, _params: &Map<String, Value>| {
                f(input)
            })),
        }
    }

    /// Wrap an infallible function.
    pub fn map<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self::new(name, move |input| Ok(f(input)))
    }

    /// Wrap a function that also reads the parameters bound around it.
    pub fn with_params<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Body::Sync(Arc::new(f)),
        }
    }

    /// Wrap an async function (e.g. one that awaits I/O).
    pub fn from_async<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Body::Async(Arc::new(
                move |input: Value| -> BoxFut<'static, anyhow::Result<Value>> { Box::pin(f(input)) },
            )),
        }
    }

    fn lift(&self, err: anyhow::Error) -> PipelineError {
        match err.downcast::<PipelineError>() {
            Ok(inner) => inner,
            Err(other) => PipelineError::execution(&self.name, format!("{:#}", other)),
        }
    }
}

impl Payload for Lambda {
    fn kind(&self) -> &'static str {
        "lambda"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            let value = match &self.body {
                Body::Sync(f) => f(input, &ctx.params),
                Body::Async(f) => f(input).await,
            }
            .map_err(|e| self.lift(e))?;
            Ok(PayloadOutput::from_value(value))
        })
    }
}

impl std::fmt::Debug for Lambda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flavor = match self.body {
            Body::Sync(_) => "sync",
            Body::Async(_) => "async",
        };
        f.debug_struct("Lambda")
            .field("name", &self.name)
            .field("body", &flavor)
            .finish()
    }
}
