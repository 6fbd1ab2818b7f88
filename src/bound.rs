//! Static invocation parameters attached to a payload.

use crate::dispatch::{drive, forward};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, ChunkStream, Payload, PayloadOutput};
use crate::PipelineError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

/// A payload that always runs with a fixed set of parameters.
///
/// The parameters are merged into [`ExecCtx::params`] for the wrapped
/// payload and everything it calls, on every invoke, stream, and batch. The
/// wrapped payload is not modified and stays usable unbound. When binds
/// nest, the one closest to the payload wins on key collisions.
///
/// ```
/// use llm_runnable::{ExecCtx, Lambda, Payload, PayloadExt};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let stop = Lambda::with_params("stop", |_, params| Ok(params["stop"].clone()))
///     .bind(json!({"stop": ["\nObservation"]}));
/// let out = stop.invoke(&ExecCtx::default(), json!(null)).await.unwrap();
/// assert_eq!(out.value, json!(["\nObservation"]));
/// # });
/// ```
pub struct Bound {
    inner: Arc<dyn Payload>,
    params: Value,
}

impl Bound {
    pub fn new<P: Payload + 'static>(inner: P, params: Value) -> Self {
        Self::shared(Arc::new(inner), params)
    }

    /// Bind parameters to a payload that is shared with other graphs.
    pub fn shared(inner: Arc<dyn Payload>, params: Value) -> Self {
        Self { inner, params }
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    fn scoped(&self, ctx: &ExecCtx) -> Result<ExecCtx> {
        match &self.params {
            Value::Object(params) => {
                trace!(unit = self.inner.name(), params = params.len(), "binding params");
                Ok(ctx.with_params(params))
            }
            other => Err(PipelineError::InvalidConfig(format!(
                "params bound to '{}' must be an object, got {}",
                self.inner.name(),
                other
            ))),
        }
    }
}

impl Payload for Bound {
    fn kind(&self) -> &'static str {
        "bound"
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            let scoped = self.scoped(ctx)?;
            self.inner.invoke(&scoped, input).await
        })
    }

    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        drive(move |tx| async move {
            match self.scoped(ctx) {
                Ok(scoped) => forward(self.inner.stream(&scoped, input), &tx).await,
                Err(err) => {
                    let _ = tx.unbounded_send(Err(err));
                }
            }
        })
    }

    fn transform<'a>(&'a self, ctx: &'a ExecCtx, input: ChunkStream<'a>) -> ChunkStream<'a> {
        drive(move |tx| async move {
            match self.scoped(ctx) {
                Ok(scoped) => forward(self.inner.transform(&scoped, input), &tx).await,
                Err(err) => {
                    let _ = tx.unbounded_send(Err(err));
                }
            }
        })
    }

    fn batch<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        inputs: Vec<Value>,
    ) -> BoxFut<'a, Result<Vec<PayloadOutput>>> {
        Box::pin(async move {
            let scoped = self.scoped(ctx)?;
            self.inner.batch(&scoped, inputs).await
        })
    }
}

impl std::fmt::Debug for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bound")
            .field("inner", &self.inner.name())
            .field("params", &self.params)
            .finish()
    }
}

/// Build a params object from key/value pairs.
pub fn params_from<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(
        pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect::<Map<String, Value>>(),
    )
}
