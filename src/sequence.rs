//! Sequential composition of payloads.
//!
//! [`Sequence`] feeds the output of `first` into `second`. Longer pipelines
//! are nested pairs, built with [`PayloadExt::pipe`](crate::PayloadExt::pipe)
//! or [`Sequence::from_units`].
//!
//! Streaming pipelines chunks through both stages: `second` receives
//! `first`'s chunk stream through [`Payload::transform`], so a stage that can
//! consume input incrementally starts producing output before `first` is
//! done, while any other stage buffers its input first.

use crate::dispatch::{guard_stream, guarded, observed, observed_stream};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, ChunkStream, Payload, PayloadOutput};
use crate::PipelineError;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Two payloads run one after the other.
///
/// `Sequence` itself implements [`Payload`], so sequences nest.
///
/// # Example
///
/// ```
/// use llm_runnable::{ExecCtx, Lambda, Payload, PayloadExt, Sequence};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let chain = Sequence::from_units(
///     "name-chain",
///     vec![
///         Lambda::map("trim", |v| json!(v.as_str().unwrap_or("").trim())).shared(),
///         Lambda::map("suffix", |v| json!(format!("{}ovich", v.as_str().unwrap_or("")))).shared(),
///     ],
/// )
/// .unwrap();
/// let out = chain.invoke(&ExecCtx::default(), json!("  Abram ")).await.unwrap();
/// assert_eq!(out.value, json!("Abramovich"));
/// # });
/// ```
pub struct Sequence {
    name: String,
    first: Arc<dyn Payload>,
    second: Arc<dyn Payload>,
}

impl Sequence {
    /// Pipe `first` into `second`.
    pub fn new<A, B>(first: A, second: B) -> Self
    where
        A: Payload + 'static,
        B: Payload + 'static,
    {
        Self::pair(Arc::new(first), Arc::new(second))
    }

    /// Pipe two shared payloads.
    pub fn pair(first: Arc<dyn Payload>, second: Arc<dyn Payload>) -> Self {
        Self {
            name: format!("{} | {}", first.name(), second.name()),
            first,
            second,
        }
    }

    /// Build a left-nested pipeline from two or more payloads.
    pub fn from_units(name: impl Into<String>, units: Vec<Arc<dyn Payload>>) -> Result<Self> {
        let name = name.into();
        let count = units.len();
        let mut units = units.into_iter();
        let (Some(first), Some(second)) = (units.next(), units.next()) else {
            return Err(PipelineError::InvalidConfig(format!(
                "Sequence '{}' needs at least two units, got {}",
                name, count
            )));
        };
        let mut seq = Sequence::pair(first, second);
        for next in units {
            seq = Sequence::pair(Arc::new(seq), next);
        }
        Ok(seq.with_name(name))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn first(&self) -> &Arc<dyn Payload> {
        &self.first
    }

    pub fn second(&self) -> &Arc<dyn Payload> {
        &self.second
    }
}

impl Payload for Sequence {
    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(observed(ctx, &self.name, "sequence", async move {
            let mid = guarded(ctx, self.first.invoke(ctx, input)).await?;
            debug!(from = self.first.name(), to = self.second.name(), "handing off");
            guarded(ctx, self.second.invoke(ctx, mid.value)).await
        }))
    }

    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        let piped = self.second.transform(ctx, self.first.stream(ctx, input));
        observed_stream(ctx, &self.name, "sequence", guard_stream(ctx, piped))
    }

    fn transform<'a>(&'a self, ctx: &'a ExecCtx, input: ChunkStream<'a>) -> ChunkStream<'a> {
        guard_stream(ctx, self.second.transform(ctx, self.first.transform(ctx, input)))
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("first", &self.first.kind())
            .field("second", &self.second.kind())
            .finish()
    }
}
