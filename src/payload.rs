//! Core payload trait and output types.
//!
//! Payloads are the fundamental execution unit in this crate. Each payload
//! takes a `serde_json::Value` input and can be driven three ways: `invoke`
//! for one materialized output, `stream` for an ordered sequence of partial
//! chunks, and `batch` for many independent inputs. Composites (sequence,
//! parallel, branch, assign, bound) implement the same trait, so a graph of
//! any depth is itself a payload.

use crate::bound::Bound;
use crate::chunk;
use crate::dispatch;
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::parallel::Parallel;
use crate::passthrough::Assign;
use crate::retry::{Retry, RetryPolicy};
use crate::sequence::Sequence;
use crate::PipelineError;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, pinned, Send future: the return type of [`Payload::invoke`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An ordered, finite stream of partial outputs.
///
/// Folding the chunks with [`chunk::concat`] yields the value `invoke`
/// would have produced.
pub type ChunkStream<'a> = BoxStream<'a, Result<Value>>;

/// Object-safe trait for executable payloads.
///
/// Only `kind`, `name`, and `invoke` are required. The streaming and batch
/// modes have defaults that derive from `invoke`:
///
/// - `stream` yields the whole output as a single chunk
/// - `transform` buffers its input stream, then streams on the whole value
/// - `batch` / `batch_settled` run `invoke` per item with bounded concurrency
///
/// A payload that can consume input chunks as they arrive overrides
/// `transform`. [`Sequence`] relies on that capability to pipeline streams
/// without knowing the concrete types it joins.
pub trait Payload: Send + Sync {
    /// Stable identifier for the payload type (e.g. `"llm-call"`, `"sequence"`).
    fn kind(&self) -> &'static str;

    /// Instance name (for logging/debugging/events).
    fn name(&self) -> &str;

    /// Execute the payload on one input.
    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>>;

    /// Execute the payload, yielding partial outputs as they become available.
    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        stream::once(async move { self.invoke(ctx, input).await.map(|out| out.value) }).boxed()
    }

    /// Execute the payload on an input that is itself arriving as chunks.
    fn transform<'a>(&'a self, ctx: &'a ExecCtx, input: ChunkStream<'a>) -> ChunkStream<'a> {
        stream::once(async move {
            let whole = chunk::collect(input).await?;
            Ok::<_, PipelineError>(self.stream(ctx, whole))
        })
        .try_flatten()
        .boxed()
    }

    /// Execute the payload on every input. Fails on the first item error.
    fn batch<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        inputs: Vec<Value>,
    ) -> BoxFut<'a, Result<Vec<PayloadOutput>>> {
        Box::pin(dispatch::batch(self, ctx, inputs))
    }

    /// Execute the payload on every input, reporting each item's result.
    fn batch_settled<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        inputs: Vec<Value>,
    ) -> BoxFut<'a, Vec<Result<PayloadOutput>>> {
        Box::pin(dispatch::batch_settled(self, ctx, inputs))
    }
}

macro_rules! forward_payload {
    ($ptr:ident) => {
        impl<P: Payload + ?Sized> Payload for $ptr<P> {
            fn kind(&self) -> &'static str {
                (**self).kind()
            }

            fn name(&self) -> &str {
                (**self).name()
            }

            fn invoke<'a>(
                &'a self,
                ctx: &'a ExecCtx,
                input: Value,
            ) -> BoxFut<'a, Result<PayloadOutput>> {
                (**self).invoke(ctx, input)
            }

            fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
                (**self).stream(ctx, input)
            }

            fn transform<'a>(
                &'a self,
                ctx: &'a ExecCtx,
                input: ChunkStream<'a>,
            ) -> ChunkStream<'a> {
                (**self).transform(ctx, input)
            }

            fn batch<'a>(
                &'a self,
                ctx: &'a ExecCtx,
                inputs: Vec<Value>,
            ) -> BoxFut<'a, Result<Vec<PayloadOutput>>> {
                (**self).batch(ctx, inputs)
            }

            fn batch_settled<'a>(
                &'a self,
                ctx: &'a ExecCtx,
                inputs: Vec<Value>,
            ) -> BoxFut<'a, Vec<Result<PayloadOutput>>> {
                (**self).batch_settled(ctx, inputs)
            }
        }
    };
}

forward_payload!(Arc);
forward_payload!(Box);

/// Combinator methods available on every payload.
///
/// Each method consumes `self` and returns a new payload; nothing is
/// mutated. Wrap a payload in an `Arc` first (see [`shared`](Self::shared))
/// to reuse it in several graphs.
///
/// ```
/// use llm_runnable::{Lambda, Passthrough, Payload, PayloadExt};
/// use serde_json::json;
///
/// let chain = Passthrough::new().pipe(Lambda::map("suffix", |v| {
///     json!(format!("{}ovich", v.as_str().unwrap_or_default()))
/// }));
/// assert_eq!(chain.kind(), "sequence");
/// ```
pub trait PayloadExt: Payload + Sized + 'static {
    /// Feed this payload's output into `next`.
    fn pipe<P: Payload + 'static>(self, next: P) -> Sequence {
        Sequence::new(self, next)
    }

    /// Attach static invocation parameters (stop sequences, options, ...).
    fn bind(self, params: Value) -> Bound {
        Bound::new(self, params)
    }

    /// Pass this payload's output object through, adding computed fields.
    fn assign(self, fields: Parallel) -> Sequence {
        Sequence::new(self, Assign::new(fields))
    }

    /// Re-invoke on retryable failures according to `policy`.
    fn with_retry(self, policy: RetryPolicy) -> Retry {
        Retry::new(self, policy)
    }

    /// Erase the concrete type behind a shareable handle.
    fn shared(self) -> Arc<dyn Payload> {
        Arc::new(self)
    }
}

impl<P: Payload + Sized + 'static> PayloadExt for P {}

/// Output from a payload invocation.
///
/// Uses `serde_json::Value` as the wire type so heterogeneous workflows
/// can pass data between nodes without sharing a single generic `T`.
#[derive(Debug, Clone)]
pub struct PayloadOutput {
    /// Structured output (JSON value).
    pub value: Value,
    /// Raw text the value was produced from (model text, or the serialized value).
    pub raw_response: String,
    /// Extracted thinking/reasoning (if the model emitted think blocks).
    pub thinking: Option<String>,
    /// Model that produced this output (if applicable).
    pub model: Option<String>,
}

impl PayloadOutput {
    /// Create an output wrapping a pre-existing `Value`.
    pub fn from_value(value: Value) -> Self {
        let raw = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            value,
            raw_response: raw,
            thinking: None,
            model: None,
        }
    }

    /// Parse the output value into a typed `T`.
    ///
    /// This is the primary way to extract typed data at workflow edges.
    ///
    /// ```ignore
    /// let output: PayloadOutput = payload.invoke(&ctx, input).await?;
    /// let analysis: MyStruct = output.parse_as()?;
    /// ```
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            let snippet = self.value.to_string();
            let snippet: String = snippet.chars().take(200).collect();
            PipelineError::Other(format!(
                "Failed to parse PayloadOutput into target type: {}. Value (truncated): {}",
                e, snippet
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use serde::Deserialize;
    use serde_json::json;

    /// Doubles numeric input; relies entirely on the default modes.
    struct Doubler;

    impl Payload for Doubler {
        fn kind(&self) -> &'static str {
            "doubler"
        }
        fn name(&self) -> &str {
            "doubler"
        }
        fn invoke<'a>(
            &'a self,
            _ctx: &'a ExecCtx,
            input: Value,
        ) -> BoxFut<'a, Result<PayloadOutput>> {
            Box::pin(async move {
                let n = input
                    .as_i64()
                    .ok_or_else(|| PipelineError::contract("doubler", "expected an integer"))?;
                Ok(PayloadOutput::from_value(json!(n * 2)))
            })
        }
    }

    #[tokio::test]
    async fn test_default_stream_is_single_chunk() {
        let ctx = ExecCtx::default();
        let chunks: Vec<_> = Doubler.stream(&ctx, json!(21)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &json!(42));
    }

    #[tokio::test]
    async fn test_default_transform_buffers_input() {
        let ctx = ExecCtx::default();
        let input = stream::iter(vec![Ok(json!(5))]).boxed();
        let out = chunk::collect(Doubler.transform(&ctx, input)).await.unwrap();
        assert_eq!(out, json!(10));
    }

    #[tokio::test]
    async fn test_default_transform_propagates_upstream_error() {
        let ctx = ExecCtx::default();
        let input = stream::iter(vec![Err(PipelineError::Cancelled)]).boxed();
        let out = chunk::collect(Doubler.transform(&ctx, input)).await;
        assert!(matches!(out, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_default_batch_preserves_order() {
        let ctx = ExecCtx::default();
        let outs = Doubler
            .batch(&ctx, vec![json!(1), json!(2), json!(3)])
            .await
            .unwrap();
        let values: Vec<_> = outs.into_iter().map(|o| o.value).collect();
        assert_eq!(values, vec![json!(2), json!(4), json!(6)]);
    }

    #[tokio::test]
    async fn test_arc_forwarding() {
        let ctx = ExecCtx::default();
        let shared: Arc<dyn Payload> = Doubler.shared();
        let out = shared.invoke(&ctx, json!(4)).await.unwrap();
        assert_eq!(out.value, json!(8));
        assert_eq!(shared.kind(), "doubler");
    }

    #[test]
    fn test_from_value_raw_response() {
        assert_eq!(PayloadOutput::from_value(json!("hi")).raw_response, "hi");
        assert_eq!(
            PayloadOutput::from_value(json!({"a": 1})).raw_response,
            r#"{"a":1}"#
        );
    }

    #[test]
    fn test_parse_as() {
        #[derive(Debug, Deserialize)]
        struct Person {
            name: String,
        }
        let out = PayloadOutput::from_value(json!({"name": "Abram"}));
        let person: Person = out.parse_as().unwrap();
        assert_eq!(person.name, "Abram");
        assert!(out.parse_as::<Vec<String>>().is_err());
    }
}
