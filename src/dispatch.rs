//! Dispatch engine: the plumbing behind `invoke`, `stream`, and `batch`.
//!
//! Every composite routes its execution through these helpers so the three
//! modes behave the same way for any graph:
//!
//! - [`guarded`] / [`guard_stream`] race work against the context's
//!   cancellation token and drop unfinished work when it fires
//! - [`batch`] / [`batch_settled`] run per-item invocations with bounded,
//!   order-preserving concurrency
//! - [`drive`] turns a producer future into a [`ChunkStream`] so a stream
//!   can own scoped state (a derived context, a token callback)
//! - [`observed`] / [`observed_stream`] report start and end events

use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::payload::{ChunkStream, Payload, PayloadOutput};
use crate::PipelineError;
use futures::channel::mpsc;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, trace, warn};

/// Sending half handed to [`drive`] producers.
pub type ChunkSender = mpsc::UnboundedSender<Result<Value>>;

/// Run `work` unless the context is cancelled first.
///
/// On cancellation the future is dropped, which cancels every sub-task it
/// was polling, and [`PipelineError::Cancelled`] is returned.
pub async fn guarded<T, F>(ctx: &ExecCtx, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ctx.check_cancelled()?;
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(PipelineError::Cancelled),
        out = work => out,
    }
}

/// Forward chunks from `inner` until it ends, fails, or is cancelled.
///
/// The first error is yielded and terminates the stream. Cancellation yields
/// a single [`PipelineError::Cancelled`] and drops `inner`.
pub fn guard_stream<'a>(ctx: &'a ExecCtx, inner: ChunkStream<'a>) -> ChunkStream<'a> {
    stream::unfold(Some(inner), move |state| async move {
        let mut inner = state?;
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Some((Err(PipelineError::Cancelled), None)),
            item = inner.next() => match item {
                Some(Ok(chunk)) => {
                    trace!(chunk = %chunk, "chunk");
                    Some((Ok(chunk), Some(inner)))
                }
                Some(Err(err)) => Some((Err(err), None)),
                None => None,
            },
        }
    })
    .boxed()
}

/// Invoke `unit` on every input, failing the whole call on the first error.
///
/// At most [`ExecCtx::concurrency_limit`] items run at once. Outputs are in
/// input order regardless of completion order. When an item fails, items
/// still in flight are dropped before the error is returned.
pub async fn batch<P: Payload + ?Sized>(
    unit: &P,
    ctx: &ExecCtx,
    inputs: Vec<Value>,
) -> Result<Vec<PayloadOutput>> {
    let items = inputs.len();
    let limit = ctx.concurrency_limit(items);
    debug!(unit = unit.name(), kind = unit.kind(), items, limit, "batch started");

    let run = stream::iter(inputs)
        .map(|input| unit.invoke(ctx, input))
        .buffered(limit)
        .try_collect::<Vec<_>>();

    let result = guarded(ctx, run).await;
    match &result {
        Ok(_) => debug!(unit = unit.name(), items, "batch finished"),
        Err(err) => warn!(unit = unit.name(), error = %err, "batch failed"),
    }
    result
}

/// Invoke `unit` on every input, reporting each item's own result.
///
/// Item failures do not affect other items. Cancellation discards completed
/// results and reports [`PipelineError::Cancelled`] for every item.
pub async fn batch_settled<P: Payload + ?Sized>(
    unit: &P,
    ctx: &ExecCtx,
    inputs: Vec<Value>,
) -> Vec<Result<PayloadOutput>> {
    let items = inputs.len();
    let limit = ctx.concurrency_limit(items);
    debug!(unit = unit.name(), kind = unit.kind(), items, limit, "settled batch started");

    let run = stream::iter(inputs)
        .map(|input| unit.invoke(ctx, input))
        .buffered(limit)
        .collect::<Vec<_>>();

    match guarded(ctx, async { Ok(run.await) }).await {
        Ok(results) => {
            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                warn!(unit = unit.name(), items, failed, "settled batch had failures");
            }
            results
        }
        Err(_) => (0..items).map(|_| Err(PipelineError::Cancelled)).collect(),
    }
}

/// Build a chunk stream from a producer that writes into a channel.
///
/// The producer future is polled alongside the receiver, so no task is
/// spawned and dropping the stream drops the producer.
pub fn drive<'a, F, Fut>(producer: F) -> ChunkStream<'a>
where
    F: FnOnce(ChunkSender) -> Fut,
    Fut: Future<Output = ()> + Send + 'a,
{
    let (tx, rx) = mpsc::unbounded();
    let driver =
        stream::once(producer(tx)).filter_map(|()| future::ready(None::<Result<Value>>));
    stream::select(rx, driver).boxed()
}

/// Copy chunks into `tx` until the source ends, fails, or the receiver is gone.
pub async fn forward(mut chunks: ChunkStream<'_>, tx: &ChunkSender) {
    while let Some(chunk) = chunks.next().await {
        let failed = chunk.is_err();
        if tx.unbounded_send(chunk).is_err() || failed {
            break;
        }
    }
}

/// Run one invocation of a composite, emitting lifecycle events and logs.
pub async fn observed<F>(ctx: &ExecCtx, name: &str, kind: &'static str, work: F) -> Result<PayloadOutput>
where
    F: Future<Output = Result<PayloadOutput>>,
{
    emit(
        &ctx.event_handler,
        Event::PayloadStart {
            name: name.to_string(),
            kind,
        },
    );
    debug!(unit = name, kind, "invoke started");

    let result = work.await;

    match &result {
        Ok(_) => debug!(unit = name, kind, "invoke finished"),
        Err(err) => warn!(unit = name, kind, error = %err, "invoke failed"),
    }
    emit(
        &ctx.event_handler,
        Event::PayloadEnd {
            name: name.to_string(),
            ok: result.is_ok(),
        },
    );
    result
}

/// Stream counterpart of [`observed`].
///
/// `PayloadStart` fires on the first poll, not when the stream is built.
/// `PayloadEnd` fires once, when `inner` ends or yields an error.
pub fn observed_stream<'a>(
    ctx: &'a ExecCtx,
    name: &'a str,
    kind: &'static str,
    inner: ChunkStream<'a>,
) -> ChunkStream<'a> {
    stream::unfold(Some((false, inner)), move |state| async move {
        let (started, mut inner) = state?;
        if !started {
            emit(
                &ctx.event_handler,
                Event::PayloadStart {
                    name: name.to_string(),
                    kind,
                },
            );
            debug!(unit = name, kind, "stream started");
        }
        let end = |ok: bool| {
            emit(
                &ctx.event_handler,
                Event::PayloadEnd {
                    name: name.to_string(),
                    ok,
                },
            )
        };
        match inner.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((true, inner)))),
            Some(Err(err)) => {
                warn!(unit = name, kind, error = %err, "stream failed");
                end(false);
                Some((Err(err), None))
            }
            None => {
                debug!(unit = name, kind, "stream finished");
                end(true);
                None
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::BoxFut;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Sleeps `input` milliseconds, tracking peak concurrency; fails on negative input.
    struct Sleeper {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Sleeper {
        fn new() -> Self {
            Self {
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Payload for Sleeper {
        fn kind(&self) -> &'static str {
            "sleeper"
        }
        fn name(&self) -> &str {
            "sleeper"
        }
        fn invoke<'a>(
            &'a self,
            _ctx: &'a ExecCtx,
            input: Value,
        ) -> BoxFut<'a, Result<PayloadOutput>> {
            Box::pin(async move {
                let ms = input.as_i64().unwrap_or(0);
                if ms < 0 {
                    return Err(PipelineError::execution("sleeper", "negative delay"));
                }
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(PayloadOutput::from_value(json!(ms)))
            })
        }
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let ctx = ExecCtx::default();
        let outs = batch(&Sleeper::new(), &ctx, vec![json!(30), json!(1), json!(10)])
            .await
            .unwrap();
        let values: Vec<_> = outs.into_iter().map(|o| o.value).collect();
        assert_eq!(values, vec![json!(30), json!(1), json!(10)]);
    }

    #[tokio::test]
    async fn test_batch_respects_concurrency_limit() {
        let ctx = ExecCtx::builder().max_concurrency(2).build();
        let sleeper = Sleeper::new();
        let inputs = vec![json!(10); 6];
        batch(&sleeper, &ctx, inputs).await.unwrap();
        assert!(sleeper.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_batch_fails_atomically() {
        let ctx = ExecCtx::default();
        let result = batch(&Sleeper::new(), &ctx, vec![json!(1), json!(-1), json!(2)]).await;
        assert!(matches!(result, Err(PipelineError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_batch_settled_isolates_failures() {
        let ctx = ExecCtx::default();
        let results =
            batch_settled(&Sleeper::new(), &ctx, vec![json!(1), json!(-1), json!(2)]).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().value, json!(1));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_batch_empty() {
        let ctx = ExecCtx::default();
        let outs = batch(&Sleeper::new(), &ctx, vec![]).await.unwrap();
        assert!(outs.is_empty());
    }

    #[tokio::test]
    async fn test_guarded_cancels_in_flight_work() {
        let token = CancellationToken::new();
        let ctx = ExecCtx::builder().cancellation(token.clone()).build();
        let sleeper = Sleeper::new();

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        };
        let work = guarded(&ctx, sleeper.invoke(&ctx, json!(5_000)));
        let started = std::time::Instant::now();
        let (result, ()) = tokio::join!(work, canceller);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sleeper.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_settled_cancelled_reports_every_item() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecCtx::builder().cancellation(token).build();
        let results = batch_settled(&Sleeper::new(), &ctx, vec![json!(1), json!(2)]).await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(PipelineError::Cancelled))));
    }

    #[tokio::test]
    async fn test_guard_stream_stops_after_error() {
        let ctx = ExecCtx::default();
        let inner = stream::iter(vec![
            Ok(json!("a")),
            Err(PipelineError::Other("boom".into())),
            Ok(json!("never")),
        ])
        .boxed();
        let items: Vec<_> = guard_stream(&ctx, inner).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_drive_collects_producer_output() {
        let chunks = drive(|tx| async move {
            for part in ["x", "y", "z"] {
                let _ = tx.unbounded_send(Ok(json!(part)));
            }
        });
        let out = crate::chunk::collect(chunks).await.unwrap();
        assert_eq!(out, json!("xyz"));
    }

    #[tokio::test]
    async fn test_observed_stream_reports_failure_once() {
        let recorder = Arc::new(crate::events::RecordingHandler::new());
        let ctx = ExecCtx::builder().event_handler(recorder.clone()).build();
        let inner = stream::iter(vec![
            Ok(json!("a")),
            Err(PipelineError::Other("boom".into())),
            Ok(json!("never")),
        ])
        .boxed();
        let chunks = observed_stream(&ctx, "unit", "test", inner);
        assert!(recorder.events().is_empty());

        let items: Vec<_> = chunks.collect().await;
        assert_eq!(items.len(), 2);
        let ends: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PayloadEnd { ok, .. } => Some(ok),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![false]);
    }
}
