//! Parallel fan-out.
//!
//! [`Parallel`] hands one input to every named branch and merges the
//! outputs into an object keyed by branch name.

use crate::dispatch::{guard_stream, guarded, observed};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, ChunkStream, Payload, PayloadOutput};
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Runs named branches concurrently on the same input.
///
/// Branch keys are unique: adding a branch under an existing key replaces
/// it in place. The output object lists keys in declaration order.
///
/// ```
/// use llm_runnable::{ExecCtx, Lambda, Parallel, Passthrough, Payload};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let fan = Parallel::new("fan")
///     .branch("question", Passthrough::new())
///     .branch("length", Lambda::map("len", |v| json!(v.as_str().map(str::len))));
/// let out = fan.invoke(&ExecCtx::default(), json!("why?")).await.unwrap();
/// assert_eq!(out.value, json!({"question": "why?", "length": 4}));
/// # });
/// ```
pub struct Parallel {
    name: String,
    branches: Vec<(String, Arc<dyn Payload>)>,
}

impl Parallel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: Vec::new(),
        }
    }

    /// Add a branch (builder style).
    pub fn branch<P: Payload + 'static>(self, key: impl Into<String>, unit: P) -> Self {
        self.branch_shared(key, Arc::new(unit))
    }

    /// Add a branch that is already shared with other graphs.
    pub fn branch_shared(mut self, key: impl Into<String>, unit: Arc<dyn Payload>) -> Self {
        let key = key.into();
        match self.branches.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = unit,
            None => self.branches.push((key, unit)),
        }
        self
    }

    /// Branch keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|(key, _)| key.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.branches.iter().any(|(existing, _)| existing == key)
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    async fn run(&self, ctx: &ExecCtx, input: Value) -> Result<PayloadOutput> {
        let limit = ctx.concurrency_limit(self.branches.len());
        debug!(unit = %self.name, branches = self.branches.len(), limit, "fan-out");

        let pending: Vec<BoxFut<'_, Result<(usize, Value)>>> = self
            .branches
            .iter()
            .enumerate()
            .map(|(index, (_, unit))| {
                let unit = Arc::clone(unit);
                let input = input.clone();
                Box::pin(async move {
                    let out = unit.invoke(ctx, input).await?;
                    Ok((index, out.value))
                }) as BoxFut<'_, Result<(usize, Value)>>
            })
            .collect();

        // Completion order; the first error drops every branch still running.
        let run = stream::iter(pending)
            .buffer_unordered(limit)
            .try_collect::<Vec<(usize, Value)>>();
        let mut finished = guarded(ctx, run).await?;

        finished.sort_by_key(|(index, _)| *index);
        let merged: Map<String, Value> = finished
            .into_iter()
            .map(|(index, value)| (self.branches[index].0.clone(), value))
            .collect();
        Ok(PayloadOutput::from_value(Value::Object(merged)))
    }
}

impl Payload for Parallel {
    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(observed(ctx, &self.name, "parallel", self.run(ctx, input)))
    }

    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        if self.branches.is_empty() {
            return stream::once(future::ready(Ok(json!({})))).boxed();
        }
        let keyed = self.branches.iter().map(|(key, unit)| {
            unit.stream(ctx, input.clone())
                .map_ok(move |chunk| {
                    let mut slot = Map::new();
                    slot.insert(key.clone(), chunk);
                    Value::Object(slot)
                })
                .boxed()
        });
        guard_stream(ctx, stream::select_all(keyed).boxed())
    }
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("branches", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use crate::lambda::Lambda;
    use crate::PipelineError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn delayed(ms: u64, value: Value) -> Lambda {
        Lambda::from_async("delayed", move |_| {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(value)
            }
        })
    }

    #[tokio::test]
    async fn test_output_keyed_by_branch() {
        let ctx = ExecCtx::default();
        let fan = Parallel::new("fan")
            .branch("slow", delayed(30, json!("s")))
            .branch("fast", delayed(1, json!("f")));
        let out = fan.invoke(&ctx, json!(null)).await.unwrap();
        assert_eq!(out.value, json!({"slow": "s", "fast": "f"}));
        let keys: Vec<_> = out.value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_branches_run_concurrently() {
        let ctx = ExecCtx::default();
        let fan = Parallel::new("fan")
            .branch("a", delayed(50, json!(1)))
            .branch("b", delayed(50, json!(2)))
            .branch("c", delayed(50, json!(3)));
        let started = std::time::Instant::now();
        fan.invoke(&ctx, json!(null)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(140));
    }

    #[tokio::test]
    async fn test_duplicate_key_replaces_in_place() {
        let fan = Parallel::new("fan")
            .branch("a", Lambda::map("one", |_| json!(1)))
            .branch("b", Lambda::map("two", |_| json!(2)))
            .branch("a", Lambda::map("three", |_| json!(3)));
        assert_eq!(fan.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        let out = fan.invoke(&ExecCtx::default(), json!(null)).await.unwrap();
        assert_eq!(out.value, json!({"a": 3, "b": 2}));
    }

    #[tokio::test]
    async fn test_empty_parallel_yields_empty_object() {
        let fan = Parallel::new("empty");
        let ctx = ExecCtx::default();
        assert_eq!(fan.invoke(&ctx, json!(1)).await.unwrap().value, json!({}));
        assert_eq!(chunk::collect(fan.stream(&ctx, json!(1))).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_first_failure_surfaces() {
        let fan = Parallel::new("fan")
            .branch("ok", delayed(5, json!(1)))
            .branch("bad", Lambda::new("bad", |_| anyhow::bail!("no")));
        let err = fan.invoke(&ExecCtx::default(), json!(null)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Execution { ref unit, .. } if unit == "bad"));
    }

    #[tokio::test]
    async fn test_failure_drops_slower_branches() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let fan = Parallel::new("fan")
            .branch(
                "slow",
                Lambda::from_async("slow", move |_| {
                    let flag = Arc::clone(&flag);
                    async move {
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        flag.store(true, Ordering::SeqCst);
                        Ok(json!("done"))
                    }
                }),
            )
            .branch("bad", Lambda::new("bad", |_| anyhow::bail!("boom")));

        let started = std::time::Instant::now();
        let err = fan.invoke(&ExecCtx::default(), json!(null)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Execution { ref unit, .. } if unit == "bad"));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_earliest_failure_wins_over_declaration_order() {
        let fan = Parallel::new("fan")
            .branch(
                "late",
                Lambda::from_async("late", |_| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Err::<Value, _>(anyhow::anyhow!("late"))
                }),
            )
            .branch("early", Lambda::new("early", |_| anyhow::bail!("early")));
        let err = fan.invoke(&ExecCtx::default(), json!(null)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Execution { ref unit, .. } if unit == "early"));
    }

    #[tokio::test]
    async fn test_cancel_reaches_every_running_branch() {
        let completed = Arc::new(AtomicUsize::new(0));
        let sleeper = |name: &'static str| {
            let completed = Arc::clone(&completed);
            Lambda::from_async(name, move |_| {
                let completed = Arc::clone(&completed);
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            })
        };
        let fan = Parallel::new("fan")
            .branch("a", sleeper("a"))
            .branch("b", sleeper("b"))
            .branch("c", sleeper("c"));

        let token = CancellationToken::new();
        let ctx = ExecCtx::builder().cancellation(token.clone()).build();
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        };
        let started = std::time::Instant::now();
        let (result, ()) = tokio::join!(fan.invoke(&ctx, json!(null)), canceller);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_collects_to_invoke_value() {
        let ctx = ExecCtx::default();
        let fan = Parallel::new("fan")
            .branch("x", delayed(10, json!("later")))
            .branch("y", Lambda::map("y", |_| json!([1, 2])));
        let streamed = chunk::collect(fan.stream(&ctx, json!(null))).await.unwrap();
        let invoked = fan.invoke(&ctx, json!(null)).await.unwrap();
        assert_eq!(streamed, invoked.value);
    }
}
