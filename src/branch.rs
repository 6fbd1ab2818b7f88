//! Conditional routing.
//!
//! A [`Branch`] holds ordered `(predicate, payload)` routes and a default
//! payload. Predicates are checked in declaration order against the input;
//! the first match handles the input, and if none match the default does.

use crate::dispatch::{guard_stream, guarded, observed, observed_stream};
use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, ChunkStream, Payload, PayloadOutput};
use crate::PipelineError;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A side-effect-free test on a branch input.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Routes each input to the first payload whose predicate matches.
///
/// Build one with [`Branch::builder`]:
///
/// ```
/// use llm_runnable::{Branch, ExecCtx, Lambda, Payload};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let router = Branch::builder("topic-router")
///     .when_field_eq("topic", "rock", Lambda::map("rock", |_| json!("Rock is loud.")))
///     .otherwise(Lambda::map("general", |_| json!("Music is nice.")))
///     .build()
///     .unwrap();
/// let out = router.invoke(&ExecCtx::default(), json!({"topic": "rock"})).await.unwrap();
/// assert_eq!(out.value, json!("Rock is loud."));
/// # });
/// ```
pub struct Branch {
    name: String,
    routes: Vec<(Predicate, Arc<dyn Payload>)>,
    default: Arc<dyn Payload>,
}

impl Branch {
    pub fn builder(name: impl Into<String>) -> BranchBuilder {
        BranchBuilder {
            name: name.into(),
            routes: Vec::new(),
            default: None,
        }
    }

    /// Number of conditional routes (the default not included).
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Pick the route for `input`. `None` means the default.
    pub fn select(&self, input: &Value) -> (Option<usize>, &Arc<dyn Payload>) {
        self.routes
            .iter()
            .position(|(matches, _)| matches(input))
            .map(|index| (Some(index), &self.routes[index].1))
            .unwrap_or((None, &self.default))
    }

    fn route(&self, ctx: &ExecCtx, input: &Value) -> &Arc<dyn Payload> {
        let (index, unit) = self.select(input);
        debug!(unit = %self.name, route = ?index, target = unit.name(), "branch selected");
        emit(
            &ctx.event_handler,
            Event::BranchSelected {
                name: self.name.clone(),
                index,
            },
        );
        unit
    }
}

impl Payload for Branch {
    fn kind(&self) -> &'static str {
        "branch"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(observed(ctx, &self.name, "branch", async move {
            let unit = self.route(ctx, &input);
            guarded(ctx, unit.invoke(ctx, input)).await
        }))
    }

    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        // Route on first poll so an unconsumed or cancelled stream picks nothing.
        let routed = stream::once(async move {
            let unit = self.route(ctx, &input);
            unit.stream(ctx, input)
        })
        .flatten()
        .boxed();
        observed_stream(ctx, &self.name, "branch", guard_stream(ctx, routed))
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field(
                "routes",
                &self.routes.iter().map(|(_, u)| u.name()).collect::<Vec<_>>(),
            )
            .field("default", &self.default.name())
            .finish()
    }
}

/// Builder for [`Branch`].
pub struct BranchBuilder {
    name: String,
    routes: Vec<(Predicate, Arc<dyn Payload>)>,
    default: Option<Arc<dyn Payload>>,
}

impl BranchBuilder {
    /// Add a route taken when `predicate` holds.
    pub fn when<F, P>(self, predicate: F, unit: P) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
        P: Payload + 'static,
    {
        self.when_shared(Arc::new(predicate), Arc::new(unit))
    }

    /// Add a route with an already shared predicate and payload.
    pub fn when_shared(mut self, predicate: Predicate, unit: Arc<dyn Payload>) -> Self {
        self.routes.push((predicate, unit));
        self
    }

    /// Add a route taken when the input object's `field` equals `expected`.
    pub fn when_field_eq<P>(self, field: impl Into<String>, expected: impl Into<Value>, unit: P) -> Self
    where
        P: Payload + 'static,
    {
        let field = field.into();
        let expected = expected.into();
        self.when(move |input: &Value| input.get(&field) == Some(&expected), unit)
    }

    /// Set the payload used when no predicate matches.
    pub fn otherwise<P: Payload + 'static>(mut self, unit: P) -> Self {
        self.default = Some(Arc::new(unit));
        self
    }

    pub fn otherwise_shared(mut self, unit: Arc<dyn Payload>) -> Self {
        self.default = Some(unit);
        self
    }

    /// Finish the branch. A default route is required.
    pub fn build(self) -> Result<Branch> {
        let default = self.default.ok_or_else(|| PipelineError::RoutingExhausted {
            branch: self.name.clone(),
        })?;
        Ok(Branch {
            name: self.name,
            routes: self.routes,
            default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use crate::events::RecordingHandler;
    use crate::lambda::Lambda;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tag(label: &'static str) -> Lambda {
        Lambda::map(label, move |_| json!(label))
    }

    fn router() -> Branch {
        Branch::builder("router")
            .when(|v| v["n"].as_i64().is_some_and(|n| n > 10), tag("big"))
            .when(|v| v["n"].as_i64().is_some_and(|n| n > 0), tag("positive"))
            .otherwise(tag("other"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let ctx = ExecCtx::default();
        let out = router().invoke(&ctx, json!({"n": 50})).await.unwrap();
        assert_eq!(out.value, json!("big"));
        let out = router().invoke(&ctx, json!({"n": 5})).await.unwrap();
        assert_eq!(out.value, json!("positive"));
    }

    #[tokio::test]
    async fn test_default_when_nothing_matches() {
        let out = router()
            .invoke(&ExecCtx::default(), json!({"n": -1}))
            .await
            .unwrap();
        assert_eq!(out.value, json!("other"));
    }

    #[tokio::test]
    async fn test_later_predicates_not_evaluated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let branch = Branch::builder("lazy")
            .when(|_| true, tag("first"))
            .when(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                },
                tag("second"),
            )
            .otherwise(tag("other"))
            .build()
            .unwrap();
        branch.invoke(&ExecCtx::default(), json!(null)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_build_requires_default() {
        let err = Branch::builder("no-default")
            .when(|_| true, tag("x"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::RoutingExhausted { ref branch } if branch == "no-default"));
    }

    #[tokio::test]
    async fn test_when_field_eq() {
        let branch = Branch::builder("topic")
            .when_field_eq("topic", "rock", tag("rock"))
            .otherwise(tag("general"))
            .build()
            .unwrap();
        let ctx = ExecCtx::default();
        assert_eq!(
            branch.invoke(&ctx, json!({"topic": "rock"})).await.unwrap().value,
            json!("rock")
        );
        assert_eq!(
            branch.invoke(&ctx, json!({"topic": "jazz"})).await.unwrap().value,
            json!("general")
        );
        assert_eq!(branch.invoke(&ctx, json!("rock")).await.unwrap().value, json!("general"));
    }

    #[tokio::test]
    async fn test_emits_branch_selected() {
        let recorder = Arc::new(RecordingHandler::new());
        let ctx = ExecCtx::builder().event_handler(recorder.clone()).build();
        router().invoke(&ctx, json!({"n": 0})).await.unwrap();
        let selected: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::BranchSelected { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(selected, vec![None]);
    }

    #[tokio::test]
    async fn test_stream_routes_on_first_poll() {
        let recorder = Arc::new(RecordingHandler::new());
        let ctx = ExecCtx::builder().event_handler(recorder.clone()).build();
        let branch = router();
        let chunks = branch.stream(&ctx, json!({"n": 50}));
        assert!(recorder.events().is_empty());

        assert_eq!(chunk::collect(chunks).await.unwrap(), json!("big"));
        assert!(recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::BranchSelected { index: Some(0), .. })));
    }

    #[tokio::test]
    async fn test_cancelled_stream_never_routes() {
        let recorder = Arc::new(RecordingHandler::new());
        let token = tokio_util::sync::CancellationToken::new();
        let ctx = ExecCtx::builder()
            .event_handler(recorder.clone())
            .cancellation(token.clone())
            .build();
        let branch = router();
        let chunks = branch.stream(&ctx, json!({"n": 50}));
        token.cancel();
        let err = chunk::collect(chunks).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::BranchSelected { .. })));
    }

    #[tokio::test]
    async fn test_stream_routes_once() {
        let ctx = ExecCtx::default();
        let streamed = chunk::collect(router().stream(&ctx, json!({"n": 3})))
            .await
            .unwrap();
        assert_eq!(streamed, json!("positive"));
    }
}
