//! Identity and field-assignment payloads.
//!
//! [`Passthrough`] returns its input unchanged. [`Assign`] carries an input
//! object forward and merges fields computed by a [`Parallel`] over that
//! same input.

use crate::chunk::type_name;
use crate::dispatch::{guard_stream, guarded, observed};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::parallel::Parallel;
use crate::payload::{BoxFut, ChunkStream, Payload, PayloadOutput};
use crate::PipelineError;
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::debug;

/// Identity payload.
///
/// Commonly used as a parallel branch that forwards the original input next
/// to computed values, e.g. `{context: retriever, question: passthrough}`.
#[derive(Debug, Clone)]
pub struct Passthrough {
    name: String,
}

impl Passthrough {
    pub fn new() -> Self {
        Self {
            name: "passthrough".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// An [`Assign`] that keeps every input field and adds `fields`.
    pub fn assign(fields: Parallel) -> Assign {
        Assign::new(fields)
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for Passthrough {
    fn kind(&self) -> &'static str {
        "passthrough"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            Ok(PayloadOutput::from_value(input))
        })
    }

    fn transform<'a>(&'a self, _ctx: &'a ExecCtx, input: ChunkStream<'a>) -> ChunkStream<'a> {
        input
    }
}

/// Carries an input object forward and adds computed fields.
///
/// Each field is computed by one branch of the inner [`Parallel`], and every
/// branch sees the original input, never a sibling's result. On a key
/// collision the computed field replaces the original one.
///
/// ```
/// use llm_runnable::{ExecCtx, Lambda, Parallel, Passthrough, Payload};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let assign = Passthrough::assign(Parallel::new("fields").branch(
///     "lastname",
///     Lambda::map("lastname", |v| json!(format!("{}OVICH", v["name"].as_str().unwrap_or_default()))),
/// ));
/// let out = assign.invoke(&ExecCtx::default(), json!({"name": "Abram"})).await.unwrap();
/// assert_eq!(out.value, json!({"name": "Abram", "lastname": "AbramOVICH"}));
/// # });
/// ```
pub struct Assign {
    name: String,
    fields: Parallel,
}

impl Assign {
    pub fn new(fields: Parallel) -> Self {
        Self {
            name: "assign".to_string(),
            fields,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn expect_object(&self, input: Value) -> Result<Map<String, Value>> {
        match input {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::contract(
                &self.name,
                format!("expected an object input, got {}", type_name(&other)),
            )),
        }
    }

    /// Input fields that no computed field overwrites, in input order.
    fn carried(&self, input: &Map<String, Value>) -> Map<String, Value> {
        input
            .iter()
            .filter(|(key, _)| !self.fields.contains_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl Payload for Assign {
    fn kind(&self) -> &'static str {
        "assign"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(observed(ctx, &self.name, "assign", async move {
            let original = self.expect_object(input)?;
            let mut merged = self.carried(&original);
            let computed = guarded(ctx, self.fields.invoke(ctx, Value::Object(original))).await?;
            if let Value::Object(fields) = computed.value {
                debug!(unit = %self.name, fields = fields.len(), "assigned fields");
                merged.extend(fields);
            }
            Ok(PayloadOutput::from_value(Value::Object(merged)))
        }))
    }

    fn stream<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> ChunkStream<'a> {
        let original = match self.expect_object(input) {
            Ok(map) => map,
            Err(err) => return stream::once(future::ready(Err(err))).boxed(),
        };
        let carried = Value::Object(self.carried(&original));
        let chunks = stream::once(future::ready(Ok(carried)))
            .chain(self.fields.stream(ctx, Value::Object(original)))
            .boxed();
        guard_stream(ctx, chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use crate::lambda::Lambda;
    use serde_json::json;

    fn lastname_fields() -> Parallel {
        Parallel::new("fields").branch(
            "lastname",
            Lambda::map("lastname", |v| {
                json!(format!("{}OVICH", v["name"].as_str().unwrap_or_default()))
            }),
        )
    }

    #[tokio::test]
    async fn test_passthrough_identity() {
        let ctx = ExecCtx::default();
        let out = Passthrough::new()
            .invoke(&ctx, json!({"k": [1, 2]}))
            .await
            .unwrap();
        assert_eq!(out.value, json!({"k": [1, 2]}));
    }

    #[tokio::test]
    async fn test_passthrough_transform_forwards_chunks() {
        let ctx = ExecCtx::default();
        let input = stream::iter(vec![Ok(json!("a")), Ok(json!("b"))]).boxed();
        let chunks: Vec<_> = Passthrough::new().transform(&ctx, input).collect().await;
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_assign_adds_field() {
        let ctx = ExecCtx::default();
        let out = Passthrough::assign(lastname_fields())
            .invoke(&ctx, json!({"name": "Abram"}))
            .await
            .unwrap();
        assert_eq!(out.value, json!({"name": "Abram", "lastname": "AbramOVICH"}));
    }

    #[tokio::test]
    async fn test_assign_new_field_wins_on_collision() {
        let ctx = ExecCtx::default();
        let fields = Parallel::new("fields").branch("name", Lambda::map("shout", |v| {
            json!(v["name"].as_str().unwrap_or_default().to_uppercase())
        }));
        let out = Assign::new(fields)
            .invoke(&ctx, json!({"name": "abram", "age": 3}))
            .await
            .unwrap();
        assert_eq!(out.value, json!({"age": 3, "name": "ABRAM"}));
    }

    #[tokio::test]
    async fn test_assign_fields_see_original_input_only() {
        let ctx = ExecCtx::default();
        let fields = Parallel::new("fields")
            .branch("a", Lambda::map("a", |_| json!(1)))
            .branch("b", Lambda::map("b", |v| json!(v.get("a").is_some())));
        let out = Assign::new(fields).invoke(&ctx, json!({})).await.unwrap();
        assert_eq!(out.value, json!({"a": 1, "b": false}));
    }

    #[tokio::test]
    async fn test_assign_rejects_non_object() {
        let ctx = ExecCtx::default();
        let err = Assign::new(lastname_fields())
            .invoke(&ctx, json!("Abram"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Contract { .. }));
    }

    #[tokio::test]
    async fn test_assign_stream_matches_invoke() {
        let ctx = ExecCtx::default();
        let assign = Assign::new(lastname_fields());
        let streamed = chunk::collect(assign.stream(&ctx, json!({"name": "Abram"})))
            .await
            .unwrap();
        let invoked = assign.invoke(&ctx, json!({"name": "Abram"})).await.unwrap();
        assert_eq!(streamed, invoked.value);
    }
}
