//! Output parsers as payloads.
//!
//! Each parser accepts model text (a string, or a chat message object whose
//! `content` is used) and turns it into a value:
//!
//! | Parser | Output |
//! |--------|--------|
//! | [`StrOutputParser`] | the text, unchanged; streams chunk by chunk |
//! | [`JsonOutputParser`] | any JSON value found in the text |
//! | [`StructuredOutputParser`] | a JSON object checked against a [`Schema`] |

use futures::future;
use futures::stream::StreamExt;
use serde_json::Value;

use super::error::ParseError;
use super::json::parse_json_value;
use super::schema::Schema;
use crate::chunk::type_name;
use crate::dispatch::{guard_stream, observed};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, ChunkStream, Payload, PayloadOutput};
use crate::PipelineError;

/// The text carried by a model output value.
fn model_text<'v>(unit: &str, value: &'v Value) -> Result<&'v str> {
    match value {
        Value::String(text) => Ok(text),
        Value::Object(message) => message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::contract(unit, "message object has no string 'content'")),
        other => Err(PipelineError::contract(
            unit,
            format!("expected model text, got {}", type_name(other)),
        )),
    }
}

fn parse_failure(unit: &str, source: ParseError) -> PipelineError {
    PipelineError::Parse {
        unit: unit.to_string(),
        source,
    }
}

/// Passes model text through as a plain string.
///
/// Its `transform` handles each input chunk as it arrives, so
/// `prompt | model | StrOutputParser` streams tokens end to end.
#[derive(Debug, Clone)]
pub struct StrOutputParser {
    name: String,
}

impl StrOutputParser {
    pub fn new() -> Self {
        Self {
            name: "str-output-parser".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for StrOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for StrOutputParser {
    fn kind(&self) -> &'static str {
        "str-output-parser"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            let text = model_text(&self.name, &input)?;
            Ok(PayloadOutput::from_value(Value::String(text.to_string())))
        })
    }

    fn transform<'a>(&'a self, ctx: &'a ExecCtx, input: ChunkStream<'a>) -> ChunkStream<'a> {
        let chunks = input.filter_map(move |chunk| {
            future::ready(match chunk {
                Ok(Value::Null) => None,
                Ok(chunk) => Some(model_text(&self.name, &chunk).map(|t| Value::String(t.to_string()))),
                Err(err) => Some(Err(err)),
            })
        });
        guard_stream(ctx, chunks.boxed())
    }
}

/// Extracts a JSON value from model text.
///
/// Think blocks, markdown fences, and surrounding prose are tolerated. Input
/// that is already an object or array passes through unchanged.
#[derive(Debug, Clone)]
pub struct JsonOutputParser {
    name: String,
}

impl JsonOutputParser {
    pub fn new() -> Self {
        Self {
            name: "json-output-parser".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn parse(&self, input: &Value) -> Result<Value> {
        if (input.is_object() && input.get("content").is_none()) || input.is_array() {
            return Ok(input.clone());
        }
        let text = model_text(&self.name, input)?;
        parse_json_value(text).map_err(|e| parse_failure(&self.name, e))
    }
}

impl Default for JsonOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for JsonOutputParser {
    fn kind(&self) -> &'static str {
        "json-output-parser"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            let raw = model_text(&self.name, &input).map(str::to_string).ok();
            let value = self.parse(&input)?;
            let mut out = PayloadOutput::from_value(value);
            if let Some(raw) = raw {
                out.raw_response = raw;
            }
            Ok(out)
        })
    }
}

/// Parses model text as JSON and validates it against a [`Schema`].
///
/// Malformed text fails with [`PipelineError::Parse`]; well-formed JSON that
/// breaks the schema fails with [`PipelineError::SchemaMismatch`].
///
/// ```
/// use llm_runnable::output_parser::{Schema, StructuredOutputParser};
/// use llm_runnable::{ExecCtx, Payload};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let parser = StructuredOutputParser::new(Schema::from_names_and_descriptions([
///     ("answer", "answer to the user's question"),
/// ]));
/// let out = parser
///     .invoke(&ExecCtx::default(), json!("```json\n{\"answer\": \"Paris\"}\n```"))
///     .await
///     .unwrap();
/// assert_eq!(out.value, json!({"answer": "Paris"}));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct StructuredOutputParser {
    name: String,
    schema: Schema,
    json: JsonOutputParser,
}

impl StructuredOutputParser {
    pub fn new(schema: Schema) -> Self {
        let name = "structured-output-parser".to_string();
        Self {
            json: JsonOutputParser::new().with_name(name.clone()),
            name,
            schema,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.json = self.json.with_name(self.name.clone());
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Prompt text describing the expected output; see [`Schema::format_instructions`].
    pub fn format_instructions(&self) -> String {
        self.schema.format_instructions()
    }
}

impl Payload for StructuredOutputParser {
    fn kind(&self) -> &'static str {
        "structured-output-parser"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(observed(ctx, &self.name, "structured-output-parser", async move {
            let out = self.json.invoke(ctx, input).await?;
            self.schema
                .validate(&out.value)
                .map_err(|v| PipelineError::SchemaMismatch {
                    unit: self.name.clone(),
                    field: v.field,
                    reason: v.reason,
                })?;
            Ok(out)
        }))
    }
}
