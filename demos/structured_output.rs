//! Example: structured output validated against a schema.
//!
//! Run with: `cargo run --example structured_output`

use llm_runnable::output_parser::FieldType;
use llm_runnable::{
    ExecCtx, LlmCall, MockBackend, Payload, PayloadExt, PipelineError, PromptTemplate, Schema,
    StructuredOutputParser,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Joke {
    setup: String,
    punchline: String,
    rating: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mock = MockBackend::new(vec![
        "<think>keep it short</think>```json\n{\"setup\": \"Why did the crab never share?\", \"punchline\": \"Because he's shellfish.\", \"rating\": 7}\n```".to_string(),
        "{\"setup\": \"Knock knock.\", \"punchline\": 42}".to_string(),
    ]);
    let ctx = ExecCtx::builder().backend(Arc::new(mock)).build();

    let parser = StructuredOutputParser::new(
        Schema::new()
            .field("setup", FieldType::String, "question to set up a joke")
            .field("punchline", FieldType::String, "answer to resolve the joke")
            .optional("rating", FieldType::Integer, "how funny the joke is, from 1 to 10"),
    );
    let prompt = PromptTemplate::new("Tell me a joke about {topic}.\n{format_instructions}")?
        .partial("format_instructions", parser.format_instructions());
    let chain = prompt.pipe(LlmCall::new("comedian")).pipe(parser);

    let output = chain.invoke(&ctx, json!({"topic": "crabs"})).await?;
    let joke: Joke = output.parse_as()?;
    println!("{}\n  {} ({:?}/10)", joke.setup, joke.punchline, joke.rating);

    match chain.invoke(&ctx, json!({"topic": "doors"})).await {
        Err(PipelineError::SchemaMismatch { field, reason, .. }) => {
            println!("rejected: field '{}' {}", field, reason)
        }
        other => println!("unexpected: {:?}", other.map(|o| o.value)),
    }

    Ok(())
}
