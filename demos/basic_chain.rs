//! Example: prompt | model | parser, the smallest useful chain.
//!
//! Uses the uppercasing mock backend so it runs without a live model.
//!
//! Run with: `RUST_LOG=llm_runnable=debug cargo run --example basic_chain`

use llm_runnable::{ExecCtx, LlmCall, MockBackend, Payload, PayloadExt, PromptTemplate, StrOutputParser};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ctx = ExecCtx::builder()
        .backend(Arc::new(MockBackend::uppercase()))
        .build();

    let chain = PromptTemplate::new("Tell me a {adjective} fact about {topic}.")?
        .pipe(LlmCall::new("model"))
        .pipe(StrOutputParser::new());

    let output = chain
        .invoke(&ctx, json!({"adjective": "curious", "topic": "cats"}))
        .await?;
    println!("{}", output.value);

    // The same chain with a chat prompt in front
    let chat = llm_runnable::ChatPromptTemplate::from_messages([
        (llm_runnable::Role::System, "You are a helpful chef."),
        (llm_runnable::Role::Human, "What can I cook with {ingredient}?"),
    ])?
    .pipe(LlmCall::new("chef"))
    .pipe(StrOutputParser::new());
    let output = chat.invoke(&ctx, json!("eggs")).await?;
    println!("{}", output.value);

    Ok(())
}
