//! Example: the three ways to drive a payload.
//!
//! Run with: `cargo run --example invoke_stream_batch`

use futures::StreamExt;
use llm_runnable::{
    Event, ExecCtx, FnEventHandler, LlmCall, MockBackend, Payload, PayloadExt, PromptTemplate,
    StrOutputParser,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ctx = ExecCtx::builder()
        .backend(Arc::new(MockBackend::uppercase()))
        .max_concurrency(2)
        .event_handler(Arc::new(FnEventHandler(|event: Event| {
            if let Event::PayloadEnd { name, ok } = event {
                eprintln!("[done] {} ok={}", name, ok);
            }
        })))
        .build();

    let chain = PromptTemplate::new("Write a short poem about {topic}.")?
        .pipe(LlmCall::new("poet"))
        .pipe(StrOutputParser::new());

    println!("--- invoke");
    let output = chain.invoke(&ctx, json!({"topic": "rust"})).await?;
    println!("{}", output.value);

    println!("--- stream");
    let mut chunks = chain.stream(&ctx, json!({"topic": "the sea"}));
    while let Some(chunk) = chunks.next().await {
        print!("{}", chunk?.as_str().unwrap_or_default());
        std::io::stdout().flush()?;
    }
    println!();

    println!("--- batch");
    let topics = ["owls", "ferns", "rivers"].map(|t| json!({"topic": t}));
    for output in chain.batch(&ctx, topics.to_vec()).await? {
        println!("{}", output.value);
    }

    println!("--- batch_settled");
    let mixed = vec![json!({"topic": "moss"}), json!({"subject": "no topic"})];
    for result in chain.batch_settled(&ctx, mixed).await {
        match result {
            Ok(output) => println!("ok: {}", output.value),
            Err(err) => println!("error: {}", err),
        }
    }

    Ok(())
}
