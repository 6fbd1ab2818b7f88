//! Example: Passthrough, Parallel, Assign, Branch, bind, and retry.
//!
//! Run with: `cargo run --example builtin_runnables`

use llm_runnable::retriever::format_documents;
use llm_runnable::{
    Branch, Document, ExecCtx, Lambda, LlmCall, MockBackend, Parallel, Passthrough, Payload,
    PayloadExt, PromptTemplate, RetrieverPayload, RetryPolicy, StaticRetriever, StrOutputParser,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ctx = ExecCtx::builder()
        .backend(Arc::new(MockBackend::uppercase()))
        .build();

    // Assign: keep the input, add a computed field
    let assign = Passthrough::assign(Parallel::new("fields").branch(
        "lastname",
        Lambda::map("lastname", |v| {
            json!(format!("{}OVICH", v["name"].as_str().unwrap_or_default()))
        }),
    ));
    let output = assign.invoke(&ctx, json!({"name": "Abram"})).await?;
    println!("assign:   {}", output.value);

    // Parallel: retrieve context next to the untouched question
    let store = StaticRetriever::new(vec![
        Document::new("Harrison worked at Kensho."),
        Document::new("Bears like to eat honey."),
    ])
    .with_k(1);
    let rag = Parallel::new("rag-inputs")
        .branch(
            "context",
            RetrieverPayload::new("retriever", Arc::new(store)).pipe(Lambda::new(
                "format-docs",
                |docs| {
                    let docs: Vec<Document> = serde_json::from_value(docs)?;
                    Ok(json!(format_documents(&docs)))
                },
            )),
        )
        .branch("question", Passthrough::new())
        .pipe(PromptTemplate::new(
            "Answer using only this context:\n{context}\nQuestion: {question}",
        )?)
        .pipe(LlmCall::new("model"))
        .pipe(StrOutputParser::new());
    let output = rag.invoke(&ctx, json!("where did harrison work?")).await?;
    println!("rag:      {}", output.value);

    // Branch: route on a field, with a required default
    let router = Branch::builder("topic-router")
        .when_field_eq("topic", "rust", Lambda::map("rust", |_| json!("Rust has no GC.")))
        .when_field_eq("topic", "go", Lambda::map("go", |_| json!("Go has goroutines.")))
        .otherwise(Lambda::map("general", |_| json!("Every language has trade-offs.")))
        .build()?;
    for topic in ["rust", "go", "cobol"] {
        let output = router.invoke(&ctx, json!({"topic": topic})).await?;
        println!("branch:   {} -> {}", topic, output.value);
    }

    // Bind: stop generation at a marker
    let sql_backend = Arc::new(MockBackend::fixed("SELECT COUNT(*) FROM users;\nSQLResult: 7"));
    let sql = LlmCall::new("sql")
        .with_backend(sql_backend)
        .bind(json!({"stop": ["\nSQLResult:"]}));
    let output = sql.invoke(&ctx, json!("How many users are there?")).await?;
    println!("bind:     {}", output.value);

    // Retry: a flaky step that succeeds on the third call
    let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = calls.clone();
    let flaky = Lambda::new("flaky", move |v| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        anyhow::ensure!(n >= 3, "transient failure #{}", n);
        Ok(v)
    })
    .with_retry(RetryPolicy::new(5).with_initial_delay(Duration::from_millis(10)));
    let output = flaky.invoke(&ctx, json!("finally")).await?;
    println!("retry:    {} after {} calls", output.value, calls.load(std::sync::atomic::Ordering::SeqCst));

    Ok(())
}
