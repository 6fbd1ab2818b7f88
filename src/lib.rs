//! # LLM Runnable
//!
//! Composable execution units for LLM workflows.
//!
//! Every building block (a prompt template, a model call, an output parser,
//! a plain function) implements one object-safe trait, [`Payload`], and can
//! be driven three ways: `invoke` for a single result, `stream` for partial
//! chunks as they are produced, and `batch` for many inputs with bounded
//! concurrency. Combinators build bigger payloads out of smaller ones, and
//! the result is again a payload:
//!
//! - **[`Sequence`]** (`a.pipe(b)`): feed one payload's output to the next
//! - **[`Parallel`]**: run named branches on the same input, collect an object
//! - **[`Branch`]**: route to the first payload whose predicate matches
//! - **[`Assign`]**: pass an object through, adding computed fields
//! - **[`Bound`]** (`a.bind(params)`): attach invocation params such as `stop`
//! - **[`Retry`]**: re-invoke on retryable failures with backoff
//!
//! Execution is configured by an [`ExecCtx`] (model backend, template
//! variables, cancellation token, concurrency bound, event handler) that is
//! passed by reference through the whole graph.
//!
//! ## Quick Start
//!
//! ```
//! use llm_runnable::backend::MockBackend;
//! use llm_runnable::{ExecCtx, LlmCall, Payload, PayloadExt, PromptTemplate, StrOutputParser};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let ctx = ExecCtx::builder()
//!     .backend(Arc::new(MockBackend::uppercase()))
//!     .build();
//!
//! let chain = PromptTemplate::new("Tell me a {adjective} fact about {topic}.")
//!     .unwrap()
//!     .pipe(LlmCall::new("model"))
//!     .pipe(StrOutputParser::new());
//!
//! let out = chain
//!     .invoke(&ctx, json!({"adjective": "curious", "topic": "cats"}))
//!     .await
//!     .unwrap();
//! assert_eq!(out.value, json!("TELL ME A CURIOUS FACT ABOUT CATS."));
//! # });
//! ```
//!
//! ## Streaming
//!
//! Folding every chunk of `stream(x)` with [`chunk::concat`] gives the same
//! value as `invoke(x)`. Payloads that can consume their input
//! incrementally override [`Payload::transform`], so a sequence streams end
//! to end instead of buffering at each step.

pub mod backend;
pub mod bound;
pub mod branch;
pub mod chunk;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod lambda;
pub mod llm_call;
pub mod output_parser;
pub mod parallel;
pub mod passthrough;
pub mod payload;
pub mod prompt;
pub mod retriever;
pub mod retry;
pub mod sequence;

pub use backend::{Backend, ChatMessage, LlmConfig, MockBackend, Role};
pub use bound::Bound;
pub use branch::{Branch, BranchBuilder, Predicate};
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler, RecordingHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use lambda::Lambda;
pub use llm_call::LlmCall;
pub use output_parser::{JsonOutputParser, ParseError, Schema, StrOutputParser, StructuredOutputParser};
pub use parallel::Parallel;
pub use passthrough::{Assign, Passthrough};
pub use payload::{BoxFut, ChunkStream, Payload, PayloadExt, PayloadOutput};
pub use prompt::{ChatPromptTemplate, PromptTemplate};
pub use retriever::{Document, Retriever, RetrieverPayload, StaticRetriever};
pub use retry::{JitterStrategy, Retry, RetryPolicy};
pub use sequence::Sequence;
