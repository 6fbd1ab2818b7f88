//! Document retrieval.
//!
//! A [`Retriever`] maps a query string to relevant [`Document`]s.
//! [`RetrieverPayload`] wraps one as a payload so it can sit inside a graph,
//! typically as one branch of a [`Parallel`](crate::Parallel) that builds the
//! `{context, question}` input of a RAG prompt.

use crate::chunk::type_name;
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, Payload, PayloadOutput};
use crate::{dispatch::guarded, PipelineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A piece of text with free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Join document contents with blank lines, for stuffing into a prompt.
pub fn format_documents(docs: &[Document]) -> String {
    docs.iter()
        .map(|d| d.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Source of documents relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;

    fn name(&self) -> &'static str;
}

/// In-memory retriever ranking documents by word overlap with the query.
///
/// Ties keep insertion order. Documents sharing no word with the query are
/// never returned.
///
/// ```
/// use llm_runnable::retriever::{Retriever, StaticRetriever};
///
/// # tokio_test::block_on(async {
/// let store = StaticRetriever::from_texts([
///     "Cats sleep most of the day.",
///     "Rust has no garbage collector.",
/// ]);
/// let docs = store.retrieve("how long do cats sleep").await.unwrap();
/// assert_eq!(docs[0].page_content, "Cats sleep most of the day.");
/// assert_eq!(docs.len(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct StaticRetriever {
    documents: Vec<Document>,
    k: usize,
}

impl StaticRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents, k: 4 }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(Document::new).collect())
    }

    /// Return at most `k` documents (default 4).
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let wanted = words(query);
        let mut scored: Vec<(usize, &Document)> = self
            .documents
            .iter()
            .map(|doc| (words(&doc.page_content).intersection(&wanted).count(), doc))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(self.k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Runs a [`Retriever`] as a payload.
///
/// Input is the query string, or an object with a string `query` field.
/// Output is an array of documents as JSON objects.
pub struct RetrieverPayload {
    name: String,
    retriever: Arc<dyn Retriever>,
}

impl RetrieverPayload {
    pub fn new(name: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            name: name.into(),
            retriever,
        }
    }

    fn query<'v>(&self, input: &'v Value) -> Result<&'v str> {
        match input {
            Value::String(query) => Ok(query),
            Value::Object(fields) => fields.get("query").and_then(Value::as_str).ok_or_else(|| {
                PipelineError::contract(&self.name, "object input needs a string 'query' field")
            }),
            other => Err(PipelineError::contract(
                &self.name,
                format!("expected a query string, got {}", type_name(other)),
            )),
        }
    }
}

impl Payload for RetrieverPayload {
    fn kind(&self) -> &'static str {
        "retriever"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            let query = self.query(&input)?;
            let docs = guarded(ctx, self.retriever.retrieve(query)).await?;
            debug!(unit = %self.name, retriever = self.retriever.name(), hits = docs.len(), "retrieved");
            Ok(PayloadOutput::from_value(serde_json::to_value(docs)?))
        })
    }
}

impl std::fmt::Debug for RetrieverPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieverPayload")
            .field("name", &self.name)
            .field("retriever", &self.retriever.name())
            .finish()
    }
}
