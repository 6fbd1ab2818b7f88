//! Prompt templates.
//!
//! Templates use `{name}` placeholders. Use `{{` to insert a literal `{` and
//! `}}` to insert a literal `}`. A placeholder is filled from, in order:
//!
//! 1. the field of the same name in the input object (strings verbatim,
//!    other values as JSON)
//! 2. values fixed on the template with `partial`
//! 3. [`ExecCtx::vars`]
//!
//! A template with exactly one variable also accepts a non-object input,
//! which fills that variable.

use crate::backend::{ChatMessage, Role};
use crate::chunk::type_name;
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::payload::{BoxFut, Payload, PayloadOutput};
use crate::PipelineError;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A parsed `{placeholder}` template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source`, rejecting unbalanced or empty placeholders.
    ///
    /// ```
    /// use llm_runnable::prompt::Template;
    ///
    /// let t = Template::parse("Hi {name}, JSON: {{\"k\": 1}}").unwrap();
    /// assert_eq!(t.variables(), vec!["name"]);
    /// assert!(Template::parse("Hi {name").is_err());
    /// ```
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |what: &str| {
            PipelineError::InvalidConfig(format!("{} in template {:?}", what, source))
        };
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(invalid("unclosed '{'")),
                            Some(ch) => name.push(ch),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(invalid("empty placeholder"));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Var(name.to_string()));
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct variable names, in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Var(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Fill every placeholder through `lookup`. `Err` names the first
    /// variable `lookup` could not supply.
    pub fn render(&self, lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => out.push_str(&lookup(name.as_str()).ok_or_else(|| name.clone())?),
            }
        }
        Ok(out)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Where placeholder values come from for one invocation.
struct Bindings<'a> {
    input: &'a Value,
    /// The sole variable, when a non-object input stands in for it.
    sole: Option<&'a str>,
    partials: &'a HashMap<String, String>,
    vars: &'a HashMap<String, String>,
}

impl<'a> Bindings<'a> {
    fn new(
        input: &'a Value,
        variables: &[&'a str],
        partials: &'a HashMap<String, String>,
        ctx: &'a ExecCtx,
    ) -> Self {
        let sole = match (input, variables) {
            (Value::Object(_) | Value::Null, _) => None,
            (_, [only]) => Some(*only),
            _ => None,
        };
        Self {
            input,
            sole,
            partials,
            vars: &ctx.vars,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if self.sole == Some(name) {
            return Some(render_value(self.input));
        }
        self.input
            .get(name)
            .map(render_value)
            .or_else(|| self.partials.get(name).cloned())
            .or_else(|| self.vars.get(name).cloned())
    }
}

fn missing(template: &str, variable: String) -> PipelineError {
    PipelineError::MissingVariable {
        template: template.to_string(),
        variable,
    }
}

/// A single-string prompt.
///
/// ```
/// use llm_runnable::{ExecCtx, Payload, PromptTemplate};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let prompt = PromptTemplate::new("Tell me a {adjective} fact about {topic}.").unwrap();
/// let out = prompt
///     .invoke(&ExecCtx::default(), json!({"adjective": "curious", "topic": "cats"}))
///     .await
///     .unwrap();
/// assert_eq!(out.value, json!("Tell me a curious fact about cats."));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    template: Template,
    partials: HashMap<String, String>,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Result<Self> {
        Ok(Self {
            name: "prompt".to_string(),
            template: Template::parse(template)?,
            partials: HashMap::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fix a variable's value on the template itself.
    pub fn partial(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.partials.insert(key.into(), value.into());
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn variables(&self) -> Vec<&str> {
        self.template.variables()
    }

    /// Render against `input` without going through the payload interface.
    pub fn format(&self, ctx: &ExecCtx, input: &Value) -> Result<String> {
        let variables = self.template.variables();
        let bindings = Bindings::new(input, &variables, &self.partials, ctx);
        self.template
            .render(|name| bindings.lookup(name))
            .map_err(|variable| missing(&self.name, variable))
    }
}

impl Payload for PromptTemplate {
    fn kind(&self) -> &'static str {
        "prompt-template"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            let text = self.format(ctx, &input)?;
            Ok(PayloadOutput::from_value(Value::String(text)))
        })
    }
}

#[derive(Debug, Clone)]
enum ChatPart {
    Message(Role, Template),
    /// Splices the message array found under this input field.
    Placeholder(String),
}

/// A prompt rendered to a list of role-tagged chat messages.
///
/// The output is a JSON array of `{"role", "content"}` objects, which
/// [`LlmCall`](crate::LlmCall) reads as a conversation.
///
/// ```
/// use llm_runnable::backend::Role;
/// use llm_runnable::{ChatPromptTemplate, ExecCtx, Payload};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let prompt = ChatPromptTemplate::from_messages([
///     (Role::System, "You are a helpful chef."),
///     (Role::Human, "What can I cook with {ingredient}?"),
/// ])
/// .unwrap();
/// let out = prompt.invoke(&ExecCtx::default(), json!("eggs")).await.unwrap();
/// assert_eq!(out.value[1], json!({"role": "human", "content": "What can I cook with eggs?"}));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    name: String,
    parts: Vec<ChatPart>,
    partials: HashMap<String, String>,
}

impl ChatPromptTemplate {
    pub fn new() -> Self {
        Self {
            name: "chat-prompt".to_string(),
            parts: Vec::new(),
            partials: HashMap::new(),
        }
    }

    pub fn from_messages<'t>(messages: impl IntoIterator<Item = (Role, &'t str)>) -> Result<Self> {
        messages
            .into_iter()
            .try_fold(Self::new(), |chat, (role, template)| chat.message(role, template))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a templated message.
    pub fn message(mut self, role: Role, template: &str) -> Result<Self> {
        self.parts.push(ChatPart::Message(role, Template::parse(template)?));
        Ok(self)
    }

    /// Append the messages held in the input field `key` (e.g. chat history).
    pub fn placeholder(mut self, key: impl Into<String>) -> Self {
        self.parts.push(ChatPart::Placeholder(key.into()));
        self
    }

    pub fn partial(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.partials.insert(key.into(), value.into());
        self
    }

    /// Distinct variables across all message templates.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for part in &self.parts {
            if let ChatPart::Message(_, template) = part {
                for name in template.variables() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    /// Render against `input` without going through the payload interface.
    pub fn format_messages(&self, ctx: &ExecCtx, input: &Value) -> Result<Vec<ChatMessage>> {
        let variables = self.variables();
        let bindings = Bindings::new(input, &variables, &self.partials, ctx);
        let mut messages = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match part {
                ChatPart::Message(role, template) => {
                    let content = template
                        .render(|name| bindings.lookup(name))
                        .map_err(|variable| missing(&self.name, variable))?;
                    messages.push(ChatMessage::new(*role, content));
                }
                ChatPart::Placeholder(key) => {
                    let history = input
                        .get(key)
                        .ok_or_else(|| missing(&self.name, key.clone()))?;
                    messages.extend(self.spliced(key, history)?);
                }
            }
        }
        Ok(messages)
    }

    fn spliced(&self, key: &str, history: &Value) -> Result<Vec<ChatMessage>> {
        let Value::Array(items) = history else {
            return Err(PipelineError::contract(
                &self.name,
                format!("'{}' must be a message array, got {}", key, type_name(history)),
            ));
        };
        items
            .iter()
            .map(|item| {
                ChatMessage::from_value(item).ok_or_else(|| {
                    PipelineError::contract(&self.name, format!("'{}' holds a non-message: {}", key, item))
                })
            })
            .collect()
    }
}

impl Default for ChatPromptTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for ChatPromptTemplate {
    fn kind(&self) -> &'static str {
        "chat-prompt-template"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, ctx: &'a ExecCtx, input: Value) -> BoxFut<'a, Result<PayloadOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            let messages = self.format_messages(ctx, &input)?;
            let value = Value::Array(messages.iter().map(ChatMessage::to_value).collect());
            Ok(PayloadOutput::from_value(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_escapes() {
        let t = Template::parse("Output format: {{\"result\": {{\"value\": 42}}}}").unwrap();
        assert!(t.variables().is_empty());
        assert_eq!(
            t.render(|_| None).unwrap(),
            r#"Output format: {"result": {"value": 42}}"#
        );
    }

    #[test]
    fn test_parse_rejects_bad_braces() {
        assert!(matches!(Template::parse("a } b"), Err(PipelineError::InvalidConfig(_))));
        assert!(Template::parse("a {} b").is_err());
        assert!(Template::parse("a {x{y}} b").is_err());
    }

    #[test]
    fn test_variables_deduplicated() {
        let t = Template::parse("{a} and {b} and {a} again").unwrap();
        assert_eq!(t.variables(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_object_fields_and_json_rendering() {
        let prompt = PromptTemplate::new("{name} is {age}; tags: {tags}").unwrap();
        let out = prompt
            .invoke(
                &ExecCtx::default(),
                json!({"name": "Abram", "age": 31, "tags": ["a"]}),
            )
            .await
            .unwrap();
        assert_eq!(out.value, json!("Abram is 31; tags: [\"a\"]"));
    }

    #[tokio::test]
    async fn test_single_variable_accepts_bare_value() {
        let prompt = PromptTemplate::new("Question: {question}").unwrap();
        let out = prompt
            .invoke(&ExecCtx::default(), json!("why is the sky blue?"))
            .await
            .unwrap();
        assert_eq!(out.value, json!("Question: why is the sky blue?"));
    }

    #[tokio::test]
    async fn test_fallback_to_partials_then_ctx_vars() {
        let prompt = PromptTemplate::new("{a}-{b}-{c}")
            .unwrap()
            .partial("b", "partial")
            .partial("c", "partial");
        let ctx = ExecCtx::builder().var("c", "ctx").var("a", "ctx").build();
        let out = prompt.invoke(&ctx, json!({"a": "input"})).await.unwrap();
        assert_eq!(out.value, json!("input-partial-partial"));
        let out = prompt.invoke(&ctx, json!({})).await.unwrap();
        assert_eq!(out.value, json!("ctx-partial-partial"));
    }

    #[tokio::test]
    async fn test_missing_variable() {
        let prompt = PromptTemplate::new("{adjective} {topic}")
            .unwrap()
            .with_name("joke-prompt");
        let err = prompt
            .invoke(&ExecCtx::default(), json!({"adjective": "odd"}))
            .await
            .unwrap_err();
        match err {
            PipelineError::MissingVariable { template, variable } => {
                assert_eq!(template, "joke-prompt");
                assert_eq!(variable, "topic");
            }
            other => panic!("Expected MissingVariable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bare_value_with_two_variables_is_missing() {
        let prompt = PromptTemplate::new("{a} {b}").unwrap();
        let err = prompt.invoke(&ExecCtx::default(), json!("x")).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingVariable { .. }));
    }

    #[tokio::test]
    async fn test_chat_prompt_with_history() {
        let prompt = ChatPromptTemplate::new()
            .message(Role::System, "You answer in {language}.")
            .unwrap()
            .placeholder("history")
            .message(Role::Human, "{question}")
            .unwrap();
        assert_eq!(prompt.variables(), vec!["language", "question"]);

        let out = prompt
            .invoke(
                &ExecCtx::default(),
                json!({
                    "language": "French",
                    "question": "And now?",
                    "history": [
                        {"role": "user", "content": "Hi"},
                        {"role": "assistant", "content": "Bonjour"},
                    ],
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            out.value,
            json!([
                {"role": "system", "content": "You answer in French."},
                {"role": "human", "content": "Hi"},
                {"role": "ai", "content": "Bonjour"},
                {"role": "human", "content": "And now?"},
            ])
        );
    }

    #[tokio::test]
    async fn test_chat_placeholder_errors() {
        let prompt = ChatPromptTemplate::new().placeholder("history");
        let ctx = ExecCtx::default();
        assert!(matches!(
            prompt.invoke(&ctx, json!({})).await,
            Err(PipelineError::MissingVariable { .. })
        ));
        assert!(matches!(
            prompt.invoke(&ctx, json!({"history": "hi"})).await,
            Err(PipelineError::Contract { .. })
        ));
    }
}
