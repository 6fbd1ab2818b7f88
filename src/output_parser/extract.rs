//! Text extraction helpers shared by the model unit and the parsers.
//!
//! Models wrap their answers in reasoning blocks, markdown fences, and
//! prose. These helpers peel those layers off so the parsers only ever see
//! the candidate payload.

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Remove `<think>` blocks from `text`, returning `(thinking, answer)`.
///
/// Block contents are joined with newlines into `thinking` (trimmed, `None`
/// when empty). An unclosed block swallows the rest of the text. The answer
/// is not trimmed, so it matches what [`ThinkFilter`] produces token by
/// token.
///
/// ```
/// use llm_runnable::output_parser::extract::split_thinking;
///
/// let (thinking, answer) = split_thinking("<think>cats purr</think>Cats purr.");
/// assert_eq!(thinking.as_deref(), Some("cats purr"));
/// assert_eq!(answer, "Cats purr.");
/// ```
pub fn split_thinking(text: &str) -> (Option<String>, String) {
    let mut answer = String::with_capacity(text.len());
    let mut thoughts: Vec<&str> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(THINK_OPEN) {
        answer.push_str(&rest[..open]);
        let inner = &rest[open + THINK_OPEN.len()..];
        match inner.find(THINK_CLOSE) {
            Some(close) => {
                thoughts.push(inner[..close].trim());
                rest = &inner[close + THINK_CLOSE.len()..];
            }
            None => {
                thoughts.push(inner.trim());
                rest = "";
            }
        }
    }
    answer.push_str(rest);

    let thinking = thoughts
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    ((!thinking.is_empty()).then_some(thinking), answer)
}

/// Incremental counterpart of [`split_thinking`] for token streams.
///
/// Feed tokens with [`push`](Self::push); each call returns the answer text
/// that is certain to lie outside a `<think>` block. A tag split across
/// tokens is held back until it can be decided.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    pending: String,
    inside: bool,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: &str) -> String {
        self.pending.push_str(token);
        let mut out = String::new();
        loop {
            let tag = if self.inside { THINK_CLOSE } else { THINK_OPEN };
            match self.pending.find(tag) {
                Some(at) => {
                    if !self.inside {
                        out.push_str(&self.pending[..at]);
                    }
                    self.pending.drain(..at + tag.len());
                    self.inside = !self.inside;
                }
                None => {
                    let settled = self.pending.len() - partial_tag_len(&self.pending, tag);
                    if !self.inside {
                        out.push_str(&self.pending[..settled]);
                    }
                    self.pending.drain(..settled);
                    return out;
                }
            }
        }
    }

    /// Flush whatever is held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside {
            String::new()
        } else {
            rest
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len().min(text.len() + 1))
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}

/// Strip `<think>` and `<thinking>` blocks, then trim.
///
/// ```
/// use llm_runnable::output_parser::extract::preprocess;
///
/// assert_eq!(preprocess("  <thinking>hmm</thinking> {\"a\": 1} "), "{\"a\": 1}");
/// ```
pub fn preprocess(text: &str) -> String {
    let (_, answer) = split_thinking(text);
    let (_, answer) = split_thinking(&answer.replace("<thinking>", THINK_OPEN).replace("</thinking>", THINK_CLOSE));
    answer.trim().to_string()
}

/// Body of the first fenced code block, optionally restricted to a language.
///
/// With `lang = Some("json")` only `` ```json `` fences (case-insensitive)
/// match; with `None` any fence does.
///
/// ```
/// use llm_runnable::output_parser::extract::fenced_block;
///
/// let text = "Here:\n```json\n{\"a\": 1}\n```";
/// assert_eq!(fenced_block(text, Some("json")), Some("{\"a\": 1}"));
/// assert_eq!(fenced_block(text, Some("yaml")), None);
/// assert_eq!(fenced_block(text, None), Some("{\"a\": 1}"));
/// ```
pub fn fenced_block<'a>(text: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let mut rest = text;
    while let Some(fence) = rest.find("```") {
        let after = &rest[fence + 3..];
        let line_end = after.find('\n')?;
        let hint = after[..line_end].trim();
        let body = &after[line_end + 1..];
        let close = body.find("```")?;
        let wanted = match lang {
            Some(lang) => hint.eq_ignore_ascii_case(lang),
            None => true,
        };
        if wanted {
            return Some(body[..close].trim());
        }
        rest = &body[close + 3..];
    }
    None
}

/// The last balanced `open`..`close` region of `text`.
///
/// Nesting is tracked and delimiters inside JSON string literals are
/// ignored. Later regions win because models tend to put the answer last.
///
/// ```
/// use llm_runnable::output_parser::extract::find_bracketed;
///
/// assert_eq!(find_bracketed(r#"x {"a": [1]} y"#, '{', '}'), Some(r#"{"a": [1]}"#));
/// assert_eq!(find_bracketed("[1] then [2, 3]", '[', ']'), Some("[2, 3]"));
/// ```
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let mut last = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = i;
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                last = Some(&text[start..i + ch.len_utf8()]);
            }
        }
    }
    last
}
