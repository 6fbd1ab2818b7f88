//! # Output parsers
//!
//! Turn raw model text into values. Model output is messy: reasoning in
//! `<think>` blocks, answers inside markdown fences, JSON wrapped in prose.
//! The helpers here deal with that without a second model call.
//!
//! ## Parser payloads
//!
//! | Payload | Use Case |
//! |---------|----------|
//! | [`StrOutputParser`] | Plain text, streamed incrementally |
//! | [`JsonOutputParser`] | Untyped JSON |
//! | [`StructuredOutputParser`] | JSON object validated against a [`Schema`] |
//!
//! ## Functions
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`parse_json`] | Extract a typed struct |
//! | [`parse_json_value`] | Extract untyped JSON |
//! | [`split_thinking`] | Separate `<think>` content from the answer |
//! | [`preprocess`] | Strip think blocks and trim |

pub mod error;
pub mod extract;
pub mod json;
pub mod parsers;
pub mod schema;

pub use error::ParseError;
pub use extract::{preprocess, split_thinking, ThinkFilter};
pub use json::{parse_json, parse_json_value};
pub use parsers::{JsonOutputParser, StrOutputParser, StructuredOutputParser};
pub use schema::{Field, FieldType, Schema, Violation};
