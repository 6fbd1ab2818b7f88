//! Declared output shapes for [`StructuredOutputParser`](super::StructuredOutputParser).
//!
//! A [`Schema`] is a flat list of named fields, each with a JSON type, an
//! optional set of allowed values, and a description used to tell the model
//! what to produce.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::chunk::type_name;

/// JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// Whether `value` has this type. Integers also count as numbers.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// One named field of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "required_by_default")]
    pub required: bool,
    /// Allowed values. `None` means any value of the right type.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

fn required_by_default() -> bool {
    true
}

/// A field that failed validation and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

/// The fields a structured model answer must contain.
///
/// ```
/// use llm_runnable::output_parser::{FieldType, Schema};
/// use serde_json::json;
///
/// let schema = Schema::new()
///     .field("answer", FieldType::String, "answer to the user's question")
///     .one_of("confidence", ["low", "high"], "how sure you are");
///
/// assert!(schema.validate(&json!({"answer": "Paris", "confidence": "high"})).is_ok());
/// let violation = schema.validate(&json!({"answer": "Paris", "confidence": "total"})).unwrap_err();
/// assert_eq!(violation.field, "confidence");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn field(self, name: impl Into<String>, field_type: FieldType, description: impl Into<String>) -> Self {
        self.push(Field {
            name: name.into(),
            field_type,
            description: description.into(),
            required: true,
            allowed: None,
        })
    }

    /// Add a field the model may leave out (or set to `null`).
    pub fn optional(self, name: impl Into<String>, field_type: FieldType, description: impl Into<String>) -> Self {
        self.push(Field {
            name: name.into(),
            field_type,
            description: description.into(),
            required: false,
            allowed: None,
        })
    }

    /// Add a required string field restricted to `choices`.
    pub fn one_of<I, S>(self, name: impl Into<String>, choices: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Field {
            name: name.into(),
            field_type: FieldType::String,
            description: description.into(),
            required: true,
            allowed: Some(choices.into_iter().map(|c| Value::String(c.into())).collect()),
        })
    }

    /// Required string fields from `(name, description)` pairs.
    pub fn from_names_and_descriptions<I, N, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<String>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |schema, (name, desc)| schema.field(name, FieldType::String, desc))
    }

    /// Add a field, replacing any existing field with the same name.
    pub fn push(mut self, field: Field) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Check `value` against every field, reporting the first violation.
    ///
    /// Fields not declared in the schema are allowed through.
    pub fn validate(&self, value: &Value) -> Result<(), Violation> {
        let Value::Object(object) = value else {
            return Err(Violation {
                field: "$".to_string(),
                reason: format!("expected a JSON object, got {}", type_name(value)),
            });
        };
        self.fields.iter().try_for_each(|field| check_field(field, object))
    }

    /// Prompt text asking the model for output matching this schema.
    pub fn format_instructions(&self) -> String {
        let mut text = String::from(
            "Respond only with a JSON object in a ```json code block, with these fields:\n",
        );
        for field in &self.fields {
            let kind = match &field.allowed {
                Some(choices) => format!(
                    "one of {}",
                    choices.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
                ),
                None => field.field_type.as_str().to_string(),
            };
            let presence = if field.required { "required" } else { "optional" };
            text.push_str(&format!("- \"{}\" ({}, {})", field.name, kind, presence));
            if !field.description.is_empty() {
                text.push_str(": ");
                text.push_str(&field.description);
            }
            text.push('\n');
        }
        text
    }

    /// The schema as a JSON Schema document.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": field.field_type.as_str(),
                "description": field.description,
            });
            if let (Some(choices), Value::Object(map)) = (&field.allowed, &mut prop) {
                map.insert("enum".to_string(), Value::Array(choices.clone()));
            }
            properties.insert(field.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn check_field(field: &Field, object: &Map<String, Value>) -> Result<(), Violation> {
    let violation = |reason: String| Violation {
        field: field.name.clone(),
        reason,
    };
    let value = match object.get(&field.name) {
        None | Some(Value::Null) if field.required => {
            return Err(violation("missing required field".to_string()))
        }
        None | Some(Value::Null) => return Ok(()),
        Some(value) => value,
    };
    if !field.field_type.matches(value) {
        return Err(violation(format!(
            "expected {}, got {}",
            field.field_type.as_str(),
            type_name(value)
        )));
    }
    match &field.allowed {
        Some(choices) if !choices.contains(value) => Err(violation(format!(
            "{} is not one of {}",
            value,
            choices.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
        ))),
        _ => Ok(()),
    }
}
