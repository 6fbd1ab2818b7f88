use crate::output_parser::ParseError;
use thiserror::Error;

/// Errors produced by payloads and the composition engine.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input or output shape did not match what a composed unit accepts.
    #[error("Contract violation in '{unit}': {message}")]
    Contract { unit: String, message: String },

    /// A unit's internal work failed.
    #[error("Unit '{unit}' failed: {message}")]
    Execution { unit: String, message: String },

    /// An output parser could not extract the expected format.
    #[error("Parser '{unit}' failed: {source}")]
    Parse {
        unit: String,
        #[source]
        source: ParseError,
    },

    /// Output was well-formed but violated the declared schema.
    #[error("Schema mismatch in '{unit}' at field '{field}': {reason}")]
    SchemaMismatch {
        unit: String,
        field: String,
        reason: String,
    },

    /// A branch found no matching route and had no default.
    #[error("Branch '{branch}' has no matching route and no default")]
    RoutingExhausted { branch: String },

    /// Execution was aborted through the cancellation token.
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// A prompt template placeholder had no value.
    #[error("Template '{template}' is missing variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    /// Invalid configuration detected at build or first-invocation time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Shorthand for an [`PipelineError::Execution`] failure.
    pub fn execution(unit: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Execution {
            unit: unit.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`PipelineError::Contract`] violation.
    pub fn contract(unit: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Contract {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Whether a [`Retry`](crate::retry::Retry) wrapper should try again.
    ///
    /// Only failures of the underlying work qualify. Contract, parse, schema,
    /// routing, and cancellation errors would fail identically on a second run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Execution { .. } | PipelineError::Other(_)
        )
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<PipelineError>() {
            Ok(inner) => inner,
            Err(err) => PipelineError::Other(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anyhow_preserves_pipeline_error() {
        let err: anyhow::Error = PipelineError::Cancelled.into();
        let back: PipelineError = err.into();
        assert!(matches!(back, PipelineError::Cancelled));
    }

    #[test]
    fn test_anyhow_foreign_error_becomes_other() {
        let err = anyhow::anyhow!("disk on fire");
        let back: PipelineError = err.into();
        match back {
            PipelineError::Other(msg) => assert_eq!(msg, "disk on fire"),
            other => panic!("Expected Other, got {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::execution("model", "timeout").is_retryable());
        assert!(PipelineError::Other("flaky".into()).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::contract("prompt", "expected object").is_retryable());
        assert!(!PipelineError::RoutingExhausted {
            branch: "b".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = PipelineError::MissingVariable {
            template: "prompt".into(),
            variable: "topic".into(),
        };
        assert_eq!(err.to_string(), "Template 'prompt' is missing variable 'topic'");
    }
}
