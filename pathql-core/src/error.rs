//! Error types for pathql-core.
//!
//! Every construction-time failure aborts plan compilation; execution errors
//! abort the current select call.

use thiserror::Error;

/// Query error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed SQL, selector or criteria text.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Named field absent on the bound schema, or a shape that cannot be descended.
    #[error("Schema resolution error: {0}")]
    SchemaResolution(String),

    /// Unsupported coercion, aggregate arity, IN operand kind or argument count.
    #[error("Compile error: {0}")]
    CompileError(String),

    /// Failure while walking or mapping concrete data.
    #[error("Execution error at '{field}': {message}")]
    ExecutionError { field: String, message: String },
}

impl QueryError {
    pub(crate) fn parse_at(message: impl AsRef<str>, fragment: &str, position: usize) -> Self {
        QueryError::ParseError(format!(
            "{} near '{}' at position {}",
            message.as_ref(),
            fragment,
            position
        ))
    }

    pub(crate) fn execution(field: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::ExecutionError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
