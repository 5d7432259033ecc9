use pathql_core::QueryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("Type '{0}' not found")]
    TypeNotFound(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Decode error at line {line} of {resource}: {message}")]
    Decode {
        resource: String,
        line: usize,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    Argument(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

impl serde::Serialize for DriverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
