use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaoError {
    /// Raised only while compiling an interface; never surfaced at call time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Duplicate result: {0}")]
    DuplicateResult(String),

    #[error("No result: {0}")]
    NoResult(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Batch chunk {chunk} failed: {source}")]
    BatchFailed {
        chunk: usize,
        #[source]
        source: Box<DaoError>,
    },

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Unknown method '{1}' on interface '{0}'")]
    UnknownMethod(String, String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DaoError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ParseError(_))
    }
}

pub type Result<T> = std::result::Result<T, DaoError>;

impl<T> From<std::sync::PoisonError<T>> for DaoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DaoError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}
