use std::fmt;

/// Error raised while lexing, parsing or compiling an entity query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    pub message: String,
    /// Byte offset into the query string, when the error maps to a position.
    pub position: Option<usize>,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} (at offset {})", self.message, pos),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for QueryError {}

/// Error type for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Transaction is no longer active")]
    TransactionClosed,

    #[error("No entity found for query")]
    NoResult,

    #[error("Query did not return a unique result: {0}")]
    NonUniqueResult(usize),

    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("Detached entity passed to persist: {0}")]
    DetachedEntity(String),

    #[error("Entity is not managed by this session: {0}")]
    NotManaged(String),

    #[error("Unknown persistence unit: {0}")]
    UnknownPersistenceUnit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;
