use thiserror::Error;

/// Result type for link store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Reasons a [`Link`](crate::Link) is rejected before any write is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("link field is required: {0}")]
    MissingField(&'static str),
    #[error("invalid link name: {0}")]
    InvalidName(String),
    #[error("invalid url (needs scheme and host): {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("link already exists: {0}")]
    Conflict(String),
    #[error("link not found: {0}")]
    NotFound(String),
    #[error("link is not associated with a store")]
    NoBackend,
    #[error("gave up creating a link after {attempts} conflicting attempts")]
    RetryExhausted { attempts: u32 },
    #[error("invalid continuation token: {0}")]
    InvalidToken(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StoreError {
    /// Returns `true` for the create-only collision outcome.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
