use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl IndexError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StoreUnavailable(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// CLI exit code mapping: 0 success, 1 generic, 2 config, 3 store
    /// unavailable, 4 cancelled/timeout.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidInput(_) => 2,
            Self::StoreUnavailable(_) => 3,
            Self::Cancelled | Self::DeadlineExceeded => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(IndexError::config("x").exit_code(), 2);
        assert_eq!(IndexError::store_unavailable("x").exit_code(), 3);
        assert_eq!(IndexError::Cancelled.exit_code(), 4);
        assert_eq!(IndexError::DeadlineExceeded.exit_code(), 4);
        assert_eq!(IndexError::store("x").exit_code(), 1);
    }

    #[test]
    fn test_predicates() {
        assert!(IndexError::store("x").is_store_error());
        assert!(IndexError::store_unavailable("x").is_store_error());
        assert!(IndexError::Cancelled.is_cancellation());
        assert!(!IndexError::parse("x").is_store_error());
    }
}
