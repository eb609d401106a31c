//! Error types shared by the indexing queue crates.

use thiserror::Error;

/// Errors raised while decoding shared types or loading configuration.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TypesError::Config("missing db_path".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing db_path");

        let err = TypesError::InvalidInput("id must be > 0".to_string());
        assert_eq!(err.to_string(), "Invalid input: id must be > 0");
    }
}
