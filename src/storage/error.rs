//! Error types for the state store

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while reading, decoding or writing the state document
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error during '{operation}': {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match any known shape
    #[error("Corrupt state document: {reason}")]
    Corrupt { reason: String },

    /// The document declares a schema this build does not understand
    #[error("Unsupported state document version {version}")]
    UnsupportedVersion { version: u64 },

    /// Serialization of the in-memory state failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }

    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    /// Whether the error means the stored bytes are unusable (as opposed to a
    /// failing disk)
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::UnsupportedVersion { .. } | Self::Serialization(_)
        )
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(StoreError::corrupt("bad").is_corruption());
        assert!(StoreError::UnsupportedVersion { version: 9 }.is_corruption());

        let io = StoreError::io("read", std::io::Error::other("disk"));
        assert!(!io.is_corruption());
        assert!(io.is_recoverable());
        assert!(io.to_string().contains("read"));
    }
}
