//! Error types for tfplug

/// Error type for tfplug operations
#[derive(Debug, thiserror::Error)]
pub enum TfplugError {
    #[error("Resource type not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource type registered twice: {0}")]
    DuplicateResource(String),

    #[error("Resource type mismatch: registered as {expected}, handler reports {actual}")]
    ResourceKindMismatch { expected: String, actual: String },

    #[error("Provider not configured")]
    ProviderNotConfigured,

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Invalid attribute path: {0}")]
    InvalidPath(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for tfplug operations
pub type Result<T> = std::result::Result<T, TfplugError>;
