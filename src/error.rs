//! Error taxonomy shared by the graph, engagement and reader operations.

use crate::types::ValidationError;

/// Errors that can occur during engine operations.
///
/// Raised through `eyre::Report`; callers recover the variant with
/// `report.downcast_ref::<EngineError>()`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// An entity lookup failed.
    NotFound { kind: &'static str, id: String },
    /// Another writer held the entity group; safe to retry.
    TransactionConflict(String),
    /// A cursor, photo id or address had the wrong shape.
    MalformedInput(String),
    /// The document store failed for a non-contention reason.
    StoreUnavailable(String),
    /// A user tried to follow themselves.
    SelfFollow(String),
    /// A field failed validation.
    Validation(ValidationError),
}

impl EngineError {
    pub fn user_not_found(id: &str) -> Self {
        EngineError::NotFound {
            kind: "user",
            id: id.to_string(),
        }
    }

    pub fn photo_not_found(id: &str) -> Self {
        EngineError::NotFound {
            kind: "photo",
            id: id.to_string(),
        }
    }

    /// True if the caller may simply run the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransactionConflict(_))
    }

    /// True if the store itself failed rather than the request.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, EngineError::TransactionConflict(_) | EngineError::StoreUnavailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            EngineError::TransactionConflict(op) => write!(f, "transaction conflict in {}", op),
            EngineError::MalformedInput(msg) => write!(f, "malformed input: {}", msg),
            EngineError::StoreUnavailable(op) => write!(f, "store unavailable during {}", op),
            EngineError::SelfFollow(id) => write!(f, "user {} cannot follow themselves", id),
            EngineError::Validation(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::MalformedPhotoId(_) => EngineError::MalformedInput(e.to_string()),
            other => EngineError::Validation(other),
        }
    }
}

/// Find the engine error inside a report, if there is one.
pub fn engine_error(report: &eyre::Report) -> Option<&EngineError> {
    report.downcast_ref::<EngineError>()
}
