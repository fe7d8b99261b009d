//! Error taxonomy shared by the store, the bus and the lifecycle services

use miette::Diagnostic;
use thiserror::Error;

use crate::core::identity::EntityPrefix;
use crate::core::workflow::TransitionError;

/// Errors raised by a [`Repository`](crate::core::store::Repository)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to (de)serialize document: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Errors raised by a [`MessageBus`](crate::core::bus::MessageBus)
#[derive(Debug, Error)]
pub enum BusError {
    #[error("message bus is closed")]
    Closed,

    #[error("failed to encode event payload: {0}")]
    Encode(String),
}

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error, Diagnostic)]
pub enum LifecycleError {
    #[error("{kind} {id} not found")]
    #[diagnostic(code(sitecare::not_found))]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    #[diagnostic(
        code(sitecare::invalid_transition),
        help("use one of the allowed target statuses")
    )]
    InvalidTransition(#[from] TransitionError),

    #[error("Precondition failed: {message}")]
    #[diagnostic(code(sitecare::precondition_failed))]
    PreconditionFailed { message: String },

    #[error("{defect_id} is already linked to issue {issue_id}")]
    #[diagnostic(code(sitecare::already_linked))]
    AlreadyLinked { defect_id: String, issue_id: String },

    #[error("{id} cannot be deleted: {reason}")]
    #[diagnostic(code(sitecare::not_deletable))]
    NotDeletable { id: String, reason: String },

    #[error("{id} was modified concurrently (expected version {expected}, found {found})")]
    #[diagnostic(
        code(sitecare::conflict),
        help("reload the record and retry the operation")
    )]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Store unavailable: {0}")]
    #[diagnostic(code(sitecare::store_unavailable), help("retry with backoff"))]
    StoreUnavailable(String),

    #[error("Stored record is unreadable: {0}")]
    #[diagnostic(
        code(sitecare::corrupt_record),
        help("the document no longer matches the record schema; repair it by hand")
    )]
    CorruptRecord(String),

    #[error("Invalid input: {0}")]
    #[diagnostic(code(sitecare::invalid))]
    Invalid(String),
}

impl LifecycleError {
    pub fn not_found(prefix: EntityPrefix, id: impl ToString) -> Self {
        LifecycleError::NotFound {
            kind: prefix.kind(),
            id: id.to_string(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        LifecycleError::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Whether a caller may retry the same operation with fresh data
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Conflict { .. } | LifecycleError::StoreUnavailable(_)
        )
    }
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => LifecycleError::NotFound { kind, id },
            StoreError::Conflict {
                id,
                expected,
                found,
            } => LifecycleError::Conflict {
                id,
                expected,
                found,
            },
            StoreError::Duplicate(id) => {
                LifecycleError::Invalid(format!("{} already exists", id))
            }
            StoreError::Unavailable(msg) => LifecycleError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => LifecycleError::CorruptRecord(msg),
        }
    }
}

pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LifecycleError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(LifecycleError::Conflict {
            id: "ISS-1".into(),
            expected: 1,
            found: 2
        }
        .is_retryable());
        assert!(!LifecycleError::precondition("open defects").is_retryable());
        assert!(!LifecycleError::not_found(EntityPrefix::Iss, "ISS-1").is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: LifecycleError = StoreError::Conflict {
            id: "QAD-1".into(),
            expected: 3,
            found: 4,
        }
        .into();
        assert!(matches!(err, LifecycleError::Conflict { expected: 3, .. }));

        let err: LifecycleError = StoreError::Unavailable("deadline elapsed".into()).into();
        assert!(matches!(err, LifecycleError::StoreUnavailable(_)));
    }

    #[test]
    fn test_unreadable_document_is_not_retryable() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: LifecycleError = StoreError::from(bad).into();
        assert!(matches!(err, LifecycleError::CorruptRecord(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = LifecycleError::not_found(EntityPrefix::Wty, "WTY-123");
        assert_eq!(err.to_string(), "warranty WTY-123 not found");
    }
}
