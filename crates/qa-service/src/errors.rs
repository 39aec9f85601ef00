//! Q&A service error types.
//!
//! Every core operation returns a typed `QaError`; the transport decides
//! what the user sees. `client_message()` is the only text that may leave
//! the process. Store and channel details are logged server-side.

use crate::store::StoreError;
use common::types::MeetingId;
use thiserror::Error;

/// Q&A service error type.
///
/// Maps to response codes:
/// - `InvalidArgument`: `INVALID_ARGUMENT` (1)
/// - `NotFound`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `InvalidState`, `NoParticipants`: `FAILED_PRECONDITION` (9)
/// - `Persistence`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `Draining`: `UNAVAILABLE` (7)
#[derive(Debug, Error)]
pub enum QaError {
    /// Referenced entity is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate create, or a guarded transition already happened.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Selection found nobody eligible to ask.
    #[error("No eligible participants in meeting {meeting_id}")]
    NoParticipants { meeting_id: MeetingId },

    /// The store call itself failed or missed its deadline.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Caller supplied a malformed value (e.g. an unparsable start time).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Session state does not allow the request (e.g. rotating from a
    /// user who is not in the meeting).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Too many live meetings on this instance.
    #[error("Meeting capacity exceeded")]
    CapacityExceeded,

    /// Instance is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QaError {
    /// Returns the response code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            QaError::InvalidArgument(_) => 1,
            QaError::NotFound(_) => 4,
            QaError::Conflict(_) => 5,
            QaError::Persistence(_) | QaError::Config(_) | QaError::Internal(_) => 6,
            QaError::CapacityExceeded | QaError::Draining => 7,
            QaError::InvalidState(_) | QaError::NoParticipants { .. } => 9,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            QaError::Persistence(_) | QaError::Config(_) | QaError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            QaError::NotFound(msg)
            | QaError::Conflict(msg)
            | QaError::InvalidArgument(msg)
            | QaError::InvalidState(msg) => msg.clone(),
            QaError::NoParticipants { .. } => "No participants available to ask".to_string(),
            QaError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            QaError::Draining => "Server is shutting down, please retry".to_string(),
        }
    }

    /// Whether the error means "the referenced thing does not exist".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, QaError::NotFound(_))
    }
}

impl From<StoreError> for QaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => QaError::NotFound(what),
            StoreError::Conflict(what) => QaError::Conflict(what),
            StoreError::Failure(detail) => QaError::Persistence(detail),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(QaError::InvalidArgument("bad time".into()).error_code(), 1);
        assert_eq!(QaError::NotFound("document 3".into()).error_code(), 4);
        assert_eq!(QaError::Conflict("hand already raised".into()).error_code(), 5);
        assert_eq!(QaError::Persistence("timeout".into()).error_code(), 6);
        assert_eq!(QaError::Internal("channel closed".into()).error_code(), 6);
        assert_eq!(QaError::CapacityExceeded.error_code(), 7);
        assert_eq!(QaError::Draining.error_code(), 7);
        assert_eq!(
            QaError::NoParticipants {
                meeting_id: MeetingId(1)
            }
            .error_code(),
            9
        );
        assert_eq!(QaError::InvalidState("not a presenter".into()).error_code(), 9);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = QaError::Persistence("connection refused at 10.0.0.12:5432".into());
        assert!(!err.client_message().contains("10.0.0"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = QaError::Internal("response receive failed".into());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_store_error_conversion_keeps_category() {
        let err: QaError = StoreError::NotFound("question 9".into()).into();
        assert!(err.is_not_found());

        let err: QaError = StoreError::Conflict("participant exists".into()).into();
        assert!(matches!(err, QaError::Conflict(_)));

        let err: QaError = StoreError::Failure("pool closed".into()).into();
        assert!(matches!(err, QaError::Persistence(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            QaError::NoParticipants {
                meeting_id: MeetingId(12)
            }
            .to_string(),
            "No eligible participants in meeting 12"
        );
        assert_eq!(
            QaError::NotFound("document 4".into()).to_string(),
            "Not found: document 4"
        );
    }
}
