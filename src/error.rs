//! Unified error handling for switchboard.
//!
//! Centralizes the error hierarchy for credential checks, event routing,
//! and the persistence collaborator, with metric labeling.

use thiserror::Error;

/// Errors raised while checking a credential.
///
/// Every variant maps to an unauthorized response at the HTTP/upgrade
/// boundary; the distinctions exist for logging and metrics.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,

    #[error("token signature or encoding invalid")]
    InvalidToken,

    #[error("credential expired")]
    Expired,

    /// Signature-valid token that is no longer in the session store.
    /// This is what makes logout take effect before the embedded expiry.
    #[error("credential revoked")]
    Revoked,

    #[error("credential identity does not match the requested identity")]
    IdentityMismatch,

    #[error("no session for credential")]
    NotFound,
}

impl AuthError {
    /// Static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidToken => "invalid_token",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::IdentityMismatch => "identity_mismatch",
            Self::NotFound => "not_found",
        }
    }
}

/// Errors raised while routing or handling an event.
///
/// None of these close the originating connection. `UnsupportedEvent` and
/// `ValidationFailed` are logged and dropped; `Directory` failures are
/// logged and surfaced to the routing layer.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("event validation failed: {0}")]
    ValidationFailed(String),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
}

impl EventError {
    /// Static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Directory(_) => "directory_error",
        }
    }
}

/// Result type for event handlers.
pub type EventResult = Result<(), EventError>;

/// Failure surface of the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    Conflict,

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
