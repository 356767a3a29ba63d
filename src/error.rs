//! Error types shared across the session components
//!
//! Storage and decode errors are always recovered where they occur and fail
//! safe to "not logged in". Bridge and refresh errors travel up to the
//! orchestrator, which decides between a silent web-only fallback and asking
//! the user to log in again.

use std::fmt;
use std::time::Duration;

use crate::storage::BackendKind;

/// A token could not be decoded; callers treat it as absent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Failure of a single storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{backend} storage quota exceeded while writing '{key}'")]
    QuotaExceeded { backend: BackendKind, key: String },
    #[error("{backend} storage unavailable: {message}")]
    Unavailable {
        backend: BackendKind,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Native bridge failures
///
/// Absence of a native host is not an error; see `BridgeReply::NotAvailable`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("native host did not answer '{action}' within {timeout:?}")]
    Timeout { action: String, timeout: Duration },
    #[error("native transport rejected the message: {0}")]
    Transport(String),
    #[error("malformed bridge message: {0}")]
    Protocol(String),
    #[error("bridge closed before '{0}' was answered")]
    Closed(String),
}

/// Failures of the refresh network call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("refresh token rejected (status {status})")]
    Rejected { status: u16 },
    #[error("refresh request failed: {0}")]
    Network(String),
    #[error("refresh response invalid: {0}")]
    InvalidResponse(String),
}

/// Session-level outcomes that end or block a login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The native host rejected (or never answered) the biometric challenge
    BiometricDenied(String),
    /// The refresh token is invalid, expired or could not be used
    RefreshFailed(RefreshError),
    /// Another device invalidated this session
    MultiDeviceLogout(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::BiometricDenied(msg) => write!(f, "Biometric authentication denied: {msg}"),
            AuthError::RefreshFailed(err) => write!(f, "Token refresh failed: {err}"),
            AuthError::MultiDeviceLogout(reason) => {
                write!(f, "Logged out from another device: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::RefreshFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RefreshError> for AuthError {
    fn from(err: RefreshError) -> Self {
        AuthError::RefreshFailed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::BiometricDenied("cancelled".to_string());
        assert_eq!(err.to_string(), "Biometric authentication denied: cancelled");

        let err = AuthError::from(RefreshError::Rejected { status: 401 });
        assert_eq!(
            err.to_string(),
            "Token refresh failed: refresh token rejected (status 401)"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::QuotaExceeded {
            backend: BackendKind::Durable,
            key: "accessToken".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "durable storage quota exceeded while writing 'accessToken'"
        );
    }
}
