//! Custom assertion helpers for common testing patterns

use crate::session::keys;
use crate::storage::StorageBackend;
use crate::token;

use super::fixtures::TestBackends;

/// Assert that no backend holds any session key
///
/// # Panics
///
/// Panics if any backend still holds a session key.
pub fn assert_session_cleared(backends: &TestBackends) {
    for (name, backend) in [
        ("cookie", backends.cookie.as_ref()),
        ("session", backends.session.as_ref()),
        ("durable", backends.durable.as_ref()),
    ] {
        for key in keys::ALL_KEYS {
            assert_eq!(
                backend.get(key).unwrap(),
                None,
                "Expected '{key}' to be cleared from {name} storage"
            );
        }
    }
}

/// Assert that a backend holds exactly `expected` as its access token
///
/// # Panics
///
/// Panics if the backend holds a different token or none.
pub fn assert_backend_token(backend: &dyn StorageBackend, expected: &str) {
    assert_eq!(
        backend.get(keys::ACCESS_TOKEN).unwrap().as_deref(),
        Some(expected),
        "{} storage holds the wrong access token",
        backend.kind()
    );
}

/// Assert that a token decodes and has not expired
///
/// # Panics
///
/// Panics if the token is malformed or expired.
pub fn assert_token_valid(access_token: &str) {
    assert!(
        token::is_valid(access_token, token::current_time_ms()),
        "Expected a valid, unexpired token"
    );
}
