//! Test fixtures providing pre-built test objects
//!
//! Unsigned JWTs with chosen claims, in-memory backend sets, and canned
//! native host messages.

use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Identity, SessionRecord};
use crate::session::{keys, CookieLifetimes, SessionStore};
use crate::storage::{BackendKind, Lifetime, MemoryStorage, StorageBackend};
use crate::token;

use super::constants::{TEST_EMAIL, TEST_REFRESH_TOKEN, TEST_USER_ID, TEST_USER_NAME};

/// Mints structurally valid (unsigned) JWTs
pub struct TestTokens;

impl TestTokens {
    /// A token whose payload is exactly `payload`
    #[must_use]
    pub fn with_payload(payload: &Value) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.test-signature")
    }

    /// A token expiring at `exp` (seconds since the epoch)
    #[must_use]
    pub fn with_exp(exp: u64) -> String {
        Self::with_payload(&json!({
            "exp": exp,
            "sub": TEST_USER_ID,
            "jti": uuid::Uuid::new_v4().to_string(),
        }))
    }

    /// A token valid for another `secs` seconds
    #[must_use]
    pub fn valid_for_secs(secs: u64) -> String {
        Self::with_exp(token::current_time_ms() / 1000 + secs)
    }

    /// A token that expired `secs` seconds ago
    #[must_use]
    pub fn expired_secs_ago(secs: u64) -> String {
        Self::with_exp((token::current_time_ms() / 1000).saturating_sub(secs))
    }
}

/// Three in-memory backends standing in for cookie, session and durable
/// storage
pub struct TestBackends {
    pub cookie: Arc<MemoryStorage>,
    pub session: Arc<MemoryStorage>,
    pub durable: Arc<MemoryStorage>,
}

impl Default for TestBackends {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBackends {
    #[must_use]
    pub fn new() -> Self {
        Self::with_durable(MemoryStorage::new(BackendKind::Durable))
    }

    /// Use a specific durable backend (for example one with a quota)
    #[must_use]
    pub fn with_durable(durable: MemoryStorage) -> Self {
        Self {
            cookie: Arc::new(MemoryStorage::new(BackendKind::Cookie)),
            session: Arc::new(MemoryStorage::session_scoped()),
            durable: Arc::new(durable),
        }
    }

    /// A fresh store over these backends
    #[must_use]
    pub fn store(&self) -> SessionStore {
        SessionStore::new(
            self.cookie.clone(),
            self.session.clone(),
            self.durable.clone(),
            CookieLifetimes::default(),
        )
    }

    /// Put a token straight into one backend, bypassing the store
    ///
    /// # Panics
    ///
    /// Panics if the backend rejects the write
    pub fn seed(&self, backend: &dyn StorageBackend, access_token: &str, keep_login: Option<bool>) {
        let lifetime = Lifetime::Session(Duration::from_secs(60));
        backend.set(keys::ACCESS_TOKEN, access_token, lifetime).unwrap();
        backend.set(keys::REFRESH_TOKEN, TEST_REFRESH_TOKEN, lifetime).unwrap();
        backend.set(keys::IS_LOGGED_IN, "true", lifetime).unwrap();
        if let Some(keep_login) = keep_login {
            backend
                .set(keys::KEEP_LOGIN, &keep_login.to_string(), lifetime)
                .unwrap();
        }
    }

    /// A record for the standard test user
    #[must_use]
    pub fn record(access_token: &str, keep_login: bool) -> SessionRecord {
        SessionRecord::new(access_token, Some(TEST_REFRESH_TOKEN), keep_login)
            .with_identity(Identity::new(TEST_USER_ID, TEST_EMAIL, TEST_USER_NAME))
    }

    /// Access token currently held by each backend
    ///
    /// # Panics
    ///
    /// Panics if a backend cannot be read
    #[must_use]
    pub fn tokens(&self) -> [Option<String>; 3] {
        [
            self.cookie.get(keys::ACCESS_TOKEN).unwrap(),
            self.session.get(keys::ACCESS_TOKEN).unwrap(),
            self.durable.get(keys::ACCESS_TOKEN).unwrap(),
        ]
    }

    /// Access token held by durable storage
    ///
    /// # Panics
    ///
    /// Panics if the backend cannot be read
    #[must_use]
    pub fn durable_token(&self) -> Option<String> {
        self.durable.get(keys::ACCESS_TOKEN).unwrap()
    }
}

/// Canned messages from the native host
pub struct HostReplies;

impl HostReplies {
    #[must_use]
    pub fn biometric_status(available: bool, enabled: bool, require_for_auto_login: bool) -> Value {
        json!({
            "event": "biometricStatusResult",
            "detail": {
                "isAvailable": available,
                "biometricType": "fingerprint",
                "isEnabled": enabled,
                "requireForAutoLogin": require_for_auto_login
            }
        })
    }

    #[must_use]
    pub fn biometric_result(success: bool, error: Option<&str>) -> Value {
        json!({
            "event": "biometricAuthResult",
            "detail": { "success": success, "error": error }
        })
    }

    #[must_use]
    pub fn login_info(access_token: &str, refresh_token: Option<&str>, keep_login: bool) -> Value {
        json!({
            "event": "loginInfoReceived",
            "detail": {
                "userInfo": {
                    "accessToken": access_token,
                    "refreshToken": refresh_token,
                    "userId": TEST_USER_ID,
                    "email": TEST_EMAIL,
                    "name": TEST_USER_NAME
                },
                "keepLogin": keep_login
            }
        })
    }

    #[must_use]
    pub fn token_refreshed(access_token: &str, refresh_token: Option<&str>) -> Value {
        json!({
            "event": "tokenRefreshed",
            "detail": {
                "tokenData": { "accessToken": access_token, "refreshToken": refresh_token }
            }
        })
    }

    #[must_use]
    pub fn multi_device_logout(reason: &str) -> Value {
        json!({ "event": "multiDeviceLogout", "detail": { "reason": reason } })
    }

    #[must_use]
    pub fn auto_login_failed(reason: &str, message: &str) -> Value {
        json!({
            "event": "autoLoginFailed",
            "detail": { "reason": reason, "message": message }
        })
    }
}
