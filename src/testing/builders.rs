//! Fluent builders for creating customizable test objects
//!
//! This module provides builder patterns for creating test objects with custom
//! configurations while maintaining sensible defaults.

use crate::models::{Identity, SessionRecord};
use crate::settings::KeeperSettings;
use crate::token;

use super::constants::{TEST_EMAIL, TEST_REFRESH_TOKEN, TEST_USER_ID, TEST_USER_NAME};
use super::fixtures::TestTokens;

/// Builder for creating customized session records
pub struct TestSessionBuilder {
    expires_in_secs: i64,
    refresh_token: Option<String>,
    keep_login: bool,
    identity: Identity,
}

impl TestSessionBuilder {
    /// A one-hour session for the standard test user
    #[must_use]
    pub fn new() -> Self {
        Self {
            expires_in_secs: 3600,
            refresh_token: Some(TEST_REFRESH_TOKEN.to_string()),
            keep_login: false,
            identity: Identity::new(TEST_USER_ID, TEST_EMAIL, TEST_USER_NAME),
        }
    }

    /// Set expiry time (seconds from now; negative for the past)
    #[must_use]
    pub fn expires_in_secs(mut self, secs: i64) -> Self {
        self.expires_in_secs = secs;
        self
    }

    /// Create an expired session
    #[must_use]
    pub fn expired(mut self) -> Self {
        self.expires_in_secs = -60;
        self
    }

    #[must_use]
    pub fn keep_login(mut self, keep_login: bool) -> Self {
        self.keep_login = keep_login;
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<&str>) -> Self {
        self.refresh_token = refresh_token.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Build the record
    #[must_use]
    pub fn build(self) -> SessionRecord {
        let now_secs = i64::try_from(token::current_time_ms() / 1000).unwrap_or(i64::MAX);
        let exp = u64::try_from(now_secs.saturating_add(self.expires_in_secs)).unwrap_or(0);
        SessionRecord::new(
            &TestTokens::with_exp(exp),
            self.refresh_token.as_deref(),
            self.keep_login,
        )
        .with_identity(self.identity)
    }
}

impl Default for TestSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating custom test settings
pub struct TestSettingsBuilder {
    settings: KeeperSettings,
}

impl TestSettingsBuilder {
    #[must_use]
    pub fn new() -> Self {
        let mut settings = KeeperSettings::default();
        settings.application.origin = "https://app.example.com".to_string();
        settings.refresh.url = "https://app.example.com/api/auth/refresh".to_string();
        Self { settings }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.settings.application.origin = origin.to_string();
        self
    }

    #[must_use]
    pub fn with_refresh_margin_secs(mut self, secs: u64) -> Self {
        self.settings.session.refresh_margin_secs = secs;
        self
    }

    #[must_use]
    pub fn with_login_info_wait_ms(mut self, ms: u64) -> Self {
        self.settings.session.login_info_wait_ms = ms;
        self
    }

    #[must_use]
    pub fn with_durable_path(mut self, path: &str) -> Self {
        self.settings.storage.durable_path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn with_bridge_handler(mut self, handler: &str) -> Self {
        self.settings.bridge.handler_name = handler.to_string();
        self
    }

    #[must_use]
    pub fn build(self) -> KeeperSettings {
        self.settings
    }
}

impl Default for TestSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
