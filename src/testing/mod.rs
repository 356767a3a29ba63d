//! Unified testing utilities for session-keeper
//!
//! This module consolidates test helpers, fixtures, and mocks into a single
//! location shared by unit tests and the integration tests in `tests/`.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built test data (tokens, backends, host messages)
//! - [`builders`] - Fluent builders for session records and settings
//! - [`assertions`] - Custom assertion helpers for common patterns
//! - [`mock`] - A scripted native host and a counting refresher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_keeper::testing::{TestBackends, TestTokens};
//!
//! let backends = TestBackends::new();
//! let store = backends.store();
//! store.write(&TestBackends::record(&TestTokens::valid_for_secs(3600), true));
//! assert!(store.read().is_some());
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mock;

// Re-export commonly used items for convenience
pub use assertions::*;
pub use builders::*;
pub use fixtures::{HostReplies, TestBackends, TestTokens};
pub use mock::{MockHost, MockRefresher};

/// Common test constants
pub mod constants {
    /// Default test user id
    pub const TEST_USER_ID: &str = "user-123";

    /// Default test email address
    pub const TEST_EMAIL: &str = "test@example.com";

    /// Default test user name
    pub const TEST_USER_NAME: &str = "Test User";

    /// Default refresh token handed out by fixtures
    pub const TEST_REFRESH_TOKEN: &str = "refresh-1";
}
