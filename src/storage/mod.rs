//! Storage backends the session is persisted to
//!
//! Three independent backends hold copies of the session: durable storage
//! (survives restarts), session-scoped storage (cleared when the session
//! ends) and cookies. Each implements [`StorageBackend`]; only
//! [`crate::session::SessionStore`] writes to them.
//!
//! - [`memory`] - in-memory key/value storage with an optional byte quota
//! - [`file`] - durable storage persisted as a JSON document on disk
//! - [`cookie`] - cookie jar backend producing `Set-Cookie` values

pub mod cookie;
pub mod file;
pub mod memory;

use std::fmt;
use std::time::Duration;

use crate::error::StorageError;

pub use cookie::{CookieOptions, CookieStorage};
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Which physical backend a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Cookie,
    SessionScoped,
    Durable,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cookie => write!(f, "cookie"),
            BackendKind::SessionScoped => write!(f, "session"),
            BackendKind::Durable => write!(f, "durable"),
        }
    }
}

/// How long a written value should live
///
/// Web storages ignore this; the cookie backend turns it into `max-age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Short-lived session value
    Session(Duration),
    /// Long-lived value for "keep me logged in"
    Persistent(Duration),
}

impl Lifetime {
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Lifetime::Session(d) | Lifetime::Persistent(d) => d,
        }
    }
}

/// A string key/value persistence backend
pub trait StorageBackend: Send + Sync {
    /// The role this backend plays in the read priority order
    fn kind(&self) -> BackendKind;

    /// Read a value; expired or missing entries are `Ok(None)`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read at all
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the write (e.g. quota)
    fn set(&self, key: &str, value: &str, lifetime: Lifetime) -> Result<(), StorageError>;

    /// Remove a value; removing a missing key is not an error
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be modified
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
