//! Session persistence
//!
//! - [`store`] - the session store, sole writer of every storage backend
//! - [`keys`] - storage key constants shared across backends

pub mod keys;
pub mod store;

pub use store::{CookieLifetimes, SessionStore, WriteOutcome};
