#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the session-keeper library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod biometric;
pub mod bridge;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod refresh;
pub mod service;
pub mod session;
pub mod settings;
pub mod storage;
pub mod token;
pub mod utils;

// Testing utilities - available for unit tests and integration tests with the testing feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use biometric::{BiometricGate, BiometricPolicy};
pub use bridge::{HostProbe, MessageSink, NativeBridge, NativeTransport};
pub use error::{AuthError, BridgeError, DecodeError, RefreshError, StorageError};
pub use events::{LogoutReason, SessionEvent, SessionEvents};
pub use lifecycle::TokenLifecycleManager;
pub use models::{Identity, SessionRecord, TokenPair};
pub use orchestrator::AutoLoginOrchestrator;
pub use refresh::{HttpTokenRefresher, TokenRefresher};
pub use service::{SessionBackends, SessionService};
pub use session::SessionStore;
pub use settings::KeeperSettings;
