//! Biometric gate
//!
//! The web side never verifies biometrics itself. When the native host says
//! biometrics are enabled and required for automatic login, a restored
//! session is only used after the host reports a successful challenge.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::bridge::{BiometricStatus, BridgeReply, Delivery, EventKind, InboundEvent, NativeBridge, OutboundAction};
use crate::error::{AuthError, BridgeError};

/// Biometric policy as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BiometricPolicy {
    pub is_available: bool,
    pub biometric_type: Option<String>,
    pub is_enabled: bool,
    pub require_for_auto_login: bool,
}

impl BiometricPolicy {
    /// Whether a restored session must pass a challenge first
    #[must_use]
    pub fn requires_challenge(&self) -> bool {
        self.is_available && self.is_enabled && self.require_for_auto_login
    }
}

impl From<BiometricStatus> for BiometricPolicy {
    fn from(status: BiometricStatus) -> Self {
        Self {
            is_available: status.is_available,
            biometric_type: status.biometric_type,
            is_enabled: status.is_enabled,
            require_for_auto_login: status.require_for_auto_login,
        }
    }
}

pub struct BiometricGate {
    bridge: NativeBridge,
    reason: String,
    policy: Mutex<Option<BiometricPolicy>>,
}

impl BiometricGate {
    #[must_use]
    pub fn new(bridge: NativeBridge, reason: &str) -> Self {
        Self {
            bridge,
            reason: reason.to_string(),
            policy: Mutex::new(None),
        }
    }

    fn cached(&self) -> MutexGuard<'_, Option<BiometricPolicy>> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last policy fetched from the host, if any
    #[must_use]
    pub fn policy(&self) -> Option<BiometricPolicy> {
        self.cached().clone()
    }

    /// Ask the host for its current policy
    ///
    /// A missing host, a timeout or a malformed answer all yield an
    /// unavailable policy.
    pub async fn refresh_policy(&self) -> BiometricPolicy {
        let reply = self
            .bridge
            .request(
                OutboundAction::CheckBiometricStatus,
                EventKind::BiometricStatusResult,
                self.bridge.status_timeout(),
            )
            .await;

        let policy = match reply {
            Ok(BridgeReply::Reply(InboundEvent::BiometricStatusResult(status))) => status.into(),
            Ok(BridgeReply::NotAvailable) => BiometricPolicy::default(),
            Ok(BridgeReply::Reply(other)) => {
                log::warn!("Unexpected reply to checkBiometricStatus: {}", other.kind());
                BiometricPolicy::default()
            }
            Err(e) => {
                log::warn!("Biometric status unavailable, continuing without gate: {e}");
                BiometricPolicy::default()
            }
        };

        *self.cached() = Some(policy.clone());
        policy
    }

    /// Run the host's biometric challenge
    ///
    /// # Errors
    ///
    /// Returns `AuthError::BiometricDenied` if the host reports failure or
    /// does not answer in time
    pub async fn challenge(&self) -> Result<(), AuthError> {
        let reply = self
            .bridge
            .request(
                OutboundAction::RequestBiometricAuth {
                    reason: self.reason.clone(),
                },
                EventKind::BiometricAuthResult,
                self.bridge.interactive_timeout(),
            )
            .await;

        match reply {
            Ok(BridgeReply::Reply(InboundEvent::BiometricAuthResult { success: true, .. })) => {
                log::info!("Biometric challenge passed");
                Ok(())
            }
            Ok(BridgeReply::Reply(InboundEvent::BiometricAuthResult { success: false, error })) => {
                let reason = error.unwrap_or_else(|| "rejected by host".to_string());
                log::info!("Biometric challenge failed: {reason}");
                Err(AuthError::BiometricDenied(reason))
            }
            Ok(BridgeReply::Reply(other)) => Err(AuthError::BiometricDenied(format!(
                "unexpected reply {}",
                other.kind()
            ))),
            Ok(BridgeReply::NotAvailable) => {
                Err(AuthError::BiometricDenied("no native host".to_string()))
            }
            Err(e) => Err(AuthError::BiometricDenied(e.to_string())),
        }
    }

    /// Run `restore` if the host's policy allows it
    ///
    /// Skips the challenge when biometrics are unavailable, disabled or not
    /// required for automatic login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::BiometricDenied` when a required challenge fails;
    /// `restore` is not run in that case
    pub async fn guard<F, Fut>(&self, restore: F) -> Result<bool, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let policy = self.refresh_policy().await;
        if policy.requires_challenge() {
            self.challenge().await?;
        } else {
            log::debug!("Biometric gate skipped: {policy:?}");
        }
        Ok(restore().await)
    }

    /// Ask the host to enable biometric login
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses the message
    pub fn enable(&self) -> Result<Delivery, BridgeError> {
        let delivery = self.bridge.send(&OutboundAction::EnableBiometricAuth)?;
        *self.cached() = None;
        Ok(delivery)
    }

    /// Tell the host whether automatic login needs a biometric challenge
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses the message
    pub fn set_require_for_auto_login(&self, require: bool) -> Result<Delivery, BridgeError> {
        let delivery = self
            .bridge
            .send(&OutboundAction::SetBiometricAutoLogin { require })?;
        if let Some(policy) = self.cached().as_mut() {
            policy.require_for_auto_login = require;
        }
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HostReplies, MockHost};
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn run_guard(gate: &BiometricGate) -> (Result<bool, AuthError>, bool) {
        let ran = AtomicBool::new(false);
        let result = gate
            .guard(|| async {
                ran.store(true, Ordering::SeqCst);
                true
            })
            .await;
        (result, ran.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_web_environment_skips_gate() {
        let gate = BiometricGate::new(NativeBridge::web_only(), "unlock");
        let (result, ran) = run_guard(&gate).await;
        assert_eq!(result, Ok(true));
        assert!(ran);
        assert_eq!(gate.policy(), Some(BiometricPolicy::default()));
    }

    #[tokio::test]
    async fn test_not_required_skips_challenge() {
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, true, false));
        let gate = BiometricGate::new(host.android_bridge(), "unlock");

        let (result, ran) = run_guard(&gate).await;
        assert_eq!(result, Ok(true));
        assert!(ran);
        assert!(host.sent_actions().iter().all(|a| a != "requestBiometricAuth"));
    }

    #[tokio::test]
    async fn test_disabled_skips_challenge() {
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, false, true));
        let gate = BiometricGate::new(host.android_bridge(), "unlock");

        assert_eq!(run_guard(&gate).await, (Ok(true), true));
    }

    #[tokio::test]
    async fn test_required_and_passed() {
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, true, true));
        host.reply_to("requestBiometricAuth", HostReplies::biometric_result(true, None));
        let gate = BiometricGate::new(host.android_bridge(), "unlock");

        assert_eq!(run_guard(&gate).await, (Ok(true), true));
        let sent = host.sent();
        let prompt = sent
            .iter()
            .find(|m| m["action"] == "requestBiometricAuth")
            .unwrap();
        assert_eq!(prompt["payload"]["reason"], "unlock");
    }

    #[tokio::test]
    async fn test_required_and_denied() {
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, true, true));
        host.reply_to(
            "requestBiometricAuth",
            HostReplies::biometric_result(false, Some("user cancelled")),
        );
        let gate = BiometricGate::new(host.android_bridge(), "unlock");

        let (result, ran) = run_guard(&gate).await;
        assert_eq!(
            result,
            Err(AuthError::BiometricDenied("user cancelled".to_string()))
        );
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_timeout_is_denied() {
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, true, true));
        let gate = BiometricGate::new(host.android_bridge(), "unlock");

        let (result, ran) = run_guard(&gate).await;
        assert!(matches!(result, Err(AuthError::BiometricDenied(_))));
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_timeout_degrades_to_unavailable() {
        let host = MockHost::new();
        let gate = BiometricGate::new(host.android_bridge(), "unlock");

        assert_eq!(run_guard(&gate).await, (Ok(true), true));
        assert_eq!(gate.policy(), Some(BiometricPolicy::default()));
    }

    #[tokio::test]
    async fn test_set_require_updates_cached_policy() {
        let host = MockHost::new();
        host.reply_to("checkBiometricStatus", HostReplies::biometric_status(true, true, true));
        let gate = BiometricGate::new(host.android_bridge(), "unlock");
        gate.refresh_policy().await;

        assert_eq!(gate.set_require_for_auto_login(false).unwrap(), Delivery::Sent);
        assert!(!gate.policy().unwrap().require_for_auto_login);
        assert_eq!(host.sent().last().unwrap()["payload"]["require"], false);

        gate.enable().unwrap();
        assert_eq!(gate.policy(), None);
    }
}
