//! Session data model

use serde::{Deserialize, Serialize};

use crate::token::TokenClaims;

/// Profile fields cached alongside the tokens for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: &str, email: &str, name: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            email: Some(email.to_string()),
            name: Some(name.to_string()),
        }
    }

    /// Identity as carried in token claims (`userId` or `sub`, `email`, `name`)
    #[must_use]
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Self {
            user_id: claims.user_id.clone().or_else(|| claims.sub.clone()),
            email: claims.email.clone(),
            name: claims.name.clone(),
        }
    }

    /// Fill fields that are missing here from `other`
    #[must_use]
    pub fn or(mut self, other: &Identity) -> Self {
        if self.user_id.is_none() {
            self.user_id.clone_from(&other.user_id);
        }
        if self.email.is_none() {
            self.email.clone_from(&other.email);
        }
        if self.name.is_none() {
            self.name.clone_from(&other.name);
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.email.is_none() && self.name.is_none()
    }
}

/// One logical login session
///
/// The record is not stored as a single object; the session store spreads
/// it over individual keys in each backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub keep_login: bool,
    #[serde(default)]
    pub identity: Identity,
}

impl SessionRecord {
    #[must_use]
    pub fn new(access_token: &str, refresh_token: Option<&str>, keep_login: bool) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(ToString::to_string),
            keep_login,
            identity: Identity::default(),
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Replace the tokens after a refresh, keeping identity and policy
    ///
    /// A refresh response without a new refresh token keeps the old one.
    #[must_use]
    pub fn refreshed(&self, access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
            keep_login: self.keep_login,
            identity: self.identity.clone(),
        }
    }

    /// Fill missing identity fields from the access token claims
    #[must_use]
    pub fn with_identity_from_token(mut self) -> Self {
        if let Ok(claims) = crate::token::decode(&self.access_token) {
            self.identity = self.identity.or(&Identity::from_claims(&claims));
        }
        self
    }
}

/// Tokens returned by a refresh call or pushed by the native host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
