use actix_web::cookie::{
    time::{Duration as CookieDuration, OffsetDateTime},
    Cookie, CookieJar, SameSite,
};
use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use url::Url;

use super::{BackendKind, Lifetime, StorageBackend};
use crate::error::StorageError;

/// Options for cookie creation
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: SameSite::Strict,
            path: "/".to_string(),
        }
    }
}

impl CookieOptions {
    /// Cookie options for content served from `origin`
    ///
    /// `secure` is only set when the origin is HTTPS; an unparseable origin
    /// keeps the secure default.
    #[must_use]
    pub fn for_origin(origin: &str) -> Self {
        let secure = Url::parse(origin).map_or(true, |url| url.scheme() == "https");
        Self {
            secure,
            ..Default::default()
        }
    }
}

/// Cookie backend
///
/// Holds the cookie jar as the embedding page sees it. Every key is its own
/// cookie with a percent-encoded value. Expired cookies stay in the jar (so
/// their `Set-Cookie` removal can be forwarded) but read as absent.
pub struct CookieStorage {
    options: CookieOptions,
    jar: Mutex<CookieJar>,
}

impl CookieStorage {
    #[must_use]
    pub fn new(options: CookieOptions) -> Self {
        Self {
            options,
            jar: Mutex::new(CookieJar::new()),
        }
    }

    #[must_use]
    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Seed the jar from a `Cookie:` request header (`a=1; b=2`)
    ///
    /// Unparseable pairs are skipped.
    pub fn load_cookie_header(&self, header: &str) {
        let mut jar = self.jar();
        for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match Cookie::parse(pair.to_owned()) {
                Ok(cookie) => jar.add_original(cookie),
                Err(e) => log::debug!("Skipping unparseable cookie pair: {e}"),
            }
        }
    }

    /// `Set-Cookie` header values for every cookie written or expired
    #[must_use]
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.jar().delta().map(ToString::to_string).collect()
    }

    /// Build a cookie carrying `value` for `lifetime`
    #[must_use]
    pub fn build_cookie(&self, name: &str, value: &str, lifetime: Lifetime) -> Cookie<'static> {
        let max_age = to_cookie_duration(lifetime.duration());
        Cookie::build(name.to_owned(), urlencoding::encode(value).into_owned())
            .http_only(false)
            .secure(self.options.secure)
            .same_site(self.options.same_site)
            .path(self.options.path.clone())
            .max_age(max_age)
            .expires(OffsetDateTime::now_utc() + max_age)
            .finish()
    }

    /// Create an expired cookie to clear a specific cookie
    #[must_use]
    pub fn create_expired_cookie(&self, name: &str) -> Cookie<'static> {
        Cookie::build(name.to_owned(), "")
            .http_only(false)
            .secure(self.options.secure)
            .same_site(self.options.same_site)
            .path(self.options.path.clone())
            .max_age(CookieDuration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .finish()
    }

    fn jar(&self) -> MutexGuard<'_, CookieJar> {
        self.jar.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_cookie_duration(duration: Duration) -> CookieDuration {
    CookieDuration::seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

fn is_expired(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    cookie.expires_datetime().is_some_and(|at| at <= now)
        || cookie.max_age().is_some_and(|age| age <= CookieDuration::ZERO)
}

impl StorageBackend for CookieStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let jar = self.jar();
        let Some(cookie) = jar.get(key) else {
            return Ok(None);
        };
        if is_expired(cookie, OffsetDateTime::now_utc()) {
            return Ok(None);
        }

        match urlencoding::decode(cookie.value()) {
            Ok(Cow::Borrowed(value)) => Ok(Some(value.to_string())),
            Ok(Cow::Owned(value)) => Ok(Some(value)),
            Err(e) => {
                log::warn!("Ignoring cookie '{key}' with undecodable value: {e}");
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str, lifetime: Lifetime) -> Result<(), StorageError> {
        let cookie = self.build_cookie(key, value, lifetime);
        self.jar().add(cookie);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let cookie = self.create_expired_cookie(key);
        self.jar().add(cookie);
        Ok(())
    }
}
