//! Session configuration.
//!
//! `SessionConfig` is constructed once at startup (builder or environment)
//! and passed through the request pipeline; nothing in the crate mutates it
//! after `build()`.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::session::errors::SessionError;
use crate::session::types::PublicData;

pub(crate) const ENV_NODE_ENV: &str = "NODE_ENV";
pub(crate) const ENV_SECRET_KEY: &str = "SESSION_SECRET_KEY";
pub(crate) const ENV_LEGACY_SECRET_KEY: &str = "SECRET_SESSION_KEY";
pub(crate) const ENV_DISABLE_CSRF: &str = "DANGEROUSLY_DISABLE_CSRF_PROTECTION";

const MIN_SECRET_BYTES: usize = 32;
const DEV_FALLBACK_SECRET: &str = "session-auth-dev-secret-do-not-use-in-production";

/// Default authenticated session lifetime: 30 days.
const DEFAULT_SESSION_EXPIRY_MINUTES: i64 = 30 * 24 * 60;
/// Default anonymous session lifetime: 5 years.
const DEFAULT_ANON_SESSION_EXPIRY_MINUTES: i64 = 5 * 365 * 24 * 60;

/// Credential scheme used for authenticated sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMethod {
    /// Opaque token carrying a public-data fingerprint.
    Essential,
    /// Rotating refresh tokens. Recognized but not implemented.
    Advanced,
}

impl FromStr for SessionMethod {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "essential" => Ok(Self::Essential),
            "advanced" => Ok(Self::Advanced),
            other => Err(SessionError::Config(format!(
                "Unknown session method: {other}"
            ))),
        }
    }
}

/// `SameSite` attribute applied to every cookie the core writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSiteValue {
    Strict,
    Lax,
    None,
}

impl SameSiteValue {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Application-supplied role/permission predicate.
///
/// Consulted by [`SessionContext::is_authorized`](crate::SessionContext::is_authorized)
/// and [`SessionContext::authorize`](crate::SessionContext::authorize) once the
/// core has established that the session is authenticated. The argument list
/// is opaque to the core.
pub trait AuthorizePredicate: Send + Sync {
    fn is_authorized(&self, public_data: &PublicData, args: &[Value]) -> bool;
}

impl<F> AuthorizePredicate for F
where
    F: Fn(&PublicData, &[Value]) -> bool + Send + Sync,
{
    fn is_authorized(&self, public_data: &PublicData, args: &[Value]) -> bool {
        self(public_data, args)
    }
}

/// Immutable session-core configuration.
pub struct SessionConfig {
    pub session_expiry_minutes: i64,
    pub anon_session_expiry_minutes: i64,
    pub method: SessionMethod,
    /// Prepended to every cookie name.
    pub cookie_prefix: String,
    pub secure_cookies: bool,
    pub same_site: SameSiteValue,
    pub domain: Option<String>,
    /// Public-data keys mirrored to every other session of the same user on
    /// `set_public_data`.
    pub public_data_keys_to_sync: Vec<String>,
    pub(crate) secret: Vec<u8>,
    pub(crate) is_authorized: Option<Arc<dyn AuthorizePredicate>>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_expiry_minutes", &self.session_expiry_minutes)
            .field(
                "anon_session_expiry_minutes",
                &self.anon_session_expiry_minutes,
            )
            .field("method", &self.method)
            .field("cookie_prefix", &self.cookie_prefix)
            .field("secure_cookies", &self.secure_cookies)
            .field("domain", &self.domain)
            .field("public_data_keys_to_sync", &self.public_data_keys_to_sync)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }
}

/// Builder for [`SessionConfig`].
#[derive(Default)]
pub struct SessionConfigBuilder {
    session_expiry_minutes: Option<i64>,
    anon_session_expiry_minutes: Option<i64>,
    method: Option<SessionMethod>,
    cookie_prefix: Option<String>,
    secure_cookies: Option<bool>,
    same_site: Option<SameSiteValue>,
    domain: Option<String>,
    public_data_keys_to_sync: Option<Vec<String>>,
    secret: Option<Vec<u8>>,
    is_authorized: Option<Arc<dyn AuthorizePredicate>>,
}

impl SessionConfigBuilder {
    /// Set the authenticated session lifetime in minutes (default: 30 days).
    #[must_use]
    pub fn session_expiry_minutes(mut self, minutes: i64) -> Self {
        self.session_expiry_minutes = Some(minutes);
        self
    }

    /// Set the anonymous session lifetime in minutes (default: 5 years).
    #[must_use]
    pub fn anon_session_expiry_minutes(mut self, minutes: i64) -> Self {
        self.anon_session_expiry_minutes = Some(minutes);
        self
    }

    /// Set the credential scheme (default: [`SessionMethod::Essential`]).
    #[must_use]
    pub fn method(mut self, method: SessionMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the prefix applied to every cookie name (default: empty).
    #[must_use]
    pub fn cookie_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cookie_prefix = Some(prefix.into());
        self
    }

    /// Set whether cookies carry the `Secure` attribute (default: true).
    /// Requests from localhost never get `Secure` regardless of this flag.
    #[must_use]
    pub fn secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = Some(secure);
        self
    }

    /// Set the cookie `SameSite` attribute (default: `Lax`).
    #[must_use]
    pub fn same_site(mut self, same_site: SameSiteValue) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Set the cookie `Domain` attribute (default: unset).
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the public-data keys synchronized across a user's sessions
    /// (default: `["role", "roles"]`).
    #[must_use]
    pub fn public_data_keys_to_sync(mut self, keys: Vec<String>) -> Self {
        self.public_data_keys_to_sync = Some(keys);
        self
    }

    /// Set the token-signing secret explicitly instead of reading it from the
    /// environment.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the role/permission predicate.
    #[must_use]
    pub fn is_authorized(mut self, predicate: Arc<dyn AuthorizePredicate>) -> Self {
        self.is_authorized = Some(predicate);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] when the secret is missing or too
    /// short under `NODE_ENV=production`, or when only the legacy
    /// `SECRET_SESSION_KEY` variable is set there.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        let secret = match self.secret {
            Some(secret) => secret,
            None => resolve_secret_from_env()?,
        };
        if production_mode() && secret.len() < MIN_SECRET_BYTES {
            return Err(SessionError::Config(format!(
                "{ENV_SECRET_KEY} must be at least {MIN_SECRET_BYTES} bytes in production"
            )));
        }

        Ok(SessionConfig {
            session_expiry_minutes: self
                .session_expiry_minutes
                .unwrap_or(DEFAULT_SESSION_EXPIRY_MINUTES),
            anon_session_expiry_minutes: self
                .anon_session_expiry_minutes
                .unwrap_or(DEFAULT_ANON_SESSION_EXPIRY_MINUTES),
            method: self.method.unwrap_or(SessionMethod::Essential),
            cookie_prefix: self.cookie_prefix.unwrap_or_default(),
            secure_cookies: self.secure_cookies.unwrap_or(true),
            same_site: self.same_site.unwrap_or(SameSiteValue::Lax),
            domain: self.domain,
            public_data_keys_to_sync: self
                .public_data_keys_to_sync
                .unwrap_or_else(|| vec!["role".to_string(), "roles".to_string()]),
            secret,
            is_authorized: self.is_authorized,
        })
    }
}

pub(crate) fn production_mode() -> bool {
    std::env::var(ENV_NODE_ENV)
        .map(|v| v == "production")
        .unwrap_or(false)
}

/// The CSRF kill-switch: any non-empty value disables enforcement.
pub(crate) fn csrf_protection_disabled() -> bool {
    std::env::var(ENV_DISABLE_CSRF)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

fn resolve_secret_from_env() -> Result<Vec<u8>, SessionError> {
    match std::env::var(ENV_SECRET_KEY) {
        Ok(secret) if !secret.is_empty() => Ok(secret.into_bytes()),
        _ if production_mode() => {
            if std::env::var(ENV_LEGACY_SECRET_KEY).is_ok() {
                Err(SessionError::Config(format!(
                    "{ENV_LEGACY_SECRET_KEY} has been renamed to {ENV_SECRET_KEY}; \
                     set {ENV_SECRET_KEY} instead"
                )))
            } else {
                Err(SessionError::Config(format!(
                    "{ENV_SECRET_KEY} is required in production"
                )))
            }
        }
        _ => Ok(DEV_FALLBACK_SECRET.as_bytes().to_vec()),
    }
}
