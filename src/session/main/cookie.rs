//! Set-Cookie assembly and signalling headers.
//!
//! Every cookie the core writes goes through [`build_cookie`] so the
//! attribute set stays uniform: `Path=/`, computed `Expires`, configured
//! `SameSite`/`Domain`, and `Secure` unless the request host is localhost.

use chrono::{DateTime, Utc};
use http::header::{HOST, SET_COOKIE};
use http::{HeaderMap, HeaderValue};

use crate::config::SessionConfig;
use crate::session::errors::SessionError;

const COOKIE_SESSION_TOKEN: &str = "sSessionToken";
const COOKIE_ANONYMOUS_SESSION_TOKEN: &str = "sAnonymousSessionToken";
const COOKIE_ANTI_CSRF_TOKEN: &str = "sAntiCsrfToken";
const COOKIE_PUBLIC_DATA_TOKEN: &str = "sPublicDataToken";
const COOKIE_ID_REFRESH_TOKEN: &str = "sIdRefreshToken";

/// Request header carrying the double-submit CSRF token.
pub(crate) const HEADER_ANTI_CSRF: &str = "anti-csrf-token";
/// Response header set when CSRF validation fails.
pub(crate) const HEADER_CSRF_ERROR: &str = "anti-csrf-token-error";
/// Response header set when a new session is minted.
pub(crate) const HEADER_SESSION_CREATED: &str = "session-created";
/// Response header set when the public-data cookie changes.
pub(crate) const HEADER_PUBLIC_DATA_TOKEN: &str = "public-data-token";

pub(crate) fn session_token_cookie_name(config: &SessionConfig) -> String {
    format!("{}{COOKIE_SESSION_TOKEN}", config.cookie_prefix)
}

pub(crate) fn anonymous_session_token_cookie_name(config: &SessionConfig) -> String {
    format!("{}{COOKIE_ANONYMOUS_SESSION_TOKEN}", config.cookie_prefix)
}

pub(crate) fn anti_csrf_token_cookie_name(config: &SessionConfig) -> String {
    format!("{}{COOKIE_ANTI_CSRF_TOKEN}", config.cookie_prefix)
}

pub(crate) fn public_data_token_cookie_name(config: &SessionConfig) -> String {
    format!("{}{COOKIE_PUBLIC_DATA_TOKEN}", config.cookie_prefix)
}

pub(crate) fn id_refresh_token_cookie_name(config: &SessionConfig) -> String {
    format!("{}{COOKIE_ID_REFRESH_TOKEN}", config.cookie_prefix)
}

fn is_localhost(req_headers: &HeaderMap) -> bool {
    req_headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| host.starts_with("localhost") || host.starts_with("127.0.0.1"))
        .unwrap_or(false)
}

fn cookie_expires(expires_at: DateTime<Utc>) -> String {
    expires_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn build_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    name: &str,
    value: &str,
    expires_at: DateTime<Utc>,
    http_only: bool,
) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; Expires={}; SameSite={}",
        cookie_expires(expires_at),
        config.same_site.as_str()
    );
    if let Some(domain) = &config.domain {
        cookie.push_str(&format!("; Domain={domain}"));
    }
    if config.secure_cookies && !is_localhost(req_headers) {
        cookie.push_str("; Secure");
    }
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

fn append_set_cookie(headers: &mut HeaderMap, cookie: String) -> Result<(), SessionError> {
    let value = HeaderValue::from_str(&cookie)
        .map_err(|_| SessionError::Cookie("Failed to encode Set-Cookie header".to_string()))?;
    headers.append(SET_COOKIE, value);
    Ok(())
}

/// Drop any pending `Set-Cookie` for `name` so a following append leaves
/// exactly one value.
fn remove_set_cookie(headers: &mut HeaderMap, name: &str) {
    let prefix = format!("{name}=");
    let kept: Vec<HeaderValue> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter(|v| {
            v.to_str()
                .map(|s| !s.starts_with(&prefix))
                .unwrap_or(true)
        })
        .cloned()
        .collect();
    headers.remove(SET_COOKIE);
    for value in kept {
        headers.append(SET_COOKIE, value);
    }
}

pub(crate) fn set_session_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), SessionError> {
    append_set_cookie(
        headers,
        build_cookie(
            config,
            req_headers,
            &session_token_cookie_name(config),
            token,
            expires_at,
            true,
        ),
    )
}

pub(crate) fn set_anonymous_session_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), SessionError> {
    let name = anonymous_session_token_cookie_name(config);
    remove_set_cookie(headers, &name);
    append_set_cookie(
        headers,
        build_cookie(config, req_headers, &name, token, expires_at, true),
    )
}

pub(crate) fn set_csrf_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), SessionError> {
    let name = anti_csrf_token_cookie_name(config);
    remove_set_cookie(headers, &name);
    // Client JS reads this cookie to echo it back in the anti-csrf-token
    // header, so it must not be HttpOnly.
    append_set_cookie(
        headers,
        build_cookie(config, req_headers, &name, token, expires_at, false),
    )
}

pub(crate) fn set_public_data_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), SessionError> {
    let name = public_data_token_cookie_name(config);
    remove_set_cookie(headers, &name);
    append_set_cookie(
        headers,
        build_cookie(config, req_headers, &name, token, expires_at, false),
    )?;
    headers.insert(HEADER_PUBLIC_DATA_TOKEN, HeaderValue::from_static("updated"));
    Ok(())
}

/// Clearing writes an empty value expiring at the epoch.
pub(crate) fn clear_session_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
) -> Result<(), SessionError> {
    let name = session_token_cookie_name(config);
    remove_set_cookie(headers, &name);
    append_set_cookie(
        headers,
        build_cookie(
            config,
            req_headers,
            &name,
            "",
            DateTime::<Utc>::UNIX_EPOCH,
            true,
        ),
    )
}

pub(crate) fn clear_anonymous_session_cookie(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    headers: &mut HeaderMap,
) -> Result<(), SessionError> {
    let name = anonymous_session_token_cookie_name(config);
    remove_set_cookie(headers, &name);
    append_set_cookie(
        headers,
        build_cookie(
            config,
            req_headers,
            &name,
            "",
            DateTime::<Utc>::UNIX_EPOCH,
            true,
        ),
    )
}

pub(crate) fn set_session_created_header(headers: &mut HeaderMap) {
    headers.insert(HEADER_SESSION_CREATED, HeaderValue::from_static("true"));
}

pub(crate) fn set_csrf_error_header(headers: &mut HeaderMap) {
    headers.insert(HEADER_CSRF_ERROR, HeaderValue::from_static("true"));
}
