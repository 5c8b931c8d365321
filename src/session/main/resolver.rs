//! Request-credential resolution.
//!
//! Turns the cookies and headers of an incoming request into a
//! [`SessionKernel`], or `None` when no usable credential is present.
//! Credential defects (malformed tokens, bad signatures, stale records)
//! degrade to `None` so the entry point can mint a fresh anonymous session;
//! only CSRF failures propagate as errors.

use chrono::{Duration, Utc};
use headers::{Cookie, HeaderMapExt};
use http::{HeaderMap, Method};

use crate::config::{SessionConfig, csrf_protection_disabled};
use crate::session::errors::SessionError;
use crate::session::types::SessionKernel;
use crate::storage::SessionStorage;
use crate::utils::sha256_hex;

use super::cookie::{
    HEADER_ANTI_CSRF, anonymous_session_token_cookie_name, id_refresh_token_cookie_name,
    session_token_cookie_name, set_csrf_error_header,
};
use super::factory;
use super::token::{SESSION_TOKEN_VERSION_0, parse_anonymous_session_token, parse_session_token};

pub(crate) async fn resolve_session_kernel(
    config: &SessionConfig,
    storage: &dyn SessionStorage,
    req_headers: &HeaderMap,
    method: &Method,
    res_headers: &mut HeaderMap,
) -> Result<Option<SessionKernel>, SessionError> {
    let cookies: Option<Cookie> = req_headers.typed_get();
    let cookie_value = |name: &str| {
        cookies
            .as_ref()
            .and_then(|c| c.get(name))
            .map(str::to_string)
    };

    let session_token = cookie_value(&session_token_cookie_name(config));
    let anonymous_session_token = cookie_value(&anonymous_session_token_cookie_name(config));
    let id_refresh_token = cookie_value(&id_refresh_token_cookie_name(config));
    let presented_csrf = req_headers
        .get(HEADER_ANTI_CSRF)
        .and_then(|v| v.to_str().ok());

    let csrf_required = *method != Method::GET
        && *method != Method::OPTIONS
        && *method != Method::HEAD
        && !csrf_protection_disabled();

    if let Some(token) = session_token {
        return resolve_opaque_token(
            config,
            storage,
            req_headers,
            method,
            res_headers,
            &token,
            presented_csrf,
            csrf_required,
        )
        .await;
    }

    if id_refresh_token.is_some() {
        // Refresh tokens belong to the advanced method, which has no
        // resolver yet.
        tracing::debug!("Refresh token cookie present but the advanced method is not implemented");
        return Ok(None);
    }

    if let Some(token) = anonymous_session_token {
        return resolve_anonymous_token(
            config,
            res_headers,
            &token,
            presented_csrf,
            csrf_required,
        );
    }

    Ok(None)
}

/// Double-submit check. The CSRF verdict must land before any store
/// mutation or cookie write that trusts the credential.
fn check_anti_csrf(
    expected: &str,
    presented: Option<&str>,
    csrf_required: bool,
    res_headers: &mut HeaderMap,
) -> Result<(), SessionError> {
    if !csrf_required {
        return Ok(());
    }
    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => {
            tracing::debug!("anti-CSRF token does not match the session");
            set_csrf_error_header(res_headers);
            Err(SessionError::CsrfTokenMismatch)
        }
        None => {
            tracing::warn!("anti-CSRF token header missing on a state-changing request");
            set_csrf_error_header(res_headers);
            Err(SessionError::CsrfTokenMismatch)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn resolve_opaque_token(
    config: &SessionConfig,
    storage: &dyn SessionStorage,
    req_headers: &HeaderMap,
    method: &Method,
    res_headers: &mut HeaderMap,
    token: &str,
    presented_csrf: Option<&str>,
    csrf_required: bool,
) -> Result<Option<SessionKernel>, SessionError> {
    let parts = match parse_session_token(token) {
        Ok(parts) => parts,
        Err(err) => {
            tracing::debug!("Malformed session token: {}", err);
            return Ok(None);
        }
    };
    if parts.version != SESSION_TOKEN_VERSION_0 {
        tracing::warn!("Unknown session token version: {}", parts.version);
        return Ok(None);
    }

    let Some(record) = storage.get_session(&parts.handle).await? else {
        tracing::debug!("No session record for handle {}", parts.handle);
        return Ok(None);
    };
    if record.hashed_session_token.as_deref() != Some(sha256_hex(token).as_str()) {
        tracing::debug!("Session token hash does not match the stored record");
        return Ok(None);
    }
    if record.is_expired(Utc::now()) {
        tracing::debug!("Session record for handle {} has expired", record.handle);
        return Ok(None);
    }

    check_anti_csrf(
        &record.anti_csrf_token,
        presented_csrf,
        csrf_required,
        res_headers,
    )?;

    let public_data = record.public_data()?;
    let mut kernel = SessionKernel::Authenticated {
        handle: record.handle.clone(),
        public_data,
        anti_csrf_token: record.anti_csrf_token.clone(),
        session_token: token.to_string(),
    };

    // Rolling refresh: reads never touch the store; a write request renews
    // the session once under three quarters of its lifetime remain, or
    // immediately when the stored public data no longer matches the
    // fingerprint inside the token.
    if *method != Method::GET {
        let public_data_changed = sha256_hex(&record.public_data) != parts.hashed_public_data;
        let quarter_elapsed = record
            .expires_at
            .map(|at| at - Utc::now() < Duration::seconds(config.session_expiry_minutes * 60 * 3 / 4))
            .unwrap_or(false);

        if public_data_changed || quarter_elapsed {
            tracing::debug!(
                handle = %record.handle,
                public_data_changed,
                quarter_elapsed,
                "Session due for refresh"
            );
            factory::refresh_session(
                config,
                storage,
                &mut kernel,
                req_headers,
                res_headers,
                public_data_changed,
            )
            .await?;
        }
    }

    Ok(Some(kernel))
}

fn resolve_anonymous_token(
    config: &SessionConfig,
    res_headers: &mut HeaderMap,
    token: &str,
    presented_csrf: Option<&str>,
    csrf_required: bool,
) -> Result<Option<SessionKernel>, SessionError> {
    let Some(payload) = parse_anonymous_session_token(config, token) else {
        return Ok(None);
    };

    check_anti_csrf(
        &payload.anti_csrf_token,
        presented_csrf,
        csrf_required,
        res_headers,
    )?;

    Ok(Some(SessionKernel::Anonymous {
        handle: payload.handle.clone(),
        public_data: payload.public_data.clone(),
        anti_csrf_token: payload.anti_csrf_token.clone(),
        jwt_payload: payload,
        anonymous_session_token: token.to_string(),
    }))
}
