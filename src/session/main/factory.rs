//! Session creation, rolling refresh, revocation and cross-session
//! public-data propagation.

use chrono::{Duration, Utc};
use http::HeaderMap;
use serde_json::{Map, Value};

use crate::config::{SessionConfig, SessionMethod};
use crate::session::errors::SessionError;
use crate::session::types::{AnonymousSessionPayload, PublicData, SessionKernel, SessionRecord};
use crate::storage::{SessionPatch, SessionStorage};
use crate::utils::sha256_hex;

use super::cookie::{
    clear_anonymous_session_cookie, clear_session_cookie, set_anonymous_session_cookie,
    set_csrf_cookie, set_public_data_cookie, set_session_cookie, set_session_created_header,
};
use super::token::{
    new_anonymous_handle, new_anonymous_session_token, new_anti_csrf_token,
    new_authenticated_handle, new_public_data_token, new_session_token,
};

/// Anonymous session cookies written by a refresh are effectively
/// permanent.
const ANONYMOUS_REFRESH_LIFETIME_DAYS: i64 = 30 * 365;

/// Mint a fresh anonymous session: new handle, CSRF token and JWT, cookies
/// written, nothing stored server-side.
pub(crate) async fn create_anonymous_session(
    config: &SessionConfig,
    req_headers: &HeaderMap,
    res_headers: &mut HeaderMap,
) -> Result<SessionKernel, SessionError> {
    let anti_csrf_token = new_anti_csrf_token()?;
    let handle = new_anonymous_handle()?;
    let public_data = PublicData::anonymous();

    let jwt_payload = AnonymousSessionPayload {
        is_anonymous: true,
        handle: handle.clone(),
        public_data: public_data.clone(),
        anti_csrf_token: anti_csrf_token.clone(),
    };
    let token = new_anonymous_session_token(config, &jwt_payload)?;
    let expires_at = Utc::now() + Duration::minutes(config.anon_session_expiry_minutes);

    set_anonymous_session_cookie(config, req_headers, res_headers, &token, expires_at)?;
    set_csrf_cookie(config, req_headers, res_headers, &anti_csrf_token, expires_at)?;
    set_public_data_cookie(
        config,
        req_headers,
        res_headers,
        &new_public_data_token(&public_data.to_json()),
        expires_at,
    )?;
    clear_session_cookie(config, req_headers, res_headers)?;
    set_session_created_header(res_headers);

    tracing::debug!(handle = %handle, "Created anonymous session");

    Ok(SessionKernel::Anonymous {
        handle,
        public_data,
        jwt_payload,
        anti_csrf_token,
        anonymous_session_token: token,
    })
}

/// Mint an authenticated session, promoting the previous kernel when it was
/// anonymous: its public data becomes the base layer and any server-side
/// private data is carried over before the anonymous record is deleted.
pub(crate) async fn create_authenticated_session(
    config: &SessionConfig,
    storage: &dyn SessionStorage,
    req_headers: &HeaderMap,
    res_headers: &mut HeaderMap,
    prev: Option<&SessionKernel>,
    public_data: PublicData,
    private_data: Option<Map<String, Value>>,
) -> Result<SessionKernel, SessionError> {
    match config.method {
        SessionMethod::Essential => {}
        SessionMethod::Advanced => {
            return Err(SessionError::NotImplemented(
                "The advanced session method is recognized but has no implementation".to_string(),
            ));
        }
    }
    if public_data.user_id().is_none() {
        return Err(SessionError::PublicData(
            "`userId` is required to create an authenticated session".to_string(),
        ));
    }
    public_data.validate_roles()?;

    // Prior anonymous public data is the base layer; the new data wins.
    let mut merged_public = match prev {
        Some(SessionKernel::Anonymous { jwt_payload, .. }) => jwt_payload.public_data.clone(),
        _ => PublicData::new(),
    };
    merged_public.merge(public_data.into_map());
    merged_public.validate_roles()?;

    let mut merged_private = Map::new();
    if let Some(SessionKernel::Anonymous { handle, .. }) = prev {
        if let Some(record) = storage.get_session(handle).await? {
            merged_private = record.private_data_map()?;
            if let Err(err) = storage.delete_session(handle).await {
                tracing::warn!(
                    "Failed to delete anonymous session record {handle} during promotion: {err}"
                );
            }
        }
    }
    if let Some(private_data) = private_data {
        for (key, value) in private_data {
            merged_private.insert(key, value);
        }
    }

    let anti_csrf_token = new_anti_csrf_token()?;
    let handle = new_authenticated_handle()?;
    let public_data_json = merged_public.to_json();
    let session_token = new_session_token(&handle, &public_data_json)?;
    let expires_at = Utc::now() + Duration::minutes(config.session_expiry_minutes);

    storage
        .create_session(SessionRecord {
            handle: handle.clone(),
            user_id: merged_public.user_id().cloned(),
            expires_at: Some(expires_at),
            hashed_session_token: Some(sha256_hex(&session_token)),
            anti_csrf_token: anti_csrf_token.clone(),
            public_data: public_data_json.clone(),
            private_data: Value::Object(merged_private).to_string(),
        })
        .await?;

    set_session_cookie(config, req_headers, res_headers, &session_token, expires_at)?;
    set_csrf_cookie(config, req_headers, res_headers, &anti_csrf_token, expires_at)?;
    set_public_data_cookie(
        config,
        req_headers,
        res_headers,
        &new_public_data_token(&public_data_json),
        expires_at,
    )?;
    clear_anonymous_session_cookie(config, req_headers, res_headers)?;
    set_session_created_header(res_headers);

    tracing::debug!(handle = %handle, "Created authenticated session");

    Ok(SessionKernel::Authenticated {
        handle,
        public_data: merged_public,
        anti_csrf_token,
        session_token,
    })
}

/// Renew a session in place.
///
/// Anonymous kernels get a re-minted JWT (their public data lives inside
/// the token); authenticated kernels get their stored `expires_at` advanced
/// and, when the public data changed, the stored copy and client cookie
/// rewritten. The opaque session token itself is never rotated here.
pub(crate) async fn refresh_session(
    config: &SessionConfig,
    storage: &dyn SessionStorage,
    kernel: &mut SessionKernel,
    req_headers: &HeaderMap,
    res_headers: &mut HeaderMap,
    public_data_changed: bool,
) -> Result<(), SessionError> {
    match kernel {
        SessionKernel::Anonymous {
            handle,
            public_data,
            jwt_payload,
            anonymous_session_token,
            ..
        } => {
            jwt_payload.public_data = public_data.clone();
            let token = new_anonymous_session_token(config, jwt_payload)?;
            let expires_at = Utc::now() + Duration::days(ANONYMOUS_REFRESH_LIFETIME_DAYS);

            set_anonymous_session_cookie(config, req_headers, res_headers, &token, expires_at)?;
            set_public_data_cookie(
                config,
                req_headers,
                res_headers,
                &new_public_data_token(&public_data.to_json()),
                expires_at,
            )?;
            *anonymous_session_token = token;

            // Anonymous sessions only have a record once private data was
            // written; keep its public-data mirror current when present.
            if public_data_changed && storage.get_session(handle).await?.is_some() {
                let patch = SessionPatch {
                    public_data: Some(public_data.to_json()),
                    ..Default::default()
                };
                storage.update_session(handle, &patch).await?;
            }

            tracing::debug!(handle = %handle, "Refreshed anonymous session token");
        }
        SessionKernel::Authenticated {
            handle,
            public_data,
            ..
        } => {
            let expires_at = Utc::now() + Duration::minutes(config.session_expiry_minutes);
            let mut patch = SessionPatch {
                expires_at: Some(expires_at),
                ..Default::default()
            };
            if public_data_changed {
                let public_data_json = public_data.to_json();
                set_public_data_cookie(
                    config,
                    req_headers,
                    res_headers,
                    &new_public_data_token(&public_data_json),
                    expires_at,
                )?;
                patch.public_data = Some(public_data_json);
            }
            storage.update_session(handle, &patch).await?;

            tracing::debug!(handle = %handle, public_data_changed, "Extended session expiry");
        }
    }
    Ok(())
}

/// Delete a session record and synthesize its anonymous replacement in the
/// same response, so parallel client queries after a logout converge on one
/// cookie set instead of each minting their own.
pub(crate) async fn revoke_session(
    config: &SessionConfig,
    storage: &dyn SessionStorage,
    req_headers: &HeaderMap,
    res_headers: &mut HeaderMap,
    handle: &str,
) -> Result<SessionKernel, SessionError> {
    if let Err(err) = storage.delete_session(handle).await {
        tracing::warn!("Failed to delete session {handle} during revoke: {err}");
    }
    create_anonymous_session(config, req_headers, res_headers).await
}

/// Delete every session owned by a user, returning the affected handles.
/// Individual delete failures are swallowed.
pub(crate) async fn revoke_all_sessions_for_user(
    storage: &dyn SessionStorage,
    user_id: &Value,
) -> Result<Vec<String>, SessionError> {
    let records = storage.get_sessions(user_id).await?;
    let mut handles = Vec::with_capacity(records.len());
    for record in records {
        if let Err(err) = storage.delete_session(&record.handle).await {
            tracing::warn!(
                "Failed to delete session {} for user {user_id}: {err}",
                record.handle
            );
        }
        handles.push(record.handle);
    }
    Ok(handles)
}

/// Mirror the configured subset of an incoming public-data write into every
/// other session record owned by the same user.
pub(crate) async fn sync_public_data_across_sessions(
    config: &SessionConfig,
    storage: &dyn SessionStorage,
    user_id: &Value,
    current_handle: &str,
    data: &Map<String, Value>,
) -> Result<(), SessionError> {
    let synced: Map<String, Value> = config
        .public_data_keys_to_sync
        .iter()
        .filter_map(|key| data.get(key).map(|value| (key.clone(), value.clone())))
        .collect();
    if synced.is_empty() {
        return Ok(());
    }

    for record in storage.get_sessions(user_id).await? {
        if record.handle == current_handle {
            continue;
        }
        let mut public_data = record.public_data()?;
        public_data.merge(synced.clone());
        let patch = SessionPatch {
            public_data: Some(public_data.to_json()),
            ..Default::default()
        };
        storage.update_session(&record.handle, &patch).await?;
        tracing::debug!(handle = %record.handle, "Synchronized public data keys");
    }
    Ok(())
}
