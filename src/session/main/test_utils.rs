//! Test utilities for session module tests

use std::sync::Arc;

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{Map, Value};

use crate::config::{SessionConfig, SessionConfigBuilder};
use crate::session::types::PublicData;
use crate::storage::InMemorySessionStore;

use super::{SessionContext, SessionManager};

pub(crate) const TEST_SECRET: &str = "an-adequately-long-signing-secret-for-tests";

/// Build a manager over a fresh in-memory store. The closure customizes the
/// config builder, which already carries the test secret.
pub(crate) fn test_manager(
    configure: impl FnOnce(SessionConfigBuilder) -> SessionConfigBuilder,
) -> (SessionManager, Arc<InMemorySessionStore>) {
    let builder = SessionConfig::builder().secret(TEST_SECRET);
    let config = configure(builder).build().unwrap();
    let store = Arc::new(InMemorySessionStore::new());
    (SessionManager::new(config, store.clone()), store)
}

/// All pending `Set-Cookie` values for a cookie name.
pub(crate) fn set_cookies_named(headers: &HeaderMap, name: &str) -> Vec<String> {
    let prefix = format!("{name}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|s| s.starts_with(&prefix))
        .map(str::to_string)
        .collect()
}

/// The value of the last pending `Set-Cookie` for a name (the one a browser
/// would keep).
pub(crate) fn set_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    set_cookies_named(headers, name).last().map(|cookie| {
        cookie
            .split(';')
            .next()
            .unwrap_or_default()
            .splitn(2, '=')
            .nth(1)
            .unwrap_or_default()
            .to_string()
    })
}

/// Build a follow-up request carrying the cookies a prior response set,
/// plus any extra headers. Cleared (empty-valued) cookies are dropped the
/// way a browser would drop them.
pub(crate) fn replay_request(res_headers: &HeaderMap, extra: &[(&str, &str)]) -> HeaderMap {
    let pairs: Vec<&str> = res_headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|s| s.split(';').next())
        .filter(|pair| !pair.ends_with('='))
        .collect();

    let mut req = HeaderMap::new();
    if !pairs.is_empty() {
        req.insert(COOKIE, HeaderValue::from_str(&pairs.join("; ")).unwrap());
    }
    for (name, value) in extra {
        req.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    req
}

/// Replay a response's cookies as a request, echoing the CSRF cookie into
/// the anti-csrf-token header when asked.
pub(crate) fn authed_request(res_headers: &HeaderMap, with_csrf: bool) -> HeaderMap {
    let csrf = set_cookie_value(res_headers, "sAntiCsrfToken");
    let mut extra = Vec::new();
    if with_csrf {
        if let Some(token) = &csrf {
            extra.push(("anti-csrf-token", token.as_str()));
        }
    }
    replay_request(res_headers, &extra)
}

/// Resolve a fresh request and promote it to an authenticated session.
pub(crate) async fn login_session(
    manager: &SessionManager,
    public_data: Value,
    private_data: Option<Map<String, Value>>,
) -> SessionContext {
    let mut context = manager
        .get_session(&HeaderMap::new(), &Method::GET)
        .await
        .unwrap();
    context
        .create(PublicData::from_value(public_data).unwrap(), private_data)
        .await
        .unwrap();
    context
}

/// Shorthand for a JSON object literal's map.
pub(crate) fn object(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}
