//! Session resolution entry point.

pub(crate) mod cookie;
mod context;
mod factory;
mod resolver;
mod token;

#[cfg(test)]
mod test_utils;


use std::sync::Arc;

use http::{Extensions, HeaderMap, Method};
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::session::errors::SessionError;
use crate::storage::SessionStorage;

pub use context::SessionContext;

/// Per-request shared handle to a resolved [`SessionContext`].
pub type SharedSessionContext = Arc<Mutex<SessionContext>>;

/// Resolves session contexts for incoming requests.
///
/// Cheap to clone; the configuration and storage handle are shared.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<SessionConfig>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            config: Arc::new(config),
            storage,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolve the session for one request.
    ///
    /// A request without a usable credential gets a fresh anonymous session;
    /// the returned context's [`response_headers`](SessionContext::response_headers)
    /// carry the resulting `Set-Cookie` and signalling headers and must be
    /// flushed with the response.
    ///
    /// # Errors
    ///
    /// [`SessionError::CsrfTokenMismatch`] when a state-changing request
    /// presents a valid credential without the matching `anti-csrf-token`
    /// header; merge [`SessionError::signalling_headers`] into the error
    /// response. Storage failures propagate as [`SessionError::Storage`].
    pub async fn get_session(
        &self,
        req_headers: &HeaderMap,
        method: &Method,
    ) -> Result<SessionContext, SessionError> {
        let mut res_headers = HeaderMap::new();

        let kernel = resolver::resolve_session_kernel(
            &self.config,
            self.storage.as_ref(),
            req_headers,
            method,
            &mut res_headers,
        )
        .await?;

        let kernel = match kernel {
            Some(kernel) => kernel,
            None => {
                factory::create_anonymous_session(&self.config, req_headers, &mut res_headers)
                    .await?
            }
        };

        Ok(SessionContext::new(
            self.config.clone(),
            self.storage.clone(),
            req_headers.clone(),
            res_headers,
            kernel,
        ))
    }

    /// Memoizing variant of [`get_session`](Self::get_session): the first
    /// call per request resolves and parks the context in the response
    /// extensions; later calls return the same handle without touching the
    /// store again.
    pub async fn get_session_cached(
        &self,
        req_headers: &HeaderMap,
        method: &Method,
        extensions: &mut Extensions,
    ) -> Result<SharedSessionContext, SessionError> {
        if let Some(existing) = extensions.get::<SharedSessionContext>() {
            return Ok(existing.clone());
        }
        let context = Arc::new(Mutex::new(self.get_session(req_headers, method).await?));
        extensions.insert(context.clone());
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::session::main::cookie::{HEADER_PUBLIC_DATA_TOKEN, HEADER_SESSION_CREATED};
    use crate::utils::base64url_decode;
    use http::header::SET_COOKIE;
    use serde_json::json;

    /// Test the cold-start path: a request with no cookies receives exactly
    /// one anonymous-session, CSRF and public-data cookie, the
    /// session-created header, and an anonymous context.
    /// It performs the following steps:
    /// 1. Resolves a GET request carrying no credentials
    /// 2. Counts the cookies written for each name
    /// 3. Decodes the public-data cookie back to JSON
    #[tokio::test]
    async fn test_cold_start_creates_anonymous_session() {
        // Given a manager and a credential-less request
        let (manager, _store) = test_manager(|b| b.anon_session_expiry_minutes(5));
        let req = HeaderMap::new();

        // When resolving the session
        let context = manager.get_session(&req, &Method::GET).await.unwrap();

        // Then the context is anonymous
        assert!(context.is_anonymous());
        assert!(context.user_id().is_none());
        assert!(context.handle().ends_with("-anonymous-jwt"));

        // And exactly one of each cookie was written
        let headers = context.response_headers();
        assert_eq!(set_cookies_named(headers, "sAnonymousSessionToken").len(), 1);
        assert_eq!(set_cookies_named(headers, "sAntiCsrfToken").len(), 1);
        assert_eq!(set_cookies_named(headers, "sPublicDataToken").len(), 1);

        // And the signalling headers are present
        assert_eq!(
            headers
                .get(HEADER_SESSION_CREATED)
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );
        assert_eq!(
            headers
                .get(HEADER_PUBLIC_DATA_TOKEN)
                .and_then(|v| v.to_str().ok()),
            Some("updated")
        );

        // And the public-data cookie decodes to {"userId": null}
        let token = set_cookie_value(headers, "sPublicDataToken").unwrap();
        let decoded = base64url_decode(&token).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value, json!({"userId": null}));
    }

    /// Test that the cold-start response clears any stale session cookie.
    #[tokio::test]
    async fn test_cold_start_clears_session_cookie() {
        let (manager, _store) = test_manager(|b| b);
        let req = HeaderMap::new();

        let context = manager.get_session(&req, &Method::GET).await.unwrap();

        let session_cookies = set_cookies_named(context.response_headers(), "sSessionToken");
        assert_eq!(session_cookies.len(), 1);
        assert!(session_cookies[0].starts_with("sSessionToken=;"));
    }

    /// Test per-request memoization: the second cached call returns the same
    /// context handle and writes nothing new.
    #[tokio::test]
    async fn test_get_session_cached_memoizes() {
        // Given a manager and one request's extensions
        let (manager, _store) = test_manager(|b| b);
        let req = HeaderMap::new();
        let mut extensions = Extensions::new();

        // When resolving twice against the same extensions
        let first = manager
            .get_session_cached(&req, &Method::GET, &mut extensions)
            .await
            .unwrap();
        let second = manager
            .get_session_cached(&req, &Method::GET, &mut extensions)
            .await
            .unwrap();

        // Then both are the same handle
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            first.lock().await.handle(),
            second.lock().await.handle()
        );
    }

    /// Test that two plain (uncached) resolutions mint distinct anonymous
    /// sessions.
    #[tokio::test]
    async fn test_uncached_resolutions_are_independent() {
        let (manager, _store) = test_manager(|b| b);
        let req = HeaderMap::new();

        let first = manager.get_session(&req, &Method::GET).await.unwrap();
        let second = manager.get_session(&req, &Method::GET).await.unwrap();

        assert_ne!(first.handle(), second.handle());
    }

    /// Test that a request presenting the cookies from a prior anonymous
    /// response resolves to the same session instead of minting a new one.
    #[tokio::test]
    async fn test_anonymous_session_round_trip() {
        // Given an anonymous session minted on a first request
        let (manager, _store) = test_manager(|b| b);
        let first = manager
            .get_session(&HeaderMap::new(), &Method::GET)
            .await
            .unwrap();
        let handle = first.handle().to_string();

        // When a follow-up request replays the response cookies
        let req = replay_request(first.response_headers(), &[]);
        let second = manager.get_session(&req, &Method::GET).await.unwrap();

        // Then the same session comes back without a new session-created
        assert_eq!(second.handle(), handle);
        assert!(second.response_headers().get(HEADER_SESSION_CREATED).is_none());
        assert!(second.response_headers().get(SET_COOKIE).is_none());
    }
}
