//! Request-scoped session façade handed to application handlers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use http::HeaderMap;
use serde_json::{Map, Value};

use crate::config::SessionConfig;
use crate::session::errors::SessionError;
use crate::session::types::{PublicData, SessionKernel, SessionRecord, USER_ID_KEY};
use crate::storage::{SessionPatch, SessionStorage};

use super::factory;

/// One request's view of its session.
///
/// Wraps the resolved [`SessionKernel`] together with the storage handle and
/// the outgoing header map; every mutation records its cookie/header effects
/// there, and the HTTP layer flushes [`response_headers`](Self::response_headers)
/// when the handler returns.
pub struct SessionContext {
    config: Arc<SessionConfig>,
    storage: Arc<dyn SessionStorage>,
    req_headers: HeaderMap,
    res_headers: HeaderMap,
    kernel: SessionKernel,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("req_headers", &self.req_headers)
            .field("res_headers", &self.res_headers)
            .field("kernel", &self.kernel)
            .finish()
    }
}

impl SessionContext {
    pub(crate) fn new(
        config: Arc<SessionConfig>,
        storage: Arc<dyn SessionStorage>,
        req_headers: HeaderMap,
        res_headers: HeaderMap,
        kernel: SessionKernel,
    ) -> Self {
        Self {
            config,
            storage,
            req_headers,
            res_headers,
            kernel,
        }
    }

    /// The opaque session handle.
    pub fn handle(&self) -> &str {
        self.kernel.handle()
    }

    /// The owning user's id; `None` for anonymous sessions.
    pub fn user_id(&self) -> Option<&Value> {
        self.kernel.user_id()
    }

    /// Server-authoritative public data, as of the last resolve/refresh.
    pub fn public_data(&self) -> &PublicData {
        self.kernel.public_data()
    }

    /// Convenience accessor for a single public-data key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kernel.public_data().get(key)
    }

    /// The session's double-submit CSRF token, for rendering into forms.
    pub fn anti_csrf_token(&self) -> &str {
        self.kernel.anti_csrf_token()
    }

    pub fn is_anonymous(&self) -> bool {
        self.kernel.is_anonymous()
    }

    /// Headers accumulated by this request's session activity. Must be
    /// merged into the outgoing response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.res_headers
    }

    /// Consume the context, yielding the headers to flush.
    pub fn into_response_headers(self) -> HeaderMap {
        self.res_headers
    }

    /// `false` for anonymous sessions; otherwise delegates to the
    /// configured predicate (absent predicate: `true`).
    pub fn is_authorized(&self, args: &[Value]) -> bool {
        if self.kernel.is_anonymous() {
            return false;
        }
        match &self.config.is_authorized {
            Some(predicate) => predicate.is_authorized(self.kernel.public_data(), args),
            None => true,
        }
    }

    /// Fail with [`SessionError::Authentication`] for anonymous sessions and
    /// [`SessionError::Authorization`] when the predicate denies.
    pub fn authorize(&self, args: &[Value]) -> Result<(), SessionError> {
        if self.kernel.is_anonymous() {
            return Err(SessionError::Authentication);
        }
        if !self.is_authorized(args) {
            return Err(SessionError::Authorization);
        }
        Ok(())
    }

    /// Promote to an authenticated session (or rotate identity when already
    /// authenticated). An anonymous predecessor's record is deleted and its
    /// private data carried forward under the new handle.
    pub async fn create(
        &mut self,
        public_data: PublicData,
        private_data: Option<Map<String, Value>>,
    ) -> Result<(), SessionError> {
        let kernel = factory::create_authenticated_session(
            &self.config,
            self.storage.as_ref(),
            &self.req_headers,
            &mut self.res_headers,
            Some(&self.kernel),
            public_data,
            private_data,
        )
        .await?;
        self.kernel = kernel;
        Ok(())
    }

    /// Revoke this session; a fresh anonymous session takes its place.
    pub async fn revoke(&mut self) -> Result<(), SessionError> {
        let handle = self.kernel.handle().to_string();
        self.kernel = factory::revoke_session(
            &self.config,
            self.storage.as_ref(),
            &self.req_headers,
            &mut self.res_headers,
            &handle,
        )
        .await?;
        Ok(())
    }

    /// Revoke this session, then every other session of the same user.
    /// Returns all revoked handles. Fails with
    /// [`SessionError::Authentication`] on anonymous sessions.
    pub async fn revoke_all(&mut self) -> Result<Vec<String>, SessionError> {
        let Some(user_id) = self.user_id().cloned() else {
            return Err(SessionError::Authentication);
        };
        let current = self.kernel.handle().to_string();

        self.revoke().await?;

        let mut handles =
            factory::revoke_all_sessions_for_user(self.storage.as_ref(), &user_id).await?;
        handles.insert(0, current);
        Ok(handles)
    }

    /// Merge `data` into the session's public data and persist it. The
    /// `userId` key is silently dropped; keys listed in
    /// `public_data_keys_to_sync` are mirrored into the user's other
    /// sessions.
    pub async fn set_public_data(&mut self, mut data: Map<String, Value>) -> Result<(), SessionError> {
        data.remove(USER_ID_KEY);

        let mut updated = self.kernel.public_data().clone();
        updated.merge(data.clone());
        updated.validate_roles()?;

        if let Some(user_id) = updated.user_id().cloned() {
            factory::sync_public_data_across_sessions(
                &self.config,
                self.storage.as_ref(),
                &user_id,
                self.kernel.handle(),
                &data,
            )
            .await?;
        }

        *self.kernel.public_data_mut() = updated;
        factory::refresh_session(
            &self.config,
            self.storage.as_ref(),
            &mut self.kernel,
            &self.req_headers,
            &mut self.res_headers,
            true,
        )
        .await
    }

    /// The server-only private data blob. Sessions without a record (a
    /// fresh anonymous session) read as empty.
    pub async fn get_private_data(&self) -> Result<Map<String, Value>, SessionError> {
        match self.storage.get_session(self.kernel.handle()).await? {
            Some(record) => record.private_data_map(),
            None => Ok(Map::new()),
        }
    }

    /// Merge `data` into the private blob. Anonymous sessions get their
    /// backing record on first write.
    pub async fn set_private_data(&mut self, data: Map<String, Value>) -> Result<(), SessionError> {
        match self.storage.get_session(self.kernel.handle()).await? {
            Some(record) => {
                let mut merged = record.private_data_map()?;
                for (key, value) in data {
                    merged.insert(key, value);
                }
                let patch = SessionPatch {
                    private_data: Some(Value::Object(merged).to_string()),
                    ..Default::default()
                };
                self.storage
                    .update_session(self.kernel.handle(), &patch)
                    .await?;
            }
            None => {
                let expires_at =
                    Utc::now() + Duration::minutes(self.config.anon_session_expiry_minutes);
                let record = SessionRecord {
                    handle: self.kernel.handle().to_string(),
                    user_id: self.kernel.user_id().cloned(),
                    expires_at: Some(expires_at),
                    hashed_session_token: None,
                    anti_csrf_token: self.kernel.anti_csrf_token().to_string(),
                    public_data: self.kernel.public_data().to_json(),
                    private_data: Value::Object(data.clone()).to_string(),
                };
                // The create is speculative: a concurrent request may have
                // written the record first.
                if let Err(err) = self.storage.create_session(record).await {
                    tracing::warn!(
                        "Speculative record create for {} failed, retrying as update: {err}",
                        self.kernel.handle()
                    );
                    let Some(existing) =
                        self.storage.get_session(self.kernel.handle()).await?
                    else {
                        return Err(err.into());
                    };
                    let mut merged = existing.private_data_map()?;
                    for (key, value) in data {
                        merged.insert(key, value);
                    }
                    let patch = SessionPatch {
                        private_data: Some(Value::Object(merged).to_string()),
                        ..Default::default()
                    };
                    self.storage
                        .update_session(self.kernel.handle(), &patch)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use crate::config::AuthorizePredicate;
    use crate::session::errors::SessionError;
    use crate::session::types::PublicData;
    use http::{HeaderMap, Method};
    use serde_json::{Value, json};
    use std::sync::Arc;

    /// Test that anonymous sessions are never authorized.
    #[tokio::test]
    async fn test_anonymous_never_authorized() {
        let (manager, _store) = test_manager(|b| b);
        let context = manager
            .get_session(&HeaderMap::new(), &Method::GET)
            .await
            .unwrap();

        assert!(!context.is_authorized(&[]));
        assert!(matches!(
            context.authorize(&[]),
            Err(SessionError::Authentication)
        ));
    }

    /// Test predicate delegation: the configured predicate decides for
    /// authenticated sessions and sees the call's arguments.
    #[tokio::test]
    async fn test_predicate_delegation() {
        // Given a predicate requiring the caller's role to match the first
        // argument
        let predicate: Arc<dyn AuthorizePredicate> =
            Arc::new(|public_data: &PublicData, args: &[Value]| {
                match (public_data.get("role"), args.first()) {
                    (Some(role), Some(wanted)) => role == wanted,
                    _ => false,
                }
            });
        let (manager, _store) = test_manager(|b| b.is_authorized(predicate));
        let context = login_session(&manager, json!({"userId": 1, "role": "admin"}), None).await;

        // Then matching args pass and mismatched args are denied
        assert!(context.is_authorized(&[json!("admin")]));
        assert!(context.authorize(&[json!("admin")]).is_ok());
        assert!(!context.is_authorized(&[json!("owner")]));
        assert!(matches!(
            context.authorize(&[json!("owner")]),
            Err(SessionError::Authorization)
        ));
    }

    /// Test that an absent predicate authorizes any authenticated session.
    #[tokio::test]
    async fn test_no_predicate_allows_authenticated() {
        let (manager, _store) = test_manager(|b| b);
        let context = login_session(&manager, json!({"userId": 1}), None).await;

        assert!(context.is_authorized(&[]));
        assert!(context.authorize(&[]).is_ok());
    }

    /// Test the public-data projection accessor.
    #[tokio::test]
    async fn test_get_projects_public_data() {
        let (manager, _store) = test_manager(|b| b);
        let context =
            login_session(&manager, json!({"userId": 5, "tenant": "acme"}), None).await;

        assert_eq!(context.get("tenant"), Some(&json!("acme")));
        assert_eq!(context.get("missing"), None);
        assert_eq!(context.user_id(), Some(&json!(5)));
        assert_eq!(
            context.anti_csrf_token(),
            set_cookie_value(context.response_headers(), "sAntiCsrfToken").unwrap()
        );
    }
}
