use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::session::types::SessionRecord;
use crate::storage::errors::StorageError;
use crate::storage::types::{SessionPatch, SessionStorage};

/// HashMap-backed session store.
///
/// Reference implementation used by the test-suite and by small deployments
/// that do not need persistence across restarts.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        tracing::info!("Creating new in-memory session store");
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStore {
    async fn create_session(&self, record: SessionRecord) -> Result<SessionRecord, StorageError> {
        let mut entries = self.entries.lock().await;
        entries.insert(record.handle.clone(), record.clone());
        Ok(record)
    }

    async fn get_session(&self, handle: &str) -> Result<Option<SessionRecord>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(handle).cloned())
    }

    async fn get_sessions(&self, user_id: &Value) -> Result<Vec<SessionRecord>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .values()
            .filter(|record| record.user_id.as_ref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn update_session(
        &self,
        handle: &str,
        patch: &SessionPatch,
    ) -> Result<SessionRecord, StorageError> {
        let mut entries = self.entries.lock().await;
        let record = entries
            .get_mut(handle)
            .ok_or_else(|| StorageError::NotFound(handle.to_string()))?;

        if let Some(expires_at) = patch.expires_at {
            record.expires_at = Some(expires_at);
        }
        if let Some(public_data) = &patch.public_data {
            record.public_data = public_data.clone();
        }
        if let Some(private_data) = &patch.private_data {
            record.private_data = private_data.clone();
        }
        Ok(record.clone())
    }

    async fn delete_session(&self, handle: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        entries
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn test_record(handle: &str, user_id: Option<Value>) -> SessionRecord {
        SessionRecord {
            handle: handle.to_string(),
            user_id,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            hashed_session_token: None,
            anti_csrf_token: "csrf".to_string(),
            public_data: "{\"userId\":null}".to_string(),
            private_data: "{}".to_string(),
        }
    }

    /// Test storing and retrieving a session record.
    #[tokio::test]
    async fn test_create_and_get() {
        // Given an empty store
        let store = InMemorySessionStore::new();

        // When creating a session
        store.create_session(test_record("h1", None)).await.unwrap();

        // Then it can be fetched by handle
        let fetched = store.get_session("h1").await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().handle, "h1");

        // And an unknown handle yields None without error
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    /// Test that create_session behaves as an upsert on handle.
    /// The core creates records speculatively for handles that may already
    /// exist, so a second create must replace rather than fail.
    #[tokio::test]
    async fn test_create_is_upsert() {
        // Given a store with an existing record
        let store = InMemorySessionStore::new();
        store.create_session(test_record("h1", None)).await.unwrap();

        // When creating again under the same handle with different data
        let mut replacement = test_record("h1", Some(json!(7)));
        replacement.private_data = "{\"cart\":[1]}".to_string();
        store.create_session(replacement).await.unwrap();

        // Then the stored record reflects the second create
        let fetched = store.get_session("h1").await.unwrap().unwrap();
        assert_eq!(fetched.user_id, Some(json!(7)));
        assert_eq!(fetched.private_data, "{\"cart\":[1]}");
    }

    /// Test fetching all sessions owned by one user.
    #[tokio::test]
    async fn test_get_sessions_filters_by_user() {
        // Given sessions for two users and one anonymous session
        let store = InMemorySessionStore::new();
        store
            .create_session(test_record("a", Some(json!(1))))
            .await
            .unwrap();
        store
            .create_session(test_record("b", Some(json!(1))))
            .await
            .unwrap();
        store
            .create_session(test_record("c", Some(json!(2))))
            .await
            .unwrap();
        store.create_session(test_record("d", None)).await.unwrap();

        // When fetching sessions for user 1
        let mut handles: Vec<String> = store
            .get_sessions(&json!(1))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.handle)
            .collect();
        handles.sort();

        // Then only that user's sessions are returned
        assert_eq!(handles, vec!["a".to_string(), "b".to_string()]);
    }

    /// Test that update_session applies only the patched fields.
    #[tokio::test]
    async fn test_update_applies_partial_patch() {
        // Given a stored session
        let store = InMemorySessionStore::new();
        let original = test_record("h1", Some(json!(1)));
        let original_public = original.public_data.clone();
        store.create_session(original).await.unwrap();

        // When patching only the private data
        let patch = SessionPatch {
            private_data: Some("{\"k\":1}".to_string()),
            ..Default::default()
        };
        let updated = store.update_session("h1", &patch).await.unwrap();

        // Then private data changed and public data did not
        assert_eq!(updated.private_data, "{\"k\":1}");
        assert_eq!(updated.public_data, original_public);
    }

    /// Test that updating an unknown handle reports NotFound.
    #[tokio::test]
    async fn test_update_unknown_handle() {
        let store = InMemorySessionStore::new();

        let result = store
            .update_session("missing", &SessionPatch::default())
            .await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    /// Test deleting sessions, including an unknown handle.
    #[tokio::test]
    async fn test_delete() {
        // Given a stored session
        let store = InMemorySessionStore::new();
        store.create_session(test_record("h1", None)).await.unwrap();

        // When deleting it
        store.delete_session("h1").await.unwrap();

        // Then it is gone
        assert!(store.get_session("h1").await.unwrap().is_none());

        // And deleting again reports NotFound
        let result = store.delete_session("h1").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
