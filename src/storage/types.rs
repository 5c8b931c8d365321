use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::session::types::SessionRecord;
use crate::storage::errors::StorageError;

/// Partial update applied to a stored session. Fields left as `None` keep
/// their current value.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub expires_at: Option<DateTime<Utc>>,
    /// JSON-encoded public data.
    pub public_data: Option<String>,
    /// JSON-encoded private data.
    pub private_data: Option<String>,
}

/// Persistence contract for session records.
///
/// Implementations are pluggable; the crate ships
/// [`InMemorySessionStore`](crate::InMemorySessionStore) and database
/// adapters live outside the core. Concurrent writers for the same handle
/// resolve last-writer-wins; no implementation is required to provide
/// compare-and-set semantics.
#[async_trait]
pub trait SessionStorage: Send + Sync + 'static {
    /// Persist a new session record. Implementations should treat this as an
    /// upsert keyed on `handle`: the core may call it speculatively for a
    /// handle that already has a record.
    async fn create_session(&self, record: SessionRecord) -> Result<SessionRecord, StorageError>;

    /// Fetch a session by handle.
    async fn get_session(&self, handle: &str) -> Result<Option<SessionRecord>, StorageError>;

    /// Fetch every session owned by a user.
    async fn get_sessions(&self, user_id: &Value) -> Result<Vec<SessionRecord>, StorageError>;

    /// Apply a partial update to a session. Unknown handles yield
    /// [`StorageError::NotFound`].
    async fn update_session(
        &self,
        handle: &str,
        patch: &SessionPatch,
    ) -> Result<SessionRecord, StorageError>;

    /// Delete a session. Unknown handles yield [`StorageError::NotFound`];
    /// the core swallows that on its delete paths.
    async fn delete_session(&self, handle: &str) -> Result<(), StorageError>;
}
