use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::errors::SessionError;

/// Key under which the owning user's id lives inside public data.
pub(crate) const USER_ID_KEY: &str = "userId";

/// Browser-visible session data.
///
/// A JSON object with a required `userId` entry (`null` for anonymous
/// sessions) plus arbitrary application keys. `role` and `roles` are
/// mutually exclusive; [`validate_roles`](Self::validate_roles) enforces
/// that on every write path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicData(pub(crate) Map<String, Value>);

impl PublicData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Public data of a fresh anonymous session: `{"userId": null}`.
    pub fn anonymous() -> Self {
        let mut map = Map::new();
        map.insert(USER_ID_KEY.to_string(), Value::Null);
        Self(map)
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, SessionError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SessionError::PublicData(format!(
                "Public data must be a JSON object, got: {other}"
            ))),
        }
    }

    /// The owning user's id. `None` for anonymous sessions (absent or
    /// `null` entry).
    pub fn user_id(&self) -> Option<&Value> {
        self.0.get(USER_ID_KEY).filter(|v| !v.is_null())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Merge `other` into this data; `other` wins on conflicting keys.
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (key, value) in other {
            self.0.insert(key, value);
        }
    }

    /// `role` and `roles` must not coexist.
    pub(crate) fn validate_roles(&self) -> Result<(), SessionError> {
        if self.0.contains_key("role") && self.0.contains_key("roles") {
            return Err(SessionError::PublicData(
                "Public data must not contain both `role` and `roles`".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical JSON encoding (keys sorted, stable across round-trips).
    pub(crate) fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub(crate) fn from_json(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::Storage(e.to_string()))
    }
}

/// Persisted session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Primary key: `<random32>-<type-tag>`.
    pub handle: String,
    pub user_id: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
    /// SHA-256 hex of the opaque session token; only set for authenticated
    /// sessions.
    pub hashed_session_token: Option<String>,
    /// Double-submit CSRF token, mirrored into the CSRF cookie.
    pub anti_csrf_token: String,
    /// JSON-encoded public data.
    pub public_data: String,
    /// JSON-encoded private data.
    pub private_data: String,
}

impl SessionRecord {
    /// A record past its `expires_at` is treated as absent.
    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    pub(crate) fn public_data(&self) -> Result<PublicData, SessionError> {
        PublicData::from_json(&self.public_data)
    }

    pub(crate) fn private_data_map(&self) -> Result<Map<String, Value>, SessionError> {
        if self.private_data.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&self.private_data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(SessionError::Storage(
                "Private data is not a JSON object".to_string(),
            )),
            Err(e) => Err(SessionError::Storage(e.to_string())),
        }
    }
}

/// Body of the anonymous session JWT, stored under the namespace claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousSessionPayload {
    #[serde(rename = "isAnonymous")]
    pub is_anonymous: bool,
    pub handle: String,
    #[serde(rename = "publicData")]
    pub public_data: PublicData,
    #[serde(rename = "antiCSRFToken")]
    pub anti_csrf_token: String,
}

/// In-memory distillation of a session for the duration of one request.
#[derive(Debug, Clone)]
pub enum SessionKernel {
    Anonymous {
        handle: String,
        /// Always carries `userId: null`.
        public_data: PublicData,
        jwt_payload: AnonymousSessionPayload,
        anti_csrf_token: String,
        anonymous_session_token: String,
    },
    Authenticated {
        handle: String,
        /// Always carries a non-null `userId`.
        public_data: PublicData,
        anti_csrf_token: String,
        session_token: String,
    },
}

impl SessionKernel {
    pub fn handle(&self) -> &str {
        match self {
            Self::Anonymous { handle, .. } | Self::Authenticated { handle, .. } => handle,
        }
    }

    pub fn public_data(&self) -> &PublicData {
        match self {
            Self::Anonymous { public_data, .. } | Self::Authenticated { public_data, .. } => {
                public_data
            }
        }
    }

    pub(crate) fn public_data_mut(&mut self) -> &mut PublicData {
        match self {
            Self::Anonymous { public_data, .. } | Self::Authenticated { public_data, .. } => {
                public_data
            }
        }
    }

    pub fn anti_csrf_token(&self) -> &str {
        match self {
            Self::Anonymous {
                anti_csrf_token, ..
            }
            | Self::Authenticated {
                anti_csrf_token, ..
            } => anti_csrf_token,
        }
    }

    pub fn user_id(&self) -> Option<&Value> {
        self.public_data().user_id()
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }
}
