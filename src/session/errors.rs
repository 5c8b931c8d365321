use http::{HeaderMap, HeaderValue};
use thiserror::Error;

use crate::storage::StorageError;
use crate::utils::UtilError;

use super::main::cookie::HEADER_CSRF_ERROR;

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// No authenticated identity where one is required.
    #[error("Authentication required")]
    Authentication,

    /// Identity present but the configured predicate denied the operation.
    #[error("Not authorized to perform this operation")]
    Authorization,

    /// Anti-CSRF token missing or mismatched on a state-changing method.
    #[error("Anti-CSRF token does not match")]
    CsrfTokenMismatch,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid public data: {0}")]
    PublicData(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Cookie error: {0}")]
    Cookie(String),

    #[error("Header error: {0}")]
    Header(String),

    /// Error from utils operations
    #[error("Utils error: {0}")]
    Utils(#[from] UtilError),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl SessionError {
    /// Response headers the HTTP layer must merge into the error response.
    ///
    /// When resolution fails before a context exists there is no outgoing
    /// header map to mutate, so the CSRF signalling header travels with the
    /// error instead.
    pub fn signalling_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if matches!(self, Self::CsrfTokenMismatch) {
            headers.insert(HEADER_CSRF_ERROR, HeaderValue::from_static("true"));
        }
        headers
    }
}
