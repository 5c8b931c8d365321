//! session_auth - Cookie-based session authentication core
//!
//! This crate issues, validates, refreshes and revokes HTTP session
//! credentials for anonymous and authenticated users, and enforces CSRF
//! double-submit protection on state-changing requests.
//!
//! Anonymous visitors carry a signed HS256 JWT; authenticated users carry an
//! opaque token whose SHA-256 hash is checked against a stored session
//! record. Session expiry rolls forward on write requests, public data is
//! mirrored to a client-readable cookie, and anonymous sessions are promoted
//! in place on login, carrying their private data along.
//!
//! The HTTP framework and the persistent store stay outside: requests come
//! in as [`http::HeaderMap`] + [`http::Method`], session records go through
//! the [`SessionStorage`] trait, and every response mutation leaves through
//! the resolved context's header map.

mod config;
mod session;
mod storage;
mod utils;

pub use config::{
    AuthorizePredicate, SameSiteValue, SessionConfig, SessionConfigBuilder, SessionMethod,
};
pub use session::{
    AnonymousSessionPayload, PublicData, SessionContext, SessionError, SessionKernel,
    SessionManager, SessionRecord, SharedSessionContext,
};
pub use storage::{InMemorySessionStore, SessionPatch, SessionStorage, StorageError};
pub use utils::{UtilError, gen_random_string};
