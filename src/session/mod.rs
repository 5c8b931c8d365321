pub(crate) mod errors;
mod main;
pub(crate) mod types;

pub use errors::SessionError;
pub use main::{SessionContext, SessionManager, SharedSessionContext};
pub use types::{AnonymousSessionPayload, PublicData, SessionKernel, SessionRecord};
