//! Token codec: opaque session tokens, anonymous JWTs, anti-CSRF and
//! public-data tokens.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::session::errors::SessionError;
use crate::session::types::AnonymousSessionPayload;
use crate::utils::{base64url_decode, base64url_encode, gen_random_string, sha256_hex};

/// Opaque session tokens carry a version tag; anything but `v0` is invalid.
pub(crate) const SESSION_TOKEN_VERSION_0: &str = "v0";
/// Guaranteed not to appear in a handle, nonce, hex digest or version tag.
const TOKEN_SEPARATOR: char = ';';

pub(crate) const HANDLE_TYPE_OPAQUE: &str = "opaque-token-simple";
pub(crate) const HANDLE_TYPE_ANONYMOUS_JWT: &str = "anonymous-jwt";
const HANDLE_RANDOM_LEN: usize = 32;

pub(crate) const ANTI_CSRF_TOKEN_LEN: usize = 32;

const JWT_ISSUER: &str = "blitzjs";
const JWT_AUDIENCE: &str = "blitzjs";
const JWT_SUBJECT: &str = "anonymous";

pub(crate) fn new_anti_csrf_token() -> Result<String, SessionError> {
    Ok(gen_random_string(ANTI_CSRF_TOKEN_LEN)?)
}

pub(crate) fn new_authenticated_handle() -> Result<String, SessionError> {
    Ok(format!(
        "{}-{HANDLE_TYPE_OPAQUE}",
        gen_random_string(HANDLE_RANDOM_LEN)?
    ))
}

pub(crate) fn new_anonymous_handle() -> Result<String, SessionError> {
    Ok(format!(
        "{}-{HANDLE_TYPE_ANONYMOUS_JWT}",
        gen_random_string(HANDLE_RANDOM_LEN)?
    ))
}

/// Decoded form of an opaque session token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionTokenParts {
    pub(crate) handle: String,
    /// Per-token nonce; gives distinct tokens for identical public data.
    #[allow(unused)]
    pub(crate) id: String,
    pub(crate) hashed_public_data: String,
    pub(crate) version: String,
}

/// Mint an opaque session token over a handle and the JSON-encoded public
/// data it fingerprints.
pub(crate) fn new_session_token(
    handle: &str,
    public_data_json: &str,
) -> Result<String, SessionError> {
    let nonce = gen_random_string(32)?;
    let hashed = sha256_hex(public_data_json);
    let raw = [handle, &nonce, &hashed, SESSION_TOKEN_VERSION_0]
        .join(&TOKEN_SEPARATOR.to_string());
    Ok(base64url_encode(raw.as_bytes()))
}

pub(crate) fn parse_session_token(token: &str) -> Result<SessionTokenParts, SessionError> {
    let raw = base64url_decode(token)
        .map_err(|_| SessionError::MalformedToken("Session token is not base64url".to_string()))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| SessionError::MalformedToken("Session token is not UTF-8".to_string()))?;

    let parts: Vec<&str> = raw.split(TOKEN_SEPARATOR).collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return Err(SessionError::MalformedToken(
            "Session token must have four non-empty parts".to_string(),
        ));
    }

    Ok(SessionTokenParts {
        handle: parts[0].to_string(),
        id: parts[1].to_string(),
        hashed_public_data: parts[2].to_string(),
        version: parts[3].to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct AnonymousJwtClaims {
    iss: String,
    aud: String,
    sub: String,
    #[serde(rename = "blitzjs")]
    session: AnonymousSessionPayload,
}

/// Mint the HS256 JWT carried by anonymous sessions.
pub(crate) fn new_anonymous_session_token(
    config: &SessionConfig,
    payload: &AnonymousSessionPayload,
) -> Result<String, SessionError> {
    let claims = AnonymousJwtClaims {
        iss: JWT_ISSUER.to_string(),
        aud: JWT_AUDIENCE.to_string(),
        sub: JWT_SUBJECT.to_string(),
        session: payload.clone(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret()),
    )
    .map_err(|e| SessionError::Crypto(format!("Failed to sign anonymous session token: {e}")))
}

/// Parse and verify an anonymous session JWT. Any signature or claim
/// mismatch yields `None`; this never fails the request.
pub(crate) fn parse_anonymous_session_token(
    config: &SessionConfig,
    token: &str,
) -> Option<AnonymousSessionPayload> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    validation.set_issuer(&[JWT_ISSUER]);
    validation.set_audience(&[JWT_AUDIENCE]);
    validation.sub = Some(JWT_SUBJECT.to_string());

    match jsonwebtoken::decode::<AnonymousJwtClaims>(
        token,
        &DecodingKey::from_secret(config.secret()),
        &validation,
    ) {
        Ok(data) => Some(data.claims.session),
        Err(err) => {
            tracing::debug!("Rejected anonymous session token: {}", err);
            None
        }
    }
}

/// Base64url of the JSON-encoded public data; readable by client code.
pub(crate) fn new_public_data_token(public_data_json: &str) -> String {
    base64url_encode(public_data_json.as_bytes())
}
