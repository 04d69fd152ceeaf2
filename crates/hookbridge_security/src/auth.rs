//! Bearer-token authentication for the duplex channel and HTTP surfaces.
//!
//! Tokens are HMAC-signed JWTs derived from `JWT_SECRET` (§6, §9 — the
//! open question on signing keys is resolved here: there is no
//! hard-coded default, the gate refuses to start without a real secret).

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::time::Duration;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed authorization header")]
    Malformed,
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("JWT_SECRET must be set and non-empty when the security gate is enabled")]
    MissingSecret,
}

/// Claims embedded in a hookbridge access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated principal.
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
}

/// The authenticated identity attached to a Connection once a handshake
/// succeeds (§4.5).
#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    pub permissions: Vec<String>,
}

pub struct TokenVerifier {
    secret: String,
}

impl TokenVerifier {
    /// Build a verifier from the `JWT_SECRET` environment variable.
    /// Fails closed: an empty or missing secret is always rejected.
    pub fn from_env() -> Result<Self, AuthError> {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        Self::new(secret)
    }

    pub fn new(secret: String) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self { secret })
    }

    /// Extract and verify a token from an `Authorization: Bearer <token>`
    /// header value.
    pub fn verify_header(&self, header_value: Option<&str>) -> Result<Principal, AuthError> {
        let header_value = header_value.ok_or(AuthError::MissingToken)?;
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Malformed)?;
        self.verify_token(token)
    }

    pub fn verify_token(&self, token: &str) -> Result<Principal, AuthError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let data = decode::<Claims>(token, &key, &Validation::default())
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        Ok(Principal {
            name: data.claims.sub,
            permissions: data.claims.permissions,
        })
    }

    /// Mint a signed token for `sub` with `permissions`, valid for `ttl`.
    /// Used by administrative clients (the `hookbridge` CLI) that share
    /// `JWT_SECRET` with the running process and need to self-issue a
    /// short-lived credential rather than have one handed to them.
    pub fn issue_token(&self, sub: &str, permissions: Vec<String>, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: sub.to_string(),
            permissions,
            exp: chrono::Utc::now().timestamp() + ttl.as_secs() as i64,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}
