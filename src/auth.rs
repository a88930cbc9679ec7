//! Bearer-token identity.
//!
//! Tokens are HS256 JWTs whose `sub` is the caller id. Handlers take a
//! [`MaybeCaller`]: requests without an `Authorization` header run as
//! anonymous, while a header that is present but malformed or invalid is
//! rejected with 401.

use crate::{errors::AppError, models::caller::Caller, state::AppState};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::{Error as JwtError, ErrorKind},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Caller, JwtError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)?.claims;
        if claims.sub.trim().is_empty() {
            return Err(ErrorKind::InvalidSubject.into());
        }
        Ok(Caller {
            id: claims.sub,
            username: claims.username,
        })
    }

    /// Sign a token for `subject` valid for `ttl`.
    pub fn issue(&self, subject: &str, username: Option<&str>, ttl: Duration) -> anyhow::Result<String> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + ttl.as_secs(),
            iat: now,
            username: username.map(str::to_string),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

/// The caller behind a request, if it authenticated.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

impl MaybeCaller {
    pub fn caller(&self) -> Option<&Caller> {
        self.0.as_ref()
    }
}

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(MaybeCaller(None));
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::unauthorized("malformed authorization header"))?;

        let caller = state.tokens.verify(token).map_err(|err| {
            debug!(error = %err, "rejected bearer token");
            AppError::unauthorized("invalid or expired token")
        })?;
        Ok(MaybeCaller(Some(caller)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_to_their_subject() {
        let tokens = TokenVerifier::new("test-secret");
        let token = tokens
            .issue("alice", Some("Alice"), Duration::from_secs(60))
            .unwrap();

        let caller = tokens.verify(&token).unwrap();
        assert_eq!(caller.id, "alice");
        assert_eq!(caller.username.as_deref(), Some("Alice"));
    }

    #[test]
    fn foreign_and_blank_subject_tokens_are_rejected() {
        let ours = TokenVerifier::new("test-secret");
        let theirs = TokenVerifier::new("other-secret");
        let token = theirs.issue("alice", None, Duration::from_secs(60)).unwrap();
        assert!(ours.verify(&token).is_err());

        let blank = ours.issue("  ", None, Duration::from_secs(60)).unwrap();
        assert_eq!(
            ours.verify(&blank).unwrap_err().kind(),
            &ErrorKind::InvalidSubject
        );
        assert!(ours.verify("not.a.token").is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let tokens = TokenVerifier::new("test-secret");
        let now = Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: "alice".into(),
            exp: now - 3600,
            iat: now - 7200,
            username: None,
        };
        let token = encode(&Header::default(), &claims, &tokens.encoding).unwrap();
        assert_eq!(
            tokens.verify(&token).unwrap_err().kind(),
            &ErrorKind::ExpiredSignature
        );
    }
}
