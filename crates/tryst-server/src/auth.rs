//! Bearer token identity extraction.
//!
//! Tokens are HS256 JWTs issued elsewhere. The token is read from the
//! `Authorization: Bearer` header, or from a `token` query parameter since
//! browsers cannot set headers on a WebSocket upgrade.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use tryst_protocol::UserId;

use crate::metrics;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user.
    pub user_id: UserId,
    /// Account email.
    #[serde(default)]
    pub email: String,
    /// Premium subscription flag.
    #[serde(default)]
    pub is_premium: bool,
    /// Expiry (Unix seconds).
    pub exp: i64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl Claims {
    /// Claims for `user_id` expiring `ttl` from now.
    #[must_use]
    pub fn new(user_id: UserId, email: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            user_id,
            email: email.into(),
            is_premium: false,
            exp: (Utc::now() + ttl).timestamp(),
            iss: None,
        }
    }
}

/// Authentication errors. All map to `401 Unauthorized`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither header nor query parameter carried a token.
    #[error("Authorization header required")]
    Missing,

    /// The header is not `Bearer <token>`.
    #[error("Invalid authorization header format")]
    Malformed,

    /// Signature, expiry or issuer check failed.
    #[error("Invalid or expired token")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        metrics::record_auth_failure();
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Verifies access tokens against the shared secret. Cheap to clone.
#[derive(Clone)]
pub struct TokenVerifier {
    inner: Arc<(DecodingKey, Validation)>,
}

impl TokenVerifier {
    /// Create a verifier. When `issuer` is set, tokens must carry it.
    #[must_use]
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            inner: Arc::new((DecodingKey::from_secret(secret), validation)),
        }
    }

    /// Validate `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Invalid`] if the token does not verify.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let (key, validation) = &*self.inner;
        let data = decode::<Claims>(token, key, validation)?;
        Ok(data.claims)
    }
}

/// Sign `claims` with `secret`.
///
/// # Errors
///
/// Returns an error if the claims cannot be encoded.
pub fn issue_token(secret: &[u8], claims: &Claims) -> Result<String, AuthError> {
    Ok(encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )?)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_parts(parts: &Parts) -> Result<String, AuthError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION) {
        let value = header.to_str().map_err(|_| AuthError::Malformed)?;
        return match value.split_once(' ') {
            Some(("Bearer", token)) if !token.is_empty() && !token.contains(' ') => {
                Ok(token.to_string())
            }
            _ => Err(AuthError::Malformed),
        };
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Missing)
}

/// Extractor for the authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = TokenVerifier::from_ref(state);
        let token = token_from_parts(parts)?;
        let claims = verifier.verify(&token).map_err(|e| {
            debug!(error = %e, "Token rejected");
            e
        })?;
        Ok(Self(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    const SECRET: &[u8] = b"test-secret";

    fn parts(uri: &str, authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_issue_and_verify() {
        let user = UserId::new_v4();
        let claims = Claims::new(user, "alice.test@dating.com", chrono::Duration::minutes(15));
        let token = issue_token(SECRET, &claims).unwrap();

        let verified = TokenVerifier::new(SECRET, None).verify(&token).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        let user = UserId::new_v4();
        let token = issue_token(b"other", &Claims::new(user, "", chrono::Duration::minutes(5))).unwrap();
        let verifier = TokenVerifier::new(SECRET, None);
        assert!(matches!(verifier.verify(&token), Err(AuthError::Invalid(_))));

        let expired = issue_token(SECRET, &Claims::new(user, "", chrono::Duration::hours(-2))).unwrap();
        assert!(matches!(verifier.verify(&expired), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_issuer_is_enforced_when_configured() {
        let user = UserId::new_v4();
        let mut claims = Claims::new(user, "", chrono::Duration::minutes(5));
        let verifier = TokenVerifier::new(SECRET, Some("dating-app"));

        let unsigned_issuer = issue_token(SECRET, &claims).unwrap();
        assert!(verifier.verify(&unsigned_issuer).is_err());

        claims.iss = Some("dating-app".into());
        let token = issue_token(SECRET, &claims).unwrap();
        assert_eq!(verifier.verify(&token).unwrap().user_id, user);
    }

    #[test]
    fn test_token_sources() {
        assert_eq!(
            token_from_parts(&parts("/ws", Some("Bearer abc.def.ghi"))).unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            token_from_parts(&parts("/ws?token=abc.def.ghi", None)).unwrap(),
            "abc.def.ghi"
        );
        assert!(matches!(
            token_from_parts(&parts("/ws", Some("Token abc"))),
            Err(AuthError::Malformed)
        ));
        assert!(matches!(
            token_from_parts(&parts("/ws", None)),
            Err(AuthError::Missing)
        ));
        assert!(matches!(
            token_from_parts(&parts("/ws?token=", None)),
            Err(AuthError::Missing)
        ));
    }
}
