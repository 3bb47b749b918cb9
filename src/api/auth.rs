use crate::api::AppState;
use crate::error::AppError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

/// Issue an HS256 token for `user_id`. Used by tooling and tests; session
/// issuance proper lives elsewhere.
pub fn create_token(user_id: &str, jwt_secret: &str, ttl: Duration) -> anyhow::Result<String> {
    let expiration = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() + ttl.as_secs();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

/// Validate a bearer token and return the user id it was issued to
pub fn validate_token(
    token: &str,
    jwt_secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims.sub)
}

fn bearer_user(parts: &Parts, state: &AppState) -> Result<Option<String>, AppError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    validate_token(token.trim(), &state.jwt_secret)
        .map(Some)
        .map_err(|err| {
            warn!("Rejected bearer token: {}", err);
            AppError::Unauthorized
        })
}

/// Caller identity when a valid bearer token is present.
///
/// No header means anonymous; a malformed or expired token is a 401.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<String>);

impl CurrentUser {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        bearer_user(parts, state).map(CurrentUser)
    }
}

/// Authenticated caller; rejects anonymous requests with 401
#[derive(Debug, Clone)]
pub struct RequireUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        bearer_user(parts, state)?
            .map(RequireUser)
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_subject() {
        let token = create_token("user-7", "secret", Duration::from_secs(3600)).unwrap();
        assert_eq!(validate_token(&token, "secret").unwrap(), "user-7");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token("user-7", "secret", Duration::from_secs(3600)).unwrap();
        assert!(validate_token(&token, "other").is_err());
    }
}
