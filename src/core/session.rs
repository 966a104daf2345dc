//! Session tokens (HS256 JWT).

use crate::core::error::ChatError;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub exp: usize,  // Expiration time
    pub iat: usize,  // Issued at
}

pub fn issue_token(user_id: Uuid, secret: &str, ttl_hours: i64) -> Result<String, ChatError> {
    let now = Utc::now();
    let expires = Duration::try_hours(ttl_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .and_then(|expires| usize::try_from(expires.timestamp()).ok())
        .ok_or_else(|| ChatError::Internal(format!("session lifetime out of range: {ttl_hours}h")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expires,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Internal(format!("cannot sign session token: {e}")))
}

/// Resolves a token to the user it was issued for.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, ChatError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ChatError::Unauthorized("invalid token".to_owned()))?;

    Uuid::parse_str(&token_data.claims.sub)
        .map_err(|_| ChatError::Unauthorized("invalid user id in token".to_owned()))
}
