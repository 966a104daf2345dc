use crate::core::config::jwt_secret_from_env;
use crate::core::error::ChatError;
use crate::core::session;
use async_trait::async_trait;
use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum::routing::get;
use log::error;
use serde_json::json;
use uuid::Uuid;

pub mod auth;
pub mod chat;
pub mod conversations;

/// Header echoing the conversation a `/chat/stream` reply belongs to.
pub const X_CONVERSATION_ID: &str = "X-Conversation-ID";

/// Every route of the service, without the provider attached.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(chat::router())
        .nest("/conversations", conversations::router())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// The caller, resolved from an `Authorization: Bearer <token>` header.
#[derive(Debug)]
pub struct ExtractUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Err((StatusCode::UNAUTHORIZED, "`Authorization` header is missing"));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid authorization header"))?;

        let user_id = session::verify_token(token.trim(), jwt_secret_from_env())
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid or expired token"))?;

        Ok(ExtractUser(user_id))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Storage(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Storage and internal details stay in the log.
        let detail = match self {
            ChatError::NotFound(detail)
            | ChatError::Unauthorized(detail)
            | ChatError::Conflict(detail)
            | ChatError::BadRequest(detail) => detail,
            e => {
                error!("request failed: {e}");
                "internal server error".to_owned()
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
