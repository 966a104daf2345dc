//! Stateless-looking chat endpoints used by the web client.
//!
//! Requests without a `conversation_id` start a new conversation; its id comes back in
//! the body (`/chat`) or in the `X-Conversation-ID` header (`/chat/stream`).

use crate::api::ExtractUser;
use crate::api::chat::schemas::ChatRequest;
use crate::api::conversations::reply_stream_response;
use crate::api::conversations::schemas::ChatReply;
use crate::core::error::ChatError;
use crate::core::orchestrator::ChatOrchestrator;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

async fn chat(
    Inject(orchestrator): Inject<ChatOrchestrator>,
    ExtractUser(current_user): ExtractUser,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ChatError> {
    let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
    let response = orchestrator
        .handle_chat(current_user, conversation_id, &request.message)
        .await?;

    Ok(Json(ChatReply {
        conversation_id,
        response,
    }))
}

async fn chat_stream(
    Inject(orchestrator): Inject<ChatOrchestrator>,
    ExtractUser(current_user): ExtractUser,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ChatError> {
    let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
    let reply = orchestrator
        .handle_chat_stream(current_user, conversation_id, request.message)
        .await?;

    Ok(reply_stream_response(conversation_id, reply))
}

pub mod schemas {
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct ChatRequest {
        pub message: String,
        #[serde(default)]
        pub conversation_id: Option<Uuid>,
    }
}
