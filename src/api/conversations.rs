//! Conversations endpoints

use crate::api::conversations::schemas::{
    ChatReply, ConversationList, CreateConversation, CreateMessage,
};
use crate::api::{ExtractUser, X_CONVERSATION_ID};
use crate::core::error::ChatError;
use crate::core::orchestrator::{ChatOrchestrator, ReplyStream};
use crate::core::traits::ConversationService;
use axum::body::Body;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations).post(new_conversation))
        .route("/:id", delete(delete_conversation))
        .route(
            "/:id/messages",
            get(conversation_messages).post(post_message),
        )
        .route("/:id/messages/stream", post(post_message_stream))
}

/// Chunked `text/plain` body relaying a live reply.
///
/// An error item aborts the body, so the client sees a broken response instead of
/// a clean end when the reply could not be saved.
pub(crate) fn reply_stream_response(conversation_id: Uuid, reply: ReplyStream) -> Response {
    let conversation_id = conversation_id.to_string();

    (
        [
            (CONTENT_TYPE.as_str(), "text/plain; charset=utf-8"),
            (X_CONVERSATION_ID, conversation_id.as_str()),
        ],
        Body::from_stream(reply),
    )
        .into_response()
}

async fn list_conversations(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<ConversationList>, ChatError> {
    let conversations = conversation_service.list_conversations(current_user).await?;

    Ok(Json(ConversationList {
        conversations: conversations
            .into_iter()
            .map(schemas::Conversation::from)
            .collect(),
    }))
}

async fn new_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractUser(current_user): ExtractUser,
    Json(create_conversation): Json<CreateConversation>,
) -> Result<(StatusCode, Json<schemas::Conversation>), ChatError> {
    let conversation = conversation_service
        .create_conversation(current_user, create_conversation.title)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation.into())))
}

async fn delete_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, ChatError> {
    conversation_service
        .delete_conversation(current_user, conversation_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn conversation_messages(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Path(conversation_id): Path<Uuid>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<schemas::MessagesList>, ChatError> {
    let messages = conversation_service
        .list_messages(current_user, conversation_id)
        .await?;

    Ok(Json(schemas::MessagesList {
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

async fn post_message(
    Inject(orchestrator): Inject<ChatOrchestrator>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<Uuid>,
    Json(message): Json<CreateMessage>,
) -> Result<Json<ChatReply>, ChatError> {
    let response = orchestrator
        .handle_chat(current_user, conversation_id, &message.message)
        .await?;

    Ok(Json(ChatReply {
        conversation_id,
        response,
    }))
}

async fn post_message_stream(
    Inject(orchestrator): Inject<ChatOrchestrator>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<Uuid>,
    Json(message): Json<CreateMessage>,
) -> Result<Response, ChatError> {
    let reply = orchestrator
        .handle_chat_stream(current_user, conversation_id, message.message)
        .await?;

    Ok(reply_stream_response(conversation_id, reply))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug, Default)]
    pub struct CreateConversation {
        #[serde(default)]
        pub title: Option<String>,
    }

    #[derive(Serialize, Debug)]
    pub struct Conversation {
        pub id: Uuid,
        pub title: String,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl From<entities::Conversation> for Conversation {
        fn from(conversation: entities::Conversation) -> Self {
            Conversation {
                id: conversation.id,
                title: conversation.title,
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationList {
        pub conversations: Vec<Conversation>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    pub enum MessageKind {
        Bot,
        User,
    }

    impl From<entities::MessageKind> for MessageKind {
        fn from(kind: entities::MessageKind) -> Self {
            match kind {
                entities::MessageKind::Bot => MessageKind::Bot,
                entities::MessageKind::User => MessageKind::User,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub conversation_id: Uuid,
        pub id: Uuid,
        pub kind: MessageKind,
        pub text: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                conversation_id: message.conversation_id,
                id: message.id,
                kind: message.kind.into(),
                text: message.text,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        #[serde(alias = "text")]
        pub message: String,
    }

    #[derive(Serialize, Debug)]
    pub struct ChatReply {
        pub conversation_id: Uuid,
        pub response: String,
    }
}
