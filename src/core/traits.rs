//! DI "Interfaces"

use crate::core::error::{ChatError, UpstreamError};
use crate::core::generation::Fragment;
use crate::core::quotes::Quote;
use crate::infrastructure::entities;
use crate::infrastructure::entities::MessageKind;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Lists all conversations for the given user, most recently updated first.
    async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<entities::Conversation>, ChatError>;

    /// Creates a new conversation for the given user.
    ///
    /// A missing or blank title falls back to the default one.
    async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
    ) -> Result<entities::Conversation, ChatError>;

    /// Deletes a given conversation and all of its messages.
    ///
    /// Returns `NotFound` if the conversation did not exist or the user didn't own it.
    async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid)
    -> Result<(), ChatError>;

    /// List all messages in a conversation, oldest first.
    ///
    /// Returns `NotFound` if the user doesn't own this conversation.
    async fn list_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<entities::Message>, ChatError>;

    /// Creates a new message in a conversation.
    ///
    /// The helper functions `create_X_message` should be used instead for clarity.
    async fn create_raw_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        kind: MessageKind,
        content: String,
        message_id: Uuid,
    ) -> Result<entities::Message, ChatError>;

    /// Create a new user message in a conversation, creating the conversation if needed.
    ///
    /// Returns `NotFound` if the conversation belongs to another user.
    async fn create_user_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ChatError> {
        self.create_raw_message(
            user_id,
            conversation_id,
            MessageKind::User,
            message,
            Uuid::new_v4(),
        )
        .await
    }

    /// Create a new bot message in a conversation.
    async fn create_bot_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ChatError> {
        self.create_raw_message(
            user_id,
            conversation_id,
            MessageKind::Bot,
            message,
            Uuid::new_v4(),
        )
        .await
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Registers a new user. Returns `Conflict` if the email is taken.
    async fn register(&self, email: &str, password: &str) -> Result<Uuid, ChatError>;

    /// Checks the credentials and issues a session token.
    ///
    /// Returns `Unauthorized` for an unknown email or a wrong password alike.
    async fn login(&self, email: &str, password: &str) -> Result<Session, ChatError>;
}

/// Raw fragments produced by a streaming generation.
pub type FragmentStream = BoxStream<'static, Result<Fragment, UpstreamError>>;

/// The language-model capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Asks for one finished answer.
    async fn complete(&self, prompt: &str) -> Result<String, UpstreamError>;

    /// Opens an incremental generation. Fragments come in whatever shape the backend uses.
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, UpstreamError>;
}

/// A single price source.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, symbol: &str) -> Result<Quote, UpstreamError>;
}

/// Best-effort quote lookup. `None` means no source could provide a quote.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Option<Quote>;
}
