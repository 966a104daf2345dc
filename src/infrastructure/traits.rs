//! Infrastructure traits, used for DI on higher levels

use crate::infrastructure::entities;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Conversations of `user_id`, most recently updated first.
    async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<entities::Conversation>, sqlx::Error>;

    async fn create_conversation(
        &self,
        conversation: entities::Conversation,
    ) -> Result<entities::Conversation, sqlx::Error>;

    /// Removes the conversation and all of its messages in one transaction.
    ///
    /// Returns `false` when no conversation with that id belongs to `user_id`.
    async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<bool, sqlx::Error>;

    /// Returns `None` when the conversation does not exist or belongs to someone else.
    async fn list_conversation_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Vec<entities::Message>>, sqlx::Error>;

    /// Appends `message`, creating its conversation on first use.
    ///
    /// The conversation's `updated_at` (and `title`, when given) is updated in the same
    /// transaction. Returns `None` when the conversation belongs to another user.
    async fn append_message(
        &self,
        message: entities::Message,
        title: Option<String>,
    ) -> Result<Option<entities::Message>, sqlx::Error>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<entities::User>, sqlx::Error>;

    async fn create_user(&self, user: entities::User) -> Result<entities::User, sqlx::Error>;
}
