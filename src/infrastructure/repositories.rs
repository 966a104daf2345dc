//! DB Repository abstractions

use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    Conversation, DEFAULT_CONVERSATION_TITLE, Message, User,
};
use crate::infrastructure::traits::{ConversationRepository, UserRepository};
use async_trait::async_trait;
use di::{Ref, injectable};
use log::{debug, error};
use uuid::Uuid;

#[injectable(ConversationRepository)]
pub struct DbConversationRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbConversationRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConversationRepository for DbConversationRepository {
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM conversations WHERE user_id = ? ORDER BY julianday(updated_at) DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await
        .inspect_err(|e| error!("listing conversations failed: {e}"))
    }

    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(conversation.id)
        .bind(conversation.user_id)
        .bind(conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_one(&**self.connection)
        .await
        .inspect_err(|e| error!("creating conversation failed: {e}"))
    }

    async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.connection.begin().await?;

        let deleted = sqlx::query("DELETE FROM conversations WHERE id = ? AND user_id = ?")
            .bind(conversation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // Covers connections opened without `foreign_keys`, where the cascade does not fire.
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("deleted conversation {conversation_id}");

        Ok(true)
    }

    async fn list_conversation_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Vec<Message>>, sqlx::Error> {
        // One read transaction so the ownership check and the listing see the same snapshot.
        let mut tx = self.connection.begin().await?;

        let owned: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = ? AND user_id = ?")
                .bind(conversation_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        if owned.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let messages = sqlx::query_as(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY julianday(created_at) ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(messages))
    }

    async fn append_message(
        &self,
        message: Message,
        title: Option<String>,
    ) -> Result<Option<Message>, sqlx::Error> {
        let mut tx = self.connection.begin().await?;

        // The first statement is a write, so the transaction holds the write lock from
        // the start and concurrent appends wait on the busy timeout.
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT (id) DO NOTHING",
        )
        .bind(message.conversation_id)
        .bind(message.user_id)
        .bind(DEFAULT_CONVERSATION_TITLE)
        .bind(message.created_at)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        let conversation: Conversation = sqlx::query_as("SELECT * FROM conversations WHERE id = ?")
            .bind(message.conversation_id)
            .fetch_one(&mut *tx)
            .await?;

        if conversation.user_id != message.user_id {
            tx.rollback().await?;
            return Ok(None);
        }

        // Never let a skewed clock move the conversation backwards.
        let created_at = message.created_at.max(conversation.updated_at);

        let stored: Message = sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, user_id, kind, created_at, text) VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.user_id)
        .bind(message.kind)
        .bind(created_at)
        .bind(message.text)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ?, title = COALESCE(?, title) WHERE id = ?")
            .bind(created_at)
            .bind(title)
            .bind(message.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(stored))
    }
}

#[injectable(UserRepository)]
pub struct DbUserRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbUserRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&**self.connection)
            .await
            .inspect_err(|e| error!("looking up user failed: {e}"))
    }

    async fn create_user(&self, user: User) -> Result<User, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(user.id)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.created_at)
        .fetch_one(&**self.connection)
        .await
    }
}
