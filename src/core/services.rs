//! Implementations for the service the app needs.
//!

use crate::core::config::Settings;
use crate::core::error::ChatError;
use crate::core::session;
use crate::core::traits::{AuthService, ConversationService, Session};
use crate::infrastructure::entities::{
    Conversation, DEFAULT_CONVERSATION_TITLE, Message, MessageKind, User,
};
use crate::infrastructure::traits::{ConversationRepository, UserRepository};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use log::info;
use uuid::Uuid;

/// Conversation titles are derived from the latest user message, cut to this many characters.
pub const TITLE_MAX_CHARS: usize = 50;

/// First [`TITLE_MAX_CHARS`] characters of `content`, counted in `char`s so multi-byte
/// text is never split.
pub fn derive_title(content: &str) -> String {
    content.chars().take(TITLE_MAX_CHARS).collect()
}

#[derive(Clone)]
#[injectable(ConversationService)]
pub struct ConversationStore {
    repo: Ref<dyn ConversationRepository>,
}

impl ConversationStore {
    pub fn new(repo: Ref<dyn ConversationRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ConversationService for ConversationStore {
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.repo.list_conversations(user_id).await?)
    }

    async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let title = title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_owned());
        let now = Utc::now();

        let conversation = self
            .repo
            .create_conversation(Conversation {
                id: Uuid::new_v4(),
                user_id,
                title,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!("user {user_id} created conversation {}", conversation.id);
        Ok(conversation)
    }

    async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), ChatError> {
        if self.repo.delete_conversation(user_id, conversation_id).await? {
            Ok(())
        } else {
            Err(ChatError::NotFound(format!(
                "conversation {conversation_id} not found"
            )))
        }
    }

    async fn list_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, ChatError> {
        self.repo
            .list_conversation_messages(user_id, conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id} not found")))
    }

    async fn create_raw_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        kind: MessageKind,
        content: String,
        message_id: Uuid,
    ) -> Result<Message, ChatError> {
        let title = match kind {
            MessageKind::User => Some(derive_title(&content)),
            MessageKind::Bot => None,
        };

        self.repo
            .append_message(
                Message {
                    id: message_id,
                    conversation_id,
                    user_id,
                    kind,
                    created_at: Utc::now(),
                    text: content,
                },
                title,
            )
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id} not found")))
    }
}

#[injectable(AuthService)]
pub struct CredentialService {
    users: Ref<dyn UserRepository>,
    settings: Ref<Settings>,
}

impl CredentialService {
    pub fn new(users: Ref<dyn UserRepository>, settings: Ref<Settings>) -> Self {
        Self { users, settings }
    }
}

#[async_trait]
impl AuthService for CredentialService {
    async fn register(&self, email: &str, password: &str) -> Result<Uuid, ChatError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(ChatError::BadRequest("password is required".to_owned()));
        }

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ChatError::Conflict("Usuario ya existe".to_owned()));
        }

        let password_hash = hash_password(password.to_owned()).await?;
        let user = self
            .users
            .create_user(User {
                id: Uuid::new_v4(),
                email,
                password_hash,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| match e {
                // Lost a race against a concurrent registration of the same email.
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ChatError::Conflict("Usuario ya existe".to_owned())
                }
                e => ChatError::Storage(e),
            })?;

        info!("registered user {}", user.id);
        Ok(user.id)
    }

    async fn login(&self, email: &str, password: &str) -> Result<Session, ChatError> {
        let invalid = || ChatError::Unauthorized("Credenciales inválidas".to_owned());

        let email = normalize_email(email).map_err(|_| invalid())?;
        let user = self.users.find_by_email(&email).await?.ok_or_else(invalid)?;

        if !verify_password(password.to_owned(), user.password_hash).await? {
            return Err(invalid());
        }

        let access_token = session::issue_token(
            user.id,
            &self.settings.jwt_secret,
            self.settings.session_ttl_hours,
        )?;

        Ok(Session {
            user_id: user.id,
            access_token,
        })
    }
}

fn normalize_email(email: &str) -> Result<String, ChatError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ChatError::BadRequest("a valid email is required".to_owned()));
    }
    Ok(email)
}

async fn hash_password(password: String) -> Result<String, ChatError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ChatError::Internal(format!("cannot hash password: {e}")))
    })
    .await
    .map_err(|e| ChatError::Internal(e.to_string()))?
}

async fn verify_password(password: String, password_hash: String) -> Result<bool, ChatError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|e| ChatError::Internal(format!("stored password hash is invalid: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| ChatError::Internal(e.to_string()))?
}
