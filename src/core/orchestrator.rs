//! Chat orchestration.
//!
//! Every request persists the user message first, builds a prompt, produces a reply
//! (whole or streamed) and persists exactly one bot message with the reply the caller saw.

use crate::core::error::ChatError;
use crate::core::generation::{GENERATION_ERROR, GenerationAdapter};
use crate::core::prompt::{Prompt, PromptBuilder};
use crate::core::traits::ConversationService;
use async_stream::stream;
use di::{Ref, injectable};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use log::{error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Live reply. Ends with an `Err` item only if the reply could not be persisted.
pub type ReplyStream = BoxStream<'static, Result<String, ChatError>>;

/// Chunks buffered between the generator and a slow caller.
const RELAY_CAPACITY: usize = 1;

#[injectable]
pub struct ChatOrchestrator {
    store: Ref<dyn ConversationService>,
    prompts: Ref<PromptBuilder>,
    generation: Ref<GenerationAdapter>,
}

impl ChatOrchestrator {
    pub fn new(
        store: Ref<dyn ConversationService>,
        prompts: Ref<PromptBuilder>,
        generation: Ref<GenerationAdapter>,
    ) -> Self {
        Self {
            store,
            prompts,
            generation,
        }
    }

    /// Answers `user_input` in one piece.
    pub async fn handle_chat(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        user_input: &str,
    ) -> Result<String, ChatError> {
        let user_input = user_input.trim();
        ensure_not_blank(user_input)?;
        self.store
            .create_user_message(user_id, conversation_id, user_input.to_owned())
            .await?;

        let reply = match self.build_prompt(user_input).await {
            Prompt::Direct(reply) => reply,
            Prompt::Generate(prompt) => self.generation.generate_complete(&prompt).await,
        };

        self.store
            .create_bot_message(user_id, conversation_id, reply.clone())
            .await
            .inspect_err(|e| {
                error!("reply for conversation {conversation_id} was generated but not saved: {e}")
            })?;

        Ok(reply)
    }

    /// Answers `user_input` as a stream of chunks.
    ///
    /// The user message is saved before this returns. The reply is relayed by a
    /// background task, so it is saved even if the caller drops the stream early.
    pub async fn handle_chat_stream(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        user_input: String,
    ) -> Result<ReplyStream, ChatError> {
        let user_input = user_input.trim().to_owned();
        ensure_not_blank(&user_input)?;
        self.store
            .create_user_message(user_id, conversation_id, user_input.clone())
            .await?;

        let source = match self.build_prompt(&user_input).await {
            Prompt::Direct(reply) => stream::iter([reply]).boxed(),
            Prompt::Generate(prompt) => self.generation.generate_stream(prompt),
        };

        let (sender, mut receiver) = mpsc::channel(RELAY_CAPACITY);
        tokio::spawn(relay_reply(
            self.store.clone(),
            user_id,
            conversation_id,
            source,
            sender,
        ));

        Ok(Box::pin(stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
        }))
    }

    /// Falls back to the generic error reply when the prompt cannot be rendered.
    async fn build_prompt(&self, user_input: &str) -> Prompt {
        self.prompts.build(user_input).await.unwrap_or_else(|e| {
            error!("{e}");
            Prompt::Direct(GENERATION_ERROR.to_owned())
        })
    }
}

fn ensure_not_blank(user_input: &str) -> Result<(), ChatError> {
    if user_input.trim().is_empty() {
        return Err(ChatError::BadRequest("message must not be empty".to_owned()));
    }
    Ok(())
}

/// Forwards every chunk to the caller and keeps what was delivered, then saves it as
/// the bot message. A closed receiver means the caller went away: generation stops and
/// the partial reply is saved.
async fn relay_reply(
    store: Ref<dyn ConversationService>,
    user_id: Uuid,
    conversation_id: Uuid,
    mut source: BoxStream<'static, String>,
    sender: mpsc::Sender<Result<String, ChatError>>,
) {
    let mut reply = String::new();

    loop {
        // Stop waiting on the generator as soon as the caller leaves.
        let next = tokio::select! {
            next = source.next() => next,
            _ = sender.closed() => None,
        };
        let Some(chunk) = next else {
            break;
        };

        if sender.send(Ok(chunk.clone())).await.is_err() {
            break;
        }
        reply.push_str(&chunk);
    }

    if sender.is_closed() {
        info!(
            "caller left conversation {conversation_id} mid-stream, saving {} bytes of reply",
            reply.len()
        );
    }

    // Stop the generator before waiting on storage.
    drop(source);

    if let Err(e) = store
        .create_bot_message(user_id, conversation_id, reply)
        .await
    {
        error!("streamed reply for conversation {conversation_id} was not saved: {e}");
        if sender.send(Err(e)).await.is_err() {
            warn!("caller for conversation {conversation_id} left before the save failure was reported");
        }
    }
}
