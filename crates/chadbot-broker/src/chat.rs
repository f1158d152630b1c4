//! Chat persistence facade and LLM-turn orchestration.
//!
//! [`ChatService`] is the thin layer plugins talk to: create/find chats,
//! append messages, read transcripts, and trigger a full LLM turn. The
//! synchronous helpers are bounded by a 10-second deadline so a slow backing
//! store cannot wedge a plugin's reader; the LLM turn runs unbounded (its
//! per-call deadlines live in the router) on a worker task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chadbot_core::chat::{Attachment, ChatMessage, ChatRecord, MessageRecord, Role};
use chadbot_core::error::{BrokerError, BrokerResult};
use chadbot_core::event::Event;
use chadbot_llm::{ChatContext, LlmRouter};

use crate::bus::EventBus;

// =============================================================================
// Persistence seam
// =============================================================================

/// A message to append, before the store assigns identity.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub display_only: bool,
}

/// The chat persistence layer the broker writes through.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Finds the chat for `(platform, linked_id)` or creates it. The bool is
    /// true when the chat was created by this call.
    async fn get_or_create_chat(
        &self,
        platform: &str,
        linked_id: &str,
        name: &str,
    ) -> BrokerResult<(ChatRecord, bool)>;

    async fn add_message(&self, message: NewMessage) -> BrokerResult<MessageRecord>;

    /// Reads messages in insertion order. `limit` 0 means no limit.
    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset: u32,
    ) -> BrokerResult<Vec<MessageRecord>>;
}

/// Receives every message the service persists, for delivery to user-facing
/// surfaces (e.g. a WebSocket frontend). Must not block.
pub trait ChatBroadcaster: Send + Sync {
    fn message_added(&self, message: &MessageRecord);
}

// =============================================================================
// Service
// =============================================================================

/// Tunables for the chat service.
#[derive(Debug, Clone)]
pub struct ChatServiceConfig {
    /// Deadline for the synchronous helpers (get-or-create, add, read).
    pub op_timeout: Duration,
}

impl Default for ChatServiceConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(10),
        }
    }
}

/// The completed LLM turn as seen by callers of
/// [`llm_request`](ChatService::llm_request).
#[derive(Debug, Clone)]
pub struct LlmTurn {
    /// The persisted assistant reply.
    pub message: MessageRecord,
    /// Persisted deferred-attachment messages, in emission order.
    pub deferred: Vec<MessageRecord>,
}

/// Facade between plugins and the chat persistence layer.
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    router: Arc<LlmRouter>,
    bus: Arc<EventBus>,
    broadcaster: Option<Arc<dyn ChatBroadcaster>>,
    config: ChatServiceConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        router: Arc<LlmRouter>,
        bus: Arc<EventBus>,
        config: ChatServiceConfig,
    ) -> Self {
        Self {
            store,
            router,
            bus,
            broadcaster: None,
            config,
        }
    }

    /// Installs a broadcaster notified of every persisted message.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn ChatBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = BrokerResult<T>>,
    ) -> BrokerResult<T> {
        tokio::time::timeout(self.config.op_timeout, fut)
            .await
            .map_err(|_| BrokerError::ChatTimeout)?
    }

    pub async fn get_or_create(
        &self,
        platform: &str,
        linked_id: &str,
        name: &str,
    ) -> BrokerResult<(ChatRecord, bool)> {
        self.bounded(self.store.get_or_create_chat(platform, linked_id, name))
            .await
    }

    pub async fn add_message(&self, message: NewMessage) -> BrokerResult<MessageRecord> {
        let record = self.bounded(self.store.add_message(message)).await?;
        if let Some(b) = &self.broadcaster {
            b.message_added(&record);
        }
        Ok(record)
    }

    pub async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset: u32,
    ) -> BrokerResult<Vec<MessageRecord>> {
        self.bounded(self.store.get_messages(chat_id, limit, offset))
            .await
    }

    /// Runs one LLM turn over the chat's transcript.
    ///
    /// Loads every non-display-only message, hands it to the router, then
    /// persists the assistant reply and any deferred attachments (as
    /// display-only messages after the reply). Provider failures publish a
    /// `chat.error` event before surfacing to the caller.
    pub async fn llm_request(
        &self,
        chat_id: &str,
        provider: &str,
        cancel: CancellationToken,
    ) -> BrokerResult<LlmTurn> {
        let stored = self.store.get_messages(chat_id, 0, 0).await?;
        let transcript: Vec<ChatMessage> = stored
            .iter()
            .filter(|m| !m.display_only)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            })
            .collect();

        let ctx = ChatContext {
            chat_id: chat_id.to_string(),
            user_id: String::new(),
        };

        let outcome = match self.router.chat(transcript, provider, ctx, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(chat_id = %chat_id, error = %e, "LLM turn failed");
                self.bus.publish(&Event::generic(
                    "chat.error",
                    "llm_failed",
                    serde_json::json!({ "chat_id": chat_id, "error": e.to_string() }),
                ));
                return Err(BrokerError::Llm(e.to_string()));
            }
        };

        info!(
            chat_id = %chat_id,
            tool_calls = outcome.tool_calls.len(),
            deferred = outcome.deferred_attachments.len(),
            "LLM turn complete"
        );

        let message = self
            .add_message(NewMessage {
                chat_id: chat_id.to_string(),
                role: Role::Assistant,
                content: outcome.content,
                attachments: Vec::new(),
                display_only: false,
            })
            .await?;

        let mut deferred = Vec::new();
        for attachment in outcome.deferred_attachments {
            match self
                .add_message(NewMessage {
                    chat_id: chat_id.to_string(),
                    role: Role::Assistant,
                    content: attachment.content,
                    attachments: attachment.attachments,
                    display_only: true,
                })
                .await
            {
                Ok(record) => deferred.push(record),
                Err(e) => warn!(chat_id = %chat_id, error = %e, "Failed to persist deferred attachment"),
            }
        }

        Ok(LlmTurn { message, deferred })
    }
}
