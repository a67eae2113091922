use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;
use whispr_types::api::{
    Affected, BuddyActionParams, ERR_INVALID, Filter, Order, Select, SendMessageParams,
    TABLE_MESSAGES, procedures,
};
use whispr_types::models::{BuddyMessage, MessageType};

use crate::buddies::require_buddy;
use crate::error::{ClientError, Result};
use crate::gateway::{self, Gateway};
use crate::speculative::Speculative;

/// Direct messages between two connected buddies.
pub struct MessagingChannel<G> {
    gateway: Arc<G>,
}

impl<G> Clone for MessagingChannel<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
        }
    }
}

impl<G: Gateway> MessagingChannel<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Store a message. The recipient's unread count and both previews move
    /// in the same store transaction.
    pub async fn send(
        &self,
        buddy_id: Uuid,
        content: &str,
        message_type: MessageType,
        sender_id: Uuid,
    ) -> Result<BuddyMessage> {
        let params = SendMessageParams {
            buddy_id,
            sender_id,
            content: content.to_string(),
            message_type,
        };
        let message: BuddyMessage =
            gateway::invoke(&*self.gateway, procedures::SEND_BUDDY_MESSAGE, &params).await?;
        debug!(message_id = %message.id, %buddy_id, "message sent");
        Ok(message)
    }

    /// The whole conversation, newest first. Either side's buddy id works.
    pub async fn get_messages(&self, buddy_id: Uuid) -> Result<Vec<BuddyMessage>> {
        let buddy = require_buddy(&*self.gateway, buddy_id).await?;
        self.conversation(buddy.relationship_id, None).await
    }

    /// Newest-first messages of one relationship, optionally capped.
    pub async fn conversation(&self, relationship_id: Uuid, limit: Option<usize>) -> Result<Vec<BuddyMessage>> {
        let mut select = Select::new()
            .filter(Filter::eq("relationship_id", relationship_id))
            .order(Order::desc("created_at"));
        if let Some(limit) = limit {
            select = select.limit(limit);
        }
        gateway::fetch(&*self.gateway, TABLE_MESSAGES, &select).await
    }

    pub async fn mark_read(&self, buddy_id: Uuid, user_id: Uuid) -> Result<usize> {
        let params = BuddyActionParams { buddy_id, user_id };
        let affected: Affected =
            gateway::invoke(&*self.gateway, procedures::MARK_BUDDY_MESSAGES_READ, &params).await?;
        Ok(affected.affected)
    }
}

/// Compose box for one conversation. A failed send puts the text back.
pub struct Composer<G> {
    channel: MessagingChannel<G>,
    buddy_id: Uuid,
    sender_id: Uuid,
    draft: Speculative<String>,
}

impl<G: Gateway> Composer<G> {
    pub fn new(channel: MessagingChannel<G>, buddy_id: Uuid, sender_id: Uuid) -> Self {
        Self {
            channel,
            buddy_id,
            sender_id,
            draft: Speculative::default(),
        }
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.draft.replace(text.into());
    }

    pub fn draft(&self) -> String {
        self.draft.view()
    }

    /// Send the current draft. The box is cleared while the send is in flight.
    pub async fn send(&self, message_type: MessageType) -> Result<BuddyMessage> {
        let content = self.draft.view();
        if content.trim().is_empty() {
            return Err(ClientError::Store {
                code: ERR_INVALID.to_string(),
                message: "message is empty".into(),
            });
        }

        let restore = content.clone();
        self.draft
            .apply(
                |draft| draft.clear(),
                |draft| {
                    warn!(buddy_id = %self.buddy_id, "send failed, restoring draft");
                    *draft = restore;
                },
                self.channel.send(self.buddy_id, &content, message_type, self.sender_id),
            )
            .await
    }
}
