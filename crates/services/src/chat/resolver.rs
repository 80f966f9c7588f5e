use std::sync::Arc;

use bson::{oid::ObjectId, DateTime};
use huddle_db::models::Conversation;
use tracing::{debug, info, warn};

use crate::dao::{base::DaoError, conversation::ConversationDao};
use crate::error::{ChatError, ChatResult};

/// Finds or creates the single conversation between two users.
///
/// New conversations are written under [`Conversation::pair_id`], so two
/// clients racing on the first message collide on the id instead of
/// producing duplicates. Records created before that scheme may carry a
/// random id; lookup goes by participant set and tolerates them.
pub struct ConversationResolver {
    conversations: Arc<ConversationDao>,
    preview_max_chars: usize,
}

impl ConversationResolver {
    pub fn new(conversations: Arc<ConversationDao>, preview_max_chars: usize) -> Self {
        Self {
            conversations,
            preview_max_chars,
        }
    }

    pub async fn resolve(
        &self,
        self_id: ObjectId,
        other_id: ObjectId,
    ) -> ChatResult<Option<ObjectId>> {
        Ok(self.find(self_id, other_id).await?.map(|c| c.id))
    }

    /// The conversation record between the two users. When legacy duplicates
    /// exist the oldest one wins, so every caller agrees on the same record.
    pub async fn find(
        &self,
        self_id: ObjectId,
        other_id: ObjectId,
    ) -> ChatResult<Option<Conversation>> {
        let candidates = self.conversations.find_for_participant(self_id).await?;
        let mut matching = candidates
            .into_iter()
            .filter(|c| c.is_between(&self_id, &other_id))
            .collect::<Vec<_>>();

        if matching.len() > 1 {
            warn!(
                %self_id,
                %other_id,
                count = matching.len(),
                "Duplicate conversations between pair"
            );
        }
        matching.sort_by_key(|c| (c.created_at, c.id));
        Ok(matching.into_iter().next())
    }

    /// Creates the conversation with `first_text` as its preview. If the
    /// other side got there first, returns their record with the preview
    /// updated to this message.
    pub async fn create(
        &self,
        self_id: ObjectId,
        other_id: ObjectId,
        first_text: &str,
        at: DateTime,
    ) -> ChatResult<Conversation> {
        if self_id == other_id {
            return Err(ChatError::validation("cannot start a conversation with yourself"));
        }

        let id = Conversation::pair_id(self_id, other_id);
        let preview = truncate_preview(first_text, self.preview_max_chars);

        match self
            .conversations
            .create(id, [self_id, other_id], preview, at)
            .await
        {
            Ok(conversation) => {
                info!(
                    conversation_id = %conversation.id,
                    %self_id,
                    %other_id,
                    "Created conversation"
                );
                Ok(conversation)
            }
            Err(DaoError::DuplicateKey(_)) => {
                debug!(conversation_id = %id, "Conversation already exists, resolving again");
                let existing = self.find(self_id, other_id).await?.ok_or_else(|| {
                    ChatError::Conflict(format!("conversation {id} exists but is not visible"))
                })?;
                self.record_message(existing.id, first_text, at).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves the preview to the latest message and counts it as unread.
    pub async fn record_message(
        &self,
        conversation_id: ObjectId,
        text: &str,
        at: DateTime,
    ) -> ChatResult<Conversation> {
        let current = self.conversations.base.find_by_id(conversation_id).await?;
        let preview = truncate_preview(text, self.preview_max_chars);
        let unread = current.unread_count.saturating_add(1);
        Ok(self
            .conversations
            .update_preview(conversation_id, preview, at, unread)
            .await?)
    }

    pub async fn mark_read(&self, conversation_id: ObjectId) -> ChatResult<Conversation> {
        Ok(self.conversations.mark_read(conversation_id).await?)
    }
}

/// Cuts `text` to at most `max_chars` characters, ending in an ellipsis
/// when anything was dropped.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    preview.push('…');
    preview
}
