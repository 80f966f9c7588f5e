use std::sync::Arc;

use bson::{oid::ObjectId, DateTime};
use dashmap::DashMap;
use huddle_db::models::Message;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{resolver::ConversationResolver, session::Session, ChatTarget};
use crate::dao::message::MessageDao;
use crate::error::{ChatError, ChatResult};

#[derive(Debug, Clone, Copy)]
struct ActiveChat {
    target: ChatTarget,
    chat_id: Option<ObjectId>,
}

/// Per-chat message cache with optimistic sends.
///
/// Each cached list holds at most one entry per message id. Entries are
/// appended in arrival order; the store's ordering is only applied when a
/// chat is (re)loaded.
pub struct MessageService {
    session: Arc<Session>,
    resolver: Arc<ConversationResolver>,
    messages: Arc<MessageDao>,
    cache: DashMap<ObjectId, Vec<Message>>,
    active: RwLock<Option<ActiveChat>>,
    max_message_chars: usize,
    history_limit: u64,
}

impl MessageService {
    pub fn new(
        session: Arc<Session>,
        resolver: Arc<ConversationResolver>,
        messages: Arc<MessageDao>,
        max_message_chars: usize,
        history_limit: u64,
    ) -> Self {
        Self {
            session,
            resolver,
            messages,
            cache: DashMap::new(),
            active: RwLock::new(None),
            max_message_chars,
            history_limit,
        }
    }

    /// Cached messages of a chat, in display order.
    pub fn messages(&self, chat_id: ObjectId) -> Vec<Message> {
        self.cache
            .get(&chat_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_cached(&self, chat_id: &ObjectId) -> bool {
        self.cache.contains_key(chat_id)
    }

    /// The chat id behind a target, if one exists yet.
    pub async fn chat_id_for(&self, target: ChatTarget) -> ChatResult<Option<ObjectId>> {
        match target {
            ChatTarget::Team => Ok(self.session.team_id()),
            ChatTarget::Direct(other) => self.resolver.resolve(self.session.user_id(), other).await,
        }
    }

    /// Makes `target` the active chat and loads its history.
    pub async fn open(&self, target: ChatTarget) -> ChatResult<Option<ObjectId>> {
        *self.active.write() = Some(ActiveChat {
            target,
            chat_id: None,
        });

        let chat_id = self.chat_id_for(target).await?;
        {
            let mut active = self.active.write();
            match active.as_mut() {
                Some(current) if current.target == target => current.chat_id = chat_id,
                // Another chat was opened meanwhile.
                _ => return Ok(chat_id),
            }
        }

        if let Some(chat_id) = chat_id {
            self.load(chat_id).await?;
        }
        Ok(chat_id)
    }

    pub fn close(&self) {
        *self.active.write() = None;
    }

    pub fn active_target(&self) -> Option<ChatTarget> {
        self.active.read().map(|a| a.target)
    }

    pub fn active_chat_id(&self) -> Option<ObjectId> {
        self.active.read().and_then(|a| a.chat_id)
    }

    /// Replaces the cached list with the store's recent history. Entries
    /// the fetch does not know about (unconfirmed sends, realtime arrivals
    /// racing the fetch) are kept at the end.
    pub async fn load(&self, chat_id: ObjectId) -> ChatResult<Vec<Message>> {
        let fetched = self.messages.recent(chat_id, self.history_limit).await?;

        let mut entry = self.cache.entry(chat_id).or_default();
        let mut merged = fetched;
        for cached in entry.iter() {
            if !merged.iter().any(|m| m.id == cached.id) {
                merged.push(cached.clone());
            }
        }
        *entry = merged;
        debug!(%chat_id, count = entry.len(), "Loaded chat history");
        Ok(entry.clone())
    }

    /// Appends a message unless its id is already cached. Returns whether it
    /// was appended.
    pub fn ingest(&self, message: Message) -> bool {
        let mut entry = self.cache.entry(message.chat_id).or_default();
        if entry.iter().any(|m| m.id == message.id) {
            debug!(message_id = %message.id, "Message already cached");
            return false;
        }
        entry.push(message);
        true
    }

    /// Sends `text` to `target`.
    ///
    /// The message is visible in the cache before the store confirms it and
    /// is removed again if the write fails.
    pub async fn send(&self, target: ChatTarget, text: &str) -> ChatResult<Message> {
        if text.trim().is_empty() {
            return Err(ChatError::validation("message is empty"));
        }
        if text.chars().count() > self.max_message_chars {
            return Err(ChatError::validation(format!(
                "message exceeds {} characters",
                self.max_message_chars
            )));
        }

        let sender_id = self.session.user_id();
        let (chat_id, pending_preview) = match target {
            ChatTarget::Team => {
                let team_id = self
                    .session
                    .team_id()
                    .ok_or_else(|| ChatError::validation("join a team to use the team channel"))?;
                (team_id, None)
            }
            ChatTarget::Direct(other) => {
                if other == sender_id {
                    return Err(ChatError::validation("cannot message yourself"));
                }
                if self.session.has_blocked(&other) {
                    return Err(ChatError::validation("unblock this user to message them"));
                }
                match self.resolver.resolve(sender_id, other).await? {
                    Some(id) => (id, Some(id)),
                    None => {
                        // The new record already carries this message as preview.
                        let created = self
                            .resolver
                            .create(sender_id, other, text, DateTime::now())
                            .await?;
                        (created.id, None)
                    }
                }
            }
        };

        let message = Message {
            id: ObjectId::new(),
            chat_id,
            sender_id,
            text: text.to_string(),
            timestamp: DateTime::now(),
        };
        self.ingest(message.clone());
        self.note_chat_id(target, chat_id);

        match self.messages.create(&message).await {
            Ok(stored) => {
                self.confirm(stored.clone());
                if let Some(conversation_id) = pending_preview {
                    if let Err(e) = self
                        .resolver
                        .record_message(conversation_id, &stored.text, stored.timestamp)
                        .await
                    {
                        warn!(
                            %conversation_id,
                            error = %e,
                            "Failed to update conversation preview"
                        );
                    }
                }
                info!(message_id = %stored.id, %chat_id, "Message sent");
                Ok(stored)
            }
            Err(e) => {
                self.discard(chat_id, message.id);
                warn!(message_id = %message.id, %chat_id, error = %e, "Message send failed");
                Err(e.into())
            }
        }
    }

    /// Records the chat id of the active target once it exists.
    pub fn note_chat_id(&self, target: ChatTarget, chat_id: ObjectId) {
        let mut active = self.active.write();
        if let Some(current) = active.as_mut() {
            if current.target == target && current.chat_id.is_none() {
                current.chat_id = Some(chat_id);
            }
        }
    }

    fn confirm(&self, stored: Message) {
        let mut entry = self.cache.entry(stored.chat_id).or_default();
        match entry.iter_mut().find(|m| m.id == stored.id) {
            Some(slot) => *slot = stored,
            None => entry.push(stored),
        }
    }

    fn discard(&self, chat_id: ObjectId, message_id: ObjectId) {
        if let Some(mut entry) = self.cache.get_mut(&chat_id) {
            entry.retain(|m| m.id != message_id);
        }
    }
}
