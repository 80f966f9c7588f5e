use std::sync::Arc;

use bson::oid::ObjectId;
use dashmap::DashMap;
use futures::{stream::select_all, StreamExt};
use huddle_db::models::{Conversation, Invite, Message, Team, User};
use huddle_db::store::{ChangeEvent, ChangeKind, DocumentStore, StoreError, StoreResult};
use parking_lot::Mutex;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{messages::MessageService, roster::Roster, session::Session, ChatEvent, ChatTarget};
use crate::dao::conversation::ConversationDao;
use crate::error::ChatResult;

const CHANNELS: [&str; 5] = [
    Conversation::COLLECTION,
    User::COLLECTION,
    Invite::COLLECTION,
    Message::COLLECTION,
    Team::COLLECTION,
];

/// Feeds store change notifications into the session's caches.
///
/// One task consumes every subscription in arrival order, so cache writes
/// from realtime delivery never race each other. Roster rebuilds run on a
/// second task; requests made while one is queued collapse into it.
pub struct EventRouter {
    store: Arc<dyn DocumentStore>,
    dispatcher: Arc<Dispatcher>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    attached: Mutex<Option<ObjectId>>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<Session>,
        messages: Arc<MessageService>,
        roster: Arc<Roster>,
        conversations: Arc<ConversationDao>,
    ) -> Self {
        Self {
            store,
            dispatcher: Arc::new(Dispatcher {
                session,
                messages,
                roster,
                conversations,
                refresh: Arc::new(Notify::new()),
                chat_membership: DashMap::new(),
            }),
            tasks: Mutex::new(Vec::new()),
            attached: Mutex::new(None),
        }
    }

    /// Subscribes for the session's user. A second call for the same user
    /// keeps the existing subscriptions.
    pub async fn start(&self) -> ChatResult<()> {
        let user_id = self.dispatcher.session.user_id();
        if *self.attached.lock() == Some(user_id) {
            return Ok(());
        }
        self.stop();

        let mut streams = Vec::with_capacity(CHANNELS.len());
        for collection in CHANNELS {
            streams.push(self.store.subscribe(collection).await?);
        }

        let worker: JoinHandle<()> = {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                loop {
                    dispatcher.refresh.notified().await;
                    // Failures are logged by the roster; the next change retries.
                    let _ = dispatcher.roster.refresh().await;
                }
            })
        };

        let consumer = {
            let dispatcher = self.dispatcher.clone();
            let mut events = select_all(streams);
            tokio::spawn(async move {
                while let Some(item) = events.next().await {
                    dispatcher.dispatch(item).await;
                }
                debug!(%user_id, "Change streams closed");
            })
        };

        let mut tasks = self.tasks.lock();
        tasks.push(worker);
        tasks.push(consumer);
        *self.attached.lock() = Some(user_id);
        info!(%user_id, channels = CHANNELS.len(), "Realtime subscriptions started");
        Ok(())
    }

    /// Drops every subscription. Writes already in flight still complete.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        *self.attached.lock() = None;
        info!(user_id = %self.dispatcher.session.user_id(), "Realtime subscriptions stopped");
    }

    pub fn is_running(&self) -> bool {
        self.attached.lock().is_some()
    }

    /// Queues a roster rebuild.
    pub fn request_refresh(&self) {
        self.dispatcher.refresh.notify_one();
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Dispatcher {
    session: Arc<Session>,
    messages: Arc<MessageService>,
    roster: Arc<Roster>,
    conversations: Arc<ConversationDao>,
    refresh: Arc<Notify>,
    /// Whether a conversation includes the session's user. Participants
    /// never change, so answers are kept.
    chat_membership: DashMap<ObjectId, bool>,
}

impl Dispatcher {
    async fn dispatch(&self, item: StoreResult<ChangeEvent>) {
        let event = match item {
            Ok(event) => event,
            Err(StoreError::Lagged(missed)) => {
                warn!(missed, "Change stream lagged, resynchronising");
                self.refresh.notify_one();
                if let Some(chat_id) = self.messages.active_chat_id() {
                    if let Err(e) = self.messages.load(chat_id).await {
                        warn!(%chat_id, error = %e, "Failed to reload active chat");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Change stream error");
                return;
            }
        };

        match event.collection.as_str() {
            Conversation::COLLECTION => self.on_conversation(&event),
            User::COLLECTION => self.on_user(&event),
            Invite::COLLECTION => self.on_invite(&event),
            Message::COLLECTION => self.on_message(&event).await,
            Team::COLLECTION => self.on_team(&event),
            other => debug!(collection = other, "Ignoring change event"),
        }
    }

    fn on_conversation(&self, event: &ChangeEvent) {
        let me = self.session.user_id();
        let relevant = match decode::<Conversation>(event) {
            Some(conversation) => conversation.participants.contains(&me),
            None => self.roster.knows_conversation(&event.id),
        };
        if relevant {
            self.refresh.notify_one();
        }
    }

    fn on_user(&self, event: &ChangeEvent) {
        if event.kind == ChangeKind::Delete {
            return;
        }
        let Some(user) = decode::<User>(event) else {
            return;
        };

        if user.id == self.session.user_id() {
            if self.session.set_profile(user.clone()) {
                debug!(user_id = %user.id, "Own team reference changed");
                self.refresh.notify_one();
            }
            return;
        }

        if self.roster.patch_presence(&user) {
            self.session.emit(ChatEvent::PresenceChanged(user.id));
        }
    }

    fn on_invite(&self, event: &ChangeEvent) {
        let me = self.session.user_id();
        match decode::<Invite>(event) {
            Some(invite) if invite.involves(&me) => {
                if event.kind == ChangeKind::Create && invite.receiver_id == me {
                    self.session.emit(ChatEvent::InviteReceived {
                        invite_id: invite.id,
                        sender_id: invite.sender_id,
                    });
                }
                self.refresh.notify_one();
            }
            Some(_) => {}
            None => {
                if self.roster.knows_invite(&event.id) {
                    self.refresh.notify_one();
                }
            }
        }
    }

    fn on_team(&self, event: &ChangeEvent) {
        let me = self.session.user_id();
        let ours = self.session.team_id() == Some(event.id)
            || self.roster.team().is_some_and(|t| t.id == event.id);
        let lists_me = decode::<Team>(event).is_some_and(|t| t.is_member(&me));
        if ours || lists_me {
            self.refresh.notify_one();
        }
    }

    async fn on_message(&self, event: &ChangeEvent) {
        if event.kind != ChangeKind::Create {
            return;
        }
        let Some(message) = decode::<Message>(event) else {
            return;
        };
        if !self.is_my_chat(message.chat_id).await {
            return;
        }

        let chat_id = message.chat_id;
        let message_id = message.id;
        let sender_id = message.sender_id;
        if !self.messages.ingest(message) || sender_id == self.session.user_id() {
            return;
        }

        let target = if self.session.team_id() == Some(chat_id) {
            ChatTarget::Team
        } else {
            ChatTarget::Direct(sender_id)
        };
        self.messages.note_chat_id(target, chat_id);

        if self.messages.active_chat_id() != Some(chat_id) {
            self.session.bump_unread();
        }
        self.session.emit(ChatEvent::MessageReceived {
            chat_id,
            message_id,
            sender_id,
        });
    }

    async fn is_my_chat(&self, chat_id: ObjectId) -> bool {
        if self.session.team_id() == Some(chat_id)
            || self.messages.is_cached(&chat_id)
            || self.roster.knows_conversation(&chat_id)
        {
            return true;
        }
        if let Some(known) = self.chat_membership.get(&chat_id) {
            return *known;
        }

        // First message of a conversation the roster has not picked up yet.
        match self.conversations.base.find_optional(chat_id).await {
            Ok(Some(conversation)) => {
                let mine = conversation.participants.contains(&self.session.user_id());
                self.chat_membership.insert(chat_id, mine);
                mine
            }
            Ok(None) => {
                self.chat_membership.insert(chat_id, false);
                false
            }
            Err(e) => {
                warn!(%chat_id, error = %e, "Failed to check conversation membership");
                false
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    match event.decode::<T>() {
        Ok(value) => value,
        Err(e) => {
            warn!(
                collection = %event.collection,
                id = %event.id,
                error = %e,
                "Undecodable change payload"
            );
            None
        }
    }
}
