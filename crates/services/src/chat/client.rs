use std::{sync::Arc, time::Duration};

use bson::oid::ObjectId;
use huddle_config::{ChatSettings, Settings, StoreBackend};
use huddle_db::models::{Message, Team, User};
use huddle_db::store::{memory::MemoryStore, mongo::MongoStore, DocumentStore};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::{
    messages::MessageService,
    presence::{expect_success, FunctionInvoker, PresenceService},
    resolver::ConversationResolver,
    roster::Roster,
    router::EventRouter,
    session::Session,
    teams::TeamManager,
    ChatEvent, ChatTarget,
};
use crate::dao::{
    base::DaoError, conversation::ConversationDao, invite::InviteDao, message::MessageDao,
    team::TeamDao, user::UserDao,
};
use crate::error::{ChatError, ChatResult};

const DELETE_ACCOUNT_FUNCTION: &str = "delete-user-account";

/// Opens the store the settings ask for.
pub async fn open_store(settings: &Settings) -> ChatResult<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match settings.store.backend {
        StoreBackend::Mongo => Arc::new(MongoStore::connect(&settings.database).await?),
        StoreBackend::Memory => Arc::new(MemoryStore::new(settings.store.event_buffer)),
    };
    info!(backend = ?settings.store.backend, "Document store ready");
    Ok(store)
}

/// One signed-in user's chat session: every component wired to the same
/// [`Session`], realtime subscriptions and the presence heartbeat.
pub struct ChatClient {
    session: Arc<Session>,
    users: Arc<UserDao>,
    resolver: Arc<ConversationResolver>,
    messages: Arc<MessageService>,
    teams: Arc<TeamManager>,
    roster: Arc<Roster>,
    router: EventRouter,
    presence: Arc<PresenceService>,
}

impl ChatClient {
    /// Loads `user_id`'s profile, marks them online, subscribes to changes
    /// and builds the first roster.
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        settings: &ChatSettings,
        user_id: ObjectId,
    ) -> ChatResult<Self> {
        let users = Arc::new(UserDao::new(store.clone()));
        let conversations = Arc::new(ConversationDao::new(store.clone()));
        let invites = Arc::new(InviteDao::new(store.clone()));
        let teams = Arc::new(TeamDao::new(store.clone()));

        let profile = users.find_by_id(user_id).await.map_err(|e| match e {
            DaoError::NotFound => ChatError::NotFound(format!("user {user_id}")),
            other => other.into(),
        })?;
        let session = Session::new(profile);

        let resolver = Arc::new(ConversationResolver::new(
            conversations.clone(),
            settings.preview_max_chars,
        ));
        let messages = Arc::new(MessageService::new(
            session.clone(),
            resolver.clone(),
            Arc::new(MessageDao::new(store.clone())),
            settings.max_message_chars,
            settings.history_limit,
        ));
        let team_manager = Arc::new(TeamManager::new(
            session.clone(),
            users.clone(),
            teams,
            invites.clone(),
        ));
        let roster = Arc::new(Roster::new(
            session.clone(),
            users.clone(),
            conversations.clone(),
            invites,
            team_manager.clone(),
        ));
        let router = EventRouter::new(
            store,
            session.clone(),
            messages.clone(),
            roster.clone(),
            conversations,
        );
        let presence = Arc::new(PresenceService::new(
            session.clone(),
            users.clone(),
            Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
        ));

        let client = Self {
            session,
            users,
            resolver,
            messages,
            teams: team_manager,
            roster,
            router,
            presence,
        };

        client.presence.go_online().await?;
        client.router.start().await?;
        client.presence.start_heartbeat();
        if let Err(e) = client.roster.refresh().await {
            warn!(%user_id, error = %e, "Initial roster load failed");
        }

        info!(%user_id, "Chat session started");
        Ok(client)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn user_id(&self) -> ObjectId {
        self.session.user_id()
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn teams(&self) -> &TeamManager {
        &self.teams
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.session.subscribe()
    }

    /// Opens a chat and loads its history. A direct chat's peer joins the
    /// roster right away, before any message exists.
    pub async fn open_chat(&self, target: ChatTarget) -> ChatResult<Option<ObjectId>> {
        match target {
            ChatTarget::Direct(peer) => {
                if peer == self.user_id() {
                    return Err(ChatError::validation("cannot chat with yourself"));
                }
                self.roster.set_active_peer(Some(peer));
                if !self.roster.contains(&peer) {
                    self.router.request_refresh();
                }
            }
            ChatTarget::Team => self.roster.set_active_peer(None),
        }

        let chat_id = self.messages.open(target).await?;
        if let (ChatTarget::Direct(_), Some(conversation_id)) = (target, chat_id) {
            if let Err(e) = self.resolver.mark_read(conversation_id).await {
                warn!(%conversation_id, error = %e, "Failed to mark conversation read");
            }
        }
        self.session.clear_unread();
        Ok(chat_id)
    }

    pub fn close_chat(&self) {
        self.messages.close();
        self.roster.set_active_peer(None);
    }

    pub async fn send(&self, target: ChatTarget, text: &str) -> ChatResult<Message> {
        self.messages.send(target, text).await
    }

    /// Rebuilds the roster now, after any rebuild already running.
    pub async fn refresh(&self) -> ChatResult<()> {
        self.roster.refresh().await
    }

    /// Hands the team to `member_id`. Only the admin may do this.
    pub async fn transfer_ownership(&self, member_id: ObjectId) -> ChatResult<Team> {
        let team = self.admin_team().await?;
        let team = self.teams.transfer_ownership(team.id, member_id).await?;
        self.router.request_refresh();
        Ok(team)
    }

    /// Disbands the team. Only the admin may do this.
    pub async fn disband_team(&self) -> ChatResult<Vec<ObjectId>> {
        self.admin_team().await?;
        let members = self.teams.disband_team().await?;
        self.router.request_refresh();
        Ok(members)
    }

    pub async fn block_user(&self, user_id: ObjectId) -> ChatResult<User> {
        if user_id == self.user_id() {
            return Err(ChatError::validation("cannot block yourself"));
        }
        let mut blocked = self.session.profile().blocked_user_ids;
        if blocked.contains(&user_id) {
            return Ok(self.session.profile());
        }
        blocked.push(user_id);
        self.store_blocked(&blocked).await
    }

    pub async fn unblock_user(&self, user_id: ObjectId) -> ChatResult<User> {
        let mut blocked = self.session.profile().blocked_user_ids;
        let before = blocked.len();
        blocked.retain(|id| *id != user_id);
        if blocked.len() == before {
            return Ok(self.session.profile());
        }
        self.store_blocked(&blocked).await
    }

    /// Re-reads the profile, e.g. after it was edited elsewhere.
    pub async fn reload_profile(&self) -> ChatResult<User> {
        let user = self.teams.reload_self().await?;
        self.router.request_refresh();
        Ok(user)
    }

    /// Ends the session: unsubscribes, stops the heartbeat and marks the
    /// user offline.
    pub async fn logout(&self) -> ChatResult<()> {
        self.shutdown();
        self.presence.go_offline().await?;
        info!(user_id = %self.user_id(), "Chat session ended");
        Ok(())
    }

    /// Deletes the account server-side, then ends the session.
    pub async fn delete_account(&self, functions: &dyn FunctionInvoker) -> ChatResult<()> {
        let response = functions.invoke(DELETE_ACCOUNT_FUNCTION).await?;
        expect_success(DELETE_ACCOUNT_FUNCTION, &response)?;
        self.shutdown();
        info!(user_id = %self.user_id(), "Account deleted");
        Ok(())
    }

    async fn admin_team(&self) -> ChatResult<Team> {
        let team = self
            .teams
            .reconcile()
            .await?
            .ok_or_else(|| ChatError::validation("you are not in a team"))?;
        if !team.is_admin(&self.user_id()) {
            return Err(ChatError::validation("only the team admin can do that"));
        }
        Ok(team)
    }

    async fn store_blocked(&self, blocked: &[ObjectId]) -> ChatResult<User> {
        let user = self.users.set_blocked(self.user_id(), blocked).await?;
        self.session.set_profile(user.clone());
        Ok(user)
    }

    fn shutdown(&self) {
        self.router.stop();
        self.presence.stop_heartbeat();
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
