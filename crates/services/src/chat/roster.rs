use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use bson::oid::ObjectId;
use huddle_db::models::{Invite, Team, User};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{session::Session, teams::TeamManager, ChatEvent};
use crate::dao::{conversation::ConversationDao, invite::InviteDao, user::UserDao};
use crate::error::ChatResult;

#[derive(Debug, Clone, Default)]
struct RosterState {
    entries: Vec<User>,
    conversation_ids: Vec<ObjectId>,
    team: Option<Team>,
    incoming: Vec<Invite>,
    /// Receiver id to pending invite id.
    sent: HashMap<ObjectId, ObjectId>,
}

/// The people the session's user can chat with, plus the invite lists that
/// are rebuilt alongside it.
///
/// Membership is only rebuilt by [`refresh`](Self::refresh). Presence
/// updates patch entries in place and never reorder the list. Rebuilds run
/// one at a time, so a rebuild that read the store earlier can never
/// overwrite one that read it later.
pub struct Roster {
    session: Arc<Session>,
    users: Arc<UserDao>,
    conversations: Arc<ConversationDao>,
    invites: Arc<InviteDao>,
    teams: Arc<TeamManager>,
    state: RwLock<RosterState>,
    rebuilding: Mutex<()>,
    active_peer: RwLock<Option<ObjectId>>,
    loading: AtomicBool,
    refreshes: AtomicU64,
}

impl Roster {
    pub fn new(
        session: Arc<Session>,
        users: Arc<UserDao>,
        conversations: Arc<ConversationDao>,
        invites: Arc<InviteDao>,
        teams: Arc<TeamManager>,
    ) -> Self {
        Self {
            session,
            users,
            conversations,
            invites,
            teams,
            state: RwLock::new(RosterState::default()),
            rebuilding: Mutex::new(()),
            active_peer: RwLock::new(None),
            loading: AtomicBool::new(true),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn roster(&self) -> Vec<User> {
        self.state.read().entries.clone()
    }

    pub fn contains(&self, user_id: &ObjectId) -> bool {
        self.state.read().entries.iter().any(|u| u.id == *user_id)
    }

    pub fn team(&self) -> Option<Team> {
        self.state.read().team.clone()
    }

    pub fn incoming_invites(&self) -> Vec<Invite> {
        self.state.read().incoming.clone()
    }

    pub fn sent_invites(&self) -> HashMap<ObjectId, ObjectId> {
        self.state.read().sent.clone()
    }

    pub fn knows_conversation(&self, conversation_id: &ObjectId) -> bool {
        self.state.read().conversation_ids.contains(conversation_id)
    }

    pub fn knows_invite(&self, invite_id: &ObjectId) -> bool {
        let state = self.state.read();
        state.incoming.iter().any(|i| i.id == *invite_id)
            || state.sent.values().any(|id| id == invite_id)
    }

    /// True until the first refresh has finished, whatever its outcome.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Completed refreshes since the session started.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// The peer of the open direct chat, listed even before any
    /// conversation with them exists.
    pub fn set_active_peer(&self, peer: Option<ObjectId>) {
        *self.active_peer.write() = peer;
    }

    pub fn active_peer(&self) -> Option<ObjectId> {
        *self.active_peer.read()
    }

    /// Rebuilds the roster, team and invite lists from the store.
    pub async fn refresh(&self) -> ChatResult<()> {
        let _rebuilding = self.rebuilding.lock().await;
        let result = self.rebuild().await;
        self.loading.store(false, Ordering::Release);
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(state) => {
                debug!(
                    user_id = %self.session.user_id(),
                    entries = state.entries.len(),
                    incoming = state.incoming.len(),
                    "Roster refreshed"
                );
                *self.state.write() = state;
                self.session.emit(ChatEvent::RosterChanged);
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %self.session.user_id(), error = %e, "Roster refresh failed");
                Err(e)
            }
        }
    }

    /// Copies presence fields of `user` onto its entry. Returns true when
    /// something changed.
    pub fn patch_presence(&self, user: &User) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.entries.iter_mut().find(|e| e.id == user.id) else {
            return false;
        };
        let presence = user.presence();
        if entry.presence() == presence {
            return false;
        }
        entry.apply_presence(presence);
        true
    }

    async fn rebuild(&self) -> ChatResult<RosterState> {
        let me = self.session.user_id();
        let team = self.teams.reconcile().await?;
        let conversations = self.conversations.find_for_participant(me).await?;

        let mut order: Vec<ObjectId> = Vec::new();
        let mut push = |id: ObjectId| {
            if id != me && !order.contains(&id) {
                order.push(id);
            }
        };
        for conversation in &conversations {
            if let Some(other) = conversation.other_participant(&me) {
                push(other);
            }
        }
        if let Some(peer) = self.active_peer() {
            push(peer);
        }
        if let Some(team) = &team {
            for member in &team.members {
                push(*member);
            }
        }

        let mut found: HashMap<ObjectId, User> = self
            .users
            .find_many_by_ids(&order)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let entries = order
            .iter()
            .map(|id| found.remove(id).unwrap_or_else(|| User::deleted(*id)))
            .collect();

        let incoming = self.invites.incoming_pending(me).await?;
        let sent = self
            .invites
            .outgoing_pending(me)
            .await?
            .into_iter()
            .map(|i| (i.receiver_id, i.id))
            .collect();

        Ok(RosterState {
            entries,
            conversation_ids: conversations.iter().map(|c| c.id).collect(),
            team,
            incoming,
            sent,
        })
    }
}
