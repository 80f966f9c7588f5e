use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bson::oid::ObjectId;
use huddle_db::models::User;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::ChatEvent;

const EVENT_CAPACITY: usize = 64;

/// Who is signed in, plus the state every component of that sign-in
/// shares: the cached profile (team reference, block list), the unread
/// counter and the UI event channel.
pub struct Session {
    user_id: ObjectId,
    profile: RwLock<User>,
    unread: AtomicUsize,
    events: broadcast::Sender<ChatEvent>,
}

impl Session {
    pub fn new(profile: User) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            user_id: profile.id,
            profile: RwLock::new(profile),
            unread: AtomicUsize::new(0),
            events,
        })
    }

    pub fn user_id(&self) -> ObjectId {
        self.user_id
    }

    pub fn profile(&self) -> User {
        self.profile.read().clone()
    }

    pub fn team_id(&self) -> Option<ObjectId> {
        self.profile.read().team_id
    }

    /// Replaces the cached profile. Returns true when the team reference
    /// changed.
    pub fn set_profile(&self, profile: User) -> bool {
        if profile.id != self.user_id {
            warn!(user_id = %self.user_id, other = %profile.id, "Ignoring profile of another user");
            return false;
        }
        let mut current = self.profile.write();
        let team_changed = current.team_id != profile.team_id;
        *current = profile;
        team_changed
    }

    pub fn set_team(&self, team_id: Option<ObjectId>) {
        self.profile.write().team_id = team_id;
    }

    pub fn has_blocked(&self, other: &ObjectId) -> bool {
        self.profile.read().has_blocked(other)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ChatEvent) {
        // Nobody listening is not an error.
        if self.events.send(event).is_err() {
            debug!(user_id = %self.user_id, "No UI listener for chat event");
        }
    }

    /// A user-visible notice.
    pub fn notice(&self, text: impl Into<String>) {
        self.emit(ChatEvent::Notice(text.into()));
    }

    pub fn unread(&self) -> usize {
        self.unread.load(Ordering::Relaxed)
    }

    pub fn bump_unread(&self) -> usize {
        self.unread.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn clear_unread(&self) {
        self.unread.store(0, Ordering::Relaxed);
    }
}
