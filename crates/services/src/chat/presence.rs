use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use huddle_db::models::{Presence, User};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::session::Session;
use crate::dao::user::UserDao;
use crate::error::{ChatError, ChatResult};

/// Raw reply of a server-side function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub status_code: u16,
    pub body: String,
}

/// Runs named server-side functions on behalf of the session's user.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function: &str) -> ChatResult<FunctionResponse>;
}

#[derive(Debug, Deserialize)]
struct FunctionOutcome {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Checks a function reply for HTTP 200 and `{"success": true}`.
pub fn expect_success(function: &str, response: &FunctionResponse) -> ChatResult<()> {
    if response.status_code != 200 {
        return Err(ChatError::Transient(format!(
            "{function} answered with status {}",
            response.status_code
        )));
    }
    let outcome: FunctionOutcome = serde_json::from_str(&response.body)
        .map_err(|e| ChatError::Transient(format!("{function} returned an unreadable body: {e}")))?;
    if outcome.success {
        Ok(())
    } else {
        Err(ChatError::Transient(
            outcome
                .message
                .unwrap_or_else(|| format!("{function} reported failure")),
        ))
    }
}

/// Online flag and last-seen heartbeat of the session's user.
pub struct PresenceService {
    session: Arc<Session>,
    users: Arc<UserDao>,
    interval: Duration,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceService {
    pub fn new(session: Arc<Session>, users: Arc<UserDao>, interval: Duration) -> Self {
        Self {
            session,
            users,
            interval,
            heartbeat: Mutex::new(None),
        }
    }

    pub async fn go_online(&self) -> ChatResult<User> {
        let user = self.users.touch_last_seen(self.session.user_id()).await?;
        self.session.set_profile(user.clone());
        Ok(user)
    }

    pub async fn go_offline(&self) -> ChatResult<User> {
        let user = self.users.set_online(self.session.user_id(), false).await?;
        self.session.set_profile(user.clone());
        Ok(user)
    }

    pub async fn set_status(&self, status: Option<String>) -> ChatResult<User> {
        let status = status.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let presence = Presence {
            status,
            ..self.session.profile().presence()
        };
        let user = self
            .users
            .update_presence(self.session.user_id(), &presence)
            .await?;
        self.session.set_profile(user.clone());
        Ok(user)
    }

    pub async fn beat(&self) -> ChatResult<()> {
        self.users.touch_last_seen(self.session.user_id()).await?;
        Ok(())
    }

    /// Starts the periodic heartbeat; a running one is kept.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let mut slot = self.heartbeat.lock();
        if slot.is_some() {
            return;
        }

        let presence = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(presence.interval);
            // The first tick fires immediately and go_online already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = presence.beat().await {
                    debug!(user_id = %presence.session.user_id(), error = %e, "Heartbeat failed");
                }
            }
        }));
        info!(
            user_id = %self.session.user_id(),
            interval_secs = self.interval.as_secs(),
            "Heartbeat started"
        );
    }

    pub fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }
    }
}
