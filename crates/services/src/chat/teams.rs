use std::sync::Arc;

use bson::oid::ObjectId;
use futures::future::join_all;
use huddle_db::models::{Invite, InviteStatus, Team, User};
use tracing::{debug, info, warn};

use super::{session::Session, ChatEvent};
use crate::dao::{base::DaoError, invite::InviteDao, team::TeamDao, user::UserDao};
use crate::error::{ChatError, ChatResult};

const TEAM_GONE: &str = "Your team no longer exists";

#[derive(Debug, Clone, PartialEq)]
pub enum InviteOutcome {
    Sent(Invite),
    /// A pending invite to the same receiver already existed; nothing was written.
    AlreadyPending(Invite),
}

impl InviteOutcome {
    pub fn invite(&self) -> &Invite {
        match self {
            InviteOutcome::Sent(invite) | InviteOutcome::AlreadyPending(invite) => invite,
        }
    }
}

/// Team and invite state transitions for the session's user.
///
/// Every transition touches several documents without a transaction. The
/// writes are ordered so that a failure part-way leaves a state
/// [`reconcile`](Self::reconcile) can repair from the team side:
///
/// - joining writes the member list before the user's team reference
/// - leaving removes the member before clearing the reference
/// - disbanding deletes the team before clearing member references
///
/// Authorization (only the admin transfers or disbands) is the caller's job.
pub struct TeamManager {
    session: Arc<Session>,
    users: Arc<UserDao>,
    teams: Arc<TeamDao>,
    invites: Arc<InviteDao>,
}

impl TeamManager {
    pub fn new(
        session: Arc<Session>,
        users: Arc<UserDao>,
        teams: Arc<TeamDao>,
        invites: Arc<InviteDao>,
    ) -> Self {
        Self {
            session,
            users,
            teams,
            invites,
        }
    }

    pub async fn create_team(&self, name: &str) -> ChatResult<Team> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::validation("team name is empty"));
        }

        let me = self.reload_self().await?;
        if me.team_id.is_some() {
            return Err(ChatError::validation("leave your current team first"));
        }

        let team = self.teams.create(name.to_string(), me.id).await?;
        self.users.set_team(me.id, Some(team.id)).await?;
        self.session.set_team(Some(team.id));

        info!(team_id = %team.id, owner_id = %me.id, "Created team");
        self.session.emit(ChatEvent::RosterChanged);
        Ok(team)
    }

    /// Hands owner and admin roles to `member_id`.
    pub async fn transfer_ownership(
        &self,
        team_id: ObjectId,
        member_id: ObjectId,
    ) -> ChatResult<Team> {
        let team = self.find_team(team_id).await?;
        if !team.is_member(&member_id) {
            return Err(ChatError::validation("the new leader must be a team member"));
        }
        if team.is_admin(&member_id) {
            return Ok(team);
        }

        let team = self.teams.set_leader(team_id, member_id).await?;
        info!(%team_id, admin_id = %member_id, "Transferred team ownership");
        self.session.emit(ChatEvent::RosterChanged);
        Ok(team)
    }

    /// Leaves the current team. The last member leaving deletes the team; an
    /// admin leaving others behind hands adminship to the longest-standing
    /// remaining member.
    pub async fn leave_team(&self) -> ChatResult<()> {
        let me = self.reload_self().await?;
        let team_id = me
            .team_id
            .ok_or_else(|| ChatError::validation("you are not in a team"))?;

        match self.teams.find_optional(team_id).await? {
            None => {
                warn!(%team_id, user_id = %me.id, "Leaving a team that no longer exists");
            }
            Some(team) => {
                let remaining: Vec<ObjectId> = team
                    .members
                    .iter()
                    .copied()
                    .filter(|m| *m != me.id)
                    .collect();

                match remaining.first() {
                    None => {
                        self.delete_team(team_id).await?;
                        info!(%team_id, "Last member left, team deleted");
                    }
                    Some(successor) if team.is_admin(&me.id) => {
                        self.teams
                            .set_members_and_admin(team_id, &remaining, *successor)
                            .await?;
                        info!(%team_id, admin_id = %successor, "Admin left, adminship passed on");
                    }
                    Some(_) => {
                        self.teams.set_members(team_id, &remaining).await?;
                    }
                }
            }
        }

        self.users.set_team(me.id, None).await?;
        self.session.set_team(None);
        info!(%team_id, user_id = %me.id, "Left team");
        self.session.emit(ChatEvent::RosterChanged);
        Ok(())
    }

    /// Deletes the current team and clears every member's reference to it.
    /// Returns the members it was disbanded for.
    pub async fn disband_team(&self) -> ChatResult<Vec<ObjectId>> {
        let me = self.reload_self().await?;
        let team_id = me
            .team_id
            .ok_or_else(|| ChatError::validation("you are not in a team"))?;

        let members = match self.teams.find_optional(team_id).await? {
            Some(team) => team.members,
            None => vec![me.id],
        };
        self.delete_team(team_id).await?;

        let results =
            join_all(members.iter().map(|member| self.users.set_team(*member, None))).await;
        self.session.set_team(None);
        self.session.emit(ChatEvent::RosterChanged);

        let mut first_error = None;
        for (member, result) in members.iter().zip(results) {
            if let Err(e) = result {
                // A member whose reference survives is repaired on their next read.
                warn!(%team_id, user_id = %member, error = %e, "Failed to clear team reference");
                first_error.get_or_insert(e);
            }
        }

        info!(%team_id, members = members.len(), "Disbanded team");
        match first_error {
            Some(DaoError::NotFound) | None => Ok(members),
            Some(e) => Err(e.into()),
        }
    }

    pub async fn send_invite(&self, receiver_id: ObjectId) -> ChatResult<InviteOutcome> {
        let sender_id = self.session.user_id();
        if receiver_id == sender_id {
            return Err(ChatError::validation("cannot invite yourself"));
        }

        if let Some(existing) = self.invites.find_pending(sender_id, receiver_id).await? {
            debug!(invite_id = %existing.id, "Invite already pending");
            return Ok(InviteOutcome::AlreadyPending(existing));
        }

        let invite = self.invites.create(sender_id, receiver_id).await?;
        info!(invite_id = %invite.id, %sender_id, %receiver_id, "Sent team invite");
        Ok(InviteOutcome::Sent(invite))
    }

    /// Withdraws the pending invite to `receiver_id`. Returns false when
    /// there was none.
    pub async fn cancel_invite(&self, receiver_id: ObjectId) -> ChatResult<bool> {
        let sender_id = self.session.user_id();
        let Some(invite) = self.invites.find_pending(sender_id, receiver_id).await? else {
            return Ok(false);
        };

        match self.invites.delete(invite.id).await {
            Ok(()) | Err(DaoError::NotFound) => {
                info!(invite_id = %invite.id, "Cancelled team invite");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Joins the inviter's team.
    ///
    /// Nothing is written when the acceptor already has a team. Once the
    /// invite is marked accepted it stays accepted, even if the inviter's
    /// team turns out to be gone.
    pub async fn accept_invite(&self, invite_id: ObjectId) -> ChatResult<Team> {
        let invite = self.pending_invite_for_me(invite_id).await?;

        let me = self.reload_self().await?;
        if me.team_id.is_some() {
            return Err(ChatError::validation("leave your current team before joining another"));
        }

        self.invites
            .set_status(invite.id, InviteStatus::Accepted)
            .await?;

        let team = match self.inviter_team(&invite).await? {
            Some(team) => team,
            None => {
                warn!(
                    invite_id = %invite.id,
                    sender_id = %invite.sender_id,
                    "Invite points at a missing team"
                );
                self.session.notice("That team no longer exists");
                self.session.emit(ChatEvent::RosterChanged);
                return Err(ChatError::NotFound("the inviter's team no longer exists".to_string()));
            }
        };

        let mut members = team.members.clone();
        if !members.contains(&me.id) {
            members.push(me.id);
        }
        let team = self.teams.set_members(team.id, &members).await?;
        self.users.set_team(me.id, Some(team.id)).await?;
        self.session.set_team(Some(team.id));

        info!(invite_id = %invite.id, team_id = %team.id, user_id = %me.id, "Joined team");
        self.session.emit(ChatEvent::RosterChanged);
        Ok(team)
    }

    pub async fn reject_invite(&self, invite_id: ObjectId) -> ChatResult<Invite> {
        let invite = self.pending_invite_for_me(invite_id).await?;
        let invite = self
            .invites
            .set_status(invite.id, InviteStatus::Rejected)
            .await?;
        info!(invite_id = %invite.id, "Rejected team invite");
        self.session.emit(ChatEvent::RosterChanged);
        Ok(invite)
    }

    pub async fn incoming_invites(&self) -> ChatResult<Vec<Invite>> {
        Ok(self.invites.incoming_pending(self.session.user_id()).await?)
    }

    pub async fn outgoing_invites(&self) -> ChatResult<Vec<Invite>> {
        Ok(self.invites.outgoing_pending(self.session.user_id()).await?)
    }

    /// Reads the user's team and repairs a half-applied transition:
    ///
    /// - a reference to a missing team, or to a team not listing the user,
    ///   is cleared with a notice
    /// - a user listed by a team but without a reference gets one
    pub async fn reconcile(&self) -> ChatResult<Option<Team>> {
        let me = self.reload_self().await?;

        if let Some(team_id) = me.team_id {
            return match self.teams.find_optional(team_id).await? {
                Some(team) if team.is_member(&me.id) => Ok(Some(team)),
                _ => {
                    warn!(%team_id, user_id = %me.id, "Clearing dangling team reference");
                    self.users.set_team(me.id, None).await?;
                    self.session.set_team(None);
                    self.session.notice(TEAM_GONE);
                    Ok(None)
                }
            };
        }

        let listed = self.teams.find_by_member(me.id).await?;
        match listed.into_iter().next() {
            Some(team) => {
                warn!(team_id = %team.id, user_id = %me.id, "Restoring missing team reference");
                self.users.set_team(me.id, Some(team.id)).await?;
                self.session.set_team(Some(team.id));
                Ok(Some(team))
            }
            None => Ok(None),
        }
    }

    /// Fetches the user document and refreshes the session's copy.
    pub async fn reload_self(&self) -> ChatResult<User> {
        let me = self
            .users
            .find_by_id(self.session.user_id())
            .await
            .map_err(|e| match e {
                DaoError::NotFound => {
                    ChatError::NotFound("your profile no longer exists".to_string())
                }
                other => other.into(),
            })?;
        self.session.set_profile(me.clone());
        Ok(me)
    }

    async fn find_team(&self, team_id: ObjectId) -> ChatResult<Team> {
        self.teams
            .find_optional(team_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("team {team_id}")))
    }

    async fn delete_team(&self, team_id: ObjectId) -> ChatResult<()> {
        match self.teams.delete(team_id).await {
            Ok(()) | Err(DaoError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn pending_invite_for_me(&self, invite_id: ObjectId) -> ChatResult<Invite> {
        let invite = self
            .invites
            .find_by_id(invite_id)
            .await
            .map_err(|e| match e {
                DaoError::NotFound => ChatError::NotFound(format!("invite {invite_id}")),
                other => other.into(),
            })?;

        if invite.receiver_id != self.session.user_id() {
            return Err(ChatError::validation("this invite is addressed to someone else"));
        }
        if !invite.is_pending() {
            return Err(ChatError::validation(format!(
                "invite is already {}",
                invite.status.as_str()
            )));
        }
        Ok(invite)
    }

    async fn inviter_team(&self, invite: &Invite) -> ChatResult<Option<Team>> {
        let Some(sender) = self.users.base.find_optional(invite.sender_id).await? else {
            return Ok(None);
        };
        match sender.team_id {
            Some(team_id) => Ok(self.teams.find_optional(team_id).await?),
            None => Ok(None),
        }
    }
}
