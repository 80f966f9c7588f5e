//! Client-side chat core: conversation resolution, the message cache, the
//! team lifecycle, the roster and the realtime event router, all bound to
//! one [`Session`].

pub mod client;
pub mod messages;
pub mod presence;
pub mod resolver;
pub mod roster;
pub mod router;
pub mod session;
pub mod teams;

use bson::oid::ObjectId;

pub use client::ChatClient;
pub use messages::MessageService;
pub use presence::{FunctionInvoker, FunctionResponse, PresenceService};
pub use resolver::ConversationResolver;
pub use roster::Roster;
pub use router::EventRouter;
pub use session::Session;
pub use teams::{InviteOutcome, TeamManager};

/// Where a message goes: a direct chat with one user, or the sender's team
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    Direct(ObjectId),
    Team,
}

/// Notifications for the UI shell.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    RosterChanged,
    PresenceChanged(ObjectId),
    MessageReceived {
        chat_id: ObjectId,
        message_id: ObjectId,
        sender_id: ObjectId,
    },
    InviteReceived {
        invite_id: ObjectId,
        sender_id: ObjectId,
    },
    Notice(String),
}
