pub mod conversation;
pub mod invite;
pub mod message;
pub mod team;
pub mod user;

pub use conversation::Conversation;
pub use invite::{Invite, InviteStatus};
pub use message::Message;
pub use team::Team;
pub use user::{Presence, User};
