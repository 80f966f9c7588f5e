pub mod base;
pub mod conversation;
pub mod invite;
pub mod message;
pub mod team;
pub mod user;

pub use base::BaseDao;
pub use conversation::ConversationDao;
pub use invite::InviteDao;
pub use message::MessageDao;
pub use team::TeamDao;
pub use user::UserDao;
