pub mod chat;
pub mod dao;
pub mod error;

pub use chat::{ChatClient, ChatEvent, ChatTarget, InviteOutcome, Session};
pub use dao::*;
pub use error::{ChatError, ChatResult};
