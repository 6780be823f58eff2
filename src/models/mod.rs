pub mod conversation;
pub mod message;

pub use conversation::{Conversation, DEFAULT_CONVERSATION_ID};
pub use message::{Message, Role};
