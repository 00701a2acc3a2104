//! 记忆层：对话消息、会话上下文、SQLite 持久化

pub mod context;
pub mod conversation;
pub mod persistence;

pub use context::{Artifact, ConversationContext, Phase};
pub use conversation::{Message, Role};
pub use persistence::{ConversationStore, Milestone};
