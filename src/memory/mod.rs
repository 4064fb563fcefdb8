//! 记忆层：对话原语与会话持久化

pub mod conversation;
pub mod session_store;

pub use conversation::{compose_request, Message, Role};
pub use session_store::{
    join_state, new_session_id, split_state, FileSessionStore, InMemorySessionStore,
    SessionRecord, SessionStore,
};
