pub mod migrations;
pub mod session_store;

pub use session_store::{AgentRecord, NewAgent, SessionRecord, SessionStore};
