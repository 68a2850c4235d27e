pub mod error;
pub mod message;
pub mod session;
pub mod types;

pub use error::{Error, Result};
pub use message::{ChatTurn, Role};
pub use session::{AppliedUpdate, PersonalitySuggestion, SessionState, STATE_SCHEMA_VERSION};
pub use types::{AgentId, SessionId};
