pub mod chats;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod state;

pub use error::ApiError;
pub use extract::ApiJson;
pub use middleware::{AuthUser, require_auth};
pub use state::{ChatApiState, ChatState};
