pub mod message_service;
pub mod user_service;

pub use message_service::{ChatError, MessageService, ValidationError};
pub use user_service::{UserError, UserService};
