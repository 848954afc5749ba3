pub mod message;
pub mod topic;
pub mod user;

pub use message::{Message, MessageId, NewMessage};
pub use topic::TopicKey;
pub use user::{User, UserInfo};
