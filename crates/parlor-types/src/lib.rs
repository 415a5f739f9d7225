pub mod api;
pub mod events;
pub mod models;

pub use events::{ConnectionState, Scope};
pub use models::{Channel, ChannelId, Identity, Message, MessageId, UserId};
