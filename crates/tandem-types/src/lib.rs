pub mod events;
pub mod ids;
pub mod models;

pub use events::SessionEvent;
pub use ids::{MessageId, RoomId, UserId};
pub use models::{Message, MessageStatus, Presence, Timestamp};
