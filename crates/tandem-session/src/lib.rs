pub mod call;
pub mod config;
pub mod error;
mod feed;
pub mod notify;
pub mod presence;
pub mod reactions;
pub mod session;
pub mod sound;

pub use config::PairConfig;
pub use error::SessionError;
pub use presence::PresenceTracker;
pub use session::{ChatSession, SessionState};
pub use sound::{SoundCue, SoundPlayer};
