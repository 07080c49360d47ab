//! Voice-call shell.
//!
//! The media transport is an external capability; the core only derives
//! the channel name (identical to the chat room id), hands it across,
//! and tracks the local toggle state the call surface renders.

use tracing::info;

use tandem_types::RoomId;

use crate::error::SessionError;

/// Opaque voice transport. Join failures surface as store-write errors
/// do: logged, shown once, never retried here.
pub trait VoiceTransport: Send + Sync {
    fn join(&self, channel_name: &str) -> Result<Box<dyn VoiceCall>, SessionError>;
}

/// A joined call as the transport exposes it.
pub trait VoiceCall: Send {
    fn set_mic_muted(&mut self, muted: bool);
    fn set_speaker_on(&mut self, on: bool);
    fn leave(self: Box<Self>);
}

/// One live call, owned by the call surface for its lifetime.
pub struct CallHandle {
    partner_name: String,
    channel: String,
    mic_muted: bool,
    speaker_on: bool,
    call: Box<dyn VoiceCall>,
}

impl CallHandle {
    pub fn start(
        transport: &dyn VoiceTransport,
        partner_name: &str,
        room: &RoomId,
    ) -> Result<Self, SessionError> {
        let channel = room.channel_name().to_string();
        let call = transport.join(&channel)?;
        info!("Joined voice channel {channel} with {partner_name}");
        Ok(Self {
            partner_name: partner_name.to_string(),
            channel,
            mic_muted: false,
            speaker_on: false,
            call,
        })
    }

    pub fn partner_name(&self) -> &str {
        &self.partner_name
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn toggle_mic(&mut self) -> bool {
        self.mic_muted = !self.mic_muted;
        self.call.set_mic_muted(self.mic_muted);
        self.mic_muted
    }

    pub fn toggle_speaker(&mut self) -> bool {
        self.speaker_on = !self.speaker_on;
        self.call.set_speaker_on(self.speaker_on);
        self.speaker_on
    }

    pub fn end(self) {
        self.call.leave();
        info!("Left voice channel {}", self.channel);
    }
}
