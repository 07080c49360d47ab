use tokio::sync::mpsc;
use tracing::debug;

/// One-shot playback cues the surface turns into actual audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    MessageSent,
    MessageReceived,
}

/// Explicitly owned playback handle. The shell that owns the audio
/// output holds the receiving end; call sites hold clones of this and
/// emit cues. Dropping the last handle closes the sink — there is no
/// ambient global player.
#[derive(Clone)]
pub struct SoundPlayer {
    tx: mpsc::UnboundedSender<SoundCue>,
}

impl SoundPlayer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SoundCue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Best-effort: a released sink swallows the cue.
    pub fn play(&self, cue: SoundCue) {
        debug!("Sound cue: {cue:?}");
        let _ = self.tx.send(cue);
    }
}
