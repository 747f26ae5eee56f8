//! Playback Controller: speaker ownership.
//!
//! Plays one finalized, contiguous PCM clip at a time and resolves a
//! completion receiver when the clip drains. Mutual exclusion with
//! capture is deliberately NOT handled here; the orchestrator decides
//! when playing is safe.

mod speaker;

pub use speaker::SpeakerPlayback;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::utils::audio::WIRE_SAMPLE_RATE;

/// Payloads shorter than this (50 ms of s16le at the wire rate) are
/// ignored; fragments that short only produce click artifacts.
pub const MIN_AUDIBLE_BYTES: usize = (WIRE_SAMPLE_RATE as usize / 20) * 2;

/// Errors from the playback controller.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// No usable output device
    #[error("speaker unavailable: {0}")]
    Device(String),

    /// The hardware stream failed to build or start
    #[error("stream error: {0}")]
    Stream(String),
}

/// The orchestrator's seam onto the speaker.
pub trait PlaybackSink: Send {
    /// Start playing a clip; the returned receiver resolves when playback
    /// completes (immediately for sub-audible payloads). A clip already
    /// playing is cancelled first.
    fn play(&mut self, pcm: Bytes) -> Result<oneshot::Receiver<()>, PlaybackError>;

    /// Cancel playback immediately; idempotent.
    fn stop(&mut self);

    /// Whether a clip is currently playing.
    fn is_playing(&self) -> bool;
}
