//! Translation Session: the orchestrating state machine.
//!
//! Ties the gateway, capture pipeline, assembler and playback controller
//! together behind a `start`/`stop`/`speak`/`shutdown` command surface,
//! and owns the single source of truth for session state and audio mode.
//! The half-duplex discipline (never record while playing) is enforced
//! here and nowhere else.

mod mode;
mod orchestrator;

pub use mode::{AudioMode, AudioModeController};
pub use orchestrator::{SessionHandle, SessionTuning, TranslationSession};

use crate::utils::language::DetectedLanguage;

/// Top-level session state as shown to the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Translating,
    Playing,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Translating => "translating",
            SessionState::Playing => "playing",
            SessionState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Plain state snapshot published to the UI collaborator on every
/// mutation. One error string at a time, replaced wholesale.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub is_recording: bool,
    pub is_translating: bool,
    pub is_playing: bool,
    /// Accumulated transcript of the user's speech
    pub current_text: String,
    /// Accumulated translated text
    pub translated_text: String,
    /// Best-effort script annotation of `current_text`; never drives logic
    pub detected_language: Option<DetectedLanguage>,
    pub error: Option<String>,
}

/// Commands accepted by the session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Begin a recording session (valid from idle)
    Start,
    /// Stop recording/translating, or halt playback
    Stop,
    /// Replay the last translation (`None`) or translate typed text
    Speak(Option<String>),
    /// Tear the session down
    Shutdown,
}
