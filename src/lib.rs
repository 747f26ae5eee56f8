//! Real-time voice translation core.
//!
//! Captures microphone audio, streams it to a realtime translation
//! endpoint over WebSocket, assembles the streamed transcript and
//! translated audio into turns, and plays each finished translation back
//! through the speaker. The session runs half-duplex: the microphone is
//! released while a translation plays and re-acquired afterwards.

pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::AppConfig;
pub use core::{
    MicrophoneCapture, RealtimeGateway, SessionHandle, SessionSnapshot, SpeakerPlayback,
    TranslationSession,
};
