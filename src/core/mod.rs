pub mod assembler;
pub mod capture;
pub mod gateway;
pub mod playback;
pub mod session;
pub mod translate;

// Re-export commonly used types for convenience
pub use assembler::{TranslationTurn, TurnSignal, TurnStatus, UtteranceAssembler};
pub use capture::{AudioPermissions, CaptureError, CapturePipeline, MicrophoneCapture};
pub use gateway::{
    ConnectionState, GatewayConfig, GatewayError, InboundEvent, OutboundCommand, RealtimeGateway,
    SessionGateway,
};
pub use playback::{PlaybackError, PlaybackSink, SpeakerPlayback};
pub use session::{
    AudioMode, AudioModeController, SessionCommand, SessionHandle, SessionSnapshot, SessionState,
    SessionTuning, TranslationSession,
};
pub use translate::{TextTranslator, TranslateError, Translation};
