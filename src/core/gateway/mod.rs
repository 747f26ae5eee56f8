//! Session Gateway: ownership of the realtime streaming connection.
//!
//! The gateway owns the WebSocket, the ephemeral credential, and the
//! outbound command surface. Inbound traffic is decoded, normalized
//! ([`messages`]) and delivered on a single ordered channel; semantic
//! folding is the assembler's job, never the gateway's.

mod client;
pub mod credentials;
pub mod messages;

pub use client::{GatewayConfig, RealtimeGateway};
pub use credentials::{EphemeralCredential, fetch_credential};
pub use messages::{
    CloseClass, InboundEvent, OutboundCommand, SessionDirective, TurnDetection, WireAudioFormat,
};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the gateway. Only `connect` returns them; the
/// streaming command surface degrades to warnings on a closed socket.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The token collaborator refused or returned an unusable credential
    #[error("credential denied: {0}")]
    CredentialDenied(String),

    /// WebSocket-level failure
    #[error("socket error: {0}")]
    Socket(String),

    /// The connect sequence exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),
}

/// Connection lifecycle of the streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// The orchestrator's seam onto the streaming connection.
///
/// `connect` is the only fallible operation; every streaming command is a
/// logged no-op when the connection is not open, so a socket drop mid-turn
/// never panics the capture path.
#[async_trait]
pub trait SessionGateway: Send {
    /// Obtain a credential, open the connection, send the session
    /// directive, and return the ordered inbound event stream.
    async fn connect(&mut self) -> Result<mpsc::Receiver<InboundEvent>, GatewayError>;

    /// Stream one PCM chunk to the remote input buffer.
    async fn send_audio_chunk(&mut self, chunk: Bytes);

    /// Commit the remote input buffer (manual turn detection).
    async fn commit(&mut self);

    /// Clear the remote input buffer.
    async fn clear(&mut self);

    /// Out-of-band pure text translation request.
    async fn request_text_translation(&mut self, text: &str);

    /// Close the connection; idempotent.
    async fn disconnect(&mut self);

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;
}
