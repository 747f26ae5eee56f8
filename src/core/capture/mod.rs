//! Capture Pipeline: microphone ownership and chunked PCM production.
//!
//! The pipeline converts whatever the input device produces into the wire
//! contract (s16le mono 24 kHz) and emits fixed-size chunks into a
//! supplied sink channel at the hardware callback cadence. The chunk size
//! is a fixed quantum, not a knob, so downstream latency stays
//! predictable.

mod microphone;

pub use microphone::MicrophoneCapture;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Samples per emitted chunk (one hardware-buffer quantum at 24 kHz).
pub const CHUNK_SAMPLES: usize = 4096;

/// Platform permission snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AudioPermissions {
    pub microphone: bool,
    pub notifications: bool,
}

/// Errors from the capture pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No usable input device, or access denied by the platform
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    /// Device produced an unsupported stream configuration
    #[error("unsupported device configuration: {0}")]
    Device(String),

    /// The hardware stream failed to build or start
    #[error("stream error: {0}")]
    Stream(String),
}

/// The orchestrator's seam onto the microphone.
#[async_trait]
pub trait CapturePipeline: Send {
    /// Query platform permissions; must not assume success.
    fn request_permission(&self) -> AudioPermissions;

    /// Acquire the microphone and start emitting chunks into `sink`.
    /// Calling while already active is a warning and a no-op, never an
    /// error.
    fn start(&mut self, sink: mpsc::Sender<Bytes>) -> Result<(), CaptureError>;

    /// Stop and release the hardware stream; no-op when not recording.
    async fn stop(&mut self);

    /// Release every hardware resource; idempotent, safe on teardown.
    fn cleanup(&mut self);

    /// Whether the microphone is currently held.
    fn is_active(&self) -> bool;
}
