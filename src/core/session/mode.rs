//! Serialized audio-mode transitions.
//!
//! The microphone and the speaker are mutually exclusive resources. Every
//! transition that touches hardware runs under one async lock, so two
//! overlapping transitions can never interleave their device work.

use std::sync::Arc;

use tokio::sync::Mutex;

/// Which audio resource the session currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    /// No audio resource held
    #[default]
    Idle,
    /// Microphone held
    Recording,
    /// Speaker held
    Playback,
    /// Both held (reserved; no current flow uses it)
    Duplex,
}

impl std::fmt::Display for AudioMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AudioMode::Idle => "idle",
            AudioMode::Recording => "recording",
            AudioMode::Playback => "playback",
            AudioMode::Duplex => "duplex",
        };
        write!(f, "{}", s)
    }
}

/// Shared, lock-serialized mode cell.
#[derive(Debug, Clone, Default)]
pub struct AudioModeController {
    inner: Arc<Mutex<AudioMode>>,
}

impl AudioModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> AudioMode {
        *self.inner.lock().await
    }

    /// Record a mode change without hardware work. Setting the current
    /// mode again is a no-op. Returns the previous mode.
    pub async fn set(&self, target: AudioMode) -> AudioMode {
        let mut mode = self.inner.lock().await;
        let prev = *mode;
        if prev == target {
            tracing::trace!(%target, "audio mode unchanged");
        } else {
            tracing::debug!(from = %prev, to = %target, "audio mode transition");
            *mode = target;
        }
        prev
    }

    /// Run `work` (the hardware side of a transition) while holding the
    /// mode lock, then commit the target mode. Concurrent transitions are
    /// fully serialized: the second caller's work cannot start until the
    /// first has committed.
    pub async fn transition<Fut>(&self, target: AudioMode, work: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let mut mode = self.inner.lock().await;
        let out = work.await;
        if *mode != target {
            tracing::debug!(from = %*mode, to = %target, "audio mode transition");
            *mode = target;
        }
        out
    }
}
