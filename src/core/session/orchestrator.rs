//! The session event loop.
//!
//! One task owns the gateway, the capture pipeline, the assembler and the
//! playback sink, and multiplexes commands, inbound events, captured
//! chunks and timers through a single `select!` loop. State only mutates
//! inside this loop, so no flow can observe a half-applied transition.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};

use super::mode::{AudioMode, AudioModeController};
use super::{SessionCommand, SessionSnapshot, SessionState};
use crate::core::assembler::{TranslationTurn, TurnSignal, TurnStatus, UtteranceAssembler};
use crate::core::capture::{CaptureError, CapturePipeline};
use crate::core::gateway::{InboundEvent, SessionGateway};
use crate::core::playback::PlaybackSink;
use crate::utils::language::classify_language;

const COMMAND_CAPACITY: usize = 16;
const CHUNK_CAPACITY: usize = 64;

/// Timing knobs for the session loop.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Deadline for a turn to finalize once opened
    pub finalize_timeout: Duration,
    /// Silence gap between playback ending and capture resuming
    pub resume_guard: Duration,
    /// Send explicit buffer commits on stop (no remote turn detection)
    pub manual_commit: bool,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            finalize_timeout: Duration::from_secs(10),
            resume_guard: Duration::from_millis(300),
            manual_commit: false,
        }
    }
}

/// Cloneable command surface onto a spawned session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn start(&self) {
        self.send(SessionCommand::Start).await;
    }

    pub async fn stop(&self) {
        self.send(SessionCommand::Stop).await;
    }

    /// Replay the last translation (`None`) or translate typed text.
    pub async fn speak(&self, text: Option<String>) {
        self.send(SessionCommand::Speak(text)).await;
    }

    pub async fn shutdown(&self) {
        self.send(SessionCommand::Shutdown).await;
    }

    pub async fn send(&self, command: SessionCommand) {
        if self.cmd_tx.send(command).await.is_err() {
            tracing::warn!("session task gone; command dropped");
        }
    }
}

/// Per-run loop plumbing: the live channels and armed timers. Kept out of
/// the session struct so `select!` can borrow each independently.
#[derive(Default)]
struct Wiring {
    events: Option<mpsc::Receiver<InboundEvent>>,
    chunks: Option<mpsc::Receiver<Bytes>>,
    playback_done: Option<oneshot::Receiver<()>>,
    turn_deadline: Option<Instant>,
    resume_at: Option<Instant>,
    resume_after_playback: bool,
}

/// The orchestrating state machine over generic component seams.
pub struct TranslationSession<G, C, P> {
    gateway: G,
    capture: C,
    playback: P,
    tuning: SessionTuning,
    assembler: UtteranceAssembler,
    mode: AudioModeController,
    state: SessionState,
    current_text: String,
    translated_text: String,
    last_error: Option<String>,
    last_clip: Option<Bytes>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<G, C, P> TranslationSession<G, C, P>
where
    G: SessionGateway + 'static,
    C: CapturePipeline + 'static,
    P: PlaybackSink + 'static,
{
    /// Spawn the session task. Commands go through the returned handle;
    /// every state mutation is published on the watch channel.
    pub fn spawn(
        gateway: G,
        capture: C,
        playback: P,
        tuning: SessionTuning,
    ) -> (SessionHandle, watch::Receiver<SessionSnapshot>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let session = Self {
            gateway,
            capture,
            playback,
            tuning,
            assembler: UtteranceAssembler::new(),
            mode: AudioModeController::new(),
            state: SessionState::Idle,
            current_text: String::new(),
            translated_text: String::new(),
            last_error: None,
            last_clip: None,
            snapshot_tx,
        };
        tokio::spawn(session.run(cmd_rx));
        (SessionHandle { cmd_tx }, snapshot_rx)
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
        let mut wiring = Wiring::default();
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => {
                        self.shutdown(&mut wiring).await;
                        break;
                    }
                    Some(SessionCommand::Start) => self.handle_start(&mut wiring).await,
                    Some(SessionCommand::Stop) => self.handle_stop(&mut wiring).await,
                    Some(SessionCommand::Speak(text)) => {
                        self.handle_speak(&mut wiring, text).await;
                    }
                },
                Some(chunk) = recv_or_park(&mut wiring.chunks) => {
                    self.gateway.send_audio_chunk(chunk).await;
                }
                event = recv_or_park(&mut wiring.events) => match event {
                    Some(event) => self.handle_event(&mut wiring, event).await,
                    None => self.handle_stream_end(&mut wiring).await,
                },
                _ = await_done(&mut wiring.playback_done) => {
                    wiring.playback_done = None;
                    self.on_playback_done(&mut wiring).await;
                }
                _ = sleep_until_opt(wiring.turn_deadline) => {
                    wiring.turn_deadline = None;
                    self.on_turn_timeout(&mut wiring).await;
                }
                _ = sleep_until_opt(wiring.resume_at) => {
                    wiring.resume_at = None;
                    self.resume_capture(&mut wiring).await;
                }
            }
        }
    }

    async fn handle_start(&mut self, wiring: &mut Wiring) {
        if !matches!(self.state, SessionState::Idle | SessionState::Error) {
            tracing::warn!(state = %self.state, "start ignored");
            return;
        }
        self.last_error = None;

        let permissions = self.capture.request_permission();
        if !permissions.microphone {
            self.fail(wiring, "microphone permission denied").await;
            return;
        }

        if wiring.events.is_none() {
            match self.gateway.connect().await {
                Ok(rx) => wiring.events = Some(rx),
                Err(e) => {
                    self.fail(wiring, &format!("connect failed: {}", e)).await;
                    return;
                }
            }
        }

        self.assembler.reset();
        self.current_text.clear();
        self.translated_text.clear();

        if let Err(e) = self.begin_capture(wiring).await {
            self.fail(wiring, &e.to_string()).await;
            return;
        }
        self.state = SessionState::Recording;
        self.publish();
    }

    async fn handle_stop(&mut self, wiring: &mut Wiring) {
        match self.state {
            SessionState::Idle | SessionState::Error => {
                // Covers a stop landing inside the resume-guard window.
                wiring.resume_at = None;
                wiring.resume_after_playback = false;
                if self.state == SessionState::Error {
                    self.last_error = None;
                    self.state = SessionState::Idle;
                    self.publish();
                }
            }
            SessionState::Recording | SessionState::Translating => {
                let was_recording = self.capture.is_active();
                self.halt_capture(wiring).await;
                if was_recording && self.tuning.manual_commit {
                    self.gateway.commit().await;
                }
                wiring.turn_deadline = None;
                wiring.resume_at = None;
                self.assembler.reset();
                self.state = SessionState::Idle;
                self.publish();
            }
            SessionState::Playing => {
                // Halt playback; the microphone stays off.
                wiring.resume_after_playback = false;
                wiring.playback_done = None;
                wiring.turn_deadline = None;
                self.playback.stop();
                self.mode.set(AudioMode::Idle).await;
                self.assembler.reset();
                self.state = SessionState::Idle;
                self.publish();
            }
        }
    }

    async fn handle_speak(&mut self, wiring: &mut Wiring, text: Option<String>) {
        match text {
            Some(text) => {
                if wiring.events.is_none() {
                    tracing::warn!("speak ignored: not connected");
                    return;
                }
                self.gateway.request_text_translation(&text).await;
                self.current_text = text;
                self.translated_text.clear();
                self.state = SessionState::Translating;
                wiring.turn_deadline = Some(Instant::now() + self.tuning.finalize_timeout);
                self.publish();
            }
            None => {
                let Some(clip) = self.last_clip.clone() else {
                    tracing::warn!("speak ignored: nothing to replay");
                    return;
                };
                self.begin_playback(wiring, clip).await;
            }
        }
    }

    async fn handle_event(&mut self, wiring: &mut Wiring, event: InboundEvent) {
        let closed = matches!(event, InboundEvent::Closed { .. });
        let mut fatal = false;
        for signal in self.assembler.apply(event) {
            match signal {
                TurnSignal::Listening => {
                    self.current_text.clear();
                    self.translated_text.clear();
                    self.publish();
                }
                TurnSignal::TurnOpened { turn_id } => {
                    tracing::debug!(%turn_id, "turn opened");
                    wiring.turn_deadline = Some(Instant::now() + self.tuning.finalize_timeout);
                    if self.state == SessionState::Recording {
                        self.state = SessionState::Translating;
                    }
                    self.publish();
                }
                TurnSignal::TurnUpdated {
                    source_text,
                    target_text,
                } => {
                    self.current_text = source_text;
                    self.translated_text = target_text;
                    self.publish();
                }
                TurnSignal::TurnFinalized(turn) => {
                    wiring.turn_deadline = None;
                    self.finish_turn(wiring, turn).await;
                }
                TurnSignal::BenignWarning(_) => {}
                TurnSignal::FatalError(message) => {
                    fatal = true;
                    self.fail(wiring, &message).await;
                }
            }
        }
        if closed {
            wiring.events = None;
            if !fatal && !matches!(self.state, SessionState::Idle | SessionState::Error) {
                tracing::info!("connection closed cleanly; session idle");
                self.quiesce(wiring).await;
            }
        }
    }

    /// The event channel ended without a close frame: the socket task died.
    async fn handle_stream_end(&mut self, wiring: &mut Wiring) {
        if !matches!(self.state, SessionState::Idle | SessionState::Error) {
            self.fail(wiring, "event stream ended unexpectedly").await;
        }
    }

    async fn finish_turn(&mut self, wiring: &mut Wiring, turn: TranslationTurn) {
        if !turn.source_text.is_empty() {
            self.current_text = turn.source_text.clone();
        }
        if !turn.target_text.is_empty() {
            self.translated_text = turn.target_text.clone();
        }
        tracing::info!(turn_id = %turn.id, status = ?turn.status, "turn finished");

        // Timed-out turns still play whatever audio accumulated; errored
        // turns never reach the speaker.
        if turn.status != TurnStatus::Errored && turn.has_audio() {
            let clip = turn.audio();
            self.last_clip = Some(clip.clone());
            self.begin_playback(wiring, clip).await;
        } else {
            self.state = if self.capture.is_active() {
                SessionState::Recording
            } else {
                SessionState::Idle
            };
            self.publish();
        }
    }

    /// Half-duplex playback entry: the microphone is released before the
    /// speaker starts, and remembered for resumption.
    async fn begin_playback(&mut self, wiring: &mut Wiring, clip: Bytes) {
        let was_recording = self.capture.is_active();
        if was_recording {
            self.halt_capture(wiring).await;
        }
        wiring.resume_after_playback = was_recording;

        let mode = self.mode.clone();
        let outcome = mode
            .transition(AudioMode::Playback, async { self.playback.play(clip) })
            .await;
        match outcome {
            Ok(done) => {
                wiring.playback_done = Some(done);
                self.state = SessionState::Playing;
                self.publish();
            }
            Err(e) => {
                self.fail(wiring, &format!("playback failed: {}", e)).await;
            }
        }
    }

    async fn on_playback_done(&mut self, wiring: &mut Wiring) {
        // Joins the finished clip thread and releases the device.
        self.playback.stop();
        self.mode.set(AudioMode::Idle).await;
        // A speak command during playback already moved the session on;
        // only a still-playing session drops back to idle.
        if self.state == SessionState::Playing {
            self.state = SessionState::Idle;
        }
        if wiring.resume_after_playback {
            wiring.resume_after_playback = false;
            wiring.resume_at = Some(Instant::now() + self.tuning.resume_guard);
        }
        self.publish();
    }

    /// Resume-guard elapsed: re-acquire the microphone unless the user
    /// moved the session somewhere else in the meantime.
    async fn resume_capture(&mut self, wiring: &mut Wiring) {
        if self.state != SessionState::Idle {
            return;
        }
        match self.begin_capture(wiring).await {
            Ok(()) => {
                self.state = SessionState::Recording;
                self.publish();
            }
            Err(e) => self.fail(wiring, &e.to_string()).await,
        }
    }

    async fn on_turn_timeout(&mut self, wiring: &mut Wiring) {
        if let Some(turn) = self.assembler.force_finalize(TurnStatus::TimedOut) {
            self.finish_turn(wiring, turn).await;
        } else if self.state == SessionState::Translating {
            // A text-translation request that never produced a response.
            tracing::warn!("translation request timed out without a response");
            self.state = if self.capture.is_active() {
                SessionState::Recording
            } else {
                SessionState::Idle
            };
            self.publish();
        }
    }

    async fn begin_capture(&mut self, wiring: &mut Wiring) -> Result<(), CaptureError> {
        let (tx, rx) = mpsc::channel(CHUNK_CAPACITY);
        let mode = self.mode.clone();
        mode.transition(AudioMode::Recording, async { self.capture.start(tx) })
            .await?;
        wiring.chunks = Some(rx);
        Ok(())
    }

    async fn halt_capture(&mut self, wiring: &mut Wiring) {
        wiring.chunks = None;
        if self.capture.is_active() {
            let mode = self.mode.clone();
            mode.transition(AudioMode::Idle, self.capture.stop()).await;
        }
    }

    /// Single error funnel: every failure path lands here, releases both
    /// audio resources, and surfaces exactly one error string.
    async fn fail(&mut self, wiring: &mut Wiring, message: &str) {
        tracing::error!(%message, "session error");
        wiring.turn_deadline = None;
        wiring.resume_at = None;
        wiring.resume_after_playback = false;
        wiring.playback_done = None;
        self.assembler.reset();
        self.playback.stop();
        self.halt_capture(wiring).await;
        self.mode.set(AudioMode::Idle).await;
        self.last_error = Some(message.to_string());
        self.state = SessionState::Error;
        self.publish();
    }

    /// Clean wind-down with no error to surface.
    async fn quiesce(&mut self, wiring: &mut Wiring) {
        wiring.turn_deadline = None;
        wiring.resume_at = None;
        wiring.resume_after_playback = false;
        self.assembler.reset();
        self.halt_capture(wiring).await;
        self.mode.set(AudioMode::Idle).await;
        self.state = SessionState::Idle;
        self.publish();
    }

    async fn shutdown(&mut self, wiring: &mut Wiring) {
        tracing::info!("session shutting down");
        wiring.turn_deadline = None;
        wiring.resume_at = None;
        wiring.playback_done = None;
        self.playback.stop();
        self.halt_capture(wiring).await;
        self.capture.cleanup();
        self.gateway.disconnect().await;
        self.state = SessionState::Idle;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            is_recording: self.state == SessionState::Recording,
            is_translating: self.state == SessionState::Translating,
            is_playing: self.state == SessionState::Playing,
            current_text: self.current_text.clone(),
            translated_text: self.translated_text.clone(),
            detected_language: (!self.current_text.is_empty())
                .then(|| classify_language(&self.current_text)),
            error: self.last_error.clone(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

/// Receive from an optional channel; parks forever when absent, and clears
/// the slot when the channel ends so the loop never spins on a dead
/// receiver.
async fn recv_or_park<T>(slot: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match slot.as_mut() {
        Some(rx) => match rx.recv().await {
            Some(value) => Some(value),
            None => {
                *slot = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn await_done(slot: &mut Option<oneshot::Receiver<()>>) {
    match slot.as_mut() {
        Some(rx) => {
            // A dropped sender counts as done; the clip thread is gone
            // either way.
            let _ = rx.await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
