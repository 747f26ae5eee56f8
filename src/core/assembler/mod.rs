//! Utterance Assembler: folds the inbound event stream into turns.
//!
//! A pure, synchronous state machine. Each [`InboundEvent`] is folded into
//! at most one active [`TranslationTurn`]; the caller receives
//! [`TurnSignal`]s describing what changed. Timers live in the
//! orchestrator, which calls [`UtteranceAssembler::force_finalize`] when a
//! turn outlives its deadline or the socket drops; keeping this module
//! free of I/O is what makes the turn invariants property-testable.
//!
//! Source-side transcript deltas can arrive before the response that owns
//! them opens, and in any order relative to target-side deltas. Pre-turn
//! text accumulates in pending buffers and is folded into the next turn.

use bytes::{Bytes, BytesMut};

use crate::core::gateway::InboundEvent;

/// Lifecycle status of a translation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Created, no deltas yet
    Pending,
    /// Receiving deltas
    Streaming,
    /// Completed via an explicit done event
    Finalized,
    /// Ended by a remote error or connection loss
    Errored,
    /// Force-finalized by the safety timeout
    TimedOut,
}

impl TurnStatus {
    /// Whether the turn can still mutate.
    pub fn is_open(&self) -> bool {
        matches!(self, TurnStatus::Pending | TurnStatus::Streaming)
    }
}

/// One complete speech-in/translation-out exchange.
#[derive(Debug, Clone)]
pub struct TranslationTurn {
    /// Identifier from the response-creation event (or locally generated)
    pub id: String,
    /// Accumulated transcript of the user's speech
    pub source_text: String,
    /// Accumulated translated text
    pub target_text: String,
    /// Ordered translated-audio fragments, append-only until finalize
    pub audio_chunks: Vec<Bytes>,
    /// Lifecycle status
    pub status: TurnStatus,
}

impl TranslationTurn {
    fn new(id: String) -> Self {
        Self {
            id,
            source_text: String::new(),
            target_text: String::new(),
            audio_chunks: Vec::new(),
            status: TurnStatus::Pending,
        }
    }

    /// Whether any audio accumulated.
    pub fn has_audio(&self) -> bool {
        self.audio_chunks.iter().any(|c| !c.is_empty())
    }

    /// Whether any content at all accumulated.
    pub fn has_content(&self) -> bool {
        !self.source_text.is_empty() || !self.target_text.is_empty() || self.has_audio()
    }

    /// Concatenate the audio fragments into one contiguous clip, in
    /// arrival order.
    pub fn audio(&self) -> Bytes {
        let total: usize = self.audio_chunks.iter().map(|c| c.len()).sum();
        let mut buf = BytesMut::with_capacity(total);
        for chunk in &self.audio_chunks {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }
}

/// What changed as a result of folding one event.
#[derive(Debug, Clone)]
pub enum TurnSignal {
    /// Remote VAD heard the user; stale partial transcript state was reset
    Listening,
    /// A new turn opened
    TurnOpened { turn_id: String },
    /// The active turn (or pending pre-turn text) mutated
    TurnUpdated {
        source_text: String,
        target_text: String,
    },
    /// A turn left the open state; at most one of these per turn
    TurnFinalized(TranslationTurn),
    /// Benign remote warning, swallowed
    BenignWarning(String),
    /// Error that must reach the orchestrator's error path
    FatalError(String),
}

/// Benign remote errors are complaints about an undersized input buffer
/// (commit raced the VAD); they never affect session state.
pub fn is_benign_remote_error(message: &str) -> bool {
    message.to_ascii_lowercase().contains("buffer too small")
}

/// The folding state machine. At most one non-finalized turn exists at
/// any time; every path out of the open state goes through exactly one
/// `TurnFinalized` signal.
#[derive(Debug, Default)]
pub struct UtteranceAssembler {
    active: Option<TranslationTurn>,
    pending_source: String,
    pending_target: String,
}

impl UtteranceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active (non-finalized) turn, if any.
    pub fn active_turn(&self) -> Option<&TranslationTurn> {
        self.active.as_ref()
    }

    /// Drop all turn and pre-turn state.
    pub fn reset(&mut self) {
        self.active = None;
        self.pending_source.clear();
        self.pending_target.clear();
    }

    /// Force the active turn out of the open state (timeout or connection
    /// loss). Returns the finalized turn, if one was active.
    pub fn force_finalize(&mut self, status: TurnStatus) -> Option<TranslationTurn> {
        debug_assert!(!status.is_open());
        let mut turn = self.active.take()?;
        turn.status = status;
        tracing::warn!(turn_id = %turn.id, ?status, "turn force-finalized");
        Some(turn)
    }

    fn current_texts(&self) -> (String, String) {
        match &self.active {
            Some(turn) => (turn.source_text.clone(), turn.target_text.clone()),
            None => (self.pending_source.clone(), self.pending_target.clone()),
        }
    }

    fn updated_signal(&self) -> TurnSignal {
        let (source_text, target_text) = self.current_texts();
        TurnSignal::TurnUpdated {
            source_text,
            target_text,
        }
    }

    /// Fold one inbound event.
    pub fn apply(&mut self, event: InboundEvent) -> Vec<TurnSignal> {
        let mut signals = Vec::new();
        match event {
            InboundEvent::SpeechStarted => {
                // A fresh utterance invalidates any stale pre-turn text.
                self.pending_source.clear();
                self.pending_target.clear();
                signals.push(TurnSignal::Listening);
            }

            InboundEvent::SpeechStopped
            | InboundEvent::BufferCommitted
            | InboundEvent::BufferCleared
            | InboundEvent::SessionUpdated
            | InboundEvent::RateLimits
            | InboundEvent::AudioDone => {
                // Advisory only.
            }

            InboundEvent::SessionCreated { session_id } => {
                tracing::debug!(%session_id, "remote session created");
            }

            InboundEvent::ResponseCreated { response_id } => {
                if let Some(prior) = self.active.take() {
                    // Protocol anomaly: a new turn opened over an
                    // unfinalized one. Recover by finalizing the prior
                    // turn when it carries content, discarding otherwise.
                    tracing::warn!(
                        prior = %prior.id,
                        "response created while a turn was still open"
                    );
                    if prior.has_content() {
                        let mut prior = prior;
                        prior.status = TurnStatus::Finalized;
                        signals.push(TurnSignal::TurnFinalized(prior));
                    }
                }
                let id = if response_id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    response_id
                };
                let mut turn = TranslationTurn::new(id.clone());
                turn.status = TurnStatus::Streaming;
                turn.source_text = std::mem::take(&mut self.pending_source);
                turn.target_text = std::mem::take(&mut self.pending_target);
                self.active = Some(turn);
                signals.push(TurnSignal::TurnOpened { turn_id: id });
                signals.push(self.updated_signal());
            }

            InboundEvent::SourceTranscriptDelta { text } => {
                match &mut self.active {
                    Some(turn) => turn.source_text.push_str(&text),
                    None => self.pending_source.push_str(&text),
                }
                signals.push(self.updated_signal());
            }

            InboundEvent::SourceTranscriptDone { text } => {
                // The completed transcript supersedes accumulated deltas.
                match &mut self.active {
                    Some(turn) => turn.source_text = text,
                    None => self.pending_source = text,
                }
                signals.push(self.updated_signal());
            }

            InboundEvent::TargetTextDelta { text } => {
                match &mut self.active {
                    Some(turn) => turn.target_text.push_str(&text),
                    None => self.pending_target.push_str(&text),
                }
                signals.push(self.updated_signal());
            }

            InboundEvent::AudioDelta { audio } => match &mut self.active {
                Some(turn) => {
                    turn.status = TurnStatus::Streaming;
                    turn.audio_chunks.push(audio);
                }
                None => {
                    tracing::warn!("audio delta with no open turn dropped");
                }
            },

            InboundEvent::ResponseDone { response_id } => match self.active.take() {
                Some(mut turn) => {
                    turn.status = TurnStatus::Finalized;
                    signals.push(TurnSignal::TurnFinalized(turn));
                }
                None => {
                    tracing::debug!(?response_id, "response done with no open turn");
                }
            },

            InboundEvent::RemoteError { code, message } => {
                if is_benign_remote_error(&message) {
                    tracing::debug!(?code, %message, "benign remote warning swallowed");
                    signals.push(TurnSignal::BenignWarning(message));
                } else {
                    tracing::error!(?code, %message, "remote error");
                    if let Some(turn) = self.force_finalize(TurnStatus::Errored) {
                        signals.push(TurnSignal::TurnFinalized(turn));
                    }
                    signals.push(TurnSignal::FatalError(message));
                }
            }

            InboundEvent::Unrecognized { kind, transcript } => {
                // Schema-drift fallback: route any free text somewhere
                // useful rather than losing it.
                if let Some(text) = transcript.filter(|t| !t.is_empty()) {
                    tracing::debug!(%kind, "scavenging text from unrecognized event");
                    let source_empty = self
                        .active
                        .as_ref()
                        .map(|t| t.source_text.is_empty())
                        .unwrap_or_else(|| self.pending_source.is_empty());
                    match (&mut self.active, source_empty) {
                        (Some(turn), true) => turn.source_text.push_str(&text),
                        (Some(turn), false) => turn.target_text.push_str(&text),
                        (None, true) => self.pending_source.push_str(&text),
                        (None, false) => self.pending_target.push_str(&text),
                    }
                    signals.push(self.updated_signal());
                }
            }

            InboundEvent::Closed { code, class, reason } => {
                tracing::warn!(?code, ?class, %reason, "connection closed");
                let interrupted = match self.force_finalize(TurnStatus::Errored) {
                    Some(turn) => {
                        signals.push(TurnSignal::TurnFinalized(turn));
                        true
                    }
                    None => false,
                };
                // A close that cuts a turn short is an error even when the
                // close code itself is clean.
                if !class.is_clean() || interrupted {
                    signals.push(TurnSignal::FatalError(format!(
                        "connection closed ({:?}): {}",
                        class,
                        if reason.is_empty() { "no reason" } else { &reason }
                    )));
                }
            }
        }
        signals
    }
}
