//! Wire message types for the realtime translation endpoint.
//!
//! Outbound commands are a closed tagged enum serialized with exact wire
//! names. Inbound traffic is decoded leniently: the remote service has
//! renamed events between API generations (`response.audio.delta` in one,
//! `response.output_audio.delta` in the next), so every message is parsed
//! into a loose raw form and mapped through a tag-normalization table onto
//! one logical [`InboundEvent`] before any business logic sees it. An
//! unknown tag degrades to [`InboundEvent::Unrecognized`] instead of a
//! parse failure.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Hard cap on raw bytes per base64 encode pass. Kept a multiple of 3 so
/// the concatenated passes carry no interior padding characters.
pub const ENCODE_PASS_BYTES: usize = 32 * 1024 - 2;

// =============================================================================
// Session directive (initial configuration)
// =============================================================================

/// The one-shot session configuration directive sent right after connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDirective {
    /// Session type discriminator ("realtime")
    #[serde(rename = "type")]
    pub kind: String,
    /// Model identity
    pub model: String,
    /// Audio input/output contract
    pub audio: AudioDirective,
    /// Target-language instructions for the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Audio contract halves of the session directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDirective {
    pub input: AudioInputDirective,
    pub output: AudioOutputDirective,
}

/// Input-side audio contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInputDirective {
    pub format: WireAudioFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

/// Output-side audio contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOutputDirective {
    pub format: WireAudioFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Wire audio format descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAudioFormat {
    /// MIME-style format type ("audio/pcm")
    #[serde(rename = "type")]
    pub kind: String,
    /// Sample rate in Hz
    pub rate: u32,
}

impl WireAudioFormat {
    /// The fixed contract: linear PCM at 24 kHz.
    pub fn pcm24k() -> Self {
        Self {
            kind: "audio/pcm".to_string(),
            rate: crate::utils::WIRE_SAMPLE_RATE,
        }
    }
}

/// Turn detection (remote VAD) policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
    },
    /// No automatic turn detection (manual commit)
    #[serde(rename = "none")]
    None {},
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
        }
    }
}

// =============================================================================
// Conversation items
// =============================================================================

/// Conversation item (used for out-of-band text translation requests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

impl ConversationItem {
    /// A user text message item.
    pub fn user_text(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.to_string()),
            }]),
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Outbound commands
// =============================================================================

/// Commands sent to the remote endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundCommand {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionDirective },

    /// Append audio to the remote input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio
        audio: String,
    },

    /// Commit the remote input buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the remote input buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Request a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl OutboundCommand {
    /// Build an audio append command, transport-encoding the payload in
    /// bounded sub-slices (see [`ENCODE_PASS_BYTES`]).
    pub fn audio_append(data: &[u8]) -> Self {
        OutboundCommand::InputAudioBufferAppend {
            audio: encode_chunked(data),
        }
    }
}

/// Base64-encode `data` in passes of at most [`ENCODE_PASS_BYTES`] raw
/// bytes each, concatenating the results. Equivalent to a single-pass
/// encode because the pass size is a multiple of 3.
pub fn encode_chunked(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4 + 4);
    for pass in data.chunks(ENCODE_PASS_BYTES) {
        BASE64_STANDARD.encode_string(pass, &mut out);
    }
    out
}

/// Decode transport-encoded audio back to raw bytes.
pub fn decode_audio(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(encoded)
}

// =============================================================================
// Inbound events
// =============================================================================

/// Normalized inbound events, one variant per logical concept. This is the
/// only inbound vocabulary the assembler and orchestrator ever see.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Remote session established
    SessionCreated { session_id: String },
    /// Session configuration acknowledged
    SessionUpdated,
    /// Remote VAD detected speech start
    SpeechStarted,
    /// Remote VAD detected speech end
    SpeechStopped,
    /// Input buffer committed (advisory)
    BufferCommitted,
    /// Input buffer cleared (advisory)
    BufferCleared,
    /// A response (translation turn) opened
    ResponseCreated { response_id: String },
    /// The active response finished
    ResponseDone { response_id: Option<String> },
    /// Incremental transcript of the user's speech
    SourceTranscriptDelta { text: String },
    /// Complete transcript of the user's speech
    SourceTranscriptDone { text: String },
    /// Incremental translated text
    TargetTextDelta { text: String },
    /// Decoded translated audio fragment
    AudioDelta { audio: Bytes },
    /// Audio stream for the active response finished (advisory)
    AudioDone,
    /// Rate limit notice (diagnostics only)
    RateLimits,
    /// Remote error event
    RemoteError {
        code: Option<String>,
        message: String,
    },
    /// Event with an unknown tag; carries any scavengeable free text
    Unrecognized {
        kind: String,
        transcript: Option<String>,
    },
    /// Socket closed; synthesized by the gateway, never parsed from wire
    Closed {
        code: Option<u16>,
        class: CloseClass,
        reason: String,
    },
}

/// Logical tags the normalization table maps wire names onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalTag {
    SessionCreated,
    SessionUpdated,
    SpeechStarted,
    SpeechStopped,
    BufferCommitted,
    BufferCleared,
    ResponseCreated,
    ResponseDone,
    SourceDelta,
    SourceDone,
    TargetTextDelta,
    AudioDelta,
    AudioDone,
    RateLimits,
    Error,
}

/// Wire-name → logical-tag table. Synonyms from different API generations
/// map onto the same tag; extend here, never with parallel match arms.
const TAG_TABLE: &[(&str, LogicalTag)] = &[
    ("session.created", LogicalTag::SessionCreated),
    ("session.updated", LogicalTag::SessionUpdated),
    ("input_audio_buffer.speech_started", LogicalTag::SpeechStarted),
    ("input_audio_buffer.speech_stopped", LogicalTag::SpeechStopped),
    ("input_audio_buffer.committed", LogicalTag::BufferCommitted),
    ("input_audio_buffer.cleared", LogicalTag::BufferCleared),
    ("response.created", LogicalTag::ResponseCreated),
    ("response.done", LogicalTag::ResponseDone),
    (
        "conversation.item.input_audio_transcription.delta",
        LogicalTag::SourceDelta,
    ),
    (
        "conversation.item.input_audio_transcription.completed",
        LogicalTag::SourceDone,
    ),
    ("response.text.delta", LogicalTag::TargetTextDelta),
    ("response.output_text.delta", LogicalTag::TargetTextDelta),
    ("response.audio_transcript.delta", LogicalTag::TargetTextDelta),
    (
        "response.output_audio_transcript.delta",
        LogicalTag::TargetTextDelta,
    ),
    ("response.audio.delta", LogicalTag::AudioDelta),
    ("response.output_audio.delta", LogicalTag::AudioDelta),
    ("response.audio.done", LogicalTag::AudioDone),
    ("response.output_audio.done", LogicalTag::AudioDone),
    ("rate_limits.updated", LogicalTag::RateLimits),
    ("error", LogicalTag::Error),
];

fn normalize_tag(kind: &str) -> Option<LogicalTag> {
    TAG_TABLE
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, tag)| *tag)
}

/// Lenient raw decode of a server event. Every payload field is optional;
/// the normalization step decides what is required per logical tag.
#[derive(Debug, Deserialize)]
struct RawServerEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<RawErrorBody>,
    #[serde(default)]
    response: Option<RawIdentified>,
    #[serde(default)]
    session: Option<RawIdentified>,
}

#[derive(Debug, Deserialize)]
struct RawErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIdentified {
    #[serde(default)]
    id: Option<String>,
}

/// Parse one inbound text frame into a normalized event.
///
/// Returns `None` for malformed payloads (logged and dropped upstream) and
/// for audio deltas whose transport encoding fails to decode.
pub fn parse_inbound(text: &str) -> Option<InboundEvent> {
    let raw: RawServerEvent = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("malformed inbound payload dropped: {}", e);
            return None;
        }
    };

    let tag = match normalize_tag(&raw.kind) {
        Some(t) => t,
        None => {
            tracing::debug!(kind = %raw.kind, "unrecognized inbound event tag");
            return Some(InboundEvent::Unrecognized {
                transcript: raw.transcript.or(raw.text),
                kind: raw.kind,
            });
        }
    };

    let event = match tag {
        LogicalTag::SessionCreated => InboundEvent::SessionCreated {
            session_id: raw.session.and_then(|s| s.id).unwrap_or_default(),
        },
        LogicalTag::SessionUpdated => InboundEvent::SessionUpdated,
        LogicalTag::SpeechStarted => InboundEvent::SpeechStarted,
        LogicalTag::SpeechStopped => InboundEvent::SpeechStopped,
        LogicalTag::BufferCommitted => InboundEvent::BufferCommitted,
        LogicalTag::BufferCleared => InboundEvent::BufferCleared,
        LogicalTag::ResponseCreated => InboundEvent::ResponseCreated {
            response_id: raw.response.and_then(|r| r.id).unwrap_or_default(),
        },
        LogicalTag::ResponseDone => InboundEvent::ResponseDone {
            response_id: raw.response.and_then(|r| r.id),
        },
        LogicalTag::SourceDelta => InboundEvent::SourceTranscriptDelta {
            text: raw.delta.or(raw.transcript).unwrap_or_default(),
        },
        LogicalTag::SourceDone => InboundEvent::SourceTranscriptDone {
            text: raw.transcript.or(raw.text).unwrap_or_default(),
        },
        LogicalTag::TargetTextDelta => InboundEvent::TargetTextDelta {
            text: raw.delta.or(raw.text).unwrap_or_default(),
        },
        LogicalTag::AudioDelta => {
            let encoded = raw.delta.unwrap_or_default();
            match decode_audio(&encoded) {
                Ok(bytes) => InboundEvent::AudioDelta {
                    audio: Bytes::from(bytes),
                },
                Err(e) => {
                    tracing::warn!("undecodable audio delta dropped: {}", e);
                    return None;
                }
            }
        }
        LogicalTag::AudioDone => InboundEvent::AudioDone,
        LogicalTag::RateLimits => InboundEvent::RateLimits,
        LogicalTag::Error => {
            let body = raw.error;
            InboundEvent::RemoteError {
                code: body.as_ref().and_then(|b| b.code.clone()),
                message: body
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| "unknown remote error".to_string()),
            }
        }
    };
    Some(event)
}

// =============================================================================
// Close code classification
// =============================================================================

/// Diagnostic classification of WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    Normal,
    GoingAway,
    ProtocolError,
    PolicyViolation,
    InternalError,
    Abnormal,
    Other,
}

impl CloseClass {
    /// Classify a close code; `None` (no close frame) counts as abnormal.
    pub fn classify(code: Option<u16>) -> Self {
        match code {
            Some(1000) => CloseClass::Normal,
            Some(1001) => CloseClass::GoingAway,
            Some(1002) => CloseClass::ProtocolError,
            Some(1008) => CloseClass::PolicyViolation,
            Some(1011) => CloseClass::InternalError,
            Some(1006) | None => CloseClass::Abnormal,
            Some(_) => CloseClass::Other,
        }
    }

    /// Whether this close ends a session cleanly.
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseClass::Normal | CloseClass::GoingAway)
    }
}

// =============================================================================
// Tests
// =============================================================================
