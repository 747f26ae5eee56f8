//! End-to-end session behavior over mock components: the half-duplex
//! record/translate/play loop, error funneling, and command discipline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Duration;

use voicebridge::core::capture::{AudioPermissions, CaptureError, CapturePipeline};
use voicebridge::core::gateway::{
    CloseClass, ConnectionState, GatewayError, InboundEvent, SessionGateway,
};
use voicebridge::core::playback::{PlaybackError, PlaybackSink};
use voicebridge::core::session::{SessionHandle, SessionSnapshot, SessionTuning, TranslationSession};

#[derive(Default)]
struct GatewayLog {
    chunks: Mutex<Vec<Bytes>>,
    commits: AtomicUsize,
    texts: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

struct MockGateway {
    events: Option<mpsc::Receiver<InboundEvent>>,
    log: Arc<GatewayLog>,
}

impl MockGateway {
    fn new() -> (Self, mpsc::Sender<InboundEvent>, Arc<GatewayLog>) {
        let (tx, rx) = mpsc::channel(64);
        let log = Arc::new(GatewayLog::default());
        (
            Self {
                events: Some(rx),
                log: log.clone(),
            },
            tx,
            log,
        )
    }
}

#[async_trait]
impl SessionGateway for MockGateway {
    async fn connect(&mut self) -> Result<mpsc::Receiver<InboundEvent>, GatewayError> {
        self.events
            .take()
            .ok_or_else(|| GatewayError::Socket("already connected".to_string()))
    }

    async fn send_audio_chunk(&mut self, chunk: Bytes) {
        self.log.chunks.lock().push(chunk);
    }

    async fn commit(&mut self) {
        self.log.commits.fetch_add(1, Ordering::SeqCst);
    }

    async fn clear(&mut self) {}

    async fn request_text_translation(&mut self, text: &str) {
        self.log.texts.lock().push(text.to_string());
    }

    async fn disconnect(&mut self) {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Open
    }
}

#[derive(Default)]
struct CaptureLog {
    active: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    sink: Mutex<Option<mpsc::Sender<Bytes>>>,
}

struct MockCapture {
    log: Arc<CaptureLog>,
}

impl MockCapture {
    fn new() -> (Self, Arc<CaptureLog>) {
        let log = Arc::new(CaptureLog::default());
        (Self { log: log.clone() }, log)
    }
}

#[async_trait]
impl CapturePipeline for MockCapture {
    fn request_permission(&self) -> AudioPermissions {
        AudioPermissions {
            microphone: true,
            notifications: true,
        }
    }

    fn start(&mut self, sink: mpsc::Sender<Bytes>) -> Result<(), CaptureError> {
        if self.log.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        *self.log.sink.lock() = Some(sink);
        Ok(())
    }

    async fn stop(&mut self) {
        if self.log.active.swap(false, Ordering::SeqCst) {
            self.log.stops.fetch_add(1, Ordering::SeqCst);
        }
        *self.log.sink.lock() = None;
    }

    fn cleanup(&mut self) {
        self.log.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.log.active.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct PlaybackLog {
    clips: Mutex<Vec<Bytes>>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    playing: AtomicBool,
}

impl PlaybackLog {
    /// Simulate the clip draining naturally.
    fn finish(&self) {
        self.playing.store(false, Ordering::SeqCst);
        if let Some(tx) = self.done_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

struct MockPlayback {
    log: Arc<PlaybackLog>,
}

impl MockPlayback {
    fn new() -> (Self, Arc<PlaybackLog>) {
        let log = Arc::new(PlaybackLog::default());
        (Self { log: log.clone() }, log)
    }
}

impl PlaybackSink for MockPlayback {
    fn play(&mut self, pcm: Bytes) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        self.log.clips.lock().push(pcm);
        *self.log.done_tx.lock() = Some(tx);
        self.log.playing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.log.playing.store(false, Ordering::SeqCst);
        self.log.done_tx.lock().take();
    }

    fn is_playing(&self) -> bool {
        self.log.playing.load(Ordering::SeqCst)
    }
}

struct Harness {
    session: SessionHandle,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: mpsc::Sender<InboundEvent>,
    gateway: Arc<GatewayLog>,
    capture: Arc<CaptureLog>,
    playback: Arc<PlaybackLog>,
}

fn tuning() -> SessionTuning {
    SessionTuning {
        finalize_timeout: Duration::from_secs(2),
        resume_guard: Duration::from_millis(100),
        manual_commit: false,
    }
}

fn harness() -> Harness {
    let (gateway, events, gateway_log) = MockGateway::new();
    let (capture, capture_log) = MockCapture::new();
    let (playback, playback_log) = MockPlayback::new();
    let (session, snapshots) = TranslationSession::spawn(gateway, capture, playback, tuning());
    Harness {
        session,
        snapshots,
        events,
        gateway: gateway_log,
        capture: capture_log,
        playback: playback_log,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

impl Harness {
    fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let h = harness();
    h.session.start().await;
    settle().await;
    assert!(h.snapshot().is_recording);

    h.session.start().await;
    settle().await;
    assert!(h.snapshot().is_recording);
    assert_eq!(h.capture.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_captured_chunks_reach_the_gateway() {
    let h = harness();
    h.session.start().await;
    settle().await;

    let sink = h.capture.sink.lock().clone().expect("capture running");
    sink.send(Bytes::from_static(&[1, 2, 3, 4])).await.unwrap();
    settle().await;

    let chunks = h.gateway.chunks.lock();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].as_ref(), &[1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_plays_and_resumes_capture() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::TargetTextDelta {
            text: "Hello".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::TargetTextDelta {
            text: " World".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::AudioDelta {
            audio: Bytes::from_static(&[10, 20, 30, 40]),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::ResponseDone { response_id: None })
        .await
        .unwrap();
    settle().await;

    // Half-duplex: the microphone is off while the clip plays.
    let snapshot = h.snapshot();
    assert!(snapshot.is_playing);
    assert_eq!(snapshot.translated_text, "Hello World");
    assert!(!h.capture.active.load(Ordering::SeqCst));
    assert_eq!(h.playback.clips.lock()[0].as_ref(), &[10, 20, 30, 40]);

    // Clip drains; after the guard interval capture resumes.
    h.playback.finish();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.snapshot().is_recording);
    assert!(h.capture.active.load(Ordering::SeqCst));
    assert_eq!(h.capture.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_benign_remote_warning_changes_nothing() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::RemoteError {
            code: None,
            message: "input buffer too small".to_string(),
        })
        .await
        .unwrap();
    settle().await;

    let snapshot = h.snapshot();
    assert!(snapshot.is_recording);
    assert!(snapshot.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_surfaces_error_and_releases_audio() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::Closed {
            code: Some(1006),
            class: CloseClass::classify(Some(1006)),
            reason: String::new(),
        })
        .await
        .unwrap();
    settle().await;

    let snapshot = h.snapshot();
    assert!(snapshot.error.is_some());
    assert!(!snapshot.is_recording);
    assert!(!h.capture.active.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_playback_halts_without_resuming() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::AudioDelta {
            audio: Bytes::from_static(&[5, 5, 5, 5]),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::ResponseDone { response_id: None })
        .await
        .unwrap();
    settle().await;
    assert!(h.snapshot().is_playing);

    h.session.stop().await;
    settle().await;
    assert!(!h.playback.playing.load(Ordering::SeqCst));

    // Well past the guard interval: capture must stay off.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = h.snapshot();
    assert!(!snapshot.is_recording);
    assert!(!h.capture.active.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_turn_timeout_plays_partial_audio() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::AudioDelta {
            audio: Bytes::from_static(&[7, 7]),
        })
        .await
        .unwrap();
    // No done event: the finalize deadline has to fire.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(h.snapshot().is_playing);
    assert_eq!(h.playback.clips.lock()[0].as_ref(), &[7, 7]);
}

#[tokio::test(start_paused = true)]
async fn test_speak_text_goes_through_the_gateway() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.session.speak(Some("good morning".to_string())).await;
    settle().await;

    assert_eq!(h.gateway.texts.lock().as_slice(), ["good morning"]);
    assert!(h.snapshot().is_translating);
}

#[tokio::test(start_paused = true)]
async fn test_speak_during_playback_stays_translating() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::AudioDelta {
            audio: Bytes::from_static(&[3, 3, 3, 3]),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::ResponseDone { response_id: None })
        .await
        .unwrap();
    settle().await;
    assert!(h.snapshot().is_playing);

    // Typed text arrives while the clip still plays.
    h.session.speak(Some("next phrase".to_string())).await;
    settle().await;
    assert!(h.snapshot().is_translating);

    // The clip draining must not demote the session back to idle.
    h.playback.finish();
    settle().await;
    assert!(h.snapshot().is_translating);
}

#[tokio::test(start_paused = true)]
async fn test_replay_repeats_the_last_clip() {
    let h = harness();
    h.session.start().await;
    settle().await;

    h.events
        .send(InboundEvent::ResponseCreated {
            response_id: "resp_1".to_string(),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::AudioDelta {
            audio: Bytes::from_static(&[9, 9, 9, 9]),
        })
        .await
        .unwrap();
    h.events
        .send(InboundEvent::ResponseDone { response_id: None })
        .await
        .unwrap();
    settle().await;
    h.playback.finish();
    settle().await;
    h.session.stop().await;
    settle().await;

    h.session.speak(None).await;
    settle().await;

    let clips = h.playback.clips.lock();
    assert_eq!(clips.len(), 2);
    assert_eq!(clips[1].as_ref(), &[9, 9, 9, 9]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects_gateway() {
    let h = harness();
    h.session.start().await;
    settle().await;
    h.session.shutdown().await;
    settle().await;

    assert_eq!(h.gateway.disconnects.load(Ordering::SeqCst), 1);
    assert!(!h.capture.active.load(Ordering::SeqCst));
}
