//! cpal-backed speaker playback.
//!
//! Same threading shape as capture: `cpal::Stream` is not `Send`, so a
//! dedicated thread owns the output stream until the clip drains or is
//! cancelled. The completion oneshot always fires, including on device
//! failure, so the orchestrator can never hang on a clip.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{MIN_AUDIBLE_BYTES, PlaybackError, PlaybackSink};
use crate::utils::audio::{WIRE_SAMPLE_RATE, i16_to_f32, resample_linear, unpack_s16le};

struct ActiveClip {
    stop: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Speaker playback of finalized translation clips.
pub struct SpeakerPlayback {
    current: Option<ActiveClip>,
}

impl SpeakerPlayback {
    pub fn new() -> Self {
        Self { current: None }
    }
}

impl Default for SpeakerPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for SpeakerPlayback {
    fn play(&mut self, pcm: Bytes) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();

        if pcm.len() < MIN_AUDIBLE_BYTES {
            tracing::debug!(len = pcm.len(), "payload below audible minimum ignored");
            let _ = done_tx.send(());
            return Ok(done_rx);
        }

        // One clip at a time.
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(true));
        let stop_for_thread = stop.clone();
        let playing_for_thread = playing.clone();

        let thread = std::thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || run_playback(pcm, stop_for_thread, playing_for_thread, done_tx))
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        self.current = Some(ActiveClip {
            stop,
            playing,
            thread: Some(thread),
        });
        Ok(done_rx)
    }

    fn stop(&mut self) {
        if let Some(mut clip) = self.current.take() {
            clip.stop.store(true, Ordering::SeqCst);
            if let Some(thread) = clip.thread.take() {
                let _ = thread.join();
            }
            tracing::debug!("playback cancelled");
        }
    }

    fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .map(|c| c.playing.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Playback thread body. The completion sender fires on every exit path.
fn run_playback(
    pcm: Bytes,
    stop: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    done: oneshot::Sender<()>,
) {
    let finish = |done: oneshot::Sender<()>| {
        playing.store(false, Ordering::SeqCst);
        let _ = done.send(());
    };

    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        tracing::error!("no default output device");
        finish(done);
        return;
    };
    let config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("output config error: {}", e);
            finish(done);
            return;
        }
    };

    let device_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    // Wire clip -> normalized floats at the device rate, queued for the
    // output callback to drain.
    let samples: Vec<f32> = unpack_s16le(&pcm).iter().map(|&s| i16_to_f32(s)).collect();
    let samples = resample_linear(&samples, WIRE_SAMPLE_RATE, device_rate);
    let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(samples.into_iter().collect()));
    let drained = Arc::new(AtomicBool::new(false));

    let queue_cb = queue.clone();
    let drained_cb = drained.clone();
    let stream = device.build_output_stream(
        &cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        },
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut queue = queue_cb.lock();
            for frame in data.chunks_mut(channels) {
                let sample = queue.pop_front().unwrap_or(0.0);
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
            if queue.is_empty() {
                drained_cb.store(true, Ordering::SeqCst);
            }
        },
        |e| tracing::error!("playback stream error: {}", e),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to build output stream: {}", e);
            finish(done);
            return;
        }
    };
    if let Err(e) = stream.play() {
        tracing::error!("failed to start output stream: {}", e);
        finish(done);
        return;
    }

    while !stop.load(Ordering::SeqCst) && !drained.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    if drained.load(Ordering::SeqCst) {
        // Let the device flush its last buffer before tearing down.
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    finish(done);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_audible_payload_resolves_immediately() {
        let mut playback = SpeakerPlayback::new();
        let rx = playback
            .play(Bytes::from_static(&[0u8; MIN_AUDIBLE_BYTES - 2]))
            .unwrap();
        // No hardware is touched; the receiver is already resolved.
        assert!(!playback.is_playing());
        assert!(rx.blocking_recv().is_ok());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut playback = SpeakerPlayback::new();
        playback.stop();
        playback.stop();
        assert!(!playback.is_playing());
    }
}
