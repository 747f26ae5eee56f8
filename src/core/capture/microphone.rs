//! cpal-backed microphone capture.
//!
//! `cpal::Stream` is not `Send`, so a dedicated thread owns the stream
//! for the lifetime of a recording. The audio callback never blocks: it
//! converts, accumulates one chunk quantum, and `try_send`s into the sink,
//! dropping with a warning under backpressure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use super::{AudioPermissions, CHUNK_SAMPLES, CaptureError, CapturePipeline};
use crate::utils::audio::{WIRE_SAMPLE_RATE, downmix_to_mono, f32_to_i16, pack_s16le, resample_linear};

/// How long `start` waits for the capture thread to acquire the device.
const STARTUP_DEADLINE: Duration = Duration::from_secs(2);

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Microphone capture at the fixed wire contract.
pub struct MicrophoneCapture {
    worker: Option<CaptureWorker>,
}

impl MicrophoneCapture {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for MicrophoneCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapturePipeline for MicrophoneCapture {
    fn request_permission(&self) -> AudioPermissions {
        // Desktop hosts surface permission as device availability; a
        // denied microphone shows up as no default input device.
        let microphone = cpal::default_host().default_input_device().is_some();
        AudioPermissions {
            microphone,
            notifications: true,
        }
    }

    fn start(&mut self, sink: mpsc::Sender<Bytes>) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            tracing::warn!("capture already recording; start ignored");
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), CaptureError>>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(stop_for_thread, sink, ready_tx))
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        match ready_rx.recv_timeout(STARTUP_DEADLINE) {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker {
                    stop,
                    thread: Some(thread),
                });
                tracing::info!("microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                Err(CaptureError::Stream(
                    "capture thread did not start in time".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = worker.thread.take() {
            // Join off the async runtime; the thread exits within one
            // poll interval.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        tracing::info!("microphone capture stopped");
    }

    fn cleanup(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Converts device samples to the wire contract and emits fixed chunks.
struct ChunkEmitter {
    channels: usize,
    device_rate: u32,
    pending: Vec<i16>,
    sink: mpsc::Sender<Bytes>,
}

impl ChunkEmitter {
    fn new(channels: usize, device_rate: u32, sink: mpsc::Sender<Bytes>) -> Self {
        Self {
            channels,
            device_rate,
            pending: Vec::with_capacity(CHUNK_SAMPLES * 2),
            sink,
        }
    }

    /// Runs on the audio callback thread; must never block.
    fn push(&mut self, samples: &[f32]) {
        let mono = downmix_to_mono(samples, self.channels);
        let resampled = resample_linear(&mono, self.device_rate, WIRE_SAMPLE_RATE);
        self.pending.extend(resampled.iter().map(|&s| f32_to_i16(s)));
        while self.pending.len() >= CHUNK_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..CHUNK_SAMPLES).collect();
            let bytes = Bytes::from(pack_s16le(&chunk));
            if self.sink.try_send(bytes).is_err() {
                tracing::warn!("capture sink full; chunk dropped");
            }
        }
    }
}

/// Capture thread body: owns the cpal stream until stopped.
fn run_capture(
    stop: Arc<AtomicBool>,
    sink: mpsc::Sender<Bytes>,
    ready: std::sync::mpsc::Sender<Result<(), CaptureError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err(CaptureError::PermissionDenied(
            "no default input device".to_string(),
        )));
        return;
    };

    let config = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Device(e.to_string())));
            return;
        }
    };

    let device_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let mut f32_emitter = ChunkEmitter::new(channels, device_rate, sink.clone());
    let mut i16_emitter = ChunkEmitter::new(channels, device_rate, sink);

    let err_fn = |e| tracing::error!("capture stream error: {}", e);
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| f32_emitter.push(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                i16_emitter.push(&floats);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready.send(Err(CaptureError::Device(format!(
                "unsupported sample format {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Stream(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::Stream(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(25));
    }
    drop(stream);
}
