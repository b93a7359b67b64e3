//! Microphone capture via cpal.
//!
//! Captures at the device's native configuration and converts to 16 kHz
//! mono PCM16 chunks for the STT providers. The cpal stream is not `Send`,
//! so it lives on a dedicated thread that keeps it alive until the source
//! is dropped. The capture callback never blocks: chunks are handed to a
//! bounded channel and dropped when the consumer falls behind.

use super::{AudioSource, CHUNK_SAMPLES, PIPELINE_SAMPLE_RATE};
use crate::error::{AssistantError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// How long `next_chunk` waits before yielding control to the caller.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded queue of pending chunks (~4 s of audio).
const QUEUE_CHUNKS: usize = 32;

/// Microphone capture handle. The single microphone writer per process.
pub struct CpalSource {
    rx: crossbeam_channel::Receiver<Vec<i16>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalSource {
    /// Open the default input device and start capturing.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device exists or the stream cannot be
    /// built; the frontend degrades to typed commands.
    pub fn open() -> Result<Self> {
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Vec<i16>>(QUEUE_CHUNKS);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("audio-capture".to_owned())
            .spawn(move || capture_thread(&chunk_tx, &ready_tx, &thread_stop))
            .map_err(|e| AssistantError::Audio(format!("cannot spawn capture thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Ok(())) => Ok(Self {
                rx: chunk_rx,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(message)) => {
                stop.store(true, Ordering::Relaxed);
                let _ = thread.join();
                Err(AssistantError::Audio(message))
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                Err(AssistantError::Audio("capture start timed out".into()))
            }
        }
    }
}

impl AudioSource for CpalSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<i16>>> {
        match self.rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(AssistantError::Audio("capture stream closed".into()))
            }
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Owns the cpal stream for its whole lifetime.
fn capture_thread(
    chunks: &crossbeam_channel::Sender<Vec<i16>>,
    ready: &crossbeam_channel::Sender<std::result::Result<(), String>>,
    stop: &AtomicBool,
) {
    let stream = match build_stream(chunks.clone()) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);
    }
    drop(stream);
    info!("audio capture stopped");
}

fn build_stream(tx: crossbeam_channel::Sender<Vec<i16>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AssistantError::Audio("no default input device".into()))?;
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| AssistantError::Audio(format!("no default input config: {e}")))?;
    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = cpal::StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "native input config: {}Hz, {} channels",
        native_rate, native_channels
    );

    let mut pending: VecDeque<i16> = VecDeque::with_capacity(CHUNK_SAMPLES * 4);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = if native_rate != PIPELINE_SAMPLE_RATE {
                    downsample(&mono, native_rate, PIPELINE_SAMPLE_RATE)
                } else {
                    mono
                };
                pending.extend(samples.iter().map(|&s| to_pcm16(s)));

                while pending.len() >= CHUNK_SAMPLES {
                    let chunk: Vec<i16> = pending.drain(..CHUNK_SAMPLES).collect();
                    // try_send keeps the audio callback non-blocking;
                    // overflow drops the newest work instead.
                    let _ = tx.try_send(chunk);
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| AssistantError::Audio(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| AssistantError::Audio(format!("failed to start input stream: {e}")))?;

    info!(
        "audio capture started: native {}Hz -> {}Hz mono",
        native_rate, PIPELINE_SAMPLE_RATE
    );
    Ok(stream)
}

/// Average interleaved channels down to mono.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation downsampler. Speech energy sits below 8 kHz, so no
/// anti-alias filter is needed for 48 kHz -> 16 kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;
        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };
        output.push(sample as f32);
    }
    output
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
