//! Speaker playback via cpal.
//!
//! The TTS worker is the single speaker writer; it holds this handle for
//! the duration of one utterance. A fresh stream is built per `play` call
//! (cpal streams are not `Send`, the device handle is).

use crate::error::{AssistantError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Speaker playback handle.
pub struct Playback {
    device: cpal::Device,
}

impl Playback {
    /// Open the default output device.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available; the assistant
    /// degrades to silent operation.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AssistantError::Audio("no default output device".into()))?;
        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");
        Ok(Self { device })
    }

    /// Play PCM16 mono samples at `sample_rate`, blocking until done.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream cannot be created or started.
    pub fn play(&mut self, samples: &[i16], sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples: samples.iter().map(|&s| f32::from(s) / f32::from(i16::MAX)).collect(),
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);

        let stream = self
            .device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(buf) => buf,
                        Err(_) => return,
                    };
                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| AssistantError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AssistantError::Audio(format!("failed to start output stream: {e}")))?;

        loop {
            std::thread::sleep(Duration::from_millis(10));
            let buf = buffer
                .lock()
                .map_err(|_| AssistantError::Audio("playback buffer lock poisoned".into()))?;
            if buf.finished {
                break;
            }
        }

        drop(stream);
        Ok(())
    }
}

/// Tracks playback progress inside the output callback.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}
