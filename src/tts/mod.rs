//! Text-to-speech provider framework.
//!
//! The service subscribes to `tts.speak` requests and plays them one at a
//! time on a background worker, so the bus is never blocked and the
//! speaker has a single writer. Around each utterance the worker publishes
//! `tts.started`/`tts.finished`; the finished event is emitted even when
//! synthesis fails so the STT interlock always releases.

pub mod espeak;
pub mod piper;

use crate::config::Config;
use crate::error::{AssistantError, Result};
use crate::events::{BusEvent, EventBus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the service threads check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A pluggable speech synthesizer.
pub trait TtsProvider: Send {
    /// Synthesize and play `text`, blocking until playback completes.
    ///
    /// # Errors
    ///
    /// Returns an error when synthesis or playback fails.
    fn speak(&mut self, text: &str) -> Result<()>;
}

/// Build the configured TTS provider.
///
/// # Errors
///
/// Returns an error for unknown provider names or when the provider
/// cannot initialize (missing voice model, missing binary).
pub fn create_provider(config: &Config) -> Result<Box<dyn TtsProvider>> {
    match config.models.tts.provider.as_str() {
        "piper" => Ok(Box::new(piper::PiperProvider::new(
            &config.models.tts.piper_voice_model,
        )?)),
        "espeak" => Ok(Box::new(espeak::EspeakProvider::new()?)),
        other => Err(AssistantError::Tts(format!(
            "unknown TTS provider '{other}'"
        ))),
    }
}

/// Owns the speak queue and its worker thread.
pub struct TtsService {
    running: Arc<AtomicBool>,
    forwarder: Option<std::thread::JoinHandle<()>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl TtsService {
    /// Subscribe to the bus and start the playback worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the service threads cannot be spawned.
    pub fn start(bus: EventBus, provider: Box<dyn TtsProvider>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<String>();

        // Forwarder: drains `tts.speak` requests from the bus into the
        // queue without blocking publishers.
        let mut events = bus.subscribe();
        let forward_running = Arc::clone(&running);
        let forwarder = std::thread::Builder::new()
            .name("tts-forward".to_owned())
            .spawn(move || {
                while forward_running.load(Ordering::Relaxed) {
                    match events.try_recv() {
                        Ok(BusEvent::TtsSpeak { text }) => {
                            if !text.is_empty() && queue_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::TryRecvError::Empty) => {
                            std::thread::sleep(Duration::from_millis(20));
                        }
                        Err(tokio::sync::broadcast::error::TryRecvError::Lagged(n)) => {
                            warn!("TTS forwarder lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::TryRecvError::Closed) => break,
                    }
                }
            })
            .map_err(|e| AssistantError::Tts(format!("cannot spawn TTS forwarder: {e}")))?;

        // Worker: single speaker writer, one utterance at a time.
        let worker_running = Arc::clone(&running);
        let worker_bus = bus;
        let mut provider = provider;
        let worker = std::thread::Builder::new()
            .name("tts-speak".to_owned())
            .spawn(move || {
                loop {
                    match queue_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(text) => {
                            info!("speaking: \"{text}\"");
                            worker_bus.publish(BusEvent::TtsStarted);
                            if let Err(e) = provider.speak(&text) {
                                error!("TTS playback failed: {e}");
                            }
                            // Always release the STT interlock.
                            worker_bus.publish(BusEvent::TtsFinished);
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                            if !worker_running.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| AssistantError::Tts(format!("cannot spawn TTS worker: {e}")))?;

        info!("TTS service started");
        Ok(Self {
            running,
            forwarder: Some(forwarder),
            worker: Some(worker),
        })
    }

    /// Stop both threads, finishing the utterance in flight.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.join();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("TTS service stopped");
    }
}

impl Drop for TtsService {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
