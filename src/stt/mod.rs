//! Speech-to-text provider framework.
//!
//! Providers are selected by name from configuration and run on a
//! dedicated thread, consuming microphone audio and publishing
//! `stt.transcribed` events until shutdown. Two contracts exist: the
//! grammar-swapping streaming recognizer ([`streaming`], Vosk-style) and
//! the energy-gated chunked recognizer ([`chunked`], Whisper-style). Both
//! honor the TTS interlock: while the assistant speaks, inbound audio is
//! discarded and recognizer state is reset so the assistant never hears
//! itself.

pub mod chunked;
pub mod noise;
pub mod streaming;

#[cfg(feature = "vosk")]
pub mod vosk_engine;

#[cfg(feature = "whisper")]
pub mod whisper_engine;

use crate::audio::AudioSource;
use crate::config::Config;
use crate::error::{AssistantError, Result};
use crate::events::{BusEvent, EventBus, VadStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Everything a provider needs while running.
pub struct SttContext {
    /// Microphone (or scripted) audio, 16 kHz mono PCM16.
    pub source: Box<dyn AudioSource>,
    bus: EventBus,
    events: broadcast::Receiver<BusEvent>,
    running: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl SttContext {
    /// Build a context; subscribes to the bus immediately so no interlock
    /// events are missed between construction and the provider's loop.
    pub fn new(source: Box<dyn AudioSource>, bus: EventBus, running: Arc<AtomicBool>) -> Self {
        let events = bus.subscribe();
        Self {
            source,
            bus,
            events,
            running,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle the provider sets once its model is loaded and stream open.
    pub fn ready_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// Mark the provider ready.
    pub fn signal_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// True until shutdown is requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Publish onto the in-process bus.
    pub fn publish(&self, event: BusEvent) {
        self.bus.publish(event);
    }

    /// Clone of the bus for worker threads.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Drain any pending bus events without blocking.
    pub fn drain_events(&mut self) -> Vec<BusEvent> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => drained.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    debug!("STT event subscription lagged by {n}");
                }
                Err(_) => break,
            }
        }
        drained
    }
}

/// A pluggable speech-to-text provider.
pub trait SttProvider: Send {
    /// Run until shutdown, publishing `stt.transcribed` events.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider cannot start (model or device
    /// failure). Errors are fatal to the provider only.
    fn run(&mut self, ctx: &mut SttContext) -> Result<()>;
}

/// The TTS↔STT interlock.
///
/// Set on `tts.started`, cleared on `tts.finished`; while set, captured
/// audio must be discarded and internal buffers reset on resume.
#[derive(Debug, Default)]
pub struct TtsGate {
    active: bool,
}

/// Edge produced by feeding one event into the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEdge {
    /// TTS began; discard audio and reset recognizer state.
    Muted,
    /// TTS ended; buffers must be reset before accepting audio again.
    Resumed,
    /// Event did not affect the gate.
    Unchanged,
}

impl TtsGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one bus event through the gate.
    pub fn observe(&mut self, event: &BusEvent) -> GateEdge {
        match event {
            BusEvent::TtsStarted => {
                self.active = true;
                GateEdge::Muted
            }
            BusEvent::TtsFinished => {
                self.active = false;
                GateEdge::Resumed
            }
            _ => GateEdge::Unchanged,
        }
    }

    /// True while the assistant is speaking.
    pub fn is_muted(&self) -> bool {
        self.active
    }
}

/// Publishes `vad.status_changed` on silence↔speech edges only.
#[derive(Debug)]
pub struct VadEdgeDetector {
    last: VadStatus,
}

impl VadEdgeDetector {
    pub fn new() -> Self {
        Self {
            last: VadStatus::Silence,
        }
    }

    /// Observe one chunk's classification; returns the new status on an
    /// edge.
    pub fn observe(&mut self, is_speech: bool) -> Option<VadStatus> {
        let status = if is_speech {
            VadStatus::Speech
        } else {
            VadStatus::Silence
        };
        if status == self.last {
            None
        } else {
            self.last = status;
            Some(status)
        }
    }
}

impl Default for VadEdgeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the configured STT provider.
///
/// # Errors
///
/// Returns an error for unknown provider names or when the selected
/// engine's feature is not compiled in.
pub fn create_provider(config: &Config) -> Result<Box<dyn SttProvider>> {
    let name = config.models.stt.provider.as_str();
    if name == "vosk" {
        #[cfg(feature = "vosk")]
        {
            let factory = vosk_engine::VoskFactory::new(&config.models.stt.vosk_model_path)?;
            return Ok(Box::new(streaming::StreamingProvider::new(
                Box::new(factory),
                streaming::StreamingOptions::from_config(config),
            )));
        }
        #[cfg(not(feature = "vosk"))]
        {
            return Err(AssistantError::Stt(
                "the vosk provider requires a build with --features vosk".to_owned(),
            ));
        }
    }
    if name == "whisper" {
        #[cfg(feature = "whisper")]
        {
            let engine = whisper_engine::WhisperEngine::new(
                &config.models.stt.whisper_model_name,
                &config.models.stt.whisper_device,
                &config.audio.stt.language,
            )?;
            return Ok(Box::new(chunked::ChunkedProvider::new(
                Box::new(engine),
                chunked::ChunkedOptions::from_config(config),
            )));
        }
        #[cfg(not(feature = "whisper"))]
        {
            return Err(AssistantError::Stt(
                "the whisper provider requires a build with --features whisper".to_owned(),
            ));
        }
    }
    Err(AssistantError::Stt(format!("unknown STT provider '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedSource;

    #[test]
    fn gate_follows_tts_envelope() {
        let mut gate = TtsGate::new();
        assert!(!gate.is_muted());
        assert_eq!(gate.observe(&BusEvent::TtsStarted), GateEdge::Muted);
        assert!(gate.is_muted());
        assert_eq!(
            gate.observe(&BusEvent::VadStatusChanged {
                status: VadStatus::Speech
            }),
            GateEdge::Unchanged
        );
        assert_eq!(gate.observe(&BusEvent::TtsFinished), GateEdge::Resumed);
        assert!(!gate.is_muted());
    }

    #[test]
    fn vad_edges_fire_once_per_transition() {
        let mut edges = VadEdgeDetector::new();
        assert_eq!(edges.observe(false), None);
        assert_eq!(edges.observe(true), Some(VadStatus::Speech));
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(false), Some(VadStatus::Silence));
        assert_eq!(edges.observe(false), None);
    }

    #[test]
    fn context_drains_pending_events() {
        let bus = EventBus::new();
        let mut ctx = SttContext::new(
            Box::new(ScriptedSource::new(Vec::new())),
            bus.clone(),
            Arc::new(AtomicBool::new(true)),
        );
        bus.publish(BusEvent::TtsStarted);
        bus.publish(BusEvent::TtsFinished);
        let drained = ctx.drain_events();
        assert_eq!(drained, vec![BusEvent::TtsStarted, BusEvent::TtsFinished]);
        assert!(ctx.drain_events().is_empty());
    }

    #[test]
    fn unknown_provider_name_errors() {
        let config = Config::from_yaml("models:\n  stt:\n    provider: nope\n").expect("parse");
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn ready_signal_is_observable() {
        let ctx = SttContext::new(
            Box::new(ScriptedSource::new(Vec::new())),
            EventBus::new(),
            Arc::new(AtomicBool::new(true)),
        );
        let ready = ctx.ready_handle();
        assert!(!ready.load(Ordering::Acquire));
        ctx.signal_ready();
        assert!(ready.load(Ordering::Acquire));
    }
}
