//! Chunked recognizer (Whisper-style).
//!
//! An energy-gated VAD buffers raw samples while speech is present; once
//! silence exceeds the phrase timeout, the buffered audio is handed to a
//! background transcription worker so the capture loop never blocks on the
//! model. An optional noise profile is captured at startup and subtracted
//! per chunk.

use super::noise::{NoiseProfile, calibrated_threshold};
use super::{GateEdge, SttContext, SttProvider, TtsGate, VadEdgeDetector};
use crate::audio::rms_energy;
use crate::config::Config;
use crate::error::{AssistantError, Result};
use crate::events::BusEvent;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ambient chunks gathered for calibration (~1 s of audio).
const CALIBRATION_CHUNKS: usize = 8;

/// Turns buffered phrases into text.
pub trait TranscriptionEngine: Send {
    /// Transcribe one phrase of 16 kHz mono PCM16.
    ///
    /// # Errors
    ///
    /// Returns an error when inference fails; the phrase is dropped.
    fn transcribe(&mut self, pcm: &[i16]) -> Result<String>;
}

/// Tuning for the chunked provider.
#[derive(Debug, Clone)]
pub struct ChunkedOptions {
    /// Silence gap that finalizes a phrase.
    pub phrase_timeout: Duration,
    /// RMS energy above which a chunk counts as speech.
    pub energy_threshold: f64,
    /// Capture and subtract a noise profile at startup.
    pub use_noise_cancellation: bool,
    /// Where the noise profile is persisted.
    pub noise_profile_path: PathBuf,
    /// Raise the threshold from ambient noise at startup.
    pub use_dynamic_energy: bool,
}

impl ChunkedOptions {
    pub fn from_config(config: &Config) -> Self {
        let stt = &config.audio.stt;
        Self {
            phrase_timeout: Duration::from_secs_f64(stt.whisper_vad.phrase_timeout.max(0.05)),
            energy_threshold: stt.whisper_vad.energy_threshold,
            use_noise_cancellation: stt.use_noise_cancellation,
            noise_profile_path: PathBuf::from(&stt.noise_profile_path),
            use_dynamic_energy: stt.use_dynamic_energy,
        }
    }
}

/// The chunked (buffer-then-transcribe) STT provider.
pub struct ChunkedProvider {
    engine: Option<Box<dyn TranscriptionEngine>>,
    options: ChunkedOptions,
}

impl ChunkedProvider {
    pub fn new(engine: Box<dyn TranscriptionEngine>, options: ChunkedOptions) -> Self {
        Self {
            engine: Some(engine),
            options,
        }
    }
}

impl SttProvider for ChunkedProvider {
    fn run(&mut self, ctx: &mut SttContext) -> Result<()> {
        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| AssistantError::Stt("chunked provider already ran".to_owned()))?;

        // Background transcription worker: pulls finalized phrases, feeds
        // the model, publishes results.
        let (phrase_tx, phrase_rx) = crossbeam_channel::unbounded::<Vec<i16>>();
        let worker_bus = ctx.bus();
        let worker = std::thread::Builder::new()
            .name("stt-transcribe".to_owned())
            .spawn(move || {
                while let Ok(phrase) = phrase_rx.recv() {
                    match engine.transcribe(&phrase) {
                        Ok(text) => {
                            let text = text.trim().to_lowercase();
                            // Silence often transcribes to punctuation junk.
                            if text.is_empty() || !text.chars().any(char::is_alphabetic) {
                                continue;
                            }
                            info!("transcribed: \"{text}\"");
                            worker_bus.publish(BusEvent::SttTranscribed { text });
                        }
                        Err(e) => warn!("transcription failed: {e}"),
                    }
                }
            })
            .map_err(|e| AssistantError::Stt(format!("cannot spawn transcription worker: {e}")))?;

        // Startup calibration: noise profile and/or dynamic threshold.
        let (profile, threshold) = self.calibrate(ctx);
        info!(
            "chunked STT ready (threshold {:.0}, phrase timeout {:?})",
            threshold, self.options.phrase_timeout
        );
        ctx.signal_ready();

        let mut gate = TtsGate::new();
        let mut vad = VadEdgeDetector::new();
        let mut phrase_buffer: Vec<i16> = Vec::new();
        let mut last_speech = Instant::now();
        let mut device_error: Option<AssistantError> = None;

        while ctx.is_running() {
            for event in ctx.drain_events() {
                match gate.observe(&event) {
                    GateEdge::Muted | GateEdge::Resumed => {
                        // Never transcribe the tail of our own speech.
                        phrase_buffer.clear();
                    }
                    GateEdge::Unchanged => {}
                }
            }

            let chunk = match ctx.source.next_chunk() {
                Ok(Some(chunk)) => Some(chunk),
                Ok(None) => None,
                Err(e) => {
                    // Audio device failure is fatal to the provider only.
                    device_error = Some(e);
                    break;
                }
            };

            if gate.is_muted() {
                phrase_buffer.clear();
                continue;
            }

            if let Some(mut chunk) = chunk {
                if let Some(profile) = profile {
                    profile.apply(&mut chunk);
                }
                let energy = rms_energy(&chunk);
                let is_speech = energy > threshold;
                if let Some(status) = vad.observe(is_speech) {
                    ctx.publish(BusEvent::VadStatusChanged { status });
                }
                if is_speech {
                    phrase_buffer.extend_from_slice(&chunk);
                    last_speech = Instant::now();
                    continue;
                }
            }

            // Silence (or an idle poll): flush the buffer once the gap is
            // long enough.
            if !phrase_buffer.is_empty() && last_speech.elapsed() > self.options.phrase_timeout {
                let phrase = std::mem::take(&mut phrase_buffer);
                debug!("phrase finalized ({} samples)", phrase.len());
                if phrase_tx.send(phrase).is_err() {
                    break;
                }
            }
        }

        drop(phrase_tx);
        worker
            .join()
            .map_err(|_| AssistantError::Stt("transcription worker panicked".to_owned()))?;
        info!("chunked STT stopped");
        match device_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ChunkedProvider {
    /// Capture ambient audio for the noise profile and dynamic threshold.
    fn calibrate(&self, ctx: &mut SttContext) -> (Option<NoiseProfile>, f64) {
        let mut threshold = self.options.energy_threshold;
        if !self.options.use_noise_cancellation && !self.options.use_dynamic_energy {
            return (None, threshold);
        }

        let mut ambient = Vec::new();
        while ambient.len() < CALIBRATION_CHUNKS && ctx.is_running() {
            match ctx.source.next_chunk() {
                Ok(Some(chunk)) => ambient.push(chunk),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let profile = if self.options.use_noise_cancellation {
            // Prefer a previously captured profile; otherwise capture one
            // now and persist it.
            match NoiseProfile::load(&self.options.noise_profile_path) {
                Ok(profile) => Some(profile),
                Err(_) => {
                    let profile = NoiseProfile::capture(&ambient);
                    if let Err(e) = profile.save(&self.options.noise_profile_path) {
                        warn!("could not persist noise profile: {e}");
                    }
                    Some(profile)
                }
            }
        } else {
            None
        };

        if self.options.use_dynamic_energy && !ambient.is_empty() {
            let ambient_rms =
                ambient.iter().map(|c| rms_energy(c)).sum::<f64>() / ambient.len() as f64;
            threshold = calibrated_threshold(threshold, ambient_rms);
            info!("dynamic energy threshold calibrated to {threshold:.0}");
        }

        (profile, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CHUNK_SAMPLES, ScriptedSource};
    use crate::events::EventBus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Engine that records phrases and replies with a fixed transcript.
    struct FakeEngine {
        reply: String,
    }

    impl TranscriptionEngine for FakeEngine {
        fn transcribe(&mut self, pcm: &[i16]) -> Result<String> {
            assert!(!pcm.is_empty());
            Ok(self.reply.clone())
        }
    }

    fn options() -> ChunkedOptions {
        ChunkedOptions {
            phrase_timeout: Duration::from_millis(30),
            energy_threshold: 300.0,
            use_noise_cancellation: false,
            noise_profile_path: PathBuf::from("unused.json"),
            use_dynamic_energy: false,
        }
    }

    /// Drive the provider on a thread against scripted audio, stopping it
    /// shortly after the script runs out.
    fn run_provider(
        engine: FakeEngine,
        chunks: Vec<Vec<i16>>,
        bus: EventBus,
        prime: impl FnOnce(&EventBus),
    ) {
        let running = Arc::new(AtomicBool::new(true));
        let mut ctx = SttContext::new(Box::new(ScriptedSource::new(chunks)), bus, running.clone());
        prime(&ctx.bus());
        // Let primed events land in the subscription before the loop runs.
        std::thread::sleep(Duration::from_millis(10));

        let handle = std::thread::spawn(move || {
            let mut provider = ChunkedProvider::new(Box::new(engine), options());
            provider.run(&mut ctx).expect("provider run");
        });
        std::thread::sleep(Duration::from_millis(150));
        running.store(false, Ordering::Relaxed);
        handle.join().expect("join provider");
    }

    #[test]
    fn speech_then_silence_publishes_a_transcription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let chunks = vec![
            ScriptedSource::tone_chunk(2000),
            ScriptedSource::tone_chunk(2000),
            ScriptedSource::tone_chunk(0),
        ];
        run_provider(
            FakeEngine {
                reply: "What Time Is It".to_owned(),
            },
            chunks,
            bus,
            |_| {},
        );

        let mut saw_speech_edge = false;
        let mut transcription = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                BusEvent::VadStatusChanged { status } => {
                    if status == crate::events::VadStatus::Speech {
                        saw_speech_edge = true;
                    }
                }
                BusEvent::SttTranscribed { text } => transcription = Some(text),
                _ => {}
            }
        }
        assert!(saw_speech_edge);
        // Result is lowercased and trimmed.
        assert_eq!(transcription.as_deref(), Some("what time is it"));
    }

    #[test]
    fn audio_is_discarded_while_tts_is_active() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let chunks = vec![
            ScriptedSource::tone_chunk(2000),
            ScriptedSource::tone_chunk(2000),
        ];
        run_provider(
            FakeEngine {
                reply: "should never surface".to_owned(),
            },
            chunks,
            bus,
            |bus| bus.publish(BusEvent::TtsStarted),
        );

        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, BusEvent::SttTranscribed { .. }),
                "self-speech was transcribed"
            );
        }
    }

    #[test]
    fn junk_transcriptions_are_dropped() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let chunks = vec![ScriptedSource::tone_chunk(2000)];
        run_provider(
            FakeEngine {
                reply: "...".to_owned(),
            },
            chunks,
            bus,
            |_| {},
        );
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, BusEvent::SttTranscribed { .. }));
        }
    }

    #[test]
    fn quiet_audio_never_reaches_the_engine() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let chunks = vec![vec![10i16; CHUNK_SAMPLES], vec![10i16; CHUNK_SAMPLES]];
        run_provider(
            FakeEngine {
                reply: "noise floor".to_owned(),
            },
            chunks,
            bus,
            |_| {},
        );
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, BusEvent::SttTranscribed { .. }));
        }
    }
}
