//! Streaming recognizer (Vosk-style).
//!
//! Holds two continuous recognizers: a dormant one constrained to a
//! grammar of activation and exit phrases, and an unrestricted listening
//! one. `state.changed` events swap which recognizer is fed. Per-word
//! confidences are averaged; low-confidence utterances are dropped, but
//! only while LISTENING; dormant recognition stays lenient so the fuzzy
//! matcher can handle wake-word variants.

use super::{GateEdge, SttContext, SttProvider, TtsGate, VadEdgeDetector};
use crate::audio::rms_energy;
use crate::config::Config;
use crate::error::Result;
use crate::events::BusEvent;
use crate::state::AssistantState;
use tracing::{info, warn};

/// One recognized word with its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct WordConfidence {
    pub word: String,
    pub conf: f32,
}

/// A finalized recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult {
    pub text: String,
    pub words: Vec<WordConfidence>,
}

/// A continuous speech recognizer fed PCM16 chunks.
pub trait StreamingRecognizer: Send {
    /// Feed one chunk; returns a result when an utterance finalized.
    ///
    /// # Errors
    ///
    /// Returns an error when decoding fails.
    fn accept_waveform(&mut self, pcm: &[i16]) -> Result<Option<FinalResult>>;

    /// Drop any partial recognition state.
    fn reset(&mut self);
}

/// Builds recognizers, optionally constrained to a grammar.
pub trait RecognizerFactory: Send {
    /// Create a recognizer; `grammar` limits the vocabulary when given.
    ///
    /// # Errors
    ///
    /// Returns an error when the recognizer cannot be created.
    fn create(&mut self, grammar: Option<&[String]>) -> Result<Box<dyn StreamingRecognizer>>;
}

/// Tuning for the streaming provider.
#[derive(Debug, Clone)]
pub struct StreamingOptions {
    pub activation_phrases: Vec<String>,
    pub exit_phrases: Vec<String>,
    pub energy_threshold: f64,
    pub confidence_threshold: f64,
}

impl StreamingOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            activation_phrases: config.assistant.activation_phrases.clone(),
            exit_phrases: config.assistant.exit_phrases.clone(),
            energy_threshold: config.audio.stt.energy_threshold,
            confidence_threshold: config.audio.stt.confidence_threshold,
        }
    }
}

/// The streaming (grammar-swapping) STT provider.
pub struct StreamingProvider {
    factory: Box<dyn RecognizerFactory>,
    options: StreamingOptions,
}

impl StreamingProvider {
    pub fn new(factory: Box<dyn RecognizerFactory>, options: StreamingOptions) -> Self {
        Self { factory, options }
    }
}

impl SttProvider for StreamingProvider {
    fn run(&mut self, ctx: &mut SttContext) -> Result<()> {
        // The dormant grammar covers exactly the phrases that may wake or
        // kill the assistant.
        let mut grammar = self.options.activation_phrases.clone();
        grammar.extend(self.options.exit_phrases.iter().cloned());

        let mut dormant = self.factory.create(Some(&grammar))?;
        let mut listening = self.factory.create(None)?;
        info!("streaming recognizers created (dormant grammar: {} phrases)", grammar.len());
        ctx.signal_ready();

        let mut state = AssistantState::Dormant;
        let mut gate = TtsGate::new();
        let mut vad = VadEdgeDetector::new();

        while ctx.is_running() {
            for event in ctx.drain_events() {
                match gate.observe(&event) {
                    GateEdge::Muted | GateEdge::Resumed => {
                        dormant.reset();
                        listening.reset();
                        continue;
                    }
                    GateEdge::Unchanged => {}
                }
                if let BusEvent::StateChanged { state: new_state } = &event {
                    match new_state.as_str() {
                        "LISTENING" => state = AssistantState::Listening,
                        "DORMANT" => state = AssistantState::Dormant,
                        other => warn!("unknown state '{other}' on the bus"),
                    }
                }
            }

            let Some(chunk) = ctx.source.next_chunk()? else {
                continue;
            };
            if gate.is_muted() {
                continue;
            }

            let energy = rms_energy(&chunk);
            let is_speech = energy > self.options.energy_threshold;
            if let Some(status) = vad.observe(is_speech) {
                ctx.publish(BusEvent::VadStatusChanged { status });
            }
            if !is_speech {
                continue;
            }

            let recognizer = match state {
                AssistantState::Dormant => &mut dormant,
                AssistantState::Listening => &mut listening,
            };
            let Some(result) = recognizer.accept_waveform(&chunk)? else {
                continue;
            };

            // Strict confidence gating only while actively listening; the
            // dormant path hands low-confidence text to the fuzzy matcher.
            if state == AssistantState::Listening && !result.words.is_empty() {
                let average: f32 = result.words.iter().map(|w| w.conf).sum::<f32>()
                    / result.words.len() as f32;
                if f64::from(average) < self.options.confidence_threshold {
                    warn!(
                        "low confidence transcription ignored ({average:.2}): \"{}\"",
                        result.text
                    );
                    continue;
                }
            }

            let text = result.text.trim().to_lowercase();
            if !text.is_empty() {
                info!("heard: \"{text}\"");
                ctx.publish(BusEvent::SttTranscribed { text });
            }
        }

        info!("streaming STT stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedSource;
    use crate::events::EventBus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Recognizer that finalizes a scripted result on every speech chunk.
    struct FakeRecognizer {
        results: Arc<Mutex<Vec<FinalResult>>>,
        resets: Arc<Mutex<usize>>,
    }

    impl StreamingRecognizer for FakeRecognizer {
        fn accept_waveform(&mut self, _pcm: &[i16]) -> Result<Option<FinalResult>> {
            Ok(self.results.lock().expect("lock").pop())
        }

        fn reset(&mut self) {
            *self.resets.lock().expect("lock") += 1;
        }
    }

    struct FakeFactory {
        dormant_results: Arc<Mutex<Vec<FinalResult>>>,
        listening_results: Arc<Mutex<Vec<FinalResult>>>,
        resets: Arc<Mutex<usize>>,
        grammars: Arc<Mutex<Vec<Option<Vec<String>>>>>,
    }

    impl RecognizerFactory for FakeFactory {
        fn create(&mut self, grammar: Option<&[String]>) -> Result<Box<dyn StreamingRecognizer>> {
            self.grammars
                .lock()
                .expect("lock")
                .push(grammar.map(<[String]>::to_vec));
            Ok(Box::new(FakeRecognizer {
                results: if grammar.is_some() {
                    Arc::clone(&self.dormant_results)
                } else {
                    Arc::clone(&self.listening_results)
                },
                resets: Arc::clone(&self.resets),
            }))
        }
    }

    fn options() -> StreamingOptions {
        StreamingOptions {
            activation_phrases: vec!["hey assist".to_owned()],
            exit_phrases: vec!["assist exit".to_owned()],
            energy_threshold: 300.0,
            confidence_threshold: 0.85,
        }
    }

    fn final_result(text: &str, confs: &[f32]) -> FinalResult {
        FinalResult {
            text: text.to_owned(),
            words: confs
                .iter()
                .enumerate()
                .map(|(i, &conf)| WordConfidence {
                    word: format!("w{i}"),
                    conf,
                })
                .collect(),
        }
    }

    struct Harness {
        /// Kept alive so the subscription stays open.
        _bus: EventBus,
        rx: tokio::sync::broadcast::Receiver<BusEvent>,
        resets: Arc<Mutex<usize>>,
        grammars: Arc<Mutex<Vec<Option<Vec<String>>>>>,
    }

    fn run_streaming(
        dormant: Vec<FinalResult>,
        listening: Vec<FinalResult>,
        chunks: Vec<Vec<i16>>,
        prime: impl FnOnce(&EventBus),
    ) -> Harness {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let resets = Arc::new(Mutex::new(0));
        let grammars = Arc::new(Mutex::new(Vec::new()));
        let factory = FakeFactory {
            dormant_results: Arc::new(Mutex::new(dormant)),
            listening_results: Arc::new(Mutex::new(listening)),
            resets: Arc::clone(&resets),
            grammars: Arc::clone(&grammars),
        };

        let running = Arc::new(AtomicBool::new(true));
        let mut ctx = SttContext::new(
            Box::new(ScriptedSource::new(chunks)),
            bus.clone(),
            running.clone(),
        );
        prime(&bus);
        std::thread::sleep(Duration::from_millis(10));

        let handle = std::thread::spawn(move || {
            let mut provider = StreamingProvider::new(Box::new(factory), options());
            provider.run(&mut ctx).expect("provider run");
        });
        std::thread::sleep(Duration::from_millis(100));
        running.store(false, Ordering::Relaxed);
        handle.join().expect("join");

        Harness {
            _bus: bus,
            rx,
            resets,
            grammars,
        }
    }

    fn transcriptions(harness: &mut Harness) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(event) = harness.rx.try_recv() {
            if let BusEvent::SttTranscribed { text } = event {
                seen.push(text);
            }
        }
        seen
    }

    #[test]
    fn dormant_recognizer_is_grammar_constrained() {
        let mut harness = run_streaming(
            vec![final_result("Hey Assist", &[0.4])],
            Vec::new(),
            vec![ScriptedSource::tone_chunk(2000)],
            |_| {},
        );

        // First recognizer got the grammar, second was unrestricted.
        let grammars = harness.grammars.lock().expect("lock").clone();
        assert_eq!(grammars.len(), 2);
        let grammar = grammars[0].as_ref().expect("dormant grammar");
        assert!(grammar.contains(&"hey assist".to_owned()));
        assert!(grammar.contains(&"assist exit".to_owned()));
        assert!(grammars[1].is_none());

        // Low confidence passes while dormant; result is normalized.
        assert_eq!(transcriptions(&mut harness), vec!["hey assist".to_owned()]);
    }

    #[test]
    fn state_change_swaps_to_the_listening_recognizer() {
        let mut harness = run_streaming(
            Vec::new(),
            vec![final_result("open the pod bay doors", &[0.99, 0.97])],
            vec![ScriptedSource::tone_chunk(2000)],
            |bus| {
                bus.publish(BusEvent::StateChanged {
                    state: "LISTENING".to_owned(),
                });
            },
        );
        assert_eq!(
            transcriptions(&mut harness),
            vec!["open the pod bay doors".to_owned()]
        );
    }

    #[test]
    fn low_confidence_is_dropped_while_listening() {
        let mut harness = run_streaming(
            Vec::new(),
            vec![final_result("mumble mumble", &[0.3, 0.2])],
            vec![ScriptedSource::tone_chunk(2000)],
            |bus| {
                bus.publish(BusEvent::StateChanged {
                    state: "LISTENING".to_owned(),
                });
            },
        );
        assert!(transcriptions(&mut harness).is_empty());
    }

    #[test]
    fn tts_activity_mutes_and_resets_recognizers() {
        let mut harness = run_streaming(
            vec![final_result("hey assist", &[0.9])],
            Vec::new(),
            vec![ScriptedSource::tone_chunk(2000)],
            |bus| bus.publish(BusEvent::TtsStarted),
        );
        assert!(transcriptions(&mut harness).is_empty());
        assert!(*harness.resets.lock().expect("lock") >= 2);
    }

    #[test]
    fn silence_is_not_fed_to_recognizers() {
        let mut harness = run_streaming(
            vec![final_result("phantom", &[0.9])],
            Vec::new(),
            vec![vec![5i16; 2048]],
            |_| {},
        );
        assert!(transcriptions(&mut harness).is_empty());
    }
}
