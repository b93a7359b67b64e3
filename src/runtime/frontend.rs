//! Frontend process wiring.
//!
//! Owns the audio devices, the STT/TTS providers, the text-command
//! ingress, the global quit hotkey, and the authoritative state machine.
//! A single command-loop thread turns everything it hears into backend
//! requests and applies the replies, so state transitions are serialized
//! by construction.

use crate::audio::capture::CpalSource;
use crate::config::Config;
use crate::error::Result;
use crate::events::{
    BusEvent, Component, ComponentStatus, EventBus, INIT_STATUS_UPDATE, STATE_CHANGED,
};
use crate::ipc::command::CommandClient;
use crate::ipc::ingress::TextIngress;
use crate::ipc::protocol::{Action, CLEAR_CONVERSATION_SENTINEL};
use crate::state::{StateMachine, Transition, normalize_utterance};
use crate::stt::SttContext;
use crate::tts::TtsService;
use crate::{stt, tts};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Grace period for TTS to finish "Goodbye." before shutdown.
const EXIT_GRACE: Duration = Duration::from_millis(1500);

/// Poll interval for the command loop's input sources.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Inputs for the frontend command loop.
pub struct CommandLoop {
    pub bus: EventBus,
    pub client: CommandClient,
    pub ingress: TextIngress,
    pub running: Arc<AtomicBool>,
    /// Component statuses announced once the loop starts.
    pub initial_statuses: Vec<ComponentStatus>,
}

/// The frontend's central loop.
///
/// Consumes transcribed and typed utterances, sends them to the backend
/// with the current state, applies the reply, and mirrors events to the
/// backend for re-broadcast to the GUI.
pub fn command_loop(inputs: CommandLoop) {
    let CommandLoop {
        bus,
        mut client,
        ingress,
        running,
        initial_statuses,
    } = inputs;

    for status in initial_statuses {
        let payload = serde_json::to_value(&status).unwrap_or_default();
        client.send_event(INIT_STATUS_UPDATE, payload);
    }

    let mut machine = StateMachine::new();
    let mut events = bus.subscribe();
    let mut pending: VecDeque<String> = VecDeque::new();

    info!("command loop started");
    while running.load(Ordering::Relaxed) {
        // Mirror locally published events to the backend bus and pick up
        // finished transcriptions.
        while let Ok(event) = events.try_recv() {
            match &event {
                BusEvent::SttTranscribed { text } => {
                    client.send_event(event.topic(), event.payload());
                    pending.push_back(text.clone());
                }
                BusEvent::VadStatusChanged { .. }
                | BusEvent::TtsStarted
                | BusEvent::TtsFinished => {
                    client.send_event(event.topic(), event.payload());
                }
                _ => {}
            }
        }

        if let Some(line) = ingress.recv_timeout(POLL_INTERVAL) {
            pending.push_back(line);
        }

        if let Some(text) = pending.pop_front()
            && !handle_utterance(&text, &bus, &mut client, &mut machine)
        {
            // EXIT: give TTS a moment to say goodbye, then stop.
            std::thread::sleep(EXIT_GRACE);
            running.store(false, Ordering::Relaxed);
        }
    }
    info!("command loop stopped");
}

/// Process one utterance. Returns false when the assistant should exit.
fn handle_utterance(
    text: &str,
    bus: &EventBus,
    client: &mut CommandClient,
    machine: &mut StateMachine,
) -> bool {
    if text.trim() == CLEAR_CONVERSATION_SENTINEL {
        client.clear_conversation(machine.state());
        return true;
    }

    let utterance = normalize_utterance(text);
    if utterance.is_empty() {
        return true;
    }

    let response = client.send_command(&utterance, machine.state());

    // Speak first so "Goodbye." and "Listening." reach the TTS queue
    // before any state side effects.
    if response.action != Action::Ignore
        && let Some(speak) = response.speak.as_deref()
        && !speak.is_empty()
    {
        let event = BusEvent::TtsSpeak {
            text: speak.to_owned(),
        };
        bus.publish(event.clone());
        client.send_event(event.topic(), event.payload());
    }

    match machine.apply(response.action) {
        Transition::Changed(new_state) => {
            let event = BusEvent::StateChanged {
                state: new_state.to_string(),
            };
            info!("state changed to {new_state}");
            bus.publish(event.clone());
            client.send_event(STATE_CHANGED, event.payload());
            true
        }
        Transition::Exit => false,
        Transition::Unchanged => true,
    }
}

/// Run the frontend process until exit.
///
/// # Errors
///
/// Returns an error when a fatal startup step fails (text ingress port).
/// Audio and provider failures degrade to typed-command operation.
pub async fn run(config: Config) -> Result<()> {
    let bus = EventBus::new();
    let running = Arc::new(AtomicBool::new(true));
    let ingress = TextIngress::bind(config.ipc.text_command_port).await?;
    let mut initial_statuses = Vec::new();

    // TTS: degrade to silent operation on failure.
    let tts_service = match tts::create_provider(&config) {
        Ok(provider) => {
            initial_statuses.push(ComponentStatus::initialized(Component::Tts));
            Some(TtsService::start(bus.clone(), provider)?)
        }
        Err(e) => {
            error!("TTS unavailable: {e}");
            initial_statuses.push(ComponentStatus::failed(Component::Tts, e.to_string()));
            None
        }
    };

    // STT: degrade to text-only operation on failure.
    let stt_thread = match start_stt(&config, &bus, &running) {
        Ok(handle) => {
            initial_statuses.push(ComponentStatus::initialized(Component::Stt));
            Some(handle)
        }
        Err(e) => {
            error!("STT unavailable: {e}");
            initial_statuses.push(ComponentStatus::failed(Component::Stt, e.to_string()));
            None
        }
    };

    spawn_hotkey_listener(&config.hotkeys.quit, Arc::clone(&running));

    let loop_inputs = CommandLoop {
        bus: bus.clone(),
        client: CommandClient::new(config.ipc.command_port),
        ingress,
        running: Arc::clone(&running),
        initial_statuses,
    };
    let mut loop_handle = tokio::task::spawn_blocking(move || command_loop(loop_inputs));

    tokio::select! {
        _ = &mut loop_handle => {}
        signal = tokio::signal::ctrl_c() => {
            if signal.is_err() {
                warn!("cannot listen for ctrl-c");
            }
            info!("shutdown requested");
            running.store(false, Ordering::Relaxed);
            let _ = loop_handle.await;
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(thread) = stt_thread {
            let _ = thread.join();
        }
        // The shared audio handle inside the STT context is dropped with
        // the provider thread, exactly once, at the end of shutdown.
        if let Some(service) = tts_service {
            service.stop();
        }
    })
    .await;

    info!("frontend stopped");
    Ok(())
}

/// Build the STT provider, open the microphone, and start the provider
/// thread.
fn start_stt(
    config: &Config,
    bus: &EventBus,
    running: &Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>> {
    let mut provider = stt::create_provider(config)?;
    let source = CpalSource::open()?;
    let mut ctx = SttContext::new(Box::new(source), bus.clone(), Arc::clone(running));
    std::thread::Builder::new()
        .name("stt-provider".to_owned())
        .spawn(move || {
            if let Err(e) = provider.run(&mut ctx) {
                // Fatal to the provider only; typed commands keep working.
                error!("STT provider stopped: {e}");
            }
        })
        .map_err(|e| crate::error::AssistantError::Stt(format!("cannot spawn STT thread: {e}")))
}

/// A parsed hotkey combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hotkey {
    ctrl: bool,
    alt: bool,
    shift: bool,
    key: rdev::Key,
}

/// Listen for the global quit combination.
fn spawn_hotkey_listener(combo: &str, running: Arc<AtomicBool>) {
    let Some(hotkey) = parse_hotkey(combo) else {
        warn!("unparseable hotkey combination '{combo}'; quit hotkey disabled");
        return;
    };

    let spawned = std::thread::Builder::new()
        .name("hotkey".to_owned())
        .spawn(move || {
            let mut ctrl = false;
            let mut alt = false;
            let mut shift = false;
            let result = rdev::listen(move |event| match event.event_type {
                rdev::EventType::KeyPress(key) => match key {
                    rdev::Key::ControlLeft | rdev::Key::ControlRight => ctrl = true,
                    rdev::Key::Alt | rdev::Key::AltGr => alt = true,
                    rdev::Key::ShiftLeft | rdev::Key::ShiftRight => shift = true,
                    other => {
                        if other == hotkey.key
                            && ctrl == hotkey.ctrl
                            && alt == hotkey.alt
                            && shift == hotkey.shift
                        {
                            info!("quit hotkey pressed");
                            running.store(false, Ordering::Relaxed);
                        }
                    }
                },
                rdev::EventType::KeyRelease(key) => match key {
                    rdev::Key::ControlLeft | rdev::Key::ControlRight => ctrl = false,
                    rdev::Key::Alt | rdev::Key::AltGr => alt = false,
                    rdev::Key::ShiftLeft | rdev::Key::ShiftRight => shift = false,
                    _ => {}
                },
                _ => {}
            });
            if let Err(e) = result {
                warn!("global hotkey listener unavailable: {e:?}");
            }
        });
    if spawned.is_err() {
        warn!("cannot spawn hotkey listener thread");
    }
}

/// Parse combinations like "ctrl+alt+q".
fn parse_hotkey(combo: &str) -> Option<Hotkey> {
    let mut ctrl = false;
    let mut alt = false;
    let mut shift = false;
    let mut key = None;

    for token in combo.split('+') {
        match token.trim().to_lowercase().as_str() {
            "ctrl" | "control" => ctrl = true,
            "alt" => alt = true,
            "shift" => shift = true,
            other => key = parse_key(other),
        }
    }

    key.map(|key| Hotkey {
        ctrl,
        alt,
        shift,
        key,
    })
}

fn parse_key(token: &str) -> Option<rdev::Key> {
    use rdev::Key;
    let key = match token {
        "a" => Key::KeyA,
        "b" => Key::KeyB,
        "c" => Key::KeyC,
        "d" => Key::KeyD,
        "e" => Key::KeyE,
        "f" => Key::KeyF,
        "g" => Key::KeyG,
        "h" => Key::KeyH,
        "i" => Key::KeyI,
        "j" => Key::KeyJ,
        "k" => Key::KeyK,
        "l" => Key::KeyL,
        "m" => Key::KeyM,
        "n" => Key::KeyN,
        "o" => Key::KeyO,
        "p" => Key::KeyP,
        "q" => Key::KeyQ,
        "r" => Key::KeyR,
        "s" => Key::KeyS,
        "t" => Key::KeyT,
        "u" => Key::KeyU,
        "v" => Key::KeyV,
        "w" => Key::KeyW,
        "x" => Key::KeyX,
        "y" => Key::KeyY,
        "z" => Key::KeyZ,
        "escape" | "esc" => Key::Escape,
        "space" => Key::Space,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_default_quit_combo() {
        let hotkey = parse_hotkey("ctrl+alt+q").expect("parse");
        assert!(hotkey.ctrl);
        assert!(hotkey.alt);
        assert!(!hotkey.shift);
        assert_eq!(hotkey.key, rdev::Key::KeyQ);
    }

    #[test]
    fn parses_modifier_free_keys() {
        let hotkey = parse_hotkey("escape").expect("parse");
        assert!(!hotkey.ctrl && !hotkey.alt && !hotkey.shift);
        assert_eq!(hotkey.key, rdev::Key::Escape);
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        assert!(parse_hotkey("ctrl+alt+unknownkey").is_none());
        assert!(parse_hotkey("").is_none());
    }
}
