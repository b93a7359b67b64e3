//! Central event definitions and the in-process bus.
//!
//! Components never talk to each other directly; they publish typed events
//! onto the bus and subscribe to the topics they care about. The same event
//! set is carried across process boundaries by the wire bus in
//! [`crate::ipc::pubsub`], encoded as a topic string plus a JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// STT final result. Payload: `{"text": ...}`.
pub const STT_TRANSCRIBED: &str = "stt.transcribed";
/// Request to synthesize speech. Payload: `{"text": ...}`.
pub const TTS_SPEAK: &str = "tts.speak";
/// TTS playback began.
pub const TTS_STARTED: &str = "tts.started";
/// TTS playback ended.
pub const TTS_FINISHED: &str = "tts.finished";
/// VAD speech/silence edge. Payload: `{"status": "speech"|"silence"}`.
pub const VAD_STATUS_CHANGED: &str = "vad.status_changed";
/// Assistant state transition. Payload: `{"state": ...}`.
pub const STATE_CHANGED: &str = "state.changed";
/// Component initialization progress. Payload: a [`ComponentStatus`].
pub const INIT_STATUS_UPDATE: &str = "init.status_update";
/// Dispatcher selected an intent. Payload: `{"name": ..., "params": {...}}`.
pub const INTENT_MATCHED: &str = "intent.matched";

/// VAD classification of the current audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadStatus {
    Speech,
    Silence,
}

/// A backend component reported on the init screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Llm,
    Tts,
    Stt,
    Skills,
}

/// Initialization state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStatus {
    Initializing,
    Initialized,
    Failed,
}

/// One `init.status_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component: Component,
    pub status: InitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ComponentStatus {
    /// A component that initialized cleanly.
    pub fn initialized(component: Component) -> Self {
        Self {
            component,
            status: InitStatus::Initialized,
            error: None,
            count: None,
        }
    }

    /// A component that failed to initialize.
    pub fn failed(component: Component, error: impl Into<String>) -> Self {
        Self {
            component,
            status: InitStatus::Failed,
            error: Some(error.into()),
            count: None,
        }
    }
}

/// A typed event on the assistant bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    SttTranscribed { text: String },
    TtsSpeak { text: String },
    TtsStarted,
    TtsFinished,
    VadStatusChanged { status: VadStatus },
    StateChanged { state: String },
    InitStatusUpdate(ComponentStatus),
    IntentMatched { name: String, params: Value },
}

impl BusEvent {
    /// The wire topic for this event.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SttTranscribed { .. } => STT_TRANSCRIBED,
            Self::TtsSpeak { .. } => TTS_SPEAK,
            Self::TtsStarted => TTS_STARTED,
            Self::TtsFinished => TTS_FINISHED,
            Self::VadStatusChanged { .. } => VAD_STATUS_CHANGED,
            Self::StateChanged { .. } => STATE_CHANGED,
            Self::InitStatusUpdate(_) => INIT_STATUS_UPDATE,
            Self::IntentMatched { .. } => INTENT_MATCHED,
        }
    }

    /// The JSON payload carried on the wire bus.
    pub fn payload(&self) -> Value {
        match self {
            Self::SttTranscribed { text } | Self::TtsSpeak { text } => json!({ "text": text }),
            Self::TtsStarted | Self::TtsFinished => json!({}),
            Self::VadStatusChanged { status } => json!({ "status": status }),
            Self::StateChanged { state } => json!({ "state": state }),
            Self::InitStatusUpdate(status) => {
                serde_json::to_value(status).unwrap_or_else(|_| json!({}))
            }
            Self::IntentMatched { name, params } => json!({ "name": name, "params": params }),
        }
    }

    /// Rebuild an event from its wire form.
    ///
    /// Unknown topics return `None`; the topic set is closed but subscribers
    /// must tolerate newer publishers.
    pub fn from_wire(topic: &str, payload: &Value) -> Option<Self> {
        let text = || {
            payload
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        match topic {
            STT_TRANSCRIBED => Some(Self::SttTranscribed { text: text() }),
            TTS_SPEAK => Some(Self::TtsSpeak { text: text() }),
            TTS_STARTED => Some(Self::TtsStarted),
            TTS_FINISHED => Some(Self::TtsFinished),
            VAD_STATUS_CHANGED => {
                let status = serde_json::from_value(payload.get("status")?.clone()).ok()?;
                Some(Self::VadStatusChanged { status })
            }
            STATE_CHANGED => Some(Self::StateChanged {
                state: payload
                    .get("state")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            INIT_STATUS_UPDATE => {
                let status = serde_json::from_value(payload.clone()).ok()?;
                Some(Self::InitStatusUpdate(status))
            }
            INTENT_MATCHED => Some(Self::IntentMatched {
                name: payload
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                params: payload.get("params").cloned().unwrap_or(Value::Null),
            }),
            _ => None,
        }
    }
}

/// Default capacity for the in-process bus.
const BUS_CAPACITY: usize = 128;

/// In-process publish/subscribe bus.
///
/// A thin wrapper over a broadcast channel: publishing never blocks, late
/// subscribers miss earlier events, and slow subscribers drop the oldest
/// events rather than stalling publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Fire-and-forget: having no subscribers is not an
    /// error.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_dotted_ascii() {
        let events = [
            BusEvent::SttTranscribed { text: "hi".into() },
            BusEvent::TtsSpeak { text: "hi".into() },
            BusEvent::TtsStarted,
            BusEvent::TtsFinished,
            BusEvent::VadStatusChanged {
                status: VadStatus::Speech,
            },
            BusEvent::StateChanged {
                state: "LISTENING".into(),
            },
            BusEvent::InitStatusUpdate(ComponentStatus::initialized(Component::Llm)),
            BusEvent::IntentMatched {
                name: "get_current_time".into(),
                params: json!({}),
            },
        ];
        for event in events {
            let topic = event.topic();
            assert!(topic.contains('.'), "topic {topic} must be dotted");
            assert!(topic.is_ascii());
        }
    }

    #[test]
    fn wire_round_trip() {
        let event = BusEvent::IntentMatched {
            name: "store_memory".into(),
            params: json!({ "fact": "the sky is blue" }),
        };
        let rebuilt = BusEvent::from_wire(event.topic(), &event.payload()).expect("known topic");
        assert_eq!(rebuilt, event);
    }

    #[test]
    fn unknown_topic_is_ignored() {
        assert!(BusEvent::from_wire("nope.unknown", &json!({})).is_none());
    }

    #[test]
    fn component_status_omits_empty_fields() {
        let status = ComponentStatus::initialized(Component::Stt);
        let value = serde_json::to_value(&status).expect("serialize");
        assert!(value.get("error").is_none());
        assert!(value.get("count").is_none());
        assert_eq!(value["component"], "stt");
        assert_eq!(value["status"], "initialized");
    }

    #[test]
    fn bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(BusEvent::TtsStarted);
        let event = rx.try_recv().expect("event queued");
        assert_eq!(event, BusEvent::TtsStarted);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(BusEvent::TtsFinished);
    }
}
