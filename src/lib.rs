//! AIST: a local voice assistant platform.
//!
//! Three cooperating processes (backend, frontend, and GUI) are linked
//! by loopback TCP channels: a request-reply command channel, a
//! publish/subscribe event bus, a log broadcast, and a typed-command
//! ingress. Utterances flow microphone → VAD → STT → dispatcher → skill →
//! TTS, with a full-duplex interlock so the assistant never hears itself.
//!
//! # Architecture
//!
//! - **Backend**: dispatcher, LLM, skill registry, conversation memory,
//!   and the long-term fact store. Owns authoritative dispatch decisions.
//! - **Frontend**: audio devices, STT/TTS providers, and the DORMANT ↔
//!   LISTENING state machine, mirrored to every UI over the event bus.
//! - **Skill workers**: short-lived children spawned per intent
//!   invocation, isolated from the backend.

pub mod audio;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fuzzy;
pub mod ipc;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod runtime;
pub mod skills;
pub mod state;
pub mod stt;
pub mod tts;

pub use config::Config;
pub use error::{AssistantError, Result};
pub use events::{BusEvent, EventBus};
pub use ipc::protocol::{Action, DispatchResponse};
pub use state::AssistantState;
