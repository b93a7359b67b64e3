//! Backend process wiring.
//!
//! Builds the fact store, skill registry, language model, and dispatcher;
//! binds the event bus and command channel; publishes component statuses
//! as initialization proceeds. The command handler is the single place
//! where requests meet the dispatcher, so processing stays serialized.

use crate::config::Config;
use crate::dispatch::{Dispatcher, IntentInvoker, SandboxInvoker};
use crate::error::Result;
use crate::events::{BusEvent, Component, ComponentStatus};
use crate::ipc::command::CommandServer;
use crate::ipc::protocol::{CLEAR_CONVERSATION_SENTINEL, CommandRequest};
use crate::ipc::pubsub::{Publisher, PublisherHandle};
use crate::llm::{LanguageModel, initialize_llm};
use crate::memory::FactStore;
use crate::skills::builtins::register_builtin_skills;
use crate::skills::discovery::discover_skills;
use crate::skills::sandbox::SkillSandbox;
use crate::skills::{SkillContext, SkillManager};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A running backend: command server plus event publisher.
pub struct Backend {
    server: CommandServer,
    events: Publisher,
}

impl Backend {
    /// Start with the configured model and the process sandbox.
    ///
    /// # Errors
    ///
    /// Returns an error when a fatal startup step fails (ports, fact
    /// store). Model failures degrade instead.
    pub async fn start(config: &Config) -> Result<Self> {
        let llm = initialize_llm(&config.models.llm);
        let sandbox = SkillSandbox::new(
            Duration::from_secs(config.assistant.skill_timeout),
            config.memory_db_path(),
            PathBuf::from(&config.skills.directory),
            PathBuf::from(&config.logging.folder),
        );
        Self::start_with(config, llm, Box::new(SandboxInvoker::new(sandbox))).await
    }

    /// Start with explicit model and invoker (tests, embedding).
    ///
    /// # Errors
    ///
    /// Returns an error when a fatal startup step fails.
    pub async fn start_with(
        config: &Config,
        llm: Option<Box<dyn LanguageModel>>,
        invoker: Box<dyn IntentInvoker>,
    ) -> Result<Self> {
        let events = Publisher::bind(config.ipc.event_bus_port).await?;
        let handle = events.handle();

        // Fact store is load-bearing for skills and chat; its failure is
        // fatal to the backend.
        let fact_store = match FactStore::open(&config.memory_db_path()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                handle.broadcast_event(&BusEvent::InitStatusUpdate(ComponentStatus::failed(
                    Component::Skills,
                    e.to_string(),
                )));
                return Err(e);
            }
        };

        // Skills: built-ins always, then whatever the directory provides.
        let ctx = SkillContext {
            fact_store: Arc::clone(&fact_store),
        };
        let mut skills = SkillManager::new();
        register_builtin_skills(&mut skills, &ctx)?;
        let discovered = discover_skills(
            std::path::Path::new(&config.skills.directory),
            &ctx,
            &mut skills,
        );
        info!(
            "{} skills loaded ({} discovered)",
            skills.skill_count(),
            discovered
        );
        handle.broadcast_event(&BusEvent::InitStatusUpdate(ComponentStatus {
            component: Component::Skills,
            status: crate::events::InitStatus::Initialized,
            error: None,
            count: Some(skills.skill_count()),
        }));

        match &llm {
            Some(_) => handle.broadcast_event(&BusEvent::InitStatusUpdate(
                ComponentStatus::initialized(Component::Llm),
            )),
            None => {
                warn!("starting without a language model; fast-path intents only");
                handle.broadcast_event(&BusEvent::InitStatusUpdate(ComponentStatus::failed(
                    Component::Llm,
                    "language model unavailable",
                )));
            }
        }

        let dispatcher = Dispatcher::new(
            config.assistant.clone(),
            config.models.llm.clone(),
            llm,
            skills,
            invoker,
            fact_store,
        );

        let server = CommandServer::bind(
            config.ipc.command_port,
            command_handler(dispatcher, events.handle()),
        )
        .await?;

        info!("backend ready");
        Ok(Self { server, events })
    }

    /// The bound command-channel port.
    pub fn command_port(&self) -> u16 {
        self.server.port()
    }

    /// The bound event-bus port.
    pub fn event_port(&self) -> u16 {
        self.events.port()
    }

    /// Broadcast handle for the event bus.
    pub fn events(&self) -> PublisherHandle {
        self.events.handle()
    }

    /// Serve until interrupted.
    pub async fn run_until_ctrl_c(self) {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("cannot listen for ctrl-c; exiting immediately");
        }
        info!("shutdown requested");
        self.shutdown();
    }

    /// Stop serving and close the event bus.
    pub fn shutdown(self) {
        self.events.shutdown();
        self.server.shutdown();
        info!("backend stopped");
    }
}

/// Build the serialized request handler.
fn command_handler(
    mut dispatcher: Dispatcher,
    events: PublisherHandle,
) -> impl FnMut(CommandRequest) -> Value + Send + 'static {
    move |request| match request {
        CommandRequest::Command { payload } => {
            if payload.text.trim() == CLEAR_CONVERSATION_SENTINEL {
                dispatcher.clear_conversation();
                return json!({});
            }
            info!("'{}' (state: {})", payload.text, payload.state);
            match dispatcher.dispatch(&payload.text, payload.state) {
                Some(response) => {
                    if let Some(intent) = &response.intent {
                        events.broadcast_event(&BusEvent::IntentMatched {
                            name: intent.name.clone(),
                            params: intent.params.clone(),
                        });
                    }
                    serde_json::to_value(&response).unwrap_or_else(|_| json!({}))
                }
                None => json!({}),
            }
        }
        CommandRequest::Event {
            event_type,
            payload,
        } => {
            // Re-broadcast on behalf of clients that have no publisher of
            // their own.
            events.broadcast(&event_type, &payload);
            json!({})
        }
    }
}
