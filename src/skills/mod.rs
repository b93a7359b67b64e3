//! Skill registry and runtime.
//!
//! A skill is a value: it registers named intents, each carrying the
//! phrases that seed the dispatcher's fast path, a parameter schema for the
//! LLM router, and a handler closure. There is no runtime code loading;
//! discovery instantiates skills from a compile-time factory map keyed by
//! the manifest's `entry` field.

pub mod builtins;
pub mod discovery;
pub mod manifest;
pub mod sandbox;

use crate::error::{AssistantError, Result};
use crate::memory::FactStore;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Parameters passed to an intent handler, as a JSON object.
pub type SkillParams = Map<String, Value>;

/// An intent handler. Receives the routed parameters, returns the raw
/// output to speak (or summarize).
pub type IntentHandler = Box<dyn Fn(&SkillParams) -> Result<String> + Send + Sync>;

/// One named parameter accepted by an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Registration payload for one intent.
pub struct IntentSpec {
    /// What the intent does, for the LLM router.
    pub description: String,
    /// Phrases that trigger the fast path.
    pub phrases: Vec<String>,
    /// Parameters the router may extract.
    pub parameters: Vec<ParameterSpec>,
    /// The handler invoked with routed parameters.
    pub handler: IntentHandler,
}

/// A registered intent.
pub struct Intent {
    pub name: String,
    pub skill_id: String,
    pub description: String,
    pub phrases: Vec<String>,
    pub parameters: Vec<ParameterSpec>,
    handler: IntentHandler,
}

impl Intent {
    /// Invoke the handler in this process.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub fn invoke(&self, params: &SkillParams) -> Result<String> {
        (self.handler)(params)
    }
}

/// The skill ABI.
///
/// Lifecycle: the manager assigns the skill its id, then asks it to
/// register its intents.
pub trait Skill: Send {
    /// Receive the unique skill id before registration.
    fn assign_id(&mut self, skill_id: &str);

    /// Register this skill's intents.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails (e.g. duplicate intent name).
    fn register_intents(&mut self, registry: &mut IntentRegistry) -> Result<()>;
}

/// Collects intents during skill registration.
pub struct IntentRegistry {
    intents: Vec<Intent>,
    by_name: HashMap<String, usize>,
    current_skill: String,
}

impl IntentRegistry {
    fn new() -> Self {
        Self {
            intents: Vec::new(),
            by_name: HashMap::new(),
            current_skill: String::new(),
        }
    }

    /// Register an intent for the skill currently being loaded.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is already taken.
    pub fn register(&mut self, name: &str, spec: IntentSpec) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(AssistantError::Skill(format!(
                "intent '{name}' is already registered"
            )));
        }
        self.by_name.insert(name.to_owned(), self.intents.len());
        self.intents.push(Intent {
            name: name.to_owned(),
            skill_id: self.current_skill.clone(),
            description: spec.description,
            phrases: spec.phrases,
            parameters: spec.parameters,
            handler: spec.handler,
        });
        Ok(())
    }
}

/// Everything a skill factory may need.
#[derive(Clone)]
pub struct SkillContext {
    /// Shared fact store (the worker process opens its own connection).
    pub fact_store: Arc<FactStore>,
}

/// Owns the loaded skills and their intents for one process.
pub struct SkillManager {
    registry: IntentRegistry,
    skill_ids: Vec<String>,
}

impl SkillManager {
    pub fn new() -> Self {
        Self {
            registry: IntentRegistry::new(),
            skill_ids: Vec::new(),
        }
    }

    /// Load one skill: assign its id, then collect its intents.
    ///
    /// # Errors
    ///
    /// Returns an error if the skill's registration fails; previously
    /// registered intents from the same skill are kept.
    pub fn register_skill(&mut self, skill_id: &str, mut skill: Box<dyn Skill>) -> Result<()> {
        skill.assign_id(skill_id);
        self.registry.current_skill = skill_id.to_owned();
        skill.register_intents(&mut self.registry)?;
        self.skill_ids.push(skill_id.to_owned());
        info!("registered skill '{skill_id}'");
        Ok(())
    }

    /// All registered intents, in registration order.
    pub fn intents(&self) -> &[Intent] {
        &self.registry.intents
    }

    /// Look up an intent by name.
    pub fn find_intent(&self, name: &str) -> Option<&Intent> {
        self.registry
            .by_name
            .get(name)
            .and_then(|&index| self.registry.intents.get(index))
    }

    /// Number of loaded skills.
    pub fn skill_count(&self) -> usize {
        self.skill_ids.len()
    }

    /// Describe every intent as JSON for the routing prompt: name,
    /// description, and parameter names with descriptions.
    pub fn routing_catalog(&self) -> Value {
        let entries: Vec<Value> = self
            .registry
            .intents
            .iter()
            .map(|intent| {
                let params: Vec<Value> = intent
                    .parameters
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "description": p.description,
                        })
                    })
                    .collect();
                serde_json::json!({
                    "name": intent.name,
                    "description": intent.description,
                    "parameters": params,
                })
            })
            .collect();
        Value::Array(entries)
    }
}

impl Default for SkillManager {
    fn default() -> Self {
        Self::new()
    }
}
