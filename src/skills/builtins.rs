//! Built-in skills compiled into the assistant.
//!
//! The time and memory skills are always registered at backend startup;
//! the diagnostics skill is only loaded when a manifest names it.

use super::{IntentRegistry, IntentSpec, ParameterSpec, Skill, SkillContext};
use crate::error::Result;
use crate::memory::FactStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Tells the current time.
pub struct TimeSkill {
    skill_id: String,
}

impl TimeSkill {
    pub fn new() -> Self {
        Self {
            skill_id: String::new(),
        }
    }
}

impl Default for TimeSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for TimeSkill {
    fn assign_id(&mut self, skill_id: &str) {
        self.skill_id = skill_id.to_owned();
        info!("time skill initialized");
    }

    fn register_intents(&mut self, registry: &mut IntentRegistry) -> Result<()> {
        registry.register(
            "get_current_time",
            IntentSpec {
                description: "Tells the user the current local time.".to_owned(),
                phrases: vec![
                    "what time is it".to_owned(),
                    "what's the current time".to_owned(),
                    "tell me the time".to_owned(),
                ],
                parameters: Vec::new(),
                handler: Box::new(|_params| {
                    let now = chrono::Local::now();
                    Ok(format!("The current time is {}.", now.format("%I:%M %p")))
                }),
            },
        )
    }
}

/// Stores, recalls, and forgets long-term facts.
pub struct MemorySkill {
    skill_id: String,
    facts: Arc<FactStore>,
}

impl MemorySkill {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self {
            skill_id: String::new(),
            facts,
        }
    }
}

impl Skill for MemorySkill {
    fn assign_id(&mut self, skill_id: &str) {
        self.skill_id = skill_id.to_owned();
        info!("memory skill initialized");
    }

    fn register_intents(&mut self, registry: &mut IntentRegistry) -> Result<()> {
        let facts = Arc::clone(&self.facts);
        let source = self.skill_id.clone();
        registry.register(
            "store_memory",
            IntentSpec {
                description: "Stores a piece of information in long-term memory.".to_owned(),
                phrases: vec![
                    "remember that".to_owned(),
                    "store this information".to_owned(),
                    "remind me that".to_owned(),
                ],
                parameters: vec![ParameterSpec::new(
                    "fact",
                    "The specific piece of information to be stored in memory.",
                )],
                handler: Box::new(move |params| {
                    let Some(fact) = params.get("fact").and_then(Value::as_str) else {
                        return Ok(
                            "I didn't quite catch what you wanted me to remember.".to_owned()
                        );
                    };
                    facts.store_fact(fact, &source)?;
                    Ok("Okay, I'll remember that.".to_owned())
                }),
            },
        )?;

        let facts = Arc::clone(&self.facts);
        registry.register(
            "recall_memory",
            IntentSpec {
                description: "Recalls stored information about a topic.".to_owned(),
                phrases: vec![
                    "what do you know about".to_owned(),
                    "what do you remember about".to_owned(),
                    "tell me about".to_owned(),
                ],
                parameters: vec![ParameterSpec::new(
                    "query",
                    "The topic to search for in memory.",
                )],
                handler: Box::new(move |params| {
                    let Some(query) = params.get("query").and_then(Value::as_str) else {
                        return Ok("What would you like to know about?".to_owned());
                    };
                    let results = facts.retrieve_relevant_facts(query, 1)?;
                    match results.first() {
                        Some(fact) => Ok(format!("I remember this about {query}: {fact}")),
                        None => Ok(format!("I don't seem to have any memories about {query}.")),
                    }
                }),
            },
        )?;

        let facts = Arc::clone(&self.facts);
        registry.register(
            "forget_memory",
            IntentSpec {
                description: "Deletes the stored fact that best matches a topic.".to_owned(),
                phrases: vec![
                    "forget that".to_owned(),
                    "forget what you know about".to_owned(),
                    "delete the memory about".to_owned(),
                ],
                parameters: vec![ParameterSpec::new(
                    "query",
                    "The topic whose memory should be deleted.",
                )],
                handler: Box::new(move |params| {
                    let Some(query) = params.get("query").and_then(Value::as_str) else {
                        return Ok("What would you like me to forget?".to_owned());
                    };
                    match facts.find_and_delete_fact(query)? {
                        Some(fact) => Ok(format!("Okay, I've forgotten that {fact}.")),
                        None => Ok(format!("I couldn't find anything about {query} to forget.")),
                    }
                }),
            },
        )
    }
}

/// Self-test skill used to exercise the sandbox. Only loaded when a
/// manifest names the `diagnostics` entry.
pub struct DiagnosticsSkill {
    skill_id: String,
}

impl DiagnosticsSkill {
    pub fn new() -> Self {
        Self {
            skill_id: String::new(),
        }
    }
}

impl Default for DiagnosticsSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for DiagnosticsSkill {
    fn assign_id(&mut self, skill_id: &str) {
        self.skill_id = skill_id.to_owned();
    }

    fn register_intents(&mut self, registry: &mut IntentRegistry) -> Result<()> {
        registry.register(
            "crash_test",
            IntentSpec {
                description: "Deliberately crashes to verify sandbox isolation.".to_owned(),
                phrases: vec!["crash test".to_owned()],
                parameters: Vec::new(),
                handler: Box::new(|_params| {
                    panic!("diagnostics crash test");
                }),
            },
        )?;

        registry.register(
            "sleep_test",
            IntentSpec {
                description: "Sleeps for a number of seconds to verify timeouts.".to_owned(),
                phrases: vec!["sleep test".to_owned()],
                parameters: vec![ParameterSpec::new("seconds", "How long to sleep.")],
                handler: Box::new(|params| {
                    let seconds = params
                        .get("seconds")
                        .and_then(Value::as_f64)
                        .or_else(|| {
                            params
                                .get("seconds")
                                .and_then(Value::as_str)
                                .and_then(|s| s.parse().ok())
                        })
                        .unwrap_or(10.0);
                    std::thread::sleep(std::time::Duration::from_secs_f64(seconds.max(0.0)));
                    Ok(format!("Slept for {seconds} seconds."))
                }),
            },
        )
    }
}

/// Register the always-on built-in skills.
///
/// # Errors
///
/// Returns an error if registration fails (duplicate intent names).
pub fn register_builtin_skills(
    manager: &mut super::SkillManager,
    ctx: &SkillContext,
) -> Result<()> {
    manager.register_skill("time_skill", Box::new(TimeSkill::new()))?;
    manager.register_skill(
        "memory_skill",
        Box::new(MemorySkill::new(Arc::clone(&ctx.fact_store))),
    )?;
    Ok(())
}

/// Build a skill from the compile-time factory map.
///
/// Returns `None` for unknown entries.
pub fn skill_factory(entry: &str, ctx: &SkillContext) -> Option<Box<dyn Skill>> {
    match entry {
        "time" => Some(Box::new(TimeSkill::new())),
        "memory" => Some(Box::new(MemorySkill::new(Arc::clone(&ctx.fact_store)))),
        "diagnostics" => Some(Box::new(DiagnosticsSkill::new())),
        _ => None,
    }
}
