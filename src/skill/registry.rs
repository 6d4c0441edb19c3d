//! Name-indexed registry of skills.
//!
//! Each agent process owns one registry (a process-wide shared instance is
//! also available through [`global_registry`]). Registration is idempotent
//! by name — re-registering overwrites and logs a warning. Lookup is
//! read-locked; the registry is read-mostly after startup.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{AgentError, TaskError};
use crate::skill::tracker::{SkillStatus, TaskRecord};
use crate::skill::{Skill, SkillResult};

/// Process-wide registry shared by agents that want a common skill pool.
static GLOBAL_REGISTRY: Lazy<SkillRegistry> = Lazy::new(SkillRegistry::new);

/// The process-wide skill registry.
pub fn global_registry() -> &'static SkillRegistry {
    &GLOBAL_REGISTRY
}

/// Registry of skills indexed by name and category.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. Idempotent by name: an existing skill with the same
    /// name is overwritten with a warning.
    pub fn register(&self, skill: Skill) -> Arc<Skill> {
        let skill = Arc::new(skill);
        let mut skills = self.skills.write();
        if skills.contains_key(&skill.name) {
            log::warn!("skill `{}` already registered; overwriting", skill.name);
        }
        skills.insert(skill.name.clone(), Arc::clone(&skill));
        log::info!("skill `{}` registered with id {}", skill.name, skill.id);
        skill
    }

    /// Remove a skill by name. Returns whether one was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.skills.write().remove(name).is_some();
        if removed {
            log::info!("skill `{name}` unregistered");
        } else {
            log::warn!("skill `{name}` is not registered");
        }
        removed
    }

    /// Look up a skill by name.
    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.read().get(name).cloned()
    }

    /// All skills declaring the given category.
    pub fn by_category(&self, category: &str) -> Vec<Arc<Skill>> {
        self.skills
            .read()
            .values()
            .filter(|skill| skill.categories.iter().any(|c| c == category))
            .cloned()
            .collect()
    }

    /// All registered skills.
    pub fn list(&self) -> Vec<Arc<Skill>> {
        self.skills.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }

    /// Execute a skill by name as a tracked task.
    ///
    /// An unknown name produces a `failed` result with a `not_found` error
    /// rather than an `Err` — the caller still gets a reportable outcome.
    /// A task id is generated when the caller does not supply one.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        task_id: Option<String>,
    ) -> SkillResult {
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        match self.get(name) {
            Some(skill) => skill.execute_task(task_id, input).await,
            None => {
                let err = AgentError::not_found(format!("skill `{name}`"));
                log::warn!("execute requested for unknown skill `{name}`");
                let now = chrono::Utc::now();
                SkillResult {
                    skill_id: Uuid::nil(),
                    skill_name: name.to_string(),
                    task_id,
                    status: SkillStatus::Failed,
                    result: None,
                    error: Some(TaskError::from(&err)),
                    start_time: now,
                    end_time: now,
                    execution_time: 0.0,
                }
            }
        }
    }

    /// Find the ledger record for a task id across every registered skill.
    pub fn find_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.skills
            .read()
            .values()
            .find_map(|skill| skill.get_task_status(task_id))
    }

    /// Close an in-flight task with a timeout error, wherever it lives.
    pub fn time_out_task(&self, task_id: &str, seconds: f64) -> bool {
        self.skills
            .read()
            .values()
            .any(|skill| {
                skill.get_task_status(task_id).is_some() && skill.time_out_task(task_id, seconds)
            })
    }

    /// Explicitly cancel an in-flight task, wherever it lives.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.skills
            .read()
            .values()
            .any(|skill| skill.get_task_status(task_id).is_some() && skill.cancel_task(task_id))
    }
}
