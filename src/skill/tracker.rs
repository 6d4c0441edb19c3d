//! Per-skill task ledger.
//!
//! Each skill owns one tracker holding the records of its in-flight and
//! recently finished tasks. Status transitions are enforced here: a record
//! only moves forward along the lifecycle, terminal states are immutable,
//! and a duplicate task id is a protocol error. Retention is bounded — once
//! the ledger reaches its ceiling the oldest *terminal* record is evicted,
//! and terminal records past a TTL are swept opportunistically. In-flight
//! records are never evicted.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AgentError, TaskError};

/// Lifecycle states of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SkillStatus {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    fn can_advance_to(&self, next: SkillStatus) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                SkillStatus::Running | SkillStatus::Failed | SkillStatus::Cancelled
            ),
            Self::Running => matches!(
                next,
                SkillStatus::Completed | SkillStatus::Failed | SkillStatus::Cancelled
            ),
            _ => false,
        }
    }
}

impl fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    /// Skill that owns the task, when one was named.
    pub skill: Option<String>,
    pub input: Value,
    pub status: SkillStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    /// Wall-clock seconds from creation to terminal state, validation included.
    pub execution_time: Option<f64>,
}

/// Bounded ledger of task records.
#[derive(Debug)]
pub struct TaskTracker {
    tasks: DashMap<String, TaskRecord>,
    /// Insertion order, oldest first; drives eviction.
    order: Mutex<VecDeque<String>>,
    retention: usize,
    ttl: Duration,
}

impl TaskTracker {
    pub fn new(retention: usize, ttl: Duration) -> Self {
        Self {
            tasks: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            retention,
            ttl,
        }
    }

    /// Create a `pending` record. A duplicate `task_id` is a protocol error.
    pub fn create(
        &self,
        task_id: impl Into<String>,
        skill: Option<String>,
        input: Value,
    ) -> Result<(), AgentError> {
        let task_id = task_id.into();
        if self.tasks.contains_key(&task_id) {
            return Err(AgentError::protocol(format!(
                "duplicate task id `{task_id}`"
            )));
        }

        self.sweep_expired();
        self.evict_to_capacity();

        self.tasks.insert(
            task_id.clone(),
            TaskRecord {
                task_id: task_id.clone(),
                skill,
                input,
                status: SkillStatus::Pending,
                start_time: Utc::now(),
                end_time: None,
                result: None,
                error: None,
                execution_time: None,
            },
        );
        self.order.lock().push_back(task_id);
        Ok(())
    }

    /// Move a record to `running`. Returns whether the transition applied.
    pub fn mark_running(&self, task_id: &str) -> bool {
        self.advance(task_id, SkillStatus::Running, |_| {})
    }

    /// Close a record as `completed` with its result.
    pub fn complete(&self, task_id: &str, result: Value, execution_time: f64) -> bool {
        self.advance(task_id, SkillStatus::Completed, |record| {
            record.result = Some(result.clone());
            record.end_time = Some(Utc::now());
            record.execution_time = Some(execution_time);
        })
    }

    /// Close a record as `failed` with its error.
    pub fn fail(&self, task_id: &str, error: TaskError, execution_time: f64) -> bool {
        self.advance(task_id, SkillStatus::Failed, |record| {
            record.error = Some(error.clone());
            record.end_time = Some(Utc::now());
            record.execution_time = Some(execution_time);
        })
    }

    /// Explicitly cancel an in-flight record.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.advance(task_id, SkillStatus::Cancelled, |record| {
            record.end_time = Some(Utc::now());
        })
    }

    /// Snapshot one record.
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    /// Snapshot every record, oldest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|entry| entry.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn advance<F>(&self, task_id: &str, next: SkillStatus, apply: F) -> bool
    where
        F: FnOnce(&mut TaskRecord),
    {
        match self.tasks.get_mut(task_id) {
            Some(mut entry) => {
                if !entry.status.can_advance_to(next) {
                    log::warn!(
                        "rejected task `{task_id}` transition {} -> {next}",
                        entry.status
                    );
                    return false;
                }
                entry.status = next;
                apply(&mut entry);
                true
            }
            None => {
                log::warn!("transition for unknown task `{task_id}`");
                false
            }
        }
    }

    /// Drop terminal records whose end time is older than the TTL.
    fn sweep_expired(&self) {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return;
        };
        let cutoff = Utc::now() - ttl;
        let mut order = self.order.lock();
        order.retain(|id| {
            let expired = self
                .tasks
                .get(id)
                .map(|record| {
                    record.status.is_terminal()
                        && record.end_time.map(|end| end < cutoff).unwrap_or(false)
                })
                .unwrap_or(true);
            if expired {
                self.tasks.remove(id);
            }
            !expired
        });
    }

    /// Evict oldest terminal records until below the retention ceiling.
    fn evict_to_capacity(&self) {
        let mut order = self.order.lock();
        while self.tasks.len() >= self.retention {
            let position = order.iter().position(|id| {
                self.tasks
                    .get(id)
                    .map(|record| record.status.is_terminal())
                    .unwrap_or(true)
            });
            match position.and_then(|pos| order.remove(pos)) {
                Some(id) => {
                    log::debug!("evicting terminal task `{id}` at retention ceiling");
                    self.tasks.remove(&id);
                }
                // Every record is in flight; the ceiling may be exceeded.
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker(retention: usize) -> TaskTracker {
        TaskTracker::new(retention, Duration::from_secs(3600))
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let ledger = tracker(10);
        ledger.create("t1", Some("echo".to_string()), json!({})).unwrap();
        assert_eq!(ledger.get("t1").unwrap().status, SkillStatus::Pending);

        assert!(ledger.mark_running("t1"));
        assert!(ledger.complete("t1", json!({"text": "hi"}), 0.01));

        let record = ledger.get("t1").unwrap();
        assert_eq!(record.status, SkillStatus::Completed);
        assert!(record.end_time.is_some());
        assert_eq!(record.execution_time, Some(0.01));
    }

    #[test]
    fn test_duplicate_task_id_is_protocol_error() {
        let ledger = tracker(10);
        ledger.create("t1", None, json!({})).unwrap();
        let err = ledger.create("t1", None, json!({})).unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let ledger = tracker(10);
        ledger.create("t1", None, json!({})).unwrap();
        ledger.mark_running("t1");
        ledger.fail("t1", TaskError::new("boom", "handler"), 0.5);

        assert!(!ledger.complete("t1", json!({}), 1.0));
        assert!(!ledger.mark_running("t1"));
        assert!(!ledger.cancel("t1"));
        assert_eq!(ledger.get("t1").unwrap().status, SkillStatus::Failed);
    }

    #[test]
    fn test_no_backward_transitions() {
        let ledger = tracker(10);
        ledger.create("t1", None, json!({})).unwrap();
        ledger.mark_running("t1");
        // running -> running is not an edge
        assert!(!ledger.mark_running("t1"));
    }

    #[test]
    fn test_validation_failure_edge_pending_to_failed() {
        let ledger = tracker(10);
        ledger.create("t1", None, json!({})).unwrap();
        assert!(ledger.fail("t1", TaskError::new("bad input", "validation"), 0.0));
        assert_eq!(ledger.get("t1").unwrap().status, SkillStatus::Failed);
    }

    #[test]
    fn test_cancel_only_from_in_flight() {
        let ledger = tracker(10);
        ledger.create("t1", None, json!({})).unwrap();
        assert!(ledger.cancel("t1"));
        assert_eq!(ledger.get("t1").unwrap().status, SkillStatus::Cancelled);
        assert!(!ledger.cancel("t1"));
    }

    #[test]
    fn test_eviction_drops_oldest_terminal_only() {
        let ledger = tracker(3);
        ledger.create("t1", None, json!({})).unwrap();
        ledger.mark_running("t1");
        ledger.complete("t1", json!({}), 0.0);
        ledger.create("t2", None, json!({})).unwrap(); // stays pending
        ledger.create("t3", None, json!({})).unwrap();
        ledger.mark_running("t3");
        ledger.complete("t3", json!({}), 0.0);

        // At the ceiling; the oldest terminal record (t1) goes, t2 survives.
        ledger.create("t4", None, json!({})).unwrap();
        assert!(ledger.get("t1").is_none());
        assert!(ledger.get("t2").is_some());
        assert!(ledger.get("t3").is_some());
        assert!(ledger.get("t4").is_some());
    }

    #[test]
    fn test_in_flight_records_survive_pressure() {
        let ledger = tracker(2);
        ledger.create("t1", None, json!({})).unwrap();
        ledger.create("t2", None, json!({})).unwrap();
        // Ceiling reached with nothing terminal; creation still succeeds.
        ledger.create("t3", None, json!({})).unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger.get("t1").is_some());
    }

    #[test]
    fn test_ttl_sweep() {
        let ledger = TaskTracker::new(10, Duration::from_secs(0));
        ledger.create("t1", None, json!({})).unwrap();
        ledger.mark_running("t1");
        ledger.complete("t1", json!({}), 0.0);

        std::thread::sleep(Duration::from_millis(5));
        ledger.create("t2", None, json!({})).unwrap();
        assert!(ledger.get("t1").is_none());
        assert!(ledger.get("t2").is_some());
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let ledger = tracker(10);
        for id in ["a", "b", "c"] {
            ledger.create(id, None, json!({})).unwrap();
        }
        let ids: Vec<_> = ledger.list().into_iter().map(|r| r.task_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
