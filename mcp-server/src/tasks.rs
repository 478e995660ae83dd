use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use cde_core::error::{CdeError, Result};
use router::CancelToken;

/// Lifecycle of a delegated background task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// One delegated task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub description: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

struct TaskSlot {
    record: TaskRecord,
    cancel: CancelToken,
}

/// In-memory registry of delegated tasks.
///
/// Each entry owns the cancel token of its running work, so `cancel`
/// actually propagates: the running routing call observes the token at its
/// next suspension point and winds down.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Uuid, TaskSlot>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running task; returns its id and the token the
    /// runner must observe.
    pub fn register(&self, description: &str, task_type: &str) -> (Uuid, CancelToken) {
        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let now = Utc::now();
        let record = TaskRecord {
            id,
            description: description.to_string(),
            task_type: task_type.to_string(),
            status: TaskStatus::Running,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        };
        self.tasks.lock().expect("task registry poisoned").insert(
            id,
            TaskSlot {
                record,
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    fn update<F: FnOnce(&mut TaskRecord)>(&self, id: &Uuid, apply: F) {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        if let Some(slot) = tasks.get_mut(id) {
            if !slot.record.status.is_terminal() {
                apply(&mut slot.record);
                slot.record.updated_at = Utc::now();
            }
        }
    }

    /// Record a successful completion
    pub fn complete(&self, id: &Uuid, result: Value) {
        self.update(id, |record| {
            record.status = TaskStatus::Completed;
            record.result = Some(result);
        });
    }

    /// Record a failure (or a cancellation, when the error says so)
    pub fn fail(&self, id: &Uuid, error: &CdeError) {
        self.update(id, |record| {
            record.status = if error.is_cancelled() {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Failed
            };
            record.error = Some(error.to_payload());
        });
    }

    /// Snapshot one task
    pub fn status(&self, id: &Uuid) -> Result<TaskRecord> {
        let tasks = self.tasks.lock().expect("task registry poisoned");
        tasks
            .get(id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| CdeError::NotFound(format!("Task '{id}' not found")))
    }

    /// Snapshot every non-terminal task, oldest first
    pub fn list_active(&self) -> Vec<TaskRecord> {
        let tasks = self.tasks.lock().expect("task registry poisoned");
        let mut active: Vec<TaskRecord> = tasks
            .values()
            .filter(|slot| !slot.record.status.is_terminal())
            .map(|slot| slot.record.clone())
            .collect();
        active.sort_by_key(|record| record.created_at);
        active
    }

    /// Cancel a running task. The token fires immediately; the runner
    /// observes it at its next suspension point.
    pub fn cancel(&self, id: &Uuid) -> Result<TaskRecord> {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        let slot = tasks
            .get_mut(id)
            .ok_or_else(|| CdeError::NotFound(format!("Task '{id}' not found")))?;
        if slot.record.status.is_terminal() {
            return Err(CdeError::Validation(format!(
                "Task '{id}' already finished"
            )));
        }
        slot.cancel.cancel();
        slot.record.status = TaskStatus::Cancelled;
        slot.record.updated_at = Utc::now();
        slot.record.error = Some(json!({
            "error": true,
            "message": "Cancelled by caller",
            "recoverable": false,
            "code": "E400",
        }));
        Ok(slot.record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_complete() {
        let registry = TaskRegistry::new();
        let (id, _cancel) = registry.register("do work", "feature");
        assert_eq!(registry.list_active().len(), 1);

        registry.complete(&id, json!({"ok": true}));
        let record = registry.status(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(registry.list_active().is_empty());
    }

    #[test]
    fn test_cancel_fires_token_and_marks_record() {
        let registry = TaskRegistry::new();
        let (id, cancel) = registry.register("long work", "feature");
        assert!(!cancel.is_cancelled());

        let record = registry.cancel(&id).unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(record.status, TaskStatus::Cancelled);

        // A late failure report cannot overwrite the terminal state
        registry.fail(&id, &CdeError::transport("gemini", "late"));
        assert_eq!(registry.status(&id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancel_unknown_task() {
        let registry = TaskRegistry::new();
        let err = registry.cancel(&Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_fail_with_cancellation_error() {
        let registry = TaskRegistry::new();
        let (id, _cancel) = registry.register("w", "feature");
        registry.fail(&id, &CdeError::Cancelled("timeout".to_string()));
        assert_eq!(registry.status(&id).unwrap().status, TaskStatus::Cancelled);
    }
}
