//! Task, TaskStatus, TaskResult data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Analyze,
    Implement,
    Review,
    Test,
    Document,
    Delegate,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Planner,
    Coder,
    Reviewer,
    Tester,
    Architect,
    RepoManager,
    DocWriter,
    Explorer,
    Librarian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Enforces the monotonic lattice `PENDING -> IN_PROGRESS ->
    /// {COMPLETED, FAILED, CANCELLED}`; terminal statuses are final.
    pub fn transition_to(self, next: TaskStatus) -> Result<TaskStatus, CoreError> {
        use TaskStatus::*;
        let allowed = matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        );
        if allowed {
            Ok(next)
        } else {
            Err(CoreError::validation(format!(
                "illegal task status transition {self:?} -> {next:?}"
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub created_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub retry_count: u32,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            correlation_id: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub agent_type: AgentType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub metadata: TaskMetadata,
    /// Ids of tasks this one depends on (workflow edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Task {
    /// Bound on `OnFailure::RetryTask` re-admissions per task.
    pub const MAX_RETRIES: u32 = 3;

    pub fn new(task_type: TaskType, agent_type: AgentType, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type,
            agent_type,
            priority: Priority::default(),
            status: TaskStatus::Pending,
            payload,
            metadata: TaskMetadata::default(),
            depends_on: Vec::new(),
        }
    }

    /// Required-field + whitelist-type validation: failures map to
    /// `VALIDATION_ERROR`, non-retryable.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::validation("task id must not be empty"));
        }
        if self.payload.is_null() {
            return Err(CoreError::validation("task payload must not be null"));
        }
        if !Self::agent_type_allowed(self.task_type, self.agent_type) {
            return Err(CoreError::validation(format!(
                "agent type {:?} is not in the whitelist for task type {:?}",
                self.agent_type, self.task_type
            )));
        }
        Ok(())
    }

    /// The closed set of agent types each task type may be routed to.
    fn agent_type_allowed(task_type: TaskType, agent_type: AgentType) -> bool {
        use AgentType::*;
        match task_type {
            TaskType::Analyze => matches!(agent_type, Planner | Architect | Explorer),
            TaskType::Implement => matches!(agent_type, Coder),
            TaskType::Review => matches!(agent_type, Reviewer | Coder),
            TaskType::Test => matches!(agent_type, Tester),
            TaskType::Document => matches!(agent_type, DocWriter),
            TaskType::Delegate => matches!(agent_type, Planner),
            TaskType::Generic => true,
        }
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        self.status = self.status.transition_to(next)?;
        Ok(())
    }

    /// Re-admits a `FAILED` task to `PENDING` for another attempt, bounded by
    /// `MAX_RETRIES`. Returns `false` (task left `FAILED`) once the budget is
    /// exhausted, so a caller's `OnFailure::RetryTask` policy degrades to a
    /// terminal failure rather than retrying forever.
    pub fn retry(&mut self) -> Result<bool, CoreError> {
        if self.status != TaskStatus::Failed {
            return Err(CoreError::validation(format!(
                "cannot retry task '{}' in status {:?}",
                self.id, self.status
            )));
        }
        if self.metadata.retry_count >= Self::MAX_RETRIES {
            return Ok(false);
        }
        self.metadata.retry_count += 1;
        self.status = TaskStatus::Pending;
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl TaskErrorInfo {
    pub fn from_core_error(err: &CoreError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<TaskErrorInfo>,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(task_id: impl Into<String>, err: &CoreError, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            success: false,
            data: None,
            error: Some(TaskErrorInfo::from_core_error(err)),
            duration_ms,
        }
    }

    pub fn cancelled(task_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Cancelled,
            success: false,
            data: None,
            error: None,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lattice_rejects_backward_transitions() {
        assert!(TaskStatus::Pending.transition_to(TaskStatus::InProgress).is_ok());
        assert!(TaskStatus::Completed.transition_to(TaskStatus::Pending).is_err());
        assert!(TaskStatus::Failed.transition_to(TaskStatus::InProgress).is_err());
    }

    #[test]
    fn terminal_statuses_are_final() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn validate_rejects_agent_type_outside_whitelist() {
        let mut task = Task::new(TaskType::Test, AgentType::DocWriter, serde_json::json!({"x": 1}));
        assert!(task.validate().is_err());
        task.agent_type = AgentType::Tester;
        assert!(task.validate().is_ok());
    }

    #[test]
    fn validate_rejects_null_payload() {
        let task = Task::new(TaskType::Generic, AgentType::Coder, serde_json::Value::Null);
        assert!(task.validate().is_err());
    }

    #[test]
    fn retry_re_admits_failed_task_until_budget_exhausted() {
        let mut task = Task::new(TaskType::Generic, AgentType::Coder, serde_json::json!({}));
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Failed).unwrap();

        for _ in 0..Task::MAX_RETRIES {
            assert!(task.retry().unwrap());
            assert_eq!(task.status, TaskStatus::Pending);
            task.transition(TaskStatus::InProgress).unwrap();
            task.transition(TaskStatus::Failed).unwrap();
        }

        assert!(!task.retry().unwrap());
        assert_eq!(task.status, TaskStatus::Failed);
    }
}
