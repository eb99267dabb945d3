//! Goal: the top-level objective submitted to the runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    FailFast,
    ContinueRemaining,
    RetryTask,
}

impl Default for OnFailure {
    fn default() -> Self {
        // Recommended default per Design Note "failure policy defaults".
        OnFailure::ContinueRemaining
    }
}

#[derive(Debug, Clone)]
pub struct GoalOptions {
    pub priority: Priority,
    pub wait_for_completion: bool,
    pub timeout_ms: Option<u64>,
    pub on_failure: OnFailure,
}

impl Default for GoalOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            wait_for_completion: true,
            timeout_ms: None,
            on_failure: OnFailure::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

pub struct Goal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub options: GoalOptions,
    pub created_at: DateTime<Utc>,
    pub status: GoalStatus,
}

impl Goal {
    pub fn new(title: impl Into<String>, description: impl Into<String>, options: GoalOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            options,
            created_at: Utc::now(),
            status: GoalStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalResult {
    pub goal_id: String,
    pub success: bool,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_duration_ms: u64,
}
