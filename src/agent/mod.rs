//! Agent runtime: lifecycle, task processing, and per-agent health.
//!
//! Grounded on the teacher's `agent::Agent`/`AgentStatus`/`ClaudeCodeAgent`
//! lifecycle shape, generalized from ccswarm's ad hoc status enum to the
//! closed `INITIALIZING|IDLE|BUSY|ERROR|STOPPED` lattice this spec requires.

pub mod manager;
pub mod task;

pub use task::{AgentType, Priority, Task, TaskResult, TaskStatus, TaskType};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::bus::{Message, MessageBuilder, MessageBus, MessageType};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    Idle,
    Busy,
    Error,
    Stopped,
}

// Manual Serialize/Deserialize so `AgentState` round-trips as the same
// SCREAMING_SNAKE_CASE strings used on the wire for `agent:status` messages,
// without pulling in `serde_repr` for a five-variant enum.
mod serde_impl {
    use super::AgentState;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for AgentState {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let s = match self {
                AgentState::Initializing => "INITIALIZING",
                AgentState::Idle => "IDLE",
                AgentState::Busy => "BUSY",
                AgentState::Error => "ERROR",
                AgentState::Stopped => "STOPPED",
            };
            serializer.serialize_str(s)
        }
    }

    impl<'de> Deserialize<'de> for AgentState {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            match s.as_str() {
                "INITIALIZING" => Ok(AgentState::Initializing),
                "IDLE" => Ok(AgentState::Idle),
                "BUSY" => Ok(AgentState::Busy),
                "ERROR" => Ok(AgentState::Error),
                "STOPPED" => Ok(AgentState::Stopped),
                other => Err(serde::de::Error::custom(format!("unknown agent state: {other}"))),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub healthy: bool,
    pub state: AgentState,
    pub last_task_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failure_rate: f64,
}

/// A stateful worker identified by `{id, type}`. Implementations provide
/// `handle_task`; lifecycle bookkeeping (status transitions, bus
/// subscriptions, health derivation) lives in [`BaseAgent`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;
    fn agent_type(&self) -> AgentType;

    async fn initialize(&self) -> Result<(), CoreError>;
    async fn start(&self) -> Result<(), CoreError>;
    async fn stop(&self, stop_timeout: Duration) -> Result<(), CoreError>;
    async fn process_task(&self, task: Task) -> Result<TaskResult, CoreError>;
    async fn health(&self) -> AgentHealth;
}

/// The actual task-type handler an agent realization supplies. Kept
/// separate from [`Agent`] so `BaseAgent` can own all the lifecycle
/// plumbing and just delegate the domain-specific work.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, CoreError>;
}

struct FailureWindow {
    outcomes: RwLock<std::collections::VecDeque<bool>>,
    capacity: usize,
}

impl FailureWindow {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: RwLock::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    async fn record(&self, success: bool) {
        let mut guard = self.outcomes.write().await;
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(success);
    }

    async fn failure_rate(&self) -> f64 {
        let guard = self.outcomes.read().await;
        if guard.is_empty() {
            return 0.0;
        }
        let failures = guard.iter().filter(|ok| !**ok).count();
        failures as f64 / guard.len() as f64
    }
}

/// Shared lifecycle/health bookkeeping for a concrete agent. Wraps a
/// [`TaskHandler`] with the INITIALIZING->IDLE->BUSY->{IDLE,ERROR}->STOPPED
/// state machine and bus event emission.
pub struct BaseAgent {
    id: String,
    agent_type: AgentType,
    state: RwLock<AgentState>,
    bus: MessageBus,
    handler: Arc<dyn TaskHandler>,
    failure_window: FailureWindow,
    last_task_at: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    failure_threshold: f64,
    tasks_processed: AtomicU32,
}

impl BaseAgent {
    pub fn new(
        id: impl Into<String>,
        agent_type: AgentType,
        bus: MessageBus,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type,
            state: RwLock::new(AgentState::Initializing),
            bus,
            handler,
            failure_window: FailureWindow::new(20),
            last_task_at: RwLock::new(None),
            failure_threshold: 0.5,
            tasks_processed: AtomicU32::new(0),
        }
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.write().await = state;
        let msg = MessageBuilder::new(MessageType::AgentStatus)
            .source(self.id.clone())
            .target("*")
            .payload(serde_json::json!({ "agentId": self.id, "state": state }))
            .build();
        self.bus.publish(msg).await;
    }

    pub fn tasks_processed(&self) -> u32 {
        self.tasks_processed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for BaseAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn initialize(&self) -> Result<(), CoreError> {
        info!(agent_id = %self.id, "initializing agent");
        self.set_state(AgentState::Idle).await;
        Ok(())
    }

    async fn start(&self) -> Result<(), CoreError> {
        // Idempotent: starting an already-live agent is a no-op.
        let state = *self.state.read().await;
        if state == AgentState::Initializing {
            self.initialize().await?;
        }
        Ok(())
    }

    async fn stop(&self, stop_timeout: Duration) -> Result<(), CoreError> {
        let state = *self.state.read().await;
        if state == AgentState::Stopped {
            return Ok(());
        }
        if state == AgentState::Busy {
            // Best-effort drain: give the in-flight task `stop_timeout` to
            // settle by simply waiting; a production agent would await its
            // task future directly.
            tokio::time::sleep(stop_timeout.min(Duration::from_secs(5))).await;
        }
        self.set_state(AgentState::Stopped).await;
        Ok(())
    }

    async fn process_task(&self, mut task: Task) -> Result<TaskResult, CoreError> {
        let start = Instant::now();

        task.transition(TaskStatus::InProgress)?;
        let status_msg = MessageBuilder::new(MessageType::TaskStatus)
            .source(self.id.clone())
            .target(task.id.clone())
            .payload(serde_json::json!({ "taskId": task.id, "status": "IN_PROGRESS" }))
            .build();
        self.bus.publish(status_msg).await;
        self.set_state(AgentState::Busy).await;

        if let Err(validation_err) = task.validate() {
            warn!(task_id = %task.id, "task failed validation: {validation_err}");
            task.transition(TaskStatus::Failed)?;
            let duration_ms = start.elapsed().as_millis() as u64;
            self.failure_window.record(false).await;
            self.set_state(AgentState::Idle).await;

            let result = TaskResult::failure(task.id.clone(), &validation_err, duration_ms);
            let result_msg = MessageBuilder::new(MessageType::TaskResult)
                .source(self.id.clone())
                .target(task.id.clone())
                .correlation_id(task.id.clone())
                .payload(serde_json::to_value(&result).unwrap_or(serde_json::Value::Null))
                .build();
            self.bus.publish(result_msg).await;
            return Ok(result);
        }

        let outcome = self.handler.handle(&task).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        *self.last_task_at.write().await = Some(chrono::Utc::now());
        self.tasks_processed.fetch_add(1, Ordering::SeqCst);

        let result = match outcome {
            Ok(data) => {
                task.transition(TaskStatus::Completed)?;
                self.failure_window.record(true).await;
                self.set_state(AgentState::Idle).await;
                TaskResult::success(task.id.clone(), data, duration_ms)
            }
            Err(err) => {
                task.transition(TaskStatus::Failed)?;
                self.failure_window.record(false).await;
                let failure_rate = self.failure_window.failure_rate().await;
                if failure_rate > self.failure_threshold {
                    self.set_state(AgentState::Error).await;
                } else {
                    self.set_state(AgentState::Idle).await;
                }
                TaskResult::failure(task.id.clone(), &err, duration_ms)
            }
        };

        let result_msg = MessageBuilder::new(MessageType::TaskResult)
            .source(self.id.clone())
            .target(task.id.clone())
            .correlation_id(task.id.clone())
            .payload(serde_json::to_value(&result).unwrap_or(serde_json::Value::Null))
            .build();
        self.bus.publish(result_msg).await;

        Ok(result)
    }

    async fn health(&self) -> AgentHealth {
        let state = *self.state.read().await;
        let failure_rate = self.failure_window.failure_rate().await;
        AgentHealth {
            healthy: matches!(state, AgentState::Idle | AgentState::Busy)
                && failure_rate <= self.failure_threshold,
            state,
            last_task_at: *self.last_task_at.read().await,
            failure_rate,
        }
    }
}
