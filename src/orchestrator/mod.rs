//! Orchestrator runner: owns the goal->workflow->task state machine, event
//! lifecycle, and idempotent start/stop.
//!
//! Grounded on the teacher's `orchestrator::MasterClaude` (goal/task
//! bookkeeping, status counters) — whose decomposer is explicitly a mock
//! single-task-per-goal stub, carried forward as this crate's default
//! [`decompose::SingleTaskDecomposer`] — and `workflow::graph` for the
//! dependency-graph shape now implemented in [`workflow`].

pub mod decompose;
pub mod goal;
pub mod workflow;

pub use decompose::{Decomposer, SingleTaskDecomposer};
pub use goal::{Goal, GoalOptions, GoalResult, GoalStatus, OnFailure};
pub use workflow::Workflow;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::manager::AgentManager;
use crate::bus::{MessageBuilder, MessageBus, MessageType};
use crate::error::CoreError;
use crate::resilience::{BreakerThresholds, CircuitBreakerRegistry, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The runner's "own observer interface" per §4.F — a typed lifecycle event
/// stream independent of the closed bus `MessageType` set.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Started,
    GoalStarted { goal_id: String },
    WorkflowStarted { goal_id: String, task_ids: Vec<String> },
    WorkflowCompleted { goal_id: String },
    GoalCompleted { goal_id: String, result: GoalResult },
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RunnerStats {
    pub status: RunnerState,
    pub goals_executed: u64,
    pub tasks_executed: u64,
    pub uptime_ms: u64,
}

pub enum GoalOutcome {
    Completed(GoalResult),
    Started { goal_id: String },
}

pub struct Orchestrator {
    state: RwLock<RunnerState>,
    bus: MessageBus,
    agent_manager: Arc<AgentManager>,
    breaker_registry: Arc<CircuitBreakerRegistry>,
    decomposer: Arc<dyn Decomposer>,
    events: broadcast::Sender<RunnerEvent>,
    /// Serializes goal execution bodies so goals run in FIFO submission
    /// order on a single execution cursor, per §4.F.
    execution_lock: Arc<Mutex<()>>,
    goals_executed: Arc<AtomicU64>,
    tasks_executed: Arc<AtomicU64>,
    started_at: RwLock<Option<Instant>>,
    /// Cancelled by `destroy()`; `run_goal_inner` checks this between
    /// dependency-graph rounds so in-flight goals wind down as CANCELLED
    /// instead of running to completion after shutdown.
    shutdown: CancellationToken,
    /// Handles for goals submitted with `wait_for_completion: false`, so
    /// `destroy()` can abort any still running.
    background_goals: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Orchestrator {
    pub fn new(bus: MessageBus, agent_manager: Arc<AgentManager>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(RunnerState::Created),
            bus,
            agent_manager,
            breaker_registry: Arc::new(CircuitBreakerRegistry::new()),
            decomposer: Arc::new(SingleTaskDecomposer::default()),
            events,
            execution_lock: Arc::new(Mutex::new(())),
            goals_executed: Arc::new(AtomicU64::new(0)),
            tasks_executed: Arc::new(AtomicU64::new(0)),
            started_at: RwLock::new(None),
            shutdown: CancellationToken::new(),
            background_goals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.send(event);
    }

    /// Idempotent: CREATED or STOPPED -> STARTING -> RUNNING.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if *state == RunnerState::Running {
            return Ok(());
        }
        *state = RunnerState::Starting;
        *self.started_at.write().await = Some(Instant::now());
        *state = RunnerState::Running;
        drop(state);
        info!("orchestrator started");
        self.emit(RunnerEvent::Started);
        Ok(())
    }

    /// Idempotent: RUNNING -> STOPPING -> STOPPED. Cancels in-flight goals:
    /// `run_goal_inner` observes `shutdown` between rounds and winds down as
    /// CANCELLED; any goal still running after that is hard-aborted.
    pub async fn destroy(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if *state == RunnerState::Stopped {
            return Ok(());
        }
        *state = RunnerState::Stopping;
        drop(state);

        self.shutdown.cancel();
        for handle in self.background_goals.lock().await.drain(..) {
            handle.abort();
        }

        self.agent_manager.cleanup().await;
        *self.state.write().await = RunnerState::Stopped;
        info!("orchestrator stopped");
        self.emit(RunnerEvent::Stopped);
        Ok(())
    }

    pub async fn get_stats(&self) -> RunnerStats {
        let uptime_ms = self
            .started_at
            .read()
            .await
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        RunnerStats {
            status: *self.state.read().await,
            goals_executed: self.goals_executed.load(Ordering::SeqCst),
            tasks_executed: self.tasks_executed.load(Ordering::SeqCst),
            uptime_ms,
        }
    }

    /// Enters a goal into the FIFO queue. Per §4.F step 6, a
    /// `wait_for_completion: false` goal runs to completion in the
    /// background (still under the single execution cursor) while this call
    /// returns immediately with `GoalOutcome::Started`.
    pub async fn execute_goal(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        options: GoalOptions,
    ) -> Result<GoalOutcome, CoreError> {
        let wait = options.wait_for_completion;
        let goal = Goal::new(title, description, options);
        let goal_id = goal.id.clone();

        if wait {
            let result = self.clone_handles().run_goal_inner(goal).await?;
            Ok(GoalOutcome::Completed(result))
        } else {
            let handles = self.clone_handles();
            let join = tokio::spawn(async move {
                let _ = handles.run_goal_inner(goal).await;
            });
            self.background_goals.lock().await.push(join);
            Ok(GoalOutcome::Started { goal_id })
        }
    }

    /// Shallow clone of the `Arc`-backed handles needed to run a goal from a
    /// detached task (the runner itself is not `Clone`; its lifecycle state
    /// is intentionally singular).
    fn clone_handles(&self) -> OrchestratorHandles {
        OrchestratorHandles {
            bus: self.bus.clone(),
            agent_manager: self.agent_manager.clone(),
            breaker_registry: self.breaker_registry.clone(),
            decomposer: self.decomposer.clone(),
            events: self.events.clone(),
            execution_lock: self.execution_lock.clone(),
            goals_executed: self.goals_executed.clone(),
            tasks_executed: self.tasks_executed.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Everything a goal execution needs that outlives a single `Orchestrator`
/// borrow, so the body can run from a detached `tokio::spawn`.
struct OrchestratorHandles {
    bus: MessageBus,
    agent_manager: Arc<AgentManager>,
    breaker_registry: Arc<CircuitBreakerRegistry>,
    decomposer: Arc<dyn Decomposer>,
    events: broadcast::Sender<RunnerEvent>,
    execution_lock: Arc<Mutex<()>>,
    goals_executed: Arc<AtomicU64>,
    tasks_executed: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl OrchestratorHandles {
    async fn run_goal_inner(&self, mut goal: Goal) -> Result<GoalResult, CoreError> {
        let _serialize = self.execution_lock.lock().await;
        let start = Instant::now();
        let goal_id = goal.id.clone();
        goal.status = GoalStatus::Running;

        let _ = self.events.send(RunnerEvent::GoalStarted { goal_id: goal_id.clone() });
        self.bus
            .publish(
                MessageBuilder::new(MessageType::SystemHealth)
                    .source("orchestrator")
                    .target("*")
                    .payload(serde_json::json!({ "event": "goal:started", "goalId": goal_id }))
                    .build(),
            )
            .await;

        let tasks = self.decomposer.decompose(&goal.description).await?;
        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let mut workflow = Workflow::new(goal_id.clone(), tasks)?;

        let _ = self.events.send(RunnerEvent::WorkflowStarted {
            goal_id: goal_id.clone(),
            task_ids: task_ids.clone(),
        });

        while !workflow.all_terminal() {
            if self.shutdown.is_cancelled() {
                workflow.cancel_remaining();
                break;
            }

            let ready: Vec<_> = workflow.ready_tasks().into_iter().cloned().collect();
            if ready.is_empty() {
                break;
            }

            let mut handles = Vec::new();
            for task in ready {
                let agent_type = task.agent_type;
                let agent_manager = self.agent_manager.clone();
                let registry = self.breaker_registry.clone();
                let bus = self.bus.clone();
                handles.push(tokio::spawn(async move {
                    let task_id = task.id.clone();
                    let envelope = crate::resilience::with_recovery(
                        vec![
                            Strategy::Timeout(Duration::from_secs(60)),
                            Strategy::Retry(crate::resilience::RetryConfig::default()),
                            Strategy::CircuitBreaker {
                                name: format!("agent:{agent_type:?}"),
                                thresholds: BreakerThresholds::default(),
                                registry,
                            },
                        ],
                        move || {
                            let agent_manager = agent_manager.clone();
                            let task = task.clone();
                            async move { agent_manager.process(task).await }
                        },
                    )
                    .await;

                    let status_event = if envelope.success { "completed" } else { "failed" };
                    bus.publish(
                        MessageBuilder::new(MessageType::TaskStatus)
                            .source("orchestrator")
                            .target(task_id.clone())
                            .payload(serde_json::json!({ "taskId": task_id, "status": status_event }))
                            .build(),
                    )
                    .await;

                    (task_id, envelope)
                }));
            }

            if self.shutdown.is_cancelled() {
                for handle in handles {
                    handle.abort();
                }
                workflow.cancel_remaining();
                break;
            }

            for handle in handles {
                if let Ok((task_id, envelope)) = handle.await {
                    self.tasks_executed.fetch_add(1, Ordering::SeqCst);
                    let next_status = if envelope.success {
                        crate::agent::TaskStatus::Completed
                    } else {
                        crate::agent::TaskStatus::Failed
                    };
                    if let Some(task) = workflow.task_mut(&task_id) {
                        let _ = task.transition(next_status);
                    }
                    if !envelope.success && goal.options.on_failure == OnFailure::FailFast {
                        workflow.cancel_remaining();
                    } else if !envelope.success && goal.options.on_failure == OnFailure::RetryTask {
                        if let Some(task) = workflow.task_mut(&task_id) {
                            let _ = task.retry();
                        }
                    }
                }
            }
        }

        let _ = self.events.send(RunnerEvent::WorkflowCompleted { goal_id: goal_id.clone() });
        self.bus
            .publish(
                MessageBuilder::new(MessageType::SystemHealth)
                    .source("orchestrator")
                    .target("*")
                    .payload(serde_json::json!({ "event": "workflow:completed", "goalId": goal_id }))
                    .build(),
            )
            .await;

        let cancelled = self.shutdown.is_cancelled();
        let completed_tasks = workflow.completed_count();
        let failed_tasks = workflow.failed_count();
        let result = GoalResult {
            goal_id: goal_id.clone(),
            success: !cancelled && failed_tasks == 0,
            completed_tasks,
            failed_tasks,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        goal.status = if cancelled {
            GoalStatus::Cancelled
        } else if result.success {
            GoalStatus::Completed
        } else {
            GoalStatus::Failed
        };
        self.goals_executed.fetch_add(1, Ordering::SeqCst);

        let _ = self.events.send(RunnerEvent::GoalCompleted {
            goal_id: goal_id.clone(),
            result: result.clone(),
        });

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentType, BaseAgent, Task, TaskHandler};
    use async_trait::async_trait;

    struct AlwaysSucceed;

    #[async_trait]
    impl TaskHandler for AlwaysSucceed {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, CoreError> {
            Ok(serde_json::json!({ "done": true }))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl TaskHandler for SlowHandler {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, CoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!({ "done": true }))
        }
    }

    #[tokio::test]
    async fn destroy_aborts_in_flight_background_goal_without_hanging() {
        let bus = MessageBus::new();
        let manager = Arc::new(AgentManager::new());
        let agent = Arc::new(BaseAgent::new("coder-1", AgentType::Coder, bus.clone(), Arc::new(SlowHandler)));
        agent.initialize().await.unwrap();
        manager.register(agent).await.unwrap();

        let orchestrator = Orchestrator::new(bus, manager);
        orchestrator.start().await.unwrap();

        let mut options = GoalOptions::default();
        options.wait_for_completion = false;
        let outcome = orchestrator.execute_goal("Hello", "stub", options).await.unwrap();
        assert!(matches!(outcome, GoalOutcome::Started { .. }));

        tokio::time::timeout(Duration::from_secs(1), orchestrator.destroy())
            .await
            .expect("destroy must not hang waiting on the in-flight goal")
            .unwrap();
        assert_eq!(orchestrator.get_stats().await.status, RunnerState::Stopped);
    }

    #[tokio::test]
    async fn start_and_destroy_are_idempotent() {
        let bus = MessageBus::new();
        let manager = Arc::new(AgentManager::new());
        let orchestrator = Orchestrator::new(bus, manager);
        orchestrator.start().await.unwrap();
        orchestrator.start().await.unwrap();
        orchestrator.destroy().await.unwrap();
        orchestrator.destroy().await.unwrap();
        assert_eq!(orchestrator.get_stats().await.status, RunnerState::Stopped);
    }

    #[tokio::test]
    async fn end_to_end_goal_emits_events_in_strict_order_and_succeeds() {
        let bus = MessageBus::new();
        let manager = Arc::new(AgentManager::new());
        let agent = Arc::new(BaseAgent::new("coder-1", AgentType::Coder, bus.clone(), Arc::new(AlwaysSucceed)));
        agent.initialize().await.unwrap();
        manager.register(agent).await.unwrap();

        let orchestrator = Orchestrator::new(bus, manager);
        let mut events = orchestrator.subscribe_events();
        orchestrator.start().await.unwrap();

        let outcome = orchestrator
            .execute_goal("Hello", "stub", GoalOptions::default())
            .await
            .unwrap();

        let result = match outcome {
            GoalOutcome::Completed(r) => r,
            GoalOutcome::Started { .. } => panic!("expected synchronous completion"),
        };
        assert!(result.success);
        assert!(result.completed_tasks >= 1);
        assert_eq!(result.failed_tasks, 0);

        let mut observed = Vec::new();
        while let Ok(event) = events.try_recv() {
            observed.push(match event {
                RunnerEvent::Started => "started",
                RunnerEvent::GoalStarted { .. } => "goal:started",
                RunnerEvent::WorkflowStarted { .. } => "workflow:started",
                RunnerEvent::WorkflowCompleted { .. } => "workflow:completed",
                RunnerEvent::GoalCompleted { .. } => "goal:completed",
                RunnerEvent::Stopped => "stopped",
            });
        }
        assert_eq!(
            observed,
            vec!["started", "goal:started", "workflow:started", "workflow:completed", "goal:completed"]
        );
    }
}
