//! End-to-end scenarios spanning bus, resilience kernel, and orchestrator.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use swarmcore::agent::{Agent, AgentType, BaseAgent, Task, TaskHandler};
use swarmcore::agent::manager::AgentManager;
use swarmcore::bus::{MessageBuilder, MessageBus, MessageType};
use swarmcore::error::CoreError;
use swarmcore::orchestrator::{GoalOptions, GoalOutcome, Orchestrator, RunnerEvent};
use swarmcore::resilience::{
    with_recovery, Backoff, BreakerThresholds, CircuitBreakerRegistry, RetryConfig, Strategy,
};

#[tokio::test]
async fn publish_subscribe_delivers_matching_message() {
    let bus = MessageBus::new();
    let received = Arc::new(tokio::sync::Mutex::new(None));
    let received_clone = received.clone();
    bus.on(MessageType::TaskSubmit, move |m| {
        let received = received_clone.clone();
        async move {
            *received.lock().await = Some(m.payload);
        }
    })
    .await;

    bus.publish(
        MessageBuilder::new(MessageType::TaskSubmit)
            .payload(serde_json::json!({ "job": "build" }))
            .build(),
    )
    .await;

    assert_eq!(*received.lock().await, Some(serde_json::json!({ "job": "build" })));
}

#[tokio::test]
async fn request_response_correlates_by_id() {
    let bus = MessageBus::new();
    let bus_responder = bus.clone();
    bus.on(MessageType::TaskSubmit, move |m| {
        let bus = bus_responder.clone();
        async move {
            bus.publish(
                MessageBuilder::new(MessageType::TaskResult)
                    .correlation_id(m.id)
                    .payload(serde_json::json!({ "ack": true }))
                    .build(),
            )
            .await;
        }
    })
    .await;

    let request = MessageBuilder::new(MessageType::TaskSubmit).build();
    let response = bus.request(request, 2_000).await.unwrap();
    assert_eq!(response.payload, serde_json::json!({ "ack": true }));
}

#[tokio::test]
async fn request_without_a_responder_times_out() {
    let bus = MessageBus::new();
    let result = bus.request(MessageBuilder::new(MessageType::TaskSubmit).build(), 50).await;
    assert!(matches!(result, Err(CoreError::Timeout { .. })));
}

#[tokio::test]
async fn retry_exhausts_and_reports_attempts() {
    let envelope: swarmcore::resilience::RecoveryEnvelope<()> = with_recovery(
        vec![Strategy::Retry(RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
            jitter: 0.0,
            ..Default::default()
        })],
        || async { Err(CoreError::NotConnected) },
    )
    .await;

    assert!(!envelope.success);
    assert_eq!(envelope.attempts, 4);
}

#[tokio::test]
async fn circuit_opens_after_threshold_then_half_opens_and_closes() {
    let registry = Arc::new(CircuitBreakerRegistry::new());
    let thresholds = BreakerThresholds {
        failure_threshold: 2,
        success_threshold: 1,
        open_timeout: Duration::from_millis(30),
    };
    let breaker = registry.get_or_create("flaky-service", thresholds);

    for _ in 0..2 {
        let _ = breaker.call(|| async { Err::<(), _>(CoreError::internal("down")) }).await;
    }
    let blocked = breaker.call(|| async { Ok::<_, CoreError>(()) }).await;
    assert!(matches!(blocked, Err(CoreError::CircuitOpen { .. })));

    tokio::time::sleep(Duration::from_millis(40)).await;
    let recovered = breaker.call(|| async { Ok::<_, CoreError>(()) }).await;
    assert!(recovered.is_ok());
}

struct AlwaysSucceed {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for AlwaysSucceed {
    async fn handle(&self, _task: &Task) -> Result<serde_json::Value, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "ok": true }))
    }
}

#[tokio::test]
async fn end_to_end_goal_execution_emits_ordered_lifecycle_and_succeeds() {
    let bus = MessageBus::new();
    let calls = Arc::new(AtomicU32::new(0));
    let handler = Arc::new(AlwaysSucceed { calls: calls.clone() });
    let agent = Arc::new(BaseAgent::new("coder-1", AgentType::Coder, bus.clone(), handler));
    agent.initialize().await.unwrap();

    let manager = Arc::new(AgentManager::new());
    manager.register(agent).await.unwrap();

    let orchestrator = Orchestrator::new(bus, manager);
    let mut events = orchestrator.subscribe_events();
    orchestrator.start().await.unwrap();

    let outcome = orchestrator
        .execute_goal("Ship feature", "implement the thing", GoalOptions::default())
        .await
        .unwrap();

    let result = match outcome {
        GoalOutcome::Completed(r) => r,
        GoalOutcome::Started { .. } => panic!("expected synchronous completion with wait_for_completion=true"),
    };
    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        order.push(match event {
            RunnerEvent::Started => "started",
            RunnerEvent::GoalStarted { .. } => "goal:started",
            RunnerEvent::WorkflowStarted { .. } => "workflow:started",
            RunnerEvent::WorkflowCompleted { .. } => "workflow:completed",
            RunnerEvent::GoalCompleted { .. } => "goal:completed",
            RunnerEvent::Stopped => "stopped",
        });
    }
    assert_eq!(
        order,
        vec!["started", "goal:started", "workflow:started", "workflow:completed", "goal:completed"]
    );

    orchestrator.destroy().await.unwrap();
}
