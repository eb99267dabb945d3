//! Agent manager: id + type-indexed registry, round-robin routing, health
//! aggregation. Grounded on the teacher's `agent::AgentManager` /
//! `agent::pool::AgentPool` registry shape, generalized to the
//! round-robin-per-type cursor policy this spec requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::agent::{Agent, AgentHealth, AgentState, AgentType, Task, TaskResult};
use crate::error::CoreError;

struct TypeIndex {
    /// Agent ids of this type, in registration order.
    ids: RwLock<Vec<String>>,
    cursor: AtomicUsize,
}

impl TypeIndex {
    fn new() -> Self {
        Self {
            ids: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

/// Owns the registry of live agents, indexed by id (unique, invariant 5 in
/// §3) and by type for round-robin routing.
pub struct AgentManager {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    by_type: RwLock<HashMap<AgentType, Arc<TypeIndex>>>,
}

impl Default for AgentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentManager {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<(), CoreError> {
        let id = agent.id().to_string();
        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return Err(CoreError::validation(format!(
                "agent id '{id}' is already registered"
            )));
        }
        let agent_type = agent.agent_type();
        agents.insert(id.clone(), agent);
        drop(agents);

        let mut by_type = self.by_type.write().await;
        let index = by_type.entry(agent_type).or_insert_with(|| Arc::new(TypeIndex::new()));
        index.ids.write().await.push(id);
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Result<(), CoreError> {
        let agent = {
            let mut agents = self.agents.write().await;
            agents.remove(id)
        };
        let Some(agent) = agent else {
            return Err(CoreError::validation(format!("unknown agent id '{id}'")));
        };
        // Best-effort stop: individual failures never block teardown.
        let _ = agent.stop(Duration::from_secs(5)).await;

        let agent_type = agent.agent_type();
        if let Some(index) = self.by_type.read().await.get(&agent_type) {
            index.ids.write().await.retain(|existing| existing != id);
        }
        Ok(())
    }

    pub async fn start(&self, id: &str) -> Result<(), CoreError> {
        let agent = self.get(id).await?;
        agent.start().await
    }

    pub async fn stop(&self, id: &str) -> Result<(), CoreError> {
        let agent = self.get(id).await?;
        agent.stop(Duration::from_secs(30)).await
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Agent>, CoreError> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::validation(format!("unknown agent id '{id}'")))
    }

    /// Selects an IDLE agent of `agent_type` via a cursor advanced after
    /// each successful route; if the candidate under the cursor is
    /// non-IDLE, the cursor advances to the next IDLE peer of the same
    /// type. Fails with `NoAvailableAgent` if none are IDLE.
    pub async fn route_task(&self, agent_type: AgentType) -> Result<String, CoreError> {
        let index = {
            let by_type = self.by_type.read().await;
            by_type
                .get(&agent_type)
                .cloned()
                .ok_or_else(|| CoreError::no_available_agent(format!("{agent_type:?}")))?
        };

        let ids = index.ids.read().await.clone();
        if ids.is_empty() {
            return Err(CoreError::no_available_agent(format!("{agent_type:?}")));
        }

        let agents = self.agents.read().await;
        let len = ids.len();
        for _ in 0..len {
            let cursor = index.cursor.fetch_add(1, Ordering::SeqCst) % len;
            let candidate_id = &ids[cursor];
            if let Some(agent) = agents.get(candidate_id) {
                if agent.health().await.state == AgentState::Idle {
                    return Ok(candidate_id.clone());
                }
            }
        }
        Err(CoreError::no_available_agent(format!("{agent_type:?}")))
    }

    /// Routes and dispatches `task` in one call, returning the result.
    pub async fn process(&self, task: Task) -> Result<TaskResult, CoreError> {
        let agent_id = self.route_task(task.agent_type).await?;
        let agent = self.get(&agent_id).await?;
        agent.process_task(task).await
    }

    pub async fn get_agent_health(&self, id: &str) -> Result<AgentHealth, CoreError> {
        let agent = self.get(id).await?;
        Ok(agent.health().await)
    }

    pub async fn get_all_agent_status(&self) -> HashMap<String, AgentState> {
        let agents = self.agents.read().await;
        let mut out = HashMap::new();
        for (id, agent) in agents.iter() {
            out.insert(id.clone(), agent.health().await.state);
        }
        out
    }

    /// Stops all agents, swallowing individual failures so one bad agent
    /// cannot block teardown.
    pub async fn cleanup(&self) {
        let ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.unregister(&id).await {
                tracing::warn!(agent_id = %id, error = %e, "cleanup failed to unregister agent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{BaseAgent, TaskHandler, TaskType};
    use crate::bus::MessageBus;
    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, task: &Task) -> Result<serde_json::Value, CoreError> {
            Ok(task.payload.clone())
        }
    }

    async fn idle_agent(id: &str, bus: MessageBus) -> Arc<dyn Agent> {
        let agent = Arc::new(BaseAgent::new(id, AgentType::Coder, bus, Arc::new(EchoHandler)));
        agent.initialize().await.unwrap();
        agent
    }

    #[tokio::test]
    async fn register_rejects_duplicate_id() {
        let manager = AgentManager::new();
        let bus = MessageBus::new();
        manager.register(idle_agent("dup", bus.clone()).await).await.unwrap();
        let result = manager.register(idle_agent("dup", bus).await).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn route_task_fails_with_no_available_agent_when_empty() {
        let manager = AgentManager::new();
        let result = manager.route_task(AgentType::Coder).await;
        assert!(matches!(result, Err(CoreError::NoAvailableAgent { .. })));
    }

    #[tokio::test]
    async fn route_task_round_robins_over_k_idle_agents() {
        let manager = AgentManager::new();
        let bus = MessageBus::new();
        for i in 0..3 {
            manager
                .register(idle_agent(&format!("coder-{i}"), bus.clone()).await)
                .await
                .unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let id = manager.route_task(AgentType::Coder).await.unwrap();
            seen.insert(id);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_swallows_individual_unregister_failures() {
        let manager = AgentManager::new();
        let bus = MessageBus::new();
        manager.register(idle_agent("a", bus).await).await.unwrap();
        manager.cleanup().await;
        assert!(manager.get_all_agent_status().await.is_empty());
    }
}
