//! Goal decomposition. The source (and this crate's default) contains a
//! mock decomposer that produces a single task per goal, per Design Note
//! "Open question — goal decomposition semantics"; a planner-agent-backed
//! implementation is left to callers via the [`Decomposer`] trait.

use async_trait::async_trait;

use crate::agent::{AgentType, Task, TaskType};
use crate::error::CoreError;

#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, description: &str) -> Result<Vec<Task>, CoreError>;
}

pub struct SingleTaskDecomposer {
    pub agent_type: AgentType,
}

impl Default for SingleTaskDecomposer {
    fn default() -> Self {
        Self { agent_type: AgentType::Coder }
    }
}

#[async_trait]
impl Decomposer for SingleTaskDecomposer {
    async fn decompose(&self, description: &str) -> Result<Vec<Task>, CoreError> {
        Ok(vec![Task::new(
            TaskType::Generic,
            self.agent_type,
            serde_json::json!({ "description": description }),
        )])
    }
}
