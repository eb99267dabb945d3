//! Workflow: a dependency graph of tasks derived from a goal. Grounded on
//! the teacher's `workflow::graph::Workflow` (node lookup, successors,
//! validate()) generalized to task-node dependency validation.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::agent::{Task, TaskStatus};
use crate::error::CoreError;

pub struct Workflow {
    pub goal_id: String,
    tasks: HashMap<String, Task>,
    /// Insertion order, preserved for deterministic ready-task iteration.
    order: Vec<String>,
}

impl Workflow {
    /// Builds a workflow from tasks, validating that dependency edges
    /// reference existing nodes and that the graph is acyclic (Kahn's
    /// algorithm).
    pub fn new(goal_id: impl Into<String>, tasks: Vec<Task>) -> Result<Self, CoreError> {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for task in tasks {
            if map.contains_key(&task.id) {
                return Err(CoreError::validation(format!("duplicate task id '{}'", task.id)));
            }
            order.push(task.id.clone());
            map.insert(task.id.clone(), task);
        }

        for task in map.values() {
            for dep in &task.depends_on {
                if !map.contains_key(dep) {
                    return Err(CoreError::validation(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    )));
                }
            }
        }

        let workflow = Self { goal_id: goal_id.into(), tasks: map, order };
        workflow.assert_acyclic()?;
        Ok(workflow)
    }

    fn assert_acyclic(&self) -> Result<(), CoreError> {
        let mut in_degree: HashMap<&str, usize> = self
            .tasks
            .keys()
            .map(|id| (id.as_str(), 0))
            .collect();
        // in_degree[t] = number of dependencies of t still unresolved.
        for task in self.tasks.values() {
            *in_degree.get_mut(task.id.as_str()).unwrap() = task.depends_on.len();
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in self.tasks.values() {
            for dep in &task.depends_on {
                successors.entry(dep.as_str()).or_default().push(task.id.as_str());
            }
        }

        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(succs) = successors.get(id) {
                for succ in succs {
                    let entry = in_degree.get_mut(succ).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }

        if visited != self.tasks.len() {
            return Err(CoreError::validation("workflow dependency graph contains a cycle"));
        }
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn task_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks with no unmet dependency whose status is still `PENDING`.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on
                    .iter()
                    .all(|dep| self.tasks.get(dep).map(|d| d.status.is_terminal()).unwrap_or(false))
            })
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == TaskStatus::Completed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
            .count()
    }

    /// Direct dependents of `id` (for unblock propagation after completion).
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.tasks
            .values()
            .filter(|t| t.depends_on.iter().any(|d| d == id))
            .map(|t| t.id.as_str())
            .collect()
    }

    pub fn cancel_remaining(&mut self) {
        for task in self.tasks.values_mut() {
            if !task.status.is_terminal() {
                let _ = task.transition(TaskStatus::Cancelled);
            }
        }
    }
}
