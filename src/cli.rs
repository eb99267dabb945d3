//! `swarmctl`: a thin command surface over the in-process runtime, grounded
//! on the teacher's `main.rs`/clap-derived CLI bootstrap pattern.

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use swarmcore::agent::{AgentType, BaseAgent, Task, TaskHandler};
use swarmcore::agent::manager::AgentManager;
use swarmcore::bus::MessageBus;
use swarmcore::error::CoreError;
use swarmcore::orchestrator::{GoalOptions, GoalOutcome, Orchestrator};

#[derive(Parser)]
#[command(name = "swarmctl", about = "Drive the swarmcore coordination runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a goal and print its result once execution completes.
    Run {
        title: String,
        description: String,
    },
    #[command(subcommand)]
    Agents(AgentsCommand),
    /// Print runner lifecycle stats.
    Health,
}

#[derive(Subcommand)]
pub enum AgentsCommand {
    /// List registered agents and their current state.
    List,
}

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, CoreError> {
        Ok(task.payload.clone())
    }
}

/// Builds a bus + agent manager with a single demo `coder-1` agent
/// registered, so `run`/`agents`/`health` have something to act on without a
/// persistent daemon process.
async fn bootstrap() -> (MessageBus, Arc<AgentManager>) {
    let bus = MessageBus::new();
    let manager = Arc::new(AgentManager::new());
    let agent = Arc::new(BaseAgent::new("coder-1", AgentType::Coder, bus.clone(), Arc::new(EchoHandler)));
    let _ = swarmcore::agent::Agent::initialize(&*agent).await;
    let _ = manager.register(agent).await;
    (bus, manager)
}

pub async fn run(cli: Cli) -> Result<(), CoreError> {
    match cli.command {
        Command::Run { title, description } => {
            let (bus, manager) = bootstrap().await;
            let orchestrator = Orchestrator::new(bus, manager);
            orchestrator.start().await?;
            let outcome = orchestrator
                .execute_goal(title, description, GoalOptions::default())
                .await?;
            match outcome {
                GoalOutcome::Completed(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                GoalOutcome::Started { goal_id } => {
                    println!("goal {goal_id} started in background");
                }
            }
            orchestrator.destroy().await?;
        }
        Command::Agents(AgentsCommand::List) => {
            let (_bus, manager) = bootstrap().await;
            let statuses = manager.get_all_agent_status().await;
            for (id, state) in statuses {
                println!("{id}\t{state:?}");
            }
        }
        Command::Health => {
            let (bus, manager) = bootstrap().await;
            let orchestrator = Orchestrator::new(bus, manager);
            orchestrator.start().await?;
            let stats = orchestrator.get_stats().await;
            println!(
                "status={:?} goals_executed={} tasks_executed={} uptime_ms={}",
                stats.status, stats.goals_executed, stats.tasks_executed, stats.uptime_ms
            );
            orchestrator.destroy().await?;
        }
    }
    Ok(())
}
