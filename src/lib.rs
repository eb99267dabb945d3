//! swarmcore: an in-process coordination substrate for autonomous
//! multi-agent task execution — message bus, agent runtime and manager,
//! goal/workflow orchestration, a JSON-RPC transport layer, and the
//! resilience kernel (retry/circuit-breaker/timeout/fallback) every
//! cross-component call is wrapped in.

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resilience;
pub mod support;
pub mod transport;

pub use error::{CoreError, ErrorCode, ErrorContext, ErrorSeverity, Result};
