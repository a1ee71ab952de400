//! Agent workforce: registry, runs, proposals and the handlers that produce them

pub mod appliers;
pub mod handlers;
pub mod proposals;
pub mod registry;
pub mod runs;
pub mod seed;
pub mod supervisor;
pub mod types;

pub use handlers::{execute_agent_run, AgentHandler, HandlerRegistry, RunContext, RunOutcome};
pub use types::*;
