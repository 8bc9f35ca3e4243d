//! 核心编排层：错误类型、循环状态、主控循环与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use builder::{create_agent_builder, AgentBuilder};
pub use error::AgentError;
pub use orchestrator::{Agent, RunOutcome, NO_PLAN_ERROR};
pub use state::{LoopPhase, Termination};
