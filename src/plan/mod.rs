//! 计划层：步骤类型、依赖图、参数模板、执行上下文、执行器与规划器

pub mod context;
pub mod executor;
pub mod graph;
pub mod heuristics;
pub mod planner;
pub mod template;
pub mod types;

pub use context::{step_result_key, ExecutionContext};
pub use executor::{PlanExecutor, DEFAULT_MAX_RETRIES};
pub use graph::{PlanGraph, Schedule};
pub use heuristics::KeywordPolicy;
pub use planner::{DecompositionPolicy, Planner};
pub use template::{resolve_parameters, resolve_value};
pub use types::{ExecutionRecord, ExecutionSummary, Step, StepId, StepStatus};
