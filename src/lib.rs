//! Agentic - Rust 任务规划与执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排循环（规划 → 执行 → 评估 → 重规划）、状态、错误与构建器
//! - **plan**: 步骤、依赖图、参数模板、执行上下文、执行器与规划器
//! - **tools**: 工具注册表与内置工具（文件、HTTP、搜索、计算、Shell、JSON）
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod observability;
pub mod plan;
pub mod tools;

pub use crate::core::{Agent, AgentBuilder, RunOutcome, Termination};
