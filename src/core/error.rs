//! 引擎错误类型
//!
//! 工具内部与注册表使用 AgentError 传播错误；到达工具边界时统一转为失败的 ToolOutput，
//! 执行器与编排循环本身不返回 Err（所有故障都是数据）。

use std::time::Duration;

use thiserror::Error;

/// 工具 / 注册表 / 配置层可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool '{0}' timed out after {1:?}")]
    ToolTimeout(String, Duration),

    #[error("Tool '{name}' not found. Available tools: {available:?}")]
    UnknownTool {
        name: String,
        available: Vec<String>,
    },

    #[error("Invalid parameter '{0}': {1}")]
    InvalidParameter(String, String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_message_lists_available() {
        let err = AgentError::UnknownTool {
            name: "teleport".to_string(),
            available: vec!["calculate".to_string(), "file_read".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("teleport"));
        assert!(msg.contains("calculate"));
        assert!(msg.contains("file_read"));
    }

    #[test]
    fn test_timeout_message() {
        let err = AgentError::ToolTimeout("api_call".to_string(), Duration::from_secs(5));
        assert_eq!(err.to_string(), "Tool 'api_call' timed out after 5s");
    }
}
