//! 工具箱：注册表与内置工具
//!
//! 文件（file_read / file_write / file_list）、HTTP（api_call）、搜索（web_search）、
//! 计算（calculate）、Shell（system_command）、JSON（json_parse）。

pub mod calculate;
pub mod filesystem;
pub mod http;
pub mod json_parse;
pub mod registry;
pub mod search;
pub mod shell;

pub use calculate::CalculateTool;
pub use filesystem::{FileListTool, FileReadTool, FileWriteTool, SafeFs};
pub use http::ApiCallTool;
pub use json_parse::JsonParseTool;
pub use registry::{
    optional_str, required_str, Params, Tool, ToolError, ToolInfo, ToolOutput, ToolRegistry,
    DEFAULT_TOOL_TIMEOUT_SECS,
};
pub use search::WebSearchTool;
pub use shell::{default_allowed_commands, SystemCommandTool};
