//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENTIC__*` 覆盖（双下划线表示嵌套，如 `AGENTIC__AGENT__MAX_ITERATIONS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::plan::DEFAULT_MAX_RETRIES;
use crate::tools::{default_allowed_commands, DEFAULT_TOOL_TIMEOUT_SECS};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [agent] 段：编排循环与重试上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 编排循环最大迭代次数
    pub max_iterations: usize,
    /// 单步重试次数（总尝试 = 1 + max_retries）
    pub max_retries: usize,
}

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// [tools] 段：工作目录、工具超时、Shell 白名单、HTTP
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 文件工具的沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
    pub http: HttpSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            shell: ShellSection::default(),
            http: HttpSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            timeout_secs: 10,
        }
    }
}

/// [tools.http] 段：api_call 的超时与响应截断长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub max_response_chars: usize,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_response_chars: 1000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 AGENTIC__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENTIC__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENTIC")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
