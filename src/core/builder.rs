//! Agent 构建器：统一的 Agent 初始化逻辑
//!
//! 由 AppConfig 与工作目录构建默认工具注册表，可追加自定义工具、替换分解策略、调整迭代与重试上限。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::orchestrator::Agent;
use crate::plan::{DecompositionPolicy, PlanExecutor, Planner};
use crate::tools::{
    ApiCallTool, CalculateTool, FileListTool, FileReadTool, FileWriteTool, JsonParseTool,
    SystemCommandTool, Tool, ToolRegistry, WebSearchTool,
};

/// Agent 构建器：统一配置和初始化 Agent 的各个组件
pub struct AgentBuilder {
    config: AppConfig,
    workspace: PathBuf,
    builtin_tools: bool,
    extra_tools: Vec<Arc<dyn Tool>>,
    policy: Option<Arc<dyn DecompositionPolicy>>,
}

impl AgentBuilder {
    /// 创建新的构建器
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            builtin_tools: true,
            extra_tools: Vec::new(),
            policy: None,
        }
    }

    /// 追加工具；与内置工具同名时替换内置工具
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools.push(Arc::new(tool));
        self
    }

    /// 不注册内置工具，只使用 with_tool 追加的工具
    pub fn without_builtin_tools(mut self) -> Self {
        self.builtin_tools = false;
        self
    }

    /// 替换默认的关键词分解策略
    pub fn with_policy(mut self, policy: Arc<dyn DecompositionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.agent.max_iterations = max_iterations;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.config.agent.max_retries = max_retries;
        self
    }

    /// 构建工具注册表
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let tools_cfg = &self.config.tools;
        let mut tools =
            ToolRegistry::new().with_timeout(Duration::from_secs(tools_cfg.tool_timeout_secs));

        if self.builtin_tools {
            tools.register(FileReadTool::new(&self.workspace));
            tools.register(FileWriteTool::new(&self.workspace));
            tools.register(FileListTool::new(&self.workspace));
            tools.register(ApiCallTool::new(
                tools_cfg.http.timeout_secs,
                tools_cfg.http.max_response_chars,
            ));
            tools.register(WebSearchTool);
            tools.register(CalculateTool);
            tools.register(SystemCommandTool::new(
                tools_cfg.shell.allowed_commands.clone(),
                tools_cfg.shell.timeout_secs,
            ));
            tools.register(JsonParseTool);
        }

        for tool in &self.extra_tools {
            tools.register_arc(tool.clone());
        }
        tools
    }

    /// 构建 Agent
    pub fn build(self) -> Agent {
        let registry = Arc::new(self.build_tool_registry());
        let planner = match &self.policy {
            Some(policy) => Planner::new(policy.clone()),
            None => Planner::default(),
        };
        let executor = PlanExecutor::new(registry).with_max_retries(self.config.agent.max_retries);
        tracing::debug!(
            workspace = %self.workspace.display(),
            max_iterations = self.config.agent.max_iterations,
            max_retries = self.config.agent.max_retries,
            "agent built"
        );
        Agent::new(planner, executor, self.config.agent.max_iterations)
    }

    /// 获取配置
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取工作目录
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// 便捷函数：加载配置（失败时用默认值）并准备工作目录
pub fn create_agent_builder(config_path: Option<PathBuf>) -> AgentBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let workspace = config
        .tools
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("workspace"));
    if let Err(e) = std::fs::create_dir_all(&workspace) {
        tracing::warn!("Failed to create workspace {}: {}", workspace.display(), e);
    }
    let workspace = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.clone());

    AgentBuilder::new(config, workspace)
}
