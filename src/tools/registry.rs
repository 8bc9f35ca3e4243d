//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找。
//! invoke 是唯一的调用边界：加超时、捕获 panic、未知工具转失败结果，并输出结构化审计日志（JSON），
//! 因此上层执行器对任何工具都只看到统一的 ToolOutput。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::AgentError;

/// 参数 / 结果字段映射（字符串键 → 任意 JSON 值）
pub type Params = Map<String, Value>;

/// 默认单次工具调用超时（秒）
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// 工具 trait：名称、描述、参数 schema、异步执行
///
/// execute 返回 Ok(载荷字段) 或 Err([`ToolError`])；不需要自行处理超时与 panic，
/// 这两者由 [`ToolRegistry::invoke`] 在边界上统一转换。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（Step.tool 引用的键）
    fn name(&self) -> &str;

    /// 工具描述（供 list / 规划策略参考）
    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认返回空对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, params: Params) -> Result<Params, ToolError>;
}

/// 工具失败：错误信息，以及失败结果里仍需带出的字段（如 file_path）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub message: String,
    pub fields: Params,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Params::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<AgentError> for ToolError {
    fn from(err: AgentError) -> Self {
        Self::new(err.to_string())
    }
}

/// 统一的工具结果：success 标志 + 载荷字段，失败时带 error
///
/// 序列化为扁平对象：`{"success": true, "content": "..."}` 或 `{"success": false, "error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Params,
}

impl ToolOutput {
    pub fn ok(fields: Params) -> Self {
        Self {
            success: true,
            error: None,
            fields,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            fields: Params::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 转为 JSON 对象（写入上下文时使用）
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("success".to_string(), Value::Bool(self.success));
        if let Some(err) = &self.error {
            map.insert("error".to_string(), Value::String(err.clone()));
        }
        Value::Object(map)
    }
}

impl From<AgentError> for ToolOutput {
    fn from(err: AgentError) -> Self {
        ToolOutput::failure(err.to_string())
    }
}

/// list() 返回的工具信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，invoke 时施加统一超时
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 注册工具；同名工具被替换
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "tool replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 已注册的工具名（排序后）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表，按名称排序
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .iter()
            .map(|(name, tool)| ToolInfo {
                name: name.clone(),
                description: tool.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// 动态生成工具 schema JSON
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .list()
            .into_iter()
            .filter_map(|info| {
                let tool = self.tools.get(&info.name)?;
                Some(serde_json::json!({
                    "name": info.name,
                    "description": info.description,
                    "parameters": tool.parameters_schema()
                }))
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }

    /// 调用指定工具；任何结局（未知工具、Err、超时、panic）都转为 ToolOutput，不向上传播
    pub async fn invoke(&self, name: &str, params: Params) -> ToolOutput {
        let start = Instant::now();
        let args_preview = args_preview(&params);

        let (output, outcome) = match self.tools.get(name) {
            None => {
                let available = self.tool_names();
                let err = AgentError::UnknownTool {
                    name: name.to_string(),
                    available: available.clone(),
                };
                let output = ToolOutput::from(err).with_field(
                    "available_tools",
                    Value::Array(available.into_iter().map(Value::String).collect()),
                );
                (output, "unknown")
            }
            Some(tool) => {
                let fut = AssertUnwindSafe(tool.execute(params)).catch_unwind();
                match timeout(self.timeout, fut).await {
                    Ok(Ok(Ok(fields))) => (ToolOutput::ok(fields), "ok"),
                    Ok(Ok(Err(err))) => {
                        let mut output =
                            ToolOutput::from(AgentError::ToolExecutionFailed(err.message));
                        output.fields = err.fields;
                        (output, "error")
                    }
                    Ok(Err(panic)) => (
                        ToolOutput::from(AgentError::ToolExecutionFailed(panic_message(
                            panic.as_ref(),
                        ))),
                        "panic",
                    ),
                    Err(_) => (
                        ToolOutput::from(AgentError::ToolTimeout(
                            name.to_string(),
                            self.timeout,
                        )),
                        "timeout",
                    ),
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": output.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        output
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}

fn args_preview(params: &Params) -> String {
    let s = Value::Object(params.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

/// 读取必填字符串参数；缺失、null 或非字符串时返回错误信息
pub fn required_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, String> {
    match params.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(Value::Null) | None => {
            Err(AgentError::InvalidParameter(key.to_string(), "missing".to_string()).to_string())
        }
        Some(other) => Err(AgentError::InvalidParameter(
            key.to_string(),
            format!("expected string, got {other}"),
        )
        .to_string()),
    }
}

/// 读取可选字符串参数，缺失或非字符串时用默认值
pub fn optional_str<'a>(params: &'a Params, key: &str, default: &'a str) -> &'a str {
    params.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}
