//! 执行上下文
//!
//! 一次编排运行内累积的键值存储：步骤结果以 `step_<id>_result` 命名空间写入，
//! 并按固定规则提取少量「最新值」键供后续步骤的模板引用。只追加/覆盖，失败时不回滚。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plan::types::{ExecutionSummary, StepId, StepStatus};
use crate::tools::ToolOutput;

/// 结果字段 → 上下文键（每次尝试后提取，成功与否都适用）
pub const EXTRACTED_FIELDS: &[(&str, &str)] = &[
    ("content", "content"),
    ("file_path", "file_path"),
    ("response", "api_response"),
    ("results", "search_results"),
    ("result", "calculation_result"),
];

/// 编排循环在每轮执行后维护的 last_* 键（只来自已完成步骤）
pub const LAST_VALUE_FIELDS: &[(&str, &str)] = &[
    ("content", "last_file_content"),
    ("file_path", "last_file_path"),
    ("response", "last_api_response"),
    ("results", "last_search_results"),
];

/// 步骤结果在上下文中的命名空间键
pub fn step_result_key(id: StepId) -> String {
    format!("step_{id}_result")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// 点分路径查找：`a.b` 依次进入嵌套对象；任一段缺失或中间值不是对象时返回 None
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// 合并另一份上下文（同名键覆盖）
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn extend(&mut self, values: Map<String, Value>) {
        self.values.extend(values);
    }

    /// 按 EXTRACTED_FIELDS 把结果字段写入上下文
    pub fn extend_from_output(&mut self, output: &ToolOutput) {
        for (field, key) in EXTRACTED_FIELDS {
            if let Some(v) = output.get(field) {
                self.values.insert((*key).to_string(), v.clone());
            }
        }
    }

    /// 写入 `step_<id>_result`
    pub fn record_step(&mut self, id: StepId, output: &ToolOutput) {
        self.values.insert(step_result_key(id), output.to_value());
    }

    /// 编排循环的上下文合并：执行器最终上下文 + 已完成步骤的命名空间结果与 last_* 键
    pub fn absorb_summary(&mut self, summary: &ExecutionSummary) {
        self.merge(&summary.context);
        for step in &summary.steps {
            if step.status != StepStatus::Completed {
                continue;
            }
            let Some(result) = &step.result else { continue };
            self.record_step(step.id, result);
            for (field, key) in LAST_VALUE_FIELDS {
                if let Some(v) = result.get(field) {
                    self.values.insert((*key).to_string(), v.clone());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}
