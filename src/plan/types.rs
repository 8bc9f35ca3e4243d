//! 计划类型定义
//!
//! Step（步骤）、StepStatus（状态机）、ExecutionRecord（单次尝试记录）、ExecutionSummary（执行汇总）。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::context::ExecutionContext;
use crate::tools::{Params, ToolOutput};

pub type StepId = usize;

/// 步骤状态：Pending → InProgress → {Completed, Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// 等待执行
    Pending,
    /// 正在执行（含重试之间）
    InProgress,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }

    /// 单次执行内允许的状态迁移
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::InProgress)
                | (StepStatus::InProgress, StepStatus::Completed)
                | (StepStatus::InProgress, StepStatus::Failed)
        )
    }
}

/// 计划中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub description: String,
    /// 注册表中的工具名
    pub tool: String,
    /// 原始参数（可含 `${path}` / `{{path}}` 引用）
    pub parameters: Params,
    pub dependencies: BTreeSet<StepId>,
    pub status: StepStatus,
    pub result: Option<ToolOutput>,
}

impl Step {
    pub fn new(id: StepId, description: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            tool: tool.into(),
            parameters: Params::new(),
            dependencies: BTreeSet::new(),
            status: StepStatus::Pending,
            result: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.parameters.extend(params);
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = StepId>) -> Self {
        self.dependencies.extend(ids);
        self
    }

    /// 状态迁移；离开终态或跳过 InProgress 会被拒绝并返回 false
    pub fn transition(&mut self, next: StepStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                step = self.id,
                from = ?self.status,
                to = ?next,
                "illegal step status transition ignored"
            );
            false
        }
    }

    /// 以 Pending 状态复制（重规划后的新计划使用）
    pub fn fresh(&self) -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            ..self.clone()
        }
    }
}

/// 单次工具调用尝试的记录（重试会产生多条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_id: StepId,
    pub tool: String,
    /// 第几次尝试，从 1 开始
    pub attempt: usize,
    /// 本次尝试实际使用的（已解析）参数
    pub parameters: Params,
    pub result: ToolOutput,
    /// 本次尝试的结局：Completed 或 Failed
    pub status: StepStatus,
    /// 开始时间（Unix 毫秒）
    pub started_at: i64,
    pub duration_ms: u64,
}

/// 一次计划执行的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub total_steps: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// 执行后的步骤快照（终态与结果）
    pub steps: Vec<Step>,
    pub results: BTreeMap<StepId, ToolOutput>,
    pub history: Vec<ExecutionRecord>,
    /// 执行结束时的运行上下文
    pub context: ExecutionContext,
}

impl ExecutionSummary {
    pub fn from_steps(
        steps: &[Step],
        results: BTreeMap<StepId, ToolOutput>,
        history: Vec<ExecutionRecord>,
        context: ExecutionContext,
    ) -> Self {
        let count = |s: StepStatus| steps.iter().filter(|step| step.status == s).count();
        let failed = count(StepStatus::Failed);
        Self {
            success: failed == 0,
            total_steps: steps.len(),
            completed: count(StepStatus::Completed),
            failed,
            pending: count(StepStatus::Pending),
            steps: steps.to_vec(),
            results,
            history,
            context,
        }
    }

    /// 某步骤的终态
    pub fn status_of(&self, id: StepId) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.status)
    }

    /// 某步骤的尝试次数
    pub fn attempts_of(&self, id: StepId) -> usize {
        self.history.iter().filter(|r| r.step_id == id).count()
    }

    /// 失败步骤的错误信息
    pub fn errors(&self) -> Vec<(StepId, String)> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| {
                let msg = s
                    .result
                    .as_ref()
                    .and_then(|r| r.error_message())
                    .unwrap_or("unknown error")
                    .to_string();
                (s.id, msg)
            })
            .collect()
    }
}
