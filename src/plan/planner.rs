//! Planner：任务分解与重规划
//!
//! 具体「哪句话对应哪个工具」由可替换的 [`DecompositionPolicy`] 决定；Planner 只负责
//! 步骤序列的约定：id 从 0 连续编号、依赖只能指向更早生成的步骤、重规划时追加替代步骤。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::plan::context::ExecutionContext;
use crate::plan::heuristics::KeywordPolicy;
use crate::plan::types::{Step, StepId, StepStatus};
use crate::tools::ToolOutput;

/// 分解策略：把任务文本变成步骤序列
///
/// 必须是全函数（不 panic）；对无法识别的任务应返回兜底步骤而不是空序列，
/// 空序列会被编排循环视为「无法创建计划」。
pub trait DecompositionPolicy: Send + Sync {
    fn decompose(&self, task: &str, context: &ExecutionContext) -> Vec<Step>;

    /// 为失败步骤提供替代步骤（id 由 Planner 重新分配），默认不提供
    fn alternative(&self, _failed: &Step) -> Option<Step> {
        None
    }
}

#[derive(Clone)]
pub struct Planner {
    policy: Arc<dyn DecompositionPolicy>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(Arc::new(KeywordPolicy::new()))
    }
}

impl Planner {
    pub fn new(policy: Arc<dyn DecompositionPolicy>) -> Self {
        Self { policy }
    }

    /// 生成计划：按生成顺序重新编号为 0..n，丢弃不指向更早步骤的依赖
    pub fn plan(&self, task: &str, context: &ExecutionContext) -> Vec<Step> {
        let raw = self.policy.decompose(task, context);
        let mut renumbered: HashMap<StepId, StepId> = HashMap::new();
        let mut steps = Vec::with_capacity(raw.len());

        for (new_id, step) in raw.into_iter().enumerate() {
            let mut step = step.fresh();
            let old_id = step.id;
            let (kept, dropped): (Vec<StepId>, Vec<StepId>) = step
                .dependencies
                .iter()
                .copied()
                .partition(|dep| renumbered.contains_key(dep));
            if !dropped.is_empty() {
                tracing::warn!(
                    step = new_id,
                    ?dropped,
                    "dependencies on steps not generated earlier were dropped"
                );
            }
            step.dependencies = kept.into_iter().map(|dep| renumbered[&dep]).collect();
            step.id = new_id;
            renumbered.entry(old_id).or_insert(new_id);
            steps.push(step);
        }

        tracing::debug!(task = %task, steps = steps.len(), "plan created");
        steps
    }

    /// 重规划：没有失败步骤时原样返回；否则复制所有步骤（回到 Pending）并为每个失败步骤追加替代步骤。
    /// 与序列中已有步骤（工具与参数相同）重复的替代步骤不会再次追加。
    pub fn adjust_plan(
        &self,
        steps: &[Step],
        results: &BTreeMap<StepId, ToolOutput>,
    ) -> Vec<Step> {
        let failed: Vec<&Step> = steps
            .iter()
            .filter(|s| {
                s.status == StepStatus::Failed
                    || results.get(&s.id).is_some_and(|r| !r.success)
            })
            .collect();
        if failed.is_empty() {
            return steps.to_vec();
        }

        let mut adjusted: Vec<Step> = steps.iter().map(Step::fresh).collect();
        let mut next_id = steps.iter().map(|s| s.id + 1).max().unwrap_or(0);

        for step in failed {
            let Some(alt) = self.policy.alternative(step) else {
                continue;
            };
            let duplicate = adjusted
                .iter()
                .any(|s| s.tool == alt.tool && s.parameters == alt.parameters);
            if duplicate {
                continue;
            }
            tracing::info!(
                failed_step = step.id,
                alternative = next_id,
                tool = %alt.tool,
                "alternative step added"
            );
            let mut alt = alt.fresh();
            alt.id = next_id;
            alt.dependencies.clear();
            adjusted.push(alt);
            next_id += 1;
        }
        adjusted
    }
}
