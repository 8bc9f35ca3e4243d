//! 计划执行器
//!
//! 按依赖图顺序逐个执行步骤：检查依赖 → 解析参数模板 → 通过 ToolRegistry 调用工具 → 有界重试，
//! 每次尝试后把结果的常用字段提取进运行上下文，最后生成 ExecutionSummary（含逐次尝试的 history）。
//! 步骤严格串行；任何单步故障都已在工具边界转为 ToolOutput，不会影响兄弟步骤。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::plan::context::ExecutionContext;
use crate::plan::graph::PlanGraph;
use crate::plan::template::resolve_parameters;
use crate::plan::types::{ExecutionRecord, ExecutionSummary, Step, StepId, StepStatus};
use crate::tools::{ToolOutput, ToolRegistry};

/// 默认重试次数（总尝试次数 = 1 + max_retries）
pub const DEFAULT_MAX_RETRIES: usize = 2;

pub struct PlanExecutor {
    registry: Arc<ToolRegistry>,
    max_retries: usize,
}

impl PlanExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行整个计划。运行上下文以 `seed` 的副本开始，结束时随汇总返回。
    pub async fn execute_plan(
        &self,
        steps: &mut [Step],
        seed: &ExecutionContext,
    ) -> ExecutionSummary {
        let mut context = seed.clone();
        let mut results: BTreeMap<StepId, ToolOutput> = BTreeMap::new();
        let mut history: Vec<ExecutionRecord> = Vec::new();

        let schedule = PlanGraph::new(steps).schedule();
        if !schedule.stranded.is_empty() {
            let stranded: Vec<StepId> = schedule.stranded.iter().map(|&p| steps[p].id).collect();
            tracing::warn!(
                ?stranded,
                "dependency cycle or unreachable steps; executing them in original order"
            );
        }

        for pos in schedule.order {
            let unsatisfied = unsatisfied_dependencies(&steps[pos], steps);
            let step = &mut steps[pos];
            step.transition(StepStatus::InProgress);

            if !unsatisfied.is_empty() {
                let output = unsatisfied_output(&unsatisfied);
                tracing::warn!(step = step.id, ?unsatisfied, "dependencies not satisfied, skipping");
                step.transition(StepStatus::Failed);
                step.result = Some(output.clone());
                results.insert(step.id, output);
                continue;
            }

            let output = self.run_with_retries(step, &mut context, &mut history).await;
            if output.success {
                step.transition(StepStatus::Completed);
                context.record_step(step.id, &output);
            } else {
                step.transition(StepStatus::Failed);
            }
            step.result = Some(output.clone());
            results.insert(step.id, output);
        }

        let summary = ExecutionSummary::from_steps(steps, results, history, context);
        tracing::info!(
            total = summary.total_steps,
            completed = summary.completed,
            failed = summary.failed,
            attempts = summary.history.len(),
            "plan executed"
        );
        summary
    }

    /// 有界重试：最多 1 + max_retries 次，成功即停；两次尝试之间只更新上下文，不改参数模板
    async fn run_with_retries(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        history: &mut Vec<ExecutionRecord>,
    ) -> ToolOutput {
        let max_attempts = 1 + self.max_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let parameters = resolve_parameters(&step.parameters, context);
            let started_at = chrono::Utc::now().timestamp_millis();
            let start = Instant::now();

            let output = self.registry.invoke(&step.tool, parameters.clone()).await;

            let status = if output.success {
                StepStatus::Completed
            } else {
                StepStatus::Failed
            };
            history.push(ExecutionRecord {
                step_id: step.id,
                tool: step.tool.clone(),
                attempt,
                parameters,
                result: output.clone(),
                status,
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
            });
            context.extend_from_output(&output);

            if output.success {
                tracing::debug!(step = step.id, tool = %step.tool, attempt, "step completed");
                return output;
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    step = step.id,
                    tool = %step.tool,
                    attempts = attempt,
                    error = output.error_message().unwrap_or_default(),
                    "step failed after retries"
                );
                return output;
            }
            tracing::info!(
                step = step.id,
                tool = %step.tool,
                attempt,
                error = output.error_message().unwrap_or_default(),
                "step attempt failed, retrying"
            );
        }
    }
}

/// 返回未满足的依赖 id：不在计划中，或对应步骤未完成
fn unsatisfied_dependencies(step: &Step, all: &[Step]) -> Vec<StepId> {
    let status_by_id: HashMap<StepId, StepStatus> = all
        .iter()
        .rev()
        .map(|s| (s.id, s.status))
        .collect();
    step.dependencies
        .iter()
        .copied()
        .filter(|dep| status_by_id.get(dep) != Some(&StepStatus::Completed))
        .collect()
}

fn unsatisfied_output(unsatisfied: &[StepId]) -> ToolOutput {
    let list = unsatisfied
        .iter()
        .map(|id| format!("step {id}"))
        .collect::<Vec<_>>()
        .join(", ");
    ToolOutput::failure(format!("Dependencies not satisfied: {list}")).with_field(
        "unsatisfied_dependencies",
        Value::Array(unsatisfied.iter().map(|&id| Value::from(id)).collect()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Params, Tool, ToolError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录调用次数；前 fail_times 次失败
    struct Flaky {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail_times: usize,
        payload: Value,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        async fn execute(&self, params: Params) -> Result<Params, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(format!("attempt {} failed", n + 1).into());
            }
            let mut out = self.payload.as_object().cloned().unwrap_or_default();
            out.insert("echo".into(), Value::Object(params));
            Ok(out)
        }
    }

    fn flaky(name: &'static str, fail_times: usize, payload: Value) -> (Flaky, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Flaky {
                name,
                calls: calls.clone(),
                fail_times,
                payload,
            },
            calls,
        )
    }

    /// 第一次失败时带回 file_path，之后回显收到的参数
    struct MissingThenFound {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for MissingThenFound {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "test tool"
        }
        async fn execute(&self, params: Params) -> Result<Params, ToolError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ToolError::new("not there yet").with_field("file_path", "draft.txt"));
            }
            Ok(params)
        }
    }

    #[tokio::test]
    async fn test_retry_sees_fields_of_failed_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(MissingThenFound {
            calls: calls.clone(),
        });
        let executor = PlanExecutor::new(Arc::new(reg));

        let mut steps =
            vec![Step::new(0, "lookup", "lookup").with_param("target", "{{file_path}}")];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;

        assert!(summary.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.history[0].parameters["target"], json!("{{file_path}}"));
        assert_eq!(summary.history[0].result.get("file_path"), Some(&json!("draft.txt")));
        assert_eq!(summary.history[1].parameters["target"], json!("draft.txt"));
        assert_eq!(summary.context.get("file_path"), Some(&json!("draft.txt")));
    }

    #[tokio::test]
    async fn test_always_failing_tool_attempted_one_plus_retries() {
        let (tool, calls) = flaky("broken", usize::MAX, json!({}));
        let mut reg = ToolRegistry::new();
        reg.register(tool);
        let executor = PlanExecutor::new(Arc::new(reg)).with_max_retries(2);

        let mut steps = vec![Step::new(0, "always fails", "broken")];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.attempts_of(0), 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(steps[0].status, StepStatus::Failed);
        let attempts: Vec<_> = summary.history.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let (tool, calls) = flaky("flaky", 1, json!({"result": 1}));
        let mut reg = ToolRegistry::new();
        reg.register(tool);
        let executor = PlanExecutor::new(Arc::new(reg));

        let mut steps = vec![Step::new(0, "flaky", "flaky")];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(summary.success);
        assert_eq!(summary.history[0].status, StepStatus::Failed);
        assert_eq!(summary.history[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let (tool, calls) = flaky("broken", usize::MAX, json!({}));
        let mut reg = ToolRegistry::new();
        reg.register(tool);
        let executor = PlanExecutor::new(Arc::new(reg)).with_max_retries(0);

        let mut steps = vec![Step::new(0, "x", "broken")];
        executor.execute_plan(&mut steps, &ExecutionContext::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependency_gating_skips_tool() {
        let (bad, _) = flaky("bad", usize::MAX, json!({}));
        let (good, good_calls) = flaky("good", 0, json!({}));
        let mut reg = ToolRegistry::new();
        reg.register(bad);
        reg.register(good);
        let executor = PlanExecutor::new(Arc::new(reg));

        let mut steps = vec![
            Step::new(0, "fails", "bad"),
            Step::new(1, "needs 0", "good").depends_on([0]),
            Step::new(2, "needs missing", "good").depends_on([42]),
        ];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;

        assert_eq!(good_calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.attempts_of(1), 0);
        assert_eq!(steps[1].status, StepStatus::Failed);
        assert_eq!(steps[2].status, StepStatus::Failed);
        let err = summary.results[&1].error_message().unwrap();
        assert!(err.contains("Dependencies not satisfied"));
        assert_eq!(summary.results[&2].get("unsatisfied_dependencies"), Some(&json!([42])));
    }

    #[tokio::test]
    async fn test_cycle_executes_every_step_once() {
        let (good, calls) = flaky("good", 0, json!({}));
        let mut reg = ToolRegistry::new();
        reg.register(good);
        let executor = PlanExecutor::new(Arc::new(reg));

        let mut steps = vec![
            Step::new(0, "free", "good"),
            Step::new(1, "cycle a", "good").depends_on([2]),
            Step::new(2, "cycle b", "good").depends_on([1]),
        ];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.pending, 0);
    }

    #[tokio::test]
    async fn test_context_flows_between_steps() {
        let (calc, _) = flaky("calc", 0, json!({"result": 42}));
        let (sink, _) = flaky("sink", 0, json!({}));
        let mut reg = ToolRegistry::new();
        reg.register(calc);
        reg.register(sink);
        let executor = PlanExecutor::new(Arc::new(reg));

        let mut steps = vec![
            Step::new(0, "calc", "calc"),
            Step::new(1, "sink", "sink")
                .with_param("text", "{{calculation_result}}")
                .with_param("raw", "${step_0_result.result}")
                .depends_on([0]),
        ];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;

        let used = &summary.history[1].parameters;
        assert_eq!(used["text"], json!("42"));
        assert_eq!(used["raw"], json!(42));
        assert_eq!(summary.context.get("calculation_result"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_seed_context_not_mutated() {
        let (calc, _) = flaky("calc", 0, json!({"result": 1}));
        let mut reg = ToolRegistry::new();
        reg.register(calc);
        let executor = PlanExecutor::new(Arc::new(reg));

        let seed = ExecutionContext::new();
        let mut steps = vec![Step::new(0, "calc", "calc")];
        let summary = executor.execute_plan(&mut steps, &seed).await;
        assert!(seed.is_empty());
        assert!(summary.context.contains_key("step_0_result"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_step_failure() {
        let executor = PlanExecutor::new(Arc::new(ToolRegistry::new())).with_max_retries(0);
        let mut steps = vec![Step::new(0, "ghost", "ghost")];
        let summary = executor.execute_plan(&mut steps, &ExecutionContext::new()).await;
        assert!(!summary.success);
        assert!(summary.results[&0].error_message().unwrap().contains("not found"));
    }
}
