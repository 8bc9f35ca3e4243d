//! Agent 编排器：规划 → 执行 → 评估 → 重规划的有界循环
//!
//! 一次迭代 = 一次计划执行。只有在没有待执行的调整后计划时，才在迭代开头调用 Planner::plan；
//! 重规划得到的序列与原序列等长视为停滞，直接结束。循环从不抛错：空计划、停滞、
//! 迭代用尽都作为 [`Termination`] 体现在 [`RunOutcome`] 中，并始终带上最后一次真实的执行汇总。

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::core::state::{LoopPhase, Termination};
use crate::plan::{ExecutionContext, ExecutionSummary, PlanExecutor, Planner, Step};
use crate::tools::{Params, ToolInfo, ToolRegistry};

/// 空计划时的错误信息
pub const NO_PLAN_ERROR: &str = "Could not create execution plan";

/// 一次 run 的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub success: bool,
    pub task: String,
    /// 消耗的迭代次数
    pub iterations: usize,
    pub termination: Termination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 最后一次执行汇总；空计划时为 None
    pub final_result: Option<ExecutionSummary>,
    /// 运行结束时累积的上下文
    pub context: ExecutionContext,
    pub available_tools: Vec<ToolInfo>,
}

/// Agent：持有工具注册表、规划器、执行器与跨迭代累积的上下文
pub struct Agent {
    registry: Arc<ToolRegistry>,
    planner: Planner,
    executor: PlanExecutor,
    context: ExecutionContext,
    max_iterations: usize,
}

impl Agent {
    pub fn new(planner: Planner, executor: PlanExecutor, max_iterations: usize) -> Self {
        Self {
            registry: executor.registry().clone(),
            planner,
            executor,
            context: ExecutionContext::new(),
            max_iterations,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn available_tools(&self) -> Vec<ToolInfo> {
        self.registry.list()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// 清空上下文（两个无关任务之间调用）
    pub fn reset(&mut self) {
        self.context.clear();
        tracing::debug!("agent context reset");
    }

    /// 执行任务：initial_context 先合并进上下文，再进入有界循环
    pub async fn run(&mut self, task: &str, initial_context: Option<Params>) -> RunOutcome {
        let run_id = format!("run_{}", Uuid::new_v4());
        if let Some(initial) = initial_context {
            self.context.extend(initial);
        }
        tracing::info!(run_id = %run_id, task = %task, max_iterations = self.max_iterations, "run started");

        let mut phase = LoopPhase::Planning;
        let mut pending: Option<Vec<Step>> = None;
        let mut last: Option<ExecutionSummary> = None;
        let mut iterations = 0;

        let termination = loop {
            if iterations >= self.max_iterations {
                tracing::warn!(run_id = %run_id, iterations, "maximum iterations reached");
                break Termination::MaxIterationsReached;
            }
            iterations += 1;

            let mut steps = match pending.take() {
                Some(steps) => steps,
                None => {
                    enter(&mut phase, LoopPhase::Planning);
                    let steps = self.planner.plan(task, &self.context);
                    if steps.is_empty() {
                        tracing::warn!(run_id = %run_id, iteration = iterations, "planner returned no steps");
                        break Termination::NoPlan;
                    }
                    tracing::info!(
                        run_id = %run_id,
                        iteration = iterations,
                        steps = steps.len(),
                        "plan created"
                    );
                    steps
                }
            };

            enter(&mut phase, LoopPhase::Executing);
            let summary = self.executor.execute_plan(&mut steps, &self.context).await;
            self.context.absorb_summary(&summary);

            enter(&mut phase, LoopPhase::Evaluating);
            tracing::info!(
                run_id = %run_id,
                iteration = iterations,
                completed = summary.completed,
                failed = summary.failed,
                total = summary.total_steps,
                "iteration evaluated"
            );
            if summary.failed == 0 {
                last = Some(summary);
                break Termination::Succeeded;
            }

            enter(&mut phase, LoopPhase::Replanning);
            let adjusted = self.planner.adjust_plan(&summary.steps, &summary.results);
            let stalled = adjusted.len() == steps.len();
            last = Some(summary);
            if stalled {
                tracing::info!(run_id = %run_id, iteration = iterations, "no viable alternative plan found");
                break Termination::Stalled;
            }
            tracing::info!(
                run_id = %run_id,
                iteration = iterations,
                steps = adjusted.len(),
                "plan adjusted"
            );
            pending = Some(adjusted);
        };
        enter(&mut phase, LoopPhase::Done);

        let error = match termination {
            Termination::Succeeded => None,
            Termination::NoPlan => Some(NO_PLAN_ERROR.to_string()),
            Termination::Stalled => Some(failure_message(
                "No viable alternative plan found",
                last.as_ref(),
            )),
            Termination::MaxIterationsReached => Some(failure_message(
                &format!("Maximum iterations ({}) reached", self.max_iterations),
                last.as_ref(),
            )),
        };

        tracing::info!(
            run_id = %run_id,
            success = termination.is_success(),
            ?termination,
            iterations,
            "run finished"
        );

        RunOutcome {
            run_id,
            success: termination.is_success(),
            task: task.to_string(),
            iterations,
            termination,
            error,
            final_result: last,
            context: self.context.clone(),
            available_tools: self.available_tools(),
        }
    }
}

fn enter(phase: &mut LoopPhase, next: LoopPhase) {
    if *phase == next {
        return;
    }
    if !phase.can_transition_to(next) {
        tracing::warn!(from = ?*phase, to = ?next, "unexpected loop phase transition");
    }
    tracing::debug!(from = ?*phase, to = ?next, "loop phase");
    *phase = next;
}

/// 终止说明 + 失败步骤的错误
fn failure_message(headline: &str, summary: Option<&ExecutionSummary>) -> String {
    let errors: Vec<String> = summary
        .map(|s| {
            s.errors()
                .into_iter()
                .map(|(id, msg)| format!("step {id}: {msg}"))
                .collect()
        })
        .unwrap_or_default();
    if errors.is_empty() {
        headline.to_string()
    } else {
        format!("{headline}; {}", errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DecompositionPolicy, StepStatus};
    use crate::tools::{Tool, ToolError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str, bool);

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "fixed outcome"
        }
        async fn execute(&self, params: Params) -> Result<Params, ToolError> {
            if self.1 {
                let mut out = Params::new();
                out.insert("content".into(), Value::Object(params));
                Ok(out)
            } else {
                Err(format!("{} is broken", self.0).into())
            }
        }
    }

    /// 返回固定计划并统计 decompose 调用次数；失败步骤的替代步骤参数各不相同
    struct Counting {
        plan: Vec<Step>,
        calls: Arc<AtomicUsize>,
        alternatives: bool,
        alt_counter: AtomicUsize,
    }

    impl DecompositionPolicy for Counting {
        fn decompose(&self, _task: &str, _context: &ExecutionContext) -> Vec<Step> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.plan.clone()
        }
        fn alternative(&self, failed: &Step) -> Option<Step> {
            if !self.alternatives {
                return None;
            }
            let n = self.alt_counter.fetch_add(1, Ordering::SeqCst);
            Some(Step::new(0, "retry differently", failed.tool.clone()).with_param("n", n))
        }
    }

    fn agent(plan: Vec<Step>, alternatives: bool, max_iterations: usize) -> (Agent, Arc<AtomicUsize>) {
        let mut reg = ToolRegistry::new();
        reg.register(Fixed("good", true));
        reg.register(Fixed("broken", false));
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Counting {
            plan,
            calls: calls.clone(),
            alternatives,
            alt_counter: AtomicUsize::new(0),
        };
        let executor = PlanExecutor::new(Arc::new(reg)).with_max_retries(0);
        (
            Agent::new(Planner::new(Arc::new(policy)), executor, max_iterations),
            calls,
        )
    }

    #[tokio::test]
    async fn test_success_in_one_iteration() {
        let (mut agent, calls) = agent(vec![Step::new(0, "ok", "good")], false, 10);
        let outcome = agent.run("task", None).await;
        assert!(outcome.success);
        assert_eq!(outcome.termination, Termination::Succeeded);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.error.is_none());
        assert!(outcome.context.contains_key("step_0_result"));
        assert!(outcome.run_id.starts_with("run_"));
    }

    #[tokio::test]
    async fn test_empty_plan_fails_immediately() {
        let (mut agent, _) = agent(vec![], false, 10);
        let outcome = agent.run("nothing", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.termination, Termination::NoPlan);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.final_result.is_none());
        assert_eq!(outcome.error.as_deref(), Some(NO_PLAN_ERROR));
    }

    #[tokio::test]
    async fn test_stall_stops_without_further_planning() {
        let (mut agent, calls) = agent(vec![Step::new(0, "bad", "broken")], false, 10);
        let outcome = agent.run("task", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.termination, Termination::Stalled);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let summary = outcome.final_result.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(outcome.error.unwrap().contains("broken is broken"));
    }

    #[tokio::test]
    async fn test_max_iterations_reached() {
        let (mut agent, calls) = agent(vec![Step::new(0, "bad", "broken")], true, 4);
        let outcome = agent.run("task", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.termination, Termination::MaxIterationsReached);
        assert_eq!(outcome.iterations, 4);
        // 调整后的序列直接执行，不再调用 plan
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // 每轮为每个失败步骤追加一个替代步骤：1 → 2 → 4 → 8
        assert_eq!(outcome.final_result.unwrap().total_steps, 8);
    }

    #[tokio::test]
    async fn test_last_summary_kept_at_iteration_limit() {
        let (mut agent, _) = agent(
            vec![Step::new(0, "ok", "good"), Step::new(1, "bad", "broken")],
            true,
            2,
        );
        let outcome = agent.run("task", None).await;
        let summary = outcome.final_result.unwrap();
        assert_eq!(summary.status_of(0), Some(StepStatus::Completed));
        assert_eq!(summary.status_of(1), Some(StepStatus::Failed));
        assert_eq!(summary.total_steps, 3);
    }

    #[tokio::test]
    async fn test_initial_context_and_reset() {
        let (mut agent, _) = agent(vec![Step::new(0, "ok", "good")], false, 10);
        let init = json!({"user": "ada"}).as_object().cloned().unwrap();
        let outcome = agent.run("task", Some(init)).await;
        assert_eq!(outcome.context.get("user"), Some(&json!("ada")));

        assert!(!agent.context().is_empty());
        agent.reset();
        assert!(agent.context().is_empty());
    }

    #[tokio::test]
    async fn test_available_tools_listed() {
        let (agent, _) = agent(vec![], false, 10);
        let names: Vec<_> = agent.available_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["broken", "good"]);
    }
}
