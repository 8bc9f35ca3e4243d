//! 编排循环的状态定义
//!
//! LoopPhase 是单次任务执行内的阶段；Termination 说明循环为何结束。

use serde::{Deserialize, Serialize};

/// 编排循环阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Planning,
    Executing,
    Evaluating,
    Replanning,
    Done,
}

impl LoopPhase {
    /// 循环内允许的阶段迁移
    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Planning, Done)
                | (Executing, Evaluating)
                | (Evaluating, Done)
                | (Evaluating, Replanning)
                | (Replanning, Executing)
                | (Replanning, Planning)
                | (Replanning, Done)
        )
    }
}

/// 循环结束原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 最后一次执行没有失败步骤
    Succeeded,
    /// 规划器返回空计划
    NoPlan,
    /// 重规划没有产生不同长度的序列
    Stalled,
    /// 用完迭代次数
    MaxIterationsReached,
}

impl Termination {
    pub fn is_success(self) -> bool {
        self == Termination::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert!(LoopPhase::Planning.can_transition_to(LoopPhase::Executing));
        assert!(LoopPhase::Evaluating.can_transition_to(LoopPhase::Replanning));
        assert!(LoopPhase::Replanning.can_transition_to(LoopPhase::Executing));
        assert!(!LoopPhase::Done.can_transition_to(LoopPhase::Planning));
        assert!(!LoopPhase::Planning.can_transition_to(LoopPhase::Evaluating));
    }

    #[test]
    fn test_termination_serialization() {
        assert_eq!(
            serde_json::to_string(&Termination::MaxIterationsReached).unwrap(),
            "\"max_iterations_reached\""
        );
        assert!(Termination::Succeeded.is_success());
        assert!(!Termination::Stalled.is_success());
    }
}
