//! 计划依赖图
//!
//! 使用邻接表和入度表（Kahn 算法）计算执行顺序。节点是步骤在计划中的位置；
//! 计划内不存在的依赖 id 不计入入度（执行时再按「依赖未满足」处理）。
//! 环上或无法到达入度 0 的步骤按原始相对顺序追加到末尾，而不是丢弃。

use std::collections::{BTreeSet, HashMap};

use crate::plan::types::{Step, StepId};

/// 计划依赖图
#[derive(Debug, Clone)]
pub struct PlanGraph {
    /// 邻接表：位置 -> 依赖该步骤的步骤位置
    pub adjacency: Vec<Vec<usize>>,
    /// 入度表：位置 -> 计划内依赖数
    pub in_degree: Vec<usize>,
    ids: Vec<StepId>,
}

/// 排序结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// 每个位置恰好出现一次
    pub order: Vec<usize>,
    /// 未被 Kahn 算法排到的位置（已按原顺序附在 order 末尾）
    pub stranded: Vec<usize>,
}

impl PlanGraph {
    /// 创建依赖图；重复的步骤 id 以首次出现的位置为准
    pub fn new(steps: &[Step]) -> Self {
        let mut index: HashMap<StepId, usize> = HashMap::new();
        for (pos, step) in steps.iter().enumerate() {
            index.entry(step.id).or_insert(pos);
        }

        let mut adjacency = vec![Vec::new(); steps.len()];
        let mut in_degree = vec![0; steps.len()];
        for (pos, step) in steps.iter().enumerate() {
            for dep in &step.dependencies {
                if let Some(&dep_pos) = index.get(dep) {
                    adjacency[dep_pos].push(pos);
                    in_degree[pos] += 1;
                }
            }
        }

        Self {
            adjacency,
            in_degree,
            ids: steps.iter().map(|s| s.id).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Kahn 拓扑排序；就绪集合中步骤 id 最小者优先
    pub fn schedule(&self) -> Schedule {
        let n = self.len();
        let mut in_degree = self.in_degree.clone();
        let mut ready: BTreeSet<(StepId, usize)> = (0..n)
            .filter(|&pos| in_degree[pos] == 0)
            .map(|pos| (self.ids[pos], pos))
            .collect();

        let mut order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        while let Some((_, pos)) = ready.pop_first() {
            order.push(pos);
            visited[pos] = true;
            for &next in &self.adjacency[pos] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert((self.ids[next], next));
                }
            }
        }

        let stranded: Vec<usize> = (0..n).filter(|&pos| !visited[pos]).collect();
        order.extend(&stranded);
        Schedule { order, stranded }
    }

    /// 执行顺序（位置）
    pub fn execution_order(&self) -> Vec<usize> {
        self.schedule().order
    }

    /// 环上或不可达的位置
    pub fn stranded(&self) -> Vec<usize> {
        self.schedule().stranded
    }
}
