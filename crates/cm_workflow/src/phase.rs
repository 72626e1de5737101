// crates/cm_workflow/src/phase.rs

//! 编排器状态机的状态

use serde::{Deserialize, Serialize};

/// 编排器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// 尚未开始
    Idle,
    /// 选择激活引擎与子步
    Scheduling,
    /// 调用引擎
    RunningEngines,
    /// 合并增量
    Reconciling,
    /// 更新植被
    UpdatingVegetation,
    /// 写检查点
    Checkpointing,
    /// 已结束
    Terminated,
}

impl Phase {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// 是否允许迁移到 `next`
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Checkpointing)
                | (Idle, Scheduling)
                | (Scheduling, RunningEngines)
                | (Scheduling, Terminated)
                | (RunningEngines, RunningEngines)
                | (RunningEngines, Reconciling)
                | (Reconciling, UpdatingVegetation)
                | (UpdatingVegetation, Checkpointing)
                | (UpdatingVegetation, Scheduling)
                | (Checkpointing, Scheduling)
                | (_, Terminated)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Scheduling => "Scheduling",
            Self::RunningEngines => "RunningEngines",
            Self::Reconciling => "Reconciling",
            Self::UpdatingVegetation => "UpdatingVegetation",
            Self::Checkpointing => "Checkpointing",
            Self::Terminated => "Terminated",
        };
        write!(f, "{}", s)
    }
}

/// 一次状态迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// 起始阶段
    pub from: Phase,
    /// 目标阶段
    pub to: Phase,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
