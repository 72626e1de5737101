// crates/cm_workflow/src/record.rs

//! 时间步记录
//!
//! 每个耦合窗口生成一条记录。记录只包含由输入决定的内容（不含墙钟时间），
//! 相同的时间线、配置与种子必然产生相同的记录序列。

use cm_foundation::KahanSum;
use cm_physics::{
    CellSource, ClampedCell, EngineKind, ReconcileDiagnostics, VegetationStateError, VegetationUpdate,
};
use serde::{Deserialize, Serialize};

/// 适配器调用摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    /// 引擎
    pub kind: EngineKind,
    /// 迭代次数
    pub iterations: usize,
    /// 警告
    pub warnings: Vec<String>,
}

/// 被重试的失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// 失败时的子步 [s]
    pub dt: f64,
    /// 失败描述
    pub error: String,
}

/// 时间步记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepRecord {
    /// 窗口序号（从 1 开始）
    pub step: u64,
    /// 窗口起点 [s]
    pub t0: f64,
    /// 窗口终点 [s]
    pub t1: f64,
    /// 激活的引擎
    pub active: Vec<EngineKind>,
    /// 实际施加到规范地形的高程增量 [m]
    pub elevation_delta: Vec<f64>,
    /// 植被变化
    pub vegetation: VegetationUpdate,
    /// 单元增量来源
    pub attribution: Vec<CellSource>,
    /// 协调诊断
    pub reconciliation: ReconcileDiagnostics,
    /// 不可侵蚀截断
    pub clamped: Vec<ClampedCell>,
    /// 引擎摘要
    pub engines: Vec<EngineReport>,
    /// 本窗口内的重试
    pub retries: Vec<RetryRecord>,
    /// 施加后的地形版本
    pub topography_version: u64,
}

impl TimestepRecord {
    /// 窗口长度 [s]
    pub fn dt(&self) -> f64 {
        self.t1 - self.t0
    }

    /// 施加的体积 `Σ Δz·A` [m³]
    pub fn applied_volume(&self, cell_area: f64) -> f64 {
        KahanSum::sum_iter(self.elevation_delta.iter().map(|d| d * cell_area))
    }

    /// 冲突单元数
    pub fn conflicts(&self) -> usize {
        self.reconciliation.conflicts
    }

    /// 质量残差 [m³]
    pub fn mass_residual(&self) -> f64 {
        self.reconciliation.residual
    }

    /// 植被越界记录
    pub fn vegetation_errors(&self) -> &[VegetationStateError] {
        &self.vegetation.errors
    }

    /// 某来源的单元
    pub fn cells_from(&self, source: CellSource) -> Vec<usize> {
        self.attribution
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == source)
            .map(|(c, _)| c)
            .collect()
    }

    /// 是否无任何变化
    pub fn is_quiet(&self) -> bool {
        self.elevation_delta.iter().all(|d| *d == 0.0)
            && self.vegetation.density_delta.iter().all(|d| *d == 0.0)
            && self.vegetation.height_delta.iter().all(|d| *d == 0.0)
    }
}
