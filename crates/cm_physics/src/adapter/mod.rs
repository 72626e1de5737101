// crates/cm_physics/src/adapter/mod.rs

//! 耦合适配器
//!
//! 每个物理引擎由一个适配器包装：
//!
//! ```text
//! step(外力窗口, 地形快照, 植被反馈) -> (本地网格高程增量, 诊断)
//! ```
//!
//! 适配器负责把规范网格状态翻译到引擎的本地网格与单位，并把引擎输出翻译回
//! 高程增量。引擎永远不修改地形或植被状态；增量只有在成功返回后才由编排器提交。
//!
//! # 线程模型
//!
//! 适配器为 `Send + Sync`，编排器在工作线程上调用 `step`，通过
//! [`CancelToken`] 协作取消超时的调用。

pub mod aeolian;
pub mod failure;
pub mod hydro;
mod translate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cm_grid::GridId;
use serde::{Deserialize, Serialize};

use crate::forcing::ForcingWindow;
use crate::topography::TopographySnapshot;
use crate::vegetation::VegetationFeedback;

pub use aeolian::{AeolianAdapter, AeolianEngine, AeolianInput};
pub use failure::AdapterFailure;
pub use hydro::{HydroAdapter, HydroEngine, HydroInput};

/// 引擎类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// 风沙引擎
    Aeolian,
    /// 水动力引擎
    Hydro,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aeolian => write!(f, "aeolian"),
            Self::Hydro => write!(f, "hydro"),
        }
    }
}

/// 协作取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 创建未取消的标记
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 是否已请求取消
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 已取消时返回 `Cancelled`
    pub fn check(&self, kind: EngineKind) -> Result<(), AdapterFailure> {
        if self.is_cancelled() {
            Err(AdapterFailure::Cancelled { kind })
        } else {
            Ok(())
        }
    }
}

/// 一次引擎调用的输入
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// 外力窗口（子步区间）
    pub window: Arc<ForcingWindow>,
    /// 地形快照
    pub snapshot: Arc<TopographySnapshot>,
    /// 植被反馈
    pub feedback: Arc<VegetationFeedback>,
    /// 取消标记
    pub cancel: CancelToken,
}

impl StepRequest {
    /// 子步长 [s]
    pub fn dt(&self) -> f64 {
        self.window.duration()
    }
}

/// 引擎诊断
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterDiagnostics {
    /// 是否收敛
    pub converged: bool,
    /// 迭代次数
    pub iterations: usize,
    /// 警告
    pub warnings: Vec<String>,
}

/// 引擎在本地网格上的原始结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeResult {
    /// 高程增量 [m]
    pub delta: Vec<f64>,
    /// 越过计算域边界流出的体积 [m³]
    pub boundary_outflow: f64,
    /// 诊断
    pub diagnostics: AdapterDiagnostics,
}

/// 适配器输出
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOutput {
    /// 引擎
    pub kind: EngineKind,
    /// 本地网格
    pub grid: GridId,
    /// 本地网格高程增量 [m]
    pub delta: Vec<f64>,
    /// 越过计算域边界流出的体积 [m³]
    pub boundary_outflow: f64,
    /// 诊断
    pub diagnostics: AdapterDiagnostics,
}

/// 适配器限值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterLimits {
    /// 单步单元增量上限 [m]
    pub max_abs_delta: f64,
}

impl Default for AdapterLimits {
    fn default() -> Self {
        Self { max_abs_delta: 0.5 }
    }
}

/// 耦合适配器
pub trait CouplingAdapter: Send + Sync {
    /// 引擎类型
    fn kind(&self) -> EngineKind;

    /// 本地网格
    fn native_grid(&self) -> GridId;

    /// 当前状态下引擎的稳定子步 [s]，无约束时返回 `f64::INFINITY`
    fn stable_step(&self, request: &StepRequest) -> Result<f64, AdapterFailure>;

    /// 推进一个子步
    fn step(&self, request: &StepRequest) -> Result<AdapterOutput, AdapterFailure>;
}

/// 校验引擎结果并组装输出
pub(crate) fn finish(
    kind: EngineKind,
    grid: GridId,
    expected_len: usize,
    result: NativeResult,
    limits: &AdapterLimits,
) -> Result<AdapterOutput, AdapterFailure> {
    if result.delta.len() != expected_len {
        return Err(AdapterFailure::engine(
            kind,
            format!("delta has {} cells, native grid has {}", result.delta.len(), expected_len),
        ));
    }
    if !result.diagnostics.converged {
        return Err(AdapterFailure::NonConvergence {
            kind,
            iterations: result.diagnostics.iterations,
        });
    }
    let worst = result
        .delta
        .iter()
        .enumerate()
        .find(|(_, d)| !d.is_finite() || d.abs() > limits.max_abs_delta);
    if let Some((cell, value)) = worst {
        return Err(AdapterFailure::ImplausibleDelta {
            kind,
            cell,
            value: *value,
            limit: limits.max_abs_delta,
        });
    }
    Ok(AdapterOutput {
        kind,
        grid,
        delta: result.delta,
        boundary_outflow: result.boundary_outflow,
        diagnostics: result.diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged(delta: Vec<f64>) -> NativeResult {
        NativeResult {
            delta,
            boundary_outflow: 0.0,
            diagnostics: AdapterDiagnostics {
                converged: true,
                iterations: 1,
                warnings: Vec::new(),
            },
        }
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check(EngineKind::Aeolian).is_ok());
        clone.cancel();
        assert!(matches!(
            token.check(EngineKind::Aeolian),
            Err(AdapterFailure::Cancelled { .. })
        ));
    }

    #[test]
    fn test_finish_rejects_implausible_delta() {
        let limits = AdapterLimits { max_abs_delta: 0.1 };
        let err = finish(EngineKind::Hydro, GridId(0), 2, converged(vec![0.0, 0.2]), &limits).unwrap_err();
        assert!(matches!(err, AdapterFailure::ImplausibleDelta { cell: 1, .. }));
    }

    #[test]
    fn test_finish_rejects_nan_and_non_convergence() {
        let limits = AdapterLimits::default();
        assert!(finish(EngineKind::Hydro, GridId(0), 1, converged(vec![f64::NAN]), &limits).is_err());

        let mut r = converged(vec![0.0]);
        r.diagnostics.converged = false;
        assert!(matches!(
            finish(EngineKind::Aeolian, GridId(0), 1, r, &limits),
            Err(AdapterFailure::NonConvergence { .. })
        ));
    }

    #[test]
    fn test_finish_checks_length() {
        let limits = AdapterLimits::default();
        assert!(finish(EngineKind::Hydro, GridId(0), 3, converged(vec![0.0]), &limits).is_err());
    }
}
