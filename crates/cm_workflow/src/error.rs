// crates/cm_workflow/src/error.rs

//! 耦合错误分类
//!
//! | 类别 | 处理 |
//! |---|---|
//! | `Config` | 启动时致命 |
//! | `GridMismatch` | 致命 |
//! | `Adapter` | 减半步长重试，超过次数后致命并回滚 |
//! | `MassConservation` | 硬上限内分摊后继续，否则致命 |
//! | `VegetationState` | 截断并记录 |
//! | `Checkpoint` / `State` | 致命 |

use cm_config::ConfigError;
use cm_foundation::CmError;
use cm_grid::GridError;
use cm_io::CheckpointError;
use cm_physics::{AdapterFailure, ReconcileError, VegetationStateError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phase::Transition;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 配置错误
    Config,
    /// 网格不协调
    GridMismatch,
    /// 适配器失败
    Adapter,
    /// 质量守恒违例
    MassConservation,
    /// 植被状态越界
    VegetationState,
    /// 检查点读写
    Checkpoint,
    /// 状态或内部错误
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::GridMismatch => "grid_mismatch",
            Self::Adapter => "adapter",
            Self::MassConservation => "mass_conservation",
            Self::VegetationState => "vegetation_state",
            Self::Checkpoint => "checkpoint",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// 耦合错误
#[derive(Debug, Error)]
pub enum CouplingError {
    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 网格错误
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    /// 适配器失败
    #[error("Adapter failure: {0}")]
    Adapter(#[from] AdapterFailure),

    /// 通量协调失败
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// 植被状态越界
    #[error("Vegetation state error: {0}")]
    Vegetation(#[from] VegetationStateError),

    /// 检查点错误
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// 状态错误
    #[error("State error: {0}")]
    State(#[from] CmError),
}

impl CouplingError {
    /// 错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Grid(_) => ErrorKind::GridMismatch,
            Self::Adapter(_) => ErrorKind::Adapter,
            Self::Reconcile(ReconcileError::MassConservation(_)) => ErrorKind::MassConservation,
            Self::Reconcile(ReconcileError::Grid(_)) => ErrorKind::GridMismatch,
            Self::Reconcile(ReconcileError::DuplicateEngine(_)) => ErrorKind::Internal,
            Self::Vegetation(_) => ErrorKind::VegetationState,
            Self::Checkpoint(_) => ErrorKind::Checkpoint,
            Self::State(_) => ErrorKind::Internal,
        }
    }

    /// 是否可在编排器内恢复
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Adapter | ErrorKind::VegetationState)
    }
}

/// 致命错误：导致运行终止的错误及其上下文
#[derive(Debug, Error)]
#[error("fatal {kind} error during {transition} in window [{t0}, {t1}): {source}", kind = .source.kind(), t0 = .window.0, t1 = .window.1)]
pub struct FatalError {
    /// 失败的状态迁移
    pub transition: Transition,
    /// 当时的窗口 `(t0, t1)`
    pub window: (f64, f64),
    /// 回滚到的检查点窗口序号
    pub restored_step: Option<u64>,
    /// 原始错误
    #[source]
    pub source: CouplingError,
}

impl FatalError {
    /// 错误类别
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
