// crates/cm_grid/src/error.rs

//! 网格错误类型

use crate::grid::GridId;
use thiserror::Error;

/// 网格操作结果
pub type GridResult<T> = Result<T, GridError>;

/// 非协调原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// 旋转角不一致
    Rotated,
    /// 范围不重叠
    NonOverlapping,
    /// 长度单位不一致
    Units,
}

impl std::fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rotated => write!(f, "rotated"),
            Self::NonOverlapping => write!(f, "non-overlapping"),
            Self::Units => write!(f, "mismatched units"),
        }
    }
}

/// 网格错误
#[derive(Debug, Error)]
pub enum GridError {
    /// 两个网格无法重采样
    #[error("网格不协调 ({reason}): {source_grid} -> {target_grid}: {detail}")]
    GridMismatch {
        /// 源网格
        source_grid: GridId,
        /// 目标网格
        target_grid: GridId,
        /// 原因
        reason: MismatchReason,
        /// 细节
        detail: String,
    },

    /// 未注册的网格
    #[error("未注册的网格: {0}")]
    UnknownGrid(GridId),

    /// 网格名重复
    #[error("网格名已注册: {0}")]
    Duplicate(String),

    /// 网格定义无效
    #[error("无效的网格定义 '{name}': {reason}")]
    InvalidSpec {
        /// 网格名
        name: String,
        /// 原因
        reason: String,
    },

    /// 字段长度与网格不一致
    #[error("字段长度不匹配: 网格 {grid} 有 {expected} 个单元, 字段长度 {actual}")]
    FieldSize {
        /// 网格
        grid: GridId,
        /// 期望长度
        expected: usize,
        /// 实际长度
        actual: usize,
    },

    /// 往返重采样误差超限
    #[error("往返重采样误差 {error:.3e} 超过容差 {tolerance:.3e}")]
    RoundTrip {
        /// 最大误差
        error: f64,
        /// 容差
        tolerance: f64,
    },
}

impl GridError {
    /// 是否为不协调错误
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::GridMismatch { .. })
    }
}
