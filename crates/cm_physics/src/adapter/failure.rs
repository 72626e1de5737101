// crates/cm_physics/src/adapter/failure.rs

//! 适配器失败
//!
//! 适配器失败都可恢复：编排器以减半的子步重试，超过重试次数才升级为致命错误。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::EngineKind;

/// 适配器失败
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum AdapterFailure {
    /// 引擎未收敛
    #[error("{kind} engine did not converge after {iterations} iterations")]
    NonConvergence {
        /// 引擎
        kind: EngineKind,
        /// 迭代次数
        iterations: usize,
    },

    /// 增量幅值不合理
    #[error("{kind} engine produced implausible delta {value:.4e} m at native cell {cell} (limit {limit:.4e} m)")]
    ImplausibleDelta {
        /// 引擎
        kind: EngineKind,
        /// 本地网格单元
        cell: usize,
        /// 增量
        value: f64,
        /// 上限
        limit: f64,
    },

    /// 调用超时
    #[error("{kind} engine timed out after {seconds:.1} s")]
    Timeout {
        /// 引擎
        kind: EngineKind,
        /// 超时秒数
        seconds: f64,
    },

    /// 调用被取消
    #[error("{kind} engine invocation was cancelled")]
    Cancelled {
        /// 引擎
        kind: EngineKind,
    },

    /// 引擎内部错误
    #[error("{kind} engine error: {message}")]
    Engine {
        /// 引擎
        kind: EngineKind,
        /// 错误信息
        message: String,
    },
}

impl AdapterFailure {
    /// 出错的引擎
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::NonConvergence { kind, .. }
            | Self::ImplausibleDelta { kind, .. }
            | Self::Timeout { kind, .. }
            | Self::Cancelled { kind }
            | Self::Engine { kind, .. } => *kind,
        }
    }

    /// 引擎内部错误
    pub fn engine(kind: EngineKind, message: impl Into<String>) -> Self {
        Self::Engine {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_engine() {
        let err = AdapterFailure::Timeout {
            kind: EngineKind::Hydro,
            seconds: 30.0,
        };
        assert!(err.to_string().contains("hydro"));
        assert_eq!(err.kind(), EngineKind::Hydro);
    }

    #[test]
    fn test_serde_round_trip_preserves_variant() {
        let err = AdapterFailure::ImplausibleDelta {
            kind: EngineKind::Aeolian,
            cell: 3,
            value: 4.0,
            limit: 1.0,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: AdapterFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
