// crates/cm_physics/src/adapter/translate.rs

//! 规范网格到本地网格的翻译

use std::sync::Arc;

use cm_grid::{Grid, GridId, GridRegistry};

use super::{AdapterFailure, EngineKind};

/// 掩码重采样后视为激活的最小覆盖比例
const MASK_THRESHOLD: f64 = 0.5;

/// 规范网格与某个本地网格之间的翻译器
#[derive(Debug, Clone)]
pub(crate) struct NativeFrame {
    kind: EngineKind,
    registry: Arc<GridRegistry>,
    canonical: GridId,
    native: Arc<Grid>,
}

impl NativeFrame {
    pub(crate) fn new(
        kind: EngineKind,
        registry: Arc<GridRegistry>,
        canonical: GridId,
        native: GridId,
    ) -> Result<Self, AdapterFailure> {
        let native = registry
            .grid(native)
            .map_err(|e| AdapterFailure::engine(kind, e.to_string()))?;
        Ok(Self {
            kind,
            registry,
            canonical,
            native,
        })
    }

    pub(crate) fn grid(&self) -> &Grid {
        &self.native
    }

    pub(crate) fn id(&self) -> GridId {
        self.native.id()
    }

    /// 标量场
    pub(crate) fn field(&self, canonical: &[f64]) -> Result<Vec<f64>, AdapterFailure> {
        self.registry
            .map(self.canonical, self.native.id(), canonical)
            .map_err(|e| AdapterFailure::engine(self.kind, e.to_string()))
    }

    /// 布尔掩码（按覆盖比例判定）
    pub(crate) fn mask(&self, canonical: &[bool]) -> Result<Vec<bool>, AdapterFailure> {
        let as_float: Vec<f64> = canonical.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect();
        Ok(self
            .field(&as_float)?
            .into_iter()
            .map(|v| v >= MASK_THRESHOLD)
            .collect())
    }
}
