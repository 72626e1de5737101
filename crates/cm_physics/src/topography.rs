// crates/cm_physics/src/topography.rs

//! 规范地形状态
//!
//! 规范网格上唯一可写的床面高程。所有高程修改都通过 [`TopographyState::apply`]，
//! 引擎只能读取 [`TopographySnapshot`]。
//!
//! # 约束
//!
//! - 不可侵蚀单元的负增量被截为 0
//! - 有不可侵蚀层时，负增量不能使高程低于层顶
//! - 截去的量记录在 [`ApplyOutcome`] 中
//! - 可动沙量随实际增量更新并截断在 `[0, ceiling]`

use std::sync::Arc;

use cm_foundation::{CmError, CmResult, KahanSum};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::surface::SeedSurface;

/// 被截断的单元
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampedCell {
    /// 单元下标
    pub cell: usize,
    /// 请求的增量
    pub requested: f64,
    /// 实际施加的增量
    pub applied: f64,
}

impl ClampedCell {
    /// 被截去的量（非负）
    pub fn amount(&self) -> f64 {
        (self.applied - self.requested).abs()
    }
}

/// 一次 `apply` 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// 新版本号
    pub version: u64,
    /// 实际施加的增量
    pub applied: Vec<f64>,
    /// 截断记录
    pub clamped: Vec<ClampedCell>,
}

impl ApplyOutcome {
    /// 截去量合计
    pub fn clamped_total(&self) -> f64 {
        self.clamped.iter().map(ClampedCell::amount).sum()
    }
}

/// 不可变地形快照（引擎输入）
#[derive(Debug, Clone, PartialEq)]
pub struct TopographySnapshot {
    /// 版本号
    pub version: u64,
    /// 高程 [m]
    pub elevation: Vec<f64>,
    /// 含水率
    pub moisture: Vec<f64>,
    /// 可动沙量 [m]
    pub availability: Vec<f64>,
    /// 可动沙量上限 [m]
    pub availability_ceiling: f64,
    /// 不可侵蚀标记
    pub non_erodible: Vec<bool>,
}

impl TopographySnapshot {
    /// 单元数
    pub fn n_cells(&self) -> usize {
        self.elevation.len()
    }
}

/// 规范地形状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopographyState {
    version: u64,
    elevation: Vec<f64>,
    moisture: Vec<f64>,
    availability: Vec<f64>,
    availability_ceiling: f64,
    non_erodible: Vec<bool>,
    floor: Option<Vec<f64>>,
}

impl TopographyState {
    /// 从初始地表创建（版本 0）
    pub fn from_seed(seed: &SeedSurface) -> CmResult<Self> {
        seed.validate(seed.n_cells())?;
        Ok(Self {
            version: 0,
            elevation: seed.elevation.clone(),
            moisture: seed.moisture.clone(),
            availability: seed.availability.clone(),
            availability_ceiling: seed.availability_ceiling,
            non_erodible: seed.non_erodible.clone(),
            floor: seed.floor.clone(),
        })
    }

    /// 版本号
    pub fn version(&self) -> u64 {
        self.version
    }

    /// 单元数
    pub fn n_cells(&self) -> usize {
        self.elevation.len()
    }

    /// 高程
    pub fn elevation(&self) -> &[f64] {
        &self.elevation
    }

    /// 可动沙量
    pub fn availability(&self) -> &[f64] {
        &self.availability
    }

    /// 不可侵蚀标记
    pub fn non_erodible(&self) -> &[bool] {
        &self.non_erodible
    }

    /// 床面体积 `Σ z·A`
    pub fn volume(&self, cell_area: f64) -> f64 {
        KahanSum::sum_iter(self.elevation.iter().map(|z| z * cell_area))
    }

    /// 施加规范网格上的高程增量，返回新版本
    pub fn apply(&mut self, delta: &[f64]) -> CmResult<ApplyOutcome> {
        CmError::check_size("delta", self.n_cells(), delta.len())?;
        if let Some(c) = delta.iter().position(|d| !d.is_finite()) {
            return Err(CmError::invalid_input(format!("单元 {} 的增量非有限", c)));
        }

        let mut applied = Vec::with_capacity(delta.len());
        let mut clamped = Vec::new();

        for (c, &requested) in delta.iter().enumerate() {
            let mut d = requested;
            if d < 0.0 && self.non_erodible[c] {
                d = 0.0;
            }
            if let Some(floor) = &self.floor {
                let limit = (floor[c] - self.elevation[c]).min(0.0);
                if d < limit {
                    d = limit;
                }
            }
            if d != requested {
                clamped.push(ClampedCell {
                    cell: c,
                    requested,
                    applied: d,
                });
            }

            self.elevation[c] += d;
            self.availability[c] = (self.availability[c] + d).clamp(0.0, self.availability_ceiling);
            applied.push(d);
        }

        self.version += 1;
        if !clamped.is_empty() {
            debug!(version = self.version, cells = clamped.len(), "不可侵蚀截断");
        }

        Ok(ApplyOutcome {
            version: self.version,
            applied,
            clamped,
        })
    }

    /// 不可变快照
    pub fn snapshot(&self) -> Arc<TopographySnapshot> {
        Arc::new(TopographySnapshot {
            version: self.version,
            elevation: self.elevation.clone(),
            moisture: self.moisture.clone(),
            availability: self.availability.clone(),
            availability_ceiling: self.availability_ceiling,
            non_erodible: self.non_erodible.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_bumps_version_and_conserves_volume() {
        let mut topo = TopographyState::from_seed(&SeedSurface::flat(4, 1.0)).unwrap();
        let before = topo.volume(2.0);
        let out = topo.apply(&[0.1, -0.1, 0.05, 0.0]).unwrap();
        assert_eq!(out.version, 1);
        assert_eq!(topo.version(), 1);
        let sum: f64 = out.applied.iter().sum();
        assert!((topo.volume(2.0) - (before + 2.0 * sum)).abs() < 1e-12);
    }

    #[test]
    fn test_non_erodible_clamps_negative_only() {
        let seed = SeedSurface::flat(3, 0.0).with_non_erodible([1]);
        let mut topo = TopographyState::from_seed(&seed).unwrap();
        let out = topo.apply(&[-0.2, -0.2, 0.0]).unwrap();
        assert_eq!(topo.elevation()[1], 0.0);
        assert_eq!(out.clamped.len(), 1);
        assert!((out.clamped_total() - 0.2).abs() < 1e-12);

        let out = topo.apply(&[0.0, 0.3, 0.0]).unwrap();
        assert!(out.clamped.is_empty());
        assert!((topo.elevation()[1] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_floor_limits_erosion() {
        let seed = SeedSurface::flat(2, 1.0).with_non_erodible_offset(0.011);
        let mut topo = TopographyState::from_seed(&seed).unwrap();
        let out = topo.apply(&[-0.5, -0.005]).unwrap();
        assert!((topo.elevation()[0] - 0.989).abs() < 1e-12);
        assert!((topo.elevation()[1] - 0.995).abs() < 1e-12);
        assert_eq!(out.clamped.len(), 1);
    }

    #[test]
    fn test_availability_tracks_delta() {
        let seed = SeedSurface::flat(2, 0.0).with_availability(0.1, 0.2);
        let mut topo = TopographyState::from_seed(&seed).unwrap();
        topo.apply(&[0.5, -0.3]).unwrap();
        assert!((topo.availability()[0] - 0.2).abs() < 1e-12);
        assert_eq!(topo.availability()[1], 0.0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut topo = TopographyState::from_seed(&SeedSurface::flat(2, 0.0)).unwrap();
        let snap = topo.snapshot();
        topo.apply(&[1.0, 1.0]).unwrap();
        assert_eq!(snap.elevation, vec![0.0, 0.0]);
        assert_eq!(snap.version, 0);
    }

    #[test]
    fn test_rejects_nan_delta() {
        let mut topo = TopographyState::from_seed(&SeedSurface::flat(2, 0.0)).unwrap();
        assert!(topo.apply(&[f64::NAN, 0.0]).is_err());
        assert_eq!(topo.version(), 0);
    }
}
