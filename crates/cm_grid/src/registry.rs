// crates/cm_grid/src/registry.rs

//! 网格注册表
//!
//! 保存会话中所有已注册的网格，并缓存任意两网格之间的权重矩阵。
//! 权重矩阵在首次使用时计算，此后只读共享。
//!
//! # 线程安全
//!
//! 注册表内部使用 `parking_lot::RwLock`，可在引擎工作线程之间共享
//! （`Arc<GridRegistry>`）。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GridError, GridResult, MismatchReason};
use crate::grid::{Grid, GridId, GridSpec};
use crate::weights::WeightMatrix;
use cm_foundation::tolerance::max_abs_diff;

/// 视为完全覆盖的面积比例误差
const FULL_COVERAGE_EPS: f64 = 1e-9;

/// 重采样容差
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResampleTolerance {
    /// 允许的旋转角差 [度]
    #[serde(default = "default_rotation_deg")]
    pub rotation_deg: f64,
    /// 往返重采样允许的最大绝对误差
    #[serde(default = "default_round_trip")]
    pub round_trip: f64,
}

fn default_rotation_deg() -> f64 {
    1e-6
}

fn default_round_trip() -> f64 {
    1e-9
}

impl Default for ResampleTolerance {
    fn default() -> Self {
        Self {
            rotation_deg: default_rotation_deg(),
            round_trip: default_round_trip(),
        }
    }
}

/// 带体积统计的重采样结果
#[derive(Debug, Clone)]
pub struct MappedField {
    /// 目标网格上的值
    pub values: Vec<f64>,
    /// 源体积 `Σ v·A`
    pub source_volume: f64,
    /// 目标体积 `Σ v·A`
    pub target_volume: f64,
}

/// 网格注册表
pub struct GridRegistry {
    tolerance: ResampleTolerance,
    grids: RwLock<Vec<Arc<Grid>>>,
    cache: RwLock<HashMap<(GridId, GridId), Arc<WeightMatrix>>>,
}

impl GridRegistry {
    /// 创建空注册表
    pub fn new(tolerance: ResampleTolerance) -> Self {
        Self {
            tolerance,
            grids: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// 重采样容差
    pub fn tolerance(&self) -> ResampleTolerance {
        self.tolerance
    }

    /// 注册网格
    pub fn register(&self, spec: GridSpec) -> GridResult<GridId> {
        spec.validate()?;
        let mut grids = self.grids.write();
        if grids.iter().any(|g| g.name() == spec.name) {
            return Err(GridError::Duplicate(spec.name));
        }
        let id = GridId(grids.len() as u32);
        debug!(grid = %id, name = %spec.name, nx = spec.nx, ny = spec.ny, "注册网格");
        grids.push(Arc::new(Grid::new(id, spec)?));
        Ok(id)
    }

    /// 获取网格
    pub fn grid(&self, id: GridId) -> GridResult<Arc<Grid>> {
        self.grids
            .read()
            .get(id.0 as usize)
            .cloned()
            .ok_or(GridError::UnknownGrid(id))
    }

    /// 按名称查找
    pub fn find(&self, name: &str) -> Option<GridId> {
        self.grids.read().iter().find(|g| g.name() == name).map(|g| g.id())
    }

    /// 已注册网格数
    pub fn len(&self) -> usize {
        self.grids.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有网格定义（按注册顺序）
    pub fn specs(&self) -> Vec<GridSpec> {
        self.grids.read().iter().map(|g| g.spec().clone()).collect()
    }

    /// 已缓存的权重矩阵数
    pub fn cached_pairs(&self) -> usize {
        self.cache.read().len()
    }

    /// 检查两个网格是否协调
    pub fn check_conformal(&self, source: GridId, target: GridId) -> GridResult<()> {
        let s = self.grid(source)?;
        let t = self.grid(target)?;
        let mismatch = |reason, detail: String| GridError::GridMismatch {
            source_grid: source,
            target_grid: target,
            reason,
            detail,
        };

        if s.spec().units != t.spec().units {
            return Err(mismatch(
                MismatchReason::Units,
                format!("{:?} vs {:?}", s.spec().units, t.spec().units),
            ));
        }

        let diff = (s.spec().rotation_deg - t.spec().rotation_deg).rem_euclid(360.0);
        let diff = diff.min(360.0 - diff);
        if diff > self.tolerance.rotation_deg {
            return Err(mismatch(
                MismatchReason::Rotated,
                format!("旋转角差 {:.6}° 超过容差 {:.6}°", diff, self.tolerance.rotation_deg),
            ));
        }

        let (t_min, t_max) = t.frame_extent();
        let s_min = t.to_frame(glam::DVec2::new(s.spec().origin[0], s.spec().origin[1]));
        let s_max = s_min + glam::DVec2::new(s.nx() as f64 * s.dx(), s.ny() as f64 * s.dy());
        let wx = t_max.x.min(s_max.x) - t_min.x.max(s_min.x);
        let wy = t_max.y.min(s_max.y) - t_min.y.max(s_min.y);
        if wx <= 0.0 || wy <= 0.0 {
            return Err(mismatch(MismatchReason::NonOverlapping, "范围交集面积为零".to_string()));
        }
        Ok(())
    }

    /// 获取（必要时计算并缓存）权重矩阵
    pub fn weights(&self, source: GridId, target: GridId) -> GridResult<Arc<WeightMatrix>> {
        if let Some(w) = self.cache.read().get(&(source, target)) {
            return Ok(Arc::clone(w));
        }

        let s = self.grid(source)?;
        let t = self.grid(target)?;
        let matrix = if source == target {
            WeightMatrix::identity(&s)
        } else {
            self.check_conformal(source, target)?;
            WeightMatrix::build(&s, &t)
        };
        debug!(source = %source, target = %target, nnz = matrix.nnz(), "缓存权重矩阵");

        let mut cache = self.cache.write();
        let entry = cache.entry((source, target)).or_insert_with(|| Arc::new(matrix));
        Ok(Arc::clone(entry))
    }

    /// 把字段从源网格重采样到目标网格
    pub fn map(&self, source: GridId, target: GridId, field: &[f64]) -> GridResult<Vec<f64>> {
        self.grid(source)?.check_field(field)?;
        if source == target {
            return Ok(field.to_vec());
        }
        Ok(self.weights(source, target)?.apply(field))
    }

    /// 重采样并返回两侧体积
    pub fn map_volume(&self, source: GridId, target: GridId, field: &[f64]) -> GridResult<MappedField> {
        let values = self.map(source, target, field)?;
        let source_volume = self.grid(source)?.volume(field);
        let target_volume = self.grid(target)?.volume(&values);
        Ok(MappedField {
            values,
            source_volume,
            target_volume,
        })
    }

    /// 校验 `a -> b -> a` 往返误差，返回最大绝对误差
    ///
    /// 只比较完全落在 `b` 范围内的 `a` 单元，范围外的部分由常数外推
    /// 填充，不参与比较。
    pub fn verify_round_trip(&self, a: GridId, b: GridId, field: &[f64]) -> GridResult<f64> {
        let there = self.map(a, b, field)?;
        let back = self.map(b, a, &there)?;
        let weights = self.weights(a, b)?;
        let (original, returned): (Vec<f64>, Vec<f64>) = (0..field.len())
            .filter(|s| weights.source_coverage(*s) >= 1.0 - FULL_COVERAGE_EPS)
            .map(|s| (field[s], back[s]))
            .unzip();
        let error = max_abs_diff(&original, &returned);
        if error > self.tolerance.round_trip {
            return Err(GridError::RoundTrip {
                error,
                tolerance: self.tolerance.round_trip,
            });
        }
        Ok(error)
    }
}

impl std::fmt::Debug for GridRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridRegistry")
            .field("grids", &self.len())
            .field("cached_pairs", &self.cached_pairs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::LengthUnit;

    fn registry() -> GridRegistry {
        GridRegistry::new(ResampleTolerance::default())
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let r = registry();
        r.register(GridSpec::new("a", [0.0, 0.0], 2, 2, 1.0, 1.0)).unwrap();
        let err = r.register(GridSpec::new("a", [0.0, 0.0], 3, 3, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, GridError::Duplicate(_)));
        assert_eq!(r.find("a"), Some(GridId(0)));
    }

    #[test]
    fn test_coarse_fine_coarse_round_trip() {
        let r = registry();
        let coarse = r.register(GridSpec::new("c", [0.0, 0.0], 5, 5, 2.0, 2.0)).unwrap();
        let fine = r.register(GridSpec::new("f", [0.0, 0.0], 10, 10, 1.0, 1.0)).unwrap();
        let field: Vec<f64> = (0..25).map(|v| (v as f64 * 0.37).sin()).collect();
        let err = r.verify_round_trip(coarse, fine, &field).unwrap();
        assert!(err < 1e-12);
    }

    #[test]
    fn test_round_trip_ignores_uncovered_cells() {
        let r = registry();
        let wide = r.register(GridSpec::new("wide", [0.0, 0.0], 4, 1, 1.0, 1.0)).unwrap();
        let narrow = r.register(GridSpec::new("narrow", [0.0, 0.0], 2, 1, 1.0, 1.0)).unwrap();
        // 第 2、3 个单元在 narrow 范围外，回程时被外推为 3.0
        let err = r.verify_round_trip(wide, narrow, &[1.0, 3.0, 7.0, -2.0]).unwrap();
        assert_eq!(err, 0.0);
    }

    #[test]
    fn test_round_trip_error_beyond_tolerance() {
        let r = registry();
        let fine = r.register(GridSpec::new("f", [0.0, 0.0], 4, 1, 1.0, 1.0)).unwrap();
        let coarse = r.register(GridSpec::new("c", [0.0, 0.0], 2, 1, 2.0, 1.0)).unwrap();
        let err = r.verify_round_trip(fine, coarse, &[0.0, 1.0, 0.0, 1.0]).unwrap_err();
        assert!(matches!(err, GridError::RoundTrip { error, .. } if (error - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_rotated_grid_is_mismatch() {
        let r = registry();
        let a = r.register(GridSpec::new("a", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
        let b = r
            .register(GridSpec::new("b", [0.0, 0.0], 4, 4, 1.0, 1.0).with_rotation(15.0))
            .unwrap();
        let err = r.map(a, b, &[0.0; 16]).unwrap_err();
        assert!(matches!(
            err,
            GridError::GridMismatch {
                reason: MismatchReason::Rotated,
                ..
            }
        ));
    }

    #[test]
    fn test_same_rotation_is_conformal() {
        let r = registry();
        let a = r
            .register(GridSpec::new("a", [0.0, 0.0], 4, 4, 1.0, 1.0).with_rotation(30.0))
            .unwrap();
        let b = r
            .register(GridSpec::new("b", [0.0, 0.0], 2, 2, 2.0, 2.0).with_rotation(30.0))
            .unwrap();
        let out = r.map(a, b, &[2.0; 16]).unwrap();
        assert!(out.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_non_overlapping_and_units() {
        let r = registry();
        let a = r.register(GridSpec::new("a", [0.0, 0.0], 2, 2, 1.0, 1.0)).unwrap();
        let far = r.register(GridSpec::new("far", [100.0, 0.0], 2, 2, 1.0, 1.0)).unwrap();
        let km = r
            .register(GridSpec::new("km", [0.0, 0.0], 2, 2, 1.0, 1.0).with_units(LengthUnit::Kilometers))
            .unwrap();
        assert!(r.check_conformal(a, far).unwrap_err().is_mismatch());
        assert!(matches!(
            r.check_conformal(a, km).unwrap_err(),
            GridError::GridMismatch {
                reason: MismatchReason::Units,
                ..
            }
        ));
    }

    #[test]
    fn test_weights_cached_once() {
        let r = registry();
        let a = r.register(GridSpec::new("a", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
        let b = r.register(GridSpec::new("b", [0.0, 0.0], 2, 2, 2.0, 2.0)).unwrap();
        let w1 = r.weights(a, b).unwrap();
        let w2 = r.weights(a, b).unwrap();
        assert!(Arc::ptr_eq(&w1, &w2));
        assert_eq!(r.cached_pairs(), 1);
    }

    #[test]
    fn test_constant_extrapolation_beyond_source() {
        let r = registry();
        let small = r.register(GridSpec::new("small", [0.0, 0.0], 2, 1, 1.0, 1.0)).unwrap();
        let wide = r.register(GridSpec::new("wide", [0.0, 0.0], 4, 1, 1.0, 1.0)).unwrap();
        let out = r.map(small, wide, &[1.0, 3.0]).unwrap();
        assert_eq!(out, vec![1.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_field_size_checked() {
        let r = registry();
        let a = r.register(GridSpec::new("a", [0.0, 0.0], 2, 2, 1.0, 1.0)).unwrap();
        assert!(matches!(r.map(a, a, &[1.0]).unwrap_err(), GridError::FieldSize { .. }));
    }

    #[test]
    fn test_map_volume_reports_both_sides() {
        let r = registry();
        let f = r.register(GridSpec::new("f", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
        let c = r.register(GridSpec::new("c", [0.0, 0.0], 2, 2, 2.0, 2.0)).unwrap();
        let mapped = r.map_volume(f, c, &[0.5; 16]).unwrap();
        assert!((mapped.source_volume - 8.0).abs() < 1e-12);
        assert!((mapped.target_volume - 8.0).abs() < 1e-12);
    }
}
