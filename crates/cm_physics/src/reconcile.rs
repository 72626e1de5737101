// crates/cm_physics/src/reconcile.rs

//! 通量协调
//!
//! 把各适配器在本地网格上的增量合并为规范网格上唯一的、无冲突的更新：
//!
//! 1. 每个增量重采样到规范网格
//! 2. 按外力窗口划分湿/干单元：湿 = 水体掩码内且被淹没，干 = 风掩码内且不湿
//! 3. 湿单元取水动力增量，干单元取风沙增量，外力未触及的单元为 0
//! 4. 两个引擎在同一单元都给出非零增量时求和并记为冲突
//! 5. 质量校验：
//!
//! ```text
//! 边界项   F = Σ 重采样体积 − Σ 本地体积      （记录，不计入残差）
//! 残差     R = 施加体积 − Σ 重采样体积
//! 相对残差 r = |R| / Σ |本地增量|·A
//!
//! r ≤ mass_tolerance      接受
//! r ≤ mass_hard_ceiling   残差平均分摊到激活单元，记录可恢复的违例
//! 否则                    致命错误
//! ```

use std::sync::Arc;

use cm_foundation::KahanSum;
use cm_grid::{GridError, GridId, GridRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::adapter::{AdapterOutput, EngineKind};
use crate::forcing::ForcingWindow;
use crate::topography::TopographySnapshot;

/// 总增量为零时的绝对残差容差 [m³]
const ZERO_VOLUME: f64 = 1e-12;

/// 协调参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileParams {
    /// 相对质量残差容差
    #[serde(default = "default_mass_tolerance")]
    pub mass_tolerance: f64,
    /// 相对质量残差硬上限
    #[serde(default = "default_mass_hard_ceiling")]
    pub mass_hard_ceiling: f64,
}

fn default_mass_tolerance() -> f64 {
    1e-9
}

fn default_mass_hard_ceiling() -> f64 {
    1e-2
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            mass_tolerance: default_mass_tolerance(),
            mass_hard_ceiling: default_mass_hard_ceiling(),
        }
    }
}

/// 单元增量来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellSource {
    /// 外力未触及
    None,
    /// 风沙引擎（干单元）
    Aeolian,
    /// 水动力引擎（湿单元）
    Hydro,
    /// 两个引擎的增量求和
    Conflict,
}

/// 质量守恒违例
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize, Deserialize)]
#[error("mass conservation violated: residual {residual:.4e} m³ (relative {relative:.3e}, tolerance {tolerance:.1e}, ceiling {ceiling:.1e})")]
pub struct MassConservationViolation {
    /// 残差体积 [m³]
    pub residual: f64,
    /// 相对残差
    pub relative: f64,
    /// 容差
    pub tolerance: f64,
    /// 硬上限
    pub ceiling: f64,
    /// 是否已分摊残差
    pub redistributed: bool,
}

/// 协调错误
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// 超过硬上限的质量残差
    #[error(transparent)]
    MassConservation(MassConservationViolation),

    /// 重采样失败
    #[error("resampling failed: {0}")]
    Grid(#[from] GridError),

    /// 同一引擎给出多份输出
    #[error("duplicate output from {0} engine")]
    DuplicateEngine(EngineKind),
}

/// 协调诊断
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileDiagnostics {
    /// 冲突单元数
    pub conflicts: usize,
    /// 本地网格体积合计 [m³]
    pub native_volume: f64,
    /// 重采样后体积合计 [m³]
    pub resampled_volume: f64,
    /// 施加体积 [m³]
    pub applied_volume: f64,
    /// 重采样边界项 [m³]
    pub boundary_flux: f64,
    /// 引擎报告的计算域流出体积 [m³]
    pub adapter_outflow: f64,
    /// 质量残差 [m³]（分摊前）
    pub residual: f64,
    /// 可恢复的质量违例
    pub violation: Option<MassConservationViolation>,
}

/// 协调结果
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// 规范网格增量
    pub delta: Vec<f64>,
    /// 单元来源
    pub sources: Vec<CellSource>,
    /// 诊断
    pub diagnostics: ReconcileDiagnostics,
}

impl Reconciliation {
    /// 某来源的单元数
    pub fn count(&self, source: CellSource) -> usize {
        self.sources.iter().filter(|s| **s == source).count()
    }
}

/// 通量协调器
#[derive(Debug, Clone)]
pub struct FluxReconciler {
    registry: Arc<GridRegistry>,
    canonical: GridId,
    params: ReconcileParams,
}

impl FluxReconciler {
    /// 创建
    pub fn new(registry: Arc<GridRegistry>, canonical: GridId, params: ReconcileParams) -> Self {
        Self {
            registry,
            canonical,
            params,
        }
    }

    /// 参数
    pub fn params(&self) -> &ReconcileParams {
        &self.params
    }

    /// 合并各适配器输出
    pub fn reconcile(
        &self,
        outputs: &[AdapterOutput],
        window: &ForcingWindow,
        snapshot: &TopographySnapshot,
    ) -> Result<Reconciliation, ReconcileError> {
        let canonical = self.registry.grid(self.canonical)?;
        let n = canonical.n_cells();
        let area = canonical.cell_area();

        let mut aeolian = vec![0.0; n];
        let mut hydro = vec![0.0; n];
        let mut seen = Vec::with_capacity(outputs.len());
        let mut native_volume = KahanSum::new();
        let mut resampled_volume = KahanSum::new();
        let mut gross = KahanSum::new();
        let mut adapter_outflow = 0.0;

        for output in outputs {
            if seen.contains(&output.kind) {
                return Err(ReconcileError::DuplicateEngine(output.kind));
            }
            seen.push(output.kind);

            let native_area = self.registry.grid(output.grid)?.cell_area();
            gross.extend(output.delta.iter().map(|d| d.abs() * native_area));

            let mapped = self.registry.map_volume(output.grid, self.canonical, &output.delta)?;
            native_volume.add(mapped.source_volume);
            resampled_volume.add(mapped.target_volume);
            adapter_outflow += output.boundary_outflow;

            match output.kind {
                EngineKind::Aeolian => aeolian = mapped.values,
                EngineKind::Hydro => hydro = mapped.values,
            }
        }

        let wet = window.wet_mask(&snapshot.elevation);
        let wind = window.wind_mask();

        let mut delta = vec![0.0; n];
        let mut sources = vec![CellSource::None; n];
        let mut conflicts = 0;
        for c in 0..n {
            let (a, h) = (aeolian[c], hydro[c]);
            let primary = if wet[c] {
                Some(CellSource::Hydro)
            } else if wind[c] {
                Some(CellSource::Aeolian)
            } else {
                None
            };
            let Some(primary) = primary else {
                continue;
            };
            if a != 0.0 && h != 0.0 {
                delta[c] = a + h;
                sources[c] = CellSource::Conflict;
                conflicts += 1;
            } else {
                delta[c] = if primary == CellSource::Hydro { h } else { a };
                sources[c] = primary;
            }
        }

        let native_volume = native_volume.value();
        let resampled_volume = resampled_volume.value();
        let boundary_flux = resampled_volume - native_volume;
        let applied_volume = KahanSum::sum_iter(delta.iter().map(|d| d * area));
        let residual = applied_volume - resampled_volume;
        let gross = gross.value();
        let relative = if gross > 0.0 {
            residual.abs() / gross
        } else if residual.abs() <= ZERO_VOLUME {
            0.0
        } else {
            f64::INFINITY
        };

        let mut diagnostics = ReconcileDiagnostics {
            conflicts,
            native_volume,
            resampled_volume,
            applied_volume,
            boundary_flux,
            adapter_outflow,
            residual,
            violation: None,
        };

        if relative > self.params.mass_tolerance {
            let active: Vec<usize> = (0..n).filter(|&c| sources[c] != CellSource::None).collect();
            let mut violation = MassConservationViolation {
                residual,
                relative,
                tolerance: self.params.mass_tolerance,
                ceiling: self.params.mass_hard_ceiling,
                redistributed: false,
            };
            if relative > self.params.mass_hard_ceiling || active.is_empty() {
                return Err(ReconcileError::MassConservation(violation));
            }

            let share = residual / (active.len() as f64 * area);
            for &c in &active {
                delta[c] -= share;
            }
            violation.redistributed = true;
            diagnostics.applied_volume = KahanSum::sum_iter(delta.iter().map(|d| d * area));
            warn!("{}; redistributed over {} cells", violation, active.len());
            diagnostics.violation = Some(violation);
        }

        if boundary_flux.abs() > ZERO_VOLUME {
            debug!(boundary_flux, "重采样边界项");
        }
        debug!(
            conflicts,
            applied = diagnostics.applied_volume,
            outflow = adapter_outflow,
            "通量协调完成"
        );

        Ok(Reconciliation {
            delta,
            sources,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterDiagnostics;
    use crate::forcing::{presets, ForcingEvent, ForcingTimeline, SpatialMask, TimeSeries};
    use crate::surface::SeedSurface;
    use crate::topography::TopographyState;
    use cm_grid::{GridSpec, ResampleTolerance};

    struct Fixture {
        registry: Arc<GridRegistry>,
        canonical: GridId,
        window: ForcingWindow,
        snapshot: Arc<TopographySnapshot>,
    }

    /// 4x4 网格，全域风，左下 2x2 风暴
    fn fixture() -> Fixture {
        let registry = Arc::new(GridRegistry::new(ResampleTolerance::default()));
        let canonical = registry.register(GridSpec::new("canon", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
        let grid = registry.grid(canonical).unwrap();
        let storm = ForcingEvent::discharge("storm", TimeSeries::constant(5.0), 0.0, 100.0)
            .with_mask(SpatialMask::rect([0.0, 0.0], [2.0, 2.0]));
        let timeline = ForcingTimeline::new(100.0)
            .with_event(ForcingEvent::wind("wind", presets::default_wind(100.0).unwrap(), 0.0, 100.0))
            .unwrap()
            .with_event(storm)
            .unwrap();
        let window = ForcingWindow::build(&timeline, 0.0, 10.0, &grid);
        let snapshot = TopographyState::from_seed(&SeedSurface::flat(16, 0.0)).unwrap().snapshot();
        Fixture {
            registry,
            canonical,
            window,
            snapshot,
        }
    }

    fn output(kind: EngineKind, grid: GridId, delta: Vec<f64>) -> AdapterOutput {
        AdapterOutput {
            kind,
            grid,
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
    fn test_wet_dry_attribution() {
        let f = fixture();
        let reconciler = FluxReconciler::new(f.registry.clone(), f.canonical, ReconcileParams::default());
        let mut a = vec![0.01; 16];
        let mut h = vec![0.0; 16];
        for c in [0, 1, 4, 5] {
            a[c] = 0.0;
            h[c] = 0.02;
        }
        let outputs = vec![
            output(EngineKind::Aeolian, f.canonical, a),
            output(EngineKind::Hydro, f.canonical, h),
        ];
        let r = reconciler.reconcile(&outputs, &f.window, &f.snapshot).unwrap();
        assert_eq!(r.count(CellSource::Hydro), 4);
        assert_eq!(r.count(CellSource::Aeolian), 12);
        assert_eq!(r.diagnostics.conflicts, 0);
        assert!(r.diagnostics.violation.is_none());
        assert!((r.delta[0] - 0.02).abs() < 1e-15);
        assert!((r.delta[15] - 0.01).abs() < 1e-15);
    }

    #[test]
    fn test_conflict_sums() {
        let f = fixture();
        let reconciler = FluxReconciler::new(f.registry.clone(), f.canonical, ReconcileParams::default());
        let mut a = vec![0.0; 16];
        let mut h = vec![0.0; 16];
        a[5] = 0.01;
        h[5] = 0.02;
        let outputs = vec![
            output(EngineKind::Aeolian, f.canonical, a),
            output(EngineKind::Hydro, f.canonical, h),
        ];
        let r = reconciler.reconcile(&outputs, &f.window, &f.snapshot).unwrap();
        assert_eq!(r.sources[5], CellSource::Conflict);
        assert_eq!(r.diagnostics.conflicts, 1);
        assert!((r.delta[5] - 0.03).abs() < 1e-15);
    }

    #[test]
    fn test_small_residual_is_redistributed() {
        let f = fixture();
        let params = ReconcileParams {
            mass_tolerance: 1e-9,
            mass_hard_ceiling: 0.5,
        };
        let reconciler = FluxReconciler::new(f.registry.clone(), f.canonical, params);
        // 湿单元里的风沙增量被丢弃，形成残差
        let mut a = vec![0.01; 16];
        a[0] = 0.001;
        let outputs = vec![output(EngineKind::Aeolian, f.canonical, a)];
        let r = reconciler.reconcile(&outputs, &f.window, &f.snapshot).unwrap();
        let violation = r.diagnostics.violation.unwrap();
        assert!(violation.redistributed);
        assert!((r.diagnostics.applied_volume - r.diagnostics.resampled_volume).abs() < 1e-12);
    }

    #[test]
    fn test_large_residual_is_fatal() {
        let f = fixture();
        let reconciler = FluxReconciler::new(f.registry.clone(), f.canonical, ReconcileParams::default());
        let mut a = vec![0.0; 16];
        a[0] = 0.1;
        let outputs = vec![output(EngineKind::Aeolian, f.canonical, a)];
        let err = reconciler.reconcile(&outputs, &f.window, &f.snapshot).unwrap_err();
        assert!(matches!(err, ReconcileError::MassConservation(_)));
    }

    #[test]
    fn test_coarse_native_grid_is_resampled() {
        let f = fixture();
        let coarse = f
            .registry
            .register(GridSpec::new("coarse", [0.0, 0.0], 2, 2, 2.0, 2.0))
            .unwrap();
        let reconciler = FluxReconciler::new(f.registry.clone(), f.canonical, ReconcileParams::default());
        let outputs = vec![output(EngineKind::Hydro, coarse, vec![0.04, 0.0, 0.0, 0.0])];
        let r = reconciler.reconcile(&outputs, &f.window, &f.snapshot).unwrap();
        for c in [0, 1, 4, 5] {
            assert!((r.delta[c] - 0.04).abs() < 1e-15);
        }
        assert!(r.diagnostics.boundary_flux.abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_engine_rejected() {
        let f = fixture();
        let reconciler = FluxReconciler::new(f.registry.clone(), f.canonical, ReconcileParams::default());
        let outputs = vec![
            output(EngineKind::Hydro, f.canonical, vec![0.0; 16]),
            output(EngineKind::Hydro, f.canonical, vec![0.0; 16]),
        ];
        assert!(matches!(
            reconciler.reconcile(&outputs, &f.window, &f.snapshot),
            Err(ReconcileError::DuplicateEngine(EngineKind::Hydro))
        ));
    }
}
