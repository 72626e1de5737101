// crates/cm_physics/src/vegetation/manager.rs

//! 植被状态更新
//!
//! 每个子步在地形更新之后调用一次 [`VegetationManager::update`]：
//!
//! 1. 单步高程变化 `Δz = z_after − z_before` 计入定植以来的累计掩埋
//! 2. 窗口内淹没时长累加到连续淹没时长，无淹没则清零
//! 3. 死亡：累计掩埋 > `b_max`、累计侵蚀 > `e_max`、连续淹没 > 存活上限、
//!    窗口平均水深 > 致死水深，或 `|Δz| ≥ 根深`
//! 4. 部分胁迫：`f *= 1 − |Δz| / 根深`
//! 5. Logistic 增长取解析解 `f₁ = f₀ / (f₀ + (1 − f₀)·e^(−rΔt))`，
//!    窗口再长也不会越过承载上限；株高同理趋向最大株高
//! 6. 可选定植：裸地单元若未淹没，或水深低于定植水深且床面稳定，
//!    以定植密度作为幼苗出现
//!
//! 没有任何激活外力的窗口不改变植被。密度与株高越界时截断并返回
//! [`VegetationStateError`]。

use cm_foundation::{CmError, CmResult};
use cm_grid::{CoordKey, Grid};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::params::VegetationParams;
use super::state::{GrowthStage, VegetationCell, VegetationState, VegetationStateError};
use crate::forcing::ForcingWindow;
use crate::topography::TopographySnapshot;

/// 单元事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellEvent {
    None,
    Died,
    Established,
}

/// 一次植被更新的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VegetationUpdate {
    /// 是否因窗口无外力而跳过
    pub skipped: bool,
    /// 密度增量
    pub density_delta: Vec<f64>,
    /// 株高增量
    pub height_delta: Vec<f64>,
    /// 死亡单元数
    pub deaths: usize,
    /// 新定植单元数
    pub established: usize,
    /// 越界截断记录
    pub errors: Vec<VegetationStateError>,
}

/// 植被状态管理器
#[derive(Debug, Clone)]
pub struct VegetationManager {
    params: VegetationParams,
    keys: Vec<CoordKey>,
}

impl VegetationManager {
    /// 为规范网格创建
    pub fn new(params: VegetationParams, grid: &Grid) -> CmResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            keys: grid.coord_keys(),
        })
    }

    /// 参数
    pub fn params(&self) -> &VegetationParams {
        &self.params
    }

    /// 根据地形变化与外力更新植被
    pub fn update(
        &self,
        state: &mut VegetationState,
        before: &TopographySnapshot,
        after: &TopographySnapshot,
        window: &ForcingWindow,
    ) -> CmResult<VegetationUpdate> {
        let n = state.len();
        CmError::check_size("vegetation", self.keys.len(), n)?;
        CmError::check_size("topography_before", n, before.n_cells())?;
        CmError::check_size("topography_after", n, after.n_cells())?;

        if window.is_empty() {
            return Ok(VegetationUpdate {
                skipped: true,
                density_delta: vec![0.0; n],
                height_delta: vec![0.0; n],
                ..Default::default()
            });
        }

        let duration = window.duration();
        let params = &self.params;
        let keys = &self.keys;

        let results: Vec<(f64, f64, CellEvent, Vec<VegetationStateError>)> = state
            .cells_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(c, cell)| {
                let old = *cell;
                let dz = after.elevation[c] - before.elevation[c];
                let exposure = Exposure {
                    dz,
                    inundated: window.inundation_duration(c, after.elevation[c]),
                    depth: window.water_depth(c, after.elevation[c]),
                    duration,
                };
                let event = step_cell(cell, &exposure, params);
                let errors = clamp_cell(cell, c, keys[c], params);
                (cell.density - old.density, cell.height - old.height, event, errors)
            })
            .collect();

        let mut update = VegetationUpdate {
            skipped: false,
            density_delta: Vec::with_capacity(n),
            height_delta: Vec::with_capacity(n),
            ..Default::default()
        };
        for (dd, dh, event, errors) in results {
            update.density_delta.push(dd);
            update.height_delta.push(dh);
            match event {
                CellEvent::Died => update.deaths += 1,
                CellEvent::Established => update.established += 1,
                CellEvent::None => {}
            }
            update.errors.extend(errors);
        }

        for err in &update.errors {
            warn!("{}", err);
        }
        debug!(
            t0 = window.t0(),
            deaths = update.deaths,
            established = update.established,
            "植被更新完成"
        );
        Ok(update)
    }
}

/// 单元在一个窗口内受到的作用
#[derive(Debug, Clone, Copy)]
struct Exposure {
    /// 单步高程变化 [m]
    dz: f64,
    /// 窗口内淹没时长 [s]
    inundated: f64,
    /// 窗口平均水深 [m]
    depth: f64,
    /// 窗口时长 [s]
    duration: f64,
}

/// Logistic 方程 `dx/dt = r·x·(1 − x)` 经过 `rate = r·Δt` 后的解析解
#[inline]
fn logistic(x0: f64, rate: f64) -> f64 {
    if x0 <= 0.0 || rate == 0.0 {
        return x0;
    }
    x0 / (x0 + (1.0 - x0) * (-rate).exp())
}

/// 单元更新规则
fn step_cell(cell: &mut VegetationCell, e: &Exposure, p: &VegetationParams) -> CellEvent {
    let dz = e.dz;
    if !cell.stage.is_alive() {
        let dry = e.inundated <= 0.0;
        let shallow = e.depth < p.establishment_depth;
        let stable = dz < p.establishment_roc * p.root_depth;
        if p.establishment && (dry || (shallow && stable)) {
            *cell = VegetationCell {
                density: p.establishment_density,
                height: p.seedling_height,
                stage: GrowthStage::Seedling,
                burial: 0.0,
                inundation: 0.0,
            };
            return CellEvent::Established;
        }
        return CellEvent::None;
    }

    cell.burial += dz;
    cell.inundation = if e.inundated > 0.0 {
        cell.inundation + e.inundated
    } else {
        0.0
    };

    let lethal = cell.burial > p.b_max
        || cell.burial < -p.e_max
        || cell.inundation > p.inundation_limit
        || e.depth > p.drowning_depth
        || dz.abs() >= p.root_depth;
    if lethal {
        cell.kill();
        return CellEvent::Died;
    }

    if dz != 0.0 {
        cell.density *= 1.0 - dz.abs() / p.root_depth;
    }

    let rate = e.duration * p.growth_rate;
    cell.density = logistic(cell.density, rate);
    cell.height = p.max_height * logistic(cell.height / p.max_height, rate);

    let stress = (cell.burial / p.b_max)
        .max(-cell.burial / p.e_max)
        .max(cell.inundation / p.inundation_limit);
    cell.stage = if stress > p.stress_fraction {
        GrowthStage::Stressed
    } else if cell.density >= p.mature_density {
        GrowthStage::Mature
    } else {
        GrowthStage::Seedling
    };
    CellEvent::None
}

/// 截断越界值
fn clamp_cell(cell: &mut VegetationCell, c: usize, key: CoordKey, p: &VegetationParams) -> Vec<VegetationStateError> {
    let mut errors = Vec::new();
    let mut check = |field: &str, value: &mut f64, lo: f64, hi: f64| {
        let clamped = if value.is_nan() { lo } else { value.clamp(lo, hi) };
        if clamped != *value {
            errors.push(VegetationStateError {
                cell: c,
                key,
                field: field.to_string(),
                value: *value,
                clamped,
            });
            *value = clamped;
        }
    };
    check("density", &mut cell.density, 0.0, 1.0);
    check("height", &mut cell.height, 0.0, p.max_height);
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forcing::{ForcingEvent, ForcingTimeline, TimeSeries};
    use crate::surface::SeedSurface;
    use crate::topography::TopographyState;
    use cm_grid::{GridRegistry, GridSpec, ResampleTolerance};
    use std::sync::Arc;

    fn grid() -> Arc<Grid> {
        let r = GridRegistry::new(ResampleTolerance::default());
        let id = r.register(GridSpec::new("g", [0.0, 0.0], 2, 2, 1.0, 1.0)).unwrap();
        r.grid(id).unwrap()
    }

    /// 干燥、无高程变化的窗口
    fn exposure(dz: f64, inundated: f64, depth: f64, duration: f64) -> Exposure {
        Exposure {
            dz,
            inundated,
            depth,
            duration,
        }
    }

    fn windy(g: &Grid) -> ForcingWindow {
        let wind = crate::forcing::presets::default_wind(7200.0).unwrap();
        let tl = ForcingTimeline::new(7200.0)
            .with_event(ForcingEvent::wind("w", wind, 0.0, 7200.0))
            .unwrap();
        ForcingWindow::build(&tl, 0.0, 3600.0, g)
    }

    #[test]
    fn test_empty_window_is_noop() {
        let g = grid();
        let mgr = VegetationManager::new(VegetationParams::default(), &g).unwrap();
        let seed = SeedSurface::flat(4, 0.0).with_vegetation(0, 0.5, 0.3);
        let mut veg = VegetationState::from_seed(&seed, 0.5);
        let original = veg.clone();
        let topo = TopographyState::from_seed(&seed).unwrap();
        let snap = topo.snapshot();
        let window = ForcingWindow::empty(0.0, 3600.0, 4);
        let update = mgr.update(&mut veg, &snap, &snap, &window).unwrap();
        assert!(update.skipped);
        assert_eq!(veg, original);
    }

    #[test]
    fn test_burial_beyond_b_max_kills() {
        let g = grid();
        let params = VegetationParams::default();
        let mgr = VegetationManager::new(params.clone(), &g).unwrap();
        let seed = SeedSurface::flat(4, 0.0).with_vegetation(0, 0.8, 0.5);
        let mut veg = VegetationState::from_seed(&seed, 0.5);
        veg.cells_mut()[0].burial = params.b_max;

        let mut topo = TopographyState::from_seed(&seed).unwrap();
        let before = topo.snapshot();
        topo.apply(&[1e-3, 0.0, 0.0, 0.0]).unwrap();
        let after = topo.snapshot();

        let update = mgr.update(&mut veg, &before, &after, &windy(&g)).unwrap();
        assert_eq!(veg.cell(0).stage, GrowthStage::Dead);
        assert_eq!(veg.cell(0).density, 0.0);
        assert_eq!(update.deaths, 1);
        assert!((update.density_delta[0] + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_partial_burial_stress() {
        let p = VegetationParams {
            growth_rate: 0.0,
            ..Default::default()
        };
        let mut cell = VegetationCell::seeded(0.8, 0.5, 0.5);
        step_cell(&mut cell, &exposure(0.05, 0.0, 0.0, 3600.0), &p);
        assert!((cell.density - 0.8 * (1.0 - 0.05 / 0.2)).abs() < 1e-12);
        assert!((cell.burial - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_root_depth_change_kills() {
        let p = VegetationParams {
            b_max: 10.0,
            ..Default::default()
        };
        let mut cell = VegetationCell::seeded(0.8, 0.5, 0.5);
        assert_eq!(step_cell(&mut cell, &exposure(p.root_depth, 0.0, 0.0, 1.0), &p), CellEvent::Died);
    }

    #[test]
    fn test_inundation_accumulates_and_resets() {
        let p = VegetationParams::default();
        let mut cell = VegetationCell::seeded(0.8, 0.5, 0.5);
        step_cell(&mut cell, &exposure(0.0, 600.0, 0.1, 600.0), &p);
        step_cell(&mut cell, &exposure(0.0, 600.0, 0.1, 600.0), &p);
        assert_eq!(cell.inundation, 1200.0);
        step_cell(&mut cell, &exposure(0.0, 0.0, 0.0, 600.0), &p);
        assert_eq!(cell.inundation, 0.0);

        let mut drowned = VegetationCell::seeded(0.8, 0.5, 0.5);
        assert_eq!(
            step_cell(
                &mut drowned,
                &exposure(0.0, p.inundation_limit + 1.0, 0.1, p.inundation_limit + 1.0),
                &p
            ),
            CellEvent::Died
        );
    }

    #[test]
    fn test_logistic_growth() {
        let p = VegetationParams {
            growth_rate: 1e-4,
            ..Default::default()
        };
        let mut cell = VegetationCell::seeded(0.2, 0.1, 0.5);
        step_cell(&mut cell, &exposure(0.0, 0.0, 0.0, 1000.0), &p);
        let expected = 0.2 / (0.2 + 0.8 * (-0.1f64).exp());
        assert!((cell.density - expected).abs() < 1e-12);
        assert!(cell.height > 0.1);
        assert_eq!(cell.stage, GrowthStage::Seedling);
    }

    #[test]
    fn test_long_window_growth_stays_below_capacity() {
        let p = VegetationParams {
            growth_rate: 1e-3,
            ..Default::default()
        };
        let mut cell = VegetationCell::seeded(0.9, 0.95, 0.5);
        // r·Δt = 50，显式格式会越过 1
        step_cell(&mut cell, &exposure(0.0, 0.0, 0.0, 5.0e4), &p);
        assert!(cell.density > 0.99 && cell.density <= 1.0);
        assert!(cell.height > 0.95 && cell.height <= p.max_height);
        assert!(clamp_cell(&mut cell, 0, CoordKey { x: 0, y: 0 }, &p).is_empty());
    }

    #[test]
    fn test_stress_stage() {
        let p = VegetationParams::default();
        let mut cell = VegetationCell::seeded(0.8, 0.5, 0.5);
        cell.burial = 0.6 * p.b_max;
        step_cell(&mut cell, &exposure(0.0, 0.0, 0.0, 1.0), &p);
        assert_eq!(cell.stage, GrowthStage::Stressed);
    }

    #[test]
    fn test_establishment_optional() {
        let mut p = VegetationParams::default();
        let mut cell = VegetationCell::BARE;
        assert_eq!(step_cell(&mut cell, &exposure(0.0, 0.0, 0.0, 1.0), &p), CellEvent::None);
        p.establishment = true;
        assert_eq!(step_cell(&mut cell, &exposure(0.0, 0.0, 0.0, 1.0), &p), CellEvent::Established);
        assert_eq!(cell.density, p.establishment_density);
        assert_eq!(cell.stage, GrowthStage::Seedling);
    }

    #[test]
    fn test_establishment_requires_shallow_water() {
        let p = VegetationParams {
            establishment: true,
            ..Default::default()
        };
        // 湿、床面稳定但水深超过定植水深
        let mut deep = VegetationCell::BARE;
        let event = step_cell(&mut deep, &exposure(0.0, 600.0, p.establishment_depth + 0.2, 600.0), &p);
        assert_eq!(event, CellEvent::None);
        assert_eq!(deep.stage, GrowthStage::Dead);
        assert_eq!(deep.density, 0.0);

        let mut shallow = VegetationCell::BARE;
        let event = step_cell(&mut shallow, &exposure(0.0, 600.0, p.establishment_depth * 0.5, 600.0), &p);
        assert_eq!(event, CellEvent::Established);

        // 浅水但床面不稳定
        let mut moving = VegetationCell::BARE;
        let dz = p.establishment_roc * p.root_depth * 2.0;
        let event = step_cell(&mut moving, &exposure(dz, 600.0, 0.1, 600.0), &p);
        assert_eq!(event, CellEvent::None);
    }

    #[test]
    fn test_deep_water_drowns() {
        let p = VegetationParams::default();
        let mut cell = VegetationCell::seeded(0.8, 0.5, 0.5);
        let event = step_cell(&mut cell, &exposure(0.0, 600.0, p.drowning_depth + 0.1, 600.0), &p);
        assert_eq!(event, CellEvent::Died);
        assert_eq!(cell.density, 0.0);

        let mut wading = VegetationCell::seeded(0.8, 0.5, 0.5);
        let event = step_cell(&mut wading, &exposure(0.0, 600.0, p.drowning_depth, 600.0), &p);
        assert_eq!(event, CellEvent::None);
        assert!(wading.stage.is_alive());
    }

    #[test]
    fn test_deep_tide_kills_through_update() {
        let g = grid();
        let mgr = VegetationManager::new(VegetationParams::default(), &g).unwrap();
        let seed = SeedSurface::flat(4, 0.0)
            .with_vegetation(0, 0.8, 0.5)
            .with_vegetation(3, 0.8, 0.5);
        let mut veg = VegetationState::from_seed(&seed, 0.5);
        let mut topo = TopographyState::from_seed(&seed).unwrap();
        topo.apply(&[-2.0, 0.0, 0.0, 0.0]).unwrap();
        let snap = topo.snapshot();

        let tl = ForcingTimeline::new(3600.0)
            .with_event(ForcingEvent::water_level("tide", TimeSeries::constant(0.3), 0.0, 3600.0))
            .unwrap();
        let window = ForcingWindow::build(&tl, 0.0, 600.0, &g);
        let update = mgr.update(&mut veg, &snap, &snap, &window).unwrap();
        // 单元 0 水深 2.3 m，单元 3 水深 0.3 m
        assert_eq!(update.deaths, 1);
        assert_eq!(veg.cell(0).stage, GrowthStage::Dead);
        assert!(veg.cell(3).stage.is_alive());
    }

    #[test]
    fn test_clamp_reports_error() {
        let p = VegetationParams::default();
        let mut cell = VegetationCell::seeded(0.9, 0.5, 0.5);
        cell.density = 1.2;
        let errors = clamp_cell(&mut cell, 3, CoordKey { x: 0, y: 0 }, &p);
        assert_eq!(errors.len(), 1);
        assert_eq!(cell.density, 1.0);
        assert_eq!(errors[0].field, "density");
    }
}
