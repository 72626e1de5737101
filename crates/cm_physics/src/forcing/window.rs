// crates/cm_physics/src/forcing/window.rs

//! 外力窗口
//!
//! 一个耦合子步 `[t0, t1)` 内的外力视图，在规范网格上预先求值掩码与
//! 窗口平均风速。窗口构造后只读，由各引擎线程通过 `Arc` 共享。
//!
//! 淹没时长在窗口内等距中点采样，水位序列只淹没高程低于水位的单元，
//! 流量序列淹没整个掩码。

use cm_grid::Grid;
use glam::DVec2;
use rayon::prelude::*;

use super::event::{ForcingEvent, ForcingKind, ForcingSeries};
use super::timeline::ForcingTimeline;

/// 淹没时长采样点数
const INUNDATION_SAMPLES: usize = 16;

/// 一个耦合窗口内的外力
#[derive(Debug, Clone)]
pub struct ForcingWindow {
    t0: f64,
    t1: f64,
    events: Vec<ForcingEvent>,
    /// 每个事件在规范网格上的掩码
    masks: Vec<Vec<bool>>,
    /// 窗口平均风速 [m/s]
    wind: Vec<DVec2>,
    n_cells: usize,
}

impl ForcingWindow {
    /// 从时间线构造
    pub fn build(timeline: &ForcingTimeline, t0: f64, t1: f64, grid: &Grid) -> Self {
        let events: Vec<ForcingEvent> = timeline.active(t0, t1).cloned().collect();
        let masks: Vec<Vec<bool>> = events.iter().map(|e| e.mask.evaluate(grid)).collect();
        let n_cells = grid.n_cells();

        let mut wind = vec![DVec2::ZERO; n_cells];
        for (event, mask) in events.iter().zip(&masks) {
            if let ForcingSeries::Wind(series) = &event.series {
                // 只在事件作用的那部分窗口内取平均，再按时长折算到整个窗口
                let a = t0.max(event.start);
                let b = t1.min(event.end);
                let (u, v) = series.mean_over(a, b);
                let share = if t1 > t0 { (b - a) / (t1 - t0) } else { 1.0 };
                let w = DVec2::new(u, v) * share;
                for (cell, inside) in wind.iter_mut().zip(mask) {
                    if *inside {
                        *cell += w;
                    }
                }
            }
        }

        Self {
            t0,
            t1,
            events,
            masks,
            wind,
            n_cells,
        }
    }

    /// 无外力窗口
    pub fn empty(t0: f64, t1: f64, n_cells: usize) -> Self {
        Self {
            t0,
            t1,
            events: Vec::new(),
            masks: Vec::new(),
            wind: vec![DVec2::ZERO; n_cells],
            n_cells,
        }
    }

    /// 窗口起点
    pub fn t0(&self) -> f64 {
        self.t0
    }

    /// 窗口终点
    pub fn t1(&self) -> f64 {
        self.t1
    }

    /// 窗口时长
    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }

    /// 规范网格单元数
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// 是否没有任何激活事件
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 激活事件
    pub fn events(&self) -> &[ForcingEvent] {
        &self.events
    }

    /// 激活的外力类型（去重，按出现顺序）
    pub fn active_kinds(&self) -> Vec<ForcingKind> {
        let mut kinds = Vec::new();
        for e in &self.events {
            if !kinds.contains(&e.kind) {
                kinds.push(e.kind);
            }
        }
        kinds
    }

    /// 是否有风事件
    pub fn has_wind(&self) -> bool {
        self.events.iter().any(|e| e.kind == ForcingKind::Wind)
    }

    /// 是否有水体事件
    pub fn has_water(&self) -> bool {
        self.events.iter().any(|e| e.kind.is_water())
    }

    fn union_mask(&self, pred: impl Fn(&ForcingEvent) -> bool) -> Vec<bool> {
        let mut out = vec![false; self.n_cells];
        for (event, mask) in self.events.iter().zip(&self.masks) {
            if pred(event) {
                for (o, m) in out.iter_mut().zip(mask) {
                    *o |= *m;
                }
            }
        }
        out
    }

    /// 风事件掩码的并集
    pub fn wind_mask(&self) -> Vec<bool> {
        self.union_mask(|e| e.kind == ForcingKind::Wind)
    }

    /// 水体事件掩码的并集
    pub fn water_mask(&self) -> Vec<bool> {
        self.union_mask(|e| e.kind.is_water())
    }

    /// 单元的窗口平均风速
    pub fn wind(&self, cell: usize) -> DVec2 {
        self.wind[cell]
    }

    /// 窗口平均风场
    pub fn wind_field(&self) -> &[DVec2] {
        &self.wind
    }

    /// 时刻 `t` 单元是否被淹没
    fn inundated_at(&self, cell: usize, elevation: f64, t: f64) -> bool {
        self.events.iter().zip(&self.masks).any(|(event, mask)| {
            if !mask[cell] || !event.is_active_at(t) {
                return false;
            }
            match &event.series {
                ForcingSeries::WaterLevel(level) => level.get_value(t) > elevation,
                ForcingSeries::Discharge(q) => q.get_value(t) > 0.0,
                ForcingSeries::Wind(_) => false,
            }
        })
    }

    /// 窗口内的淹没时长 [s]
    pub fn inundation_duration(&self, cell: usize, elevation: f64) -> f64 {
        if !self.has_water() || self.duration() <= 0.0 {
            return 0.0;
        }
        let dt = self.duration() / INUNDATION_SAMPLES as f64;
        (0..INUNDATION_SAMPLES)
            .filter(|k| self.inundated_at(cell, elevation, self.t0 + (*k as f64 + 0.5) * dt))
            .count() as f64
            * dt
    }

    /// 每个单元的淹没时长
    pub fn inundation_field(&self, elevation: &[f64]) -> Vec<f64> {
        elevation
            .par_iter()
            .enumerate()
            .map(|(c, z)| self.inundation_duration(c, *z))
            .collect()
    }

    /// 湿单元：窗口内有淹没
    pub fn wet_mask(&self, elevation: &[f64]) -> Vec<bool> {
        if !self.has_water() {
            return vec![false; self.n_cells];
        }
        self.inundation_field(elevation).into_iter().map(|d| d > 0.0).collect()
    }

    /// 单元的窗口平均水位（无水位事件时为 `None`）
    pub fn mean_level(&self, cell: usize) -> Option<f64> {
        self.events
            .iter()
            .zip(&self.masks)
            .filter(|(_, mask)| mask[cell])
            .filter_map(|(event, _)| match &event.series {
                ForcingSeries::WaterLevel(level) => {
                    Some(level.mean_over(self.t0.max(event.start), self.t1.min(event.end)))
                }
                _ => None,
            })
            .reduce(f64::max)
    }

    /// 单元的窗口平均水深 [m]
    ///
    /// 由窗口平均水位减去高程得到；只受流量作用的单元没有水深信息，记为 0。
    pub fn water_depth(&self, cell: usize, elevation: f64) -> f64 {
        self.mean_level(cell).map_or(0.0, |level| (level - elevation).max(0.0))
    }

    /// 单元的窗口平均流量 [m³/s]
    pub fn discharge(&self, cell: usize) -> f64 {
        self.events
            .iter()
            .zip(&self.masks)
            .filter(|(_, mask)| mask[cell])
            .filter_map(|(event, _)| match &event.series {
                ForcingSeries::Discharge(q) => Some(q.mean_over(self.t0.max(event.start), self.t1.min(event.end))),
                _ => None,
            })
            .sum()
    }
}
