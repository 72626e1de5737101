// crates/cm_workflow/src/schedule.rs

//! 窗口调度
//!
//! 调度器是纯函数式的：给定当前时间与时间线，计算下一个窗口
//! `[t, t + dt]`，其中
//!
//! ```text
//! dt = min(各激活引擎稳定子步, max_window, 距下一个外力断点, 距时间线结束)
//! ```
//!
//! 每个激活引擎在调度条目中占一个显式的 [`EngineStep`]，不存在共享的可变时钟。
//!
//! 稳定子步小于 `min_step` 时窗口仍取 `min_step`，并记录警告；
//! [`ScheduleEntry::unstable_engines`] 列出这些引擎。

use cm_config::ExecutionConfig;
use cm_grid::Grid;
use cm_physics::{AdapterFailure, EngineKind, ForcingTimeline, ForcingWindow};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 单个引擎的子步
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineStep {
    /// 引擎
    pub kind: EngineKind,
    /// 引擎报告的稳定子步 [s]
    pub stable_dt: f64,
}

/// 调度条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// 窗口序号
    pub step: u64,
    /// 起点 [s]
    pub t0: f64,
    /// 终点 [s]
    pub t1: f64,
    /// 激活的引擎
    pub engines: Vec<EngineStep>,
}

impl ScheduleEntry {
    /// 窗口长度 [s]
    pub fn dt(&self) -> f64 {
        self.t1 - self.t0
    }

    /// 没有激活引擎
    pub fn is_idle(&self) -> bool {
        self.engines.is_empty()
    }

    /// 激活的引擎类型
    pub fn kinds(&self) -> Vec<EngineKind> {
        self.engines.iter().map(|e| e.kind).collect()
    }

    /// 稳定子步小于窗口长度的引擎（窗口被最小子步撑开）
    pub fn unstable_engines(&self) -> Vec<EngineKind> {
        let dt = self.dt();
        self.engines
            .iter()
            .filter(|e| e.stable_dt > 0.0 && e.stable_dt < dt)
            .map(|e| e.kind)
            .collect()
    }

    /// 起点不变、长度减半的条目
    pub fn halved(&self) -> Self {
        Self {
            t1: self.t0 + 0.5 * self.dt(),
            ..self.clone()
        }
    }
}

/// 窗口内需要调用的引擎
pub fn engines_for(window: &ForcingWindow) -> Vec<EngineKind> {
    let mut kinds = Vec::new();
    if window.has_wind() {
        kinds.push(EngineKind::Aeolian);
    }
    if window.has_water() {
        kinds.push(EngineKind::Hydro);
    }
    kinds
}

/// 窗口调度器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduler {
    max_window: f64,
    min_step: f64,
}

impl Scheduler {
    /// 创建
    pub fn new(max_window: f64, min_step: f64) -> Self {
        Self { max_window, min_step }
    }

    /// 从执行配置创建
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.max_window, config.min_step)
    }

    /// 最小子步 [s]
    pub fn min_step(&self) -> f64 {
        self.min_step
    }

    /// 从 `t` 出发的窗口上界（不跨越外力断点）
    pub fn horizon(&self, timeline: &ForcingTimeline, t: f64) -> f64 {
        (t + self.max_window)
            .min(timeline.next_breakpoint(t))
            .min(timeline.end_time)
    }

    /// 计算下一个窗口
    ///
    /// `stable_step` 为每个激活引擎返回其稳定子步，失败直接向上传递。
    pub fn next<F>(
        &self,
        step: u64,
        t: f64,
        timeline: &ForcingTimeline,
        grid: &Grid,
        mut stable_step: F,
    ) -> Result<(ScheduleEntry, ForcingWindow), AdapterFailure>
    where
        F: FnMut(EngineKind, &ForcingWindow) -> Result<f64, AdapterFailure>,
    {
        let horizon = self.horizon(timeline, t);
        let probe = ForcingWindow::build(timeline, t, horizon, grid);

        let mut engines = Vec::new();
        for kind in engines_for(&probe) {
            let stable_dt = stable_step(kind, &probe)?;
            engines.push(EngineStep { kind, stable_dt });
        }

        let remaining = horizon - t;
        let limit = engines
            .iter()
            .map(|e| e.stable_dt)
            .filter(|dt| *dt > 0.0)
            .fold(remaining, f64::min);
        let dt = limit.max(self.min_step).min(remaining);
        let t1 = if dt < remaining { t + dt } else { horizon };
        if limit < self.min_step && dt > limit {
            for e in engines.iter().filter(|e| e.stable_dt > 0.0 && e.stable_dt < dt) {
                warn!(
                    step,
                    engine = %e.kind,
                    stable_dt = e.stable_dt,
                    min_step = self.min_step,
                    "稳定子步低于最小子步，窗口按最小子步推进"
                );
            }
        }

        let window = if t1 == horizon {
            probe
        } else {
            ForcingWindow::build(timeline, t, t1, grid)
        };
        Ok((ScheduleEntry { step, t0: t, t1, engines }, window))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_grid::{GridRegistry, GridSpec, ResampleTolerance};
    use cm_physics::forcing::presets;
    use cm_physics::ForcingEvent;
    use std::sync::Arc;

    fn grid() -> Arc<Grid> {
        let registry = GridRegistry::new(ResampleTolerance::default());
        let id = registry.register(GridSpec::new("g", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
        registry.grid(id).unwrap()
    }

    fn windy(end: f64) -> ForcingTimeline {
        ForcingTimeline::new(end)
            .with_event(ForcingEvent::wind(
                "wind",
                presets::constant_wind(10.0, 270.0, end, 3600.0).unwrap(),
                0.0,
                end,
            ))
            .unwrap()
    }

    #[test]
    fn test_empty_timeline_uses_max_window() {
        let g = grid();
        let timeline = ForcingTimeline::new(10_000.0);
        let scheduler = Scheduler::new(3600.0, 1.0);
        let (entry, window) = scheduler
            .next(1, 0.0, &timeline, &g, |_, _| Ok(f64::INFINITY))
            .unwrap();
        assert!(entry.is_idle());
        assert_eq!(entry.t1, 3600.0);
        assert!(window.is_empty());
    }

    #[test]
    fn test_stable_step_limits_window() {
        let g = grid();
        let timeline = windy(7200.0);
        let scheduler = Scheduler::new(3600.0, 1.0);
        let (entry, window) = scheduler.next(1, 0.0, &timeline, &g, |_, _| Ok(120.0)).unwrap();
        assert_eq!(entry.kinds(), vec![EngineKind::Aeolian]);
        assert_eq!(entry.engines[0].stable_dt, 120.0);
        assert_eq!(entry.dt(), 120.0);
        assert_eq!(window.t1(), 120.0);
    }

    #[test]
    fn test_min_step_floor_and_timeline_end() {
        let g = grid();
        let timeline = windy(100.5);
        let scheduler = Scheduler::new(3600.0, 10.0);
        let (entry, _) = scheduler.next(1, 0.0, &timeline, &g, |_, _| Ok(0.01)).unwrap();
        assert_eq!(entry.dt(), 10.0);
        assert_eq!(entry.unstable_engines(), vec![EngineKind::Aeolian]);

        let (entry, _) = scheduler.next(2, 95.0, &timeline, &g, |_, _| Ok(0.01)).unwrap();
        assert_eq!(entry.t1, 100.5);
    }

    #[test]
    fn test_stable_engines_not_reported() {
        let g = grid();
        let timeline = windy(7200.0);
        let scheduler = Scheduler::new(3600.0, 10.0);
        let (entry, _) = scheduler.next(1, 0.0, &timeline, &g, |_, _| Ok(120.0)).unwrap();
        assert!(entry.unstable_engines().is_empty());
    }

    #[test]
    fn test_breakpoint_splits_window() {
        let g = grid();
        let tide = presets::sinusoidal_tide(1.0, 44712.0, 5000.0, 600.0).unwrap();
        let timeline = ForcingTimeline::new(5000.0)
            .with_event(ForcingEvent::water_level("tide", tide, 1000.0, 5000.0))
            .unwrap();
        let scheduler = Scheduler::new(3600.0, 1.0);
        let (entry, _) = scheduler
            .next(1, 0.0, &timeline, &g, |_, _| Ok(f64::INFINITY))
            .unwrap();
        assert_eq!(entry.t1, 1000.0);
        assert!(entry.is_idle());

        let (entry, _) = scheduler
            .next(2, 1000.0, &timeline, &g, |_, _| Ok(f64::INFINITY))
            .unwrap();
        assert_eq!(entry.kinds(), vec![EngineKind::Hydro]);
        assert_eq!(entry.t1, 4600.0);
    }

    #[test]
    fn test_stable_step_failure_propagates() {
        let g = grid();
        let timeline = windy(100.0);
        let scheduler = Scheduler::default();
        let err = scheduler
            .next(1, 0.0, &timeline, &g, |kind, _| {
                Err(AdapterFailure::Engine {
                    kind,
                    message: "no".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, AdapterFailure::Engine { .. }));
    }

    #[test]
    fn test_halved_entry() {
        let entry = ScheduleEntry {
            step: 3,
            t0: 100.0,
            t1: 500.0,
            engines: vec![EngineStep {
                kind: EngineKind::Hydro,
                stable_dt: 400.0,
            }],
        };
        let half = entry.halved();
        assert_eq!(half.t0, 100.0);
        assert_eq!(half.t1, 300.0);
        assert_eq!(half.engines, entry.engines);
    }
}
