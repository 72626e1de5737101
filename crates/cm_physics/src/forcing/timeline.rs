// crates/cm_physics/src/forcing/timeline.rs

//! 外力时间线
//!
//! 时间线是所有外力事件的集合加上模拟结束时间。调度器据此判断哪些引擎
//! 在某个窗口内激活，以及下一个外力断点（事件开始或结束）在何时。

use cm_foundation::{CmError, CmResult};
use serde::{Deserialize, Serialize};

use super::event::ForcingEvent;

/// 外力时间线
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForcingTimeline {
    /// 起始时间 [s]
    #[serde(default)]
    pub start_time: f64,
    /// 结束时间 [s]
    pub end_time: f64,
    /// 事件
    #[serde(default)]
    pub events: Vec<ForcingEvent>,
}

impl ForcingTimeline {
    /// 创建 `[0, end_time]` 的空时间线
    pub fn new(end_time: f64) -> Self {
        Self {
            start_time: 0.0,
            end_time,
            events: Vec::new(),
        }
    }

    /// 添加事件
    pub fn add(&mut self, event: ForcingEvent) -> CmResult<()> {
        event.validate()?;
        self.events.push(event);
        Ok(())
    }

    /// 链式添加事件
    pub fn with_event(mut self, event: ForcingEvent) -> CmResult<Self> {
        self.add(event)?;
        Ok(self)
    }

    /// 校验整个时间线
    pub fn validate(&self) -> CmResult<()> {
        if !(self.start_time.is_finite() && self.end_time.is_finite()) || self.end_time < self.start_time {
            return Err(CmError::invalid_input(format!(
                "时间线范围无效: [{}, {}]",
                self.start_time, self.end_time
            )));
        }
        self.events.iter().try_for_each(ForcingEvent::validate)
    }

    /// 在 `[t0, t1)` 内激活的事件
    pub fn active(&self, t0: f64, t1: f64) -> impl Iterator<Item = &ForcingEvent> {
        self.events.iter().filter(move |e| e.overlaps(t0, t1))
    }

    /// `t` 之后的第一个断点（不含 `t`），不超过结束时间
    pub fn next_breakpoint(&self, t: f64) -> f64 {
        self.events
            .iter()
            .flat_map(|e| [e.start, e.end])
            .filter(|&b| b > t)
            .fold(self.end_time, f64::min)
    }

    /// 是否已结束
    pub fn is_exhausted(&self, t: f64) -> bool {
        t >= self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forcing::TimeSeries;

    fn timeline() -> ForcingTimeline {
        ForcingTimeline::new(100.0)
            .with_event(ForcingEvent::discharge("a", TimeSeries::constant(1.0), 10.0, 30.0))
            .unwrap()
            .with_event(ForcingEvent::discharge("b", TimeSeries::constant(1.0), 25.0, 200.0))
            .unwrap()
    }

    #[test]
    fn test_next_breakpoint() {
        let tl = timeline();
        assert_eq!(tl.next_breakpoint(0.0), 10.0);
        assert_eq!(tl.next_breakpoint(10.0), 25.0);
        assert_eq!(tl.next_breakpoint(25.0), 30.0);
        assert_eq!(tl.next_breakpoint(30.0), 100.0);
    }

    #[test]
    fn test_active_events() {
        let tl = timeline();
        assert_eq!(tl.active(0.0, 10.0).count(), 0);
        assert_eq!(tl.active(26.0, 28.0).count(), 2);
    }

    #[test]
    fn test_add_rejects_invalid_event() {
        let mut tl = ForcingTimeline::new(10.0);
        assert!(tl
            .add(ForcingEvent::discharge("bad", TimeSeries::constant(1.0), 5.0, 1.0))
            .is_err());
    }
}
