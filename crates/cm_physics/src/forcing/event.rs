// crates/cm_physics/src/forcing/event.rs

//! 外力事件
//!
//! 每个事件有类型、时间序列、作用时间窗和空间掩码。
//!
//! | 类型 | 序列 | 激活的引擎 |
//! |------|------|-----------|
//! | `Wind` | 风速矢量 | 风沙 |
//! | `Water` | 水位或流量 | 水动力 |
//! | `Storm` | 水位（风暴增水）或流量 | 水动力 |

use cm_foundation::{CmError, CmResult};
use serde::{Deserialize, Serialize};

use super::mask::SpatialMask;
use super::timeseries::{TimeSeries, VectorTimeSeries};

/// 外力类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcingKind {
    /// 风
    Wind,
    /// 潮汐或径流
    Water,
    /// 风暴
    Storm,
}

impl ForcingKind {
    /// 是否为水体外力（决定湿单元）
    pub fn is_water(self) -> bool {
        matches!(self, Self::Water | Self::Storm)
    }
}

impl std::fmt::Display for ForcingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wind => write!(f, "wind"),
            Self::Water => write!(f, "water"),
            Self::Storm => write!(f, "storm"),
        }
    }
}

/// 外力时间序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "series", rename_all = "snake_case")]
pub enum ForcingSeries {
    /// 风速矢量 (u, v) [m/s]
    Wind(VectorTimeSeries),
    /// 水位 [m]，仅淹没高程低于水位的单元
    WaterLevel(TimeSeries),
    /// 流量 [m³/s]，淹没整个掩码
    Discharge(TimeSeries),
}

/// 外力事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcingEvent {
    /// 事件名
    pub name: String,
    /// 类型
    pub kind: ForcingKind,
    /// 时间序列
    pub series: ForcingSeries,
    /// 起始时间 [s]
    pub start: f64,
    /// 结束时间 [s]
    pub end: f64,
    /// 空间掩码
    #[serde(default)]
    pub mask: SpatialMask,
}

impl ForcingEvent {
    /// 风事件
    pub fn wind(name: impl Into<String>, series: VectorTimeSeries, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            kind: ForcingKind::Wind,
            series: ForcingSeries::Wind(series),
            start,
            end,
            mask: SpatialMask::Everywhere,
        }
    }

    /// 水位事件（潮汐）
    pub fn water_level(name: impl Into<String>, series: TimeSeries, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            kind: ForcingKind::Water,
            series: ForcingSeries::WaterLevel(series),
            start,
            end,
            mask: SpatialMask::Everywhere,
        }
    }

    /// 流量事件（径流）
    pub fn discharge(name: impl Into<String>, series: TimeSeries, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            kind: ForcingKind::Water,
            series: ForcingSeries::Discharge(series),
            start,
            end,
            mask: SpatialMask::Everywhere,
        }
    }

    /// 风暴事件
    pub fn storm(name: impl Into<String>, series: ForcingSeries, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            kind: ForcingKind::Storm,
            series,
            start,
            end,
            mask: SpatialMask::Everywhere,
        }
    }

    /// 设置空间掩码
    pub fn with_mask(mut self, mask: SpatialMask) -> Self {
        self.mask = mask;
        self
    }

    /// 校验类型与序列匹配
    pub fn validate(&self) -> CmResult<()> {
        if !(self.start.is_finite() && self.end.is_finite()) || self.end <= self.start {
            return Err(CmError::invalid_input(format!(
                "事件 '{}' 的时间窗无效: [{}, {})",
                self.name, self.start, self.end
            )));
        }
        let ok = match (&self.series, self.kind) {
            (ForcingSeries::Wind(_), ForcingKind::Wind) => true,
            (ForcingSeries::WaterLevel(_) | ForcingSeries::Discharge(_), kind) => kind.is_water(),
            _ => false,
        };
        if !ok {
            return Err(CmError::invalid_input(format!(
                "事件 '{}' 的类型 {} 与序列不匹配",
                self.name, self.kind
            )));
        }
        Ok(())
    }

    /// 与区间 `[t0, t1)` 是否有正长度重叠
    pub fn overlaps(&self, t0: f64, t1: f64) -> bool {
        self.start.max(t0) < self.end.min(t1)
    }

    /// 时刻 `t` 是否在作用时间窗内
    pub fn is_active_at(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_kind_series_pairing() {
        let level = TimeSeries::constant(1.0);
        let ok = ForcingEvent::water_level("tide", level.clone(), 0.0, 10.0);
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.kind = ForcingKind::Wind;
        assert!(bad.validate().is_err());

        let storm = ForcingEvent::storm("surge", ForcingSeries::WaterLevel(level), 0.0, 5.0);
        assert!(storm.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_window() {
        let e = ForcingEvent::discharge("q", TimeSeries::constant(1.0), 5.0, 5.0);
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_overlap_is_half_open() {
        let e = ForcingEvent::discharge("q", TimeSeries::constant(1.0), 10.0, 20.0);
        assert!(e.overlaps(15.0, 25.0));
        assert!(!e.overlaps(20.0, 30.0));
        assert!(!e.overlaps(0.0, 10.0));
        assert!(e.is_active_at(10.0));
        assert!(!e.is_active_at(20.0));
    }
}
