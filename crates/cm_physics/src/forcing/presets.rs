// crates/cm_physics/src/forcing/presets.rs

//! 常用外力序列
//!
//! 沙丘算例的默认外力：每小时一个点的恒定风，以及每 600 s 一个点的
//! 半日潮 `1.5·sin(2πt / 44712)`。

use cm_foundation::CmResult;
use std::f64::consts::PI;

use super::timeseries::{TimeSeries, VectorTimeSeries};

/// 默认风速 [m/s]
pub const DEFAULT_WIND_SPEED: f64 = 10.0;
/// 默认风向 [度]
pub const DEFAULT_WIND_DIRECTION: f64 = 0.0;
/// 风序列采样间隔 [s]
pub const WIND_INTERVAL: f64 = 3600.0;
/// 半日潮振幅 [m]
pub const TIDE_AMPLITUDE: f64 = 1.5;
/// 半日潮周期 [s]
pub const TIDE_PERIOD: f64 = 44712.0;
/// 潮位序列采样间隔 [s]
pub const TIDE_INTERVAL: f64 = 600.0;

fn sample_times(end: f64, interval: f64) -> Vec<f64> {
    let n = (end / interval).floor().max(0.0) as usize;
    (0..=n).map(|k| k as f64 * interval).collect()
}

/// `[0, end]` 上的恒定风序列
pub fn constant_wind(speed: f64, direction_deg: f64, end: f64, interval: f64) -> CmResult<VectorTimeSeries> {
    let times = sample_times(end, interval);
    let n = times.len();
    VectorTimeSeries::from_speed_direction(times, vec![speed; n], vec![direction_deg; n])
}

/// `[0, end]` 上的正弦潮位序列
pub fn sinusoidal_tide(amplitude: f64, period: f64, end: f64, interval: f64) -> CmResult<TimeSeries> {
    let times = sample_times(end, interval);
    let values = times.iter().map(|t| amplitude * (2.0 * PI * t / period).sin()).collect();
    TimeSeries::new(times, values)
}

/// 默认恒定风
pub fn default_wind(end: f64) -> CmResult<VectorTimeSeries> {
    constant_wind(DEFAULT_WIND_SPEED, DEFAULT_WIND_DIRECTION, end, WIND_INTERVAL)
}

/// 默认半日潮
pub fn semidiurnal_tide(end: f64) -> CmResult<TimeSeries> {
    sinusoidal_tide(TIDE_AMPLITUDE, TIDE_PERIOD, end, TIDE_INTERVAL)
}
