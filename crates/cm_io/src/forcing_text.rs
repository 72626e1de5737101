// crates/cm_io/src/forcing_text.rs

//! 风场 / 潮位文本文件
//!
//! 两种按行组织的纯文本格式，空行和 `#` 开头的行被忽略：
//!
//! ```text
//! # wind.txt: 时间[s] 风速[m/s] 风向[度, 来向]
//! 0 10.000000 0.000000
//! 3600 10.000000 0.000000
//!
//! # tide.txt: 时间[s] 水位[m]
//! 0 0.000000
//! 600 0.126393
//! ```

use std::fmt::Write as _;
use std::path::Path;

use cm_foundation::{CmError, CmResult};
use cm_physics::forcing::{TimeSeries, VectorTimeSeries};
use tracing::info;

/// 解析固定列数的数值行
fn parse_columns<const N: usize>(text: &str, origin: &Path) -> CmResult<Vec<[f64; N]>> {
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != N {
            return Err(CmError::parse(
                origin,
                i + 1,
                format!("期望 {} 列, 实际 {} 列", N, fields.len()),
            ));
        }
        let mut row = [0.0; N];
        for (slot, field) in row.iter_mut().zip(&fields) {
            *slot = field
                .parse::<f64>()
                .map_err(|e| CmError::parse(origin, i + 1, format!("'{}': {}", field, e)))?;
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(CmError::parse(origin, 0, "文件不包含数据行"));
    }
    Ok(rows)
}

fn read_text(path: &Path) -> CmResult<String> {
    if !path.exists() {
        return Err(CmError::file_not_found(path));
    }
    std::fs::read_to_string(path).map_err(|e| CmError::io_with_source(format!("读取 {}", path.display()), e))
}

fn write_text(path: &Path, text: &str) -> CmResult<()> {
    std::fs::write(path, text).map_err(|e| CmError::io_with_source(format!("写入 {}", path.display()), e))
}

/// 解析风场文本
pub fn parse_wind(text: &str, origin: &Path) -> CmResult<VectorTimeSeries> {
    let rows = parse_columns::<3>(text, origin)?;
    let times = rows.iter().map(|r| r[0]).collect();
    let speed = rows.iter().map(|r| r[1]).collect();
    let direction = rows.iter().map(|r| r[2]).collect();
    VectorTimeSeries::from_speed_direction(times, speed, direction)
}

/// 解析潮位文本
pub fn parse_tide(text: &str, origin: &Path) -> CmResult<TimeSeries> {
    let rows = parse_columns::<2>(text, origin)?;
    TimeSeries::new(rows.iter().map(|r| r[0]).collect(), rows.iter().map(|r| r[1]).collect())
}

/// 读取风场文件
pub fn read_wind(path: &Path) -> CmResult<VectorTimeSeries> {
    let series = parse_wind(&read_text(path)?, path)?;
    info!(path = %path.display(), points = series.times().len(), "风场已读取");
    Ok(series)
}

/// 读取潮位文件
pub fn read_tide(path: &Path) -> CmResult<TimeSeries> {
    let series = parse_tide(&read_text(path)?, path)?;
    info!(path = %path.display(), points = series.len(), "潮位已读取");
    Ok(series)
}

/// 格式化风场（每个时间点一行：时间 风速 风向）
pub fn format_wind(series: &VectorTimeSeries) -> String {
    let mut out = String::new();
    for &t in series.times() {
        let _ = writeln!(
            out,
            "{} {:.6} {:.6}",
            t.round() as i64,
            series.get_magnitude(t),
            series.get_direction_deg(t)
        );
    }
    out
}

/// 格式化潮位（每个时间点一行：时间 水位）
pub fn format_tide(series: &TimeSeries) -> String {
    let mut out = String::new();
    for (t, level) in series.times().iter().zip(series.values()) {
        let _ = writeln!(out, "{} {:.6}", t.round() as i64, level);
    }
    out
}

/// 写出风场文件
pub fn write_wind(path: &Path, series: &VectorTimeSeries) -> CmResult<()> {
    write_text(path, &format_wind(series))
}

/// 写出潮位文件
pub fn write_tide(path: &Path, series: &TimeSeries) -> CmResult<()> {
    write_text(path, &format_tide(series))
}
