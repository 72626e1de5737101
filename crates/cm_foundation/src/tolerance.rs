// crates/cm_foundation/src/tolerance.rs

//! 数值容差比较
//!
//! 用于重采样往返误差等逐元素比较。

/// 两个字段的最大绝对差
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
