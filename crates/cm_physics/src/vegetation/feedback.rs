// crates/cm_physics/src/vegetation/feedback.rs

//! 植被反馈参数
//!
//! 由密度 `f` 和株高 `h` 确定性地导出，每个子步显式传入各引擎：
//!
//! ```text
//! 粗糙长度（风沙）   z0 = z0_bare + k · f · h
//! 拖曳系数（水动力） Cd = Cd_bed + Cd_stem · K · f · d · h
//! 路由权重（水动力） w  = 1 − A·π·d²·K·(f − b)/4,  f ≥ b，截断到 [0, 1]
//!                    b  = 0.7 / (d·K)
//!                    A  = 0.88·4 / (π·d²·K·(4/(d·K) − b))
//! ```
//!
//! 其中 `d` 为茎直径，`K` 为最大茎密度。

use std::f64::consts::PI;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::params::VegetationParams;
use super::state::VegetationState;

/// 有效粗糙长度 [m]
#[inline]
pub fn roughness_length(density: f64, height: f64, params: &VegetationParams) -> f64 {
    params.z0_bare + params.roughness_factor * density * height
}

/// 有效拖曳系数
#[inline]
pub fn drag_coefficient(density: f64, height: f64, params: &VegetationParams) -> f64 {
    params.cd_bed + params.stem_cd * params.stem_density * density * params.stem_diameter * height
}

/// 水流路由权重
pub fn routing_weight(density: f64, params: &VegetationParams) -> f64 {
    let d = params.stem_diameter;
    let k = params.stem_density;
    let b = 0.7 / (d * k);
    if density < b {
        return 1.0;
    }
    let denom = PI * d * d * k * (4.0 / (d * k) - b);
    if denom <= 0.0 {
        return 1.0;
    }
    let a = 0.88 * 4.0 / denom;
    (1.0 - a * PI * d * d * k * (density - b) / 4.0).clamp(0.0, 1.0)
}

/// 规范网格上的反馈场
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationFeedback {
    /// 粗糙长度 [m]
    pub roughness_length: Vec<f64>,
    /// 拖曳系数
    pub drag_coefficient: Vec<f64>,
    /// 路由权重 [0, 1]
    pub routing_weight: Vec<f64>,
}

impl VegetationFeedback {
    /// 从植被状态导出
    pub fn from_state(state: &VegetationState, params: &VegetationParams) -> Self {
        let triples: Vec<(f64, f64, f64)> = state
            .cells()
            .par_iter()
            .map(|c| {
                (
                    roughness_length(c.density, c.height, params),
                    drag_coefficient(c.density, c.height, params),
                    routing_weight(c.density, params),
                )
            })
            .collect();

        let mut feedback = Self {
            roughness_length: Vec::with_capacity(triples.len()),
            drag_coefficient: Vec::with_capacity(triples.len()),
            routing_weight: Vec::with_capacity(triples.len()),
        };
        for (z0, cd, w) in triples {
            feedback.roughness_length.push(z0);
            feedback.drag_coefficient.push(cd);
            feedback.routing_weight.push(w);
        }
        feedback
    }

    /// 单元数
    pub fn len(&self) -> usize {
        self.roughness_length.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.roughness_length.is_empty()
    }
}
