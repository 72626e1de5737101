// crates/cm_physics/src/engine/parcel_routing.rs

//! 泥沙包路由引擎
//!
//! 降阶的水动力泥沙路由：把一个子步的侵蚀预算分成若干泥沙包，
//! 在湿单元上按权重随机选入口，沿下坡方向随机游走并逐步落淤。
//!
//! - 入口权重：`w = routing_weight / drag · (1 + Q / Q_ref)`
//! - 游走权重：`w_n = max(z_c − z_n, 0) · routing_weight_n / drag_n`
//! - 每走一步落淤携带量的 `deposition_fraction`，无下坡邻居或步数用尽时全部落淤
//!
//! 泥沙包只在湿单元之间移动，湿区内体积守恒。随机数由 `StdRng` 按输入种子生成。

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterDiagnostics, AdapterFailure, CancelToken, EngineKind, HydroEngine, HydroInput, NativeResult};

/// 路由引擎参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelParams {
    /// 每个子步的泥沙包数
    #[serde(default = "default_parcels")]
    pub parcels: usize,
    /// 侵蚀速率 [m/s]
    #[serde(default = "default_entrainment_rate")]
    pub entrainment_rate: f64,
    /// 参考流量 [m³/s]
    #[serde(default = "default_discharge_ref")]
    pub discharge_ref: f64,
    /// 每步落淤比例
    #[serde(default = "default_deposition_fraction")]
    pub deposition_fraction: f64,
    /// 最大游走步数
    #[serde(default = "default_max_walk")]
    pub max_walk: usize,
    /// 单步最大床面变化 [m]（决定稳定子步）
    #[serde(default = "default_max_bed_change")]
    pub max_bed_change: f64,
}

fn default_parcels() -> usize {
    200
}
fn default_entrainment_rate() -> f64 {
    1e-6
}
fn default_discharge_ref() -> f64 {
    1.0
}
fn default_deposition_fraction() -> f64 {
    0.2
}
fn default_max_walk() -> usize {
    100
}
fn default_max_bed_change() -> f64 {
    0.05
}

impl Default for ParcelParams {
    fn default() -> Self {
        Self {
            parcels: default_parcels(),
            entrainment_rate: default_entrainment_rate(),
            discharge_ref: default_discharge_ref(),
            deposition_fraction: default_deposition_fraction(),
            max_walk: default_max_walk(),
            max_bed_change: default_max_bed_change(),
        }
    }
}

/// 泥沙包路由引擎
#[derive(Debug, Clone, Default)]
pub struct ParcelRoutingEngine {
    params: ParcelParams,
}

const NEIGHBORS: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

impl ParcelRoutingEngine {
    /// 创建
    pub fn new(params: ParcelParams) -> Self {
        Self { params }
    }

    /// 参数
    pub fn params(&self) -> &ParcelParams {
        &self.params
    }

    fn discharge_factor(&self, q: f64) -> f64 {
        1.0 + q.max(0.0) / self.params.discharge_ref
    }

    fn conductance(input: &HydroInput, c: usize) -> f64 {
        let drag = input.drag[c].max(1e-9);
        input.routing_weight[c].max(0.0) / drag
    }

    fn neighbor(input: &HydroInput, c: usize, step: (i64, i64)) -> Option<usize> {
        let i = (c % input.nx) as i64 + step.0;
        let j = (c / input.nx) as i64 + step.1;
        if i < 0 || j < 0 || i >= input.nx as i64 || j >= input.ny as i64 {
            return None;
        }
        Some(input.index(i as usize, j as usize))
    }
}

impl HydroEngine for ParcelRoutingEngine {
    fn name(&self) -> &str {
        "parcel-routing"
    }

    fn stable_step(&self, input: &HydroInput) -> f64 {
        let factor = (0..input.n_cells())
            .filter(|&c| input.wet[c])
            .map(|c| self.discharge_factor(input.discharge[c]))
            .fold(0.0, f64::max);
        if factor <= 0.0 || self.params.entrainment_rate <= 0.0 {
            return f64::INFINITY;
        }
        self.params.max_bed_change / (self.params.entrainment_rate * factor)
    }

    fn run(&self, input: &HydroInput, dt: f64, cancel: &CancelToken) -> Result<NativeResult, AdapterFailure> {
        let n = input.n_cells();
        if input.elevation.len() != n || input.wet.len() != n || input.drag.len() != n {
            return Err(AdapterFailure::engine(EngineKind::Hydro, "input field sizes disagree with grid"));
        }

        let area = input.cell_area();
        let mut delta = vec![0.0; n];
        let mut warnings = Vec::new();

        let wet: Vec<usize> = (0..n).filter(|&c| input.wet[c]).collect();
        let entry_weights: Vec<f64> = wet
            .iter()
            .map(|&c| Self::conductance(input, c) * self.discharge_factor(input.discharge[c]))
            .collect();
        let entry = match WeightedIndex::new(&entry_weights) {
            Ok(dist) if self.params.parcels > 0 => dist,
            _ => {
                warnings.push("no wet cells admit parcels".to_string());
                return Ok(NativeResult {
                    delta,
                    boundary_outflow: 0.0,
                    diagnostics: AdapterDiagnostics {
                        converged: true,
                        iterations: 0,
                        warnings,
                    },
                });
            }
        };

        let budget: f64 = wet
            .iter()
            .map(|&c| self.params.entrainment_rate * dt * area * self.discharge_factor(input.discharge[c]))
            .sum();
        let parcel_volume = budget / self.params.parcels as f64;

        let mut rng = StdRng::seed_from_u64(input.seed);
        let mut elevation = input.elevation.clone();
        let mut availability = input.availability.clone();
        let mut iterations = 0;
        let mut exhausted = 0usize;

        for _ in 0..self.params.parcels {
            cancel.check(EngineKind::Hydro)?;

            let mut c = wet[entry.sample(&mut rng)];
            let take = parcel_volume.min(availability[c] * area);
            if take <= 0.0 {
                exhausted += 1;
                continue;
            }
            let thickness = take / area;
            availability[c] -= thickness;
            elevation[c] -= thickness;
            delta[c] -= thickness;
            let mut carried = take;

            for _ in 0..self.params.max_walk {
                let candidates: Vec<(usize, f64)> = NEIGHBORS
                    .iter()
                    .filter_map(|&s| Self::neighbor(input, c, s))
                    .filter(|&nb| input.wet[nb])
                    .map(|nb| (nb, (elevation[c] - elevation[nb]).max(0.0) * Self::conductance(input, nb)))
                    .filter(|(_, w)| *w > 0.0)
                    .collect();
                let Ok(step) = WeightedIndex::new(candidates.iter().map(|(_, w)| *w)) else {
                    break;
                };
                c = candidates[step.sample(&mut rng)].0;
                iterations += 1;

                let dropped = carried * self.params.deposition_fraction;
                let t = dropped / area;
                elevation[c] += t;
                availability[c] += t;
                delta[c] += t;
                carried -= dropped;
            }

            let t = carried / area;
            elevation[c] += t;
            availability[c] += t;
            delta[c] += t;
        }

        if exhausted > 0 {
            warnings.push(format!("{} parcels found no loose sediment at entry", exhausted));
        }

        Ok(NativeResult {
            delta,
            boundary_outflow: 0.0,
            diagnostics: AdapterDiagnostics {
                converged: true,
                iterations,
                warnings,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sloped(nx: usize, ny: usize, seed: u64) -> HydroInput {
        let n = nx * ny;
        HydroInput {
            nx,
            ny,
            dx: 1.0,
            dy: 1.0,
            elevation: (0..n).map(|c| -((c % nx) as f64) * 0.1).collect(),
            availability: vec![1.0; n],
            wet: vec![true; n],
            routing_weight: vec![1.0; n],
            drag: vec![0.0025; n],
            discharge: vec![0.0; n],
            seed,
        }
    }

    #[test]
    fn test_volume_conserved() {
        let engine = ParcelRoutingEngine::default();
        let out = engine.run(&sloped(6, 4, 7), 3600.0, &CancelToken::new()).unwrap();
        let volume: f64 = out.delta.iter().sum();
        assert!(volume.abs() < 1e-12);
        assert!(out.delta.iter().any(|d| *d != 0.0));
    }

    #[test]
    fn test_same_seed_same_result() {
        let engine = ParcelRoutingEngine::default();
        let a = engine.run(&sloped(6, 4, 42), 3600.0, &CancelToken::new()).unwrap();
        let b = engine.run(&sloped(6, 4, 42), 3600.0, &CancelToken::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sediment_moves_downslope() {
        let engine = ParcelRoutingEngine::default();
        let out = engine.run(&sloped(8, 1, 3), 3600.0, &CancelToken::new()).unwrap();
        // 最低端只能淤积
        assert!(out.delta[7] > 0.0);
    }

    #[test]
    fn test_dry_cells_untouched() {
        let engine = ParcelRoutingEngine::default();
        let mut inp = sloped(4, 4, 1);
        for c in 0..8 {
            inp.wet[c] = false;
        }
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        assert!(out.delta[..8].iter().all(|d| *d == 0.0));
    }

    #[test]
    fn test_no_wet_cells_warns() {
        let engine = ParcelRoutingEngine::default();
        let mut inp = sloped(3, 3, 1);
        inp.wet = vec![false; 9];
        let out = engine.run(&inp, 60.0, &CancelToken::new()).unwrap();
        assert!(out.delta.iter().all(|d| *d == 0.0));
        assert_eq!(out.diagnostics.warnings.len(), 1);
    }
}
