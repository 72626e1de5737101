// crates/cm_physics/src/engine/flux_relaxation.rs

//! 风沙通量松弛引擎
//!
//! 降阶的风沙输运模型，逐行（x 分量）再逐列（y 分量）沿风向扫描：
//!
//! ```text
//! u*_bed = r · κ U / ln(z_ref / z0_bed),   r = ln(z_ref / z0_eff) / ln(z_ref / z0_bed)
//! u*_t   = A · sqrt(g d (ρs − ρa) / ρa) · (1 + c_m · m)
//! q_cap  = C · sqrt(d / D) · ρa / g · u*³ · (1 − (u*_t / u*)²) / (ρs (1 − n))
//! q_out  = q_cap + (q_in − q_cap) · exp(−Δs / L_sat)
//! Δz     = −(q_out − q_in) · Δt / Δs
//! ```
//!
//! 植被抬高的粗糙长度按 `z0_eff = max(z0, s · z0_upwind)` 向下风向传递（遮蔽）。
//! 侵蚀量受可动沙量限制；流出激活区或网格边界的通量计入边界流出体积。

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterDiagnostics, AdapterFailure, AeolianEngine, AeolianInput, CancelToken, EngineKind, NativeResult};

/// 风沙引擎参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeolianParams {
    /// von Kármán 常数
    #[serde(default = "default_kappa")]
    pub kappa: f64,
    /// 参考风速高度 [m]
    #[serde(default = "default_z_ref")]
    pub z_ref: f64,
    /// 裸沙床面粗糙长度 [m]
    #[serde(default = "default_z0_bed")]
    pub z0_bed: f64,
    /// 空气密度 [kg/m³]
    #[serde(default = "default_rho_air")]
    pub rho_air: f64,
    /// 沙粒密度 [kg/m³]
    #[serde(default = "default_rho_sand")]
    pub rho_sand: f64,
    /// 床面孔隙率
    #[serde(default = "default_porosity")]
    pub porosity: f64,
    /// 粒径 [m]
    #[serde(default = "default_grain")]
    pub grain: f64,
    /// 参考粒径 [m]
    #[serde(default = "default_grain")]
    pub grain_ref: f64,
    /// 重力加速度 [m/s²]
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    /// 起动系数 A
    #[serde(default = "default_threshold_coeff")]
    pub threshold_coeff: f64,
    /// 含水率对起动阈值的放大系数
    #[serde(default = "default_moisture_coeff")]
    pub moisture_coeff: f64,
    /// Bagnold 系数 C
    #[serde(default = "default_bagnold")]
    pub bagnold: f64,
    /// 饱和长度 [m]
    #[serde(default = "default_saturation_length")]
    pub saturation_length: f64,
    /// 遮蔽衰减系数
    #[serde(default = "default_shelter_decay")]
    pub shelter_decay: f64,
    /// 单步最大床面变化 [m]（决定稳定子步）
    #[serde(default = "default_max_bed_change")]
    pub max_bed_change: f64,
}

fn default_kappa() -> f64 {
    0.41
}
fn default_z_ref() -> f64 {
    10.0
}
fn default_z0_bed() -> f64 {
    1e-4
}
fn default_rho_air() -> f64 {
    1.225
}
fn default_rho_sand() -> f64 {
    2650.0
}
fn default_porosity() -> f64 {
    0.4
}
fn default_grain() -> f64 {
    2.5e-4
}
fn default_gravity() -> f64 {
    9.81
}
fn default_threshold_coeff() -> f64 {
    0.1
}
fn default_moisture_coeff() -> f64 {
    10.0
}
fn default_bagnold() -> f64 {
    1.8
}
fn default_saturation_length() -> f64 {
    5.0
}
fn default_shelter_decay() -> f64 {
    0.5
}
fn default_max_bed_change() -> f64 {
    0.05
}

impl Default for AeolianParams {
    fn default() -> Self {
        Self {
            kappa: default_kappa(),
            z_ref: default_z_ref(),
            z0_bed: default_z0_bed(),
            rho_air: default_rho_air(),
            rho_sand: default_rho_sand(),
            porosity: default_porosity(),
            grain: default_grain(),
            grain_ref: default_grain(),
            gravity: default_gravity(),
            threshold_coeff: default_threshold_coeff(),
            moisture_coeff: default_moisture_coeff(),
            bagnold: default_bagnold(),
            saturation_length: default_saturation_length(),
            shelter_decay: default_shelter_decay(),
            max_bed_change: default_max_bed_change(),
        }
    }
}

/// 风沙通量松弛引擎
#[derive(Debug, Clone, Default)]
pub struct FluxRelaxationEngine {
    params: AeolianParams,
}

impl FluxRelaxationEngine {
    /// 创建
    pub fn new(params: AeolianParams) -> Self {
        Self { params }
    }

    /// 参数
    pub fn params(&self) -> &AeolianParams {
        &self.params
    }

    /// 床面剪切速度 [m/s]
    pub fn bed_shear_velocity(&self, speed: f64, z0_eff: f64) -> f64 {
        let p = &self.params;
        let bare = (p.z_ref / p.z0_bed).ln();
        let z0 = z0_eff.clamp(p.z0_bed, 0.5 * p.z_ref);
        let ratio = ((p.z_ref / z0).ln() / bare).clamp(0.0, 1.0);
        ratio * p.kappa * speed / bare
    }

    /// 起动剪切速度 [m/s]
    pub fn threshold_shear_velocity(&self, moisture: f64) -> f64 {
        let p = &self.params;
        let base = p.threshold_coeff * (p.gravity * p.grain * (p.rho_sand - p.rho_air) / p.rho_air).sqrt();
        base * (1.0 + p.moisture_coeff * moisture.max(0.0))
    }

    /// 体积输沙能力 [m²/s]（床面体积）
    pub fn capacity(&self, speed: f64, z0_eff: f64, moisture: f64) -> f64 {
        let p = &self.params;
        let ustar = self.bed_shear_velocity(speed, z0_eff);
        let ustar_t = self.threshold_shear_velocity(moisture);
        if ustar <= ustar_t {
            return 0.0;
        }
        let mass = p.bagnold * (p.grain / p.grain_ref).sqrt() * p.rho_air / p.gravity
            * ustar.powi(3)
            * (1.0 - (ustar_t / ustar).powi(2));
        mass / (p.rho_sand * (1.0 - p.porosity))
    }

    /// 沿一条扫描线推进
    #[allow(clippy::too_many_arguments)]
    fn sweep_line(
        &self,
        input: &AeolianInput,
        line: &[usize],
        component: &[f64],
        ds: f64,
        width: f64,
        dt: f64,
        availability: &mut [f64],
        delta: &mut [f64],
    ) -> f64 {
        let p = &self.params;
        let relax = (-ds / p.saturation_length).exp();
        let mut outflow = 0.0;
        let mut q = 0.0;
        let mut z_shelter = 0.0_f64;

        for &c in line {
            if !input.active[c] {
                outflow += q * dt * width;
                q = 0.0;
                z_shelter = input.roughness[c];
                continue;
            }

            let z_eff = input.roughness[c].max(p.shelter_decay * z_shelter);
            z_shelter = z_eff;

            let speed = input.wind_u[c].hypot(input.wind_v[c]);
            let share = if speed > 0.0 { component[c].abs() / speed } else { 0.0 };
            let cap = self.capacity(speed, z_eff, input.moisture[c]) * share;

            let mut q_out = cap + (q - cap) * relax;
            let mut dz = -(q_out - q) * dt / ds;
            if dz < 0.0 && -dz > availability[c] {
                dz = -availability[c];
                q_out = q + availability[c] * ds / dt;
            }
            availability[c] = (availability[c] + dz).max(0.0);
            delta[c] += dz;
            q = q_out;
        }
        outflow + q * dt * width
    }
}

impl AeolianEngine for FluxRelaxationEngine {
    fn name(&self) -> &str {
        "flux-relaxation"
    }

    fn stable_step(&self, input: &AeolianInput) -> f64 {
        let q_max = (0..input.n_cells())
            .filter(|&c| input.active[c])
            .map(|c| {
                let speed = input.wind_u[c].hypot(input.wind_v[c]);
                self.capacity(speed, input.roughness[c], input.moisture[c])
            })
            .fold(0.0, f64::max);
        if q_max <= 0.0 {
            return f64::INFINITY;
        }
        self.params.max_bed_change * input.dx.min(input.dy) / q_max
    }

    fn run(&self, input: &AeolianInput, dt: f64, cancel: &CancelToken) -> Result<NativeResult, AdapterFailure> {
        let n = input.n_cells();
        if input.elevation.len() != n || input.active.len() != n || input.roughness.len() != n {
            return Err(AdapterFailure::engine(EngineKind::Aeolian, "input field sizes disagree with grid"));
        }

        let mut delta = vec![0.0; n];
        let mut availability = input.availability.clone();
        let mut outflow = 0.0;
        let mut iterations = 0;

        // x 分量：逐行
        for j in 0..input.ny {
            cancel.check(EngineKind::Aeolian)?;
            let mut line: Vec<usize> = (0..input.nx).map(|i| input.index(i, j)).collect();
            if line.iter().map(|&c| input.wind_u[c]).sum::<f64>() < 0.0 {
                line.reverse();
            }
            outflow += self.sweep_line(input, &line, &input.wind_u, input.dx, input.dy, dt, &mut availability, &mut delta);
            iterations += 1;
        }

        // y 分量：逐列
        for i in 0..input.nx {
            cancel.check(EngineKind::Aeolian)?;
            let mut line: Vec<usize> = (0..input.ny).map(|j| input.index(i, j)).collect();
            if line.iter().map(|&c| input.wind_v[c]).sum::<f64>() < 0.0 {
                line.reverse();
            }
            outflow += self.sweep_line(input, &line, &input.wind_v, input.dy, input.dx, dt, &mut availability, &mut delta);
            iterations += 1;
        }

        Ok(NativeResult {
            delta,
            boundary_outflow: outflow,
            diagnostics: AdapterDiagnostics {
                converged: true,
                iterations,
                warnings: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(nx: usize, ny: usize, u: f64, v: f64) -> AeolianInput {
        let n = nx * ny;
        AeolianInput {
            nx,
            ny,
            dx: 1.0,
            dy: 1.0,
            elevation: vec![0.0; n],
            moisture: vec![0.0; n],
            availability: vec![1.0; n],
            roughness: vec![1e-4; n],
            wind_u: vec![u; n],
            wind_v: vec![v; n],
            active: vec![true; n],
        }
    }

    #[test]
    fn test_threshold_blocks_weak_wind() {
        let engine = FluxRelaxationEngine::default();
        assert_eq!(engine.capacity(3.0, 1e-4, 0.0), 0.0);
        assert!(engine.capacity(10.0, 1e-4, 0.0) > 0.0);
    }

    #[test]
    fn test_moisture_and_roughness_reduce_capacity() {
        let engine = FluxRelaxationEngine::default();
        let dry = engine.capacity(12.0, 1e-4, 0.0);
        assert!(engine.capacity(12.0, 1e-4, 0.05) < dry);
        assert!(engine.capacity(12.0, 0.04, 0.0) < dry);
    }

    #[test]
    fn test_mass_balance_with_outflow() {
        let engine = FluxRelaxationEngine::default();
        let inp = input(8, 3, 10.0, 0.0);
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        let volume: f64 = out.delta.iter().sum();
        assert!(out.boundary_outflow > 0.0);
        assert!((volume + out.boundary_outflow).abs() < 1e-12);
    }

    #[test]
    fn test_upwind_edge_erodes() {
        let engine = FluxRelaxationEngine::default();
        let inp = input(8, 1, 10.0, 0.0);
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        assert!(out.delta[0] < 0.0);
        assert!(out.delta[0] < out.delta[7]);
    }

    #[test]
    fn test_reversed_wind_erodes_other_edge() {
        let engine = FluxRelaxationEngine::default();
        let inp = input(8, 1, -10.0, 0.0);
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        assert!(out.delta[7] < out.delta[0]);
    }

    #[test]
    fn test_vegetation_shelters_downwind() {
        let engine = FluxRelaxationEngine::default();
        let mut inp = input(10, 1, 10.0, 0.0);
        inp.roughness[5] = 0.04;
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        assert!(out.delta[5] > 0.0);
        assert!(out.delta[6] > 0.0);
        assert!(out.delta[4] <= 0.0);
    }

    #[test]
    fn test_erosion_limited_by_availability() {
        let engine = FluxRelaxationEngine::default();
        let mut inp = input(4, 1, 15.0, 0.0);
        inp.availability = vec![0.0; 4];
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        assert!(out.delta.iter().all(|d| d.abs() < 1e-15));
    }

    #[test]
    fn test_inactive_cells_untouched() {
        let engine = FluxRelaxationEngine::default();
        let mut inp = input(6, 1, 10.0, 0.0);
        inp.active[3] = false;
        let out = engine.run(&inp, 3600.0, &CancelToken::new()).unwrap();
        assert_eq!(out.delta[3], 0.0);
    }

    #[test]
    fn test_stable_step_finite_only_with_transport() {
        let engine = FluxRelaxationEngine::default();
        assert!(engine.stable_step(&input(4, 4, 10.0, 0.0)).is_finite());
        assert!(engine.stable_step(&input(4, 4, 1.0, 0.0)).is_infinite());
    }

    #[test]
    fn test_cancelled_run() {
        let engine = FluxRelaxationEngine::default();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            engine.run(&input(2, 2, 10.0, 0.0), 1.0, &token),
            Err(AdapterFailure::Cancelled { .. })
        ));
    }
}
