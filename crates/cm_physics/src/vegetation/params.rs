// crates/cm_physics/src/vegetation/params.rs

//! 植被参数

use cm_foundation::{CmError, CmResult};
use serde::{Deserialize, Serialize};

/// 一年的秒数
pub const SECONDS_PER_YEAR: f64 = 365.25 * 86400.0;

/// 植被生长、死亡与反馈参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationParams {
    /// 累计掩埋上限 `b_max` [m]
    #[serde(default = "default_b_max")]
    pub b_max: f64,
    /// 累计侵蚀上限 `e_max` [m]
    #[serde(default = "default_e_max")]
    pub e_max: f64,
    /// 连续淹没存活上限 [s]
    #[serde(default = "default_inundation_limit")]
    pub inundation_limit: f64,
    /// 致死水深 [m]，窗口平均水深超过即死亡
    #[serde(default = "default_drowning_depth")]
    pub drowning_depth: f64,
    /// 根系深度 [m]，单步掩埋/侵蚀胁迫的尺度
    #[serde(default = "default_root_depth")]
    pub root_depth: f64,
    /// Logistic 增长率 [1/s]
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
    /// 最大株高 [m]
    #[serde(default = "default_max_height")]
    pub max_height: f64,
    /// 成熟密度阈值
    #[serde(default = "default_mature_density")]
    pub mature_density: f64,
    /// 胁迫比例（胁迫量超过上限的该比例即为 stressed）
    #[serde(default = "default_stress_fraction")]
    pub stress_fraction: f64,
    /// 是否允许新植被定植
    #[serde(default)]
    pub establishment: bool,
    /// 定植密度
    #[serde(default = "default_establishment_density")]
    pub establishment_density: f64,
    /// 定植株高 [m]
    #[serde(default = "default_seedling_height")]
    pub seedling_height: f64,
    /// 湿单元定植的最大水深 [m]
    #[serde(default = "default_establishment_depth")]
    pub establishment_depth: f64,
    /// 稳定床面判据（单步高程变化 < roc × 根深）
    #[serde(default = "default_establishment_roc")]
    pub establishment_roc: f64,
    /// 茎直径 [m]
    #[serde(default = "default_stem_diameter")]
    pub stem_diameter: f64,
    /// 最大茎密度 K [1/m²]
    #[serde(default = "default_stem_density")]
    pub stem_density: f64,
    /// 裸沙粗糙长度 [m]
    #[serde(default = "default_z0_bare")]
    pub z0_bare: f64,
    /// 粗糙长度系数（`z0 = z0_bare + k·f·h`）
    #[serde(default = "default_roughness_factor")]
    pub roughness_factor: f64,
    /// 床面拖曳系数
    #[serde(default = "default_cd_bed")]
    pub cd_bed: f64,
    /// 茎拖曳系数
    #[serde(default = "default_stem_cd")]
    pub stem_cd: f64,
}

fn default_b_max() -> f64 {
    0.3
}
fn default_e_max() -> f64 {
    0.2
}
fn default_inundation_limit() -> f64 {
    3.0 * 86400.0
}
fn default_drowning_depth() -> f64 {
    1.0
}
fn default_root_depth() -> f64 {
    0.2
}
fn default_growth_rate() -> f64 {
    1.0 / SECONDS_PER_YEAR
}
fn default_max_height() -> f64 {
    1.0
}
fn default_mature_density() -> f64 {
    0.5
}
fn default_stress_fraction() -> f64 {
    0.5
}
fn default_establishment_density() -> f64 {
    0.05
}
fn default_seedling_height() -> f64 {
    0.05
}
fn default_establishment_depth() -> f64 {
    0.5
}
fn default_establishment_roc() -> f64 {
    0.01
}
fn default_stem_diameter() -> f64 {
    0.006
}
fn default_stem_density() -> f64 {
    800.0
}
fn default_z0_bare() -> f64 {
    1e-4
}
fn default_roughness_factor() -> f64 {
    0.1
}
fn default_cd_bed() -> f64 {
    0.0025
}
fn default_stem_cd() -> f64 {
    1.0
}

impl Default for VegetationParams {
    fn default() -> Self {
        Self {
            b_max: default_b_max(),
            e_max: default_e_max(),
            inundation_limit: default_inundation_limit(),
            drowning_depth: default_drowning_depth(),
            root_depth: default_root_depth(),
            growth_rate: default_growth_rate(),
            max_height: default_max_height(),
            mature_density: default_mature_density(),
            stress_fraction: default_stress_fraction(),
            establishment: false,
            establishment_density: default_establishment_density(),
            seedling_height: default_seedling_height(),
            establishment_depth: default_establishment_depth(),
            establishment_roc: default_establishment_roc(),
            stem_diameter: default_stem_diameter(),
            stem_density: default_stem_density(),
            z0_bare: default_z0_bare(),
            roughness_factor: default_roughness_factor(),
            cd_bed: default_cd_bed(),
            stem_cd: default_stem_cd(),
        }
    }
}

impl VegetationParams {
    /// 校验参数
    pub fn validate(&self) -> CmResult<()> {
        let positive = [
            ("b_max", self.b_max),
            ("e_max", self.e_max),
            ("inundation_limit", self.inundation_limit),
            ("drowning_depth", self.drowning_depth),
            ("root_depth", self.root_depth),
            ("max_height", self.max_height),
            ("stem_diameter", self.stem_diameter),
            ("stem_density", self.stem_density),
            ("z0_bare", self.z0_bare),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CmError::out_of_range(field, value, f64::MIN_POSITIVE, f64::INFINITY));
            }
        }
        for (field, value) in [
            ("growth_rate", self.growth_rate),
            ("roughness_factor", self.roughness_factor),
            ("cd_bed", self.cd_bed),
            ("stem_cd", self.stem_cd),
            ("establishment_roc", self.establishment_roc),
            ("establishment_depth", self.establishment_depth),
        ] {
            CmError::check_range(field, value, 0.0, f64::MAX)?;
        }
        CmError::check_range("mature_density", self.mature_density, 0.0, 1.0)?;
        CmError::check_range("stress_fraction", self.stress_fraction, 0.0, 1.0)?;
        CmError::check_range("establishment_density", self.establishment_density, 0.0, 1.0)?;
        CmError::check_range("seedling_height", self.seedling_height, 0.0, self.max_height)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        assert!(VegetationParams::default().validate().is_ok());
    }

    #[test]
    fn test_serde_fills_defaults() {
        let p: VegetationParams = serde_json::from_str(r#"{"b_max": 0.5}"#).unwrap();
        assert_eq!(p.b_max, 0.5);
        assert_eq!(p.stem_density, 800.0);
        assert_eq!(p.establishment_depth, 0.5);
        assert_eq!(p.drowning_depth, 1.0);
        assert!(!p.establishment);
    }

    #[test]
    fn test_rejects_zero_root_depth() {
        let p = VegetationParams {
            root_depth: 0.0,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
