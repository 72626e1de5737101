// crates/cm_physics/src/surface.rs

//! 初始地表
//!
//! 会话初始化时由 `SeedSurface` 同时生成规范地形状态和植被状态。
//!
//! # 示例
//!
//! ```
//! use cm_physics::SeedSurface;
//!
//! let seed = SeedSurface::flat(100, 0.0)
//!     .with_non_erodible_offset(0.011)
//!     .with_vegetation(55, 0.8, 0.5);
//! assert!(seed.validate(100).is_ok());
//! ```

use cm_foundation::{CmError, CmResult};
use serde::{Deserialize, Serialize};

/// 默认可动沙量上限 [m]
pub const DEFAULT_AVAILABILITY_CEILING: f64 = 1.0;

/// 初始地表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSurface {
    /// 床面高程 [m]
    pub elevation: Vec<f64>,
    /// 表层含水率 [0, 1]
    pub moisture: Vec<f64>,
    /// 可动沙量（松散层厚度）[m]
    pub availability: Vec<f64>,
    /// 可动沙量上限 [m]
    pub availability_ceiling: f64,
    /// 不可侵蚀标记
    pub non_erodible: Vec<bool>,
    /// 不可侵蚀层顶面高程
    pub floor: Option<Vec<f64>>,
    /// 植被密度 [0, 1]
    pub vegetation_density: Vec<f64>,
    /// 植被高度 [m]
    pub vegetation_height: Vec<f64>,
}

impl SeedSurface {
    /// 平坦地表，沙量为上限值，无植被
    pub fn flat(n_cells: usize, elevation: f64) -> Self {
        Self::from_elevation(vec![elevation; n_cells])
    }

    /// 从高程场创建
    pub fn from_elevation(elevation: Vec<f64>) -> Self {
        let n = elevation.len();
        Self {
            elevation,
            moisture: vec![0.0; n],
            availability: vec![DEFAULT_AVAILABILITY_CEILING; n],
            availability_ceiling: DEFAULT_AVAILABILITY_CEILING,
            non_erodible: vec![false; n],
            floor: None,
            vegetation_density: vec![0.0; n],
            vegetation_height: vec![0.0; n],
        }
    }

    /// 单元数
    pub fn n_cells(&self) -> usize {
        self.elevation.len()
    }

    /// 设置含水率
    pub fn with_moisture(mut self, moisture: Vec<f64>) -> Self {
        self.moisture = moisture;
        self
    }

    /// 设置统一沙量及上限
    pub fn with_availability(mut self, availability: f64, ceiling: f64) -> Self {
        self.availability = vec![availability; self.n_cells()];
        self.availability_ceiling = ceiling;
        self
    }

    /// 标记不可侵蚀单元
    pub fn with_non_erodible(mut self, cells: impl IntoIterator<Item = usize>) -> Self {
        for c in cells {
            if let Some(flag) = self.non_erodible.get_mut(c) {
                *flag = true;
            }
        }
        self
    }

    /// 不可侵蚀层位于当前地表以下 `offset` 处
    pub fn with_non_erodible_offset(mut self, offset: f64) -> Self {
        self.floor = Some(self.elevation.iter().map(|z| z - offset).collect());
        self
    }

    /// 设置单元植被
    pub fn with_vegetation(mut self, cell: usize, density: f64, height: f64) -> Self {
        if cell < self.n_cells() {
            self.vegetation_density[cell] = density;
            self.vegetation_height[cell] = height;
        }
        self
    }

    /// 校验
    pub fn validate(&self, n_cells: usize) -> CmResult<()> {
        CmError::check_size("elevation", n_cells, self.elevation.len())?;
        CmError::check_size("moisture", n_cells, self.moisture.len())?;
        CmError::check_size("availability", n_cells, self.availability.len())?;
        CmError::check_size("non_erodible", n_cells, self.non_erodible.len())?;
        CmError::check_size("vegetation_density", n_cells, self.vegetation_density.len())?;
        CmError::check_size("vegetation_height", n_cells, self.vegetation_height.len())?;
        if let Some(floor) = &self.floor {
            CmError::check_size("floor", n_cells, floor.len())?;
        }
        if !(self.availability_ceiling.is_finite() && self.availability_ceiling >= 0.0) {
            return Err(CmError::out_of_range(
                "availability_ceiling",
                self.availability_ceiling,
                0.0,
                f64::INFINITY,
            ));
        }
        if let Some(z) = self.elevation.iter().find(|z| !z.is_finite()) {
            return Err(CmError::invalid_input(format!("高程包含非有限值 {}", z)));
        }
        for &m in &self.moisture {
            CmError::check_range("moisture", m, 0.0, 1.0)?;
        }
        for &a in &self.availability {
            CmError::check_range("availability", a, 0.0, self.availability_ceiling)?;
        }
        for &d in &self.vegetation_density {
            CmError::check_range("vegetation_density", d, 0.0, 1.0)?;
        }
        for &h in &self.vegetation_height {
            CmError::check_range("vegetation_height", h, 0.0, f64::INFINITY)?;
        }
        Ok(())
    }
}
