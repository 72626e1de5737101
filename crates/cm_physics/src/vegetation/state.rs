// crates/cm_physics/src/vegetation/state.rs

//! 植被单元状态

use cm_grid::CoordKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::surface::SeedSurface;

/// 生长阶段
///
/// 裸地单元（从未定植或已死亡）处于 `Dead`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    /// 幼苗
    Seedling,
    /// 成熟
    Mature,
    /// 胁迫
    Stressed,
    /// 死亡 / 裸地
    Dead,
}

impl GrowthStage {
    /// 是否存活
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Dead)
    }
}

/// 单元植被状态
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VegetationCell {
    /// 密度 [0, 1]
    pub density: f64,
    /// 株高 [m]
    pub height: f64,
    /// 生长阶段
    pub stage: GrowthStage,
    /// 定植以来的累计掩埋（正为淤积，负为侵蚀）[m]
    pub burial: f64,
    /// 连续淹没时长 [s]
    pub inundation: f64,
}

impl VegetationCell {
    /// 裸地
    pub const BARE: Self = Self {
        density: 0.0,
        height: 0.0,
        stage: GrowthStage::Dead,
        burial: 0.0,
        inundation: 0.0,
    };

    /// 从初始密度与株高创建
    pub fn seeded(density: f64, height: f64, mature_density: f64) -> Self {
        if density <= 0.0 {
            return Self::BARE;
        }
        let stage = if density >= mature_density {
            GrowthStage::Mature
        } else {
            GrowthStage::Seedling
        };
        Self {
            density,
            height,
            stage,
            burial: 0.0,
            inundation: 0.0,
        }
    }

    /// 死亡
    pub fn kill(&mut self) {
        *self = Self::BARE;
    }
}

/// 植被状态越界（已截断）
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("植被状态越界: 单元 {cell} {key} 的 {field}={value} 已截断为 {clamped}")]
pub struct VegetationStateError {
    /// 单元下标
    pub cell: usize,
    /// 地理坐标
    pub key: CoordKey,
    /// 字段名
    pub field: String,
    /// 原值
    pub value: f64,
    /// 截断后的值
    pub clamped: f64,
}

/// 规范网格上的植被状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationState {
    cells: Vec<VegetationCell>,
}

impl VegetationState {
    /// 从初始地表创建
    pub fn from_seed(seed: &SeedSurface, mature_density: f64) -> Self {
        Self {
            cells: seed
                .vegetation_density
                .iter()
                .zip(&seed.vegetation_height)
                .map(|(d, h)| VegetationCell::seeded(*d, *h, mature_density))
                .collect(),
        }
    }

    /// 从单元列表创建
    pub fn from_cells(cells: Vec<VegetationCell>) -> Self {
        Self { cells }
    }

    /// 单元数
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// 单元状态
    pub fn cell(&self, c: usize) -> &VegetationCell {
        &self.cells[c]
    }

    /// 全部单元
    pub fn cells(&self) -> &[VegetationCell] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [VegetationCell] {
        &mut self.cells
    }

    /// 密度场
    pub fn densities(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.density).collect()
    }

    /// 株高场
    pub fn heights(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.height).collect()
    }

    /// 存活单元数
    pub fn alive(&self) -> usize {
        self.cells.iter().filter(|c| c.stage.is_alive()).count()
    }
}
