// crates/cm_physics/src/forcing/mask.rs

//! 外力空间掩码
//!
//! 掩码以地理坐标表达，与具体网格无关；在某个网格上求值时按单元中心判断。

use std::collections::BTreeSet;

use cm_grid::{CoordKey, Grid};
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// 外力作用范围
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpatialMask {
    /// 全域
    #[default]
    Everywhere,
    /// 世界坐标矩形（含下界，不含上界）
    Rect {
        /// 左下角
        min: [f64; 2],
        /// 右上角
        max: [f64; 2],
    },
    /// 单元中心坐标集合
    Cells {
        /// 坐标键
        keys: BTreeSet<CoordKey>,
    },
}

impl SpatialMask {
    /// 矩形掩码
    pub fn rect(min: [f64; 2], max: [f64; 2]) -> Self {
        Self::Rect { min, max }
    }

    /// 由网格单元下标构造坐标集合掩码
    pub fn from_cells(grid: &Grid, cells: impl IntoIterator<Item = usize>) -> Self {
        Self::Cells {
            keys: cells.into_iter().map(|c| grid.coord_key(c)).collect(),
        }
    }

    /// 判断某单元中心是否在掩码内
    pub fn contains(&self, center: DVec2, key: CoordKey) -> bool {
        match self {
            Self::Everywhere => true,
            Self::Rect { min, max } => {
                center.x >= min[0] && center.x < max[0] && center.y >= min[1] && center.y < max[1]
            }
            Self::Cells { keys } => keys.contains(&key),
        }
    }

    /// 在网格上求值
    pub fn evaluate(&self, grid: &Grid) -> Vec<bool> {
        if matches!(self, Self::Everywhere) {
            return vec![true; grid.n_cells()];
        }
        (0..grid.n_cells())
            .map(|c| {
                let center = grid.cell_center(c);
                self.contains(center, cm_grid::CoordKey::from_point(center))
            })
            .collect()
    }
}

/// 两个已求值掩码是否不相交
pub fn disjoint(a: &[bool], b: &[bool]) -> bool {
    !a.iter().zip(b).any(|(x, y)| *x && *y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_grid::{GridRegistry, GridSpec, ResampleTolerance};

    fn grid() -> std::sync::Arc<Grid> {
        let r = GridRegistry::new(ResampleTolerance::default());
        let id = r.register(GridSpec::new("g", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
        r.grid(id).unwrap()
    }

    #[test]
    fn test_rect_mask() {
        let g = grid();
        let m = SpatialMask::rect([1.0, 1.0], [3.0, 3.0]).evaluate(&g);
        assert_eq!(m.iter().filter(|v| **v).count(), 4);
        assert!(m[g.index(1, 1)] && m[g.index(2, 2)]);
        assert!(!m[g.index(3, 3)]);
    }

    #[test]
    fn test_cell_mask_round_trip() {
        let g = grid();
        let mask = SpatialMask::from_cells(&g, [0, 5, 15]);
        let m = mask.evaluate(&g);
        assert_eq!(m.iter().filter(|v| **v).count(), 3);
        assert!(m[5]);
    }

    #[test]
    fn test_disjoint() {
        assert!(disjoint(&[true, false], &[false, true]));
        assert!(!disjoint(&[true, true], &[false, true]));
    }

    #[test]
    fn test_serde_tagged() {
        let json = r#"{"type":"rect","min":[0,0],"max":[2,2]}"#;
        let mask: SpatialMask = serde_json::from_str(json).unwrap();
        assert!(matches!(mask, SpatialMask::Rect { .. }));
    }
}
