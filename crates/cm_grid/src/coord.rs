// crates/cm_grid/src/coord.rs

//! 地理坐标键
//!
//! 单元用其中心点的地理坐标标识，而不是网格内的下标，
//! 因此在重采样或更换网格后仍可寻址。坐标量化到千分之一网格单位。

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// 量化比例（每网格单位）
const QUANTUM: f64 = 1000.0;

/// 单元的稳定地理标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoordKey {
    /// x 坐标（千分之一单位）
    pub x: i64,
    /// y 坐标（千分之一单位）
    pub y: i64,
}

impl CoordKey {
    /// 从世界坐标创建
    #[inline]
    pub fn from_point(p: DVec2) -> Self {
        Self {
            x: (p.x * QUANTUM).round() as i64,
            y: (p.y * QUANTUM).round() as i64,
        }
    }

    /// 还原为世界坐标
    #[inline]
    pub fn to_point(self) -> DVec2 {
        DVec2::new(self.x as f64 / QUANTUM, self.y as f64 / QUANTUM)
    }
}

impl std::fmt::Display for CoordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = self.to_point();
        write!(f, "({:.3}, {:.3})", p.x, p.y)
    }
}
