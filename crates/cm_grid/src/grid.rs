// crates/cm_grid/src/grid.rs

//! 规则网格
//!
//! 所有引擎网格都是规则矩形网格，可整体旋转。单元按行主序存储：
//! `index = j * nx + i`，`i` 沿局部 x 轴，`j` 沿局部 y 轴。
//!
//! 局部坐标系由旋转角定义：世界坐标 `p` 在旋转坐标系中的位置为
//! `R(-θ) · p`。旋转角相同的两个网格在该坐标系中轴对齐，
//! 权重矩阵即可按轴分离计算。

use cm_foundation::KahanSum;
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::coord::CoordKey;
use crate::error::{GridError, GridResult};

/// 网格标识（注册时分配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridId(pub u32);

impl std::fmt::Display for GridId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grid#{}", self.0)
    }
}

/// 长度单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    /// 米
    #[default]
    Meters,
    /// 千米
    Kilometers,
}

impl LengthUnit {
    /// 换算到米的系数
    pub fn to_meters(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Kilometers => 1000.0,
        }
    }
}

/// 网格定义（可序列化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// 网格名
    pub name: String,
    /// 左下角世界坐标
    pub origin: [f64; 2],
    /// x 方向单元数
    pub nx: usize,
    /// y 方向单元数
    pub ny: usize,
    /// x 方向分辨率
    pub dx: f64,
    /// y 方向分辨率
    pub dy: f64,
    /// 旋转角 [度]，逆时针
    #[serde(default)]
    pub rotation_deg: f64,
    /// 长度单位
    #[serde(default)]
    pub units: LengthUnit,
}

impl GridSpec {
    /// 创建未旋转、以米为单位的网格定义
    pub fn new(name: impl Into<String>, origin: [f64; 2], nx: usize, ny: usize, dx: f64, dy: f64) -> Self {
        Self {
            name: name.into(),
            origin,
            nx,
            ny,
            dx,
            dy,
            rotation_deg: 0.0,
            units: LengthUnit::Meters,
        }
    }

    /// 设置旋转角
    pub fn with_rotation(mut self, rotation_deg: f64) -> Self {
        self.rotation_deg = rotation_deg;
        self
    }

    /// 设置单位
    pub fn with_units(mut self, units: LengthUnit) -> Self {
        self.units = units;
        self
    }

    /// 校验定义
    pub fn validate(&self) -> GridResult<()> {
        let invalid = |reason: &str| GridError::InvalidSpec {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("网格名不能为空"));
        }
        if self.nx == 0 || self.ny == 0 {
            return Err(invalid("单元数必须为正"));
        }
        if !(self.dx.is_finite() && self.dx > 0.0 && self.dy.is_finite() && self.dy > 0.0) {
            return Err(invalid("分辨率必须为有限正数"));
        }
        if !(self.origin[0].is_finite() && self.origin[1].is_finite() && self.rotation_deg.is_finite()) {
            return Err(invalid("原点与旋转角必须为有限值"));
        }
        Ok(())
    }
}

/// 规则网格
#[derive(Debug, Clone)]
pub struct Grid {
    id: GridId,
    spec: GridSpec,
    cos: f64,
    sin: f64,
    /// 原点在旋转坐标系中的位置
    frame_origin: DVec2,
}

impl Grid {
    /// 从定义创建（由注册表调用）
    pub(crate) fn new(id: GridId, spec: GridSpec) -> GridResult<Self> {
        spec.validate()?;
        let theta = spec.rotation_deg.to_radians();
        let (sin, cos) = theta.sin_cos();
        let origin = DVec2::new(spec.origin[0], spec.origin[1]);
        let frame_origin = DVec2::new(cos * origin.x + sin * origin.y, -sin * origin.x + cos * origin.y);
        Ok(Self {
            id,
            spec,
            cos,
            sin,
            frame_origin,
        })
    }

    /// 网格标识
    #[inline]
    pub fn id(&self) -> GridId {
        self.id
    }

    /// 网格定义
    #[inline]
    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// 网格名
    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// x 方向单元数
    #[inline]
    pub fn nx(&self) -> usize {
        self.spec.nx
    }

    /// y 方向单元数
    #[inline]
    pub fn ny(&self) -> usize {
        self.spec.ny
    }

    /// x 方向分辨率
    #[inline]
    pub fn dx(&self) -> f64 {
        self.spec.dx
    }

    /// y 方向分辨率
    #[inline]
    pub fn dy(&self) -> f64 {
        self.spec.dy
    }

    /// 单元总数
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.spec.nx * self.spec.ny
    }

    /// 单元面积（网格单位²）
    #[inline]
    pub fn cell_area(&self) -> f64 {
        self.spec.dx * self.spec.dy
    }

    /// 单元线性下标
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.spec.nx + i
    }

    /// 线性下标还原为 (i, j)
    #[inline]
    pub fn ij(&self, index: usize) -> (usize, usize) {
        (index % self.spec.nx, index / self.spec.nx)
    }

    /// 世界坐标转旋转坐标系
    #[inline]
    pub fn to_frame(&self, p: DVec2) -> DVec2 {
        DVec2::new(self.cos * p.x + self.sin * p.y, -self.sin * p.x + self.cos * p.y)
    }

    /// 旋转坐标系转世界坐标
    #[inline]
    pub fn from_frame(&self, q: DVec2) -> DVec2 {
        DVec2::new(self.cos * q.x - self.sin * q.y, self.sin * q.x + self.cos * q.y)
    }

    /// 网格在旋转坐标系中的范围 `(min, max)`
    pub fn frame_extent(&self) -> (DVec2, DVec2) {
        let size = DVec2::new(self.spec.nx as f64 * self.spec.dx, self.spec.ny as f64 * self.spec.dy);
        (self.frame_origin, self.frame_origin + size)
    }

    /// 单元中心世界坐标
    pub fn cell_center(&self, index: usize) -> DVec2 {
        let (i, j) = self.ij(index);
        let local = DVec2::new((i as f64 + 0.5) * self.spec.dx, (j as f64 + 0.5) * self.spec.dy);
        self.from_frame(self.frame_origin + local)
    }

    /// 单元的地理坐标键
    #[inline]
    pub fn coord_key(&self, index: usize) -> CoordKey {
        CoordKey::from_point(self.cell_center(index))
    }

    /// 所有单元的地理坐标键（行主序）
    pub fn coord_keys(&self) -> Vec<CoordKey> {
        (0..self.n_cells()).map(|c| self.coord_key(c)).collect()
    }

    /// 定位包含世界坐标点的单元
    pub fn locate(&self, p: DVec2) -> Option<usize> {
        let q = self.to_frame(p) - self.frame_origin;
        if q.x < 0.0 || q.y < 0.0 {
            return None;
        }
        let i = (q.x / self.spec.dx).floor() as usize;
        let j = (q.y / self.spec.dy).floor() as usize;
        (i < self.spec.nx && j < self.spec.ny).then(|| self.index(i, j))
    }

    /// 按地理坐标键查找单元
    pub fn find(&self, key: CoordKey) -> Option<usize> {
        self.locate(key.to_point()).filter(|&c| self.coord_key(c) == key)
    }

    /// 下风向邻居
    ///
    /// `step` 为 (±1, 0) 或 (0, ±1)。越界时返回 `None`。
    pub fn neighbor(&self, index: usize, step: (i64, i64)) -> Option<usize> {
        let (i, j) = self.ij(index);
        let ni = i as i64 + step.0;
        let nj = j as i64 + step.1;
        if ni < 0 || nj < 0 || ni >= self.spec.nx as i64 || nj >= self.spec.ny as i64 {
            return None;
        }
        Some(self.index(ni as usize, nj as usize))
    }

    /// 字段体积 `Σ value · area`
    pub fn volume(&self, field: &[f64]) -> f64 {
        let area = self.cell_area();
        KahanSum::sum_iter(field.iter().map(|v| v * area))
    }

    /// 校验字段长度
    pub fn check_field(&self, field: &[f64]) -> GridResult<()> {
        if field.len() != self.n_cells() {
            return Err(GridError::FieldSize {
                grid: self.id,
                expected: self.n_cells(),
                actual: field.len(),
            });
        }
        Ok(())
    }

    /// 提取第 `row` 行断面
    pub fn row_transect(&self, field: &[f64], row: usize) -> GridResult<Vec<f64>> {
        self.check_field(field)?;
        if row >= self.spec.ny {
            return Err(GridError::InvalidSpec {
                name: self.spec.name.clone(),
                reason: format!("断面行号 {} 超出 0..{}", row, self.spec.ny),
            });
        }
        let start = row * self.spec.nx;
        Ok(field[start..start + self.spec.nx].to_vec())
    }

    /// 中间行断面
    pub fn middle_transect(&self, field: &[f64]) -> GridResult<Vec<f64>> {
        self.row_transect(field, self.spec.ny / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(spec: GridSpec) -> Grid {
        Grid::new(GridId(0), spec).unwrap()
    }

    #[test]
    fn test_spec_validation() {
        assert!(GridSpec::new("a", [0.0, 0.0], 0, 3, 1.0, 1.0).validate().is_err());
        assert!(GridSpec::new("a", [0.0, 0.0], 3, 3, -1.0, 1.0).validate().is_err());
        assert!(GridSpec::new("", [0.0, 0.0], 3, 3, 1.0, 1.0).validate().is_err());
        assert!(GridSpec::new("a", [0.0, 0.0], 3, 3, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_cell_center_and_locate() {
        let g = grid(GridSpec::new("g", [10.0, 20.0], 4, 3, 2.0, 1.0));
        let c = g.index(2, 1);
        let center = g.cell_center(c);
        assert!((center.x - 15.0).abs() < 1e-12);
        assert!((center.y - 21.5).abs() < 1e-12);
        assert_eq!(g.locate(center), Some(c));
        assert_eq!(g.locate(DVec2::new(9.0, 20.5)), None);
    }

    #[test]
    fn test_rotated_grid_locates_its_centers() {
        let g = grid(GridSpec::new("r", [5.0, -2.0], 5, 4, 1.5, 2.0).with_rotation(30.0));
        for c in 0..g.n_cells() {
            assert_eq!(g.locate(g.cell_center(c)), Some(c));
            assert_eq!(g.find(g.coord_key(c)), Some(c));
        }
    }

    #[test]
    fn test_neighbor_bounds() {
        let g = grid(GridSpec::new("g", [0.0, 0.0], 3, 3, 1.0, 1.0));
        assert_eq!(g.neighbor(g.index(2, 1), (1, 0)), None);
        assert_eq!(g.neighbor(g.index(1, 1), (0, 1)), Some(g.index(1, 2)));
    }

    #[test]
    fn test_transect() {
        let g = grid(GridSpec::new("g", [0.0, 0.0], 3, 3, 1.0, 1.0));
        let field: Vec<f64> = (0..9).map(|v| v as f64).collect();
        assert_eq!(g.middle_transect(&field).unwrap(), vec![3.0, 4.0, 5.0]);
        assert!(g.row_transect(&field, 3).is_err());
    }

    #[test]
    fn test_volume() {
        let g = grid(GridSpec::new("g", [0.0, 0.0], 2, 2, 2.0, 3.0));
        assert!((g.volume(&[1.0, 1.0, 0.5, -0.5]) - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_spec_serde_defaults() {
        let json = r#"{"name":"c","origin":[0,0],"nx":2,"ny":2,"dx":1,"dy":1}"#;
        let spec: GridSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.units, LengthUnit::Meters);
        assert_eq!(spec.rotation_deg, 0.0);
    }
}
