// crates/cm_grid/src/weights.rs

//! 面积加权权重矩阵
//!
//! 目标单元的值为与之相交的源单元按相交面积加权的平均。两个网格在共同的
//! 旋转坐标系中轴对齐，相交面积可按轴分离：`A = lx · ly`。
//!
//! 目标单元落在源范围以外的部分由最近的源边缘单元填充（常值外推），
//! 因此每个目标行的权重和恒为 1。
//!
//! 矩阵以 CSR 格式存储，行对应目标单元。

use rayon::prelude::*;

use crate::grid::{Grid, GridId};

/// 一维重叠条目：源下标、范围内重叠长度、外推长度
#[derive(Debug, Clone, Copy)]
struct AxisOverlap {
    src: usize,
    inside: f64,
    outside: f64,
}

impl AxisOverlap {
    #[inline]
    fn total(&self) -> f64 {
        self.inside + self.outside
    }
}

/// 计算单轴的重叠表
///
/// 返回长度为 `nt` 的表，第 `m` 项列出目标单元 `m` 与各源单元的重叠。
fn axis_overlaps(src_start: f64, ds: f64, ns: usize, tgt_start: f64, dt: f64, nt: usize) -> Vec<Vec<AxisOverlap>> {
    let src_end = src_start + ds * ns as f64;
    let mut table = Vec::with_capacity(nt);

    for m in 0..nt {
        let a = tgt_start + dt * m as f64;
        let b = a + dt;
        let mut entries: Vec<AxisOverlap> = Vec::new();
        let mut push = |src: usize, inside: f64, outside: f64| {
            if inside <= 0.0 && outside <= 0.0 {
                return;
            }
            match entries.iter_mut().find(|e| e.src == src) {
                Some(e) => {
                    e.inside += inside;
                    e.outside += outside;
                }
                None => entries.push(AxisOverlap { src, inside, outside }),
            }
        };

        // 源范围以下
        if a < src_start {
            push(0, 0.0, b.min(src_start) - a);
        }

        // 源范围以内
        let lo = a.max(src_start);
        let hi = b.min(src_end);
        if hi > lo {
            let first = (((lo - src_start) / ds).floor() as usize).min(ns - 1);
            let last = (((hi - src_start) / ds).ceil() as usize).clamp(first + 1, ns);
            for k in first..last {
                let c0 = src_start + ds * k as f64;
                let c1 = c0 + ds;
                let len = hi.min(c1) - lo.max(c0);
                if len > 0.0 {
                    push(k, len, 0.0);
                }
            }
        }

        // 源范围以上
        if b > src_end {
            push(ns - 1, 0.0, b - a.max(src_end));
        }

        table.push(entries);
    }
    table
}

/// 源网格到目标网格的权重矩阵
#[derive(Debug, Clone)]
pub struct WeightMatrix {
    source: GridId,
    target: GridId,
    n_source: usize,
    row_ptr: Vec<usize>,
    col: Vec<usize>,
    val: Vec<f64>,
    coverage: Vec<f64>,
}

impl WeightMatrix {
    /// 计算权重矩阵
    ///
    /// 调用方负责先检查两个网格的协调性。源网格原点投影到目标网格的
    /// 旋转坐标系中。
    pub fn build(source: &Grid, target: &Grid) -> Self {
        let (t_min, _) = target.frame_extent();
        let s_origin = glam::DVec2::new(source.spec().origin[0], source.spec().origin[1]);
        let s_min = target.to_frame(s_origin);

        let xs = axis_overlaps(s_min.x, source.dx(), source.nx(), t_min.x, target.dx(), target.nx());
        let ys = axis_overlaps(s_min.y, source.dy(), source.ny(), t_min.y, target.dy(), target.ny());

        let target_area = target.cell_area();
        let mut row_ptr = Vec::with_capacity(target.n_cells() + 1);
        let mut col = Vec::new();
        let mut val = Vec::new();
        let mut covered = vec![0.0; source.n_cells()];
        row_ptr.push(0);

        for ty in &ys {
            for tx in xs.iter() {
                for oy in ty {
                    for ox in tx {
                        let s = source.index(ox.src, oy.src);
                        col.push(s);
                        val.push(ox.total() * oy.total() / target_area);
                        covered[s] += ox.inside * oy.inside;
                    }
                }
                row_ptr.push(col.len());
            }
        }

        let source_area = source.cell_area();
        let coverage = covered.into_iter().map(|a| (a / source_area).min(1.0)).collect();

        Self {
            source: source.id(),
            target: target.id(),
            n_source: source.n_cells(),
            row_ptr,
            col,
            val,
            coverage,
        }
    }

    /// 恒等映射
    pub fn identity(grid: &Grid) -> Self {
        let n = grid.n_cells();
        Self {
            source: grid.id(),
            target: grid.id(),
            n_source: n,
            row_ptr: (0..=n).collect(),
            col: (0..n).collect(),
            val: vec![1.0; n],
            coverage: vec![1.0; n],
        }
    }

    /// 源网格
    pub fn source(&self) -> GridId {
        self.source
    }

    /// 目标网格
    pub fn target(&self) -> GridId {
        self.target
    }

    /// 源单元数
    pub fn n_source(&self) -> usize {
        self.n_source
    }

    /// 目标单元数
    pub fn n_target(&self) -> usize {
        self.row_ptr.len() - 1
    }

    /// 非零元个数
    pub fn nnz(&self) -> usize {
        self.val.len()
    }

    /// 目标单元 `t` 的 (源单元, 权重) 列表
    pub fn row(&self, t: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[t]..self.row_ptr[t + 1];
        self.col[range.clone()].iter().copied().zip(self.val[range].iter().copied())
    }

    /// 目标单元 `t` 的权重和（恒为 1）
    pub fn row_sum(&self, t: usize) -> f64 {
        self.row(t).map(|(_, w)| w).sum()
    }

    /// 源单元 `s` 落在目标范围内的面积比例
    pub fn source_coverage(&self, s: usize) -> f64 {
        self.coverage[s]
    }

    /// 重采样字段
    ///
    /// 调用方保证 `field.len() == n_source()`。
    pub fn apply(&self, field: &[f64]) -> Vec<f64> {
        (0..self.n_target())
            .into_par_iter()
            .map(|t| self.row(t).map(|(s, w)| w * field[s]).sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;

    fn grid(id: u32, spec: GridSpec) -> Grid {
        Grid::new(GridId(id), spec).unwrap()
    }

    #[test]
    fn test_axis_overlap_nested() {
        let t = axis_overlaps(0.0, 1.0, 4, 0.0, 2.0, 2);
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].len(), 2);
        assert!((t[1].iter().map(AxisOverlap::total).sum::<f64>() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_axis_overlap_extrapolates() {
        let t = axis_overlaps(0.0, 1.0, 2, -1.0, 1.0, 4);
        assert_eq!(t[0][0].src, 0);
        assert_eq!(t[0][0].inside, 0.0);
        assert_eq!(t[3][0].src, 1);
        assert!((t[3][0].outside - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_sum_to_one() {
        let src = grid(0, GridSpec::new("s", [0.0, 0.0], 5, 3, 1.3, 0.7));
        let tgt = grid(1, GridSpec::new("t", [-0.5, 0.2], 3, 4, 2.1, 0.9));
        let w = WeightMatrix::build(&src, &tgt);
        for t in 0..w.n_target() {
            assert!((w.row_sum(t) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_source_coverage_full_when_contained() {
        let fine = grid(0, GridSpec::new("f", [0.0, 0.0], 4, 4, 1.0, 1.0));
        let coarse = grid(1, GridSpec::new("c", [0.0, 0.0], 2, 2, 2.0, 2.0));
        let w = WeightMatrix::build(&fine, &coarse);
        for s in 0..fine.n_cells() {
            assert!((w.source_coverage(s) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fine_to_coarse_conserves_volume() {
        let fine = grid(0, GridSpec::new("f", [0.0, 0.0], 4, 4, 1.0, 1.0));
        let coarse = grid(1, GridSpec::new("c", [0.0, 0.0], 2, 2, 2.0, 2.0));
        let field: Vec<f64> = (0..16).map(|v| v as f64 * 0.1).collect();
        let out = WeightMatrix::build(&fine, &coarse).apply(&field);
        assert!((fine.volume(&field) - coarse.volume(&out)).abs() < 1e-12);
    }

    #[test]
    fn test_identity() {
        let g = grid(0, GridSpec::new("g", [0.0, 0.0], 3, 2, 1.0, 1.0));
        let field = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(WeightMatrix::identity(&g).apply(&field), field);
    }
}
