// crates/cm_physics/src/adapter/hydro.rs

//! 水动力适配器
//!
//! 把规范状态翻译为水动力引擎的本地输入：湿单元、流量、植被拖曳与路由权重。
//! 随机引擎的种子由会话种子与子步起止时间确定，同一输入总是得到同一输出。

use std::sync::Arc;

use cm_grid::{GridId, GridRegistry};
use tracing::debug;

use super::translate::NativeFrame;
use super::{
    finish, AdapterDiagnostics, AdapterFailure, AdapterLimits, AdapterOutput, CancelToken, CouplingAdapter,
    EngineKind, NativeResult, StepRequest,
};

/// 水动力引擎的本地输入
#[derive(Debug, Clone, PartialEq)]
pub struct HydroInput {
    /// x 方向单元数
    pub nx: usize,
    /// y 方向单元数
    pub ny: usize,
    /// x 方向分辨率 [m]
    pub dx: f64,
    /// y 方向分辨率 [m]
    pub dy: f64,
    /// 高程 [m]
    pub elevation: Vec<f64>,
    /// 可动沙量 [m]（不可侵蚀单元为 0）
    pub availability: Vec<f64>,
    /// 湿单元
    pub wet: Vec<bool>,
    /// 路由权重 [0, 1]
    pub routing_weight: Vec<f64>,
    /// 拖曳系数
    pub drag: Vec<f64>,
    /// 窗口平均流量 [m³/s]
    pub discharge: Vec<f64>,
    /// 随机种子
    pub seed: u64,
}

impl HydroInput {
    /// 单元数
    pub fn n_cells(&self) -> usize {
        self.nx * self.ny
    }

    /// 单元下标
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    /// 单元面积 [m²]
    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }
}

/// 水动力引擎接口
pub trait HydroEngine: Send + Sync {
    /// 引擎名称
    fn name(&self) -> &str;

    /// 稳定子步 [s]
    fn stable_step(&self, input: &HydroInput) -> f64;

    /// 推进 `dt` 秒，返回本地网格高程增量
    fn run(&self, input: &HydroInput, dt: f64, cancel: &CancelToken) -> Result<NativeResult, AdapterFailure>;
}

/// 水动力适配器
pub struct HydroAdapter<E: HydroEngine> {
    engine: E,
    frame: NativeFrame,
    limits: AdapterLimits,
    seed: u64,
}

impl<E: HydroEngine> HydroAdapter<E> {
    /// 创建
    pub fn new(
        engine: E,
        registry: Arc<GridRegistry>,
        canonical: GridId,
        native: GridId,
        limits: AdapterLimits,
        seed: u64,
    ) -> Result<Self, AdapterFailure> {
        let frame = NativeFrame::new(EngineKind::Hydro, registry, canonical, native)?;
        Ok(Self {
            engine,
            frame,
            limits,
            seed,
        })
    }

    /// 包装的引擎
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// 子步种子
    fn step_seed(&self, request: &StepRequest) -> u64 {
        let t0 = request.window.t0().to_bits();
        let t1 = request.window.t1().to_bits();
        self.seed ^ t0.rotate_left(17) ^ t1.rotate_left(41)
    }

    /// 翻译规范状态到本地输入
    pub fn prepare(&self, request: &StepRequest) -> Result<HydroInput, AdapterFailure> {
        let snapshot = &request.snapshot;
        let window = &request.window;

        let wet = window.wet_mask(&snapshot.elevation);
        let availability: Vec<f64> = snapshot
            .availability
            .iter()
            .zip(&snapshot.non_erodible)
            .map(|(a, fixed)| if *fixed { 0.0 } else { *a })
            .collect();
        let discharge: Vec<f64> = (0..snapshot.n_cells()).map(|c| window.discharge(c)).collect();

        let grid = self.frame.grid();
        Ok(HydroInput {
            nx: grid.nx(),
            ny: grid.ny(),
            dx: grid.dx(),
            dy: grid.dy(),
            elevation: self.frame.field(&snapshot.elevation)?,
            availability: self.frame.field(&availability)?,
            wet: self.frame.mask(&wet)?,
            routing_weight: self.frame.field(&request.feedback.routing_weight)?,
            drag: self.frame.field(&request.feedback.drag_coefficient)?,
            discharge: self.frame.field(&discharge)?,
            seed: self.step_seed(request),
        })
    }
}

impl<E: HydroEngine> CouplingAdapter for HydroAdapter<E> {
    fn kind(&self) -> EngineKind {
        EngineKind::Hydro
    }

    fn native_grid(&self) -> GridId {
        self.frame.id()
    }

    fn stable_step(&self, request: &StepRequest) -> Result<f64, AdapterFailure> {
        if !request.window.has_water() {
            return Ok(f64::INFINITY);
        }
        let input = self.prepare(request)?;
        Ok(self.engine.stable_step(&input))
    }

    fn step(&self, request: &StepRequest) -> Result<AdapterOutput, AdapterFailure> {
        request.cancel.check(EngineKind::Hydro)?;
        let n = self.frame.grid().n_cells();

        let result = if request.window.has_water() {
            let input = self.prepare(request)?;
            self.engine.run(&input, request.dt(), &request.cancel)?
        } else {
            NativeResult {
                delta: vec![0.0; n],
                boundary_outflow: 0.0,
                diagnostics: AdapterDiagnostics {
                    converged: true,
                    iterations: 0,
                    warnings: Vec::new(),
                },
            }
        };
        debug!(
            engine = self.engine.name(),
            t0 = request.window.t0(),
            dt = request.dt(),
            iterations = result.diagnostics.iterations,
            "水动力引擎完成"
        );
        finish(EngineKind::Hydro, self.frame.id(), n, result, &self.limits)
    }
}
