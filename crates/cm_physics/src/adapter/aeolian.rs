// crates/cm_physics/src/adapter/aeolian.rs

//! 风沙适配器
//!
//! 把规范状态翻译为风沙引擎的本地输入：风场、粗糙长度、含水率、可动沙量，
//! 以及输沙激活掩码（在风掩码内且未被淹没的单元）。

use std::sync::Arc;

use cm_grid::{GridId, GridRegistry};
use tracing::debug;

use super::translate::NativeFrame;
use super::{
    finish, AdapterDiagnostics, AdapterFailure, AdapterLimits, AdapterOutput, CancelToken, CouplingAdapter,
    EngineKind, NativeResult, StepRequest,
};

/// 风沙引擎的本地输入
#[derive(Debug, Clone, PartialEq)]
pub struct AeolianInput {
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
    /// 含水率
    pub moisture: Vec<f64>,
    /// 可动沙量 [m]（不可侵蚀单元为 0）
    pub availability: Vec<f64>,
    /// 粗糙长度 [m]
    pub roughness: Vec<f64>,
    /// 风速 x 分量 [m/s]
    pub wind_u: Vec<f64>,
    /// 风速 y 分量 [m/s]
    pub wind_v: Vec<f64>,
    /// 输沙激活
    pub active: Vec<bool>,
}

impl AeolianInput {
    /// 单元数
    pub fn n_cells(&self) -> usize {
        self.nx * self.ny
    }

    /// 单元下标
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }
}

/// 风沙引擎接口
pub trait AeolianEngine: Send + Sync {
    /// 引擎名称
    fn name(&self) -> &str;

    /// 稳定子步 [s]
    fn stable_step(&self, input: &AeolianInput) -> f64;

    /// 推进 `dt` 秒，返回本地网格高程增量
    fn run(&self, input: &AeolianInput, dt: f64, cancel: &CancelToken) -> Result<NativeResult, AdapterFailure>;
}

/// 风沙适配器
pub struct AeolianAdapter<E: AeolianEngine> {
    engine: E,
    frame: NativeFrame,
    limits: AdapterLimits,
}

impl<E: AeolianEngine> AeolianAdapter<E> {
    /// 创建
    pub fn new(
        engine: E,
        registry: Arc<GridRegistry>,
        canonical: GridId,
        native: GridId,
        limits: AdapterLimits,
    ) -> Result<Self, AdapterFailure> {
        let frame = NativeFrame::new(EngineKind::Aeolian, registry, canonical, native)?;
        Ok(Self { engine, frame, limits })
    }

    /// 包装的引擎
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// 翻译规范状态到本地输入
    pub fn prepare(&self, request: &StepRequest) -> Result<AeolianInput, AdapterFailure> {
        let snapshot = &request.snapshot;
        let window = &request.window;

        let wet = window.wet_mask(&snapshot.elevation);
        let active: Vec<bool> = window
            .wind_mask()
            .into_iter()
            .zip(&wet)
            .map(|(wind, wet)| wind && !wet)
            .collect();
        let availability: Vec<f64> = snapshot
            .availability
            .iter()
            .zip(&snapshot.non_erodible)
            .map(|(a, fixed)| if *fixed { 0.0 } else { *a })
            .collect();
        let (u, v): (Vec<f64>, Vec<f64>) = window.wind_field().iter().map(|w| (w.x, w.y)).unzip();

        let grid = self.frame.grid();
        Ok(AeolianInput {
            nx: grid.nx(),
            ny: grid.ny(),
            dx: grid.dx(),
            dy: grid.dy(),
            elevation: self.frame.field(&snapshot.elevation)?,
            moisture: self.frame.field(&snapshot.moisture)?,
            availability: self.frame.field(&availability)?,
            roughness: self.frame.field(&request.feedback.roughness_length)?,
            wind_u: self.frame.field(&u)?,
            wind_v: self.frame.field(&v)?,
            active: self.frame.mask(&active)?,
        })
    }
}

impl<E: AeolianEngine> CouplingAdapter for AeolianAdapter<E> {
    fn kind(&self) -> EngineKind {
        EngineKind::Aeolian
    }

    fn native_grid(&self) -> GridId {
        self.frame.id()
    }

    fn stable_step(&self, request: &StepRequest) -> Result<f64, AdapterFailure> {
        if !request.window.has_wind() {
            return Ok(f64::INFINITY);
        }
        let input = self.prepare(request)?;
        Ok(self.engine.stable_step(&input))
    }

    fn step(&self, request: &StepRequest) -> Result<AdapterOutput, AdapterFailure> {
        request.cancel.check(EngineKind::Aeolian)?;
        let n = self.frame.grid().n_cells();

        let result = if request.window.has_wind() {
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
            outflow = result.boundary_outflow,
            "风沙引擎完成"
        );
        finish(EngineKind::Aeolian, self.frame.id(), n, result, &self.limits)
    }
}
