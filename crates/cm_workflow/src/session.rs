// crates/cm_workflow/src/session.rs

//! 耦合会话
//!
//! 会话持有一次运行的全部可变状态：配置、注册的网格、外力时间线、
//! 规范地形、植被状态、当前时间与时间步记录。编排器是唯一的修改者。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cm_config::CouplingConfig;
use cm_grid::{Grid, GridError, GridId, GridRegistry, GridSpec};
use cm_io::{Checkpoint, CheckpointError};
use cm_physics::{ForcingTimeline, TopographyState, VegetationState};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::CouplingError;
use crate::record::TimestepRecord;

/// 会话ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// 创建新的会话ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 获取内部UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 会话中注册的网格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionGrids {
    /// 规范网格
    pub canonical: GridId,
    /// 风沙引擎本地网格
    pub aeolian: GridId,
    /// 水动力引擎本地网格
    pub hydro: GridId,
}

/// 最近检查点的引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRef {
    /// 窗口序号
    pub step: u64,
    /// 模拟时间 [s]
    pub time: f64,
    /// 文件路径（内存存储时为空）
    pub path: Option<PathBuf>,
}

/// 检查点负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// 会话配置
    pub config: CouplingConfig,
    /// 注册的网格（按注册顺序）
    pub grids: Vec<GridSpec>,
    /// 外力时间线
    pub timeline: ForcingTimeline,
    /// 当前时间 [s]
    pub time: f64,
    /// 已完成的窗口数
    pub step: u64,
    /// 规范地形
    pub topography: TopographyState,
    /// 植被状态
    pub vegetation: VegetationState,
    /// 最近的时间步记录
    pub records: Vec<TimestepRecord>,
}

/// 耦合会话
#[derive(Debug)]
pub struct CouplingSession {
    id: SessionId,
    config: CouplingConfig,
    registry: Arc<GridRegistry>,
    grids: SessionGrids,
    timeline: ForcingTimeline,
    topography: TopographyState,
    vegetation: VegetationState,
    time: f64,
    step: u64,
    history: Vec<TimestepRecord>,
    last_checkpoint: Option<CheckpointRef>,
    started_at: DateTime<Utc>,
}

fn register_engine_grid(
    registry: &GridRegistry,
    spec: Option<&GridSpec>,
    canonical: GridId,
) -> Result<GridId, GridError> {
    let Some(spec) = spec else {
        return Ok(canonical);
    };
    let id = match registry.find(&spec.name) {
        Some(existing) if registry.grid(existing)?.spec() == spec => existing,
        _ => registry.register(spec.clone())?,
    };
    registry.check_conformal(id, canonical)?;
    registry.check_conformal(canonical, id)?;
    Ok(id)
}

impl CouplingSession {
    /// 从配置与外力时间线初始化会话
    ///
    /// 注册规范网格与两个引擎网格（缺省时与规范网格相同），检查协调性，
    /// 并由初始地表创建地形与植被状态。
    pub fn new(config: CouplingConfig, timeline: ForcingTimeline) -> Result<Self, CouplingError> {
        config.validate()?;
        timeline.validate()?;

        let registry = Arc::new(GridRegistry::new(config.resampling));
        let canonical = registry.register(config.grids.canonical.clone())?;
        let aeolian = register_engine_grid(&registry, config.grids.aeolian.as_ref(), canonical)?;
        let hydro = register_engine_grid(&registry, config.grids.hydrodynamic.as_ref(), canonical)?;

        let seed = config.surface.build(&config.grids.canonical)?;
        let topography = TopographyState::from_seed(&seed)?;
        let vegetation = VegetationState::from_seed(&seed, config.vegetation.mature_density);

        let session = Self {
            id: SessionId::new(),
            registry,
            grids: SessionGrids {
                canonical,
                aeolian,
                hydro,
            },
            time: timeline.start_time,
            timeline,
            topography,
            vegetation,
            step: 0,
            history: Vec::new(),
            last_checkpoint: None,
            started_at: Utc::now(),
            config,
        };
        info!(
            session = %session.id,
            cells = session.topography.n_cells(),
            start = session.time,
            end = session.timeline.end_time,
            "耦合会话已创建"
        );
        Ok(session)
    }

    /// 使用配置中的外力定义初始化会话
    pub fn from_config(config: CouplingConfig) -> Result<Self, CouplingError> {
        let timeline = config.forcing.timeline()?;
        Self::new(config, timeline)
    }

    /// 从检查点恢复会话
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, CouplingError> {
        let payload: CheckpointPayload = checkpoint.payload()?;
        checkpoint.verify_config(payload.config.config_hash())?;
        let mut session = Self::new(payload.config.clone(), payload.timeline.clone())?;
        session.check_grids(&payload.grids)?;
        session.apply_payload(payload, None);
        Ok(session)
    }

    fn check_grids(&self, grids: &[GridSpec]) -> Result<(), CouplingError> {
        let registered = self.registry.specs();
        if registered.as_slice() != grids {
            let name = grids.first().map(|g| g.name.clone()).unwrap_or_default();
            return Err(GridError::InvalidSpec {
                name,
                reason: format!("checkpoint has {} grid(s) not matching the configuration", grids.len()),
            }
            .into());
        }
        Ok(())
    }

    fn apply_payload(&mut self, payload: CheckpointPayload, path: Option<PathBuf>) {
        self.last_checkpoint = Some(CheckpointRef {
            step: payload.step,
            time: payload.time,
            path,
        });
        self.time = payload.time;
        self.step = payload.step;
        self.topography = payload.topography;
        self.vegetation = payload.vegetation;
        let retained = self.history.iter().filter(|r| r.step <= payload.step).count();
        if retained > 0 {
            self.history.truncate(retained);
        } else {
            self.history = payload.records;
        }
    }

    /// 构造检查点负载
    pub fn to_payload(&self) -> CheckpointPayload {
        let keep = self.config.checkpoint.history_len;
        let skip = self.history.len().saturating_sub(keep);
        CheckpointPayload {
            config: self.config.clone(),
            grids: self.registry.specs(),
            timeline: self.timeline.clone(),
            time: self.time,
            step: self.step,
            topography: self.topography.clone(),
            vegetation: self.vegetation.clone(),
            records: self.history[skip..].to_vec(),
        }
    }

    /// 构造检查点
    pub fn checkpoint(&self) -> Result<Checkpoint, CheckpointError> {
        Ok(Checkpoint::from_payload(self.time, self.step, &self.to_payload())?
            .with_config_hash(self.config.config_hash()))
    }

    /// 记录最近检查点
    pub fn mark_checkpoint(&mut self, path: Option<PathBuf>) {
        self.last_checkpoint = Some(CheckpointRef {
            step: self.step,
            time: self.time,
            path,
        });
    }

    /// 回滚到检查点
    ///
    /// 检查点之后的记录被丢弃。
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), CouplingError> {
        checkpoint.verify_config(self.config.config_hash())?;
        let payload: CheckpointPayload = checkpoint.payload()?;
        self.check_grids(&payload.grids)?;
        let path = self.last_checkpoint.as_ref().and_then(|c| c.path.clone());
        self.apply_payload(payload, path);
        info!(session = %self.id, step = self.step, time = self.time, "会话已回滚");
        Ok(())
    }

    /// 会话ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// 配置
    pub fn config(&self) -> &CouplingConfig {
        &self.config
    }

    /// 网格注册表
    pub fn registry(&self) -> &Arc<GridRegistry> {
        &self.registry
    }

    /// 网格
    pub fn grids(&self) -> SessionGrids {
        self.grids
    }

    /// 规范网格
    pub fn canonical_grid(&self) -> Result<Arc<Grid>, GridError> {
        self.registry.grid(self.grids.canonical)
    }

    /// 外力时间线
    pub fn timeline(&self) -> &ForcingTimeline {
        &self.timeline
    }

    /// 地形
    pub fn topography(&self) -> &TopographyState {
        &self.topography
    }

    pub(crate) fn topography_mut(&mut self) -> &mut TopographyState {
        &mut self.topography
    }

    /// 植被
    pub fn vegetation(&self) -> &VegetationState {
        &self.vegetation
    }

    pub(crate) fn vegetation_mut(&mut self) -> &mut VegetationState {
        &mut self.vegetation
    }

    /// 当前时间 [s]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// 已完成的窗口数
    pub fn step(&self) -> u64 {
        self.step
    }

    /// 时间线是否已结束
    pub fn is_finished(&self) -> bool {
        self.timeline.is_exhausted(self.time)
    }

    /// 时间步记录
    pub fn history(&self) -> &[TimestepRecord] {
        &self.history
    }

    /// 最近检查点
    pub fn last_checkpoint(&self) -> Option<&CheckpointRef> {
        self.last_checkpoint.as_ref()
    }

    /// 会话创建时刻
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 提交一个完成的窗口
    pub(crate) fn commit(&mut self, record: TimestepRecord) {
        self.time = record.t1;
        self.step = record.step;
        self.history.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_physics::CellSource;

    fn config() -> CouplingConfig {
        let mut config = CouplingConfig::default();
        config.grids.canonical = GridSpec::new("canonical", [0.0, 0.0], 4, 4, 1.0, 1.0);
        config.forcing.end_time = 100.0;
        config
    }

    fn record(step: u64, t0: f64, t1: f64) -> TimestepRecord {
        TimestepRecord {
            step,
            t0,
            t1,
            active: Vec::new(),
            elevation_delta: vec![0.0; 16],
            vegetation: Default::default(),
            attribution: vec![CellSource::None; 16],
            reconciliation: Default::default(),
            clamped: Vec::new(),
            engines: Vec::new(),
            retries: Vec::new(),
            topography_version: step,
        }
    }

    #[test]
    fn test_new_session() {
        let session = CouplingSession::from_config(config()).unwrap();
        assert_eq!(session.step(), 0);
        assert_eq!(session.time(), 0.0);
        let grids = session.grids();
        assert_eq!(grids.canonical, grids.aeolian);
        assert_eq!(grids.canonical, grids.hydro);
        assert_eq!(session.topography().n_cells(), 16);
    }

    #[test]
    fn test_engine_grids_registered() {
        let mut config = config();
        config.grids.aeolian = Some(GridSpec::new("aeolian", [0.0, 0.0], 2, 2, 2.0, 2.0));
        config.grids.hydrodynamic = Some(GridSpec::new("aeolian", [0.0, 0.0], 2, 2, 2.0, 2.0));
        let session = CouplingSession::from_config(config).unwrap();
        let grids = session.grids();
        assert_ne!(grids.aeolian, grids.canonical);
        assert_eq!(grids.aeolian, grids.hydro);
        assert_eq!(session.registry().len(), 2);
    }

    #[test]
    fn test_rotated_engine_grid_rejected() {
        let mut config = config();
        config.grids.hydrodynamic = Some(GridSpec::new("hydro", [0.0, 0.0], 4, 4, 1.0, 1.0).with_rotation(30.0));
        let err = CouplingSession::from_config(config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::GridMismatch);
    }

    #[test]
    fn test_checkpoint_restore() {
        let mut session = CouplingSession::from_config(config()).unwrap();
        let ckpt = session.checkpoint().unwrap();
        session.mark_checkpoint(None);

        session.topography_mut().apply(&vec![0.1; 16]).unwrap();
        session.commit(record(1, 0.0, 50.0));
        assert_eq!(session.time(), 50.0);

        session.restore(&ckpt).unwrap();
        assert_eq!(session.step(), 0);
        assert_eq!(session.time(), 0.0);
        assert!(session.history().is_empty());
        assert!(session.topography().elevation().iter().all(|z| *z == 0.0));
    }

    #[test]
    fn test_from_checkpoint() {
        let mut session = CouplingSession::from_config(config()).unwrap();
        session.topography_mut().apply(&vec![0.05; 16]).unwrap();
        session.commit(record(1, 0.0, 50.0));
        let ckpt = session.checkpoint().unwrap();

        let resumed = CouplingSession::from_checkpoint(&ckpt).unwrap();
        assert_eq!(resumed.step(), 1);
        assert_eq!(resumed.time(), 50.0);
        assert_eq!(resumed.history().len(), 1);
        assert_eq!(resumed.topography(), session.topography());
        assert_eq!(resumed.last_checkpoint().map(|c| c.step), Some(1));
    }

    #[test]
    fn test_history_trimmed_in_payload() {
        let mut config = config();
        config.checkpoint.history_len = 2;
        let mut session = CouplingSession::from_config(config).unwrap();
        for k in 1..=5 {
            session.commit(record(k, (k - 1) as f64 * 10.0, k as f64 * 10.0));
        }
        let payload = session.to_payload();
        assert_eq!(payload.records.iter().map(|r| r.step).collect::<Vec<_>>(), vec![4, 5]);
    }
}
