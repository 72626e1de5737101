// crates/cm_config/src/coupling_config.rs

//! CouplingConfig - 耦合会话配置
//!
//! 一个 JSON 文件描述一次耦合运行的全部输入：网格、初始地表、外力时间线、
//! 各组件参数、执行策略与检查点。缺省字段由 `#[serde(default = "...")]`
//! 函数补齐，加载后统一经过 [`CouplingConfig::validate`]。

use std::path::{Path, PathBuf};

use cm_grid::{GridSpec, ResampleTolerance};
use cm_physics::forcing::presets;
use cm_physics::{
    AdapterLimits, AeolianParams, EngineKind, ForcingEvent, ForcingTimeline, ParcelParams, ReconcileParams,
    SeedSurface, VegetationParams,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// 耦合会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// 网格
    #[serde(default)]
    pub grids: GridsConfig,

    /// 初始地表
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// 外力
    #[serde(default)]
    pub forcing: ForcingConfig,

    /// 重采样容差
    #[serde(default)]
    pub resampling: ResampleTolerance,

    /// 植被参数
    #[serde(default)]
    pub vegetation: VegetationParams,

    /// 风沙引擎参数
    #[serde(default)]
    pub aeolian: AeolianParams,

    /// 水动力引擎参数
    #[serde(default)]
    pub hydro: ParcelParams,

    /// 通量协调
    #[serde(default)]
    pub reconciliation: ReconcileParams,

    /// 适配器限值
    #[serde(default)]
    pub adapters: AdapterLimits,

    /// 执行策略
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// 检查点
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// 随机种子
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

/// 网格配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridsConfig {
    /// 规范网格
    #[serde(default = "default_canonical")]
    pub canonical: GridSpec,
    /// 风沙引擎网格（缺省与规范网格相同）
    #[serde(default)]
    pub aeolian: Option<GridSpec>,
    /// 水动力引擎网格（缺省与规范网格相同）
    #[serde(default)]
    pub hydrodynamic: Option<GridSpec>,
}

fn default_canonical() -> GridSpec {
    GridSpec::new("canonical", [0.0, 0.0], 50, 50, 1.0, 1.0)
}

impl Default for GridsConfig {
    fn default() -> Self {
        Self {
            canonical: default_canonical(),
            aeolian: None,
            hydrodynamic: None,
        }
    }
}

/// 初始植被斑块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationPatch {
    /// 规范网格单元 `[i, j]`
    pub cell: [usize; 2],
    /// 密度 [0, 1]
    pub density: f64,
    /// 株高 [m]
    pub height: f64,
}

/// 初始地表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// 原点处高程 [m]
    #[serde(default)]
    pub base_elevation: f64,
    /// x 方向坡度（海滩向陆抬升为正）
    #[serde(default)]
    pub slope_x: f64,
    /// 表层含水率
    #[serde(default)]
    pub moisture: f64,
    /// 初始可动沙量 [m]
    #[serde(default = "default_availability")]
    pub availability: f64,
    /// 可动沙量上限 [m]
    #[serde(default = "default_availability")]
    pub availability_ceiling: f64,
    /// 不可侵蚀层距地表深度 [m]
    #[serde(default)]
    pub non_erodible_offset: Option<f64>,
    /// 不可侵蚀单元 `[i, j]`
    #[serde(default)]
    pub non_erodible: Vec<[usize; 2]>,
    /// 初始植被
    #[serde(default)]
    pub vegetation: Vec<VegetationPatch>,
}

fn default_availability() -> f64 {
    cm_physics::surface::DEFAULT_AVAILABILITY_CEILING
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            base_elevation: 0.0,
            slope_x: 0.0,
            moisture: 0.0,
            availability: default_availability(),
            availability_ceiling: default_availability(),
            non_erodible_offset: None,
            non_erodible: Vec::new(),
            vegetation: Vec::new(),
        }
    }
}

impl SurfaceConfig {
    /// 在规范网格上生成初始地表
    pub fn build(&self, grid: &GridSpec) -> Result<SeedSurface, ConfigError> {
        let index = |cell: [usize; 2], key: &str| -> Result<usize, ConfigError> {
            if cell[0] >= grid.nx || cell[1] >= grid.ny {
                return Err(ConfigError::invalid(
                    format!("surface.{}", key),
                    format!("{:?}", cell),
                    format!("超出规范网格 {}x{}", grid.nx, grid.ny),
                ));
            }
            Ok(cell[1] * grid.nx + cell[0])
        };

        let elevation = (0..grid.ny)
            .flat_map(|_| (0..grid.nx).map(|i| self.base_elevation + self.slope_x * (i as f64 + 0.5) * grid.dx))
            .collect();
        let n = grid.nx * grid.ny;
        let mut seed = SeedSurface::from_elevation(elevation)
            .with_moisture(vec![self.moisture; n])
            .with_availability(self.availability, self.availability_ceiling);

        let fixed = self
            .non_erodible
            .iter()
            .map(|c| index(*c, "non_erodible"))
            .collect::<Result<Vec<_>, _>>()?;
        seed = seed.with_non_erodible(fixed);
        if let Some(offset) = self.non_erodible_offset {
            seed = seed.with_non_erodible_offset(offset);
        }
        for patch in &self.vegetation {
            seed = seed.with_vegetation(index(patch.cell, "vegetation")?, patch.density, patch.height);
        }

        seed.validate(n)
            .map_err(|e| ConfigError::invalid("surface", "", e.to_string()))?;
        Ok(seed)
    }
}

/// 外力配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcingConfig {
    /// 起始时间 [s]
    #[serde(default)]
    pub start_time: f64,
    /// 结束时间 [s]
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    /// 追加默认恒定风（10 m/s, 0°）
    #[serde(default)]
    pub preset_wind: bool,
    /// 追加默认半日潮
    #[serde(default)]
    pub preset_tide: bool,
    /// 事件
    #[serde(default)]
    pub events: Vec<ForcingEvent>,
}

fn default_end_time() -> f64 {
    86400.0
}

impl Default for ForcingConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            end_time: default_end_time(),
            preset_wind: false,
            preset_tide: false,
            events: Vec::new(),
        }
    }
}

impl ForcingConfig {
    /// 构造时间线
    pub fn timeline(&self) -> Result<ForcingTimeline, ConfigError> {
        let wrap = |e: cm_foundation::CmError| ConfigError::invalid("forcing", "", e.to_string());
        let mut timeline = ForcingTimeline::new(self.end_time);
        timeline.start_time = self.start_time;
        if self.preset_wind {
            let series = presets::default_wind(self.end_time).map_err(wrap)?;
            timeline
                .add(ForcingEvent::wind("preset-wind", series, self.start_time, self.end_time))
                .map_err(wrap)?;
        }
        if self.preset_tide {
            let series = presets::semidiurnal_tide(self.end_time).map_err(wrap)?;
            timeline
                .add(ForcingEvent::water_level("preset-tide", series, self.start_time, self.end_time))
                .map_err(wrap)?;
        }
        for event in &self.events {
            timeline.add(event.clone()).map_err(wrap)?;
        }
        timeline.validate().map_err(wrap)?;
        Ok(timeline)
    }
}

/// 引擎调用策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// 按固定顺序依次调用
    Sequential {
        /// 调用顺序
        #[serde(default = "default_order")]
        order: Vec<EngineKind>,
    },
    /// 掩码不相交时并行调用，否则退回默认顺序
    Parallel,
}

fn default_order() -> Vec<EngineKind> {
    vec![EngineKind::Aeolian, EngineKind::Hydro]
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::Sequential { order: default_order() }
    }
}

/// 执行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// 单次引擎调用超时 [s]
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: f64,
    /// 步长减半重试次数
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// 调用策略
    #[serde(default)]
    pub policy: ExecutionPolicy,
    /// 最大窗口长度 [s]
    #[serde(default = "default_max_window")]
    pub max_window: f64,
    /// 最小子步 [s]
    #[serde(default = "default_min_step")]
    pub min_step: f64,
}

fn default_adapter_timeout() -> f64 {
    60.0
}
fn default_retry_limit() -> u32 {
    3
}
fn default_max_window() -> f64 {
    3600.0
}
fn default_min_step() -> f64 {
    1.0
}

/// 重试次数上限
pub const MAX_RETRY_LIMIT: u32 = 16;

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: default_adapter_timeout(),
            retry_limit: default_retry_limit(),
            policy: ExecutionPolicy::default(),
            max_window: default_max_window(),
            min_step: default_min_step(),
        }
    }
}

/// 检查点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// 每隔多少个窗口写一次
    #[serde(default = "default_interval_steps")]
    pub interval_steps: u64,
    /// 检查点中保留的最近记录数
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// 检查点目录（缺省只保存在内存中）
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// 目录中保留的文件数
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_interval_steps() -> u64 {
    10
}
fn default_history_len() -> usize {
    16
}
fn default_keep() -> usize {
    3
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_steps: default_interval_steps(),
            history_len: default_history_len(),
            directory: None,
            keep: default_keep(),
        }
    }
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            grids: GridsConfig::default(),
            surface: SurfaceConfig::default(),
            forcing: ForcingConfig::default(),
            resampling: ResampleTolerance::default(),
            vegetation: VegetationParams::default(),
            aeolian: AeolianParams::default(),
            hydro: ParcelParams::default(),
            reconciliation: ReconcileParams::default(),
            adapters: AdapterLimits::default(),
            execution: ExecutionConfig::default(),
            checkpoint: CheckpointConfig::default(),
            seed: default_seed(),
        }
    }
}

impl CouplingConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json(&content)
    }

    /// 从 JSON 文本加载配置
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: CouplingConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        debug!(hash = config.config_hash(), "配置已加载");
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, spec) in [
            ("grids.canonical", Some(&self.grids.canonical)),
            ("grids.aeolian", self.grids.aeolian.as_ref()),
            ("grids.hydrodynamic", self.grids.hydrodynamic.as_ref()),
        ] {
            if let Some(spec) = spec {
                spec.validate().map_err(|e| ConfigError::invalid(key, &spec.name, e.to_string()))?;
            }
        }

        let tol = &self.resampling;
        if !(tol.rotation_deg >= 0.0 && tol.round_trip > 0.0) {
            return Err(ConfigError::invalid(
                "resampling",
                format!("{:?}", tol),
                "容差必须为非负且往返容差为正",
            ));
        }

        self.vegetation
            .validate()
            .map_err(|e| ConfigError::invalid("vegetation", "", e.to_string()))?;

        let rec = &self.reconciliation;
        if !(rec.mass_tolerance > 0.0) {
            return Err(ConfigError::invalid(
                "reconciliation.mass_tolerance",
                rec.mass_tolerance,
                "必须为正",
            ));
        }
        if !(rec.mass_hard_ceiling >= rec.mass_tolerance) {
            return Err(ConfigError::invalid(
                "reconciliation.mass_hard_ceiling",
                rec.mass_hard_ceiling,
                "不能小于 mass_tolerance",
            ));
        }

        if !(self.adapters.max_abs_delta > 0.0) {
            return Err(ConfigError::invalid("adapters.max_abs_delta", self.adapters.max_abs_delta, "必须为正"));
        }

        let exec = &self.execution;
        if !(exec.adapter_timeout_secs.is_finite() && exec.adapter_timeout_secs > 0.0) {
            return Err(ConfigError::invalid(
                "execution.adapter_timeout_secs",
                exec.adapter_timeout_secs,
                "必须为有限正数",
            ));
        }
        if exec.retry_limit > MAX_RETRY_LIMIT {
            return Err(ConfigError::invalid(
                "execution.retry_limit",
                exec.retry_limit,
                format!("不能超过 {}", MAX_RETRY_LIMIT),
            ));
        }
        if !(exec.min_step > 0.0 && exec.max_window >= exec.min_step) {
            return Err(ConfigError::invalid(
                "execution.max_window",
                exec.max_window,
                format!("必须不小于 min_step ({}) 且 min_step 为正", exec.min_step),
            ));
        }
        if let ExecutionPolicy::Sequential { order } = &exec.policy {
            if order.is_empty() {
                return Err(ConfigError::Missing("execution.policy.order".to_string()));
            }
            let mut sorted = order.clone();
            sorted.sort();
            sorted.dedup();
            if sorted.len() != order.len() {
                return Err(ConfigError::invalid("execution.policy.order", format!("{:?}", order), "引擎重复"));
            }
        }

        let ckpt = &self.checkpoint;
        if ckpt.interval_steps == 0 {
            return Err(ConfigError::invalid("checkpoint.interval_steps", 0, "必须至少为 1"));
        }
        if ckpt.history_len == 0 {
            return Err(ConfigError::invalid("checkpoint.history_len", 0, "必须至少为 1"));
        }
        if ckpt.keep == 0 {
            return Err(ConfigError::invalid("checkpoint.keep", 0, "必须至少为 1"));
        }

        if !(self.forcing.end_time > self.forcing.start_time) {
            return Err(ConfigError::invalid(
                "forcing.end_time",
                self.forcing.end_time,
                format!("必须大于 start_time ({})", self.forcing.start_time),
            ));
        }
        self.forcing.timeline()?;
        self.surface.build(&self.grids.canonical)?;

        Ok(())
    }

    /// 配置指纹（FNV-1a 64 位，基于规范 JSON 序列化）
    ///
    /// 用于检查点恢复时判断配置是否一致。
    pub fn config_hash(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes
            .iter()
            .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CouplingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.policy, ExecutionPolicy::default());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = CouplingConfig::from_json("{}").unwrap();
        assert_eq!(config.grids.canonical.nx, 50);
        assert_eq!(config.checkpoint.interval_steps, 10);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_partial_section() {
        let json = r#"{
            "execution": { "retry_limit": 5, "policy": { "mode": "parallel" } },
            "reconciliation": { "mass_tolerance": 1e-6 }
        }"#;
        let config = CouplingConfig::from_json(json).unwrap();
        assert_eq!(config.execution.retry_limit, 5);
        assert_eq!(config.execution.policy, ExecutionPolicy::Parallel);
        assert_eq!(config.execution.max_window, 3600.0);
        assert_eq!(config.reconciliation.mass_tolerance, 1e-6);
    }

    #[test]
    fn test_invalid_retry_limit() {
        let mut config = CouplingConfig::default();
        config.execution.retry_limit = 99;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "execution.retry_limit"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ceiling_below_tolerance() {
        let mut config = CouplingConfig::default();
        config.reconciliation.mass_hard_ceiling = config.reconciliation.mass_tolerance / 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_order() {
        let mut config = CouplingConfig::default();
        config.execution.policy = ExecutionPolicy::Sequential {
            order: vec![EngineKind::Hydro, EngineKind::Hydro],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_b_max() {
        let mut config = CouplingConfig::default();
        config.vegetation.b_max = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_surface_out_of_grid() {
        let mut config = CouplingConfig::default();
        config.surface.vegetation.push(VegetationPatch {
            cell: [50, 0],
            density: 0.8,
            height: 0.5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_surface_slope() {
        let mut config = CouplingConfig::default();
        config.surface.slope_x = 0.02;
        let seed = config.surface.build(&config.grids.canonical).unwrap();
        assert!((seed.elevation[0] - 0.01).abs() < 1e-12);
        assert!(seed.elevation[1] > seed.elevation[0]);
        assert_eq!(seed.elevation[0], seed.elevation[50]);
    }

    #[test]
    fn test_preset_forcing() {
        let mut config = CouplingConfig::default();
        config.forcing.preset_wind = true;
        config.forcing.preset_tide = true;
        let timeline = config.forcing.timeline().unwrap();
        assert_eq!(timeline.events.len(), 2);
    }

    #[test]
    fn test_hash_stable_and_sensitive() {
        let a = CouplingConfig::default();
        let mut b = CouplingConfig::default();
        assert_eq!(a.config_hash(), b.config_hash());
        b.seed = 7;
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = CouplingConfig::default();
        config.checkpoint.directory = Some(PathBuf::from("ckpt"));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CouplingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.config_hash(), config.config_hash());
    }
}
