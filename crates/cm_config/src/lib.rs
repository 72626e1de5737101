// crates/cm_config/src/lib.rs

//! CoastMorph Config Layer (Layer 4)
//!
//! 配置层，把一次耦合运行的全部参数集中到 [`CouplingConfig`]。
//!
//! # 模块概览
//!
//! - [`coupling_config`]: 会话配置、默认值与校验
//! - [`error`]: 配置错误类型
//!
//! # 层级架构
//!
//! ```text
//! Layer 6: cm_cli       ─> CouplingConfig::from_file
//! Layer 5: cm_workflow  ─> CouplingSession::new(config)
//! Layer 4: cm_config    ─> CouplingConfig (本层)
//! Layer 3: cm_physics   ─> VegetationParams, AeolianParams, ...
//! Layer 2: cm_grid      ─> GridSpec, ResampleTolerance
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coupling_config;
pub mod error;

/// 层级标识
pub const LAYER: u8 = 4;

pub use coupling_config::{
    CheckpointConfig, CouplingConfig, ExecutionConfig, ExecutionPolicy, ForcingConfig, GridsConfig, SurfaceConfig,
    VegetationPatch, MAX_RETRY_LIMIT,
};
pub use error::ConfigError;
