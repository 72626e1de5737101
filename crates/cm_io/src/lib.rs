// crates/cm_io/src/lib.rs

//! CoastMorph IO 模块
//!
//! 提供数据输入输出功能。
//!
//! # 模块
//!
//! - [`checkpoint`]: 检查点保存/恢复与目录管理
//! - [`forcing_text`]: 风场 / 潮位文本文件读写
//!
//! # 使用示例
//!
//! ## 检查点
//!
//! ```rust,ignore
//! use cm_io::checkpoint::Checkpoint;
//!
//! let checkpoint = Checkpoint::from_payload(3600.0, 12, &payload)?.with_config_hash(hash);
//! checkpoint.save(Path::new("checkpoint.cmck"))?;
//! let restored: MyPayload = Checkpoint::load(Path::new("checkpoint.cmck"))?.payload()?;
//! ```
//!
//! ## 外力文件
//!
//! ```rust,ignore
//! use cm_io::forcing_text;
//!
//! let wind = forcing_text::read_wind(Path::new("wind.txt"))?;
//! let tide = forcing_text::read_tide(Path::new("tide.txt"))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod forcing_text;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointHeader, CheckpointManager, CheckpointResult};
