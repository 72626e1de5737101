// crates/cm_workflow/src/lib.rs

//! CoastMorph 耦合工作流 (Layer 5)
//!
//! 把两个物理引擎、通量协调器与植被管理器组织成一个可复现、质量守恒的
//! 耦合循环。
//!
//! # 模块结构
//!
//! - [`session`]: 耦合会话（配置、网格、状态、记录、检查点负载）
//! - [`schedule`]: 窗口调度
//! - [`executor`]: 引擎调用（超时、并行）
//! - [`orchestrator`]: 状态机
//! - [`phase`]: 状态机阶段
//! - [`record`]: 时间步记录
//! - [`events`]: 事件系统
//! - [`storage`]: 检查点存储
//! - [`error`]: 错误分类
//!
//! # 示例
//!
//! ```rust,ignore
//! use cm_config::CouplingConfig;
//! use cm_workflow::{CouplingSession, LoggingListener, Orchestrator};
//! use std::sync::Arc;
//!
//! let config = CouplingConfig::from_file("coupling.json")?;
//! let session = CouplingSession::from_config(config)?;
//!
//! let mut orchestrator = Orchestrator::with_reference_engines(session)?;
//! orchestrator.events().add_listener(Arc::new(LoggingListener::new("coupling")));
//!
//! let summary = orchestrator.run()?;
//! println!("{} steps, t = {} s", summary.steps, summary.final_time);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod phase;
pub mod record;
pub mod schedule;
pub mod session;
pub mod storage;

/// 层级标识
pub const LAYER: u8 = 5;

// 重导出核心类型
pub use error::{CouplingError, ErrorKind, FatalError};
pub use events::{CouplingEvent, EventDispatcher, EventListener, FnListener, LoggingListener};
pub use executor::{Dispatch, EngineExecutor};
pub use orchestrator::{Orchestrator, RunSummary};
pub use phase::{Phase, Transition};
pub use record::{EngineReport, RetryRecord, TimestepRecord};
pub use schedule::{engines_for, EngineStep, ScheduleEntry, Scheduler};
pub use session::{CheckpointPayload, CheckpointRef, CouplingSession, SessionGrids, SessionId};
pub use storage::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
