// crates/cm_physics/src/lib.rs

//! 形态动力学耦合物理层
//!
//! 提供耦合核心的物理组件，包括：
//! - 外力时间线与窗口 (forcing)
//! - 初始地表 (surface)
//! - 规范地形状态 (topography)
//! - 植被状态、生长与反馈 (vegetation)
//! - 引擎适配器 (adapter)
//! - 参考物理引擎 (engine)
//! - 通量协调 (reconcile)
//!
//! # 数据流
//!
//! ```text
//! ForcingWindow ─┐
//! Snapshot ──────┼─> CouplingAdapter::step ─> AdapterOutput ─┐
//! Feedback ──────┘                                          ├─> FluxReconciler ─> TopographyState::apply
//!                                                           │
//!                                  VegetationManager::update <┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod engine;
pub mod forcing;
pub mod reconcile;
pub mod surface;
pub mod topography;
pub mod vegetation;

pub use adapter::{
    AdapterDiagnostics, AdapterFailure, AdapterLimits, AdapterOutput, AeolianAdapter, AeolianEngine, AeolianInput,
    CancelToken, CouplingAdapter, EngineKind, HydroAdapter, HydroEngine, HydroInput, NativeResult, StepRequest,
};
pub use engine::{AeolianParams, FluxRelaxationEngine, ParcelParams, ParcelRoutingEngine};
pub use forcing::{ForcingEvent, ForcingKind, ForcingSeries, ForcingTimeline, ForcingWindow, SpatialMask};
pub use reconcile::{
    CellSource, FluxReconciler, MassConservationViolation, ReconcileDiagnostics, ReconcileError, ReconcileParams,
    Reconciliation,
};
pub use surface::SeedSurface;
pub use topography::{ApplyOutcome, ClampedCell, TopographySnapshot, TopographyState};
pub use vegetation::{
    GrowthStage, VegetationCell, VegetationFeedback, VegetationManager, VegetationParams, VegetationState,
    VegetationStateError, VegetationUpdate,
};
