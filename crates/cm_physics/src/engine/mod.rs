// crates/cm_physics/src/engine/mod.rs

//! 参考物理引擎
//!
//! 两个降阶引擎分别实现 [`AeolianEngine`](crate::adapter::AeolianEngine) 与
//! [`HydroEngine`](crate::adapter::HydroEngine)，使耦合核心可以端到端运行：
//!
//! - [`FluxRelaxationEngine`]: 确定性的风沙通量松弛模型
//! - [`ParcelRoutingEngine`]: 带种子的泥沙包路由模型
//!
//! 外部求解器只需实现相同的 trait 即可替换。

pub mod flux_relaxation;
pub mod parcel_routing;

pub use flux_relaxation::{AeolianParams, FluxRelaxationEngine};
pub use parcel_routing::{ParcelParams, ParcelRoutingEngine};
