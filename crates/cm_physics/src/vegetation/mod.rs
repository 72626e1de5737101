// crates/cm_physics/src/vegetation/mod.rs

//! 植被状态管理
//!
//! 植被是风沙与水动力两个引擎之间的共同反馈机制：
//!
//! - 密度与株高只由生长/死亡规则决定，引擎不能直接写入
//! - 掩埋与淹没胁迫来自规范地形变化和外力窗口
//! - 反馈参数（粗糙长度、拖曳系数、路由权重）每个子步重新导出

pub mod feedback;
pub mod manager;
pub mod params;
pub mod state;

pub use feedback::{drag_coefficient, roughness_length, routing_weight, VegetationFeedback};
pub use manager::{VegetationManager, VegetationUpdate};
pub use params::VegetationParams;
pub use state::{GrowthStage, VegetationCell, VegetationState, VegetationStateError};
