// crates/cm_grid/src/lib.rs

//! 网格抽象层
//!
//! 描述各物理引擎的空间离散，并在网格之间做面积加权重采样。
//!
//! # 模块
//!
//! - [`coord`]: 地理坐标键（跨网格稳定的单元标识）
//! - [`grid`]: 规则（可旋转）网格定义
//! - [`weights`]: 面积加权权重矩阵
//! - [`registry`]: 网格注册表与权重缓存
//! - [`error`]: 网格错误
//!
//! # 示例
//!
//! ```
//! use cm_grid::{GridRegistry, GridSpec, ResampleTolerance};
//!
//! let registry = GridRegistry::new(ResampleTolerance::default());
//! let fine = registry.register(GridSpec::new("fine", [0.0, 0.0], 4, 4, 1.0, 1.0)).unwrap();
//! let coarse = registry.register(GridSpec::new("coarse", [0.0, 0.0], 2, 2, 2.0, 2.0)).unwrap();
//!
//! let field = vec![1.0; 16];
//! let out = registry.map(fine, coarse, &field).unwrap();
//! assert_eq!(out.len(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coord;
pub mod error;
pub mod grid;
pub mod registry;
pub mod weights;

pub use coord::CoordKey;
pub use error::{GridError, GridResult, MismatchReason};
pub use grid::{Grid, GridId, GridSpec, LengthUnit};
pub use registry::{GridRegistry, MappedField, ResampleTolerance};
pub use weights::WeightMatrix;
