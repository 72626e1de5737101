// crates/cm_foundation/src/lib.rs

//! CoastMorph Foundation Layer
//!
//! 基础层，提供整个耦合引擎共用的基础抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一基础错误类型
//! - [`numerics`]: Kahan 补偿求和
//! - [`tolerance`]: 数值容差比较
//!
//! # 示例
//!
//! ```
//! use cm_foundation::{CmError, CmResult, KahanSum};
//!
//! fn total(values: &[f64]) -> CmResult<f64> {
//!     if values.is_empty() {
//!         return Err(CmError::invalid_input("空字段"));
//!     }
//!     Ok(KahanSum::sum_iter(values.iter().copied()))
//! }
//!
//! assert_eq!(total(&[0.5, 0.25]).unwrap(), 0.75);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod numerics;
pub mod tolerance;

pub use error::{CmError, CmResult};
pub use numerics::KahanSum;
