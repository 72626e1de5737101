// crates/cm_physics/src/forcing/mod.rs

//! 外力模块
//!
//! - 时间序列 (TimeSeries, VectorTimeSeries)
//! - 空间掩码 (SpatialMask)
//! - 外力事件与时间线 (ForcingEvent, ForcingTimeline)
//! - 耦合窗口视图 (ForcingWindow)
//! - 常用序列 (presets)
//!
//! # 使用示例
//!
//! ```
//! use cm_physics::forcing::{presets, ForcingEvent, ForcingTimeline};
//!
//! let end = 86400.0;
//! let timeline = ForcingTimeline::new(end)
//!     .with_event(ForcingEvent::wind("wind", presets::default_wind(end).unwrap(), 0.0, end))
//!     .unwrap()
//!     .with_event(ForcingEvent::water_level("tide", presets::semidiurnal_tide(end).unwrap(), 0.0, end))
//!     .unwrap();
//!
//! assert_eq!(timeline.active(0.0, 3600.0).count(), 2);
//! ```

pub mod event;
pub mod mask;
pub mod presets;
pub mod timeline;
pub mod timeseries;
pub mod window;

pub use event::{ForcingEvent, ForcingKind, ForcingSeries};
pub use mask::SpatialMask;
pub use timeline::ForcingTimeline;
pub use timeseries::{ExtrapolationMode, TimeSeries, VectorTimeSeries};
pub use window::ForcingWindow;
