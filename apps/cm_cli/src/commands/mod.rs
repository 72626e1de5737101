// apps/cm_cli/src/commands/mod.rs

//! 子命令

pub mod info;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use cm_config::CouplingConfig;
use cm_physics::ForcingEvent;
use std::path::Path;
use tracing::info;

/// 把风场 / 潮位文件作为覆盖整个运行期的事件追加到配置
pub(crate) fn attach_forcing_files(
    config: &mut CouplingConfig,
    wind: Option<&Path>,
    tide: Option<&Path>,
) -> Result<()> {
    let (start, end) = (config.forcing.start_time, config.forcing.end_time);
    if let Some(path) = wind {
        let series = cm_io::forcing_text::read_wind(path)
            .with_context(|| format!("无法读取风场文件 {}", path.display()))?;
        info!("风场: {} ({} 个采样)", path.display(), series.times().len());
        config
            .forcing
            .events
            .push(ForcingEvent::wind(format!("wind:{}", path.display()), series, start, end));
    }
    if let Some(path) = tide {
        let series = cm_io::forcing_text::read_tide(path)
            .with_context(|| format!("无法读取潮位文件 {}", path.display()))?;
        info!("潮位: {} ({} 个采样)", path.display(), series.len());
        config
            .forcing
            .events
            .push(ForcingEvent::water_level(format!("tide:{}", path.display()), series, start, end));
    }
    Ok(())
}
