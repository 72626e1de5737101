// apps/cm_cli/src/commands/run.rs

//! 运行耦合模拟命令
//!
//! 从配置（或检查点）构建会话，使用内置参考引擎运行到时间线结束。

use anyhow::{Context, Result};
use clap::Args;
use cm_config::CouplingConfig;
use cm_io::Checkpoint;
use cm_workflow::{CouplingSession, LoggingListener, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 运行参数
#[derive(Args)]
pub struct RunArgs {
    /// 配置文件路径 (JSON)
    #[arg(short, long, required_unless_present = "resume")]
    pub config: Option<PathBuf>,

    /// 风场文件（时间 风速 风向）
    #[arg(short, long)]
    pub wind: Option<PathBuf>,

    /// 潮位文件（时间 水位）
    #[arg(short = 't', long)]
    pub tide: Option<PathBuf>,

    /// 检查点目录（覆盖配置）
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// 从检查点文件继续运行
    #[arg(long, conflicts_with_all = ["config", "wind", "tide"])]
    pub resume: Option<PathBuf>,

    /// 模拟结束时间 [s]（覆盖配置）
    #[arg(long)]
    pub end_time: Option<f64>,

    /// 逐窗口输出事件
    #[arg(short, long)]
    pub verbose: bool,
}

/// 执行运行命令
pub fn execute(args: RunArgs) -> Result<()> {
    info!("=== CoastMorph 耦合运行 ===");

    let session = match &args.resume {
        Some(path) => {
            let checkpoint =
                Checkpoint::load(path).with_context(|| format!("无法加载检查点 {}", path.display()))?;
            info!("从检查点继续: step={}, t={} s", checkpoint.step, checkpoint.time);
            CouplingSession::from_checkpoint(&checkpoint).context("无法从检查点恢复会话")?
        }
        None => {
            let mut config = load_config(&args)?;
            super::attach_forcing_files(&mut config, args.wind.as_deref(), args.tide.as_deref())?;
            CouplingSession::from_config(config).context("无法创建耦合会话")?
        }
    };
    if args.resume.is_some() && (args.checkpoint_dir.is_some() || args.end_time.is_some()) {
        warn!("继续运行时沿用检查点中的配置，忽略 --checkpoint-dir 与 --end-time");
    }

    let grid = session.canonical_grid()?;
    info!(
        "会话 {}: 网格 {}x{} ({} m), 时间 [{}, {}] s",
        session.id(),
        grid.spec().nx,
        grid.spec().ny,
        grid.spec().dx,
        session.time(),
        session.timeline().end_time
    );

    let mut orchestrator = Orchestrator::with_reference_engines(session).context("无法创建编排器")?;
    let listener = if args.verbose {
        LoggingListener::new("cm_cli").verbose()
    } else {
        LoggingListener::new("cm_cli")
    };
    orchestrator.events().add_listener(Arc::new(listener));

    let summary = match orchestrator.run() {
        Ok(summary) => summary,
        Err(fatal) => {
            error!("运行终止: {}", fatal);
            if let Some(step) = fatal.restored_step {
                error!("状态已回滚到第 {} 步", step);
            }
            return Err(fatal).context("耦合运行失败");
        }
    };

    let session = orchestrator.session();
    let area = grid.cell_area();
    info!("=== 运行完成 ===");
    info!("窗口数: {}", summary.steps);
    info!("最终时间: {} s", summary.final_time);
    info!("冲突单元: {}", summary.conflicts);
    info!("重试次数: {}", summary.retries);
    info!("质量违例（已分摊）: {}", summary.mass_violations);
    info!("植被死亡: {}, 存活单元: {}", summary.deaths, session.vegetation().alive());
    info!("地形体积: {:.6} m³", session.topography().volume(area));
    info!("检查点: {}", summary.checkpoints);
    info!("计算时间: {:.2} s", summary.elapsed.as_secs_f64());
    if summary.stopped {
        warn!("运行被提前停止");
    }
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<CouplingConfig> {
    let path = args.config.as_ref().context("缺少 --config")?;
    let mut config =
        CouplingConfig::from_file(path).with_context(|| format!("无法加载配置文件 {}", path.display()))?;
    if let Some(dir) = &args.checkpoint_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("无法创建检查点目录 {}", dir.display()))?;
        config.checkpoint.directory = Some(dir.clone());
    }
    if let Some(end) = args.end_time {
        config.forcing.end_time = end;
    }
    Ok(config)
}
