// apps/cm_cli/src/commands/info.rs

//! 信息显示命令
//!
//! 显示检查点内容、检查点目录或默认配置。

use anyhow::{Context, Result};
use clap::Args;
use cm_config::CouplingConfig;
use cm_io::{Checkpoint, CheckpointManager};
use cm_physics::CellSource;
use cm_workflow::CheckpointPayload;
use std::path::{Path, PathBuf};
use tracing::info;

/// 信息显示参数
#[derive(Args)]
pub struct InfoArgs {
    /// 检查点文件
    #[arg(short, long)]
    pub checkpoint: Option<PathBuf>,

    /// 列出目录中的检查点
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// 显示默认配置 (JSON)
    #[arg(long)]
    pub defaults: bool,
}

/// 执行信息命令
pub fn execute(args: InfoArgs) -> Result<()> {
    info!("=== CoastMorph 信息 ===");

    if let Some(path) = &args.checkpoint {
        print_checkpoint(path)?;
    }
    if let Some(dir) = &args.dir {
        print_directory(dir)?;
    }
    if args.defaults || (args.checkpoint.is_none() && args.dir.is_none()) {
        print_default_config()?;
    }
    Ok(())
}

fn print_checkpoint(path: &Path) -> Result<()> {
    let checkpoint = Checkpoint::load(path).with_context(|| format!("无法加载检查点 {}", path.display()))?;
    let payload: CheckpointPayload = checkpoint.payload().context("检查点负载无法解析")?;

    println!("=== 检查点 {} ===", path.display());
    println!("版本: {}", checkpoint.version);
    println!("窗口序号: {}", checkpoint.step);
    println!("模拟时间: {} s", checkpoint.time);
    match checkpoint.config_hash {
        Some(hash) => println!("配置哈希: {:016x}", hash),
        None => println!("配置哈希: -"),
    }
    println!("负载: {} 字节", checkpoint.payload_len());

    let canonical = &payload.config.grids.canonical;
    println!("\n规范网格: {} {}x{} ({} x {} m)", canonical.name, canonical.nx, canonical.ny, canonical.dx, canonical.dy);
    for spec in &payload.grids {
        println!("  已注册: {} {}x{}", spec.name, spec.nx, spec.ny);
    }
    println!("时间线: [{}, {}] s, {} 个事件", payload.timeline.start_time, payload.timeline.end_time, payload.timeline.events.len());

    let area = canonical.dx * canonical.dy;
    println!("\n地形体积: {:.6} m³ (版本 {})", payload.topography.volume(area), payload.topography.version());
    println!("植被: {} 个单元存活 / {}", payload.vegetation.alive(), payload.vegetation.len());

    if let Some(last) = payload.records.last() {
        println!("\n最近记录 (共 {} 条):", payload.records.len());
        println!("  窗口 {}: [{}, {}] s, 引擎 {:?}", last.step, last.t0, last.t1, last.active);
        println!(
            "  风沙 {} / 水动力 {} / 冲突 {} 个单元",
            last.cells_from(CellSource::Aeolian).len(),
            last.cells_from(CellSource::Hydro).len(),
            last.conflicts()
        );
        println!("  质量残差: {:.3e} m³", last.mass_residual());
    }
    Ok(())
}

fn print_directory(dir: &Path) -> Result<()> {
    let manager = CheckpointManager::new(dir, usize::MAX);
    let entries = manager
        .list_checkpoints()
        .with_context(|| format!("无法列出检查点目录 {}", dir.display()))?;
    println!("=== 检查点目录 {} ({} 个) ===", dir.display(), entries.len());
    for (path, header) in entries {
        println!(
            "  {}  step={}  t={} s  {} 字节",
            path.display(),
            header.step,
            header.time,
            header.payload_len
        );
    }
    Ok(())
}

fn print_default_config() -> Result<()> {
    println!("=== 默认配置 ===");
    let json = serde_json::to_string_pretty(&CouplingConfig::default())?;
    println!("{}", json);
    Ok(())
}
