// apps/cm_cli/src/commands/validate.rs

//! 配置验证命令
//!
//! 解析配置与外力文件，构建时间线并注册网格，但不运行引擎。

use anyhow::{bail, Result};
use clap::Args;
use cm_config::CouplingConfig;
use cm_grid::GridError;
use cm_workflow::CouplingSession;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 验证参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 配置文件路径 (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// 风场文件
    #[arg(short, long)]
    pub wind: Option<PathBuf>,

    /// 潮位文件
    #[arg(short = 't', long)]
    pub tide: Option<PathBuf>,

    /// 严格模式（警告也视为错误）
    #[arg(long)]
    pub strict: bool,
}

/// 验证结果
#[derive(Default)]
struct ValidationResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn is_ok(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("=== CoastMorph 配置验证 ===");

    let mut result = ValidationResult::default();
    if let Some(config) = load(&args.config, &mut result) {
        check(config, &args, &mut result);
    }
    print_validation_result(&result, args.strict)
}

fn load(path: &Path, result: &mut ValidationResult) -> Option<CouplingConfig> {
    println!("\n检查配置文件: {}", path.display());
    if !path.exists() {
        result.add_error(format!("配置文件不存在: {}", path.display()));
        return None;
    }
    match CouplingConfig::from_file(path) {
        Ok(config) => {
            println!("  ✓ 配置格式有效");
            Some(config)
        }
        Err(e) => {
            result.add_error(e.to_string());
            None
        }
    }
}

fn check(mut config: CouplingConfig, args: &ValidateArgs, result: &mut ValidationResult) {
    if let Err(e) = super::attach_forcing_files(&mut config, args.wind.as_deref(), args.tide.as_deref()) {
        result.add_error(format!("{:#}", e));
        return;
    }

    let span = config.forcing.end_time - config.forcing.start_time;
    if config.execution.max_window > span {
        result.add_warning(format!(
            "max_window = {} s 超过运行时长 {} s",
            config.execution.max_window, span
        ));
    }
    if config.execution.retry_limit == 0 {
        result.add_warning("retry_limit = 0，任何引擎失败都将终止运行");
    }
    let expected_steps = (span / config.execution.max_window).ceil() as u64;
    if config.checkpoint.interval_steps > expected_steps {
        result.add_warning(format!(
            "检查点间隔 {} 大于预计窗口数 {}，只会写出初始检查点",
            config.checkpoint.interval_steps, expected_steps
        ));
    }

    let session = match CouplingSession::from_config(config) {
        Ok(session) => session,
        Err(e) => {
            result.add_error(e.to_string());
            return;
        }
    };
    let timeline = session.timeline();
    if timeline.events.is_empty() {
        result.add_warning("时间线没有外力事件，所有窗口都将空转");
    }
    let grids = session.grids();
    println!(
        "  ✓ 网格: 规范 {:?}, 风沙 {:?}, 水动力 {:?}",
        grids.canonical, grids.aeolian, grids.hydro
    );
    check_round_trip(&session, result);
    println!("  ✓ 外力事件: {}", timeline.events.len());
    for event in &timeline.events {
        println!("    - {} ({}) [{}, {}] s", event.name, event.kind, event.start, event.end);
    }
    println!(
        "  ✓ 植被单元: {} (存活 {})",
        session.vegetation().len(),
        session.vegetation().alive()
    );
}

/// 初始地形在规范网格与各本地网格之间往返重采样
fn check_round_trip(session: &CouplingSession, result: &mut ValidationResult) {
    let grids = session.grids();
    let elevation = session.topography().elevation();
    for (engine, native) in [("风沙", grids.aeolian), ("水动力", grids.hydro)] {
        if native == grids.canonical {
            continue;
        }
        match session.registry().verify_round_trip(grids.canonical, native, elevation) {
            Ok(error) => println!("  ✓ {}网格往返误差: {:.3e} m", engine, error),
            Err(GridError::RoundTrip { error, tolerance }) => result.add_warning(format!(
                "初始地形经{}网格往返误差 {:.3e} m 超过容差 {:.1e} m，地形细节将在本地网格上丢失",
                engine, error, tolerance
            )),
            Err(e) => result.add_error(e.to_string()),
        }
    }
}

fn print_validation_result(result: &ValidationResult, strict: bool) -> Result<()> {
    println!("\n=== 验证结果 ===");

    if !result.errors.is_empty() {
        println!("\n错误 ({}):", result.errors.len());
        for err in &result.errors {
            error!("  ✗ {}", err);
            println!("  ✗ {}", err);
        }
    }

    if !result.warnings.is_empty() {
        println!("\n警告 ({}):", result.warnings.len());
        for warning in &result.warnings {
            warn!("  ⚠ {}", warning);
            println!("  ⚠ {}", warning);
        }
    }

    if result.is_ok(strict) {
        println!("\n✓ 验证通过");
        Ok(())
    } else {
        println!("\n✗ 验证失败");
        bail!(
            "验证失败：发现 {} 个错误，{} 个警告",
            result.errors.len(),
            result.warnings.len()
        )
    }
}
