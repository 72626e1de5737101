// apps/cm_cli/src/main.rs

//! CoastMorph 命令行界面
//!
//! 读取 JSON 耦合配置与风场 / 潮位文本文件，驱动风沙-水动力耦合运行。
//!
//! # 架构层级
//!
//! 本模块属于 **Layer 6: Application**，只通过 `cm_workflow` 的会话与编排器
//! 接触物理层，不直接调用引擎。

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// CoastMorph 海岸地貌耦合命令行工具
#[derive(Parser)]
#[command(name = "cm_cli")]
#[command(author = "CoastMorph Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CoastMorph aeolian / hydrodynamic morphology coupling", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行耦合模拟
    Run(commands::run::RunArgs),
    /// 验证配置
    Validate(commands::validate::ValidateArgs),
    /// 显示检查点或默认配置
    Info(commands::info::InfoArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Info(args) => commands::info::execute(args),
    }
}
