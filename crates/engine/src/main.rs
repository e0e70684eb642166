/// Volumed - 命令行入口
/// 
/// 退出码：0 成功，1 操作失败，125 参数错误

use clap::error::ErrorKind;
use clap::Parser;
use engine::commands::{self, Cli, Context, PartialFailure};
use engine::Config;
use std::process::ExitCode;
use tracing::{debug, info};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 125;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    // 加载环境变量
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: invalid configuration: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    // 初始化日志
    // 日志写到 stderr，stdout 只输出命令结果
    // RUST_LOG 优先，其次 LOG_LEVEL
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .init();

    info!("🚀 启动 volumed (root: {:?})", cfg.root);

    match run(cli, &cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<PartialFailure>().is_some() => ExitCode::from(EXIT_FAILURE),
        Err(e) => {
            debug!("❌ {:?}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli, cfg: &Config) -> anyhow::Result<()> {
    let ctx = Context::open(cfg).await?;
    info!("✅ 卷管理器已就绪");

    let result = tokio::select! {
        result = commands::execute(cli.command, &ctx) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    ctx.close().await;
    info!("👋 volumed 已退出");
    result
}
