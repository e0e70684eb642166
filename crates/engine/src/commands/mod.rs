/// 命令行
/// 
/// 每次调用都是一次完整的引擎生命周期：加载卷记录、按容器记录恢复引用，
/// 执行命令后等待后台任务结束。

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::container::FileContainerStore;
use crate::volume::VolumeManager;

pub mod container;
pub mod template;
pub mod volume;

#[derive(Parser)]
#[command(name = "volumed")]
#[command(about = "Volume manager with external driver plugins", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage volumes
    #[command(subcommand)]
    Volume(volume::VolumeCommands),

    /// Manage containers holding volumes
    #[command(subcommand)]
    Container(container::ContainerCommands),

    /// Show loaded drivers and their request counters
    Drivers {
        /// Print counters in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
}

/// 逐项执行的命令中有失败项，错误已逐条输出
#[derive(Debug, thiserror::Error)]
#[error("{failed} of {total} operations failed")]
pub struct PartialFailure {
    pub failed: usize,
    pub total: usize,
}

impl PartialFailure {
    /// 输出每个错误，有失败时返回 `PartialFailure`
    pub fn check<E: std::fmt::Display>(errors: Vec<E>, total: usize) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        for err in &errors {
            eprintln!("Error: {}", err);
        }
        Err(PartialFailure {
            failed: errors.len(),
            total,
        }
        .into())
    }
}

/// 命令执行上下文
pub struct Context {
    pub manager: VolumeManager,
    pub containers: FileContainerStore,
}

impl Context {
    pub async fn open(config: &Config) -> Result<Self> {
        let manager = VolumeManager::new(config.manager_config()).await?;
        let containers = FileContainerStore::new(&config.root);

        let report = manager.restore(&containers).await?;
        tracing::debug!(
            "Restored {} volumes ({} unavailable), {} references, {} mounted",
            report.volumes,
            report.unavailable,
            report.references,
            report.mounted
        );

        Ok(Self {
            manager,
            containers,
        })
    }

    pub async fn close(self) {
        self.manager.shutdown().await;
    }
}

pub async fn execute(command: Commands, ctx: &Context) -> Result<()> {
    match command {
        Commands::Volume(cmd) => volume::execute(cmd, ctx).await,
        Commands::Container(cmd) => container::execute(cmd, ctx).await,
        Commands::Drivers { metrics } => volume::drivers(ctx, metrics).await,
    }
}

/// 解析 `key=value` 参数
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ if !raw.is_empty() && !raw.contains('=') => Ok((raw.to_string(), String::new())),
        _ => Err(format!("invalid key=value pair: {:?}", raw)),
    }
}
