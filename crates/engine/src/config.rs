/// 配置管理

use common::models::constants::{
    DEFAULT_DRIVER, DEFAULT_PLUGIN_DIRS, DEFAULT_PLUGIN_TIMEOUT, DEFAULT_ROOT,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::plugins::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub root: PathBuf,
    pub plugin_dirs: Vec<PathBuf>,
    /// 单次驱动调用的总超时（秒）
    pub plugin_timeout: u64,
    pub default_driver: String,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let root = std::env::var("VOLUMED_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT));

        let plugin_dirs = std::env::var("VOLUMED_PLUGIN_DIRS")
            .map(|dirs| {
                dirs.split(':')
                    .filter(|d| !d.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_else(|_| DEFAULT_PLUGIN_DIRS.iter().map(PathBuf::from).collect());

        let plugin_timeout = std::env::var("VOLUMED_PLUGIN_TIMEOUT")
            .unwrap_or_else(|_| DEFAULT_PLUGIN_TIMEOUT.to_string())
            .parse()?;

        let default_driver = std::env::var("VOLUMED_DEFAULT_DRIVER")
            .unwrap_or_else(|_| DEFAULT_DRIVER.to_string());

        let log_level = std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "warn".to_string());

        Ok(Self {
            root,
            plugin_dirs,
            plugin_timeout,
            default_driver,
            log_level,
        })
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            root: self.root.clone(),
            plugin_dirs: self.plugin_dirs.clone(),
            retry: RetryPolicy::with_deadline(Duration::from_secs(self.plugin_timeout)),
            default_driver: self.default_driver.clone(),
        }
    }
}

/// 卷管理器配置
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// 引擎根目录
    pub root: PathBuf,
    /// 插件发现目录（按优先级）
    pub plugin_dirs: Vec<PathBuf>,
    pub retry: RetryPolicy,
    pub default_driver: String,
}

impl ManagerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            plugin_dirs: DEFAULT_PLUGIN_DIRS.iter().map(PathBuf::from).collect(),
            retry: RetryPolicy::default(),
            default_driver: DEFAULT_DRIVER.to_string(),
        }
    }

    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.plugin_dirs = dirs;
        self
    }

    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.retry.deadline = deadline;
        self
    }
}
