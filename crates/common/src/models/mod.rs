/// 共享数据模型
/// 
/// 定义卷管理器与命令行共享的数据结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod filters;

pub use filters::{LabelFilter, VolumeFilters};

/// 卷状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    #[default]
    Available,
    /// 驱动缺失或不可达，卷仍可列出和查看
    Unavailable,
}

/// 驱动激活状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    #[default]
    Unknown,
    ProbedOk,
    ProbedFailed,
}

/// 卷生命周期事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeEventKind {
    Create,
    Destroy,
    Mount,
    Unmount,
}

impl fmt::Display for VolumeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
        };
        f.write_str(s)
    }
}

/// 卷记录（持久化部分，不含运行时引用计数）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    pub driver: String,
    /// 驱动上报的挂载点；未挂载的远程卷为空字符串
    #[serde(default, deserialize_with = "null_as_default")]
    pub mountpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            mountpoint: String::new(),
            options: BTreeMap::new(),
            labels: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn reference(&self) -> VolumeRef {
        VolumeRef::exact(&self.driver, &self.name)
    }
}

/// 卷查看结果：卷记录加上运行时使用情况
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    #[serde(flatten)]
    pub volume: Volume,
    pub scope: String,
    pub status: VolumeStatus,
    pub ref_count: usize,
    #[serde(default)]
    pub references: Vec<String>,
}

/// 卷引用：名称加可选的驱动名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeRef {
    pub driver: Option<String>,
    pub name: String,
}

impl VolumeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            driver: None,
            name: name.into(),
        }
    }

    pub fn exact(driver: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            driver: Some(driver.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for VolumeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.driver {
            Some(driver) => write!(f, "{}/{}", driver, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// 卷事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeEvent {
    pub kind: VolumeEventKind,
    pub name: String,
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub timestamp: i64,
}

/// `null` 与缺省等价（反序列化为默认值）
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 常量定义
pub mod constants {
    /// 内置驱动名
    pub const DEFAULT_DRIVER: &str = "local";

    /// 卷作用域（单节点）
    pub const LOCAL_SCOPE: &str = "local";

    /// 引擎根目录下的卷目录
    pub const VOLUMES_DIR: &str = "volumes";

    /// 内置驱动的数据目录名
    pub const DATA_DIR: &str = "_data";

    /// 默认引擎根目录
    pub const DEFAULT_ROOT: &str = "/var/lib/volumed";

    /// 默认插件发现目录（按优先级）
    pub const DEFAULT_PLUGIN_DIRS: &[&str] = &[
        "/run/docker/plugins",
        "/etc/docker/plugins",
        "/usr/lib/docker/plugins",
    ];

    /// 单次驱动调用的总超时（秒）
    pub const DEFAULT_PLUGIN_TIMEOUT: u64 = 30;

    /// 退避初始间隔（毫秒）
    pub const BACKOFF_INITIAL_MS: u64 = 100;

    /// 退避因子
    pub const BACKOFF_FACTOR: u32 = 2;

    /// 退避上限（秒）
    pub const BACKOFF_CAP_SECS: u64 = 30;
}
