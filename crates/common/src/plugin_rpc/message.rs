/// 卷插件 RPC 方法定义

use std::fmt;

/// 请求与响应的 Content-Type
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// 激活响应中声明卷驱动能力的标记
pub const VOLUME_DRIVER_CAPABILITY: &str = "VolumeDriver";

/// 插件方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginMethod {
    Activate,
    Create,
    Remove,
    Mount,
    Unmount,
    Path,
    Get,
    List,
}

impl PluginMethod {
    /// HTTP 路径
    pub fn path(&self) -> &'static str {
        match self {
            Self::Activate => "/Plugin.Activate",
            Self::Create => "/VolumeDriver.Create",
            Self::Remove => "/VolumeDriver.Remove",
            Self::Mount => "/VolumeDriver.Mount",
            Self::Unmount => "/VolumeDriver.Unmount",
            Self::Path => "/VolumeDriver.Path",
            Self::Get => "/VolumeDriver.Get",
            Self::List => "/VolumeDriver.List",
        }
    }

    /// 变更类方法需要按驱动串行
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Create | Self::Remove | Self::Mount | Self::Unmount)
    }

    /// 计数器名称
    pub fn counter_name(&self) -> &'static str {
        match self {
            Self::Activate => "activations",
            Self::Create => "creations",
            Self::Remove => "removals",
            Self::Mount => "mounts",
            Self::Unmount => "unmounts",
            Self::Path => "paths",
            Self::Get => "gets",
            Self::List => "lists",
        }
    }

    pub fn all() -> [PluginMethod; 8] {
        [
            Self::Activate,
            Self::Create,
            Self::Remove,
            Self::Mount,
            Self::Unmount,
            Self::Path,
            Self::Get,
            Self::List,
        ]
    }
}

impl fmt::Display for PluginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path().trim_start_matches('/'))
    }
}
