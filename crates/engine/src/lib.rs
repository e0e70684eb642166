/// Volumed - 卷管理引擎
/// 
/// 发现并激活外部卷驱动插件，维护卷注册表与挂载引用计数，
/// 引擎重启后根据持久化记录与容器状态恢复。

pub mod commands;
pub mod config;
pub mod container;
pub mod plugins;
pub mod storage;
pub mod volume;

#[cfg(test)]
mod testing;

pub use config::{Config, ManagerConfig};
pub use container::{ContainerRegistry, FileContainerStore};
pub use volume::{CreateOptions, VolumeManager};
