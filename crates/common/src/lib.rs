/// Volumed - 公共库
/// 
/// 提供卷管理器与命令行共享的类型、错误处理、插件协议定义、工具函数等

pub mod errors;
pub mod models;
pub mod plugin_rpc;
pub mod utils;

// 重新导出常用类型
pub use errors::{Error, Result};
pub use models::{Volume, VolumeRef, VolumeStatus};
pub use plugin_rpc::PluginMethod;
