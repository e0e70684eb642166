/// 卷插件 RPC 模块
/// 
/// 卷驱动插件的 JSON/HTTP 协议定义：方法路径、请求体与响应体

pub mod message;
pub mod types;

pub use message::{PluginMethod, PLUGIN_CONTENT_TYPE, VOLUME_DRIVER_CAPABILITY};
pub use types::*;
