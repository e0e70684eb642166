/// 卷驱动插件
/// 
/// 插件发现、端点解析、HTTP 传输与重试、远程驱动客户端

pub mod backoff;
pub mod client;
pub mod discovery;
pub mod endpoint;
pub mod transport;

pub use backoff::RetryPolicy;
pub use client::PluginDriver;
pub use discovery::{Discovery, PluginSource};
pub use endpoint::Endpoint;
