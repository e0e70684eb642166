/// 卷驱动抽象层
/// 
/// 内置 `local` 驱动与远程插件驱动实现同一接口，由驱动注册表统一分发

use async_trait::async_trait;
use common::models::DriverState;
use common::plugin_rpc::PluginVolume;
use common::Result;
use std::collections::BTreeMap;

/// 卷驱动 Trait
#[async_trait]
pub trait VolumeDriver: Send + Sync + 'static {
    /// 驱动名称
    fn name(&self) -> &str;

    /// 创建卷
    async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> Result<()>;

    /// 删除卷
    async fn remove(&self, name: &str) -> Result<()>;

    /// 挂载卷，返回挂载点
    async fn mount(&self, name: &str) -> Result<String>;

    /// 卸载卷
    async fn unmount(&self, name: &str) -> Result<()>;

    /// 查询挂载点
    async fn path(&self, name: &str) -> Result<String>;

    /// 查询单个卷；驱动没有该卷时返回 `None`
    async fn get(&self, name: &str) -> Result<Option<PluginVolume>>;

    /// 列出驱动上的所有卷
    async fn list(&self) -> Result<Vec<PluginVolume>>;

    /// 激活状态
    fn state(&self) -> DriverState {
        DriverState::ProbedOk
    }

    /// 不挂载也已知的挂载点（内置驱动的数据目录）
    fn static_mountpoint(&self, _name: &str) -> Option<String> {
        None
    }

    /// 卷占用的字节数，无法统计时返回 `None`
    async fn usage(&self, _name: &str) -> Option<u64> {
        None
    }
}
