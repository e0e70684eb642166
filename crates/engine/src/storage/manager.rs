/// 驱动注册表
/// 
/// 驱动名 -> 驱动句柄。首次使用时经插件发现解析并创建句柄，之后复用。
/// 每个远程驱动有自己的串行化锁，一个驱动卡住不会影响其它驱动。

use common::models::DriverState;
use common::plugin_rpc::PluginVolume;
use common::utils::validate_driver_name;
use common::{Error, PluginMethod, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::driver::VolumeDriver;
use crate::plugins::{Discovery, PluginDriver, PluginSource, RetryPolicy};
use crate::volume::events::EventSink;

/// 驱动句柄：在驱动调用外统计请求次数
pub struct DriverHandle {
    driver: Arc<dyn VolumeDriver>,
    builtin: bool,
    events: Arc<EventSink>,
}

impl DriverHandle {
    pub fn new(driver: Arc<dyn VolumeDriver>, builtin: bool, events: Arc<EventSink>) -> Self {
        Self {
            driver,
            builtin,
            events,
        }
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn state(&self) -> DriverState {
        self.driver.state()
    }

    /// 请求到达了驱动才计数
    fn count<T>(&self, method: PluginMethod, result: &Result<T>) {
        let reached = match result {
            Ok(_) => true,
            Err(e) => !e.is_driver_unreachable() && !matches!(e, Error::IncompatibleDriver(_)),
        };
        if reached {
            self.events.record(self.name(), method);
        }
    }

    pub async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> Result<()> {
        let result = self.driver.create(name, opts).await;
        self.count(PluginMethod::Create, &result);
        result
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let result = self.driver.remove(name).await;
        self.count(PluginMethod::Remove, &result);
        result
    }

    pub async fn mount(&self, name: &str) -> Result<String> {
        let result = self.driver.mount(name).await;
        self.count(PluginMethod::Mount, &result);
        result
    }

    pub async fn unmount(&self, name: &str) -> Result<()> {
        let result = self.driver.unmount(name).await;
        self.count(PluginMethod::Unmount, &result);
        result
    }

    pub async fn path(&self, name: &str) -> Result<String> {
        let result = self.driver.path(name).await;
        self.count(PluginMethod::Path, &result);
        result
    }

    pub async fn get(&self, name: &str) -> Result<Option<PluginVolume>> {
        let result = self.driver.get(name).await;
        self.count(PluginMethod::Get, &result);
        result
    }

    pub async fn list(&self) -> Result<Vec<PluginVolume>> {
        let result = self.driver.list().await;
        self.count(PluginMethod::List, &result);
        result
    }

    pub fn static_mountpoint(&self, name: &str) -> Option<String> {
        self.driver.static_mountpoint(name)
    }

    pub async fn usage(&self, name: &str) -> Option<u64> {
        self.driver.usage(name).await
    }
}

/// 驱动注册表
pub struct DriverRegistry {
    discovery: Arc<Discovery>,
    /// 驱动句柄映射: driver name -> handle
    handles: RwLock<HashMap<String, Arc<DriverHandle>>>,
    events: Arc<EventSink>,
    policy: RetryPolicy,
}

impl DriverRegistry {
    pub fn new(discovery: Arc<Discovery>, events: Arc<EventSink>, policy: RetryPolicy) -> Self {
        Self {
            discovery,
            handles: RwLock::new(HashMap::new()),
            events,
            policy,
        }
    }

    async fn cached(&self, name: &str) -> Option<Arc<DriverHandle>> {
        self.handles.read().await.get(name).cloned()
    }

    /// 获取驱动句柄
    ///
    /// 发现失败时按退避策略重试，规格文件稍后出现也能被拾取。
    pub async fn get(&self, name: &str) -> Result<Arc<DriverHandle>> {
        if let Some(handle) = self.cached(name).await {
            return Ok(handle);
        }

        let mut backoff = self.policy.start();
        loop {
            match self.discovery.lookup(name).await {
                Ok(source) => return self.install(name, source).await,
                Err(Error::NoSuchDriver(_)) if validate_driver_name(name) => {
                    match backoff.next_delay() {
                        Some(delay) => {
                            debug!("Volume driver {} not found yet, retrying in {:?}", name, delay);
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(Error::NoSuchDriver(name.to_string())),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 单次查找，不等待规格文件出现
    pub async fn probe(&self, name: &str) -> Result<Arc<DriverHandle>> {
        if let Some(handle) = self.cached(name).await {
            return Ok(handle);
        }
        let source = self.discovery.lookup(name).await?;
        self.install(name, source).await
    }

    async fn install(&self, name: &str, source: PluginSource) -> Result<Arc<DriverHandle>> {
        let (driver, builtin): (Arc<dyn VolumeDriver>, bool) = match source {
            PluginSource::Builtin(driver) => (driver, true),
            PluginSource::Remote(endpoint) => {
                info!("Loading volume driver {} from {}", name, endpoint);
                let driver =
                    PluginDriver::new(name, endpoint, self.policy.clone(), self.events.clone())?;
                (Arc::new(driver), false)
            }
        };

        // 并发的首次查找只保留一个句柄
        let mut handles = self.handles.write().await;
        let handle = handles
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DriverHandle::new(driver, builtin, self.events.clone())))
            .clone();
        Ok(handle)
    }

    /// 丢弃所有远程驱动句柄，返回丢弃数量
    pub async fn reload(&self) -> usize {
        let mut handles = self.handles.write().await;
        let before = handles.len();
        handles.retain(|_, handle| handle.is_builtin());
        let evicted = before - handles.len();
        info!("Reloaded volume drivers, evicted {} remote handles", evicted);
        evicted
    }

    /// 已加载的驱动名
    pub async fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn clear(&self) {
        self.handles.write().await.clear();
    }
}
