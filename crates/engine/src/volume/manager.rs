/// 卷管理器
/// 
/// 对外提供创建、查看、列出、挂载、卸载、删除、清理等操作，
/// 协调卷注册表、驱动注册表、持久化与事件输出。
///
/// 同一卷名上的操作经名称锁串行；不同卷名、不同驱动之间互不阻塞。
/// 变更操作在受跟踪的后台任务中执行：调用方放弃等待时，驱动调用仍会完成并落盘，
/// 已成功但无人接收的挂载会被立即卸载。

use common::models::constants::DEFAULT_DRIVER;
use common::models::{
    Volume, VolumeEventKind, VolumeFilters, VolumeInfo, VolumeRef, VolumeStatus,
};
use common::utils::{generate_id, validate_volume_name};
use common::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::events::{DriverCounters, EventSink};
use super::locker::NameLocker;
use super::registry::{MountTransition, UnmountTransition, VolumeEntry, VolumeRegistry};
use super::store::VolumeStore;
use crate::config::ManagerConfig;
use crate::container::ContainerRegistry;
use crate::plugins::Discovery;
use crate::storage::{DriverHandle, DriverRegistry, LocalDriver};
use common::models::VolumeEvent;

/// 创建参数
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// 为空时自动生成
    pub name: Option<String>,
    /// 为空时使用默认驱动；同名卷已存在时沿用其驱动
    pub driver: Option<String>,
    pub options: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// 创建后立即记录的容器引用
    pub reference: Option<String>,
}

/// 列表结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeList {
    pub volumes: Vec<VolumeInfo>,
    pub warnings: Vec<String>,
}

/// 清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PruneReport {
    pub volumes_deleted: Vec<String>,
    pub space_reclaimed: u64,
}

/// 启动恢复结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub volumes: usize,
    pub unavailable: usize,
    pub references: usize,
    pub mounted: usize,
}

struct Inner {
    config: ManagerConfig,
    registry: VolumeRegistry,
    store: VolumeStore,
    drivers: DriverRegistry,
    events: Arc<EventSink>,
    locker: NameLocker,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

/// 卷管理器，克隆后共享同一实例
#[derive(Clone)]
pub struct VolumeManager {
    inner: Arc<Inner>,
}

impl VolumeManager {
    pub async fn new(config: ManagerConfig) -> Result<Self> {
        let store = VolumeStore::new(&config.root);
        tokio::fs::create_dir_all(store.dir()).await.map_err(|e| {
            Error::Storage(format!("Failed to create {:?}: {}", store.dir(), e))
        })?;

        let events = Arc::new(EventSink::new()?);
        let discovery = Arc::new(Discovery::new(config.plugin_dirs.clone()));
        discovery
            .register_builtin(Arc::new(LocalDriver::new(store.dir())))
            .await;
        let drivers = DriverRegistry::new(discovery, events.clone(), config.retry.clone());

        info!(
            "Volume manager initialized: root={:?}, plugin dirs={:?}",
            config.root, config.plugin_dirs
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: VolumeRegistry::new(),
                store,
                drivers,
                events,
                locker: NameLocker::new(),
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// 在受跟踪的任务中执行，调用方取消不会中断已开始的操作
    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(VolumeManager) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Internal("volume manager is shutting down".to_string()));
        }
        self.inner
            .tasks
            .spawn(op(self.clone()))
            .await
            .map_err(|e| Error::Internal(format!("volume operation aborted: {}", e)))?
    }

    /// 取得卷所在驱动的句柄；不可用的卷只做一次不等待的查找
    async fn handle_for(&self, entry: &VolumeEntry) -> Result<Arc<DriverHandle>> {
        let driver = &entry.volume.driver;
        match entry.status {
            VolumeStatus::Available => self.inner.drivers.get(driver).await,
            VolumeStatus::Unavailable => {
                let handle = self.inner.drivers.probe(driver).await?;
                let revived = self
                    .inner
                    .registry
                    .set_driver_status(driver, VolumeStatus::Available);
                if revived > 0 {
                    info!("Volume driver {} is back, {} volumes available again", driver, revived);
                }
                Ok(handle)
            }
        }
    }

    // ------------------------------------------------------------------------
    // 创建
    // ------------------------------------------------------------------------

    pub async fn create(&self, opts: CreateOptions) -> Result<VolumeInfo> {
        self.run(move |this| async move { this.create_inner(opts).await })
            .await
    }

    async fn create_inner(&self, opts: CreateOptions) -> Result<VolumeInfo> {
        let name = match opts.name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => generate_id(),
        };
        validate_volume_name(&name)?;
        let requested_driver = opts.driver.filter(|d| !d.is_empty());

        let guard = self.inner.locker.lock(&name).await;

        let existing = self.inner.registry.drivers_of(&name);
        let reuse = match &requested_driver {
            Some(driver) => {
                if let Some(other) = existing.iter().find(|d| *d != driver) {
                    return Err(Error::Conflict(format!(
                        "volume {} already exists with driver {}, requested {}",
                        name, other, driver
                    )));
                }
                existing.first().cloned()
            }
            None => match existing.as_slice() {
                [] => None,
                [only] => Some(only.clone()),
                _ => Some(self.inner.registry.get_by_name(&name)?.volume.driver),
            },
        };

        if let Some(driver) = reuse {
            let entry = self.inner.registry.get_by_ref(&driver, &name)?;
            // 指定了驱动时要求完全一致；未指定时只比较调用方给出的部分
            let identical = if requested_driver.is_some() {
                entry.volume.options == opts.options && entry.volume.labels == opts.labels
            } else {
                (opts.options.is_empty() || entry.volume.options == opts.options)
                    && (opts.labels.is_empty() || entry.volume.labels == opts.labels)
            };
            if !identical {
                return Err(Error::Conflict(format!(
                    "volume {} already exists with different options or labels",
                    name
                )));
            }
            debug!("Volume {} already exists on driver {}", name, driver);
            if let Some(container_id) = &opts.reference {
                self.inner.registry.add_ref(&entry.volume.reference(), container_id)?;
            }
            return self.inner.registry.get_by_ref(&driver, &name).map(|e| e.info());
        }

        let driver_name = requested_driver.unwrap_or_else(|| self.inner.config.default_driver.clone());
        let handle = self.inner.drivers.get(&driver_name).await?;
        handle.create(&name, &opts.options).await?;

        let mut volume = Volume::new(name.clone(), driver_name.clone());
        volume.options = opts.options;
        volume.labels = opts.labels;
        volume.mountpoint = handle.static_mountpoint(&name).unwrap_or_default();

        if let Err(e) = self.inner.store.save(&volume).await {
            error!("Failed to persist volume {}: {}", name, e);
            if let Err(cleanup) = handle.remove(&name).await {
                warn!("Failed to roll back volume {} on {}: {}", name, driver_name, cleanup);
            }
            return Err(e);
        }
        self.inner.registry.put(volume.clone(), VolumeStatus::Available)?;
        if let Some(container_id) = &opts.reference {
            self.inner.registry.add_ref(&volume.reference(), container_id)?;
        }
        drop(guard);

        self.inner
            .events
            .emit(VolumeEventKind::Create, &name, &driver_name, None);
        info!("Created volume {} (driver: {})", name, driver_name);

        self.inner.registry.get_by_ref(&driver_name, &name).map(|e| e.info())
    }

    // ------------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------------

    /// 查看卷；可用的卷会向驱动确认并带回实时挂载点
    pub async fn inspect(&self, volume: &VolumeRef) -> Result<VolumeInfo> {
        let entry = self.inner.registry.resolve(volume)?;
        let mut info = entry.info();

        let handle = match self.handle_for(&entry).await {
            Ok(handle) => handle,
            Err(e) if e.is_driver_unreachable() => {
                warn!(
                    "Volume driver {} is unavailable, inspecting {} from local records: {}",
                    entry.volume.driver, entry.volume.name, e
                );
                info.status = VolumeStatus::Unavailable;
                return Ok(info);
            }
            Err(e) => return Err(e),
        };

        match handle.get(&entry.volume.name).await {
            Ok(Some(live)) => {
                if !live.mountpoint.is_empty() {
                    info.volume.mountpoint = live.mountpoint;
                }
                info.status = VolumeStatus::Available;
                Ok(info)
            }
            Ok(None) => Err(Error::NoSuchVolume(entry.volume.name.clone())),
            Err(e) if e.is_driver_unreachable() => {
                warn!(
                    "Volume driver {} did not answer for {}: {}",
                    entry.volume.driver, entry.volume.name, e
                );
                info.status = VolumeStatus::Unavailable;
                Ok(info)
            }
            Err(e) => Err(e),
        }
    }

    /// 列出卷，只读注册表，不访问驱动
    pub async fn list<S: AsRef<str>>(&self, filters: &[S]) -> Result<VolumeList> {
        let filters = VolumeFilters::parse(filters)?;
        let entries = self.inner.registry.list(&filters);

        let unavailable: BTreeSet<&str> = entries
            .iter()
            .filter(|e| e.status == VolumeStatus::Unavailable)
            .map(|e| e.volume.driver.as_str())
            .collect();
        let warnings = unavailable
            .into_iter()
            .map(|driver| {
                format!(
                    "volume driver {} is unavailable, its volumes are listed from local records",
                    driver
                )
            })
            .collect();

        Ok(VolumeList {
            volumes: entries.iter().map(VolumeEntry::info).collect(),
            warnings,
        })
    }

    // ------------------------------------------------------------------------
    // 挂载
    // ------------------------------------------------------------------------

    /// 容器挂载卷，返回挂载点；0 -> 1 时调用驱动 Mount
    pub async fn mount(&self, volume: &VolumeRef, container_id: &str) -> Result<String> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Internal("volume manager is shutting down".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let volume = volume.clone();
        let container_id = container_id.to_string();
        self.inner.tasks.spawn(async move {
            let result = this.mount_inner(&volume, &container_id).await;
            if let Err(Ok(mountpoint)) = tx.send(result) {
                warn!(
                    "Mount of {} at {} for {} was abandoned by the caller, unmounting",
                    volume, mountpoint, container_id
                );
                if let Err(e) = this.unmount_inner(&volume, &container_id).await {
                    error!("Failed to unmount abandoned mount of {}: {}", volume, e);
                }
            }
        });

        rx.await
            .map_err(|_| Error::Internal("mount task ended without a result".to_string()))?
    }

    async fn mount_inner(&self, volume: &VolumeRef, container_id: &str) -> Result<String> {
        let entry = self.inner.registry.resolve(volume)?;
        let (driver, name) = (entry.volume.driver.clone(), entry.volume.name.clone());

        let guard = self.inner.locker.lock(&name).await;
        // 等锁期间卷可能已被删除
        let entry = self.inner.registry.get_by_ref(&driver, &name)?;
        let handle = match self.handle_for(&entry).await {
            Ok(handle) => handle,
            Err(e @ Error::NoSuchDriver(_)) => return Err(Error::plugin_unavailable(&driver, e)),
            Err(e) => return Err(e),
        };

        let mountpoint = match self.inner.registry.inc_ref(&driver, &name, container_id)? {
            MountTransition::First => match handle.mount(&name).await {
                Ok(mountpoint) => {
                    self.inner.registry.set_mountpoint(&driver, &name, &mountpoint)?;
                    info!("Mounted volume {} for {} at {}", name, container_id, mountpoint);
                    mountpoint
                }
                Err(e) => {
                    self.inner.registry.dec_ref(&driver, &name, container_id)?;
                    return Err(e);
                }
            },
            MountTransition::Additional => {
                debug!("Volume {} gained holder {}", name, container_id);
                entry.volume.mountpoint
            }
            MountTransition::Already => return Ok(entry.volume.mountpoint),
        };
        drop(guard);

        self.inner
            .events
            .emit(VolumeEventKind::Mount, &name, &driver, Some(container_id));
        Ok(mountpoint)
    }

    /// 容器卸载卷；1 -> 0 时调用驱动 Unmount，未挂载视为成功
    pub async fn unmount(&self, volume: &VolumeRef, container_id: &str) -> Result<()> {
        let volume = volume.clone();
        let container_id = container_id.to_string();
        self.run(move |this| async move { this.unmount_inner(&volume, &container_id).await })
            .await
    }

    async fn unmount_inner(&self, volume: &VolumeRef, container_id: &str) -> Result<()> {
        let entry = self.inner.registry.resolve(volume)?;
        let (driver, name) = (entry.volume.driver.clone(), entry.volume.name.clone());

        let guard = self.inner.locker.lock(&name).await;
        let entry = self.inner.registry.get_by_ref(&driver, &name)?;

        let result = match self.inner.registry.dec_ref(&driver, &name, container_id)? {
            UnmountTransition::NotMounted => {
                debug!("Volume {} is not mounted by {}", name, container_id);
                return Ok(());
            }
            UnmountTransition::Remaining => Ok(()),
            UnmountTransition::Last => {
                let handle = self.handle_for(&entry).await;
                let result = match &handle {
                    Ok(handle) => handle.unmount(&name).await,
                    Err(e) => Err(Error::plugin_unavailable(&driver, e)),
                };

                let reset = handle
                    .ok()
                    .and_then(|h| h.static_mountpoint(&name))
                    .unwrap_or_default();
                self.inner.registry.set_mountpoint(&driver, &name, &reset)?;

                match &result {
                    Ok(()) => info!("Unmounted volume {} for {}", name, container_id),
                    Err(e) => warn!("Driver failed to unmount {}: {}", name, e),
                }
                result
            }
        };
        drop(guard);

        self.inner
            .events
            .emit(VolumeEventKind::Unmount, &name, &driver, Some(container_id));
        result
    }

    // ------------------------------------------------------------------------
    // 引用
    // ------------------------------------------------------------------------

    /// 记录容器对卷的引用（容器创建时），返回卷所属驱动
    pub async fn reference(&self, volume: &VolumeRef, container_id: &str) -> Result<String> {
        let entry = self.inner.registry.resolve(volume)?;
        let _guard = self.inner.locker.lock(&entry.volume.name).await;
        let (driver, added) = self
            .inner
            .registry
            .add_ref(&entry.volume.reference(), container_id)?;
        if added {
            debug!("Container {} now references volume {}", container_id, volume);
        }
        Ok(driver)
    }

    /// 释放容器对卷的引用（容器删除时）
    pub async fn release(&self, volume: &VolumeRef, container_id: &str) -> Result<()> {
        let entry = self.inner.registry.resolve(volume)?;
        let _guard = self.inner.locker.lock(&entry.volume.name).await;
        self.inner
            .registry
            .release_ref(&entry.volume.driver, &entry.volume.name, container_id)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 删除与清理
    // ------------------------------------------------------------------------

    /// 删除卷
    ///
    /// `force` 只放宽驱动不可达的限制：卷不存在时视为成功，驱动不可达时仍删除本地记录。
    /// 被容器引用的卷始终不能删除。
    pub async fn remove(&self, volume: &VolumeRef, force: bool) -> Result<()> {
        let volume = volume.clone();
        self.run(move |this| async move { this.remove_inner(&volume, force).await })
            .await
    }

    async fn remove_inner(&self, volume: &VolumeRef, force: bool) -> Result<()> {
        let entry = match self.inner.registry.resolve(volume) {
            Ok(entry) => entry,
            Err(e) if force && e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let (driver, name) = (entry.volume.driver.clone(), entry.volume.name.clone());

        let guard = self.inner.locker.lock(&name).await;
        let entry = match self.inner.registry.get_by_ref(&driver, &name) {
            Ok(entry) => entry,
            Err(e) if force && e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if !entry.is_dangling() {
            return Err(Error::InUse {
                name,
                refs: entry.holders(),
            });
        }

        let result = match self.handle_for(&entry).await {
            Ok(handle) => handle.remove(&name).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e) if force && e.is_driver_unreachable() => {
                warn!(
                    "Volume driver {} is unavailable, removing {} from local records only: {}",
                    driver, name, e
                );
            }
            Err(e) => return Err(e),
        }

        self.inner.store.delete(&driver, &name).await?;
        self.inner.registry.remove(&driver, &name)?;
        drop(guard);

        self.inner
            .events
            .emit(VolumeEventKind::Destroy, &name, &driver, None);
        info!("Removed volume {} (driver: {})", name, driver);
        Ok(())
    }

    /// 删除所有未被引用且满足过滤条件的卷
    ///
    /// 支持 `name`、`driver`、`label`、`label!`；回收空间只统计 local 卷。
    pub async fn prune<S: AsRef<str>>(&self, filters: &[S]) -> Result<PruneReport> {
        let mut filters = VolumeFilters::parse(filters)?;
        if filters.dangling.is_some() {
            return Err(Error::InvalidFilter(
                "dangling is implied when pruning".to_string(),
            ));
        }
        filters.dangling = Some(true);

        let mut report = PruneReport::default();
        for entry in self.inner.registry.list(&filters) {
            let name = entry.volume.name.clone();
            if entry.status == VolumeStatus::Unavailable {
                debug!("Skipping prune of {}: driver {} unavailable", name, entry.volume.driver);
                continue;
            }

            let reclaimed = if entry.volume.driver == DEFAULT_DRIVER {
                match self.inner.drivers.get(DEFAULT_DRIVER).await {
                    Ok(handle) => handle.usage(&name).await.unwrap_or_else(|| {
                        debug!("Disk usage of {} is unknown, not counted as reclaimed", name);
                        0
                    }),
                    Err(e) => {
                        debug!("Cannot measure disk usage of {}: {}", name, e);
                        0
                    }
                }
            } else {
                0
            };

            match self.remove(&entry.volume.reference(), false).await {
                Ok(()) => {
                    report.space_reclaimed += reclaimed;
                    report.volumes_deleted.push(name);
                }
                Err(e @ Error::InUse { .. }) | Err(e @ Error::NoSuchVolume(_)) => {
                    debug!("Not pruning {}: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Pruned {} volumes, reclaimed {} bytes",
            report.volumes_deleted.len(),
            report.space_reclaimed
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // 导入、恢复、重载
    // ------------------------------------------------------------------------

    /// 把驱动上存在但注册表未知的卷加入注册表
    pub async fn import(&self, driver: &str) -> Result<Vec<String>> {
        let driver = driver.to_string();
        self.run(move |this| async move { this.import_inner(&driver).await })
            .await
    }

    async fn import_inner(&self, driver: &str) -> Result<Vec<String>> {
        let handle = self.inner.drivers.get(driver).await?;
        let mut imported = Vec::new();

        for remote in handle.list().await? {
            if let Err(e) = validate_volume_name(&remote.name) {
                warn!("Not importing volume from {}: {}", driver, e);
                continue;
            }

            let guard = self.inner.locker.lock(&remote.name).await;
            if self.inner.registry.contains(driver, &remote.name) {
                continue;
            }

            let mut volume = Volume::new(remote.name.clone(), driver);
            if remote.mountpoint.starts_with('/') {
                volume.mountpoint = remote.mountpoint;
            }
            self.inner.store.save(&volume).await?;
            self.inner.registry.put(volume, VolumeStatus::Available)?;
            drop(guard);

            self.inner
                .events
                .emit(VolumeEventKind::Create, &remote.name, driver, None);
            imported.push(remote.name);
        }

        info!("Imported {} volumes from driver {}", imported.len(), driver);
        Ok(imported)
    }

    /// 启动恢复：重放持久化记录，并根据容器注册表重建引用与挂载计数
    pub async fn restore(&self, containers: &dyn ContainerRegistry) -> Result<RestoreReport> {
        let volumes = self.inner.store.load_all().await?;
        let mut report = RestoreReport {
            volumes: volumes.len(),
            ..RestoreReport::default()
        };

        let mut driver_status: HashMap<String, VolumeStatus> = HashMap::new();
        for volume in volumes {
            let status = match driver_status.get(&volume.driver) {
                Some(status) => *status,
                None => {
                    let status = match self.inner.drivers.probe(&volume.driver).await {
                        Ok(_) => VolumeStatus::Available,
                        Err(e) => {
                            warn!(
                                "Volume driver {} is unavailable at restore: {}",
                                volume.driver, e
                            );
                            VolumeStatus::Unavailable
                        }
                    };
                    driver_status.insert(volume.driver.clone(), status);
                    status
                }
            };
            if status == VolumeStatus::Unavailable {
                report.unavailable += 1;
            }
            if let Err(e) = self.inner.registry.put(volume, status) {
                warn!("Skipping invalid volume record: {}", e);
            }
        }

        let holders = match containers.holders().await {
            Ok(holders) => holders,
            Err(e) => {
                error!("Failed to query containers, volume references not restored: {}", e);
                Vec::new()
            }
        };

        let mut remount = BTreeSet::new();
        for holder in holders {
            let volume = VolumeRef {
                driver: holder.driver.clone(),
                name: holder.volume.clone(),
            };
            let driver = match self.inner.registry.add_ref(&volume, &holder.container_id) {
                Ok((driver, _)) => driver,
                Err(e) => {
                    warn!(
                        "Container {} holds unknown volume {}: {}",
                        holder.container_id, volume, e
                    );
                    continue;
                }
            };
            report.references += 1;

            if holder.running {
                self.inner
                    .registry
                    .inc_ref(&driver, &holder.volume, &holder.container_id)?;
                report.mounted += 1;
                remount.insert((driver, holder.volume));
            }
        }

        for (driver, name) in remount {
            self.refresh_mountpoint(driver, name);
        }

        info!(
            "Restored {} volumes ({} unavailable), {} references, {} mounted",
            report.volumes, report.unavailable, report.references, report.mounted
        );
        Ok(report)
    }

    /// 后台向驱动查询运行中容器所用卷的挂载点
    fn refresh_mountpoint(&self, driver: String, name: String) {
        let this = self.clone();
        let cancel = self.inner.cancel.clone();
        self.inner.tasks.spawn(async move {
            let entry = match this.inner.registry.get_by_ref(&driver, &name) {
                Ok(entry) if entry.status == VolumeStatus::Available => entry,
                _ => return,
            };
            let lookup = async {
                let handle = this.handle_for(&entry).await?;
                handle.path(&name).await
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Mountpoint refresh for {} cancelled", name);
                }
                result = lookup => match result {
                    Ok(mountpoint) if !mountpoint.is_empty() => {
                        if let Err(e) = this.inner.registry.set_mountpoint(&driver, &name, &mountpoint) {
                            debug!("Volume {} went away before its mountpoint was known: {}", name, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to query mountpoint of {}/{}: {}", driver, name, e),
                },
            }
        });
    }

    /// 丢弃缓存的远程驱动句柄，下次使用时重新发现
    pub async fn reload_drivers(&self) -> usize {
        self.inner.drivers.reload().await
    }

    // ------------------------------------------------------------------------
    // 观测与关闭
    // ------------------------------------------------------------------------

    /// 已加载的驱动名（含内置驱动）
    pub async fn loaded_drivers(&self) -> Vec<String> {
        self.inner.drivers.loaded().await
    }

    pub fn counters(&self, driver: &str) -> DriverCounters {
        self.inner.events.counters(driver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.inner.events.subscribe()
    }

    pub fn metrics_text(&self) -> Result<String> {
        self.inner.events.gather_text()
    }

    /// 停止后台任务，等待进行中的操作结束，释放驱动句柄
    pub async fn shutdown(&self) {
        info!("Shutting down volume manager");
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.drivers.clear().await;
        info!("Volume manager stopped");
    }
}
