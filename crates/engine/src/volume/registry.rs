/// 卷注册表
/// 
/// 卷是否存在以这里为准。以 (driver, name) 为键，另有按名称的二级索引。
/// 内部使用同步锁，任何方法都不会跨 await 持锁。

use common::models::constants::{DEFAULT_DRIVER, LOCAL_SCOPE};
use common::models::{Volume, VolumeFilters, VolumeInfo, VolumeRef, VolumeStatus};
use common::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// 注册表中的一条卷记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    pub volume: Volume,
    /// 引用该卷的容器（包括已创建未启动的）
    pub refs: BTreeSet<String>,
    /// 当前挂载该卷的容器，数量即挂载引用计数
    pub mounted_by: BTreeSet<String>,
    pub status: VolumeStatus,
}

impl VolumeEntry {
    fn new(volume: Volume, status: VolumeStatus) -> Self {
        Self {
            volume,
            refs: BTreeSet::new(),
            mounted_by: BTreeSet::new(),
            status,
        }
    }

    pub fn ref_count(&self) -> usize {
        self.mounted_by.len()
    }

    /// 没有任何容器引用或挂载
    pub fn is_dangling(&self) -> bool {
        self.refs.is_empty() && self.mounted_by.is_empty()
    }

    /// 所有持有者（引用与挂载的并集）
    pub fn holders(&self) -> Vec<String> {
        self.refs.union(&self.mounted_by).cloned().collect()
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            volume: self.volume.clone(),
            scope: LOCAL_SCOPE.to_string(),
            status: self.status,
            ref_count: self.ref_count(),
            references: self.holders(),
        }
    }
}

/// 挂载计数变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountTransition {
    /// 0 -> 1，需要调用驱动 Mount
    First,
    /// n -> n+1
    Additional,
    /// 该容器已经挂载过
    Already,
}

/// 卸载计数变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountTransition {
    /// 1 -> 0，需要调用驱动 Unmount
    Last,
    /// n -> n-1，n > 1
    Remaining,
    /// 该容器没有挂载
    NotMounted,
}

type Key = (String, String);

fn key(driver: &str, name: &str) -> Key {
    (driver.to_string(), name.to_string())
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Key, VolumeEntry>,
    /// name -> 驱动列表（按插入顺序）
    by_name: HashMap<String, Vec<String>>,
}

impl Inner {
    fn resolve_driver(&self, name: &str) -> Result<String> {
        let drivers = self
            .by_name
            .get(name)
            .filter(|drivers| !drivers.is_empty())
            .ok_or_else(|| Error::NoSuchVolume(name.to_string()))?;

        if drivers.iter().any(|d| d == DEFAULT_DRIVER) {
            return Ok(DEFAULT_DRIVER.to_string());
        }
        match drivers.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(Error::AmbiguousName {
                name: name.to_string(),
                drivers: drivers.clone(),
            }),
        }
    }

    fn key_for(&self, volume: &VolumeRef) -> Result<Key> {
        let driver = match &volume.driver {
            Some(driver) => driver.clone(),
            None => self.resolve_driver(&volume.name)?,
        };
        let key = (driver, volume.name.clone());
        if self.entries.contains_key(&key) {
            Ok(key)
        } else {
            Err(Error::NoSuchVolume(volume.name.clone()))
        }
    }

    fn entry_mut(&mut self, driver: &str, name: &str) -> Result<&mut VolumeEntry> {
        self.entries
            .get_mut(&key(driver, name))
            .ok_or_else(|| Error::NoSuchVolume(name.to_string()))
    }
}

#[derive(Default)]
pub struct VolumeRegistry {
    inner: Mutex<Inner>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 插入或更新；已有记录的引用信息保留
    pub fn put(&self, volume: Volume, status: VolumeStatus) -> Result<()> {
        if volume.name.trim().is_empty() {
            return Err(Error::InvalidName(format!("{:?}", volume.name)));
        }
        if volume.driver.is_empty() {
            return Err(Error::Internal(format!(
                "volume {} has no driver",
                volume.name
            )));
        }

        let mut inner = self.lock();
        let k = key(&volume.driver, &volume.name);
        match inner.entries.get_mut(&k) {
            Some(entry) => {
                entry.volume = volume;
                entry.status = status;
            }
            None => {
                inner
                    .by_name
                    .entry(volume.name.clone())
                    .or_default()
                    .push(volume.driver.clone());
                inner.entries.insert(k, VolumeEntry::new(volume, status));
            }
        }
        Ok(())
    }

    /// 按名称查找：优先 local，其次唯一的驱动
    pub fn get_by_name(&self, name: &str) -> Result<VolumeEntry> {
        let inner = self.lock();
        let driver = inner.resolve_driver(name)?;
        inner
            .entries
            .get(&key(&driver, name))
            .cloned()
            .ok_or_else(|| Error::NoSuchVolume(name.to_string()))
    }

    pub fn get_by_ref(&self, driver: &str, name: &str) -> Result<VolumeEntry> {
        self.lock()
            .entries
            .get(&key(driver, name))
            .cloned()
            .ok_or_else(|| Error::NoSuchVolume(name.to_string()))
    }

    pub fn resolve(&self, volume: &VolumeRef) -> Result<VolumeEntry> {
        match &volume.driver {
            Some(driver) => self.get_by_ref(driver, &volume.name),
            None => self.get_by_name(&volume.name),
        }
    }

    /// 按名称列出所有驱动上的同名卷
    pub fn drivers_of(&self, name: &str) -> Vec<String> {
        self.lock().by_name.get(name).cloned().unwrap_or_default()
    }

    pub fn contains(&self, driver: &str, name: &str) -> bool {
        self.lock().entries.contains_key(&key(driver, name))
    }

    /// 过滤列出，按名称（其次驱动名）排序
    pub fn list(&self, filters: &VolumeFilters) -> Vec<VolumeEntry> {
        let inner = self.lock();
        let mut entries: Vec<VolumeEntry> = inner
            .entries
            .values()
            .filter(|entry| filters.matches(&entry.volume, entry.is_dangling()))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            (&a.volume.name, &a.volume.driver).cmp(&(&b.volume.name, &b.volume.driver))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 记录容器引用，返回解析出的驱动名以及是否新增
    pub fn add_ref(&self, volume: &VolumeRef, container_id: &str) -> Result<(String, bool)> {
        let mut inner = self.lock();
        let (driver, name) = inner.key_for(volume)?;
        let entry = inner.entry_mut(&driver, &name)?;
        let added = entry.refs.insert(container_id.to_string());
        Ok((driver, added))
    }

    /// 移除容器引用，返回是否存在
    pub fn release_ref(&self, driver: &str, name: &str, container_id: &str) -> Result<bool> {
        let mut inner = self.lock();
        let entry = inner.entry_mut(driver, name)?;
        Ok(entry.refs.remove(container_id))
    }

    /// 挂载计数加一
    pub fn inc_ref(&self, driver: &str, name: &str, container_id: &str) -> Result<MountTransition> {
        let mut inner = self.lock();
        let entry = inner.entry_mut(driver, name)?;
        if !entry.mounted_by.insert(container_id.to_string()) {
            return Ok(MountTransition::Already);
        }
        if entry.mounted_by.len() == 1 {
            Ok(MountTransition::First)
        } else {
            Ok(MountTransition::Additional)
        }
    }

    /// 挂载计数减一
    pub fn dec_ref(&self, driver: &str, name: &str, container_id: &str) -> Result<UnmountTransition> {
        let mut inner = self.lock();
        let entry = inner.entry_mut(driver, name)?;
        if !entry.mounted_by.remove(container_id) {
            return Ok(UnmountTransition::NotMounted);
        }
        if entry.mounted_by.is_empty() {
            Ok(UnmountTransition::Last)
        } else {
            Ok(UnmountTransition::Remaining)
        }
    }

    pub fn set_mountpoint(&self, driver: &str, name: &str, mountpoint: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.entry_mut(driver, name)?.volume.mountpoint = mountpoint.to_string();
        Ok(())
    }

    /// 更新某个驱动上所有卷的状态，返回状态发生变化的数量
    pub fn set_driver_status(&self, driver: &str, status: VolumeStatus) -> usize {
        let mut inner = self.lock();
        let mut changed = 0;
        for ((d, _), entry) in inner.entries.iter_mut() {
            if d == driver && entry.status != status {
                entry.status = status;
                changed += 1;
            }
        }
        changed
    }

    /// 删除记录；仍被引用或挂载时返回 `InUse`
    pub fn remove(&self, driver: &str, name: &str) -> Result<Volume> {
        let mut inner = self.lock();
        let k = key(driver, name);
        let entry = inner
            .entries
            .get(&k)
            .ok_or_else(|| Error::NoSuchVolume(name.to_string()))?;
        if !entry.is_dangling() {
            return Err(Error::InUse {
                name: name.to_string(),
                refs: entry.holders(),
            });
        }

        let entry = inner
            .entries
            .remove(&k)
            .ok_or_else(|| Error::NoSuchVolume(name.to_string()))?;
        if let Some(drivers) = inner.by_name.get_mut(name) {
            drivers.retain(|d| d != driver);
            if drivers.is_empty() {
                inner.by_name.remove(name);
            }
        }
        Ok(entry.volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(volumes: &[(&str, &str)]) -> VolumeRegistry {
        let registry = VolumeRegistry::new();
        for (driver, name) in volumes {
            registry
                .put(Volume::new(*name, *driver), VolumeStatus::Available)
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_get_by_name_prefers_local() {
        let registry = registry_with(&[("extdrv", "shared"), ("local", "shared")]);
        assert_eq!(registry.get_by_name("shared").unwrap().volume.driver, "local");
        assert_eq!(
            registry.get_by_ref("extdrv", "shared").unwrap().volume.driver,
            "extdrv"
        );
    }

    #[test]
    fn test_ambiguous_without_local() {
        let registry = registry_with(&[("a", "v"), ("b", "v"), ("a", "only")]);
        assert!(matches!(
            registry.get_by_name("v"),
            Err(Error::AmbiguousName { .. })
        ));
        assert_eq!(registry.get_by_name("only").unwrap().volume.driver, "a");
        assert!(matches!(
            registry.get_by_name("missing"),
            Err(Error::NoSuchVolume(_))
        ));
    }

    #[test]
    fn test_refcount_transitions() {
        let registry = registry_with(&[("local", "v")]);
        assert_eq!(registry.inc_ref("local", "v", "c1").unwrap(), MountTransition::First);
        assert_eq!(registry.inc_ref("local", "v", "c1").unwrap(), MountTransition::Already);
        assert_eq!(
            registry.inc_ref("local", "v", "c2").unwrap(),
            MountTransition::Additional
        );
        assert_eq!(registry.get_by_name("v").unwrap().ref_count(), 2);

        assert_eq!(
            registry.dec_ref("local", "v", "c1").unwrap(),
            UnmountTransition::Remaining
        );
        assert_eq!(registry.dec_ref("local", "v", "c2").unwrap(), UnmountTransition::Last);
        assert_eq!(
            registry.dec_ref("local", "v", "c2").unwrap(),
            UnmountTransition::NotMounted
        );
        assert_eq!(registry.get_by_name("v").unwrap().ref_count(), 0);
    }

    #[test]
    fn test_remove_respects_references() {
        let registry = registry_with(&[("local", "v")]);
        registry.add_ref(&VolumeRef::named("v"), "created-container").unwrap();

        let err = registry.remove("local", "v").unwrap_err();
        assert!(err.to_string().contains("volume is in use"));
        assert!(err.to_string().contains("created-container"));

        registry.release_ref("local", "v", "created-container").unwrap();
        registry.remove("local", "v").unwrap();
        assert!(registry.is_empty());
        assert!(registry.drivers_of("v").is_empty());
    }

    #[test]
    fn test_list_is_sorted_and_filtered() {
        let registry = registry_with(&[("local", "b"), ("extdrv", "a"), ("local", "a")]);
        registry.inc_ref("local", "b", "c1").unwrap();

        let names: Vec<_> = registry
            .list(&VolumeFilters::default())
            .into_iter()
            .map(|e| e.volume.reference().to_string())
            .collect();
        assert_eq!(names, vec!["extdrv/a", "local/a", "local/b"]);

        let dangling = registry.list(&VolumeFilters::parse(&["dangling=true"]).unwrap());
        assert_eq!(dangling.len(), 2);
        let in_use = registry.list(&VolumeFilters::parse(&["dangling=0"]).unwrap());
        assert_eq!(in_use.len(), 1);
        assert_eq!(in_use[0].volume.name, "b");
    }

    #[test]
    fn test_put_keeps_references() {
        let registry = registry_with(&[("local", "v")]);
        registry.inc_ref("local", "v", "c1").unwrap();

        let mut updated = Volume::new("v", "local");
        updated.mountpoint = "/data/v".to_string();
        registry.put(updated, VolumeStatus::Available).unwrap();

        let entry = registry.get_by_name("v").unwrap();
        assert_eq!(entry.ref_count(), 1);
        assert_eq!(entry.volume.mountpoint, "/data/v");
    }

    #[test]
    fn test_driver_status() {
        let registry = registry_with(&[("extdrv", "a"), ("extdrv", "b"), ("local", "c")]);
        assert_eq!(registry.set_driver_status("extdrv", VolumeStatus::Unavailable), 2);
        assert_eq!(
            registry.get_by_name("a").unwrap().status,
            VolumeStatus::Unavailable
        );
        assert_eq!(registry.get_by_name("c").unwrap().status, VolumeStatus::Available);
        assert!(registry.put(Volume::new("  ", "local"), VolumeStatus::Available).is_err());
    }
}
