/// 容器注册表
/// 
/// 卷管理器只需要知道“哪些容器持有哪些卷、是否在运行”。
/// `FileContainerStore` 把容器记录保存在 `<root>/containers/<id>.json`，供命令行使用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// 容器持有的一个卷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMount {
    pub container_id: String,
    pub volume: String,
    pub driver: Option<String>,
    pub destination: String,
    pub running: bool,
}

/// 容器注册表查询接口
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// 所有持有卷的容器（已创建、运行中、已停止）
    async fn holders(&self) -> Result<Vec<ContainerMount>>;
}

/// 容器状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// 容器的卷挂载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountRecord {
    pub volume: String,
    pub driver: String,
    pub destination: String,
    /// 创建容器时自动生成的匿名卷
    #[serde(default)]
    pub anonymous: bool,
}

/// 容器记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub state: ContainerState,
    #[serde(default)]
    pub mounts: Vec<MountRecord>,
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, mounts: Vec<MountRecord>) -> Self {
        Self {
            id: id.into(),
            state: ContainerState::Created,
            mounts,
            created_at: Utc::now(),
        }
    }
}

/// 基于文件的容器存储
pub struct FileContainerStore {
    dir: PathBuf,
}

impl FileContainerStore {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("containers"),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub async fn save(&self, record: &ContainerRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {:?}: {}", self.dir, e)))?;
        let path = self.record_path(&record.id);
        let tmp = self.dir.join(format!(".{}.tmp", record.id));
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to persist {:?}: {}", path, e)))?;
        debug!("Saved container {} ({})", record.id, record.state);
        Ok(())
    }

    /// 按完整 id 或唯一前缀读取
    pub async fn load(&self, id: &str) -> Result<ContainerRecord> {
        let path = self.record_path(id);
        match fs::read(&path).await {
            Ok(content) => return Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Storage(format!("Failed to read {:?}: {}", path, e))),
        }

        let mut matches: Vec<ContainerRecord> = self
            .list()
            .await?
            .into_iter()
            .filter(|record| record.id.starts_with(id))
            .collect();
        match (id.is_empty(), matches.len()) {
            (false, 1) => Ok(matches.remove(0)),
            _ => Err(Error::NoSuchContainer(id.to_string())),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NoSuchContainer(id.to_string()))
            }
            Err(e) => Err(Error::Storage(format!("Failed to delete {:?}: {}", path, e))),
        }
    }

    pub async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(Error::Storage(format!("Failed to read {:?}: {}", self.dir, e))),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read(&path).await?;
            match serde_json::from_slice::<ContainerRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable container record {:?}: {}", path, e),
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[async_trait]
impl ContainerRegistry for FileContainerStore {
    async fn holders(&self) -> Result<Vec<ContainerMount>> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .flat_map(|record| {
                let running = record.state == ContainerState::Running;
                let id = record.id;
                record.mounts.into_iter().map(move |mount| ContainerMount {
                    container_id: id.clone(),
                    volume: mount.volume,
                    driver: Some(mount.driver),
                    destination: mount.destination,
                    running,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(volume: &str, driver: &str) -> MountRecord {
        MountRecord {
            volume: volume.to_string(),
            driver: driver.to_string(),
            destination: "/foo".to_string(),
            anonymous: false,
        }
    }

    #[tokio::test]
    async fn test_save_load_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContainerStore::new(dir.path());

        let record = ContainerRecord::new("abcdef123", vec![mount("abc", "extdrv")]);
        store.save(&record).await.unwrap();

        assert_eq!(store.load("abcdef123").await.unwrap(), record);
        assert_eq!(store.load("abc").await.unwrap().id, "abcdef123");
        assert!(matches!(store.load("zzz").await, Err(Error::NoSuchContainer(_))));

        store.delete("abcdef123").await.unwrap();
        assert!(store.delete("abcdef123").await.is_err());
    }

    #[tokio::test]
    async fn test_holders_report_running_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContainerStore::new(dir.path());

        let mut running = ContainerRecord::new("c1", vec![mount("abc", "extdrv")]);
        running.state = ContainerState::Running;
        store.save(&running).await.unwrap();
        store
            .save(&ContainerRecord::new("c2", vec![mount("v", "local"), mount("w", "local")]))
            .await
            .unwrap();

        let mut holders = store.holders().await.unwrap();
        holders.sort_by(|a, b| a.volume.cmp(&b.volume));
        assert_eq!(holders.len(), 3);
        assert_eq!(holders[0].volume, "abc");
        assert!(holders[0].running);
        assert_eq!(holders[0].driver.as_deref(), Some("extdrv"));
        assert!(!holders[1].running);
    }
}
