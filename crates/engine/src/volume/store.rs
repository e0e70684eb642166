/// 卷记录持久化
/// 
/// 布局：`<root>/volumes/<driver>/<name>`，内容为 JSON 格式的卷记录（不含引用计数）。
/// 写入先落临时文件再 rename，崩溃后不会留下半截记录。

use common::models::constants::VOLUMES_DIR;
use common::models::Volume;
use common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub struct VolumeStore {
    /// `<root>/volumes`
    dir: PathBuf,
}

impl VolumeStore {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(VOLUMES_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, driver: &str, name: &str) -> PathBuf {
        self.dir.join(driver).join(name)
    }

    /// 写入卷记录
    pub async fn save(&self, volume: &Volume) -> Result<()> {
        let driver_dir = self.dir.join(&volume.driver);
        fs::create_dir_all(&driver_dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {:?}: {}", driver_dir, e)))?;

        let path = self.record_path(&volume.driver, &volume.name);
        let tmp = driver_dir.join(format!(".{}.tmp", volume.name));
        let content = serde_json::to_vec_pretty(volume)?;

        fs::write(&tmp, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to persist {:?}: {}", path, e)))?;

        debug!("Persisted volume record {:?}", path);
        Ok(())
    }

    /// 删除卷记录，记录不存在时忽略
    pub async fn delete(&self, driver: &str, name: &str) -> Result<()> {
        let path = self.record_path(driver, name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete {:?}: {}", path, e))),
        }
    }

    /// 读取全部卷记录
    ///
    /// 无法解析或与所在路径不符的文件被跳过。
    pub async fn load_all(&self) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();
        let mut drivers = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(volumes),
            Err(e) => return Err(Error::Storage(format!("Failed to read {:?}: {}", self.dir, e))),
        };

        while let Some(driver_entry) = drivers.next_entry().await? {
            if !driver_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(driver) = driver_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let mut records = fs::read_dir(driver_entry.path()).await?;
            while let Some(record) = records.next_entry().await? {
                if !record.file_type().await?.is_file() {
                    continue;
                }
                let Some(name) = record.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                // 临时文件与 local 驱动的 `_data`、`_opts.json` 不是记录
                if name.starts_with('.') || name.starts_with('_') {
                    continue;
                }

                let content = fs::read(record.path()).await?;
                match serde_json::from_slice::<Volume>(&content) {
                    Ok(volume) if volume.driver == driver && volume.name == name => {
                        volumes.push(volume)
                    }
                    Ok(volume) => warn!(
                        "Skipping volume record {:?}: it describes {}/{}",
                        record.path(),
                        volume.driver,
                        volume.name
                    ),
                    Err(e) => debug!("Skipping {:?}: not a volume record ({})", record.path(), e),
                }
            }
        }

        volumes.sort_by(|a, b| (&a.name, &a.driver).cmp(&(&b.name, &b.driver)));
        Ok(volumes)
    }
}
