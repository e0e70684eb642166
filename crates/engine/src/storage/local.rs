/// 内置 local 驱动
/// 
/// 卷数据保存在 `<root>/volumes/<name>/_data`。
/// 带 `type`/`device` 选项的卷在挂载时调用 `mount`，卸载时调用 `umount`。

use async_trait::async_trait;
use common::models::constants::{DATA_DIR, DEFAULT_DRIVER};
use common::plugin_rpc::PluginVolume;
use common::utils::parse_size;
use common::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::driver::VolumeDriver;

/// 允许的选项
const VALID_OPTS: &[&str] = &["type", "device", "o", "size"];

/// 选项文件名，以 `_` 开头，不会与任何合法卷名的记录重名
const OPTS_FILE: &str = "_opts.json";

/// 默认的大页信息目录
const HUGEPAGES_DIR: &str = "/sys/kernel/mm/hugepages";

/// 内置 local 驱动
pub struct LocalDriver {
    /// 卷目录，即 `<root>/volumes`
    root: PathBuf,
    /// 大页尺寸探测目录
    hugepages_dir: PathBuf,
}

impl LocalDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hugepages_dir: PathBuf::from(HUGEPAGES_DIR),
        }
    }

    pub fn with_hugepages_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hugepages_dir = dir.into();
        self
    }

    fn volume_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.volume_dir(name).join(DATA_DIR)
    }

    async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.data_path(name)).await.unwrap_or(false)
    }

    async fn ensure_exists(&self, name: &str) -> Result<PathBuf> {
        if self.exists(name).await {
            Ok(self.data_path(name))
        } else {
            Err(Error::NoSuchVolume(name.to_string()))
        }
    }

    /// 校验创建选项
    fn validate_opts(&self, opts: &BTreeMap<String, String>) -> Result<()> {
        for key in opts.keys() {
            if !VALID_OPTS.contains(&key.as_str()) {
                return Err(Error::InvalidOption(format!("invalid option key: {:?}", key)));
            }
        }

        match (opts.get("type"), opts.get("device")) {
            (Some(_), None) => {
                return Err(Error::InvalidOption(
                    "missing required option: \"device\"".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::InvalidOption(
                    "missing required option: \"type\"".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(size) = opts.get("size") {
            parse_size(size)?;
        }

        if opts.get("type").map(String::as_str) == Some("hugetlbfs") {
            if let Some(o) = opts.get("o") {
                self.validate_hugepage_size(o)?;
            }
        }

        Ok(())
    }

    /// 检查 `pagesize=` 是否为内核支持的大页尺寸
    fn validate_hugepage_size(&self, mount_opts: &str) -> Result<()> {
        for part in mount_opts.split(',') {
            let Some(raw) = part.trim().strip_prefix("pagesize=") else {
                continue;
            };
            let invalid = || Error::InvalidOption(format!("Invalid hugepage size: {}", raw));
            let bytes = parse_size(raw).map_err(|_| invalid())?;
            let supported = self.hugepages_dir.join(format!("hugepages-{}kB", bytes / 1024));
            if bytes < 1024 || !supported.is_dir() {
                return Err(invalid());
            }
        }
        Ok(())
    }

    async fn read_opts(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let path = self.volume_dir(name).join(OPTS_FILE);
        match fs::read(&path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::Storage(format!("Failed to read {:?}: {}", path, e))),
        }
    }

    /// 合并 `o` 与 `size`，得到 `mount -o` 参数
    fn mount_options(opts: &BTreeMap<String, String>) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(o) = opts.get("o").filter(|o| !o.is_empty()) {
            parts.push(o.clone());
        }
        if let Some(size) = opts.get("size") {
            parts.push(format!("size={}", size));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    async fn run(command: &mut Command, what: &str) -> Result<()> {
        let output = command
            .output()
            .await
            .map_err(|e| Error::DriverError(format!("failed to run {}: {}", what, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::DriverError(format!("{} failed: {}", what, stderr.trim())));
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeDriver for LocalDriver {
    fn name(&self) -> &str {
        DEFAULT_DRIVER
    }

    async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> Result<()> {
        self.validate_opts(opts)?;

        let data = self.data_path(name);
        fs::create_dir_all(&data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {:?}: {}", data, e)))?;

        if !opts.is_empty() {
            let path = self.volume_dir(name).join(OPTS_FILE);
            fs::write(&path, serde_json::to_vec(opts)?)
                .await
                .map_err(|e| Error::Storage(format!("Failed to write {:?}: {}", path, e)))?;
        }

        info!("Created local volume {} at {:?}", name, data);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let data = self.data_path(name);
        match fs::remove_dir_all(&data).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Local volume {} has no data directory", name);
            }
            Err(e) => return Err(Error::Storage(format!("Failed to remove {:?}: {}", data, e))),
        }

        let opts = self.volume_dir(name).join(OPTS_FILE);
        if let Err(e) = fs::remove_file(&opts).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", opts, e);
            }
        }
        // 目录里可能还有同名驱动的记录，非空时保留
        let _ = fs::remove_dir(self.volume_dir(name)).await;

        info!("Removed local volume {}", name);
        Ok(())
    }

    async fn mount(&self, name: &str) -> Result<String> {
        let data = self.ensure_exists(name).await?;
        let opts = self.read_opts(name).await?;

        if let (Some(fs_type), Some(device)) = (opts.get("type"), opts.get("device")) {
            let mut command = Command::new("mount");
            command.arg("-t").arg(fs_type);
            if let Some(mount_opts) = Self::mount_options(&opts) {
                command.arg("-o").arg(mount_opts);
            }
            command.arg(device).arg(&data);
            Self::run(&mut command, "mount").await?;
            info!("Mounted {} ({}) on {:?}", device, fs_type, data);
        }

        Ok(data.to_string_lossy().into_owned())
    }

    async fn unmount(&self, name: &str) -> Result<()> {
        let data = self.ensure_exists(name).await?;
        let opts = self.read_opts(name).await?;

        if opts.contains_key("type") && opts.contains_key("device") {
            Self::run(Command::new("umount").arg(&data), "umount").await?;
            info!("Unmounted {:?}", data);
        }
        Ok(())
    }

    async fn path(&self, name: &str) -> Result<String> {
        let data = self.ensure_exists(name).await?;
        Ok(data.to_string_lossy().into_owned())
    }

    async fn get(&self, name: &str) -> Result<Option<PluginVolume>> {
        if !self.exists(name).await {
            return Ok(None);
        }
        Ok(Some(PluginVolume {
            name: name.to_string(),
            mountpoint: self.data_path(name).to_string_lossy().into_owned(),
        }))
    }

    async fn list(&self) -> Result<Vec<PluginVolume>> {
        let mut volumes = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(volumes),
            Err(e) => return Err(Error::Storage(format!("Failed to read {:?}: {}", self.root, e))),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.exists(&name).await {
                volumes.push(PluginVolume {
                    mountpoint: self.data_path(&name).to_string_lossy().into_owned(),
                    name,
                });
            }
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    fn static_mountpoint(&self, name: &str) -> Option<String> {
        Some(self.data_path(name).to_string_lossy().into_owned())
    }

    async fn usage(&self, name: &str) -> Option<u64> {
        let data = self.data_path(name);
        match dir_size(&data).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Failed to measure {:?}: {}", data, e);
                None
            }
        }
    }
}

/// 递归统计目录下普通文件的字节数
async fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                total += metadata.len();
            }
        }
    }

    Ok(total)
}
