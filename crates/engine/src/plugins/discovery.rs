/// 插件发现
/// 
/// 按优先级扫描插件目录，把驱动名解析为传输端点。
/// 每次查找都重新读取文件系统，不做缓存（缓存属于驱动注册表）。

use common::utils::validate_driver_name;
use common::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::endpoint::Endpoint;
use crate::storage::driver::VolumeDriver;

/// 查找结果：进程内驱动或远程端点
#[derive(Clone)]
pub enum PluginSource {
    Builtin(Arc<dyn VolumeDriver>),
    Remote(Endpoint),
}

impl std::fmt::Debug for PluginSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginSource::Builtin(driver) => write!(f, "Builtin({})", driver.name()),
            PluginSource::Remote(endpoint) => write!(f, "Remote({})", endpoint),
        }
    }
}

/// JSON 规格文件
#[derive(Debug, Deserialize)]
struct JsonSpec {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Addr")]
    addr: String,
}

/// 插件发现器
pub struct Discovery {
    /// 按优先级排列的插件目录
    dirs: Vec<PathBuf>,
    /// 进程内注册的驱动，优先于规格文件
    builtins: RwLock<HashMap<String, Arc<dyn VolumeDriver>>>,
}

impl Discovery {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            builtins: RwLock::new(HashMap::new()),
        }
    }

    /// 注册进程内驱动
    pub async fn register_builtin(&self, driver: Arc<dyn VolumeDriver>) {
        let mut builtins = self.builtins.write().await;
        builtins.insert(driver.name().to_string(), driver);
    }

    /// 解析驱动名
    pub async fn lookup(&self, name: &str) -> Result<PluginSource> {
        if let Some(driver) = self.builtins.read().await.get(name) {
            return Ok(PluginSource::Builtin(driver.clone()));
        }

        if !validate_driver_name(name) {
            return Err(Error::NoSuchDriver(name.to_string()));
        }

        for dir in &self.dirs {
            if let Some(endpoint) = lookup_in_dir(dir, name).await? {
                debug!("Resolved volume driver {} to {} via {:?}", name, endpoint, dir);
                return Ok(PluginSource::Remote(endpoint));
            }
        }

        Err(Error::NoSuchDriver(name.to_string()))
    }
}

/// 在单个目录中查找：`name.sock`、`name.spec`、`name.json`，以及 `name/` 子目录下的同名文件
async fn lookup_in_dir(dir: &Path, name: &str) -> Result<Option<Endpoint>> {
    for base in [dir.to_path_buf(), dir.join(name)] {
        let socket = base.join(format!("{}.sock", name));
        if exists(&socket).await {
            return Ok(Some(Endpoint::Unix(socket)));
        }

        let spec = base.join(format!("{}.spec", name));
        if exists(&spec).await {
            return read_spec(&spec).await.map(Some);
        }

        let json = base.join(format!("{}.json", name));
        if exists(&json).await {
            return read_json_spec(&json, name).await.map(Some);
        }
    }
    Ok(None)
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn read_spec(path: &Path) -> Result<Endpoint> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("failed to read plugin spec {:?}: {}", path, e)))?;

    let addr = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| Error::Config(format!("plugin spec {:?} is empty", path)))?;

    addr.parse()
}

async fn read_json_spec(path: &Path, name: &str) -> Result<Endpoint> {
    let content = fs::read(path)
        .await
        .map_err(|e| Error::Config(format!("failed to read plugin spec {:?}: {}", path, e)))?;
    let spec: JsonSpec = serde_json::from_slice(&content)
        .map_err(|e| Error::Config(format!("invalid plugin spec {:?}: {}", path, e)))?;

    if !spec.name.is_empty() && spec.name != name {
        warn!("Plugin spec {:?} declares name {}, using file name {}", path, spec.name, name);
    }
    spec.addr.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalDriver;

    #[tokio::test]
    async fn test_spec_file_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("extdrv.spec"), "tcp://127.0.0.1:9999\n").unwrap();

        let discovery = Discovery::new(vec![dir.path().to_path_buf()]);
        match discovery.lookup("extdrv").await.unwrap() {
            PluginSource::Remote(ep) => assert_eq!(ep.to_string(), "tcp://127.0.0.1:9999"),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("d.spec"), "tcp://127.0.0.1:1").unwrap();
        std::fs::write(second.path().join("d.spec"), "tcp://127.0.0.1:2").unwrap();

        let discovery = Discovery::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        match discovery.lookup("d").await.unwrap() {
            PluginSource::Remote(ep) => assert_eq!(ep.to_string(), "tcp://127.0.0.1:1"),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_and_nested_specs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("jdrv.json"),
            r#"{"Name":"jdrv","Addr":"https://plugins.local:8443"}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("nested.spec"), "unix:///run/nested.sock").unwrap();

        let discovery = Discovery::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            discovery.lookup("jdrv").await.unwrap(),
            PluginSource::Remote(Endpoint::Https { .. })
        ));
        assert!(matches!(
            discovery.lookup("nested").await.unwrap(),
            PluginSource::Remote(Endpoint::Unix(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_and_invalid_names() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = Discovery::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(discovery.lookup("nope").await, Err(Error::NoSuchDriver(_))));
        assert!(matches!(discovery.lookup("../etc").await, Err(Error::NoSuchDriver(_))));
        assert!(matches!(discovery.lookup("a b").await, Err(Error::NoSuchDriver(_))));
    }

    #[tokio::test]
    async fn test_builtin_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("local.spec"), "tcp://127.0.0.1:1").unwrap();
        let discovery = Discovery::new(vec![dir.path().to_path_buf()]);
        discovery
            .register_builtin(Arc::new(LocalDriver::new(dir.path().join("volumes"))))
            .await;
        assert!(matches!(
            discovery.lookup("local").await.unwrap(),
            PluginSource::Builtin(_)
        ));
    }

    #[tokio::test]
    async fn test_spec_written_later_is_seen() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = Discovery::new(vec![dir.path().to_path_buf()]);
        assert!(discovery.lookup("late").await.is_err());
        std::fs::write(dir.path().join("late.spec"), "tcp://127.0.0.1:7").unwrap();
        assert!(discovery.lookup("late").await.is_ok());
    }
}
