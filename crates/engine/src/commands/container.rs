/// 容器命令
/// 
/// 容器只保留卷相关的状态：创建时登记引用，启动时挂载，停止时卸载，删除时释放。

use anyhow::{bail, Result};
use clap::Subcommand;
use common::models::VolumeRef;
use common::utils::generate_id;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{info, warn};

use super::{Context, PartialFailure};
use crate::container::{ContainerRecord, ContainerState, MountRecord};
use crate::volume::CreateOptions;

#[derive(Subcommand)]
pub enum ContainerCommands {
    /// Create a container
    Create(CreateArgs),

    /// Create and start a container
    Run(CreateArgs),

    /// Start a container, mounting its volumes
    Start {
        id: String,
    },

    /// Stop a container, unmounting its volumes
    Stop {
        id: String,
    },

    /// Remove one or more containers
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Stop running containers before removing them
        #[arg(short, long)]
        force: bool,

        /// Remove anonymous volumes associated with the container
        #[arg(short, long)]
        volumes: bool,
    },

    /// List containers
    #[command(alias = "ps")]
    Ls,
}

#[derive(clap::Args)]
pub struct CreateArgs {
    /// Bind a volume (name:/dest or /dest for an anonymous volume)
    #[arg(short, long = "volume", value_parser = parse_mount_spec)]
    volume: Vec<MountSpec>,

    /// Driver for volumes created with the container
    #[arg(long)]
    volume_driver: Option<String>,
}

/// `-v` 参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// 为空时创建匿名卷
    pub name: Option<String>,
    pub destination: String,
}

/// 解析 `name:/dest[:mode]` 或 `/dest`
pub fn parse_mount_spec(raw: &str) -> Result<MountSpec, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let (name, destination) = match parts.as_slice() {
        [dest] => (None, *dest),
        [name, dest] | [name, dest, "ro" | "rw"] => (Some(*name), *dest),
        _ => return Err(format!("invalid volume specification: {:?}", raw)),
    };

    if !destination.starts_with('/') {
        return Err(format!(
            "invalid volume specification: {:?}: destination must be an absolute path",
            raw
        ));
    }
    match name {
        Some(name) if name.is_empty() => {
            Err(format!("invalid volume specification: {:?}", raw))
        }
        Some(name) if name.starts_with('/') || name.starts_with('.') => Err(format!(
            "invalid volume specification: {:?}: bind mounts are not supported",
            raw
        )),
        _ => Ok(MountSpec {
            name: name.map(str::to_string),
            destination: destination.to_string(),
        }),
    }
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "CONTAINER ID")]
    id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "VOLUMES")]
    volumes: String,
}

pub async fn execute(cmd: ContainerCommands, ctx: &Context) -> Result<()> {
    match cmd {
        ContainerCommands::Create(args) => {
            let record = create(ctx, args).await?;
            println!("{}", record.id);
            Ok(())
        }
        ContainerCommands::Run(args) => {
            let mut record = create(ctx, args).await?;
            start(ctx, &mut record).await?;
            println!("{}", record.id);
            Ok(())
        }
        ContainerCommands::Start { id } => {
            let mut record = ctx.containers.load(&id).await?;
            start(ctx, &mut record).await?;
            println!("{}", record.id);
            Ok(())
        }
        ContainerCommands::Stop { id } => {
            let mut record = ctx.containers.load(&id).await?;
            stop(ctx, &mut record).await?;
            println!("{}", record.id);
            Ok(())
        }
        ContainerCommands::Rm { ids, force, volumes } => {
            let mut errors = Vec::new();
            for id in &ids {
                match remove(ctx, id, force, volumes).await {
                    Ok(removed) => println!("{}", removed),
                    Err(e) => errors.push(e),
                }
            }
            PartialFailure::check(errors, ids.len())
        }
        ContainerCommands::Ls => list(ctx).await,
    }
}

/// 登记容器的卷引用；匿名卷与不存在的命名卷在此创建
async fn create(ctx: &Context, args: CreateArgs) -> Result<ContainerRecord> {
    let id = generate_id();
    let mut mounts: Vec<MountRecord> = Vec::new();

    for spec in &args.volume {
        match attach(ctx, &id, spec, args.volume_driver.as_deref()).await {
            Ok(mount) => mounts.push(mount),
            Err(e) => {
                detach_all(ctx, &id, &mounts, true).await;
                return Err(e);
            }
        }
    }

    let record = ContainerRecord::new(id, mounts);
    if let Err(e) = ctx.containers.save(&record).await {
        detach_all(ctx, &record.id, &record.mounts, true).await;
        return Err(e.into());
    }
    info!("Created container {} with {} volumes", record.id, record.mounts.len());
    Ok(record)
}

async fn attach(
    ctx: &Context,
    id: &str,
    spec: &MountSpec,
    volume_driver: Option<&str>,
) -> Result<MountRecord> {
    let create = |name: Option<String>| CreateOptions {
        name,
        driver: volume_driver.map(str::to_string),
        reference: Some(id.to_string()),
        ..Default::default()
    };

    let Some(name) = &spec.name else {
        let info = ctx.manager.create(create(None)).await?;
        return Ok(MountRecord {
            volume: info.volume.name,
            driver: info.volume.driver,
            destination: spec.destination.clone(),
            anonymous: true,
        });
    };

    let volume = VolumeRef {
        driver: volume_driver.map(str::to_string),
        name: name.clone(),
    };
    let driver = match ctx.manager.reference(&volume, id).await {
        Ok(driver) => driver,
        Err(e) if e.is_not_found() => {
            ctx.manager
                .create(create(Some(name.clone())))
                .await?
                .volume
                .driver
        }
        Err(e) => return Err(e.into()),
    };

    Ok(MountRecord {
        volume: name.clone(),
        driver,
        destination: spec.destination.clone(),
        anonymous: false,
    })
}

/// 释放引用；`anonymous` 为真时一并删除匿名卷
async fn detach_all(ctx: &Context, id: &str, mounts: &[MountRecord], anonymous: bool) {
    for mount in mounts {
        let volume = VolumeRef::exact(&mount.driver, &mount.volume);
        if let Err(e) = ctx.manager.release(&volume, id).await {
            if !e.is_not_found() {
                warn!("Failed to release volume {} for container {}: {}", volume, id, e);
            }
            continue;
        }
        if anonymous && mount.anonymous {
            if let Err(e) = ctx.manager.remove(&volume, false).await {
                warn!("Failed to remove anonymous volume {}: {}", volume, e);
            }
        }
    }
}

async fn start(ctx: &Context, record: &mut ContainerRecord) -> Result<()> {
    if record.state == ContainerState::Running {
        bail!("container {} is already running", record.id);
    }

    let mut mounted: Vec<VolumeRef> = Vec::new();
    for mount in &record.mounts {
        let volume = VolumeRef::exact(&mount.driver, &mount.volume);
        match ctx.manager.mount(&volume, &record.id).await {
            Ok(mountpoint) => {
                info!("Mounted {} at {} -> {}", volume, mountpoint, mount.destination);
                mounted.push(volume);
            }
            Err(e) => {
                for volume in &mounted {
                    if let Err(e) = ctx.manager.unmount(volume, &record.id).await {
                        warn!("Failed to unmount {} after failed start: {}", volume, e);
                    }
                }
                return Err(e.into());
            }
        }
    }

    record.state = ContainerState::Running;
    ctx.containers.save(record).await?;
    Ok(())
}

async fn stop(ctx: &Context, record: &mut ContainerRecord) -> Result<()> {
    if record.state != ContainerState::Running {
        bail!("container {} is not running", record.id);
    }

    for mount in &record.mounts {
        let volume = VolumeRef::exact(&mount.driver, &mount.volume);
        if let Err(e) = ctx.manager.unmount(&volume, &record.id).await {
            warn!("Failed to unmount {} for container {}: {}", volume, record.id, e);
        }
    }

    record.state = ContainerState::Stopped;
    ctx.containers.save(record).await?;
    Ok(())
}

async fn remove(ctx: &Context, id: &str, force: bool, volumes: bool) -> Result<String> {
    let mut record = ctx.containers.load(id).await?;
    if record.state == ContainerState::Running {
        if !force {
            bail!(
                "cannot remove running container {}: stop the container before removing or force remove",
                record.id
            );
        }
        stop(ctx, &mut record).await?;
    }

    detach_all(ctx, &record.id, &record.mounts, volumes).await;
    ctx.containers.delete(&record.id).await?;
    info!("Removed container {}", record.id);
    Ok(record.id)
}

async fn list(ctx: &Context) -> Result<()> {
    let rows: Vec<ContainerRow> = ctx
        .containers
        .list()
        .await?
        .into_iter()
        .map(|record| ContainerRow {
            id: record.id.chars().take(12).collect(),
            state: record.state.to_string(),
            volumes: record
                .mounts
                .iter()
                .map(|m| format!("{}:{}", m.volume, m.destination))
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::blank());
    println!("{}", table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::FakePlugin;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &Path, plugins: &Path) -> Config {
        Config {
            root: root.to_path_buf(),
            plugin_dirs: vec![plugins.to_path_buf()],
            plugin_timeout: 5,
            default_driver: "local".to_string(),
            log_level: "info".to_string(),
        }
    }

    fn args(specs: &[&str], volume_driver: Option<&str>) -> CreateArgs {
        CreateArgs {
            volume: specs.iter().map(|s| parse_mount_spec(s).unwrap()).collect(),
            volume_driver: volume_driver.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_anonymous_volume_lifecycle_across_restarts() {
        let root = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let mounts = TempDir::new().unwrap();
        let plugin = FakePlugin::start(mounts.path()).await;
        plugin.write_spec(plugins.path(), "extdrv");
        let cfg = config(root.path(), plugins.path());

        let ctx = Context::open(&cfg).await.unwrap();
        let mut record = create(&ctx, args(&["/tmp/x"], Some("extdrv"))).await.unwrap();
        start(&ctx, &mut record).await.unwrap();
        ctx.close().await;

        let ctx = Context::open(&cfg).await.unwrap();
        let mut record = ctx.containers.load(&record.id).await.unwrap();
        assert_eq!(record.mounts[0].driver, "extdrv");
        assert!(record.mounts[0].anonymous);
        stop(&ctx, &mut record).await.unwrap();
        remove(&ctx, &record.id, false, true).await.unwrap();
        assert!(ctx.manager.list::<&str>(&[]).await.unwrap().volumes.is_empty());
        ctx.close().await;

        assert_eq!(plugin.hits("VolumeDriver.Create"), 1);
        assert_eq!(plugin.hits("VolumeDriver.Mount"), 1);
        assert_eq!(plugin.hits("VolumeDriver.Unmount"), 1);
        assert_eq!(plugin.hits("VolumeDriver.Remove"), 1);
    }

    #[tokio::test]
    async fn test_existing_volume_keeps_driver_after_restart() {
        let root = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let mounts = TempDir::new().unwrap();
        let plugin = FakePlugin::start(mounts.path()).await;
        plugin.write_spec(plugins.path(), "extdrv");
        let cfg = config(root.path(), plugins.path());

        let ctx = Context::open(&cfg).await.unwrap();
        ctx.manager
            .create(CreateOptions {
                name: Some("abc".to_string()),
                driver: Some("extdrv".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        ctx.close().await;

        let ctx = Context::open(&cfg).await.unwrap();
        let mut record = create(&ctx, args(&["abc:/foo"], None)).await.unwrap();
        start(&ctx, &mut record).await.unwrap();
        assert_eq!(record.mounts[0].driver, "extdrv");
        assert_eq!(record.mounts[0].volume, "abc");
        remove(&ctx, &record.id, true, true).await.unwrap();
        ctx.close().await;

        assert!(plugin.has_volume("abc"));
    }

    #[tokio::test]
    async fn test_volume_in_use_until_container_removed() {
        let root = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let cfg = config(root.path(), plugins.path());

        let ctx = Context::open(&cfg).await.unwrap();
        let mut record = create(&ctx, args(&["v:/data"], None)).await.unwrap();
        start(&ctx, &mut record).await.unwrap();
        ctx.close().await;

        let ctx = Context::open(&cfg).await.unwrap();
        let volume = VolumeRef::named("v");
        let err = ctx.manager.remove(&volume, false).await.unwrap_err();
        assert!(err.to_string().contains("in use"));

        assert!(remove(&ctx, &record.id, false, true).await.is_err());
        remove(&ctx, &record.id, true, true).await.unwrap();
        ctx.manager.remove(&volume, false).await.unwrap();
        ctx.close().await;
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back_references() {
        let root = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let cfg = config(root.path(), plugins.path());

        let ctx = Context::open(&cfg).await.unwrap();
        let err = create(&ctx, args(&["/anon", "bad name:/data"], None)).await;
        assert!(err.is_err());

        let listing = ctx.manager.list::<&str>(&[]).await.unwrap();
        assert!(listing.volumes.is_empty());
        assert!(ctx.containers.list().await.unwrap().is_empty());
        ctx.close().await;
    }

    #[test]
    fn test_parse_mount_spec() {
        assert_eq!(
            parse_mount_spec("ext:/tmp/x").unwrap(),
            MountSpec {
                name: Some("ext".to_string()),
                destination: "/tmp/x".to_string()
            }
        );
        assert_eq!(
            parse_mount_spec("/tmp/x").unwrap(),
            MountSpec {
                name: None,
                destination: "/tmp/x".to_string()
            }
        );
        assert_eq!(parse_mount_spec("abc:/foo:ro").unwrap().name.as_deref(), Some("abc"));
    }

    #[test]
    fn test_reject_bad_mount_spec() {
        assert!(parse_mount_spec("relative").is_err());
        assert!(parse_mount_spec("ext:relative").is_err());
        assert!(parse_mount_spec("/host:/dest").is_err());
        assert!(parse_mount_spec(":/dest").is_err());
        assert!(parse_mount_spec("a:/b:zz").is_err());
    }
}
