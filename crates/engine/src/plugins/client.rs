/// 远程卷驱动客户端
/// 
/// 首次调用时激活插件；传输失败按指数退避重试，直到单次调用的截止时间；
/// 插件返回的 `Err` 不重试，原样作为驱动错误返回。

use async_trait::async_trait;
use common::models::DriverState;
use common::plugin_rpc::{
    ActivateResponse, CreateRequest, EmptyRequest, ErrResponse, GetResponse, ListResponse,
    MountResponse, NameRequest, PluginResponse, PluginVolume, VOLUME_DRIVER_CAPABILITY,
};
use common::{Error, PluginMethod, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::backoff::{Backoff, RetryPolicy};
use super::endpoint::Endpoint;
use super::transport::{HttpTransport, TransportError};
use crate::storage::driver::VolumeDriver;
use crate::volume::events::EventSink;

/// 单次尝试的最短超时，保证截止时刻仍能发出最后一次请求
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(100);

/// 远程插件驱动
pub struct PluginDriver {
    name: String,
    transport: HttpTransport,
    policy: RetryPolicy,
    /// 激活成功后才会被设置，失败不会污染
    activated: OnceCell<()>,
    state: std::sync::Mutex<DriverState>,
    /// 变更类请求串行执行
    mutate_lock: Mutex<()>,
    events: Arc<EventSink>,
}

impl PluginDriver {
    pub fn new(
        name: impl Into<String>,
        endpoint: Endpoint,
        policy: RetryPolicy,
        events: Arc<EventSink>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            transport: HttpTransport::new(endpoint)?,
            policy,
            activated: OnceCell::new(),
            state: std::sync::Mutex::new(DriverState::Unknown),
            mutate_lock: Mutex::new(()),
            events,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    fn set_state(&self, state: DriverState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// 挂载点只能是绝对路径或空串
    fn checked_mountpoint(
        &self,
        method: PluginMethod,
        name: &str,
        mountpoint: String,
    ) -> Result<String> {
        if mountpoint.is_empty() || mountpoint.starts_with('/') {
            return Ok(mountpoint);
        }
        warn!(
            "Volume driver {} returned relative mountpoint {:?} for {} ({})",
            self.name, mountpoint, name, method
        );
        Err(Error::DriverError(format!(
            "volume driver {} returned a relative mountpoint for {}: {:?}",
            self.name, name, mountpoint
        )))
    }

    async fn activate(&self, backoff: &mut Backoff) -> Result<()> {
        self.activated
            .get_or_try_init(|| async move {
                let result = self
                    .send::<_, ActivateResponse>(PluginMethod::Activate, &EmptyRequest {}, backoff)
                    .await;
                let resp = match result {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.set_state(DriverState::ProbedFailed);
                        return Err(e);
                    }
                };

                if !resp.implements.iter().any(|c| c == VOLUME_DRIVER_CAPABILITY) {
                    self.set_state(DriverState::ProbedFailed);
                    warn!(
                        "Plugin {} implements {:?}, not a volume driver",
                        self.name, resp.implements
                    );
                    return Err(Error::IncompatibleDriver(self.name.clone()));
                }

                self.set_state(DriverState::ProbedOk);
                self.events.record(&self.name, PluginMethod::Activate);
                info!("Activated volume driver {} at {}", self.name, self.endpoint());
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// 激活后发送一次请求；变更类请求持有驱动级互斥锁
    async fn call<Req, Resp>(&self, method: PluginMethod, req: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + PluginResponse,
    {
        let mut backoff = self.policy.start();
        self.activate(&mut backoff).await?;

        let _guard = if method.is_mutating() {
            Some(self.mutate_lock.lock().await)
        } else {
            None
        };
        self.send(method, req, &mut backoff).await
    }

    async fn send<Req, Resp>(
        &self,
        method: PluginMethod,
        req: &Req,
        backoff: &mut Backoff,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + PluginResponse,
    {
        let body = serde_json::to_vec(req)?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let timeout = backoff.remaining().max(MIN_ATTEMPT_TIMEOUT);
            let outcome =
                match tokio::time::timeout(timeout, self.transport.post(method.path(), body.clone()))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::Timeout),
                };

            match outcome {
                Ok(bytes) => {
                    let resp: Resp = serde_json::from_slice(&bytes).map_err(|e| {
                        Error::DriverError(format!(
                            "volume driver {} returned an invalid {} response: {}",
                            self.name, method, e
                        ))
                    })?;
                    return resp.into_result();
                }
                Err(e) => {
                    debug!(
                        "Volume driver {} {} attempt {} failed: {}",
                        self.name, method, attempt, e
                    );
                    match backoff.next_delay() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(Error::plugin_unavailable(&self.name, e)),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl VolumeDriver for PluginDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> Result<()> {
        let req = CreateRequest {
            name: name.to_string(),
            opts: opts.clone(),
        };
        self.call::<_, ErrResponse>(PluginMethod::Create, &req).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let req = NameRequest { name: name.to_string() };
        self.call::<_, ErrResponse>(PluginMethod::Remove, &req).await?;
        Ok(())
    }

    async fn mount(&self, name: &str) -> Result<String> {
        let req = NameRequest { name: name.to_string() };
        let resp: MountResponse = self.call(PluginMethod::Mount, &req).await?;
        self.checked_mountpoint(PluginMethod::Mount, name, resp.mountpoint)
    }

    async fn unmount(&self, name: &str) -> Result<()> {
        let req = NameRequest { name: name.to_string() };
        self.call::<_, ErrResponse>(PluginMethod::Unmount, &req).await?;
        Ok(())
    }

    async fn path(&self, name: &str) -> Result<String> {
        let req = NameRequest { name: name.to_string() };
        let resp: MountResponse = self.call(PluginMethod::Path, &req).await?;
        self.checked_mountpoint(PluginMethod::Path, name, resp.mountpoint)
    }

    async fn get(&self, name: &str) -> Result<Option<PluginVolume>> {
        let req = NameRequest { name: name.to_string() };
        let resp: GetResponse = self.call(PluginMethod::Get, &req).await?;
        match resp.volume {
            Some(mut volume) if !volume.name.is_empty() => {
                volume.mountpoint =
                    self.checked_mountpoint(PluginMethod::Get, name, volume.mountpoint)?;
                Ok(Some(volume))
            }
            _ => {
                warn!("Volume driver {} returned an empty Get response for {}", self.name, name);
                Ok(None)
            }
        }
    }

    async fn list(&self) -> Result<Vec<PluginVolume>> {
        let resp: ListResponse = self.call(PluginMethod::List, &EmptyRequest {}).await?;
        Ok(resp.volumes)
    }

    fn state(&self) -> DriverState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(DriverState::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{unused_addr, FakePlugin};

    fn driver_for(url: &str, deadline: Duration, events: Arc<EventSink>) -> PluginDriver {
        PluginDriver::new(
            "extdrv",
            url.parse().unwrap(),
            RetryPolicy::with_deadline(deadline),
            events,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_activation_happens_once() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FakePlugin::start(dir.path()).await;
        let events = Arc::new(EventSink::new().unwrap());
        let driver = driver_for(&plugin.url(), Duration::from_secs(5), events.clone());

        assert_eq!(driver.state(), DriverState::Unknown);
        driver.create("ext", &BTreeMap::new()).await.unwrap();
        let mountpoint = driver.mount("ext").await.unwrap();
        assert!(mountpoint.ends_with("ext"));
        driver.unmount("ext").await.unwrap();

        assert_eq!(plugin.hits("Plugin.Activate"), 1);
        assert_eq!(events.counters("extdrv").activations, 1);
        assert_eq!(driver.state(), DriverState::ProbedOk);
    }

    #[tokio::test]
    async fn test_incompatible_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let plugin =
            FakePlugin::start_with_capabilities(dir.path(), vec!["NetworkDriver".to_string()])
                .await;
        let driver = driver_for(
            &plugin.url(),
            Duration::from_secs(5),
            Arc::new(EventSink::new().unwrap()),
        );

        let err = driver.list().await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleDriver(_)));
        assert_eq!(driver.state(), DriverState::ProbedFailed);

        // 激活失败后下一次调用会重新激活
        let _ = driver.list().await;
        assert_eq!(plugin.hits("Plugin.Activate"), 2);
        assert_eq!(plugin.hits("VolumeDriver.List"), 0);
    }

    #[tokio::test]
    async fn test_driver_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FakePlugin::start(dir.path()).await;
        let driver = driver_for(
            &plugin.url(),
            Duration::from_secs(5),
            Arc::new(EventSink::new().unwrap()),
        );

        let mut opts = BTreeMap::new();
        opts.insert("invalidOption".to_string(), "1".to_string());
        let err = driver.create("bad", &opts).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid option");
        assert_eq!(plugin.hits("VolumeDriver.Create"), 1);
    }

    #[tokio::test]
    async fn test_empty_get_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FakePlugin::start(dir.path()).await;
        let driver = driver_for(
            &plugin.url(),
            Duration::from_secs(5),
            Arc::new(EventSink::new().unwrap()),
        );

        let mut opts = BTreeMap::new();
        opts.insert("ninja".to_string(), "1".to_string());
        driver.create("ninja", &opts).await.unwrap();
        assert_eq!(driver.get("ninja").await.unwrap(), None);

        driver.create("plain", &BTreeMap::new()).await.unwrap();
        let volume = driver.get("plain").await.unwrap().unwrap();
        assert_eq!(volume.name, "plain");
    }

    #[tokio::test]
    async fn test_relative_mountpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = FakePlugin::start(dir.path()).await;
        let driver = driver_for(
            &plugin.url(),
            Duration::from_secs(5),
            Arc::new(EventSink::new().unwrap()),
        );

        let mut opts = BTreeMap::new();
        opts.insert("relative".to_string(), "1".to_string());
        driver.create("rel", &opts).await.unwrap();

        let err = driver.mount("rel").await.unwrap_err();
        assert!(matches!(err, Error::DriverError(_)));
        assert!(err.to_string().contains("relative mountpoint"));
        assert!(matches!(driver.path("rel").await, Err(Error::DriverError(_))));
        assert!(matches!(driver.get("rel").await, Err(Error::DriverError(_))));
        assert_eq!(plugin.hits("VolumeDriver.Mount"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_plugin_times_out() {
        let url = format!("tcp://{}", unused_addr());
        let driver = driver_for(
            &url,
            Duration::from_millis(500),
            Arc::new(EventSink::new().unwrap()),
        );

        let started = std::time::Instant::now();
        let err = driver.list().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(driver.state(), DriverState::ProbedFailed);
    }

    #[tokio::test]
    async fn test_plugin_started_late_is_reached() {
        let addr = unused_addr();
        let driver = driver_for(
            &format!("tcp://{}", addr),
            Duration::from_secs(10),
            Arc::new(EventSink::new().unwrap()),
        );

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let app = axum::Router::new().fallback(|| async {
                axum::Json(serde_json::json!({"Implements": ["VolumeDriver"], "Volumes": []}))
            });
            axum::serve(listener, app).await.unwrap();
        });

        assert!(driver.list().await.unwrap().is_empty());
        server.abort();
    }
}
