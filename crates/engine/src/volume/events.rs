/// 事件输出
/// 
/// 每个驱动的请求计数（prometheus 计数器）以及卷生命周期事件广播。
/// 计数与广播都不持有管理器的锁，也不会阻塞调用方。

use common::models::{VolumeEvent, VolumeEventKind};
use common::{Error, PluginMethod, Result};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 单个驱动的请求计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverCounters {
    pub activations: u64,
    pub creations: u64,
    pub removals: u64,
    pub mounts: u64,
    pub unmounts: u64,
    pub paths: u64,
    pub lists: u64,
    pub gets: u64,
}

pub struct EventSink {
    registry: Registry,
    requests: IntCounterVec,
    events: broadcast::Sender<VolumeEvent>,
}

impl EventSink {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new(
                "volume_driver_requests_total",
                "Requests sent to volume drivers, by driver and request kind",
            ),
            &["driver", "request"],
        )
        .map_err(|e| Error::Internal(format!("failed to create counters: {}", e)))?;
        registry
            .register(Box::new(requests.clone()))
            .map_err(|e| Error::Internal(format!("failed to register counters: {}", e)))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            registry,
            requests,
            events,
        })
    }

    /// 记录一次驱动请求
    pub fn record(&self, driver: &str, method: PluginMethod) {
        self.requests
            .with_label_values(&[driver, method.counter_name()])
            .inc();
    }

    pub fn counters(&self, driver: &str) -> DriverCounters {
        let get = |method: PluginMethod| {
            self.requests
                .with_label_values(&[driver, method.counter_name()])
                .get()
        };
        DriverCounters {
            activations: get(PluginMethod::Activate),
            creations: get(PluginMethod::Create),
            removals: get(PluginMethod::Remove),
            mounts: get(PluginMethod::Mount),
            unmounts: get(PluginMethod::Unmount),
            paths: get(PluginMethod::Path),
            lists: get(PluginMethod::List),
            gets: get(PluginMethod::Get),
        }
    }

    /// 广播卷事件；没有订阅者时直接丢弃
    pub fn emit(
        &self,
        kind: VolumeEventKind,
        name: &str,
        driver: &str,
        container_id: Option<&str>,
    ) {
        let event = VolumeEvent {
            kind,
            name: name.to_string(),
            driver: driver.to_string(),
            container_id: container_id.map(str::to_string),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if self.events.send(event).is_err() {
            debug!("No subscribers for volume {} event on {}", kind, name);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.events.subscribe()
    }

    /// Prometheus 文本格式导出
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}
