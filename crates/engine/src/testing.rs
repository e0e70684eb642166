/// 测试用卷插件
/// 
/// 基于 axum 的假插件，监听 127.0.0.1 随机端口，按路径统计请求次数。
/// 行为约定：
/// - `Opts` 含 `invalidOption` 时 Create 返回 Err
/// - `Opts` 含 `ninja` 时 Get 返回空响应体
/// - `Opts` 含 `relative` 时 Mount、Path、Get 返回相对路径的挂载点
/// - Mount 在挂载点写入 `test` 文件，内容为插件地址

use axum::body::Bytes;
use axum::extract::State;
use axum::http::Uri;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeVolume {
    opts: BTreeMap<String, String>,
    mountpoint: PathBuf,
}

struct FakeState {
    root: PathBuf,
    url: String,
    implements: Vec<String>,
    hits: Mutex<HashMap<String, usize>>,
    volumes: Mutex<HashMap<String, FakeVolume>>,
    /// 每次请求前的固定延迟
    delay: Mutex<Duration>,
}

pub struct FakePlugin {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
    task: tokio::task::JoinHandle<()>,
}

impl FakePlugin {
    pub async fn start(root: &Path) -> Self {
        Self::start_with_capabilities(root, vec!["VolumeDriver".to_string()]).await
    }

    pub async fn start_with_capabilities(root: &Path, implements: Vec<String>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(FakeState {
            root: root.to_path_buf(),
            url: format!("tcp://{}", addr),
            implements,
            hits: Mutex::new(HashMap::new()),
            volumes: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
        });
        let app = Router::new().fallback(handle).with_state(state.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        self.state.url.clone()
    }

    /// 写入 `<dir>/<driver>.spec`
    pub fn write_spec(&self, dir: &Path, driver: &str) {
        std::fs::write(dir.join(format!("{}.spec", driver)), format!("{}\n", self.url())).unwrap();
    }

    /// 某个路径（如 `VolumeDriver.Mount`）被请求的次数
    pub fn hits(&self, method: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.volumes.lock().unwrap().contains_key(name)
    }

    /// 绕过 Create 直接在插件侧放一个卷
    pub fn seed_volume(&self, name: &str) {
        let mountpoint = self.state.root.join(name);
        self.state.volumes.lock().unwrap().insert(
            name.to_string(),
            FakeVolume {
                opts: BTreeMap::new(),
                mountpoint,
            },
        );
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FakePlugin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn name_of(body: &Value) -> String {
    body["Name"].as_str().unwrap_or_default().to_string()
}

async fn handle(State(state): State<Arc<FakeState>>, uri: Uri, body: Bytes) -> Json<Value> {
    let method = uri.path().trim_start_matches('/').to_string();
    *state.hits.lock().unwrap().entry(method.clone()).or_insert(0) += 1;

    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let name = name_of(&body);

    let reply = match method.as_str() {
        "Plugin.Activate" => json!({ "Implements": state.implements }),
        "VolumeDriver.Create" => {
            let opts: BTreeMap<String, String> =
                serde_json::from_value(body["Opts"].clone()).unwrap_or_default();
            if opts.contains_key("invalidOption") {
                json!({ "Err": "invalid option" })
            } else {
                let mountpoint = if opts.contains_key("relative") {
                    PathBuf::from("relative").join(&name)
                } else {
                    state.root.join(&name)
                };
                state
                    .volumes
                    .lock()
                    .unwrap()
                    .insert(name, FakeVolume { opts, mountpoint });
                json!({})
            }
        }
        "VolumeDriver.Remove" => match state.volumes.lock().unwrap().remove(&name) {
            Some(_) => json!({}),
            None => json!({ "Err": "no such volume" }),
        },
        "VolumeDriver.Mount" => {
            let mountpoint = state
                .volumes
                .lock()
                .unwrap()
                .get(&name)
                .map(|v| v.mountpoint.clone());
            match mountpoint {
                Some(path) if path.is_relative() => json!({ "Mountpoint": path }),
                Some(path) => {
                    std::fs::create_dir_all(&path).unwrap();
                    std::fs::write(path.join("test"), &state.url).unwrap();
                    json!({ "Mountpoint": path })
                }
                None => json!({ "Err": "no such volume" }),
            }
        }
        "VolumeDriver.Unmount" => json!({}),
        "VolumeDriver.Path" => match state.volumes.lock().unwrap().get(&name) {
            Some(v) => json!({ "Mountpoint": v.mountpoint }),
            None => json!({ "Err": "no such volume" }),
        },
        "VolumeDriver.Get" => match state.volumes.lock().unwrap().get(&name) {
            Some(v) if v.opts.contains_key("ninja") => json!({}),
            Some(v) => json!({ "Volume": { "Name": name, "Mountpoint": v.mountpoint } }),
            None => json!({ "Err": "no such volume" }),
        },
        "VolumeDriver.List" => {
            let volumes: Vec<Value> = state
                .volumes
                .lock()
                .unwrap()
                .iter()
                .map(|(name, v)| json!({ "Name": name, "Mountpoint": v.mountpoint }))
                .collect();
            json!({ "Volumes": volumes })
        }
        other => json!({ "Err": format!("unknown method {}", other) }),
    };

    Json(reply)
}

/// 返回一个当前无人监听的本地地址
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
