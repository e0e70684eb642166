/// 卷插件 RPC 数据类型定义
/// 
/// 字段名与插件协议保持一致（PascalCase）

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::errors::{Error, Result};

// ============================================================================
// 请求
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub opts: BTreeMap<String, String>,
}

/// Remove/Mount/Unmount/Path/Get 共用的请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    pub name: String,
}

// ============================================================================
// 响应
// ============================================================================

/// 所有响应都带 `Err` 字段；非空即为驱动逻辑错误
pub trait PluginResponse: Sized {
    fn err(&self) -> &str;

    /// `Err` 优先：非空时忽略其它字段
    fn into_result(self) -> Result<Self> {
        if self.err().is_empty() {
            Ok(self)
        } else {
            Err(Error::DriverError(self.err().to_string()))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub implements: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub mountpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PluginVolume {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mountpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    #[serde(default)]
    pub volume: Option<PluginVolume>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub volumes: Vec<PluginVolume>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub err: String,
}

macro_rules! impl_plugin_response {
    ($($ty:ty),*) => {
        $(impl PluginResponse for $ty {
            fn err(&self) -> &str {
                &self.err
            }
        })*
    };
}

impl_plugin_response!(ActivateResponse, ErrResponse, MountResponse, GetResponse, ListResponse);

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_err_wins_over_mountpoint() {
        let resp: MountResponse =
            serde_json::from_str(r#"{"Mountpoint":"/mnt/x","Err":"cannot mount"}"#).unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.to_string(), "cannot mount");
    }

    #[test]
    fn test_missing_err_is_success() {
        let resp: MountResponse = serde_json::from_str(r#"{"Mountpoint":"/mnt/x"}"#).unwrap();
        assert_eq!(resp.into_result().unwrap().mountpoint, "/mnt/x");
    }

    #[test]
    fn test_empty_get_body() {
        let resp: GetResponse = serde_json::from_str("{}").unwrap();
        let resp = resp.into_result().unwrap();
        assert!(resp.volume.is_none());
    }

    #[test]
    fn test_create_request_shape() {
        let mut opts = BTreeMap::new();
        opts.insert("ninja".to_string(), "1".to_string());
        let body = serde_json::to_value(CreateRequest {
            name: "ext".to_string(),
            opts,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"Name": "ext", "Opts": {"ninja": "1"}}));
    }

    #[test]
    fn test_null_volume_list() {
        let resp: ListResponse = serde_json::from_str(r#"{"Volumes":null,"Err":""}"#).unwrap();
        assert!(resp.volumes.is_empty());
    }
}
