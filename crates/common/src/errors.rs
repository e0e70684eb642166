use thiserror::Error;

/// 统一错误类型
///
/// 面向用户的错误信息是稳定字符串，下游工具会按子串匹配
/// （例如 `No such volume`、`volume is in use`、`Invalid filter`）。
#[derive(Error, Debug)]
pub enum Error {
    #[error("volume driver not found: {0}")]
    NoSuchDriver(String),

    #[error("volume driver {driver} is unavailable: {reason}")]
    PluginUnavailable { driver: String, reason: String },

    #[error("plugin {0} does not implement the VolumeDriver capability")]
    IncompatibleDriver(String),

    #[error("No such volume: {0}")]
    NoSuchVolume(String),

    #[error("volume name {name} is ambiguous, it is provided by drivers: {}", .drivers.join(", "))]
    AmbiguousName { name: String, drivers: Vec<String> },

    #[error("volume name conflict: {0}")]
    Conflict(String),

    #[error("remove {name}: volume is in use - [{}]", .refs.join(", "))]
    InUse { name: String, refs: Vec<String> },

    #[error("invalid volume name: {0}")]
    InvalidName(String),

    #[error("{0}")]
    InvalidOption(String),

    #[error("Invalid filter '{0}'")]
    InvalidFilter(String),

    /// 插件响应中 `Err` 字段的原样透传
    #[error("{0}")]
    DriverError(String),

    #[error("No such container: {0}")]
    NoSuchContainer(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 是否为可重试的传输层错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PluginUnavailable { .. })
    }

    /// 驱动本身不可达（未注册或重试耗尽）
    pub fn is_driver_unreachable(&self) -> bool {
        matches!(self, Error::PluginUnavailable { .. } | Error::NoSuchDriver(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoSuchVolume(_) | Error::NoSuchContainer(_))
    }

    pub fn plugin_unavailable(driver: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::PluginUnavailable {
            driver: driver.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_messages() {
        let err = Error::NoSuchVolume("doesnotexist".to_string());
        assert_eq!(err.to_string(), "No such volume: doesnotexist");

        let err = Error::InUse {
            name: "testvolume".to_string(),
            refs: vec!["c1".to_string(), "c2".to_string()],
        };
        assert!(err.to_string().contains("volume is in use"));
        assert!(err.to_string().contains("c1, c2"));

        let err = Error::InvalidFilter("FOO".to_string());
        assert!(err.to_string().contains("Invalid filter"));

        let err = Error::DriverError("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::plugin_unavailable("d", "refused").is_transient());
        assert!(!Error::DriverError("x".to_string()).is_transient());
        assert!(Error::NoSuchDriver("d".to_string()).is_driver_unreachable());
    }
}
