/// 卷列表过滤条件
/// 
/// 支持 `name`、`driver`、`label`、`label!`（仅清理）和 `dangling`

use crate::errors::{Error, Result};
use super::Volume;

/// 标签过滤：`key` 或 `key=value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub value: Option<String>,
}

impl LabelFilter {
    fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: raw.to_string(),
                value: None,
            },
        }
    }

    fn matches(&self, volume: &Volume) -> bool {
        match (volume.labels.get(&self.key), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        }
    }
}

/// 过滤条件集合
///
/// 同一键的多个 `name`/`driver` 取并集，多个 `label` 取交集，不同键之间取交集。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeFilters {
    pub names: Vec<String>,
    pub drivers: Vec<String>,
    pub labels: Vec<LabelFilter>,
    pub not_labels: Vec<LabelFilter>,
    pub dangling: Option<bool>,
}

impl VolumeFilters {
    /// 解析 `key=value` 形式的过滤参数
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut filters = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| Error::InvalidFilter(arg.to_string()))?;
            match key {
                "name" => filters.names.push(value.to_string()),
                "driver" => filters.drivers.push(value.to_string()),
                "label" => filters.labels.push(LabelFilter::parse(value)),
                "label!" => filters.not_labels.push(LabelFilter::parse(value)),
                "dangling" => {
                    let dangling = match value {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        _ => return Err(Error::InvalidFilter(arg.to_string())),
                    };
                    filters.dangling = Some(dangling);
                }
                _ => return Err(Error::InvalidFilter(arg.to_string())),
            }
        }
        Ok(filters)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 判断卷是否满足过滤条件；`dangling` 由调用方根据引用情况给出
    pub fn matches(&self, volume: &Volume, dangling: bool) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| volume.name.contains(n.as_str())) {
            return false;
        }
        if !self.drivers.is_empty() && !self.drivers.iter().any(|d| *d == volume.driver) {
            return false;
        }
        if !self.labels.iter().all(|l| l.matches(volume)) {
            return false;
        }
        if self.not_labels.iter().any(|l| l.matches(volume)) {
            return false;
        }
        match self.dangling {
            Some(expected) => expected == dangling,
            None => true,
        }
    }
}
