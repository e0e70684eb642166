/// 工具函数集合

use uuid::Uuid;

use crate::errors::{Error, Result};

/// 生成匿名卷名与容器 id（64 位十六进制）
pub fn generate_id() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 解析带单位的大小（`512k`、`2M`、`1GiB`、`1024`），按 1024 进制换算为字节
pub fn parse_size(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (number, unit) = lower.split_at(digits_end);

    let value: u64 = number
        .parse()
        .map_err(|_| Error::InvalidOption(format!("invalid size: {:?}", raw)))?;
    let unit = unit.trim_end_matches('b').trim_end_matches('i');
    let multiplier: u64 = match unit {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => return Err(Error::InvalidOption(format!("invalid size: {:?}", raw))),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidOption(format!("invalid size: {:?}", raw)))
}

/// 校验卷名：首字符为字母或数字，其余为字母、数字或 `_.-`
pub fn validate_volume_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidName(format!(
            "{:?}: volume name must not be empty",
            name
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !first_ok || !rest_ok {
        return Err(Error::InvalidName(format!(
            "{:?} includes invalid characters for a local volume name, only \"[a-zA-Z0-9][a-zA-Z0-9_.-]\" are allowed",
            name
        )));
    }
    Ok(())
}

/// 校验驱动名：非空，且不含路径分隔符或空白
pub fn validate_driver_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_whitespace())
}
