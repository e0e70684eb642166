/// 插件端点
/// 
/// 规格文件中的地址：`unix:///path`、`tcp://host:port`、`https://host:port`

use common::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
    Https { host: String, port: u16 },
}

impl Endpoint {
    /// 请求头中的 Host
    pub fn authority(&self) -> String {
        match self {
            Endpoint::Unix(_) => "plugin".to_string(),
            Endpoint::Tcp { host, port } | Endpoint::Https { host, port } if host.contains(':') => {
                format!("[{}]:{}", host, port)
            }
            Endpoint::Tcp { host, port } | Endpoint::Https { host, port } => {
                format!("{}:{}", host, port)
            }
        }
    }
}

fn parse_host_port(raw: &str, addr: &str) -> Result<(String, u16)> {
    let raw = raw.trim_end_matches('/');
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("plugin address {} has no port", addr)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Config(format!("plugin address {} has an invalid port", addr)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::Config(format!("plugin address {} has no host", addr)));
    }
    Ok((host.to_string(), port))
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        if let Some(path) = addr.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "unix plugin address {} must be an absolute path",
                    addr
                )));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(rest) = addr
            .strip_prefix("tcp://")
            .or_else(|| addr.strip_prefix("http://"))
        {
            let (host, port) = parse_host_port(rest, addr)?;
            return Ok(Endpoint::Tcp { host, port });
        }
        if let Some(rest) = addr.strip_prefix("https://") {
            let (host, port) = parse_host_port(rest, addr)?;
            return Ok(Endpoint::Https { host, port });
        }
        Err(Error::Config(format!("unsupported plugin address: {}", addr)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Https { host, port } => write!(f, "https://{}:{}", host, port),
        }
    }
}
