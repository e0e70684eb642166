/// 插件 HTTP 传输层
/// 
/// 每次请求新建连接（unix / tcp / tls），以 HTTP/1.1 POST 发送 JSON 请求体。
/// 这里只区分传输失败与成功响应，业务错误（`Err` 字段）由上层处理。

use common::plugin_rpc::PLUGIN_CONTENT_TYPE;
use common::{Error, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::endpoint::Endpoint;

/// 传输层错误，全部可重试
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("tls handshake with {endpoint}: {reason}")]
    Tls { endpoint: String, reason: String },

    #[error("http handshake: {0}")]
    Handshake(hyper::Error),

    #[error("request failed: {0}")]
    Request(hyper::Error),

    #[error("reading response body: {0}")]
    Body(hyper::Error),

    #[error("plugin returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid request: {0}")]
    Build(String),

    #[error("request timed out")]
    Timeout,
}

/// 单个端点的 HTTP 客户端
pub struct HttpTransport {
    endpoint: Endpoint,
    tls: Option<TlsConnector>,
}

impl HttpTransport {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let tls = match endpoint {
            Endpoint::Https { .. } => Some(tls_connector()?),
            _ => None,
        };
        Ok(Self { endpoint, tls })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 发送 POST 请求并返回 2xx 响应体
    pub async fn post(&self, path: &str, body: Vec<u8>) -> std::result::Result<Bytes, TransportError> {
        match &self.endpoint {
            Endpoint::Unix(socket) => {
                let stream = UnixStream::connect(socket)
                    .await
                    .map_err(|source| self.connect_error(source))?;
                self.exchange(stream, path, body).await
            }
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|source| self.connect_error(source))?;
                self.exchange(stream, path, body).await
            }
            Endpoint::Https { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|source| self.connect_error(source))?;
                let connector = self.tls.as_ref().ok_or_else(|| TransportError::Tls {
                    endpoint: self.endpoint.to_string(),
                    reason: "tls connector not initialized".to_string(),
                })?;
                let server_name = ServerName::try_from(host.as_str())
                    .map(|name| name.to_owned())
                    .map_err(|e| TransportError::Tls {
                        endpoint: self.endpoint.to_string(),
                        reason: e.to_string(),
                    })?;
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| TransportError::Tls {
                        endpoint: self.endpoint.to_string(),
                        reason: e.to_string(),
                    })?;
                self.exchange(stream, path, body).await
            }
        }
    }

    fn connect_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Connect {
            endpoint: self.endpoint.to_string(),
            source,
        }
    }

    async fn exchange<S>(
        &self,
        stream: S,
        path: &str,
        body: Vec<u8>,
    ) -> std::result::Result<Bytes, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(TransportError::Handshake)?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Plugin connection closed: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, self.endpoint.authority())
            .header(CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .header(ACCEPT, PLUGIN_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| TransportError::Build(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(TransportError::Body)?
            .to_bytes();

        if !status.is_success() {
            return Err(TransportError::Status {
                status,
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        Ok(body)
    }
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Config(format!("failed to set up TLS: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
