//! Share-directory discovery
//!
//! The file daemon serves whatever directory the control service downloads
//! into. That is learned by asking the control RPC through the freshly opened
//! control tunnel.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

/// Header carrying the RPC session token
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// Errors from share-directory discovery
#[derive(Error, Debug)]
pub enum ShareError {
    /// HTTP request failed
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with something unexpected
    #[error("unexpected RPC response: {0}")]
    Protocol(String),
}

/// Basic-auth credentials for the control RPC
#[derive(Clone)]
pub struct RpcAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RpcAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Learns the directory the file daemon should serve
#[async_trait]
pub trait ShareResolver: Send + Sync {
    /// Ask the control service at `control_address` (`host:port`, local end
    /// of the control tunnel). `Ok(None)` when the service has no opinion.
    async fn share_directory(
        &self,
        control_address: &str,
        auth: Option<&RpcAuth>,
    ) -> Result<Option<String>, ShareError>;
}

/// Resolver that never queries anything
#[derive(Debug, Clone, Default)]
pub struct StaticShareResolver {
    path: Option<String>,
}

impl StaticShareResolver {
    /// Always answer `path`
    pub fn new(path: Option<String>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ShareResolver for StaticShareResolver {
    async fn share_directory(
        &self,
        _control_address: &str,
        _auth: Option<&RpcAuth>,
    ) -> Result<Option<String>, ShareError> {
        Ok(self.path.clone())
    }
}

/// Resolver for Transmission-style RPC (`session-get` / `download-dir`)
pub struct RpcShareResolver {
    http: reqwest::Client,
    rpc_path: String,
}

impl RpcShareResolver {
    /// Create a resolver with a per-request `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ShareError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            rpc_path: "/transmission/rpc".to_string(),
        })
    }

    /// Use a different RPC path
    pub fn with_rpc_path(mut self, path: impl Into<String>) -> Self {
        self.rpc_path = path.into();
        self
    }

    async fn post(
        &self,
        url: &str,
        session_id: Option<&str>,
        auth: Option<&RpcAuth>,
    ) -> Result<reqwest::Response, ShareError> {
        let body = json!({
            "method": "session-get",
            "arguments": { "fields": ["download-dir"] },
        });

        let mut request = self.http.post(url).json(&body);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl ShareResolver for RpcShareResolver {
    async fn share_directory(
        &self,
        control_address: &str,
        auth: Option<&RpcAuth>,
    ) -> Result<Option<String>, ShareError> {
        let url = format!("http://{}{}", control_address, self.rpc_path);

        let mut response = self.post(&url, None, auth).await?;

        // The first request only hands out a session id
        if response.status() == reqwest::StatusCode::CONFLICT {
            let session_id = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    ShareError::Protocol(format!("409 without {} header", SESSION_HEADER))
                })?;
            tracing::debug!("Retrying session-get with a fresh session id");
            response = self.post(&url, Some(&session_id), auth).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ShareError::Protocol(format!("HTTP {}", status.as_u16())));
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(result) = body["result"].as_str() {
            if result != "success" {
                return Err(ShareError::Protocol(result.to_string()));
            }
        }

        Ok(body["arguments"]["download-dir"]
            .as_str()
            .filter(|dir| !dir.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one request and return its header block
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let headers = text[..end].to_ascii_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return headers;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_ascii_lowercase()
    }

    async fn respond(stream: &mut TcpStream, status: &str, extra: &str, body: &str) {
        let response = format!(
            "HTTP/1.1 {}\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            extra,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
    }

    #[tokio::test]
    async fn test_session_id_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            read_request(&mut first).await;
            respond(
                &mut first,
                "409 Conflict",
                "X-Transmission-Session-Id: abc123\r\n",
                "",
            )
            .await;

            let (mut second, _) = listener.accept().await.unwrap();
            let headers = read_request(&mut second).await;
            assert!(headers.contains("x-transmission-session-id: abc123"));
            assert!(headers.contains("authorization: basic"));
            respond(
                &mut second,
                "200 OK",
                "",
                r#"{"arguments":{"download-dir":"/srv/downloads"},"result":"success"}"#,
            )
            .await;
        });

        let resolver = RpcShareResolver::new(Duration::from_secs(5)).unwrap();
        let auth = RpcAuth {
            username: "admin".to_string(),
            password: "pw".to_string(),
        };
        let dir = resolver.share_directory(&addr, Some(&auth)).await.unwrap();
        assert_eq!(dir.as_deref(), Some("/srv/downloads"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_failure_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            respond(&mut stream, "200 OK", "", r#"{"result":"method not recognized"}"#).await;
        });

        let resolver = RpcShareResolver::new(Duration::from_secs(5)).unwrap();
        let err = resolver.share_directory(&addr, None).await.unwrap_err();
        assert!(matches!(err, ShareError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_custom_rpc_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let headers = read_request(&mut stream).await;
            assert!(headers.starts_with("post /rpc "));
            respond(&mut stream, "200 OK", "", r#"{"arguments":{},"result":"success"}"#).await;
        });

        let resolver = RpcShareResolver::new(Duration::from_secs(5))
            .unwrap()
            .with_rpc_path("/rpc");
        assert_eq!(resolver.share_directory(&addr, None).await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticShareResolver::new(Some("/data".to_string()));
        assert_eq!(
            resolver.share_directory("unused", None).await.unwrap(),
            Some("/data".to_string())
        );
    }
}
