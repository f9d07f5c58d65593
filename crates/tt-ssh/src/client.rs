//! SSH session establishment
//!
//! Dials the endpoint (directly or through a SOCKS5 proxy), runs the SSH
//! handshake and authenticates. Errors are classified into
//! [`TransportError`] variants so callers can tell bad credentials from an
//! unreachable host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh_keys::key::PublicKey;
use tokio::net::TcpStream;
use tokio::time::timeout;

use tt_core::{Credential, SshTarget, TransportError};

/// Keepalive interval for long-lived forwarding sessions
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Missed keepalives before the session is considered dead
const KEEPALIVE_MAX: usize = 3;

/// An authenticated SSH session
pub type Session = Handle<ClientHandler>;

/// SSH client handler
pub struct ClientHandler {
    /// Expected host key fingerprint (for verification)
    expected_host_key: Option<String>,
}

impl ClientHandler {
    fn new(expected_host_key: Option<String>) -> Self {
        Self { expected_host_key }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key.
    ///
    /// Without a configured fingerprint any key is accepted (the overlay or
    /// the user's network is trusted); with one, a mismatch aborts.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if expected.trim_start_matches("SHA256:") != fingerprint => {
                tracing::warn!(
                    "Host key mismatch: expected {}, got {}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

/// Open the TCP stream to the SSH endpoint, via SOCKS5 when a proxy is set
async fn dial(target: &SshTarget, connect_timeout: Duration) -> Result<TcpStream, TransportError> {
    let dial = async {
        match &target.proxy {
            Some(proxy) => {
                tracing::debug!("Dialing {} via SOCKS5 proxy {}", target.endpoint, proxy);
                let (host, port) = split_endpoint(&target.endpoint)?;
                tokio_socks::tcp::Socks5Stream::connect(proxy.as_str(), (host, port))
                    .await
                    .map(|s| s.into_inner())
                    .map_err(|e| {
                        TransportError::HostUnreachable(format!(
                            "{} via proxy {}: {}",
                            target.endpoint, proxy, e
                        ))
                    })
            }
            None => {
                tracing::debug!("Dialing {}", target.endpoint);
                TcpStream::connect(target.endpoint.as_str())
                    .await
                    .map_err(|e| {
                        TransportError::HostUnreachable(format!("{}: {}", target.endpoint, e))
                    })
            }
        }
    };

    timeout(connect_timeout, dial).await.map_err(|_| {
        TransportError::HostUnreachable(format!(
            "{}: connection timed out after {:?}",
            target.endpoint, connect_timeout
        ))
    })?
}

/// Split `host:port` / `[v6]:port`
fn split_endpoint(endpoint: &str) -> Result<(&str, u16), TransportError> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| TransportError::HostUnreachable(format!("invalid endpoint {}", endpoint)))?;
    let port = port
        .parse()
        .map_err(|_| TransportError::HostUnreachable(format!("invalid port in {}", endpoint)))?;
    Ok((host.trim_start_matches('[').trim_end_matches(']'), port))
}

/// Connect and authenticate a new SSH session
pub async fn connect(target: &SshTarget, connect_timeout: Duration) -> Result<Session, TransportError> {
    let stream = dial(target, connect_timeout).await?;

    let config = Arc::new(Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    });
    let handler = ClientHandler::new(target.host_key.clone());

    let mut session = timeout(connect_timeout, client::connect_stream(config, stream, handler))
        .await
        .map_err(|_| {
            TransportError::HostUnreachable(format!("{}: SSH handshake timed out", target.endpoint))
        })?
        .map_err(|e| classify_handshake_error(&target.endpoint, e))?;

    tracing::debug!("Authenticating as user '{}'", target.username);
    let authenticated = match &target.credential {
        Credential::Password(password) => session
            .authenticate_password(&target.username, password)
            .await
            .map_err(|e| TransportError::Channel(format!("authentication error: {}", e)))?,
        Credential::KeyFile { path, passphrase } => {
            let key = russh_keys::load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                TransportError::Io(format!("failed to load key {}: {}", path.display(), e))
            })?;
            session
                .authenticate_publickey(&target.username, Arc::new(key))
                .await
                .map_err(|e| TransportError::Channel(format!("authentication error: {}", e)))?
        }
    };

    if !authenticated {
        return Err(TransportError::AuthFailed);
    }

    tracing::debug!("Authenticated to {}", target.endpoint);
    Ok(session)
}

fn classify_handshake_error(endpoint: &str, e: anyhow::Error) -> TransportError {
    if let Some(russh::Error::UnknownKey) = e.downcast_ref::<russh::Error>() {
        return TransportError::HostKeyRejected(format!("{} presented an unexpected key", endpoint));
    }
    TransportError::HostUnreachable(format!("{}: SSH handshake failed: {}", endpoint, e))
}

/// Disconnect a session, ignoring errors
pub async fn close(session: &Session) {
    if let Err(e) = session
        .disconnect(russh::Disconnect::ByApplication, "closing", "en")
        .await
    {
        tracing::debug!("Error while disconnecting SSH session: {}", e);
    }
}
