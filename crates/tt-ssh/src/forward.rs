//! Local port forwarding
//!
//! A forward owns a bound local listener and one SSH session. Every accepted
//! connection gets its own `direct-tcpip` channel to the remote address.

use std::sync::Arc;

use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tt_core::TransportError;

use crate::client::{self, Session};

/// Consecutive channel-open failures before the session is treated as dead
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Bind the local side of a forward, mapping "address in use" distinctly
pub async fn bind_local(local: &str) -> Result<TcpListener, TransportError> {
    TcpListener::bind(local).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => TransportError::LocalPortInUse(local.to_string()),
        _ => TransportError::Io(format!("failed to bind {}: {}", local, e)),
    })
}

/// A running forward
pub struct LocalForward {
    remote: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LocalForward {
    /// Start accepting on `listener`, forwarding to `remote` through `session`
    pub fn spawn(listener: TcpListener, session: Session, remote: String) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(session),
            remote.clone(),
            cancel.clone(),
        ));
        Self {
            remote,
            cancel,
            task: Some(task),
        }
    }

    /// Remote address this forward targets
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Whether the accept loop is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting. Returns once the local listener is released, so the
    /// address can be bound again immediately.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::debug!("Forward to {} ended abnormally: {}", self.remote, e);
            }
        }
    }
}

impl Drop for LocalForward {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<Session>,
    remote: String,
    cancel: CancellationToken,
) {
    let (remote_host, remote_port) = match remote.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse::<u32>().unwrap_or(0)),
        None => (remote.clone(), 0),
    };
    let mut consecutive_failures = 0;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Failed to accept forwarded connection: {}", e);
                continue;
            }
        };

        let channel = match session
            .channel_open_direct_tcpip(
                remote_host.as_str(),
                remote_port,
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
        {
            Ok(channel) => {
                consecutive_failures = 0;
                channel
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    "Failed to open channel to {} ({}/{}): {}",
                    remote,
                    consecutive_failures,
                    MAX_CONSECUTIVE_FAILURES,
                    e
                );
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!("SSH session for {} appears dead, closing forward", remote);
                    break;
                }
                continue;
            }
        };

        tokio::spawn(pipe(stream, channel));
    }

    drop(listener);
    tracing::debug!("Forward to {} stopped", remote);

    // The disconnect round trip must not hold the local address
    tokio::spawn(async move { client::close(&session).await });
}

async fn pipe(mut stream: TcpStream, channel: russh::Channel<russh::client::Msg>) {
    let mut channel_stream = channel.into_stream();
    match copy_bidirectional(&mut stream, &mut channel_stream).await {
        Ok((up, down)) => {
            tracing::trace!("Forwarded connection closed ({} up, {} down)", up, down)
        }
        Err(e) => tracing::debug!("Forwarded connection ended: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_local_in_use() {
        let first = bind_local("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let err = bind_local(&addr).await.unwrap_err();
        assert_eq!(err, TransportError::LocalPortInUse(addr));
    }
}
