//! Local TCP liveness probing

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

/// Checks that a forwarded local port accepts connections
#[derive(Debug, Clone, Copy)]
pub struct LivenessProbe {
    interval: Duration,
}

impl LivenessProbe {
    /// Create a probe that retries every `interval`
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// One connect attempt to `127.0.0.1:port`. The connection is closed immediately.
    pub async fn check(&self, port: u16) -> bool {
        // A hung connect must not outlive one tick
        match timeout(self.interval, TcpStream::connect(("127.0.0.1", port))).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            _ => false,
        }
    }

    /// Retry [`check`](Self::check) until it succeeds or `limit` elapses
    pub async fn await_ready(&self, port: u16, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.check(port).await {
                return true;
            }
            if Instant::now() + self.interval > deadline {
                return false;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_check_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = LivenessProbe::new(Duration::from_millis(100));
        assert!(probe.check(port).await);
    }

    #[tokio::test]
    async fn test_await_ready_nothing_listening() {
        let probe = LivenessProbe::new(Duration::from_millis(20));
        let port = free_port();

        let started = Instant::now();
        assert!(!probe.await_ready(port, Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_await_ready_within_one_interval_of_listen() {
        let probe = LivenessProbe::new(Duration::from_millis(50));
        let port = free_port();

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let listened_at = Instant::now();
            // Keep the listener alive until the probe is done
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(listener);
            listened_at
        });

        assert!(probe.await_ready(port, Duration::from_secs(2)).await);
        let ready_at = Instant::now();
        let listened_at = server.await.unwrap();
        assert!(ready_at.duration_since(listened_at) <= Duration::from_millis(150));
    }
}
