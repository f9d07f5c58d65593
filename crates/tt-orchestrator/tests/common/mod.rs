//! Collaborator fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tt_core::config::{FileServerConfig, TargetProfile};
use tt_core::secrets::MemorySecretStore;
use tt_core::{CommandOutput, Credential, Overlay, SshTarget, Transport, TransportError};
use tt_orchestrator::TimingPolicy;

/// Control ports handed out to tests; derived ports must stay below 65536
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

/// A control port no other test uses
pub fn next_control_port() -> u16 {
    30000 + PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Short timeouts so failure paths finish quickly
pub fn fast_timing() -> TimingPolicy {
    TimingPolicy {
        overlay_timeout: Duration::from_millis(200),
        overlay_poll_interval: Duration::from_millis(20),
        readiness_timeout: Duration::from_millis(800),
        probe_interval: Duration::from_millis(40),
        install_timeout: Duration::from_secs(2),
        quick_probe_timeout: Duration::from_secs(1),
        reprobe_delay: Duration::from_millis(10),
    }
}

pub fn test_target() -> SshTarget {
    SshTarget {
        endpoint: "seedbox.example.com:22".to_string(),
        proxy: None,
        username: "adam".to_string(),
        credential: Credential::Password("pw".to_string()),
        host_key: None,
    }
}

/// Profile named `name` with its SSH password present in the returned store
pub fn profile_with_secret(name: &str, control_port: u16) -> (TargetProfile, Arc<MemorySecretStore>) {
    let mut profile = TargetProfile::new("seedbox.example.com");
    profile.name = name.to_string();
    profile.control_port = control_port;
    let secrets = MemorySecretStore::with_entries([(format!("{}.ssh", name).as_str(), "pw")]);
    (profile, Arc::new(secrets))
}

pub fn file_server_config(installer: &Path) -> FileServerConfig {
    FileServerConfig {
        installer_script: installer.to_path_buf(),
        ..FileServerConfig::default()
    }
}

/// Simulated remote host answering the provisioner's commands
#[derive(Default)]
pub struct FakeRemote {
    pub binary_present: AtomicBool,
    pub daemon_running: AtomicBool,
    /// The daemon never comes up after launch
    pub daemon_crashes: AtomicBool,
    /// Installer exits non-zero
    pub installer_fails: AtomicBool,
    /// `sha256sum` reports garbage
    pub corrupt_upload: AtomicBool,
    /// Hash of the last uploaded file
    pub uploaded_hash: Mutex<Option<String>>,
}

impl FakeRemote {
    fn answer(&self, command: &str) -> CommandOutput {
        if command.contains("echo running") {
            let running = self.daemon_running.load(Ordering::SeqCst);
            return CommandOutput::ok(if running { "running\n" } else { "stopped\n" });
        }
        if command.contains("echo present") {
            let present = self.binary_present.load(Ordering::SeqCst);
            return CommandOutput::ok(if present { "present\n" } else { "missing\n" });
        }
        if command.contains("sha256sum") {
            if self.corrupt_upload.load(Ordering::SeqCst) {
                return CommandOutput::ok(format!("{}  file\n", "0".repeat(64)));
            }
            let hash = self.uploaded_hash.lock().unwrap().clone().unwrap_or_default();
            return CommandOutput::ok(format!("{}  file\n", hash));
        }
        if command.contains("TETHER_INSTALL_DIR=") {
            if self.installer_fails.load(Ordering::SeqCst) {
                return CommandOutput {
                    stdout: String::new(),
                    stderr: "download failed".to_string(),
                    exit_status: Some(1),
                };
            }
            self.binary_present.store(true, Ordering::SeqCst);
            return CommandOutput::ok("installed\n");
        }
        CommandOutput::ok("")
    }
}

/// Transport fake. Forwards bind real local listeners so liveness probes work.
#[derive(Default)]
pub struct MockTransport {
    pub remote: FakeRemote,
    /// Every open attempt, as (remote, local, proxy)
    pub opens: Mutex<Vec<(String, String, Option<String>)>>,
    pub closes: Mutex<Vec<String>>,
    pub execs: Mutex<Vec<String>>,
    pub detached: Mutex<Vec<String>>,
    pub uploads: AtomicUsize,
    /// Opens that fail, keyed by local address
    pub failures: Mutex<HashMap<String, TransportError>>,
    /// Opens that succeed without listening
    pub dead: Mutex<Vec<String>>,
    /// When set, opens wait until the matching sender sends `true`
    pub hold: Mutex<Option<watch::Receiver<bool>>>,
    forwards: DashMap<String, JoinHandle<()>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every open block until `true` is sent on the returned sender
    pub fn hold_opens(&self) -> watch::Sender<bool> {
        let (release, held) = watch::channel(false);
        *self.hold.lock().unwrap() = Some(held);
        release
    }

    pub fn fail_open(&self, local: &str, error: TransportError) {
        self.failures
            .lock()
            .unwrap()
            .insert(local.to_string(), error);
    }

    pub fn open_without_listener(&self, local: &str) {
        self.dead.lock().unwrap().push(local.to_string());
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn live_forwards(&self) -> usize {
        self.forwards.len()
    }

    pub fn detached_count(&self) -> usize {
        self.detached.lock().unwrap().len()
    }

    /// Exec commands containing `needle`
    pub fn execs_matching(&self, needle: &str) -> usize {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Wait until at least `n` opens have started
    pub async fn wait_for_opens(&self, n: usize) {
        for _ in 0..200 {
            if self.open_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} opens, saw {}", n, self.open_count());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_forward(
        &self,
        target: &SshTarget,
        remote: &str,
        local: &str,
    ) -> Result<(), TransportError> {
        self.opens.lock().unwrap().push((
            remote.to_string(),
            local.to_string(),
            target.proxy.clone(),
        ));

        let hold = self.hold.lock().unwrap().clone();
        if let Some(mut held) = hold {
            let _ = held.wait_for(|released| *released).await;
        }

        if let Some(err) = self.failures.lock().unwrap().get(local).cloned() {
            return Err(err);
        }
        if self.dead.lock().unwrap().iter().any(|d| d == local) {
            return Ok(());
        }

        if let Some((_, previous)) = self.forwards.remove(local) {
            previous.abort();
            let _ = previous.await;
        }
        let listener = TcpListener::bind(local).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => TransportError::LocalPortInUse(local.to_string()),
            _ => TransportError::Io(e.to_string()),
        })?;
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        self.forwards.insert(local.to_string(), task);
        Ok(())
    }

    async fn close_forward(&self, local: &str) -> Result<(), TransportError> {
        self.closes.lock().unwrap().push(local.to_string());
        if let Some((_, task)) = self.forwards.remove(local) {
            task.abort();
            // The listener is released once the aborted task is reaped
            let _ = task.await;
        }
        Ok(())
    }

    async fn exec(
        &self,
        _target: &SshTarget,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        self.execs.lock().unwrap().push(command.to_string());
        Ok(self.remote.answer(command))
    }

    async fn exec_detached(
        &self,
        _target: &SshTarget,
        command: &str,
    ) -> Result<(), TransportError> {
        self.detached.lock().unwrap().push(command.to_string());
        if !self.remote.daemon_crashes.load(Ordering::SeqCst) {
            self.remote.daemon_running.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn upload(
        &self,
        _target: &SshTarget,
        local_path: &Path,
        _remote_path: &str,
    ) -> Result<(), TransportError> {
        let contents = tokio::fs::read(local_path).await?;
        *self.remote.uploaded_hash.lock().unwrap() = Some(hex::encode(Sha256::digest(&contents)));
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        for entry in self.forwards.iter() {
            entry.value().abort();
        }
    }
}

/// Overlay fake
#[derive(Default)]
pub struct MockOverlay {
    pub connected: AtomicBool,
    /// `connect()` succeeds immediately
    pub connects: bool,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub proxy: Option<String>,
}

impl MockOverlay {
    /// Overlay that never comes up
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Overlay that connects on request and exposes `proxy`
    pub fn working(proxy: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            connects: true,
            proxy: proxy.map(str::to_string),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Overlay for MockOverlay {
    async fn connect(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connects {
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn proxy_address(&self) -> Option<String> {
        self.proxy.clone()
    }
}
