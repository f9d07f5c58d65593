//! Connection orchestrator
//!
//! Sequences one connection attempt: overlay gate, concurrent tunnel opens,
//! background provisioning of the file daemon, then the readiness loop.
//!
//! # Attempt generations
//!
//! Every attempt gets a generation number and a [`CancellationToken`].
//! `disconnect()` and a connect for another profile bump the generation and
//! cancel the token. All writes to the registry and the phase go through the
//! session lock and are dropped when their generation is no longer current, so
//! an open that completes after a disconnect can never resurrect a tunnel.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tt_core::config::{FileServerConfig, OverlayMode, TargetProfile};
use tt_core::secrets::generate_secret;
use tt_core::{
    ConnectionPhase, OrchestratorError, Overlay, ProvisionError, ProvisionState, SecretStore,
    Transport, TransportError, TunnelId, TunnelPhase, TunnelSpec, TunnelState,
};

use crate::driver::TunnelDriver;
use crate::events::{ConnectionStatus, OrchestratorEvent};
use crate::overlay::OverlayGate;
use crate::plan::ConnectionPlan;
use crate::policy::TimingPolicy;
use crate::probe::LivenessProbe;
use crate::provision::RemoteProvisioner;
use crate::registry::TunnelRegistry;
use crate::share::{RpcAuth, ShareResolver};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 64;

/// Top-level coordinator. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ConnectionOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    secrets: Arc<dyn SecretStore>,
    resolver: Arc<dyn ShareResolver>,
    timing: TimingPolicy,
    registry: TunnelRegistry,
    driver: TunnelDriver,
    gate: OverlayGate,
    probe: LivenessProbe,
    provisioner: RemoteProvisioner,
    session: Mutex<Session>,
    events: broadcast::Sender<OrchestratorEvent>,
}

/// Mutable orchestrator state, guarded by one lock
struct Session {
    generation: u64,
    phase: ConnectionPhase,
    profile: Option<String>,
    last_error: Option<String>,
    cancel: CancellationToken,
    /// Specs of the current attempt, kept so teardown can close them
    tunnels: Vec<TunnelSpec>,
    provision: Option<ProvisionState>,
}

impl Session {
    fn new() -> Self {
        Self {
            generation: 0,
            phase: ConnectionPhase::Disconnected,
            profile: None,
            last_error: None,
            cancel: CancellationToken::new(),
            tunnels: Vec::new(),
            provision: None,
        }
    }
}

/// Identity of one connection attempt
#[derive(Clone)]
struct Attempt {
    generation: u64,
    cancel: CancellationToken,
}

/// Everything the background provisioning task needs
#[derive(Clone)]
struct FileServerJob {
    attempt: Attempt,
    control: TunnelSpec,
    remote_port: u16,
    fallback_share: Option<String>,
    rpc_auth: Option<RpcAuth>,
    secret_key: String,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator with the default timing policy
    pub fn new(
        transport: Arc<dyn Transport>,
        overlay: Arc<dyn Overlay>,
        secrets: Arc<dyn SecretStore>,
        resolver: Arc<dyn ShareResolver>,
        file_server: FileServerConfig,
    ) -> Self {
        Self::with_policy(
            transport,
            overlay,
            secrets,
            resolver,
            file_server,
            TimingPolicy::default(),
        )
    }

    /// Create an orchestrator with explicit timeouts
    pub fn with_policy(
        transport: Arc<dyn Transport>,
        overlay: Arc<dyn Overlay>,
        secrets: Arc<dyn SecretStore>,
        resolver: Arc<dyn ShareResolver>,
        file_server: FileServerConfig,
        timing: TimingPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                secrets,
                resolver,
                timing,
                registry: TunnelRegistry::new(),
                driver: TunnelDriver::new(transport.clone(), overlay.clone()),
                gate: OverlayGate::new(overlay, timing.overlay_poll_interval),
                probe: LivenessProbe::new(timing.probe_interval),
                provisioner: RemoteProvisioner::new(transport, file_server, timing),
                session: Mutex::new(Session::new()),
                events,
            }),
        }
    }

    /// Connect to `profile` and wait until every gating tunnel is ready.
    ///
    /// Returns immediately while an attempt for the same profile is running
    /// or already connected. A different profile tears the current connection
    /// down first. An attempt superseded by `disconnect()` returns `Ok`.
    pub async fn connect(&self, profile: &TargetProfile) -> Result<(), OrchestratorError> {
        self.inner.clone().connect(profile).await
    }

    /// Run [`connect`](Self::connect) on a background task
    pub fn spawn_connect(
        &self,
        profile: TargetProfile,
    ) -> JoinHandle<Result<(), OrchestratorError>> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.connect(&profile).await })
    }

    /// Stop every tunnel and return to Disconnected. Safe to call at any time.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Snapshot of phase, tunnels and provisioning
    pub async fn status(&self) -> ConnectionStatus {
        let session = self.inner.session.lock().await;
        ConnectionStatus {
            phase: session.phase,
            profile: session.profile.clone(),
            last_error: session.last_error.clone(),
            tunnels: self.inner.registry.list(),
            provision: session.provision.clone(),
        }
    }

    /// Current phase
    pub async fn phase(&self) -> ConnectionPhase {
        self.inner.session.lock().await.phase
    }

    /// Receive every subsequent event
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Local port of an Active tunnel
    pub fn local_port(&self, id: &TunnelId) -> Option<u16> {
        self.inner
            .registry
            .get(id)
            .filter(TunnelState::is_active)
            .and_then(|state| state.local_port)
    }

    /// Read access to the tunnel registry
    pub fn registry(&self) -> &TunnelRegistry {
        &self.inner.registry
    }
}

impl Inner {
    async fn connect(self: Arc<Self>, profile: &TargetProfile) -> Result<(), OrchestratorError> {
        let (attempt, superseded) = {
            let mut session = self.session.lock().await;
            let same_profile = session.profile.as_deref() == Some(profile.name.as_str());
            if same_profile && session.phase != ConnectionPhase::Disconnected {
                tracing::debug!("Already {} to {}", session.phase, profile.name);
                return Ok(());
            }

            let superseded = self.teardown(&mut session);
            session.phase = ConnectionPhase::Connecting;
            session.profile = Some(profile.name.clone());
            session.last_error = None;
            self.emit_phase(&session);

            let attempt = Attempt {
                generation: session.generation,
                cancel: session.cancel.clone(),
            };
            (attempt, superseded)
        };

        if !superseded.is_empty() {
            tracing::info!("Closing previous tunnels before connecting to {}", profile.name);
            for spec in &superseded {
                self.driver.close(spec).await;
            }
        }

        tracing::info!("Connecting to {} ({})", profile.name, profile.ssh_endpoint());
        self.run_attempt(profile, &attempt).await
    }

    async fn run_attempt(
        self: Arc<Self>,
        profile: &TargetProfile,
        attempt: &Attempt,
    ) -> Result<(), OrchestratorError> {
        let plan = match profile
            .ssh_target(self.secrets.as_ref())
            .map_err(|e| OrchestratorError::InvalidProfile(e.to_string()))
            .and_then(|target| ConnectionPlan::for_profile(profile, &target))
        {
            Ok(plan) => plan,
            Err(e) => return self.abort(attempt, e, &[]).await,
        };

        if profile.overlay == OverlayMode::Disabled {
            self.gate.release().await;
        }

        let gated = tokio::select! {
            _ = attempt.cancel.cancelled() => return Ok(()),
            gated = self.gate.ensure_ready(profile.requires_overlay(), self.timing.overlay_timeout) => gated,
        };
        if let Err(e) = gated {
            return self.abort(attempt, e.into(), &[]).await;
        }

        {
            let mut session = self.session.lock().await;
            if session.generation != attempt.generation {
                return Ok(());
            }
            session.tunnels = plan.tunnels.clone();
            for spec in &plan.tunnels {
                if self.registry.set_connecting(&spec.id) {
                    self.emit_tunnel(&spec.id);
                }
            }
        }

        let file_job = self.file_server_job(profile, &plan, attempt);
        let opens = plan.tunnels.iter().map(|spec| {
            let this = self.clone();
            let job = file_job
                .clone()
                .filter(|_| spec.id.as_str() == TunnelId::CONTROL);
            async move {
                let result = this.driver.open(spec).await;
                let active = this.commit_open(attempt, spec, result).await;
                if let (true, Some(job)) = (active, job) {
                    tokio::spawn(this.clone().provision(job));
                }
            }
        });
        join_all(opens).await;

        self.await_readiness(&plan, attempt).await
    }

    /// Probe every gating tunnel each tick until all pass or the deadline hits
    async fn await_readiness(
        &self,
        plan: &ConnectionPlan,
        attempt: &Attempt,
    ) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + self.timing.readiness_timeout;
        loop {
            if attempt.cancel.is_cancelled() {
                return Ok(());
            }

            let pending = self.pending_tunnels(&plan.tunnels).await;
            if pending.is_empty() {
                return self.commit_connected(attempt).await;
            }

            if Instant::now() + self.timing.probe_interval > deadline {
                let detail = pending
                    .iter()
                    .map(|(id, reason)| format!("{}: {}", id, reason))
                    .collect::<Vec<_>>()
                    .join(", ");
                let err = OrchestratorError::ReadinessTimeout {
                    timeout: self.timing.readiness_timeout,
                    detail,
                };
                return self.abort(attempt, err, &pending).await;
            }

            tokio::select! {
                _ = attempt.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.timing.probe_interval) => {}
            }
        }
    }

    /// Gating tunnels not ready this tick, with the reason
    async fn pending_tunnels(&self, specs: &[TunnelSpec]) -> Vec<(TunnelId, String)> {
        let mut pending = Vec::new();
        for spec in specs {
            let Some(state) = self.registry.get(&spec.id) else {
                pending.push((spec.id.clone(), "not registered".to_string()));
                continue;
            };

            // Best-effort tunnels stop gating once they fail
            if !spec.essential && state.phase == TunnelPhase::Failed {
                continue;
            }

            match (state.phase, state.local_port) {
                (TunnelPhase::Active, Some(port)) => {
                    if !self.probe.check(port).await {
                        pending.push((
                            spec.id.clone(),
                            format!("127.0.0.1:{} not accepting connections", port),
                        ));
                    }
                }
                (TunnelPhase::Failed, _) => pending.push((
                    spec.id.clone(),
                    state.last_error.unwrap_or_else(|| "failed".to_string()),
                )),
                (phase, _) => pending.push((spec.id.clone(), phase.to_string())),
            }
        }
        pending
    }

    /// Record an open result. Returns true if the tunnel is now Active.
    async fn commit_open(
        &self,
        attempt: &Attempt,
        spec: &TunnelSpec,
        result: Result<u16, TransportError>,
    ) -> bool {
        let session = self.session.lock().await;

        if session.generation != attempt.generation {
            let claimed = session
                .tunnels
                .iter()
                .any(|t| t.local_address == spec.local_address);
            drop(session);
            if result.is_ok() {
                tracing::debug!("Discarding stale open of tunnel {}", spec.id);
                if !claimed {
                    self.driver.close(spec).await;
                }
            }
            return false;
        }

        match result {
            Ok(port) => {
                if self.registry.set_active(&spec.id, port) {
                    tracing::info!(
                        "Tunnel {} active: 127.0.0.1:{} -> {}",
                        spec.id,
                        port,
                        spec.remote_address
                    );
                    self.emit_tunnel(&spec.id);
                    true
                } else {
                    // Failed by provisioning while the open was in flight
                    drop(session);
                    self.driver.close(spec).await;
                    false
                }
            }
            Err(e) => {
                tracing::warn!("Tunnel {} failed: {}", spec.id, e);
                if self.registry.set_failed(&spec.id, e.to_string()) {
                    self.emit_tunnel(&spec.id);
                }
                false
            }
        }
    }

    async fn commit_connected(&self, attempt: &Attempt) -> Result<(), OrchestratorError> {
        let mut session = self.session.lock().await;
        if session.generation != attempt.generation {
            return Ok(());
        }
        session.phase = ConnectionPhase::Connected;
        tracing::info!(
            "Connected to {}",
            session.profile.as_deref().unwrap_or_default()
        );
        self.emit_phase(&session);
        Ok(())
    }

    /// Move a current attempt to Disconnected with `err`
    async fn abort(
        &self,
        attempt: &Attempt,
        err: OrchestratorError,
        unreachable: &[(TunnelId, String)],
    ) -> Result<(), OrchestratorError> {
        let mut session = self.session.lock().await;
        if session.generation != attempt.generation {
            return Ok(());
        }

        for (id, reason) in unreachable {
            if self.registry.set_failed(id, reason.clone()) {
                self.emit_tunnel(id);
            }
        }

        tracing::warn!("Connection attempt failed: {}", err);
        session.phase = ConnectionPhase::Disconnected;
        session.last_error = Some(err.to_string());
        self.emit_phase(&session);
        Err(err)
    }

    async fn disconnect(&self) {
        let tunnels = {
            let mut session = self.session.lock().await;
            let previous = session.phase;
            let tunnels = self.teardown(&mut session);
            session.phase = ConnectionPhase::Disconnected;
            session.profile = None;
            session.last_error = None;
            if previous != ConnectionPhase::Disconnected {
                self.emit_phase(&session);
            }
            tunnels
        };

        for spec in &tunnels {
            self.driver.close(spec).await;
        }
        if !tunnels.is_empty() {
            tracing::info!("Disconnected, closed {} tunnel(s)", tunnels.len());
        }
    }

    /// Invalidate the current attempt and forget its tunnels. Caller holds the lock.
    fn teardown(&self, session: &mut Session) -> Vec<TunnelSpec> {
        session.generation += 1;
        session.cancel.cancel();
        session.cancel = CancellationToken::new();
        session.provision = None;

        for state in self.registry.clear() {
            self.emit(OrchestratorEvent::TunnelChanged(TunnelState::idle(state.id)));
        }
        std::mem::take(&mut session.tunnels)
    }

    fn file_server_job(
        &self,
        profile: &TargetProfile,
        plan: &ConnectionPlan,
        attempt: &Attempt,
    ) -> Option<FileServerJob> {
        if !plan.wants_file_server() {
            return None;
        }
        let rpc_auth = profile.rpc_username.as_ref().map(|username| RpcAuth {
            username: username.clone(),
            password: self
                .secrets
                .get(&profile.rpc_secret_key())
                .unwrap_or_default(),
        });

        Some(FileServerJob {
            attempt: attempt.clone(),
            control: plan.control()?.clone(),
            remote_port: plan.ports.remote_daemon,
            fallback_share: profile.share_path.clone(),
            rpc_auth,
            secret_key: profile.file_server_secret_key(),
        })
    }

    /// Background provisioning task, started once the control tunnel is up
    async fn provision(self: Arc<Self>, job: FileServerJob) {
        let secret = self.file_server_secret(&job.secret_key);
        let share = self.share_directory(&job).await;

        let target = match self.driver.resolve_target(&job.control).await {
            Ok(target) => target,
            Err(e) => return self.commit_provision(&job.attempt, Err(e.into())).await,
        };

        tracing::info!("Provisioning file server on remote port {}", job.remote_port);
        let result = tokio::select! {
            _ = job.attempt.cancel.cancelled() => return,
            result = self.provisioner.ensure_file_server(&target, job.remote_port, &share, &secret) => result,
        };
        self.commit_provision(&job.attempt, result).await;
    }

    async fn commit_provision(
        &self,
        attempt: &Attempt,
        result: Result<ProvisionState, ProvisionError>,
    ) {
        let mut session = self.session.lock().await;
        if session.generation != attempt.generation {
            return;
        }

        match result {
            Ok(state) => {
                session.provision = Some(state.clone());
                self.emit(OrchestratorEvent::Provisioned(state));
            }
            Err(e) => {
                tracing::warn!("File server provisioning failed: {}", e);
                let files = TunnelId::files();
                if self
                    .registry
                    .set_failed(&files, format!("provisioning failed: {}", e))
                {
                    self.emit_tunnel(&files);
                }
                self.emit(OrchestratorEvent::ProvisionFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Stored basic-auth secret, generated and stored on first use
    fn file_server_secret(&self, key: &str) -> String {
        if let Some(secret) = self.secrets.get(key) {
            return secret;
        }
        let secret = generate_secret();
        match self.secrets.set(key, &secret) {
            Ok(()) => tracing::info!("Generated file server secret '{}'", key),
            Err(e) => tracing::warn!("Could not store file server secret '{}': {}", key, e),
        }
        secret
    }

    /// Ask the control service, falling back to the profile, then the login directory
    async fn share_directory(&self, job: &FileServerJob) -> String {
        let fallback = || job.fallback_share.clone().unwrap_or_else(|| "~".to_string());

        match self
            .resolver
            .share_directory(&job.control.local_address, job.rpc_auth.as_ref())
            .await
        {
            Ok(Some(dir)) => {
                tracing::debug!("Control service reports share directory {}", dir);
                dir
            }
            Ok(None) => fallback(),
            Err(e) => {
                tracing::warn!("Could not query share directory: {}", e);
                fallback()
            }
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_phase(&self, session: &Session) {
        self.emit(OrchestratorEvent::PhaseChanged {
            phase: session.phase,
            error: session.last_error.clone(),
        });
    }

    fn emit_tunnel(&self, id: &TunnelId) {
        if let Some(state) = self.registry.get(id) {
            self.emit(OrchestratorEvent::TunnelChanged(state));
        }
    }
}
