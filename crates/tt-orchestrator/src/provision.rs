//! Remote provisioning of the file-server daemon
//!
//! Every step runs over the transport's exec channel and is idempotent: a
//! daemon already bound to its port is left alone, a present binary is not
//! reinstalled.

use std::borrow::Cow;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use tt_core::config::FileServerConfig;
use tt_core::time::current_time_millis;
use tt_core::{ProvisionError, ProvisionState, SshTarget, Transport};

use crate::policy::TimingPolicy;

/// Where the installer lands on the remote host, relative to the login directory
const REMOTE_INSTALLER: &str = ".tether/install-file-server.sh";

/// Daemon output on the remote host, relative to the login directory
const REMOTE_LOG: &str = ".tether/file-server.log";

/// Installs and starts the auxiliary file-server daemon
pub struct RemoteProvisioner {
    transport: Arc<dyn Transport>,
    config: FileServerConfig,
    timing: TimingPolicy,
}

impl RemoteProvisioner {
    /// Create a provisioner
    pub fn new(transport: Arc<dyn Transport>, config: FileServerConfig, timing: TimingPolicy) -> Self {
        Self {
            transport,
            config,
            timing,
        }
    }

    /// Make sure a daemon serves `share_path` on remote `port`.
    ///
    /// Returns as soon as a daemon is found on the port. Otherwise installs
    /// the binary if needed, clears the port and launches a fresh daemon.
    pub async fn ensure_file_server(
        &self,
        target: &SshTarget,
        port: u16,
        share_path: &str,
        auth_secret: &str,
    ) -> Result<ProvisionState, ProvisionError> {
        if self.is_listening(target, port).await? {
            tracing::info!("File server already running on remote port {}", port);
            return Ok(ProvisionState {
                port,
                binary_present: true,
                daemon_running: true,
                last_checked_at: current_time_millis(),
            });
        }

        if !self.binary_present(target).await? {
            tracing::info!(
                "{} not found at {}, installing",
                self.config.binary,
                self.config.install_path()
            );
            self.install(target).await?;
        }

        self.stop_stale(target, port).await;
        self.launch(target, port, share_path, auth_secret).await?;

        tokio::time::sleep(self.timing.reprobe_delay).await;
        let daemon_running = match self.is_listening(target, port).await {
            Ok(true) => {
                tracing::info!("File server started on remote port {}", port);
                true
            }
            Ok(false) => {
                tracing::warn!(
                    "File server not yet listening on remote port {} (see ~/{})",
                    port,
                    REMOTE_LOG
                );
                false
            }
            Err(e) => {
                tracing::warn!("Could not re-probe file server: {}", e);
                false
            }
        };

        Ok(ProvisionState {
            port,
            binary_present: true,
            daemon_running,
            last_checked_at: current_time_millis(),
        })
    }

    /// Whether anything listens on remote `port`
    async fn is_listening(&self, target: &SshTarget, port: u16) -> Result<bool, ProvisionError> {
        let command = format!(
            "if command -v ss >/dev/null 2>&1; then ss -ltnH 'sport = :{port}' | grep -q .; \
             else lsof -nP -iTCP:{port} -sTCP:LISTEN >/dev/null 2>&1; fi \
             && echo running || echo stopped"
        );
        let output = self
            .transport
            .exec(target, &command, self.timing.quick_probe_timeout)
            .await?;
        Ok(output.trimmed() == "running")
    }

    async fn binary_present(&self, target: &SshTarget) -> Result<bool, ProvisionError> {
        let command = format!(
            "test -x {} && echo present || echo missing",
            shell_path(&self.config.install_path())
        );
        let output = self
            .transport
            .exec(target, &command, self.timing.quick_probe_timeout)
            .await?;
        Ok(output.trimmed() == "present")
    }

    async fn install(&self, target: &SshTarget) -> Result<(), ProvisionError> {
        let script = &self.config.installer_script;
        let contents = tokio::fs::read(script).await.map_err(|e| {
            ProvisionError::InstallFailed(format!(
                "installer script {} unreadable: {}",
                script.display(),
                e
            ))
        })?;
        let expected = hex::encode(Sha256::digest(&contents));

        self.transport
            .upload(target, script, REMOTE_INSTALLER)
            .await
            .map_err(|e| ProvisionError::InstallFailed(format!("upload failed: {}", e)))?;

        self.verify_upload(target, &expected).await?;

        let command = format!(
            "TETHER_INSTALL_DIR={} sh {}",
            shell_path(&self.config.install_dir),
            quote(REMOTE_INSTALLER)
        );
        tracing::debug!("Running installer: {}", command);
        let output = self
            .transport
            .exec(target, &command, self.timing.install_timeout)
            .await
            .map_err(|e| ProvisionError::InstallFailed(e.to_string()))?;
        if !output.success() {
            return Err(ProvisionError::InstallFailed(format!(
                "installer exited with {:?}: {}",
                output.exit_status,
                output.stderr.trim()
            )));
        }

        if !self.binary_present(target).await? {
            return Err(ProvisionError::InstallFailed(format!(
                "installer finished but {} is missing",
                self.config.install_path()
            )));
        }

        tracing::info!("Installed {} on {}", self.config.binary, target.endpoint);
        Ok(())
    }

    /// Compare the remote checksum when `sha256sum` is available
    async fn verify_upload(&self, target: &SshTarget, expected: &str) -> Result<(), ProvisionError> {
        let command = format!(
            "command -v sha256sum >/dev/null 2>&1 && sha256sum {} || true",
            quote(REMOTE_INSTALLER)
        );
        let output = self
            .transport
            .exec(target, &command, self.timing.quick_probe_timeout)
            .await?;

        match output.stdout.split_whitespace().next() {
            Some(actual) if actual != expected => Err(ProvisionError::InstallFailed(format!(
                "installer checksum mismatch (expected {}, got {})",
                expected, actual
            ))),
            Some(_) => Ok(()),
            None => {
                tracing::debug!("sha256sum unavailable, skipping installer checksum");
                Ok(())
            }
        }
    }

    /// Kill whatever holds the port. Failures are ignored.
    async fn stop_stale(&self, target: &SshTarget, port: u16) {
        let command = stale_kill_command(port);
        if let Err(e) = self
            .transport
            .exec(target, &command, self.timing.quick_probe_timeout)
            .await
        {
            tracing::debug!("Clearing remote port {} failed: {}", port, e);
        }
    }

    async fn launch(
        &self,
        target: &SshTarget,
        port: u16,
        share_path: &str,
        auth_secret: &str,
    ) -> Result<(), ProvisionError> {
        let credential = format!("{}:{}@/:rw", self.config.auth_user, auth_secret);
        let command = format!(
            "mkdir -p .tether && nohup {} {} --bind 127.0.0.1 --port {} --auth {} --allow-all > {} 2>&1 &",
            shell_path(&self.config.install_path()),
            shell_path(share_path),
            port,
            quote(&credential),
            quote(REMOTE_LOG),
        );
        tracing::debug!("Launching file server: {}", redact(&command, auth_secret));

        self.transport
            .exec_detached(target, &command)
            .await
            .map_err(|e| ProvisionError::DaemonStartFailed(e.to_string()))
    }
}

/// Free `port` on the remote host. The `[-]` keeps pkill from matching the
/// shell that runs this command; the trailing group stops `--port 1909`
/// from matching `--port 19091`.
fn stale_kill_command(port: u16) -> String {
    format!(
        "fuser -k -n tcp {port} >/dev/null 2>&1; pkill -f -- '[-]-port {port}( |$)' >/dev/null 2>&1; true"
    )
}

fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::Borrowed(value))
}

/// Quote a remote path while leaving a leading `~` or `$HOME` expandable
pub(crate) fn shell_path(path: &str) -> String {
    let rest = path
        .strip_prefix("$HOME")
        .or_else(|| path.strip_prefix('~'))
        .filter(|rest| rest.is_empty() || rest.starts_with('/'));

    match rest {
        Some("") | Some("/") => "\"$HOME\"".to_string(),
        Some(rest) => format!("\"$HOME\"/{}", quote(rest.trim_start_matches('/'))),
        None => quote(path).into_owned(),
    }
}

fn redact(command: &str, secret: &str) -> String {
    if secret.is_empty() {
        return command.to_string();
    }
    command.replace(secret, "***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_kill_pattern_skips_own_shell() {
        let command = stale_kill_command(19091);
        assert!(command.contains("'[-]-port 19091( |$)'"));
        assert!(!command.contains("'--port 19091'"));
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_kill_command_survives_its_own_shell() {
        // Port 1 is never held by a test daemon
        let script = format!("{}; echo cleared", stale_kill_command(1));
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&script)
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "cleared");
    }

    #[test]
    fn test_shell_path_keeps_home_expandable() {
        assert_eq!(shell_path("$HOME/.local/bin/dufs"), "\"$HOME\"/.local/bin/dufs");
        assert_eq!(shell_path("~/Downloads"), "\"$HOME\"/Downloads");
        assert_eq!(shell_path("~"), "\"$HOME\"");
        assert_eq!(shell_path("/srv/media"), "/srv/media");
    }

    #[test]
    fn test_shell_path_quotes_spaces_and_metacharacters() {
        assert_eq!(shell_path("/srv/my media"), "'/srv/my media'");
        assert_eq!(shell_path("~/a;b"), "\"$HOME\"/'a;b'");
        // Not a home prefix
        assert_eq!(shell_path("$HOMEBREW"), "'$HOMEBREW'");
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("--auth tether:s3cret@/:rw", "s3cret"),
            "--auth tether:***@/:rw"
        );
        assert_eq!(redact("no secret", ""), "no secret");
    }
}
