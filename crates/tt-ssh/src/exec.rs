//! Remote command execution over session channels

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use russh::ChannelMsg;
use tokio::time::timeout;

use tt_core::{CommandOutput, TransportError};

use crate::client::Session;

/// How long a detached launch may take to hand back its shell
const DETACH_GRACE: Duration = Duration::from_secs(3);

/// Run `command` and collect stdout, stderr and the exit status
pub async fn run(
    session: &Session,
    command: &str,
    limit: Duration,
) -> Result<CommandOutput, TransportError> {
    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| TransportError::Channel(format!("failed to open channel: {}", e)))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| TransportError::Channel(format!("failed to execute command: {}", e)))?;

    let collect = async {
        let mut output = CommandOutput::default();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // ExitStatus may arrive before or after Eof; read until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }

        output.stdout = String::from_utf8_lossy(&stdout).into_owned();
        output.stderr = String::from_utf8_lossy(&stderr).into_owned();
        output
    };

    match timeout(limit, collect).await {
        Ok(output) => Ok(output),
        Err(_) => {
            let _ = channel.close().await;
            Err(TransportError::CommandTimeout(limit))
        }
    }
}

/// Start `command` and return without waiting for it to exit
pub async fn run_detached(session: &Session, command: &str) -> Result<(), TransportError> {
    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| TransportError::Channel(format!("failed to open channel: {}", e)))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| TransportError::Channel(format!("failed to execute command: {}", e)))?;

    // Give the server a moment to acknowledge, but never wait for the process
    let ack = async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Success | ChannelMsg::ExitStatus { .. } => return true,
                ChannelMsg::Failure => return false,
                _ => {}
            }
        }
        true
    };

    match timeout(DETACH_GRACE, ack).await {
        Ok(false) => Err(TransportError::Channel(
            "server refused the exec request".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Stream a local file into `remote_path` through `cat`
pub async fn upload(
    session: &Session,
    local_path: &Path,
    remote_path: &str,
    limit: Duration,
) -> Result<(), TransportError> {
    let contents = tokio::fs::read(local_path).await.map_err(|e| {
        TransportError::Io(format!("failed to read {}: {}", local_path.display(), e))
    })?;

    let quoted = shell_escape::escape(Cow::Borrowed(remote_path));
    let command = match remote_path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => format!(
            "mkdir -p {} && cat > {}",
            shell_escape::escape(Cow::Borrowed(dir)),
            quoted
        ),
        _ => format!("cat > {}", quoted),
    };

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| TransportError::Channel(format!("failed to open channel: {}", e)))?;
    channel
        .exec(true, command.as_str())
        .await
        .map_err(|e| TransportError::Channel(format!("failed to start upload: {}", e)))?;
    channel
        .data(&contents[..])
        .await
        .map_err(|e| TransportError::Channel(format!("failed to send file data: {}", e)))?;
    channel
        .eof()
        .await
        .map_err(|e| TransportError::Channel(format!("failed to finish upload: {}", e)))?;

    let finish = async {
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            if let ChannelMsg::ExitStatus { exit_status: code } = msg {
                exit_status = Some(code);
            }
        }
        exit_status
    };

    match timeout(limit, finish).await {
        Ok(Some(0)) => {
            tracing::debug!(
                "Uploaded {} ({} bytes) to {}",
                local_path.display(),
                contents.len(),
                remote_path
            );
            Ok(())
        }
        Ok(code) => Err(TransportError::Channel(format!(
            "upload to {} exited with {:?}",
            remote_path, code
        ))),
        Err(_) => Err(TransportError::CommandTimeout(limit)),
    }
}
