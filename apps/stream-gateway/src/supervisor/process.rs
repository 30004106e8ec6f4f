use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TranscodeConfig;
use crate::CameraId;

/// Outcome of a transcoder process once it is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExitOutcome {
    /// Exit code 0.
    Clean,
    /// Non-zero exit or wait failure, with a message for the status record.
    Crashed(String),
    /// Terminated through the kill token.
    Killed,
}

/// Exit notification sent from a process monitor task to the supervisor.
#[derive(Debug)]
pub(crate) struct ProcessExit {
    pub camera_id: CameraId,
    pub generation: u64,
    pub outcome: ExitOutcome,
}

pub(crate) struct SpawnedProcess {
    pub pid: Option<u32>,
    pub kill: CancellationToken,
}

/// Expand the fixed argument template for one camera.
pub(crate) fn build_args(template: &[String], input: &str, output: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{input}", input).replace("{output}", output))
        .collect()
}

/// Spawn the transcoder for a camera and hand its lifetime to a monitor
/// task. The monitor owns the child; it reports the exit (or completes a
/// kill request) over `exit_tx`, so the supervisor never polls.
pub(crate) async fn spawn_transcoder(
    config: &TranscodeConfig,
    camera_id: CameraId,
    source_url: &str,
    generation: u64,
    exit_tx: mpsc::UnboundedSender<ProcessExit>,
) -> crate::Result<SpawnedProcess> {
    let output_dir = config.output_dir(camera_id);
    ensure_output_dir(&output_dir).await?;

    let playlist = config.playlist_path(camera_id);
    let args = build_args(
        &config.arg_template,
        source_url,
        &playlist.to_string_lossy(),
    );

    debug!(camera_id, transcoder = ?config.transcoder_path, ?args, "Spawning transcoder");

    let mut child = Command::new(&config.transcoder_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            crate::GatewayError::TranscoderError(format!(
                "Failed to spawn {:?}: {}",
                config.transcoder_path, e
            ))
        })?;

    let pid = child.id();
    let kill = CancellationToken::new();
    let monitor_kill = kill.clone();
    let grace = Duration::from_secs(config.stop_grace_seconds);

    tokio::spawn(async move {
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => ExitOutcome::Clean,
                Ok(status) => ExitOutcome::Crashed(format!("transcoder exited with {}", status)),
                Err(e) => ExitOutcome::Crashed(format!("wait failed: {}", e)),
            },
            _ = monitor_kill.cancelled() => {
                if let Err(e) = child.start_kill() {
                    warn!(camera_id, "Failed to signal transcoder: {}", e);
                }
                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    warn!(camera_id, "Transcoder ignored termination, killing");
                    let _ = child.kill().await;
                }
                ExitOutcome::Killed
            }
        };

        debug!(camera_id, generation, ?outcome, "Transcoder process gone");
        let _ = exit_tx.send(ProcessExit {
            camera_id,
            generation,
            outcome,
        });
    });

    Ok(SpawnedProcess { pid, kill })
}

async fn ensure_output_dir(dir: &Path) -> crate::Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        crate::GatewayError::TranscoderError(format!(
            "Failed to create output directory {:?}: {}",
            dir, e
        ))
    })
}
