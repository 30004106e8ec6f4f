use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::TranscodeConfig;
use crate::control::{StartOutcome, StopOutcome, StreamControl};
use crate::status::{StatusStore, StreamState, StreamStatusRecord};
use crate::CameraId;

pub mod registry;
mod process;

pub use registry::{ActiveStream, StreamRegistry};

use process::{ExitOutcome, ProcessExit};

/// Lifecycle events fanned out to the event hub and to anyone else who
/// subscribes.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Started { camera_id: CameraId },
    Stopped { camera_id: CameraId },
    Error { camera_id: CameraId, message: String },
}

enum Command {
    Start {
        camera_id: CameraId,
        source_url: String,
        reply: oneshot::Sender<crate::Result<StartOutcome>>,
    },
    Stop {
        camera_id: CameraId,
        reply: oneshot::Sender<StopOutcome>,
    },
}

/// Owns one transcoder subprocess per camera.
///
/// All registry mutation happens on a single task that consumes typed
/// commands and process-exit notifications from channels; the public
/// methods are thin senders. Retry policy deliberately lives elsewhere:
/// a spawn failure is reported once, not respawned here.
pub struct TranscodeSupervisor {
    cmd_tx: mpsc::Sender<Command>,
    registry: Arc<StreamRegistry>,
    status: Arc<StatusStore>,
    events: broadcast::Sender<StreamEvent>,
}

struct SupervisorLoop {
    config: TranscodeConfig,
    registry: Arc<StreamRegistry>,
    status: Arc<StatusStore>,
    events: broadcast::Sender<StreamEvent>,
    exit_tx: mpsc::UnboundedSender<ProcessExit>,
    next_generation: u64,
}

impl TranscodeSupervisor {
    pub fn new(config: TranscodeConfig, status: Arc<StatusStore>) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ProcessExit>();
        let (events, _) = broadcast::channel(256);
        let registry = Arc::new(StreamRegistry::new());

        let mut state = SupervisorLoop {
            config,
            registry: registry.clone(),
            status: status.clone(),
            events: events.clone(),
            exit_tx,
            next_generation: 0,
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Start { camera_id, source_url, reply }) => {
                            let outcome = state.handle_start(camera_id, source_url).await;
                            let _ = reply.send(outcome);
                        }
                        Some(Command::Stop { camera_id, reply }) => {
                            let outcome = state.handle_stop(camera_id).await;
                            let _ = reply.send(outcome);
                        }
                        None => break,
                    },
                    Some(exit) = exit_rx.recv() => {
                        state.handle_exit(exit).await;
                    }
                }
            }
            debug!("Supervisor loop terminated");
        });

        Self {
            cmd_tx,
            registry,
            status,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Stop every live stream, used during shutdown.
    pub async fn stop_all(&self) {
        for stream in self.registry.snapshot() {
            if let Ok(outcome) = self.stop_stream(stream.camera_id).await {
                debug!(camera_id = stream.camera_id, status = outcome.label(), "Shutdown stop");
            }
        }
    }
}

#[async_trait]
impl StreamControl for TranscodeSupervisor {
    async fn start_stream(
        &self,
        camera_id: CameraId,
        source_url: &str,
    ) -> crate::Result<StartOutcome> {
        // Configuration errors are rejected before anything is spawned.
        if source_url.trim().is_empty() {
            return Err(crate::GatewayError::ConfigError(format!(
                "Camera {} has no source URL",
                camera_id
            )));
        }

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start {
                camera_id,
                source_url: source_url.to_string(),
                reply,
            })
            .await
            .map_err(|_| supervisor_gone())?;
        rx.await.map_err(|_| supervisor_gone())?
    }

    async fn stop_stream(&self, camera_id: CameraId) -> crate::Result<StopOutcome> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { camera_id, reply })
            .await
            .map_err(|_| supervisor_gone())?;
        rx.await.map_err(|_| supervisor_gone())
    }

    async fn stream_status(
        &self,
        camera_id: CameraId,
    ) -> crate::Result<Option<StreamStatusRecord>> {
        self.status.get(camera_id).await
    }
}

fn supervisor_gone() -> crate::GatewayError {
    crate::GatewayError::ControlError("supervisor is not running".to_string())
}

impl SupervisorLoop {
    async fn handle_start(
        &mut self,
        camera_id: CameraId,
        source_url: String,
    ) -> crate::Result<StartOutcome> {
        if let Some(active) = self.registry.get(camera_id) {
            if active.source_url == source_url {
                debug!(camera_id, "Transcoder already running for this source");
                return Ok(StartOutcome::AlreadyRunning);
            }
            // The old process is authoritative until torn down; remove the
            // entry first so its exit notification is recognized as stale.
            info!(camera_id, "Replacing transcoder for new source URL");
            self.registry.remove(camera_id);
            active.kill.cancel();
        }

        self.status
            .upsert(camera_id, StreamState::Starting, None)
            .await?;

        self.next_generation += 1;
        let generation = self.next_generation;

        let spawn = tokio::time::timeout(
            self.config.spawn_timeout(),
            process::spawn_transcoder(
                &self.config,
                camera_id,
                &source_url,
                generation,
                self.exit_tx.clone(),
            ),
        )
        .await;

        let spawned = match spawn {
            Ok(Ok(spawned)) => spawned,
            Ok(Err(e)) => return self.start_failed(camera_id, e.to_string()).await,
            Err(_) => {
                return self
                    .start_failed(camera_id, "spawn confirmation timed out".to_string())
                    .await
            }
        };

        self.registry.insert(ActiveStream {
            camera_id,
            source_url,
            pid: spawned.pid,
            generation,
            output_dir: self.config.output_dir(camera_id),
            playlist_path: self.config.playlist_path(camera_id),
            started_at: Utc::now(),
            kill: spawned.kill,
        });
        self.status
            .upsert(camera_id, StreamState::Running, None)
            .await?;
        let _ = self.events.send(StreamEvent::Started { camera_id });
        info!(camera_id, pid = ?spawned.pid, "Transcoder started");

        Ok(StartOutcome::Started)
    }

    async fn start_failed(
        &self,
        camera_id: CameraId,
        reason: String,
    ) -> crate::Result<StartOutcome> {
        error!(camera_id, "Transcoder start failed: {}", reason);
        self.status
            .upsert(camera_id, StreamState::Error, Some(&reason))
            .await?;
        let _ = self.events.send(StreamEvent::Error {
            camera_id,
            message: reason.clone(),
        });
        Ok(StartOutcome::Failed { reason })
    }

    async fn handle_stop(&mut self, camera_id: CameraId) -> StopOutcome {
        match self.registry.remove(camera_id) {
            None => StopOutcome::NotFound,
            Some(active) => {
                // Entry is gone before the process is; a start issued right
                // after this never collides with the dying transcoder.
                active.kill.cancel();
                if let Err(e) = self
                    .status
                    .upsert(camera_id, StreamState::Stopped, None)
                    .await
                {
                    error!(camera_id, "Failed to persist stopped status: {}", e);
                }
                let _ = self.events.send(StreamEvent::Stopped { camera_id });
                info!(camera_id, "Stream stopped");
                StopOutcome::Stopped
            }
        }
    }

    async fn handle_exit(&mut self, exit: ProcessExit) {
        if !self.registry.generation_matches(exit.camera_id, exit.generation) {
            debug!(
                camera_id = exit.camera_id,
                generation = exit.generation,
                "Dropping stale exit notification"
            );
            return;
        }

        self.registry.remove(exit.camera_id);
        let camera_id = exit.camera_id;

        match exit.outcome {
            ExitOutcome::Clean | ExitOutcome::Killed => {
                info!(camera_id, "Transcoder exited cleanly");
                if let Err(e) = self
                    .status
                    .upsert(camera_id, StreamState::Stopped, None)
                    .await
                {
                    error!(camera_id, "Failed to persist stopped status: {}", e);
                }
                let _ = self.events.send(StreamEvent::Stopped { camera_id });
            }
            ExitOutcome::Crashed(message) => {
                error!(camera_id, "Transcoder crashed: {}", message);
                if let Err(e) = self
                    .status
                    .upsert(camera_id, StreamState::Error, Some(&message))
                    .await
                {
                    error!(camera_id, "Failed to persist error status: {}", e);
                }
                let _ = self.events.send(StreamEvent::Error { camera_id, message });
            }
        }
    }
}
