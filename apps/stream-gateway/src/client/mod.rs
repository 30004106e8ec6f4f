use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::control::{StartOutcome, StreamControl};
use crate::CameraId;

pub mod backoff;
pub mod http;
pub mod playback;
pub mod protocol;

pub use backoff::BackoffStrategy;
pub use http::HttpControlClient;
pub use playback::{HlsDriver, PlaybackAdapter, PlaybackError, SegmentedPlayer};
pub use protocol::{Protocol, ProtocolDriver, ProtocolSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Everything the UI layer needs to render one camera tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStreamState {
    pub camera_id: CameraId,
    pub active_protocol: Option<Protocol>,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub phase: ConnectionPhase,
}

impl ClientStreamState {
    fn idle(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            active_protocol: None,
            reconnect_attempts: 0,
            last_error: None,
            phase: ConnectionPhase::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub connect_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ControllerOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

struct Inner {
    cancel: Option<CancellationToken>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Per-camera viewer-side state machine.
///
/// Tries delivery protocols in priority order, backs off between failed
/// rounds, and gives up for good once the reconnect ceiling is hit. An
/// explicit `stop` always wins: any in-flight connect or pending reconnect
/// timer is abandoned, never awaited. State transitions are published on a
/// watch channel so the UI renders without polling.
pub struct ClientStreamController {
    camera_id: CameraId,
    control: Arc<dyn StreamControl>,
    drivers: Vec<Arc<dyn ProtocolDriver>>,
    options: ControllerOptions,
    state_tx: watch::Sender<ClientStreamState>,
    inner: Mutex<Inner>,
}

/// The connect/reconnect loop, detached from the controller handle so a
/// superseded attempt can be abandoned without being awaited.
struct Worker {
    camera_id: CameraId,
    control: Arc<dyn StreamControl>,
    drivers: Vec<Arc<dyn ProtocolDriver>>,
    options: ControllerOptions,
    state_tx: watch::Sender<ClientStreamState>,
}

impl ClientStreamController {
    pub fn new(
        camera_id: CameraId,
        control: Arc<dyn StreamControl>,
        drivers: Vec<Arc<dyn ProtocolDriver>>,
        options: ControllerOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ClientStreamState::idle(camera_id));
        Self {
            camera_id,
            control,
            drivers,
            options,
            state_tx,
            inner: Mutex::new(Inner {
                cancel: None,
                task: None,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStreamState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ClientStreamState {
        self.state_tx.borrow().clone()
    }

    /// Begin (or restart) playback. A start supersedes any in-flight
    /// attempt for the same camera rather than racing with it.
    ///
    /// A camera that hit the reconnect ceiling stays down until the
    /// operator calls [`reset`](Self::reset).
    pub fn start(&self, source_url: &str) -> crate::Result<()> {
        {
            let state = self.state_tx.borrow();
            if state.phase == ConnectionPhase::Failed
                && state.reconnect_attempts >= self.options.max_reconnect_attempts
            {
                return Err(crate::GatewayError::ControlError(format!(
                    "camera {} requires manual reset after {} failed attempts",
                    self.camera_id, state.reconnect_attempts
                )));
            }
        }

        let cancel = CancellationToken::new();
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.cancel.replace(cancel.clone()) {
            previous.cancel();
        }

        let worker = Worker {
            camera_id: self.camera_id,
            control: self.control.clone(),
            drivers: self.drivers.clone(),
            options: self.options.clone(),
            state_tx: self.state_tx.clone(),
        };
        let source_url = source_url.to_string();
        inner.task = Some(tokio::spawn(async move {
            worker.run(source_url, cancel).await;
        }));

        Ok(())
    }

    /// Idempotent: cancels any pending reconnect timer, closes any open
    /// transport and resets to idle regardless of the current phase.
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock();
            if let Some(token) = inner.cancel.take() {
                token.cancel();
            }
            inner.task = None;
        }
        self.state_tx
            .send_replace(ClientStreamState::idle(self.camera_id));
        debug!(camera_id = self.camera_id, "Controller stopped");
    }

    /// Operator action that clears a terminal failure so the camera can be
    /// started again. Only the client-local attempt counter is cleared;
    /// the gateway's persisted status is left for its own lifecycle.
    pub fn reset(&self) {
        info!(camera_id = self.camera_id, "Manual reset");
        self.stop();
    }
}

impl Worker {
    async fn run(&self, source_url: String, cancel: CancellationToken) {
        let mut backoff = BackoffStrategy::linear(self.options.base_delay, self.options.max_delay);

        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.update_if(&cancel, |s| {
                s.phase = ConnectionPhase::Connecting;
                s.active_protocol = None;
            });

            match self.try_connect(&source_url, &cancel).await {
                Ok((protocol, mut session)) => {
                    backoff.reset();
                    info!(camera_id = self.camera_id, %protocol, "Connected");
                    self.update_if(&cancel, |s| {
                        s.phase = ConnectionPhase::Connected;
                        s.active_protocol = Some(protocol);
                        s.reconnect_attempts = 0;
                        s.last_error = None;
                    });

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            session.close().await;
                            return;
                        }
                        reason = session.wait_failure() => {
                            warn!(camera_id = self.camera_id, "Session failed: {}", reason);
                            session.close().await;
                            self.update_if(&cancel, |s| {
                                s.phase = ConnectionPhase::Failed;
                                s.active_protocol = None;
                                s.reconnect_attempts += 1;
                                s.last_error = Some(reason);
                            });
                        }
                    }
                }
                Err(_) if cancel.is_cancelled() => return,
                Err(error) => {
                    warn!(camera_id = self.camera_id, "Connect round failed: {}", error);
                    self.update_if(&cancel, |s| {
                        s.phase = ConnectionPhase::Failed;
                        s.active_protocol = None;
                        s.reconnect_attempts += 1;
                        s.last_error = Some(error);
                    });
                }
            }

            let attempts = self.state_tx.borrow().reconnect_attempts;
            if attempts >= self.options.max_reconnect_attempts {
                warn!(
                    camera_id = self.camera_id,
                    attempts, "Reconnect ceiling reached, manual reset required"
                );
                return;
            }

            let delay = backoff.next_delay();
            debug!(
                camera_id = self.camera_id,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One full round: ask the gateway to start the stream, then walk the
    /// protocol ladder. The first protocol that connects wins; each gets
    /// its own timeout and an expiry only fails that protocol.
    async fn try_connect(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> Result<(Protocol, Box<dyn ProtocolSession>), String> {
        match self.control.start_stream(self.camera_id, source_url).await {
            Ok(StartOutcome::Failed { reason }) => return Err(reason),
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }

        let mut last_error = "no delivery protocols configured".to_string();
        for driver in &self.drivers {
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }

            let protocol = driver.protocol();
            match tokio::time::timeout(
                self.options.connect_timeout,
                driver.connect(cancel.child_token()),
            )
            .await
            {
                Ok(Ok(session)) => return Ok((protocol, session)),
                Ok(Err(e)) => {
                    debug!(camera_id = self.camera_id, %protocol, "Connect failed: {}", e);
                    last_error = format!("{}: {}", protocol, e);
                }
                Err(_) => {
                    debug!(camera_id = self.camera_id, %protocol, "Connect timed out");
                    last_error = format!("{}: connect timed out", protocol);
                }
            }
        }

        Err(last_error)
    }

    /// Skip stale writes from superseded attempts: once our token is
    /// cancelled, stop owns the state.
    fn update_if(&self, cancel: &CancellationToken, f: impl FnOnce(&mut ClientStreamState)) {
        if cancel.is_cancelled() {
            return;
        }
        self.state_tx.send_modify(f);
    }
}
