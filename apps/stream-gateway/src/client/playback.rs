use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::protocol::{Protocol, ProtocolDriver, ProtocolSession};
use crate::config::ClientConfig;
use crate::CameraId;

/// Playback errors come in two tiers: recoverable ones are retried in
/// place without destroying the player, fatal ones tear the session down
/// and hand control back to the stream controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("recoverable playback error: {0}")]
    Recoverable(String),
    #[error("fatal playback error: {0}")]
    Fatal(String),
}

impl PlaybackError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlaybackError::Fatal(_))
    }
}

/// The actual segmented-media decoder lives outside this crate; this is
/// the surface the adapter drives.
#[async_trait]
pub trait SegmentedPlayer: Send + Sync {
    async fn attach(&mut self, playlist_url: &str) -> Result<(), PlaybackError>;

    /// In-place recovery after a recoverable error.
    async fn recover(&mut self) -> Result<(), PlaybackError>;

    /// Next error emitted by the player; pends while playback is healthy.
    async fn next_error(&mut self) -> PlaybackError;

    async fn destroy(&mut self);
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub max_consecutive_recoveries: u32,
}

impl PlaybackOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            probe_interval: Duration::from_millis(config.probe_interval_ms),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            max_consecutive_recoveries: config.max_consecutive_recoveries,
        }
    }
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Attaches a segmented player to an output that may not exist yet.
///
/// The playlist appears only once the transcoder has produced its first
/// segments, so the adapter HEAD-probes until the playlist answers, then
/// attaches. The probe loop is tied to the owning controller's
/// cancellation token; a stopped camera cannot leak a dangling retry.
pub struct PlaybackAdapter {
    camera_id: CameraId,
    playlist_url: String,
    player: Box<dyn SegmentedPlayer>,
    http: reqwest::Client,
    options: PlaybackOptions,
}

impl PlaybackAdapter {
    pub fn new(
        camera_id: CameraId,
        playlist_url: String,
        player: Box<dyn SegmentedPlayer>,
        options: PlaybackOptions,
    ) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.probe_timeout)
            .build()
            .map_err(|e| crate::GatewayError::PlaybackFailed(e.to_string()))?;

        Ok(Self {
            camera_id,
            playlist_url,
            player,
            http,
            options,
        })
    }

    /// Probe until the playlist answers. Each probe has its own timeout;
    /// the loop itself only ends on success or cancellation.
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> crate::Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(crate::GatewayError::PlaybackFailed(
                    "readiness probe cancelled".to_string(),
                ));
            }

            match self.http.head(&self.playlist_url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(camera_id = self.camera_id, "Playlist is ready");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(
                        camera_id = self.camera_id,
                        status = %response.status(),
                        "Playlist not ready yet"
                    );
                }
                Err(e) => {
                    debug!(camera_id = self.camera_id, "Readiness probe failed: {}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(crate::GatewayError::PlaybackFailed(
                        "readiness probe cancelled".to_string(),
                    ));
                }
                _ = tokio::time::sleep(self.options.probe_interval) => {}
            }
        }
    }

    /// Wait for the output, then attach the player.
    pub async fn attach(
        mut self,
        cancel: &CancellationToken,
    ) -> crate::Result<AttachedPlayback> {
        self.wait_until_ready(cancel).await?;

        self.player
            .attach(&self.playlist_url)
            .await
            .map_err(|e| crate::GatewayError::PlaybackFailed(e.to_string()))?;

        info!(camera_id = self.camera_id, "Player attached");
        Ok(AttachedPlayback {
            camera_id: self.camera_id,
            player: self.player,
            recoveries: 0,
            max_recoveries: self.options.max_consecutive_recoveries,
            destroyed: false,
        })
    }
}

/// A playing session. Recoverable hiccups are absorbed here; only fatal
/// errors (or exhausted recovery budget) surface to the controller.
pub struct AttachedPlayback {
    camera_id: CameraId,
    player: Box<dyn SegmentedPlayer>,
    recoveries: u32,
    max_recoveries: u32,
    destroyed: bool,
}

#[async_trait]
impl ProtocolSession for AttachedPlayback {
    async fn wait_failure(&mut self) -> String {
        loop {
            match self.player.next_error().await {
                PlaybackError::Recoverable(message) => {
                    if self.recoveries >= self.max_recoveries {
                        warn!(
                            camera_id = self.camera_id,
                            "Recovery budget exhausted: {}", message
                        );
                        self.close_player().await;
                        return format!("recovery limit exceeded: {}", message);
                    }
                    self.recoveries += 1;
                    warn!(
                        camera_id = self.camera_id,
                        attempt = self.recoveries,
                        "Recovering player in place: {}", message
                    );
                    if let Err(e) = self.player.recover().await {
                        self.close_player().await;
                        return e.to_string();
                    }
                }
                PlaybackError::Fatal(message) => {
                    warn!(camera_id = self.camera_id, "Fatal playback error: {}", message);
                    self.close_player().await;
                    return message;
                }
            }
        }
    }

    async fn close(&mut self) {
        self.close_player().await;
    }
}

impl AttachedPlayback {
    async fn close_player(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.player.destroy().await;
        }
    }
}

pub type PlayerFactory = Box<dyn Fn() -> Box<dyn SegmentedPlayer> + Send + Sync>;

/// Segmented-playlist delivery driver.
///
/// Guarantees a single adapter per camera: connecting again first cancels
/// whatever instance is still attached to the same output.
pub struct HlsDriver {
    camera_id: CameraId,
    playlist_url: String,
    factory: PlayerFactory,
    options: PlaybackOptions,
    active: Mutex<Option<CancellationToken>>,
}

impl HlsDriver {
    pub fn new(
        camera_id: CameraId,
        playlist_url: String,
        factory: PlayerFactory,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            camera_id,
            playlist_url,
            factory,
            options,
            active: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProtocolDriver for HlsDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Hls
    }

    async fn connect(
        &self,
        cancel: CancellationToken,
    ) -> crate::Result<Box<dyn ProtocolSession>> {
        // One decoder per camera output: tear down the previous instance
        // before attaching a new one.
        if let Some(previous) = self.active.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let adapter = PlaybackAdapter::new(
            self.camera_id,
            self.playlist_url.clone(),
            (self.factory)(),
            self.options.clone(),
        )?;
        let attached = adapter.attach(&cancel).await?;
        Ok(Box::new(attached))
    }
}
