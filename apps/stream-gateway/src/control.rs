use async_trait::async_trait;

use crate::status::StreamStatusRecord;
use crate::CameraId;

/// Result of a start request against the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    Failed { reason: String },
}

impl StartOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StartOutcome::Started => "started",
            StartOutcome::AlreadyRunning => "already-running",
            StartOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

impl StopOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StopOutcome::Stopped => "stopped",
            StopOutcome::NotFound => "not-found",
        }
    }
}

/// Control surface exposed by the transcode supervisor.
///
/// The event hub and the viewer-side controller both go through this trait,
/// so the supervisor can live in-process or behind the HTTP API without
/// either caller changing.
#[async_trait]
pub trait StreamControl: Send + Sync {
    async fn start_stream(
        &self,
        camera_id: CameraId,
        source_url: &str,
    ) -> crate::Result<StartOutcome>;

    async fn stop_stream(&self, camera_id: CameraId) -> crate::Result<StopOutcome>;

    async fn stream_status(
        &self,
        camera_id: CameraId,
    ) -> crate::Result<Option<StreamStatusRecord>>;
}
