use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::CameraId;

/// Handle to a live transcoding process.
///
/// Invariant: at most one `ActiveStream` exists per camera at any instant.
/// The `generation` counter increases with every spawn so that exit
/// notifications from a torn-down process can be told apart from the
/// current one.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub camera_id: CameraId,
    pub source_url: String,
    pub pid: Option<u32>,
    pub generation: u64,
    pub output_dir: PathBuf,
    pub playlist_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub kill: CancellationToken,
}

/// In-memory table of live streams.
///
/// This is a cache, not a durable store: after a gateway restart it is empty
/// and every camera is considered stopped. Only the supervisor task mutates
/// it; everything else reads.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<CameraId, ActiveStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, camera_id: CameraId) -> Option<ActiveStream> {
        self.streams.read().get(&camera_id).cloned()
    }

    pub fn has(&self, camera_id: CameraId) -> bool {
        self.streams.read().contains_key(&camera_id)
    }

    pub fn count(&self) -> usize {
        self.streams.read().len()
    }

    pub fn snapshot(&self) -> Vec<ActiveStream> {
        self.streams.read().values().cloned().collect()
    }

    pub(crate) fn insert(&self, stream: ActiveStream) -> Option<ActiveStream> {
        self.streams.write().insert(stream.camera_id, stream)
    }

    pub(crate) fn remove(&self, camera_id: CameraId) -> Option<ActiveStream> {
        self.streams.write().remove(&camera_id)
    }

    /// True when the registry still holds this exact spawn.
    pub(crate) fn generation_matches(&self, camera_id: CameraId, generation: u64) -> bool {
        self.streams
            .read()
            .get(&camera_id)
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }
}
