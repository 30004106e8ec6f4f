use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::status::StreamStatusRecord;
use crate::CameraId;

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct StartStreamRequest {
    #[validate(url)]
    pub source_url: Option<String>,
}

/// Response to start/stop calls: `{status, camera_id}` plus the failure
/// reason when there is one.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamActionResponse {
    pub status: String,
    pub camera_id: CameraId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamStatusResponse {
    pub camera_id: CameraId,
    pub state: String,
    pub last_update: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub live: bool,
}

impl StreamStatusResponse {
    pub fn from_record(record: StreamStatusRecord, live: bool) -> Self {
        Self {
            camera_id: record.camera_id,
            state: record.state.as_str().to_string(),
            last_update: Some(record.last_update),
            error_message: record.last_error,
            live,
        }
    }

    /// A camera that has never been started has no status row yet.
    pub fn stopped(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            state: "stopped".to_string(),
            last_update: None,
            error_message: None,
            live: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamListResponse {
    pub streams: Vec<StreamStatusResponse>,
    pub total_count: usize,
    pub live_count: usize,
}
