use async_trait::async_trait;
use std::time::Duration;

use crate::api::dto::{StreamActionResponse, StreamStatusResponse};
use crate::control::{StartOutcome, StopOutcome, StreamControl};
use crate::status::{StreamState, StreamStatusRecord};
use crate::CameraId;

/// [`StreamControl`] implementation against the remote control surface.
///
/// Every request carries the configured timeout; the gateway being slow or
/// gone surfaces as a control error, never as an indefinite hang.
pub struct HttpControlClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpControlClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn stream_url(&self, camera_id: CameraId, action: &str) -> String {
        format!("{}/api/v1/streams/{}/{}", self.base_url, camera_id, action)
    }
}

#[async_trait]
impl StreamControl for HttpControlClient {
    async fn start_stream(
        &self,
        camera_id: CameraId,
        source_url: &str,
    ) -> crate::Result<StartOutcome> {
        let response = self
            .http
            .post(self.stream_url(camera_id, "start"))
            .json(&serde_json::json!({ "source_url": source_url }))
            .send()
            .await
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        match response.status().as_u16() {
            404 => return Err(crate::GatewayError::CameraNotFound(camera_id)),
            400 => {
                return Err(crate::GatewayError::ConfigError(format!(
                    "start rejected for camera {}",
                    camera_id
                )))
            }
            _ => {}
        }

        let body: StreamActionResponse = response
            .json()
            .await
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        match body.status.as_str() {
            "started" => Ok(StartOutcome::Started),
            "already-running" => Ok(StartOutcome::AlreadyRunning),
            "failed" => Ok(StartOutcome::Failed {
                reason: body.error.unwrap_or_else(|| "start failed".to_string()),
            }),
            other => Err(crate::GatewayError::ControlError(format!(
                "unexpected start status: {}",
                other
            ))),
        }
    }

    async fn stop_stream(&self, camera_id: CameraId) -> crate::Result<StopOutcome> {
        let response = self
            .http
            .post(self.stream_url(camera_id, "stop"))
            .send()
            .await
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        let body: StreamActionResponse = response
            .json()
            .await
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        match body.status.as_str() {
            "stopped" => Ok(StopOutcome::Stopped),
            "not-found" => Ok(StopOutcome::NotFound),
            other => Err(crate::GatewayError::ControlError(format!(
                "unexpected stop status: {}",
                other
            ))),
        }
    }

    async fn stream_status(
        &self,
        camera_id: CameraId,
    ) -> crate::Result<Option<StreamStatusRecord>> {
        let response = self
            .http
            .get(self.stream_url(camera_id, "status"))
            .send()
            .await
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        let body: StreamStatusResponse = response
            .json()
            .await
            .map_err(|e| crate::GatewayError::ControlError(e.to_string()))?;

        Ok(Some(StreamStatusRecord {
            camera_id: body.camera_id,
            state: StreamState::parse(&body.state),
            last_error: body.error_message,
            last_update: body.last_update.unwrap_or_else(chrono::Utc::now),
        }))
    }
}
