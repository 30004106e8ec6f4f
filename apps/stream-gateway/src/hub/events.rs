use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::supervisor::StreamEvent;
use crate::CameraId;

/// Events pushed to connected viewer sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    ConnectionStatus {
        status: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    StreamStarted {
        camera_id: CameraId,
        timestamp: DateTime<Utc>,
    },
    StreamStopped {
        camera_id: CameraId,
        timestamp: DateTime<Utc>,
    },
    StreamError {
        camera_id: CameraId,
        message: String,
        timestamp: DateTime<Utc>,
    },
    WebrtcStreamReady {
        camera_id: CameraId,
        timestamp: DateTime<Utc>,
    },
    /// Acknowledges an offer back to its sender.
    OfferReceived {
        camera_id: CameraId,
        negotiation_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Relayed SDP answer, delivered only to the offering session.
    Answer {
        camera_id: CameraId,
        sdp: String,
        timestamp: DateTime<Utc>,
    },
}

impl HubEvent {
    pub fn connected(session_id: String) -> Self {
        HubEvent::ConnectionStatus {
            status: "connected".to_string(),
            session_id,
            timestamp: Utc::now(),
        }
    }

    pub fn from_stream_event(event: &StreamEvent) -> Self {
        let timestamp = Utc::now();
        match event {
            StreamEvent::Started { camera_id } => HubEvent::StreamStarted {
                camera_id: *camera_id,
                timestamp,
            },
            StreamEvent::Stopped { camera_id } => HubEvent::StreamStopped {
                camera_id: *camera_id,
                timestamp,
            },
            StreamEvent::Error { camera_id, message } => HubEvent::StreamError {
                camera_id: *camera_id,
                message: message.clone(),
                timestamp,
            },
        }
    }
}

/// Control and signaling messages accepted from viewer sessions.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    StartStream {
        camera_id: CameraId,
        source_url: Option<String>,
    },
    StopStream {
        camera_id: CameraId,
    },
    Offer {
        camera_id: CameraId,
        sdp: String,
    },
    Answer {
        camera_id: CameraId,
        sdp: String,
        negotiation_id: Option<String>,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        camera_id: CameraId,
        candidate: String,
    },
}
