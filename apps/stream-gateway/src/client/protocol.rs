use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Delivery protocols in the order clients usually prefer them: lowest
/// latency first, widest compatibility last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    WebRtc,
    Hls,
    Mjpeg,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::WebRtc => "webrtc",
            Protocol::Hls => "hls",
            Protocol::Mjpeg => "mjpeg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "webrtc" => Some(Protocol::WebRtc),
            "hls" => Some(Protocol::Hls),
            "mjpeg" => Some(Protocol::Mjpeg),
            _ => None,
        }
    }

    /// Parse a configured priority list, skipping names we do not know.
    pub fn priority_from_names(names: &[String]) -> Vec<Self> {
        names.iter().filter_map(|n| Self::from_name(n)).collect()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live viewer-side connection over one delivery protocol.
#[async_trait]
pub trait ProtocolSession: Send {
    /// Resolves with the reason once the session hits a fatal error.
    async fn wait_failure(&mut self) -> String;

    /// Close the transport. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Connects one delivery protocol for one camera.
///
/// Implementations must respect the cancellation token: a cancelled connect
/// returns promptly and leaves nothing running.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn connect(
        &self,
        cancel: CancellationToken,
    ) -> crate::Result<Box<dyn ProtocolSession>>;
}
