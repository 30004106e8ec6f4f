use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::control::StreamControl;
use crate::signaling::SignalingRelay;
use crate::supervisor::StreamEvent;
use crate::CameraId;

pub mod events;

pub use events::{HubEvent, InboundMessage};

/// Fans lifecycle and signaling events out to every connected viewer and
/// dispatches their inbound control messages.
///
/// Broadcast is best-effort: each session has its own queue, a dead queue
/// drops only that session. Control messages reach the supervisor through
/// the in-process [`StreamControl`] trait rather than a loopback HTTP call.
pub struct EventHub {
    sessions: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    control: Arc<dyn StreamControl>,
    relay: Arc<SignalingRelay>,
    config: Arc<Config>,
}

impl EventHub {
    pub fn new(
        control: Arc<dyn StreamControl>,
        relay: Arc<SignalingRelay>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            control,
            relay,
            config,
        }
    }

    /// Register a viewer session. The returned receiver is drained by the
    /// connection's writer task; the acknowledgement event is already
    /// queued on it.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Ok(json) = serde_json::to_string(&HubEvent::connected(session_id.to_string())) {
            let _ = tx.send(json);
        }

        self.sessions.write().insert(session_id, tx);
        info!(%session_id, total = self.session_count(), "Viewer session connected");
        (session_id, rx)
    }

    pub fn unregister(&self, session_id: Uuid) {
        if self.sessions.write().remove(&session_id).is_some() {
            info!(%session_id, total = self.session_count(), "Viewer session disconnected");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Send an event to every connected session. Sessions whose queue is
    /// gone are removed; nobody else is affected.
    pub fn broadcast(&self, event: &HubEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize hub event: {}", e);
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read();
            for (session_id, tx) in sessions.iter() {
                if tx.send(json.clone()).is_err() {
                    dead.push(*session_id);
                }
            }
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write();
            for session_id in dead {
                sessions.remove(&session_id);
                debug!(%session_id, "Dropped dead viewer session during broadcast");
            }
        }
    }

    /// Send an event to one session only.
    pub fn send_to(&self, session_id: Uuid, event: &HubEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize hub event: {}", e);
                return;
            }
        };

        let failed = match self.sessions.read().get(&session_id) {
            Some(tx) => tx.send(json).is_err(),
            None => false,
        };
        if failed {
            self.unregister(session_id);
        }
    }

    /// Dispatch one inbound message from a viewer session. Unknown types
    /// are logged and dropped, never fatal to the connection.
    pub async fn handle_message(&self, session_id: Uuid, text: &str) {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(%session_id, "Ignoring unrecognized hub message: {}", e);
                return;
            }
        };

        match message {
            InboundMessage::StartStream { camera_id, source_url } => {
                self.handle_start(session_id, camera_id, source_url).await;
            }
            InboundMessage::StopStream { camera_id } => {
                match self.control.stop_stream(camera_id).await {
                    Ok(outcome) => {
                        debug!(camera_id, status = outcome.label(), "Stop requested via hub")
                    }
                    Err(e) => warn!(camera_id, "Stop via hub failed: {}", e),
                }
            }
            InboundMessage::Offer { camera_id, sdp } => {
                let negotiation_id = self.relay.handle_offer(camera_id, sdp, session_id);
                self.send_to(
                    session_id,
                    &HubEvent::OfferReceived {
                        camera_id,
                        negotiation_id,
                        timestamp: chrono::Utc::now(),
                    },
                );
            }
            InboundMessage::Answer { camera_id, sdp, negotiation_id } => {
                if let Some(negotiation) =
                    self.relay.handle_answer(camera_id, negotiation_id.as_deref(), sdp)
                {
                    let answer = HubEvent::Answer {
                        camera_id,
                        sdp: negotiation.answer_sdp.clone().unwrap_or_default(),
                        timestamp: chrono::Utc::now(),
                    };
                    self.send_to(negotiation.session_id, &answer);
                    self.broadcast(&HubEvent::WebrtcStreamReady {
                        camera_id,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            InboundMessage::IceCandidate { camera_id, candidate } => {
                self.relay.handle_candidate(camera_id, candidate);
            }
        }
    }

    async fn handle_start(
        &self,
        session_id: Uuid,
        camera_id: CameraId,
        source_url: Option<String>,
    ) {
        let source_url = source_url.or_else(|| {
            self.config
                .camera(camera_id)
                .map(|camera| camera.source_url.clone())
        });

        let Some(source_url) = source_url else {
            warn!(camera_id, "Start via hub with no source URL and no configured camera");
            self.send_to(
                session_id,
                &HubEvent::StreamError {
                    camera_id,
                    message: "no source URL configured".to_string(),
                    timestamp: chrono::Utc::now(),
                },
            );
            return;
        };

        match self.control.start_stream(camera_id, &source_url).await {
            Ok(outcome) => {
                debug!(camera_id, status = outcome.label(), "Start requested via hub")
            }
            Err(e) => {
                warn!(camera_id, "Start via hub failed: {}", e);
                self.send_to(
                    session_id,
                    &HubEvent::StreamError {
                        camera_id,
                        message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    },
                );
            }
        }
    }

    /// Forward supervisor lifecycle events into the hub until the
    /// supervisor goes away.
    pub fn spawn_event_forwarder(
        self: Arc<Self>,
        mut events: broadcast::Receiver<StreamEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let hub = self;
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => hub.broadcast(&HubEvent::from_stream_event(&event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Hub fell behind on supervisor events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{StartOutcome, StopOutcome};
    use crate::status::StreamStatusRecord;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        starts: Mutex<Vec<(CameraId, String)>>,
        stops: Mutex<Vec<CameraId>>,
    }

    #[async_trait]
    impl StreamControl for RecordingControl {
        async fn start_stream(
            &self,
            camera_id: CameraId,
            source_url: &str,
        ) -> crate::Result<StartOutcome> {
            self.starts.lock().push((camera_id, source_url.to_string()));
            Ok(StartOutcome::Started)
        }

        async fn stop_stream(&self, camera_id: CameraId) -> crate::Result<StopOutcome> {
            self.stops.lock().push(camera_id);
            Ok(StopOutcome::Stopped)
        }

        async fn stream_status(
            &self,
            _camera_id: CameraId,
        ) -> crate::Result<Option<StreamStatusRecord>> {
            Ok(None)
        }
    }

    fn test_hub() -> (Arc<EventHub>, Arc<RecordingControl>) {
        let control = Arc::new(RecordingControl::default());
        let relay = Arc::new(SignalingRelay::new(&Default::default()));
        let mut config = Config::default();
        config.cameras = vec![crate::config::CameraConfig {
            id: 3,
            name: "lobby".to_string(),
            source_url: "rtsp://configured/3".to_string(),
            ..Default::default()
        }];
        let hub = Arc::new(EventHub::new(
            control.clone(),
            relay,
            Arc::new(config),
        ));
        (hub, control)
    }

    #[tokio::test]
    async fn test_register_sends_connection_status() {
        let (hub, _) = test_hub();
        let (_session_id, mut rx) = hub.register();

        let first = rx.recv().await.unwrap();
        assert!(first.contains(r#""type":"connection_status""#));
        assert!(first.contains(r#""status":"connected""#));
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_sessions() {
        let (hub, _) = test_hub();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        hub.broadcast(&HubEvent::StreamStarted {
            camera_id: 5,
            timestamp: chrono::Utc::now(),
        });

        assert!(rx_a.recv().await.unwrap().contains(r#""camera_id":5"#));
        assert!(rx_b.recv().await.unwrap().contains(r#""camera_id":5"#));
    }

    #[tokio::test]
    async fn test_dead_session_does_not_block_others() {
        let (hub, _) = test_hub();
        let (_a, rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();
        rx_b.recv().await.unwrap();

        // Viewer A went away without saying goodbye.
        drop(rx_a);
        assert_eq!(hub.session_count(), 2);

        hub.broadcast(&HubEvent::StreamStopped {
            camera_id: 1,
            timestamp: chrono::Utc::now(),
        });

        // B still gets the event and the dead session has been pruned.
        assert!(rx_b.recv().await.unwrap().contains("stream_stopped"));
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn test_start_stream_dispatches_to_control() {
        let (hub, control) = test_hub();
        let (session_id, _rx) = hub.register();

        hub.handle_message(
            session_id,
            r#"{"type":"start_stream","camera_id":8,"source_url":"rtsp://cam/8"}"#,
        )
        .await;

        assert_eq!(
            control.starts.lock().as_slice(),
            &[(8, "rtsp://cam/8".to_string())]
        );
    }

    #[tokio::test]
    async fn test_start_stream_falls_back_to_configured_camera() {
        let (hub, control) = test_hub();
        let (session_id, _rx) = hub.register();

        hub.handle_message(session_id, r#"{"type":"start_stream","camera_id":3}"#)
            .await;

        assert_eq!(
            control.starts.lock().as_slice(),
            &[(3, "rtsp://configured/3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_start_stream_without_source_reports_error() {
        let (hub, control) = test_hub();
        let (session_id, mut rx) = hub.register();
        rx.recv().await.unwrap();

        hub.handle_message(session_id, r#"{"type":"start_stream","camera_id":99}"#)
            .await;

        assert!(control.starts.lock().is_empty());
        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("stream_error"));
        assert!(reply.contains(r#""camera_id":99"#));
    }

    #[tokio::test]
    async fn test_stop_stream_dispatches_to_control() {
        let (hub, control) = test_hub();
        let (session_id, _rx) = hub.register();

        hub.handle_message(session_id, r#"{"type":"stop_stream","camera_id":8}"#)
            .await;

        assert_eq!(control.stops.lock().as_slice(), &[8]);
    }

    #[tokio::test]
    async fn test_unknown_message_is_dropped() {
        let (hub, control) = test_hub();
        let (session_id, mut rx) = hub.register();
        rx.recv().await.unwrap();

        hub.handle_message(session_id, r#"{"type":"format_disk","camera_id":1}"#)
            .await;
        hub.handle_message(session_id, "not json at all").await;

        // Session survives and no control call was made.
        assert_eq!(hub.session_count(), 1);
        assert!(control.starts.lock().is_empty());
        assert!(control.stops.lock().is_empty());
    }

    #[tokio::test]
    async fn test_offer_is_acknowledged_to_sender() {
        let (hub, _) = test_hub();
        let (session_id, mut rx) = hub.register();
        rx.recv().await.unwrap();

        hub.handle_message(
            session_id,
            r#"{"type":"offer","camera_id":4,"sdp":"v=0"}"#,
        )
        .await;

        let ack = rx.recv().await.unwrap();
        assert!(ack.contains("offer_received"));
        assert!(ack.contains(r#""camera_id":4"#));
    }

    #[tokio::test]
    async fn test_answer_relayed_to_offerer_and_ready_broadcast() {
        let (hub, _) = test_hub();
        let (offerer, mut offerer_rx) = hub.register();
        let (relay_peer, mut relay_rx) = hub.register();
        offerer_rx.recv().await.unwrap();
        relay_rx.recv().await.unwrap();

        hub.handle_message(offerer, r#"{"type":"offer","camera_id":4,"sdp":"v=0"}"#)
            .await;
        offerer_rx.recv().await.unwrap(); // ack

        hub.handle_message(
            relay_peer,
            r#"{"type":"answer","camera_id":4,"sdp":"v=0 answer"}"#,
        )
        .await;

        let answer = offerer_rx.recv().await.unwrap();
        assert!(answer.contains(r#""type":"answer""#));
        assert!(answer.contains("v=0 answer"));

        // Both sessions see the ready broadcast.
        let ready = offerer_rx.recv().await.unwrap();
        assert!(ready.contains("webrtc_stream_ready"));
        let ready = relay_rx.recv().await.unwrap();
        assert!(ready.contains("webrtc_stream_ready"));
    }
}
