use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SignalingConfig;
use crate::CameraId;

/// One in-flight offer/answer exchange.
///
/// Keyed by camera id plus offer timestamp so overlapping negotiations for
/// the same camera stay distinct. The actual SDP answer is produced by an
/// external media relay; this type only correlates messages and cleans up.
#[derive(Debug, Clone)]
pub struct Negotiation {
    pub camera_id: CameraId,
    pub session_id: Uuid,
    pub offer_sdp: String,
    pub answer_sdp: Option<String>,
    pub candidates: Vec<String>,
    created_at: Instant,
}

#[derive(Debug)]
pub struct SignalingRelay {
    negotiations: Mutex<HashMap<String, Negotiation>>,
    timeout: Duration,
}

impl SignalingRelay {
    pub fn new(config: &SignalingConfig) -> Self {
        Self {
            negotiations: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(config.negotiation_timeout_seconds),
        }
    }

    /// Record an offer and return the negotiation id to acknowledge with.
    pub fn handle_offer(&self, camera_id: CameraId, sdp: String, session_id: Uuid) -> String {
        let mut negotiations = self.negotiations.lock();

        let mut millis = Utc::now().timestamp_millis();
        let mut key = format!("{}:{}", camera_id, millis);
        while negotiations.contains_key(&key) {
            millis += 1;
            key = format!("{}:{}", camera_id, millis);
        }

        negotiations.insert(
            key.clone(),
            Negotiation {
                camera_id,
                session_id,
                offer_sdp: sdp,
                answer_sdp: None,
                candidates: Vec::new(),
                created_at: Instant::now(),
            },
        );

        info!(camera_id, negotiation_id = %key, "Recorded WebRTC offer");
        key
    }

    /// Complete a negotiation with its answer, removing it.
    ///
    /// Without an explicit id the newest pending negotiation for the camera
    /// is completed. Returns the finished negotiation so the caller can
    /// relay the answer to the offering session.
    pub fn handle_answer(
        &self,
        camera_id: CameraId,
        negotiation_id: Option<&str>,
        sdp: String,
    ) -> Option<Negotiation> {
        let mut negotiations = self.negotiations.lock();

        let key = match negotiation_id {
            Some(id) => {
                if !negotiations.contains_key(id) {
                    warn!(camera_id, negotiation_id = id, "Answer for unknown negotiation");
                    return None;
                }
                id.to_string()
            }
            None => match Self::newest_key(&negotiations, camera_id) {
                Some(key) => key,
                None => {
                    warn!(camera_id, "Answer with no pending negotiation");
                    return None;
                }
            },
        };

        let mut negotiation = negotiations.remove(&key)?;
        negotiation.answer_sdp = Some(sdp);
        info!(camera_id, negotiation_id = %key, "Negotiation answered");
        Some(negotiation)
    }

    /// Candidates are tracked for telemetry only; no state transition.
    pub fn handle_candidate(&self, camera_id: CameraId, candidate: String) {
        let mut negotiations = self.negotiations.lock();
        match Self::newest_key(&negotiations, camera_id) {
            Some(key) => {
                if let Some(negotiation) = negotiations.get_mut(&key) {
                    negotiation.candidates.push(candidate);
                    debug!(
                        camera_id,
                        total = negotiation.candidates.len(),
                        "Attached ICE candidate"
                    );
                }
            }
            None => debug!(camera_id, "ICE candidate with no pending negotiation"),
        }
    }

    /// Drop negotiations older than the configured timeout.
    pub fn gc(&self) -> usize {
        let mut negotiations = self.negotiations.lock();
        let before = negotiations.len();
        let timeout = self.timeout;
        negotiations.retain(|_, n| n.created_at.elapsed() < timeout);
        let removed = before - negotiations.len();
        if removed > 0 {
            debug!(removed, "Garbage-collected abandoned negotiations");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.negotiations.lock().len()
    }

    /// Background GC on a fixed interval.
    pub fn spawn_gc(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let relay = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                relay.gc();
            }
        })
    }

    fn newest_key(negotiations: &HashMap<String, Negotiation>, camera_id: CameraId) -> Option<String> {
        negotiations
            .iter()
            .filter(|(_, n)| n.camera_id == camera_id)
            .max_by_key(|(_, n)| n.created_at)
            .map(|(key, _)| key.clone())
    }
}
