use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stream_gateway::client::{
    ClientStreamController, ConnectionPhase, ControllerOptions, Protocol, ProtocolDriver,
    ProtocolSession,
};
use stream_gateway::config::{Config, TranscodeConfig};
use stream_gateway::control::{StartOutcome, StopOutcome, StreamControl};
use stream_gateway::hub::EventHub;
use stream_gateway::signaling::SignalingRelay;
use stream_gateway::status::{StatusStore, StreamState};
use stream_gateway::supervisor::TranscodeSupervisor;

struct Harness {
    config: Arc<Config>,
    supervisor: Arc<TranscodeSupervisor>,
    hub: Arc<EventHub>,
    _dir: tempfile::TempDir,
}

/// Wire the whole server side together with `/bin/sh` standing in for the
/// transcoder. The script gets the playlist path substituted for
/// `{output}` exactly like the real argument template does.
async fn harness(script: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.transcode = TranscodeConfig {
        transcoder_path: "/bin/sh".into(),
        arg_template: vec!["-c".to_string(), script.to_string()],
        output_base: dir.path().join("streams"),
        spawn_timeout_seconds: 5,
        stop_grace_seconds: 1,
        ..Default::default()
    };
    let config = Arc::new(config);

    let status = Arc::new(StatusStore::in_memory().await.unwrap());
    let supervisor = Arc::new(TranscodeSupervisor::new(
        config.transcode.clone(),
        status,
    ));
    let relay = Arc::new(SignalingRelay::new(&config.signaling));
    let hub = Arc::new(EventHub::new(supervisor.clone(), relay, config.clone()));
    hub.clone().spawn_event_forwarder(supervisor.subscribe());

    Harness {
        config,
        supervisor,
        hub,
        _dir: dir,
    }
}

async fn recv_json(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for hub event")
        .expect("hub queue closed")
}

async fn wait_for_file(path: &PathBuf) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tokio::fs::metadata(path).await.is_err() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("file never appeared");
}

#[tokio::test]
async fn test_start_via_hub_broadcasts_and_writes_artifacts() {
    let h = harness("touch {output} && sleep 30").await;
    let (session_id, mut rx) = h.hub.register();

    let hello = recv_json(&mut rx).await;
    assert!(hello.contains("connection_status"));

    h.hub
        .handle_message(
            session_id,
            r#"{"type":"start_stream","camera_id":5,"source_url":"rtsp://cam.example/5"}"#,
        )
        .await;

    let event = recv_json(&mut rx).await;
    assert!(event.contains("stream_started"));
    assert!(event.contains(r#""camera_id":5"#));

    // Status record and output artifact agree with the broadcast.
    let record = h.supervisor.stream_status(5).await.unwrap().unwrap();
    assert_eq!(record.state, StreamState::Running);
    wait_for_file(&h.config.transcode.playlist_path(5)).await;

    h.hub
        .handle_message(session_id, r#"{"type":"stop_stream","camera_id":5}"#)
        .await;

    let event = recv_json(&mut rx).await;
    assert!(event.contains("stream_stopped"));
    assert_eq!(h.supervisor.registry().count(), 0);

    let record = h.supervisor.stream_status(5).await.unwrap().unwrap();
    assert_eq!(record.state, StreamState::Stopped);
}

#[tokio::test]
async fn test_dead_viewer_does_not_affect_remaining_viewers() {
    let h = harness("sleep 30").await;

    let (_gone_id, gone_rx) = h.hub.register();
    let (_stay_id, mut stay_rx) = h.hub.register();
    recv_json(&mut stay_rx).await; // connection_status

    // One viewer vanishes without unregistering.
    drop(gone_rx);

    h.supervisor
        .start_stream(1, "rtsp://cam.example/1")
        .await
        .unwrap();

    let event = recv_json(&mut stay_rx).await;
    assert!(event.contains("stream_started"));
    assert_eq!(h.hub.session_count(), 1);
}

#[tokio::test]
async fn test_status_survives_restart_demoted_to_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("status.db").display());

    {
        let store = StatusStore::new(&url, 2).await.unwrap();
        store.upsert(5, StreamState::Running, None).await.unwrap();
        store
            .upsert(6, StreamState::Error, Some("camera unreachable"))
            .await
            .unwrap();
    }

    // A fresh process starts with an empty registry, so nothing is live.
    let store = StatusStore::new(&url, 2).await.unwrap();
    store.demote_live_states().await.unwrap();

    assert_eq!(
        store.get(5).await.unwrap().unwrap().state,
        StreamState::Stopped
    );
    let error_record = store.get(6).await.unwrap().unwrap();
    assert_eq!(error_record.state, StreamState::Error);
    assert_eq!(
        error_record.last_error.as_deref(),
        Some("camera unreachable")
    );
}

/// Connects once the playlist exists on disk, like a player probing the
/// static file service.
struct FsProbeDriver {
    playlist: PathBuf,
}

struct IdleSession;

#[async_trait]
impl ProtocolSession for IdleSession {
    async fn wait_failure(&mut self) -> String {
        futures::future::pending().await
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl ProtocolDriver for FsProbeDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Hls
    }

    async fn connect(
        &self,
        _cancel: CancellationToken,
    ) -> stream_gateway::Result<Box<dyn ProtocolSession>> {
        if tokio::fs::metadata(&self.playlist).await.is_ok() {
            Ok(Box::new(IdleSession))
        } else {
            Err(stream_gateway::GatewayError::PlaybackFailed(
                "playlist not ready".to_string(),
            ))
        }
    }
}

#[tokio::test]
async fn test_client_controller_against_real_supervisor() {
    // The transcoder takes a moment before the playlist exists, so the
    // controller's first round fails and the retry loop has to finish the
    // job. The second round's start call must be idempotent.
    let h = harness("sleep 0.2 && touch {output} && sleep 30").await;

    let driver: Arc<dyn ProtocolDriver> = Arc::new(FsProbeDriver {
        playlist: h.config.transcode.playlist_path(9),
    });
    let controller = Arc::new(ClientStreamController::new(
        9,
        h.supervisor.clone(),
        vec![driver],
        ControllerOptions {
            connect_timeout: Duration::from_secs(2),
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        },
    ));

    let mut rx = controller.subscribe();
    controller.start("rtsp://cam.example/9").unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if rx.borrow().phase == ConnectionPhase::Connected {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("controller never connected");

    let state = controller.state();
    assert_eq!(state.active_protocol, Some(Protocol::Hls));
    assert_eq!(state.reconnect_attempts, 0);

    // Exactly one transcoder process despite the repeated start calls.
    assert_eq!(h.supervisor.registry().count(), 1);

    controller.stop();
    assert_eq!(controller.state().phase, ConnectionPhase::Idle);

    let outcome = h.supervisor.stop_stream(9).await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped);
}

#[tokio::test]
async fn test_start_stop_start_sequences_never_collide() {
    let h = harness("sleep 30").await;

    for _ in 0..3 {
        let outcome = h
            .supervisor
            .start_stream(2, "rtsp://cam.example/2")
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(h.supervisor.registry().count(), 1);

        let outcome = h.supervisor.stop_stream(2).await.unwrap();
        assert_eq!(outcome, StopOutcome::Stopped);
        assert_eq!(h.supervisor.registry().count(), 0);
    }

    let record = h.supervisor.stream_status(2).await.unwrap().unwrap();
    assert_eq!(record.state, StreamState::Stopped);
}
