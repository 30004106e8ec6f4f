use actix_files::Files;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::control::StreamControl;
use crate::hub::EventHub;
use crate::status::StatusStore;
use crate::supervisor::StreamRegistry;

pub mod dto;
pub mod error;
pub mod routes;
pub mod websocket;

pub use error::ApiError;
pub use routes::configure_routes;
pub use websocket::configure_websocket;

/// Shared state handed to every request handler.
pub struct AppState {
    pub control: Arc<dyn StreamControl>,
    pub status: Arc<StatusStore>,
    pub registry: Arc<StreamRegistry>,
    pub hub: Arc<EventHub>,
    pub config: Arc<Config>,
}

/// Run the control surface, the viewer event channel and the static
/// segment file service. Blocks until the server shuts down.
pub async fn start_server(config: Arc<Config>, state: AppState) -> std::io::Result<()> {
    let bind = (config.api.host.clone(), config.api.port);
    let output_base = config.transcode.output_base.clone();
    let data = web::Data::new(state);

    info!(host = %bind.0, port = bind.1, "Starting API server");

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(configure_routes)
            .configure(configure_websocket)
            // Segment playlists and chunks are plain static assets; the
            // playlist HEAD probe is the readiness signal clients use.
            .service(Files::new("/streams", output_base.clone()))
    })
    .bind(bind)?
    .run()
    .await
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::config::{CameraConfig, TranscodeConfig};
    use crate::signaling::SignalingRelay;
    use crate::supervisor::TranscodeSupervisor;

    /// Full application state backed by `/bin/sh` as the transcoder.
    pub(crate) async fn test_state(script: &str) -> web::Data<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.transcode = TranscodeConfig {
            transcoder_path: "/bin/sh".into(),
            arg_template: vec!["-c".to_string(), script.to_string()],
            output_base: dir.path().join("out"),
            spawn_timeout_seconds: 5,
            stop_grace_seconds: 1,
            ..Default::default()
        };
        config.cameras = vec![CameraConfig {
            id: 3,
            name: "lobby".to_string(),
            source_url: "rtsp://configured/3".to_string(),
            ..Default::default()
        }];
        let config = Arc::new(config);

        let status = Arc::new(StatusStore::in_memory().await.unwrap());
        let supervisor = Arc::new(TranscodeSupervisor::new(
            config.transcode.clone(),
            status.clone(),
        ));
        let registry = supervisor.registry().clone();
        let relay = Arc::new(SignalingRelay::new(&config.signaling));
        let hub = Arc::new(EventHub::new(supervisor.clone(), relay, config.clone()));
        hub.clone().spawn_event_forwarder(supervisor.subscribe());

        // Keep the scratch directory alive for the whole test process.
        std::mem::forget(dir);

        web::Data::new(AppState {
            control: supervisor,
            status,
            registry,
            hub,
            config,
        })
    }
}
