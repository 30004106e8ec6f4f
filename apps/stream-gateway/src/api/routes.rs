use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::debug;
use validator::Validate;

use crate::api::dto::{
    StartStreamRequest, StreamActionResponse, StreamListResponse, StreamStatusResponse,
};
use crate::api::{ApiError, AppState};
use crate::control::StartOutcome;
use crate::CameraId;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/streams")
                    .route("", web::get().to(list_streams))
                    .route("/{camera_id}/start", web::post().to(start_stream))
                    .route("/{camera_id}/stop", web::post().to(stop_stream))
                    .route("/{camera_id}/status", web::get().to(stream_status)),
            ),
    );
}

async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    debug!("Health check requested");
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stream-gateway",
        "live_streams": state.registry.count(),
        "viewer_sessions": state.hub.session_count(),
    })))
}

/// POST /api/v1/streams/{camera_id}/start
async fn start_stream(
    state: web::Data<AppState>,
    path: web::Path<CameraId>,
    body: Option<web::Json<StartStreamRequest>>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let source_url = match request.source_url {
        Some(url) => url,
        None => state
            .config
            .camera(camera_id)
            .map(|camera| camera.source_url.clone())
            .ok_or(crate::GatewayError::CameraNotFound(camera_id))?,
    };

    if !state.registry.has(camera_id)
        && state.registry.count() >= state.config.app.max_concurrent_streams
    {
        return Err(ApiError::ServiceUnavailable(format!(
            "Concurrent stream limit ({}) reached",
            state.config.app.max_concurrent_streams
        )));
    }

    let outcome = state.control.start_stream(camera_id, &source_url).await?;
    let error = match &outcome {
        StartOutcome::Failed { reason } => Some(reason.clone()),
        _ => None,
    };

    Ok(HttpResponse::Ok().json(StreamActionResponse {
        status: outcome.label().to_string(),
        camera_id,
        error,
    }))
}

/// POST /api/v1/streams/{camera_id}/stop
async fn stop_stream(
    state: web::Data<AppState>,
    path: web::Path<CameraId>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    let outcome = state.control.stop_stream(camera_id).await?;

    Ok(HttpResponse::Ok().json(StreamActionResponse {
        status: outcome.label().to_string(),
        camera_id,
        error: None,
    }))
}

/// GET /api/v1/streams/{camera_id}/status
async fn stream_status(
    state: web::Data<AppState>,
    path: web::Path<CameraId>,
) -> Result<HttpResponse, ApiError> {
    let camera_id = path.into_inner();
    let live = state.registry.has(camera_id);

    let response = match state.control.stream_status(camera_id).await? {
        Some(record) => StreamStatusResponse::from_record(record, live),
        None => {
            if state.config.camera(camera_id).is_none() {
                return Err(ApiError::NotFound(format!("Camera not found: {}", camera_id)));
            }
            StreamStatusResponse::stopped(camera_id)
        }
    };

    Ok(HttpResponse::Ok().json(response))
}

/// GET /api/v1/streams
async fn list_streams(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let records = state.status.all().await?;
    let streams: Vec<StreamStatusResponse> = records
        .into_iter()
        .map(|record| {
            let live = state.registry.has(record.camera_id);
            StreamStatusResponse::from_record(record, live)
        })
        .collect();

    Ok(HttpResponse::Ok().json(StreamListResponse {
        total_count: streams.len(),
        live_count: state.registry.count(),
        streams,
    }))
}
