use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::hub::EventHub;

/// Upgrade a viewer connection and wire it into the event hub.
pub async fn websocket_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;

    let hub = state.hub.clone();
    let (session_id, mut event_rx) = hub.register();
    info!(%session_id, "New viewer WebSocket connection");

    // Writer: drain the hub queue into the socket. A send failure means
    // the viewer is gone; only this session is affected.
    let mut writer_session = session.clone();
    let writer_hub = hub.clone();
    actix_rt::spawn(async move {
        while let Some(json) = event_rx.recv().await {
            if writer_session.text(json).await.is_err() {
                debug!(%session_id, "Viewer write failed, closing session");
                break;
            }
        }
        writer_hub.unregister(session_id);
    });

    // Reader: dispatch inbound control and signaling messages.
    actix_rt::spawn(handle_client_messages(stream, session, session_id, hub));

    Ok(response)
}

async fn handle_client_messages(
    mut stream: actix_ws::MessageStream,
    mut session: actix_ws::Session,
    session_id: Uuid,
    hub: Arc<EventHub>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                hub.handle_message(session_id, &text).await;
            }
            Ok(Message::Ping(bytes)) => {
                let _ = session.pong(&bytes).await;
            }
            Ok(Message::Close(reason)) => {
                debug!(%session_id, ?reason, "Viewer closing connection");
                break;
            }
            Err(e) => {
                warn!(%session_id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    hub.unregister(session_id);
    info!(%session_id, "Viewer WebSocket disconnected");
}

pub fn configure_websocket(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/ws", web::get().to(websocket_handler));
}
