use crate::error::AppError;
use crate::metrics::REJECTED_CONNECTIONS_TOTAL;
use crate::models::UserInfo;
use crate::state::AppState;
use crate::websocket::{
    transport::inbound_frames, ActixSink, ReadPump, Registration, SessionGuard, WritePump,
    CONTROL_CAPACITY,
};
use actix_middleware::AuthUser;
use actix_web::{get, rt, web, Error, HttpRequest, HttpResponse};
use std::sync::Arc;
use tokio::sync::mpsc;

/// GET /api/chat/ws
///
/// Browsers cannot set headers on an upgrade, so the auth gate also accepts
/// `?token=`. One semaphore permit is held for the life of the session.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, Error> {
    let Ok(permit) = state.connections.clone().try_acquire_owned() else {
        REJECTED_CONNECTIONS_TOTAL.inc();
        tracing::warn!(user_id = %user.id, "websocket rejected: connection limit reached");
        return Err(AppError::TooManyConnections.into());
    };

    let (response, session, stream) = actix_ws::handle(&req, body)?;

    let Registration {
        id,
        user,
        mailbox,
        active_users,
    } = state
        .hub
        .register(UserInfo::from(user))
        .await
        .map_err(AppError::from)?;

    let config = state.config.session.clone();
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);

    let write = WritePump {
        sink: ActixSink::new(session),
        mailbox,
        control: control_rx,
        active_users,
        messages: state.messages.clone(),
        config: config.clone(),
        guard: SessionGuard::new(state.hub.clone(), id),
    };
    let read = ReadPump {
        frames: inbound_frames(stream, config.max_frame_bytes),
        user,
        messages: state.messages.clone(),
        control: control_tx,
        config,
        guard: SessionGuard::new(state.hub.clone(), id),
    };

    // MessageStream is !Send: both pumps stay on this worker
    let permit = Arc::new(permit);
    let write_permit = permit.clone();
    rt::spawn(async move {
        write.run().await;
        drop(write_permit);
    });
    rt::spawn(async move {
        read.run().await;
        drop(permit);
    });

    Ok(response)
}
