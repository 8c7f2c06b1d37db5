use std::borrow::Cow;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app_state::AppState;

/// Application close code for failed token checks.
const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Standard codes: server going away / internal error.
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_HEARTBEAT_LOST: u16 = 1011;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const MAX_UNACKED_PINGS: u8 = 2;

/// Tighter deadline for the pre-upgrade token check; plain REST requests
/// get the router-wide 30 s layer instead.
const UPGRADE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `/ws/telemetry?token=<jwt>`. The token is checked before streaming; a
/// bad one gets a 4001 close immediately after the upgrade handshake.
pub async fn ws_telemetry(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let check = check_subscriber(&state, query.token.as_deref());
    let authorized = match tokio::time::timeout(UPGRADE_DEADLINE, check).await {
        Ok(authorized) => authorized,
        Err(_) => {
            warn!("websocket upgrade check timed out");
            return StatusCode::REQUEST_TIMEOUT.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        if !authorized {
            reject_unauthorized(socket).await;
            return;
        }
        stream_telemetry(socket, state).await;
    })
}

/// Token signature plus a live-user check against the store.
async fn check_subscriber(state: &AppState, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return false;
    };
    match state.verifier.verify(token) {
        Ok(claims) => state
            .store
            .get_user(claims.user_id)
            .await
            .ok()
            .flatten()
            .is_some(),
        Err(err) => {
            debug!(error = %err, "websocket token rejected");
            false
        }
    }
}

async fn reject_unauthorized(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: Cow::Borrowed("Unauthorized"),
        })))
        .await;
}

/// One task per subscriber: forwards hub frames, keeps the heartbeat, and
/// tears down on close, error, or server shutdown. Unsubscription happens
/// on every exit path because the subscription unregisters on drop.
async fn stream_telemetry(mut socket: WebSocket, state: AppState) {
    let mut sub = state.hub.subscribe();
    state.metrics.ws_connected();
    info!(subscriber = sub.id, "telemetry subscriber connected");

    let shutdown = state.shutdown.clone();
    let mut ping_timer = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut unacked_pings: u8 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: Cow::Borrowed("going away"),
                    })))
                    .await;
                break;
            }

            frame = sub.rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let payload = match serde_json::to_string(&frame) {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(error = %err, "failed to serialize frame");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(count)) => {
                        // Oldest frames were discarded for this subscriber
                        // alone; newer frames follow in order.
                        sub.record_dropped(count);
                        state.metrics.frames_dropped(count);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = ping_timer.tick() => {
                if unacked_pings >= MAX_UNACKED_PINGS {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_HEARTBEAT_LOST,
                            reason: Cow::Borrowed("heartbeat lost"),
                        })))
                        .await;
                    break;
                }
                unacked_pings += 1;
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => unacked_pings = 0,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    info!(
        subscriber = sub.id,
        dropped = state.hub.dropped_for(sub.id),
        "telemetry subscriber disconnected"
    );
    state.metrics.ws_disconnected();
}
