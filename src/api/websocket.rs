use actix_web::{web, Error, HttpRequest, Responder};
use actix_ws::{self, Message};
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;

use crate::api::SharedSessionManager;
use crate::models::event::NetworkEvent;
use crate::models::session::{SessionSnapshot, SessionStatus};

// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// Clients silent for this long are dropped
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

// At most one snapshot per this period
const SNAPSHOT_THROTTLE: Duration = Duration::from_secs(1);

/// WebSocket message types that can be sent to clients
#[derive(Serialize)]
#[serde(tag = "type")]
enum WsOutMessage {
    #[serde(rename = "event")]
    Event { event: NetworkEvent },

    #[serde(rename = "snapshot")]
    Snapshot { snapshot: SessionSnapshot },

    #[serde(rename = "status")]
    Status { status: SessionStatus },
}

/// Handle WebSocket connections
pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    manager: web::Data<SharedSessionManager>,
) -> Result<impl Responder, Error> {
    let addr = req
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("WebSocket connection from: {}", addr);

    let (response, session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let manager = manager.into_inner();

    actix_web::rt::spawn(async move {
        let last_seen = Arc::new(Mutex::new(Instant::now()));

        let (mut events_rx, mut snapshot_rx) = {
            let manager = manager.read().await;
            (manager.subscribe_events(), manager.subscribe_snapshots())
        };

        let mut initial = session.clone();
        let snapshot = snapshot_rx.borrow_and_update().clone();
        if send_status(&mut initial, &manager).await.is_err()
            || send_snapshot(&mut initial, snapshot).await.is_err()
        {
            warn!("Failed to send initial state to {}", addr);
            return;
        }

        // Client commands and liveness
        let ws_msg_task = {
            let mut session = session.clone();
            let last_seen = last_seen.clone();
            let manager = manager.clone();

            async move {
                while let Some(Ok(msg)) = msg_stream.next().await {
                    *last_seen.lock() = Instant::now();
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Text(text) => {
                            debug!("Received text message: {}", text);
                            let result = match text.trim() {
                                "status" => send_status(&mut session, &manager).await,
                                "snapshot" => {
                                    let snapshot = manager.read().await.current_snapshot();
                                    send_snapshot(&mut session, snapshot).await
                                }
                                _ => Ok(()),
                            };
                            if result.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        };

        // Every ingested event, as it happens
        let events_task = {
            let mut session = session.clone();

            async move {
                loop {
                    match events_rx.recv().await {
                        Ok(event) => {
                            if send(&mut session, &WsOutMessage::Event { event }).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagging, skipped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        };

        // Latest snapshot, throttled
        let snapshots_task = {
            let mut session = session.clone();

            async move {
                let mut last_sent = Instant::now();
                while snapshot_rx.changed().await.is_ok() {
                    let since = last_sent.elapsed();
                    if since < SNAPSHOT_THROTTLE {
                        tokio::time::sleep(SNAPSHOT_THROTTLE - since).await;
                    }
                    let snapshot = snapshot_rx.borrow_and_update().clone();
                    if send_snapshot(&mut session, snapshot).await.is_err() {
                        break;
                    }
                    last_sent = Instant::now();
                }
            }
        };

        let heartbeat_task = {
            let mut session = session.clone();

            async move {
                let mut heartbeat = interval(HEARTBEAT_INTERVAL);
                loop {
                    heartbeat.tick().await;
                    if last_seen.lock().elapsed() > CLIENT_TIMEOUT {
                        warn!("WebSocket client heartbeat timed out");
                        break;
                    }
                    if session.ping(b"").await.is_err() {
                        break;
                    }
                }
            }
        };

        // Wait for any task to complete
        tokio::select! {
            _ = ws_msg_task => {},
            _ = events_task => {},
            _ = snapshots_task => {},
            _ = heartbeat_task => {},
        }

        let _ = session.close(None).await;
        info!("WebSocket connection from {} closed", addr);
    });

    Ok(response)
}

async fn send(session: &mut actix_ws::Session, msg: &WsOutMessage) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(msg) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            warn!("Failed to serialize WebSocket message: {}", e);
            Ok(())
        }
    }
}

/// Send current status to WebSocket client
async fn send_status(
    session: &mut actix_ws::Session,
    manager: &SharedSessionManager,
) -> Result<(), actix_ws::Closed> {
    let status = manager.read().await.status();
    send(session, &WsOutMessage::Status { status }).await
}

async fn send_snapshot(
    session: &mut actix_ws::Session,
    snapshot: SessionSnapshot,
) -> Result<(), actix_ws::Closed> {
    send(session, &WsOutMessage::Snapshot { snapshot }).await
}
