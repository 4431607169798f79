use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::api::SharedSessionManager;
use crate::models::event::NetworkEvent;

/// Response for listing events
#[derive(Serialize)]
struct EventsResponse {
    events: Vec<NetworkEvent>,
    total: usize,
}

/// Events in the rolling window, oldest first
pub async fn get_events(manager: web::Data<SharedSessionManager>) -> impl Responder {
    let events = manager.read().await.current_snapshot().events;
    HttpResponse::Ok().json(EventsResponse {
        total: events.len(),
        events,
    })
}

/// Anomalous events in the anomaly window, oldest first
pub async fn get_anomalies(manager: web::Data<SharedSessionManager>) -> impl Responder {
    let events = manager.read().await.current_snapshot().anomalies;
    HttpResponse::Ok().json(EventsResponse {
        total: events.len(),
        events,
    })
}

/// Session statistics
pub async fn get_stats(manager: web::Data<SharedSessionManager>) -> impl Responder {
    let stats = manager.read().await.current_snapshot().stats;
    HttpResponse::Ok().json(stats)
}
