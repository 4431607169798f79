use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

use crate::api::handlers::{
    analyze::analyze,
    session::{get_session_status, start_session, stop_session},
    telemetry::{get_anomalies, get_events, get_stats},
};
use crate::api::websocket::ws_index;

/// Root endpoint to provide information about the API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "PacketWatch API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Live network telemetry with anomaly classification",
        "endpoints": [
            {
                "path": "/api/session/start",
                "method": "POST",
                "description": "Start a monitoring session"
            },
            {
                "path": "/api/session/stop",
                "method": "POST",
                "description": "Stop the monitoring session"
            },
            {
                "path": "/api/session/status",
                "method": "GET",
                "description": "Get session and connection status"
            },
            {
                "path": "/api/events",
                "method": "GET",
                "description": "Events in the rolling window"
            },
            {
                "path": "/api/anomalies",
                "method": "GET",
                "description": "Recent anomalous events"
            },
            {
                "path": "/api/stats",
                "method": "GET",
                "description": "Session statistics"
            },
            {
                "path": "/api/analyze",
                "method": "POST",
                "description": "Run the external anomaly model over the event window"
            },
            {
                "path": "/api/ws",
                "method": "GET",
                "description": "WebSocket endpoint for real-time updates"
            }
        ]
    }))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint
        .route("/", web::get().to(index))
        .service(
            web::scope("/api")
                // WebSocket route for real-time updates
                .route("/ws", web::get().to(ws_index))
                // Session lifecycle
                .service(
                    web::scope("/session")
                        .route("/start", web::post().to(start_session))
                        .route("/stop", web::post().to(stop_session))
                        .route("/status", web::get().to(get_session_status)),
                )
                // Telemetry views
                .route("/events", web::get().to(get_events))
                .route("/anomalies", web::get().to(get_anomalies))
                .route("/stats", web::get().to(get_stats))
                .route("/analyze", web::post().to(analyze)),
        );
}
