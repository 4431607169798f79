use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::Deserialize;

use crate::api::SharedSessionManager;
use crate::models::identity::Identity;
use crate::utils::error::AppError;

/// Request for starting a monitoring session
#[derive(Deserialize, Default)]
pub struct StartSessionRequest {
    /// Identity supplied by the identity provider, shown back by status
    pub operator: Option<Identity>,
}

/// Start a monitoring session
pub async fn start_session(
    manager: web::Data<SharedSessionManager>,
    request: Option<web::Json<StartSessionRequest>>,
) -> impl Responder {
    let operator = request.and_then(|r| r.into_inner().operator);
    let mut manager = manager.write().await;

    match manager.start_session(operator) {
        Ok(session_id) => {
            info!("Monitoring session {} started", session_id);
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": "Monitoring started",
                "session_id": session_id,
            }))
        }
        Err(e) => session_error("start", e),
    }
}

/// Stop the monitoring session
pub async fn stop_session(manager: web::Data<SharedSessionManager>) -> impl Responder {
    let mut manager = manager.write().await;

    match manager.stop_session().await {
        Ok(()) => {
            info!("Monitoring session stopped");
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": "Monitoring stopped",
            }))
        }
        Err(e) => session_error("stop", e),
    }
}

/// Get session status
pub async fn get_session_status(manager: web::Data<SharedSessionManager>) -> impl Responder {
    let manager = manager.read().await;
    HttpResponse::Ok().json(manager.status())
}

fn session_error(action: &str, e: AppError) -> HttpResponse {
    let body = serde_json::json!({
        "status": "error",
        "message": format!("Failed to {} monitoring: {}", action, e),
    });
    match e {
        AppError::Session(_) => HttpResponse::Conflict().json(body),
        _ => {
            error!("Failed to {} monitoring: {}", action, e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}
