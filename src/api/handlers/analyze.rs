use actix_web::{web, HttpResponse, Responder};
use log::info;
use serde::Serialize;

use crate::api::SharedSessionManager;
use crate::detector::model_client::{ModelAnomaly, ModelClient};

/// Response for a model analysis run
#[derive(Serialize)]
struct AnalyzeResponse {
    success: bool,
    analyzed: usize,
    anomalies: Vec<ModelAnomaly>,
    degraded: Option<String>,
}

/// Run the external model over the current event window
pub async fn analyze(
    manager: web::Data<SharedSessionManager>,
    model: web::Data<ModelClient>,
) -> impl Responder {
    // Release the lock before the model round trip
    let events = manager.read().await.current_snapshot().events;

    let verdict = model.analyze(&events).await;
    info!(
        "Model analysis over {} events: {} anomalies{}",
        events.len(),
        verdict.anomalies.len(),
        if verdict.is_degraded() { " (degraded)" } else { "" }
    );

    HttpResponse::Ok().json(AnalyzeResponse {
        success: !verdict.is_degraded(),
        analyzed: events.len(),
        anomalies: verdict.anomalies,
        degraded: verdict.degraded,
    })
}
