//! Client for the external anomaly model.
//!
//! The model is opaque: a batch of records goes in, a list of anomalies comes
//! out. Any failure is reported as a degraded verdict with no anomalies, so
//! callers never need to handle an error from here.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::event::{NetworkEvent, Severity};
use crate::utils::error::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Record shape expected by the model
#[derive(Debug, Serialize)]
struct ModelRecord<'a> {
    timestamp: DateTime<Utc>,
    packets: u64,
    bytes: u64,
    protocol: &'a str,
    source: &'a str,
    destination: &'a str,
}

impl<'a> From<&'a NetworkEvent> for ModelRecord<'a> {
    fn from(event: &'a NetworkEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            packets: event.packet_count,
            bytes: event.byte_size,
            protocol: &event.protocol,
            source: &event.source,
            destination: &event.destination,
        }
    }
}

/// One anomaly reported by the model, `index` points into the submitted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAnomaly {
    pub index: usize,
    #[serde(default = "default_anomaly")]
    pub anomaly: bool,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_anomaly() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelResponse {
    Envelope {
        success: bool,
        #[serde(default)]
        anomalies: Vec<ModelAnomaly>,
        #[serde(default)]
        error: Option<String>,
    },
    Bare(Vec<ModelAnomaly>),
}

/// Result of asking the model. `degraded` is set when the model could not be used.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelVerdict {
    pub anomalies: Vec<ModelAnomaly>,
    pub degraded: Option<String>,
}

impl ModelVerdict {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// HTTP client for the anomaly model
#[derive(Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    url: Option<String>,
}

impl ModelClient {
    pub fn new(url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, url }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Submit a batch. Never fails; see [`ModelVerdict::degraded`].
    pub async fn analyze(&self, events: &[NetworkEvent]) -> ModelVerdict {
        match self.request(events).await {
            Ok(anomalies) => {
                debug!("Model reported {} anomalies in {} records", anomalies.len(), events.len());
                ModelVerdict {
                    anomalies,
                    degraded: None,
                }
            }
            Err(e) => {
                warn!("Anomaly model unavailable: {}", e);
                ModelVerdict {
                    anomalies: Vec::new(),
                    degraded: Some(e.to_string()),
                }
            }
        }
    }

    async fn request(&self, events: &[NetworkEvent]) -> AppResult<Vec<ModelAnomaly>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::Model("no model endpoint configured".to_string()))?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<ModelRecord<'_>> = events.iter().map(ModelRecord::from).collect();
        let response = self
            .http
            .post(url)
            .json(&records)
            .send()
            .await
            .map_err(|e| AppError::Model(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Model(format!("model returned HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Model(format!("failed to read response: {}", e)))?;
        parse_model_response(&body, events.len())
    }
}

/// Parse a model response for a batch of `batch_len` records
pub fn parse_model_response(body: &str, batch_len: usize) -> AppResult<Vec<ModelAnomaly>> {
    let parsed: ModelResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Model(format!("malformed response: {}", e)))?;

    let anomalies = match parsed {
        ModelResponse::Envelope { success: true, anomalies, .. } => anomalies,
        ModelResponse::Envelope { success: false, error, .. } => {
            return Err(AppError::Model(
                error.unwrap_or_else(|| "model reported failure".to_string()),
            ))
        }
        ModelResponse::Bare(anomalies) => anomalies,
    };

    if let Some(bad) = anomalies.iter().find(|a| a.index >= batch_len) {
        return Err(AppError::Model(format!(
            "anomaly index {} outside batch of {}",
            bad.index, batch_len
        )));
    }

    Ok(anomalies)
}
