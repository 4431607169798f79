use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default telemetry producer address
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8765";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Telemetry stream URL
    pub endpoint: String,

    /// Port for the REST API server
    pub port: u16,

    /// Delay before a reconnect attempt, in seconds
    pub reconnect_delay_secs: u64,

    /// Capacity of the full event window
    pub event_window: usize,

    /// Capacity of the anomaly-only window
    pub anomaly_window: usize,

    /// External anomaly model endpoint
    pub model_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            port: 3000,
            reconnect_delay_secs: 3,
            event_window: 100,
            anomaly_window: 20,
            model_url: None,
        }
    }
}

impl AppConfig {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            endpoint: self.endpoint.clone(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            events: self.event_window.max(1),
            anomalies: self.anomaly_window.max(1),
        }
    }
}

/// Settings consumed by the stream client
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub endpoint: String,
    pub reconnect_delay: Duration,
}

/// Rolling window capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub events: usize,
    pub anomalies: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            events: 100,
            anomalies: 20,
        }
    }
}
