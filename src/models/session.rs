use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::event::NetworkEvent;
use crate::models::identity::Identity;
use crate::models::stats::Stats;

/// Connection lifecycle state of the stream client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Read-only view of a session handed to consumers after every ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub events: Vec<NetworkEvent>,
    pub anomalies: Vec<NetworkEvent>,
    pub stats: Stats,
    pub connection: ConnectionState,
}

/// Summary reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub running: bool,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub connection: ConnectionState,
    pub endpoint: String,
    pub operator: Option<Identity>,
}
