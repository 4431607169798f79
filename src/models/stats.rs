use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use chrono::{DateTime, Utc};

/// Running statistics for one monitoring session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Sum of packet counts of every ingested event
    pub total_packets: u64,

    /// Sum of byte sizes of every ingested event
    pub total_bytes: u64,

    /// Number of events classified as anomalous
    pub anomaly_count: u64,

    /// Number of distinct (source, destination) pairs seen
    pub active_connections: usize,

    /// Events per protocol
    pub protocols: HashMap<String, u64>,

    /// Frames discarded because they could not be parsed
    pub dropped_frames: u64,

    /// Session start time
    pub started_at: Option<DateTime<Utc>>,
}
