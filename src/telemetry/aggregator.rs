use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::config::WindowConfig;
use crate::models::event::NetworkEvent;
use crate::models::session::{ConnectionState, SessionSnapshot};
use crate::models::stats::Stats;
use crate::telemetry::window::RollingWindow;

/// Folds classified events into bounded history and session statistics.
///
/// Owned by exactly one session; a new session always builds a new one.
pub struct Aggregator {
    events: RollingWindow<NetworkEvent>,
    anomalies: RollingWindow<NetworkEvent>,
    connections: HashSet<(String, String)>,
    stats: Stats,
}

impl Aggregator {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            events: RollingWindow::new(config.events),
            anomalies: RollingWindow::new(config.anomalies),
            connections: HashSet::new(),
            stats: Stats {
                started_at: Some(Utc::now()),
                ..Stats::default()
            },
        }
    }

    /// Append a classified event and update counters
    pub fn ingest(&mut self, event: NetworkEvent) {
        self.stats.total_packets = self.stats.total_packets.saturating_add(event.packet_count);
        self.stats.total_bytes = self.stats.total_bytes.saturating_add(event.byte_size);
        *self.stats.protocols.entry(event.protocol.clone()).or_insert(0) += 1;

        self.connections.insert(event.connection_key());
        self.stats.active_connections = self.connections.len();

        if event.anomaly {
            self.stats.anomaly_count += 1;
            self.anomalies.push(event.clone());
        }
        self.events.push(event);
    }

    /// Count a frame that never made it to an event
    pub fn record_dropped(&mut self) {
        self.stats.dropped_frames += 1;
    }

    /// Empty both windows, the connection set and every counter
    pub fn reset(&mut self) {
        self.events.clear();
        self.anomalies.clear();
        self.connections.clear();
        self.stats = Stats::default();
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn events(&self) -> &RollingWindow<NetworkEvent> {
        &self.events
    }

    pub fn anomalies(&self) -> &RollingWindow<NetworkEvent> {
        &self.anomalies
    }

    pub fn snapshot(&self, session_id: Uuid, connection: ConnectionState) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(session_id),
            events: self.events.to_vec(),
            anomalies: self.anomalies.to_vec(),
            stats: self.stats.clone(),
            connection,
        }
    }
}
