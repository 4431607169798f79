use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anomaly intensity grade. Only meaningful on anomalous events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(label)
    }
}

/// Outcome of classifying one event.
///
/// Severity lives inside the anomalous variant, so an event can never carry
/// a severity without being flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Normal,
    Anomalous(Severity),
}

impl Verdict {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Verdict::Anomalous(_))
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Verdict::Normal => None,
            Verdict::Anomalous(severity) => Some(*severity),
        }
    }
}

/// Canonical unit of telemetry, produced by the normalizer and annotated
/// by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    /// Instant the event was observed by this process
    pub timestamp: DateTime<Utc>,

    /// Number of packets this event represents
    pub packet_count: u64,

    /// Packet or transfer size in bytes, always positive
    pub byte_size: u64,

    /// True when no usable size field was present and `byte_size` was synthesized
    pub size_inferred: bool,

    /// Uppercased protocol token (TCP, UDP, ICMP, ...)
    pub protocol: String,

    /// Source address, kept verbatim
    pub source: String,

    /// Destination address, kept verbatim
    pub destination: String,

    /// Set only by the classifier
    pub anomaly: bool,

    /// Present iff `anomaly` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl NetworkEvent {
    /// Attach a classification result. Consumes the event so a classified
    /// event is never edited in place afterwards.
    pub fn classified(mut self, verdict: Verdict) -> Self {
        self.anomaly = verdict.is_anomaly();
        self.severity = verdict.severity();
        self
    }

    pub fn verdict(&self) -> Verdict {
        match (self.anomaly, self.severity) {
            (true, Some(severity)) => Verdict::Anomalous(severity),
            _ => Verdict::Normal,
        }
    }

    /// Ordered (source, destination) pair identifying a flow
    pub fn connection_key(&self) -> (String, String) {
        (self.source.clone(), self.destination.clone())
    }
}
