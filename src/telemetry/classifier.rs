//! Rule-based anomaly classification.
//!
//! Every function here is pure: the same event always yields the same verdict.

use std::net::Ipv4Addr;

use crate::models::event::{NetworkEvent, Severity, Verdict};

/// Bytes above which a single packet is considered oversized
pub const LARGE_PACKET_THRESHOLD: u64 = 1500;

/// Protocols flagged regardless of size
pub const SUSPICIOUS_PROTOCOLS: [&str; 3] = ["ICMP", "FTP", "TELNET"];

pub const MEDIUM_SEVERITY_THRESHOLD: u64 = 2000;
pub const HIGH_SEVERITY_THRESHOLD: u64 = 5000;

/// Individual anomaly rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Size exceeds [`LARGE_PACKET_THRESHOLD`]
    OversizedPacket,
    /// Protocol is in [`SUSPICIOUS_PROTOCOLS`]
    SuspiciousProtocol,
    /// Private source talking to a non-private destination
    PrivateEgress,
}

impl Rule {
    pub const ALL: [Rule; 3] = [Rule::OversizedPacket, Rule::SuspiciousProtocol, Rule::PrivateEgress];

    pub fn matches(&self, event: &NetworkEvent) -> bool {
        match self {
            Rule::OversizedPacket => event.byte_size > LARGE_PACKET_THRESHOLD,
            Rule::SuspiciousProtocol => {
                let protocol = event.protocol.to_uppercase();
                SUSPICIOUS_PROTOCOLS.contains(&protocol.as_str())
            }
            Rule::PrivateEgress => {
                is_private_address(&event.source) && !is_private_address(&event.destination)
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Rule::OversizedPacket => "oversized packet",
            Rule::SuspiciousProtocol => "suspicious protocol",
            Rule::PrivateEgress => "private-to-public egress",
        }
    }
}

/// Classify an event
pub fn classify(event: &NetworkEvent) -> Verdict {
    if Rule::ALL.iter().any(|rule| rule.matches(event)) {
        Verdict::Anomalous(severity_for(event.byte_size))
    } else {
        Verdict::Normal
    }
}

/// Every rule that fires for `event`, in evaluation order
pub fn triggered_rules(event: &NetworkEvent) -> Vec<Rule> {
    Rule::ALL.iter().copied().filter(|rule| rule.matches(event)).collect()
}

/// Classify and attach the verdict
pub fn annotate(event: NetworkEvent) -> NetworkEvent {
    let verdict = classify(&event);
    event.classified(verdict)
}

/// Severity grade by size alone
pub fn severity_for(byte_size: u64) -> Severity {
    if byte_size > HIGH_SEVERITY_THRESHOLD {
        Severity::High
    } else if byte_size > MEDIUM_SEVERITY_THRESHOLD {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// True for dotted-quad addresses in 10/8, 172.16/12 or 192.168/16,
/// with or without a trailing `:port`. Anything that is not an IPv4 literal
/// is treated as public.
pub fn is_private_address(addr: &str) -> bool {
    let host = addr.trim().split(':').next().unwrap_or_default();
    host.parse::<Ipv4Addr>()
        .map(|ip| ip.is_private())
        .unwrap_or(false)
}
