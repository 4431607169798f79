//! Live network telemetry ingestion: normalization, anomaly classification,
//! rolling statistics and a resilient stream client behind a REST/WebSocket API.

pub mod api;
pub mod detector;
pub mod models;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod utils;
