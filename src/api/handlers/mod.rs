pub mod analyze;
pub mod session;
pub mod telemetry;
