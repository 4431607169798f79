pub mod config;
pub mod event;
pub mod identity;
pub mod session;
pub mod stats;
