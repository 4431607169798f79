pub mod handlers;
pub mod routes;
pub mod websocket;

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::session::manager::SessionManager;

/// Session manager as shared with request handlers
pub type SharedSessionManager = Arc<RwLock<SessionManager>>;
