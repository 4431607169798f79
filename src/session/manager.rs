use chrono::{DateTime, Utc};
use log::{debug, info, log_enabled, trace, warn, Level};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::config::AppConfig;
use crate::models::event::NetworkEvent;
use crate::models::identity::Identity;
use crate::models::session::{ConnectionState, SessionSnapshot, SessionStatus};
use crate::stream::client::{StreamClient, FRAME_CHANNEL_CAPACITY};
use crate::stream::transport::Connector;
use crate::telemetry::aggregator::Aggregator;
use crate::telemetry::classifier;
use crate::telemetry::normalizer;
use crate::utils::error::{AppError, AppResult};

/// Buffered events per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `stop_session` waits for the processor to drain
const PROCESSOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Coordinates monitoring sessions and republishes their output
pub struct SessionManager {
    /// Application configuration
    config: AppConfig,

    /// Transport used by every session's stream client
    connector: Arc<dyn Connector>,

    /// Annotated events, one message per ingest
    events_tx: broadcast::Sender<NetworkEvent>,

    /// Latest snapshot of the active session
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,

    /// The running session, if any
    active: Option<MonitorSession>,
}

/// State owned by one start/stop cycle
struct MonitorSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    operator: Option<Identity>,
    client: StreamClient,
    processor: JoinHandle<()>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(config: AppConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            config,
            connector,
            events_tx,
            snapshot_tx: Arc::new(snapshot_tx),
            active: None,
        }
    }

    /// Start a new monitoring session with fresh windows, stats and connection set
    pub fn start_session(&mut self, operator: Option<Identity>) -> AppResult<Uuid> {
        if self.active.is_some() {
            return Err(AppError::Session("Monitoring session is already running".to_string()));
        }

        let id = Uuid::new_v4();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let client = StreamClient::new(self.config.stream_config(), self.connector.clone(), frame_tx);
        let aggregator = Aggregator::new(self.config.window_config());

        self.snapshot_tx
            .send_replace(aggregator.snapshot(id, ConnectionState::Disconnected));

        let processor = tokio::spawn(process_frames(
            id,
            aggregator,
            frame_rx,
            client.subscribe_state(),
            self.events_tx.clone(),
            self.snapshot_tx.clone(),
        ));

        match &operator {
            Some(identity) => info!(
                "Starting monitoring session {} for {} ({:?})",
                id, identity.username, identity.role
            ),
            None => info!("Starting monitoring session {}", id),
        }
        client.start();

        self.active = Some(MonitorSession {
            id,
            started_at: Utc::now(),
            operator,
            client,
            processor,
        });

        Ok(id)
    }

    /// Stop the active session and publish an empty snapshot
    pub async fn stop_session(&mut self) -> AppResult<()> {
        let session = self
            .active
            .take()
            .ok_or_else(|| AppError::Session("No monitoring session is running".to_string()))?;

        info!("Stopping monitoring session {}", session.id);
        session.client.shutdown().await;

        // Dropping the client releases the frame sender, which lets the
        // processor reset its aggregator and exit.
        let MonitorSession { id, client, mut processor, .. } = session;
        drop(client);
        if tokio::time::timeout(PROCESSOR_DRAIN_TIMEOUT, &mut processor).await.is_err() {
            warn!("Frame processor for session {} did not drain, aborting", id);
            processor.abort();
        }

        self.snapshot_tx.send_replace(SessionSnapshot::default());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        match &self.active {
            Some(session) => SessionStatus {
                running: true,
                session_id: Some(session.id),
                started_at: Some(session.started_at),
                connection: session.client.state(),
                endpoint: session.client.endpoint().to_string(),
                operator: session.operator.clone(),
            },
            None => SessionStatus {
                running: false,
                session_id: None,
                started_at: None,
                connection: ConnectionState::Disconnected,
                endpoint: self.config.endpoint.clone(),
                operator: None,
            },
        }
    }

    /// Latest published snapshot
    pub fn current_snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to annotated events as they are ingested
    pub fn subscribe_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events_tx.subscribe()
    }

    /// Subscribe to snapshot updates
    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }
}

/// Single writer of a session's aggregator
async fn process_frames(
    session_id: Uuid,
    mut aggregator: Aggregator,
    mut frames: mpsc::Receiver<AppResult<String>>,
    mut state: watch::Receiver<ConnectionState>,
    events_tx: broadcast::Sender<NetworkEvent>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
) {
    let mut state_open = true;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let connection = *state.borrow();
                match frame.and_then(|text| normalizer::parse_record(&text)) {
                    Ok(record) => {
                        let event = classifier::annotate(normalizer::normalize(&record));
                        if log_enabled!(Level::Trace) {
                            trace!("Ingesting {:?}", event);
                        }
                        aggregator.ingest(event.clone());
                        snapshot_tx.send_replace(aggregator.snapshot(session_id, connection));
                        // No subscribers is fine
                        let _ = events_tx.send(event);
                    }
                    Err(e) => {
                        warn!("Dropping malformed frame: {}", e);
                        aggregator.record_dropped();
                        snapshot_tx.send_replace(aggregator.snapshot(session_id, connection));
                    }
                }
            }
            changed = state.changed(), if state_open => {
                if changed.is_err() {
                    state_open = false;
                    continue;
                }
                let connection = *state.borrow_and_update();
                snapshot_tx.send_replace(aggregator.snapshot(session_id, connection));
            }
        }
    }

    aggregator.reset();
    debug!("Frame processor for session {} stopped", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::Severity;
    use crate::models::identity::Role;
    use crate::stream::client::tests::{wait_for_state, ScriptedConnector};

    fn manager(connector: &Arc<ScriptedConnector>) -> SessionManager {
        let connector: Arc<dyn Connector> = connector.clone();
        SessionManager::new(AppConfig::default(), connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_flow_through_pipeline() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.accept_next();
        let mut manager = manager(&connector);
        let mut events = manager.subscribe_events();

        manager.start_session(None).unwrap();
        let mut state = manager.active.as_ref().unwrap().client.subscribe_state();
        wait_for_state(&mut state, ConnectionState::Connected).await;

        peer.frames
            .send(r#"{"source":"192.168.1.5","destination":"8.8.8.8","bytes":6000}"#.to_string())
            .unwrap();
        let event = events.recv().await.unwrap();
        assert!(event.anomaly);
        assert_eq!(event.severity, Some(Severity::High));
        assert_eq!(event.byte_size, 6000);

        peer.frames.send("definitely not json".to_string()).unwrap();
        peer.frames
            .send(r#"{"protocol":"udp","source":"10.0.0.1","destination":"10.0.0.2","len":80}"#.to_string())
            .unwrap();
        let event = events.recv().await.unwrap();
        assert!(!event.anomaly);
        assert_eq!(event.protocol, "UDP");

        let snapshot = manager.current_snapshot();
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.anomalies.len(), 1);
        assert_eq!(snapshot.stats.total_packets, 2);
        assert_eq!(snapshot.stats.total_bytes, 6080);
        assert_eq!(snapshot.stats.anomaly_count, 1);
        assert_eq!(snapshot.stats.active_connections, 2);
        assert_eq!(snapshot.stats.dropped_frames, 1);
        assert_eq!(snapshot.connection, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_visible_in_snapshot() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.accept_next();
        let mut manager = manager(&connector);

        manager.start_session(None).unwrap();
        let mut state = manager.active.as_ref().unwrap().client.subscribe_state();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.current_snapshot().connection, ConnectionState::Connected);

        drop(peer);
        wait_for_state(&mut state, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.current_snapshot().connection, ConnectionState::Disconnected);
        assert!(manager.is_running());
        assert_eq!(manager.status().connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_and_restart_starts_fresh() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.accept_next();
        let mut manager = manager(&connector);
        let mut events = manager.subscribe_events();

        let first = manager.start_session(None).unwrap();
        let mut state = manager.active.as_ref().unwrap().client.subscribe_state();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        peer.frames
            .send(r#"{"protocol":"ICMP","source":"8.8.8.8","destination":"1.1.1.1","length":200}"#.to_string())
            .unwrap();
        events.recv().await.unwrap();
        assert_eq!(manager.current_snapshot().stats.active_connections, 1);

        manager.stop_session().await.unwrap();
        assert!(!manager.is_running());
        assert!(peer.closed_by_client.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(manager.current_snapshot(), SessionSnapshot::default());

        // Nothing reconnects after stop
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 1);

        let _peer = connector.accept_next();
        let second = manager.start_session(None).unwrap();
        assert_ne!(first, second);
        let snapshot = manager.current_snapshot();
        assert_eq!(snapshot.session_id, Some(second));
        assert!(snapshot.events.is_empty());
        assert_eq!(snapshot.stats.active_connections, 0);
        assert_eq!(snapshot.stats.total_packets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_errors_and_status() {
        let connector = Arc::new(ScriptedConnector::default());
        let _peer = connector.accept_next();
        let mut manager = manager(&connector);

        assert!(matches!(manager.stop_session().await, Err(AppError::Session(_))));
        assert!(!manager.status().running);

        let operator = Identity {
            id: "2".to_string(),
            username: "analyst".to_string(),
            email: "analyst@example.com".to_string(),
            role: Role::Analyst,
        };
        let id = manager.start_session(Some(operator.clone())).unwrap();
        assert!(matches!(manager.start_session(None), Err(AppError::Session(_))));

        let status = manager.status();
        assert!(status.running);
        assert_eq!(status.session_id, Some(id));
        assert_eq!(status.operator, Some(operator));
        assert_eq!(status.endpoint, AppConfig::default().endpoint);

        manager.stop_session().await.unwrap();
    }
}
