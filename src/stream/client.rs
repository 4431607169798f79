//! Connection lifecycle for the telemetry stream.
//!
//! The client is a small state machine (`disconnected`, `connecting`,
//! `connected`) driven by two kinds of background work: the connection task
//! that reads frames, and at most one reconnect timer. Timers carry a
//! generation token; `stop()` advances the generation so a timer that fires
//! late finds itself superseded and does nothing.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::models::config::StreamConfig;
use crate::models::session::ConnectionState;
use crate::stream::transport::Connector;
use crate::utils::error::{AppError, AppResult};

/// Capacity of the channel between the connection task and the frame processor
pub const FRAME_CHANNEL_CAPACITY: usize = 100;

/// How long `shutdown` waits for the connection task to finish closing
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Frames (or per-frame failures) handed to the processing side
pub type FrameSender = mpsc::Sender<AppResult<String>>;

/// Manages one logical telemetry stream with reconnect-on-failure
pub struct StreamClient {
    inner: Arc<Inner>,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    frames: FrameSender,
    state: watch::Sender<ConnectionState>,
    /// Whether the owner still wants the stream open
    monitoring: AtomicBool,
    /// Bumped on every scheduled timer and on every stop
    generation: AtomicU64,
    pending_timer: Mutex<Option<PendingTimer>>,
    /// Bumped by `stop()`; connection tasks watch it to know when to close
    shutdown: watch::Sender<u64>,
    connection_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamClient {
    pub fn new(config: StreamConfig, connector: Arc<dyn Connector>, frames: FrameSender) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                frames,
                state,
                monitoring: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                pending_timer: Mutex::new(None),
                shutdown,
                connection_task: Mutex::new(None),
            }),
        }
    }

    /// Begin monitoring. No-op while a connection is open or being opened.
    pub fn start(&self) {
        self.inner.monitoring.store(true, Ordering::SeqCst);
        self.inner.connect();
    }

    /// Stop monitoring: cancel any pending reconnect, close the connection
    /// with a normal closure and never reconnect afterwards.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.monitoring.store(false, Ordering::SeqCst);
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.cancel_pending_timer();
        inner.shutdown.send_modify(|epoch| *epoch += 1);
        inner.set_state(ConnectionState::Disconnected);
        info!("Stream client for {} stopped", inner.config.endpoint);
    }

    /// `stop()`, then give the connection task a moment to send its close frame
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.inner.connection_task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(CLOSE_GRACE, task).await {
                Ok(_) => debug!("Connection task finished"),
                Err(_) => warn!("Connection task did not finish within {:?}", CLOSE_GRACE),
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.pending_timer.lock().is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if self.is_monitoring() {
            self.stop();
        }
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            info!("Stream {}: {:?} -> {:?}", self.config.endpoint, state, next);
            *state = next;
            true
        });
    }

    fn is_stopped(&self, epoch: u64) -> bool {
        !self.monitoring.load(Ordering::SeqCst) || *self.shutdown.borrow() != epoch
    }

    /// Move to `next` only from one of `from`, and only while the connection
    /// started in `epoch` is still current. The check runs under the state
    /// lock, so a concurrent `stop()` either happens first and wins, or
    /// happens after and overwrites the new state with `disconnected`.
    fn advance(&self, epoch: u64, from: &[ConnectionState], next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if !from.contains(state) || self.is_stopped(epoch) {
                return false;
            }
            info!("Stream {}: {:?} -> {:?}", self.config.endpoint, state, next);
            *state = next;
            true
        })
    }

    /// Move `disconnected -> connecting` and spawn the connection task
    fn connect(self: &Arc<Self>) {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !transitioned {
            debug!("Connect skipped, stream is already {:?}", *self.state.borrow());
            return;
        }

        info!("Connecting to telemetry stream at {}", self.config.endpoint);
        let epoch = *self.shutdown.borrow();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.run_connection(epoch).await });
        *self.connection_task.lock() = Some(handle);
    }

    async fn run_connection(self: Arc<Self>, epoch: u64) {
        let mut shutdown = self.shutdown.subscribe();

        let opened = tokio::select! {
            result = self.connector.open(&self.config.endpoint) => result,
            _ = shutdown_requested(&mut shutdown, epoch) => {
                debug!("Connection attempt abandoned, client stopped");
                return;
            }
        };

        let mut source = match opened {
            Ok(source) => source,
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.config.endpoint, e);
                self.on_disconnect(epoch);
                return;
            }
        };

        if !self.advance(epoch, &[ConnectionState::Connecting], ConnectionState::Connected) {
            debug!("Connection opened after stop, closing it");
            let _ = source.close().await;
            return;
        }
        self.cancel_pending_timer();

        loop {
            tokio::select! {
                frame = source.next_frame() => match frame {
                    Some(Ok(text)) => {
                        if self.frames.send(Ok(text)).await.is_err() {
                            debug!("Frame consumer gone, closing stream");
                            let _ = source.close().await;
                            return;
                        }
                    }
                    Some(Err(AppError::FrameParse(reason))) => {
                        if self.frames.send(Err(AppError::FrameParse(reason))).await.is_err() {
                            let _ = source.close().await;
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Telemetry stream error: {}", e);
                        break;
                    }
                    None => {
                        info!("Telemetry stream closed by peer");
                        break;
                    }
                },
                _ = shutdown_requested(&mut shutdown, epoch) => {
                    if let Err(e) = source.close().await {
                        debug!("Error while closing stream: {}", e);
                    }
                    return;
                }
            }
        }

        self.on_disconnect(epoch);
    }

    /// Transport closed or failed on its own
    fn on_disconnect(self: &Arc<Self>, epoch: u64) {
        // After a stop the state belongs to whoever comes next
        let from = [ConnectionState::Connecting, ConnectionState::Connected];
        if self.advance(epoch, &from, ConnectionState::Disconnected) {
            self.schedule_reconnect();
        }
    }

    /// Arm the reconnect timer unless one is already pending
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut slot = self.pending_timer.lock();
        if slot.is_some() {
            debug!("Reconnect already pending, not scheduling another");
            return;
        }
        if !self.monitoring.load(Ordering::SeqCst) {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.config.reconnect_delay;
        info!("Reconnecting to {} in {:?}", self.config.endpoint, delay);

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(generation);
        });
        *slot = Some(PendingTimer { generation, handle });
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        {
            let mut slot = self.pending_timer.lock();
            match slot.as_ref() {
                Some(timer) if timer.generation == generation => *slot = None,
                _ => {
                    debug!("Reconnect timer {} superseded, ignoring", generation);
                    return;
                }
            }
        }

        if self.generation.load(Ordering::SeqCst) != generation
            || !self.monitoring.load(Ordering::SeqCst)
        {
            debug!("Reconnect timer {} fired after stop, ignoring", generation);
            return;
        }

        self.connect();
    }

    fn cancel_pending_timer(&self) {
        if let Some(timer) = self.pending_timer.lock().take() {
            timer.handle.abort();
            debug!("Cancelled pending reconnect timer {}", timer.generation);
        }
    }
}

/// Resolves once the shutdown epoch moves past `epoch`
async fn shutdown_requested(rx: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *rx.borrow_and_update() != epoch {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stream::transport::FrameSource;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// In-memory connector with scripted outcomes. When the script runs out,
    /// connections are refused.
    #[derive(Default)]
    pub(crate) struct ScriptedConnector {
        pub attempts: AtomicUsize,
        accepts: Mutex<VecDeque<ScriptedSource>>,
    }

    /// Connector whose connection attempts never complete
    #[derive(Default)]
    pub(crate) struct StalledConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connector for StalledConnector {
        async fn open(&self, _endpoint: &str) -> AppResult<Box<dyn FrameSource>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    pub(crate) struct Peer {
        pub frames: mpsc::UnboundedSender<String>,
        pub closed_by_client: Arc<AtomicBool>,
    }

    pub(crate) struct ScriptedSource {
        frames: mpsc::UnboundedReceiver<String>,
        closed_by_client: Arc<AtomicBool>,
    }

    impl ScriptedConnector {
        /// Queue one successful connection and return its peer side
        pub fn accept_next(&self) -> Peer {
            let (tx, rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            self.accepts.lock().push_back(ScriptedSource {
                frames: rx,
                closed_by_client: closed.clone(),
            });
            Peer {
                frames: tx,
                closed_by_client: closed,
            }
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(&self, endpoint: &str) -> AppResult<Box<dyn FrameSource>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.accepts.lock().pop_front() {
                Some(source) => Ok(Box::new(source)),
                None => Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("{} refused", endpoint),
                ))),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Option<AppResult<String>> {
            self.frames.recv().await.map(Ok)
        }

        async fn close(&mut self) -> AppResult<()> {
            self.closed_by_client.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        target: ConnectionState,
    ) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while *rx.borrow_and_update() != target {
                rx.changed().await.expect("state channel closed");
            }
        })
        .await
        .expect("timed out waiting for connection state");
    }

    fn client<C: Connector + 'static>(
        connector: &Arc<C>,
    ) -> (StreamClient, mpsc::Receiver<AppResult<String>>) {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let config = StreamConfig {
            endpoint: "ws://telemetry.test:8765".to_string(),
            reconnect_delay: Duration::from_secs(3),
        };
        let connector: Arc<dyn Connector> = connector.clone();
        (StreamClient::new(config, connector, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_forwards_frames() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.accept_next();
        let (client, mut frames) = client(&connector);
        let mut state = client.subscribe_state();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.start();
        wait_for_state(&mut state, ConnectionState::Connected).await;

        peer.frames.send(r#"{"protocol":"tcp"}"#.to_string()).unwrap();
        let frame = frames.recv().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"protocol":"tcp"}"#);
        assert!(!client.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_connected_is_noop() {
        let connector = Arc::new(ScriptedConnector::default());
        let _peer = connector.accept_next();
        let (client, _frames) = client(&connector);
        let mut state = client.subscribe_state();

        client.start();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        client.start();
        client.start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_connecting_is_noop() {
        let connector = Arc::new(StalledConnector::default());
        let (client, _frames) = client(&connector);

        client.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_connection_cannot_change_state() {
        let connector = Arc::new(StalledConnector::default());
        let (client, _frames) = client(&connector);

        client.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let first_epoch = *client.inner.shutdown.borrow();

        client.stop();
        client.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Connecting);

        // Late steps from the stopped attempt are rejected
        let connected = client.inner.advance(
            first_epoch,
            &[ConnectionState::Connecting],
            ConnectionState::Connected,
        );
        assert!(!connected);
        client.inner.on_disconnect(first_epoch);
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.reconnect_pending());

        // A stop racing the open leaves the client restartable
        client.stop();
        let current_epoch = *client.inner.shutdown.borrow();
        let connected = client.inner.advance(
            current_epoch,
            &[ConnectionState::Connecting],
            ConnectionState::Connected,
        );
        assert!(!connected);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.start();
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_schedules_exactly_one_reconnect() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.accept_next();
        let (client, _frames) = client(&connector);
        let mut state = client.subscribe_state();

        client.start();
        wait_for_state(&mut state, ConnectionState::Connected).await;

        drop(peer);
        wait_for_state(&mut state, ConnectionState::Disconnected).await;
        assert!(client.reconnect_pending());

        // A second schedule before the first timer fires is suppressed
        let generation = client.inner.generation.load(Ordering::SeqCst);
        client.inner.schedule_reconnect();
        assert_eq!(client.inner.generation.load(Ordering::SeqCst), generation);

        let _second = connector.accept_next();
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        wait_for_state(&mut state, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        assert!(!client.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_keeps_retrying() {
        let connector = Arc::new(ScriptedConnector::default());
        let (client, _frames) = client(&connector);

        client.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(connector.attempts(), 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_delay_prevents_connection() {
        let connector = Arc::new(ScriptedConnector::default());
        let (client, _frames) = client(&connector);

        client.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.reconnect_pending());

        let _peer = connector.accept_next();
        client.stop();
        assert!(!client.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_is_ignored() {
        let connector = Arc::new(ScriptedConnector::default());
        let (client, _frames) = client(&connector);
        client.inner.monitoring.store(true, Ordering::SeqCst);

        client.inner.fire_reconnect(42);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.attempts(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_with_normal_closure() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.accept_next();
        let (client, _frames) = client(&connector);
        let mut state = client.subscribe_state();

        client.start();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        client.shutdown().await;

        assert!(peer.closed_by_client.load(Ordering::SeqCst));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // The transport reporting closure afterwards must not trigger a reconnect
        drop(peer);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(!client.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let connector = Arc::new(ScriptedConnector::default());
        let _first = connector.accept_next();
        let (client, _frames) = client(&connector);
        let mut state = client.subscribe_state();

        client.start();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        client.shutdown().await;

        let _second = connector.accept_next();
        client.start();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        assert!(client.is_monitoring());
    }
}
