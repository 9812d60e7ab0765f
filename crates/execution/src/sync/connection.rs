//! Streaming connection lifecycle: connect, heartbeat, bounded reconnect.

use super::backoff::Backoff;
use crate::error::ListenerError;
use chainwatch_domain::{ConnectionState, Network};
use chainwatch_protocols::{NodeConnector, NodeProvider};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Backoff growth factor.
    pub multiplier: u32,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Consecutive failed attempts before the manager gives up.
    pub max_attempts: u32,
    /// Interval between heartbeat queries.
    pub heartbeat_interval: Duration,
    /// Timeout for a single heartbeat query.
    pub heartbeat_timeout: Duration,
    /// Consecutive heartbeat failures that force a reconnect.
    pub heartbeat_failure_threshold: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_failure_threshold: 3,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: self.base_delay,
            multiplier: self.multiplier,
            max_delay: self.max_delay,
        }
    }
}

/// A live connection handed out by the [`ConnectionManager`].
///
/// Cheap to clone. Every clone observes the same cancellation, which fires
/// when the manager tears the connection down.
#[derive(Clone)]
pub struct Connection {
    generation: u64,
    provider: Arc<dyn NodeProvider>,
    cancel: CancellationToken,
    manager: Weak<Inner>,
}

impl Connection {
    /// Monotonic id of this connection within its manager.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn provider(&self) -> &Arc<dyn NodeProvider> {
        &self.provider
    }

    /// Token cancelled together with the connection.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reports a hard transport close observed by a consumer.
    pub fn report_closed(&self, reason: &str) {
        if let Some(inner) = self.manager.upgrade() {
            ConnectionManager { inner }.signal_failure(self.generation, reason);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type TerminatedHook = Arc<dyn Fn(Connection) -> BoxFuture<'static, ()> + Send + Sync>;

struct Inner {
    network: Network,
    url: String,
    config: ConnectionConfig,
    connector: Arc<dyn NodeConnector>,
    state: watch::Sender<ConnectionState>,
    current: watch::Sender<Option<Connection>>,
    generation: AtomicU64,
    attempts: AtomicU32,
    /// Set while a reconnect cycle is outstanding.
    reconnect_scheduled: AtomicBool,
    connect_lock: Mutex<()>,
    terminated_hooks: RwLock<Vec<TerminatedHook>>,
    shutdown: CancellationToken,
}

/// Owns the single streaming connection of one network.
///
/// State machine: `Disconnected -> Connecting -> Connected`, with any
/// failure moving to `ReconnectScheduled` and too many consecutive failures
/// to the terminal `Failed`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager for `network` connecting to `url`.
    pub fn new(
        network: Network,
        url: impl Into<String>,
        connector: Arc<dyn NodeConnector>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                network,
                url: url.into(),
                config,
                connector,
                state: watch::Sender::new(ConnectionState::Disconnected),
                current: watch::Sender::new(None),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                reconnect_scheduled: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                terminated_hooks: RwLock::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn network(&self) -> Network {
        self.inner.network
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receiver that sees every installed connection (and `None` while down).
    pub fn subscribe_connection(&self) -> watch::Receiver<Option<Connection>> {
        self.inner.current.subscribe()
    }

    /// The live connection, if any.
    pub fn current(&self) -> Option<Connection> {
        self.inner.current.borrow().clone()
    }

    pub fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Consecutive failed attempts since the last successful heartbeat.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.inner.reconnect_scheduled.load(Ordering::SeqCst)
    }

    /// Registers a hook awaited whenever a connection is torn down, before
    /// the next connection attempt is made.
    pub async fn on_terminated<F, Fut>(&self, hook: F)
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: TerminatedHook = Arc::new(move |conn| Box::pin(hook(conn)));
        self.inner.terminated_hooks.write().await.push(hook);
    }

    /// Opens the first connection.
    ///
    /// A failed first attempt is retried through the normal backoff policy;
    /// this returns once a connection is live or the manager has failed.
    ///
    /// # Errors
    /// Returns [`ListenerError::Fatal`] once `max_attempts` is exceeded.
    pub async fn open(&self) -> Result<Connection, ListenerError> {
        {
            let _guard = self.inner.connect_lock.lock().await;
            if self.inner.shutdown.is_cancelled() {
                return Err(ListenerError::Shutdown);
            }
            if let Some(conn) = self.current() {
                return Ok(conn);
            }
            if self.state() == ConnectionState::Failed {
                return Err(self.fatal());
            }

            if !self.is_reconnect_scheduled() {
                self.transition_to(ConnectionState::Connecting);
                info!(network = %self.inner.network, "Opening node connection");
                match self.inner.connector.connect(&self.inner.url).await {
                    Ok(provider) => return Ok(self.install(provider)),
                    Err(e) => {
                        warn!(network = %self.inner.network, error = %e, "Initial connection failed");
                        self.signal_failure(self.current_generation(), &e.to_string());
                    }
                }
            }
        }

        self.wait_live().await
    }

    /// Returns the live connection, opening or waiting for one as needed.
    ///
    /// # Errors
    /// Returns [`ListenerError::Fatal`] if the manager has failed and
    /// [`ListenerError::Shutdown`] after [`ConnectionManager::shutdown`].
    pub async fn ensure_live(&self) -> Result<Connection, ListenerError> {
        if let Some(conn) = self.current() {
            return Ok(conn);
        }
        if self.state() == ConnectionState::Disconnected && !self.is_reconnect_scheduled() {
            return self.open().await;
        }
        self.wait_live().await
    }

    async fn wait_live(&self) -> Result<Connection, ListenerError> {
        let mut state = self.inner.state.subscribe();
        loop {
            if let Some(conn) = self.current() {
                return Ok(conn);
            }
            if *state.borrow_and_update() == ConnectionState::Failed {
                return Err(self.fatal());
            }
            if self.inner.shutdown.is_cancelled() {
                return Err(ListenerError::Shutdown);
            }
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(ListenerError::Shutdown);
                    }
                }
                _ = self.inner.shutdown.cancelled() => return Err(ListenerError::Shutdown),
            }
        }
    }

    /// Signals that connection `generation` is unusable.
    ///
    /// Signals for superseded generations are ignored, and any number of
    /// signals arriving while a reconnect is outstanding collapse into it.
    /// The connection is detached immediately; hooks and reconnect attempts
    /// run on a background task.
    pub fn signal_failure(&self, generation: u64, reason: &str) {
        let network = self.inner.network;
        if generation != self.current_generation() {
            debug!(%network, generation, reason, "Ignoring failure signal for stale connection");
            return;
        }
        if self.inner.shutdown.is_cancelled() || self.state() == ConnectionState::Failed {
            return;
        }
        if self
            .inner
            .reconnect_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%network, reason, "Reconnect already scheduled, collapsing signal");
            return;
        }

        warn!(%network, generation, reason, "Connection failed, scheduling reconnect");
        let old = self.detach(ConnectionState::ReconnectScheduled);
        let manager = self.clone();
        tokio::spawn(async move { manager.reconnect_cycle(old).await });
    }

    async fn reconnect_cycle(&self, old: Option<Connection>) {
        let network = self.inner.network;
        let backoff = self.inner.config.backoff();

        if let Some(conn) = old {
            self.run_terminated_hooks(conn).await;
        }

        loop {
            if self.inner.shutdown.is_cancelled() {
                self.transition_to(ConnectionState::Disconnected);
                break;
            }

            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt >= self.inner.config.max_attempts {
                error!(%network, attempts = attempt, "Reconnect attempts exhausted, giving up");
                self.transition_to(ConnectionState::Failed);
                break;
            }

            let delay = backoff.delay(attempt);
            info!(
                %network,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.inner.shutdown.cancelled() => continue,
            }

            self.transition_to(ConnectionState::Connecting);
            match self.inner.connector.connect(&self.inner.url).await {
                Ok(_) if self.inner.shutdown.is_cancelled() => continue,
                Ok(provider) => {
                    // install() clears the reconnect guard.
                    self.install(provider);
                    return;
                }
                Err(e) => {
                    warn!(%network, attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                    self.transition_to(ConnectionState::ReconnectScheduled);
                }
            }
        }

        self.inner.reconnect_scheduled.store(false, Ordering::SeqCst);
    }

    /// Takes the current connection out of service and cancels it.
    fn detach(&self, next: ConnectionState) -> Option<Connection> {
        let old = self.inner.current.send_replace(None);
        if let Some(conn) = &old {
            conn.cancel.cancel();
        }
        self.transition_to(next);
        old
    }

    async fn run_terminated_hooks(&self, conn: Connection) {
        let hooks: Vec<TerminatedHook> = self.inner.terminated_hooks.read().await.clone();
        for hook in hooks {
            hook(conn.clone()).await;
        }
        debug!(network = %self.inner.network, generation = conn.generation, "Connection detached");
    }

    fn install(&self, provider: Arc<dyn NodeProvider>) -> Connection {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Connection {
            generation,
            provider,
            cancel: self.inner.shutdown.child_token(),
            manager: Arc::downgrade(&self.inner),
        };

        // Cleared before publishing: the first failure on this connection
        // must schedule a reconnect of its own.
        self.inner.reconnect_scheduled.store(false, Ordering::SeqCst);
        self.inner.current.send_replace(Some(conn.clone()));
        self.transition_to(ConnectionState::Connected);
        info!(network = %self.inner.network, generation, "Node connection live");

        let manager = self.clone();
        let heartbeat_conn = conn.clone();
        tokio::spawn(async move { manager.heartbeat(heartbeat_conn).await });

        conn
    }

    async fn heartbeat(&self, conn: Connection) {
        let network = self.inner.network;
        let interval = self.inner.config.heartbeat_interval;
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = conn.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let result =
                tokio::time::timeout(self.inner.config.heartbeat_timeout, conn.provider.block_number())
                    .await;
            match result {
                Ok(Ok(block)) => {
                    failures = 0;
                    let previous = self.inner.attempts.swap(0, Ordering::SeqCst);
                    if previous > 0 {
                        info!(%network, previous_attempts = previous, "Heartbeat ok, backoff reset");
                    }
                    debug!(%network, block, "Heartbeat ok");
                }
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(%network, failures, error = %e, "Heartbeat failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(%network, failures, "Heartbeat timed out");
                }
            }

            if failures >= self.inner.config.heartbeat_failure_threshold {
                self.signal_failure(conn.generation, "heartbeat failures exceeded threshold");
                return;
            }
        }
    }

    /// Stops the manager: no further reconnects, current connection closed.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(conn) = self.detach(ConnectionState::Disconnected) {
            self.run_terminated_hooks(conn).await;
        }
        info!(network = %self.inner.network, "Connection manager stopped");
    }

    fn transition_to(&self, new_state: ConnectionState) {
        let mut old_state = None;
        self.inner.state.send_if_modified(|state| {
            // Failed is terminal.
            if *state == new_state || *state == ConnectionState::Failed {
                return false;
            }
            old_state = Some(*state);
            *state = new_state;
            true
        });

        if let Some(old_state) = old_state {
            info!(
                network = %self.inner.network,
                old_state = ?old_state,
                new_state = ?new_state,
                "Connection state changed"
            );
        }
    }

    fn fatal(&self) -> ListenerError {
        ListenerError::Fatal(format!(
            "{}: gave up after {} reconnect attempts",
            self.inner.network, self.inner.config.max_attempts
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeConnector, FakeNode};
    use std::sync::atomic::AtomicUsize;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    fn manager(connector: &Arc<FakeConnector>, config: ConnectionConfig) -> ConnectionManager {
        ConnectionManager::new(Network::Testnet, "ws://node", connector.clone(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_connects() {
        let connector = FakeConnector::new(FakeNode::new());
        let manager = manager(&connector, config());

        let conn = manager.open().await.unwrap();

        assert_eq!(conn.generation(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.connect_count(), 1);

        // Already live: no second connect.
        manager.ensure_live().await.unwrap();
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failure_signals_schedule_one_reconnect() {
        let connector = FakeConnector::new(FakeNode::new());
        let manager = manager(&connector, config());
        let conn = manager.open().await.unwrap();

        for _ in 0..5 {
            conn.report_closed("socket closed with code 1006");
        }
        assert!(manager.is_reconnect_scheduled());

        let next = manager.ensure_live().await.unwrap();

        assert_eq!(next.generation(), 2);
        assert!(conn.is_closed());
        assert_eq!(connector.connect_count(), 2);
        assert!(!manager.is_reconnect_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_across_consecutive_failures() {
        let connector = FakeConnector::new(FakeNode::new());
        connector.fail_next(3);
        let manager = manager(&connector, config());

        manager.open().await.unwrap();

        let gaps = connector.connect_gaps();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
        assert_eq!(manager.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_success_resets_backoff() {
        let connector = FakeConnector::new(FakeNode::new());
        connector.fail_next(2);
        let manager = manager(&connector, config());
        let conn = manager.open().await.unwrap();
        assert_eq!(manager.attempts(), 2);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(manager.attempts(), 0);

        // The next failure starts again from the base delay.
        let before = tokio::time::Instant::now();
        conn.report_closed("dropped");
        manager.ensure_live().await.unwrap();
        assert_eq!(
            connector.last_connect_at().map(|at| at - before),
            Some(Duration::from_secs(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failures_trigger_reconnect() {
        let node = FakeNode::new();
        let connector = FakeConnector::new(node.clone());
        let manager = manager(&connector, config());
        manager.open().await.unwrap();

        node.set_heartbeat_failing(true);
        tokio::time::sleep(Duration::from_secs(25 * 2 + 1)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_secs(25)).await;
        node.set_heartbeat_failing(false);
        let conn = manager.ensure_live().await.unwrap();

        assert_eq!(conn.generation(), 2);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_are_fatal() {
        let connector = FakeConnector::new(FakeNode::new());
        connector.fail_next(u32::MAX);
        let manager = manager(
            &connector,
            ConnectionConfig {
                max_attempts: 3,
                ..config()
            },
        );

        let err = manager.open().await.unwrap_err();

        assert!(matches!(err, ListenerError::Fatal(_)));
        assert_eq!(manager.state(), ConnectionState::Failed);
        // One initial attempt plus three retries.
        assert_eq!(connector.connect_count(), 4);
        assert!(matches!(
            manager.ensure_live().await,
            Err(ListenerError::Fatal(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_reported_on_fresh_connection_reconnects() {
        let connector = FakeConnector::new(FakeNode::new());
        let manager = manager(
            &connector,
            ConnectionConfig {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                ..config()
            },
        );
        let first = manager.open().await.unwrap();
        let mut connections = manager.subscribe_connection();
        connections.borrow_and_update();

        first.report_closed("dropped");
        let second = loop {
            connections.changed().await.unwrap();
            if let Some(conn) = connections.borrow_and_update().clone() {
                break conn;
            }
        };
        // Fail the replacement as soon as it is published.
        second.report_closed("subscription failed");

        let third = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(conn) = manager.current().filter(|c| c.generation() == 3) {
                    return conn;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("failure on the fresh connection was dropped");

        assert!(second.is_closed());
        assert!(!third.is_closed());
        assert_eq!(connector.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_ignored() {
        let connector = FakeConnector::new(FakeNode::new());
        let manager = manager(&connector, config());
        let first = manager.open().await.unwrap();
        first.report_closed("closed");
        manager.ensure_live().await.unwrap();

        first.report_closed("late close from old socket");

        assert!(!manager.is_reconnect_scheduled());
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_hooks_run_before_next_connect() {
        let connector = FakeConnector::new(FakeNode::new());
        let manager = manager(&connector, config());
        let seen_connects = Arc::new(AtomicUsize::new(0));

        let hook_connector = connector.clone();
        let hook_seen = seen_connects.clone();
        manager
            .on_terminated(move |conn| {
                let connector = hook_connector.clone();
                let seen = hook_seen.clone();
                async move {
                    assert!(conn.is_closed());
                    seen.store(connector.connect_count(), Ordering::SeqCst);
                }
            })
            .await;

        let conn = manager.open().await.unwrap();
        conn.report_closed("closed");
        manager.ensure_live().await.unwrap();

        assert_eq!(seen_connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnects() {
        let connector = FakeConnector::new(FakeNode::new());
        let manager = manager(&connector, config());
        let conn = manager.open().await.unwrap();

        manager.shutdown().await;
        conn.report_closed("closed after shutdown");
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(conn.is_closed());
        assert_eq!(connector.connect_count(), 1);
        assert!(matches!(
            manager.ensure_live().await,
            Err(ListenerError::Shutdown)
        ));
    }
}
