//! Per-network listener wiring.
//!
//! A [`ListenerContext`] owns everything one network needs: the connection
//! manager, the router, the confirmer and the binding slot. Binding changes
//! and new connections are serialized under one rebind lock so a router is
//! never bound twice.

use crate::confirmation::{ConfirmerConfig, TransactionConfirmer};
use crate::error::ListenerError;
use crate::handlers::{HandlerTable, default_table};
use crate::sync::{
    ConfigWatcher, Connection, ConnectionConfig, ConnectionManager, EventRouter, LivenessMarker,
    candidate_binding,
};
use chainwatch_data::{ConfigFeed, StateStore};
use chainwatch_domain::{ConnectionState, ContractBinding, Network, normalize_address};
use chainwatch_protocols::{EventDecoder, NodeConnector, NodeProvider};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings for one network's listener.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Network this listener serves.
    pub network: Network,
    /// WebSocket endpoint for subscriptions.
    pub wss_url: String,
    /// HTTP endpoint for receipt polling.
    pub rpc_url: String,
    /// Address the config document must carry at startup, if set.
    pub expected_address: Option<String>,
    /// Reconnect and heartbeat policy.
    pub connection: ConnectionConfig,
    /// Receipt confirmation policy.
    pub confirmer: ConfirmerConfig,
}

impl ListenerSettings {
    pub fn new(network: Network, wss_url: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            network,
            wss_url: wss_url.into(),
            rpc_url: rpc_url.into(),
            expected_address: None,
            connection: ConnectionConfig::default(),
            confirmer: ConfirmerConfig::default(),
        }
    }
}

/// Collaborators a [`ListenerContext`] is built from.
#[derive(Clone)]
pub struct ListenerParts {
    /// Opens the subscription connection.
    pub connector: Arc<dyn NodeConnector>,
    /// Separate client used for receipt polling.
    pub poller: Arc<dyn NodeProvider>,
    pub store: Arc<dyn StateStore>,
    pub feed: Arc<dyn ConfigFeed>,
    /// Shared across networks.
    pub watcher: Arc<ConfigWatcher>,
}

/// Point-in-time view of a listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerStatus {
    pub network: Network,
    pub connection_state: ConnectionState,
    pub binding_address: Option<String>,
    pub binding_version: Option<u64>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub pending_confirmations: usize,
    pub reconnect_attempts: u32,
}

struct Inner {
    settings: ListenerSettings,
    connections: ConnectionManager,
    router: EventRouter,
    confirmer: TransactionConfirmer,
    feed: Arc<dyn ConfigFeed>,
    watcher: Arc<ConfigWatcher>,
    slot: watch::Sender<Option<Arc<ContractBinding>>>,
    liveness: LivenessMarker,
    rebind_lock: Mutex<()>,
    follower: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// The listener of one network.
#[derive(Clone)]
pub struct ListenerContext {
    inner: Arc<Inner>,
}

impl ListenerContext {
    /// Builds a listener with the default handler table.
    ///
    /// # Errors
    /// Returns [`ListenerError::Config`] if the handler table is invalid.
    pub fn new(settings: ListenerSettings, parts: ListenerParts) -> Result<Self, ListenerError> {
        Self::build(settings, parts, default_table)
    }

    /// Builds a listener routing to `handlers` instead of the default table.
    pub fn with_handlers(
        settings: ListenerSettings,
        parts: ListenerParts,
        handlers: HandlerTable,
    ) -> Result<Self, ListenerError> {
        Self::build(settings, parts, |_, _| Ok(handlers))
    }

    fn build<F>(settings: ListenerSettings, parts: ListenerParts, handlers: F) -> Result<Self, ListenerError>
    where
        F: FnOnce(TransactionConfirmer, Arc<dyn StateStore>) -> Result<HandlerTable, ListenerError>,
    {
        let network = settings.network;
        let connections = ConnectionManager::new(
            network,
            settings.wss_url.clone(),
            parts.connector,
            settings.connection.clone(),
        );
        let confirmer = TransactionConfirmer::new(
            network,
            settings.confirmer.clone(),
            parts.store.clone(),
            parts.poller,
            connections.clone(),
        );
        let table = handlers(confirmer.clone(), parts.store)?;
        let liveness = LivenessMarker::new();
        let router = EventRouter::new(network, table, liveness.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                connections,
                router,
                confirmer,
                feed: parts.feed,
                watcher: parts.watcher,
                slot: watch::Sender::new(None),
                liveness,
                rebind_lock: Mutex::new(()),
                follower: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn network(&self) -> Network {
        self.inner.settings.network
    }

    pub fn confirmer(&self) -> &TransactionConfirmer {
        &self.inner.confirmer
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// The binding currently in force.
    pub fn binding(&self) -> Option<Arc<ContractBinding>> {
        self.inner.slot.borrow().clone()
    }

    /// Reads the config, connects, binds and starts following changes.
    ///
    /// # Errors
    /// - [`ListenerError::Config`] if there is no usable config document or
    ///   its address differs from the expected one.
    /// - [`ListenerError::Fatal`] if no connection can be established.
    pub async fn start(&self) -> Result<(), ListenerError> {
        let network = self.network();
        let document = self
            .inner
            .feed
            .current(network)
            .await?
            .ok_or_else(|| ListenerError::Config(format!("no contract config published for {network}")))?;

        if let Some(expected) = &self.inner.settings.expected_address {
            let expected = normalize_address(expected)?;
            let published = normalize_address(&document.address)?;
            if !expected.eq_ignore_ascii_case(&published) {
                error!(%network, %expected, %published, "Config address does not match the expected contract");
                return Err(ListenerError::Config(format!(
                    "config address {published} does not match expected {expected}"
                )));
            }
        }

        let binding = candidate_binding(None, &document)?
            .ok_or_else(|| ListenerError::Config(format!("no contract binding for {network}")))?;
        EventDecoder::from_descriptor(binding.interface())?;
        info!(%network, address = %binding.address(), "Starting listener");
        self.inner.slot.send_replace(Some(Arc::new(binding)));

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .connections
            .on_terminated(move |conn| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        ListenerContext { inner }.release(&conn).await;
                    }
                }
            })
            .await;

        self.inner.connections.open().await?;
        let follower = tokio::spawn(follow_connections(
            Arc::downgrade(&self.inner),
            self.inner.connections.subscribe_connection(),
            self.inner.shutdown.clone(),
        ));
        *self.inner.follower.lock().await = Some(follower);

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .watcher
            .watch(network, self.inner.slot.subscribe(), move |next| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => ListenerContext { inner }.rebind(next).await,
                        None => Err(ListenerError::Shutdown),
                    }
                }
            })
            .await?;

        Ok(())
    }

    /// Switches to `next`: unbind, cancel outstanding confirmations, swap
    /// the slot, bind on the live connection.
    ///
    /// Cancelled confirmations get no terminal write. Their records keep the
    /// `pending` status written when tracking started.
    ///
    /// # Errors
    /// Returns [`ListenerError::Config`] if `next` cannot be decoded against
    /// (the previous binding stays in force), or the bind error.
    pub async fn rebind(&self, next: Arc<ContractBinding>) -> Result<(), ListenerError> {
        let network = self.network();
        EventDecoder::from_descriptor(next.interface())?;

        let _guard = self.inner.rebind_lock.lock().await;
        self.inner.router.unbind().await;
        self.inner.confirmer.cancel_all().await;
        self.inner.slot.send_replace(Some(next.clone()));
        info!(
            %network,
            address = %next.address(),
            version = next.version(),
            "Binding swapped"
        );

        match self.inner.connections.current() {
            Some(conn) => self.inner.router.bind(&conn, next).await,
            None => {
                debug!(%network, "No live connection, binding on reconnect");
                Ok(())
            }
        }
    }

    /// Binds the active binding on `conn` unless it is stale or already bound.
    async fn attach(&self, conn: &Connection) {
        let network = self.network();
        let _guard = self.inner.rebind_lock.lock().await;
        if conn.is_closed() || conn.generation() != self.inner.connections.current_generation() {
            debug!(%network, generation = conn.generation(), "Skipping bind on superseded connection");
            return;
        }
        if let Some((_, generation)) = self.inner.router.bound().await {
            if generation == conn.generation() {
                return;
            }
            self.inner.router.unbind().await;
        }

        let Some(binding) = self.binding() else {
            return;
        };
        if let Err(e) = self.inner.router.bind(conn, binding).await {
            warn!(%network, generation = conn.generation(), error = %e, "Bind on new connection failed");
        }
    }

    /// Unbinds the router from a connection that went away.
    async fn release(&self, conn: &Connection) {
        let _guard = self.inner.rebind_lock.lock().await;
        if let Some((_, generation)) = self.inner.router.bound().await {
            if generation == conn.generation() {
                self.inner.router.unbind().await;
            }
        }
    }

    /// [`ListenerContext::start`] followed by [`ListenerContext::run`].
    ///
    /// `shutdown` also interrupts a start still waiting for the node, in which
    /// case this returns `Ok(())`.
    ///
    /// # Errors
    /// Returns the start error, or [`ListenerError::Fatal`] from `run`.
    pub async fn launch(&self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let network = self.network();
        tokio::select! {
            started = self.start() => match started {
                Ok(()) => {
                    info!(%network, "Listener started");
                    self.run(shutdown).await
                }
                Err(e) => {
                    self.shutdown().await;
                    Err(e)
                }
            },
            _ = shutdown.cancelled() => {
                info!(%network, "Shutdown requested before the listener started");
                self.shutdown().await;
                Ok(())
            }
        }
    }

    /// Runs until `shutdown` fires or the connection manager gives up.
    ///
    /// # Errors
    /// Returns [`ListenerError::Fatal`] once reconnect attempts are exhausted.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let network = self.network();
        let mut state = self.inner.connections.subscribe_state();
        loop {
            if *state.borrow_and_update() == ConnectionState::Failed {
                error!(%network, "Listener failed, node unreachable");
                self.shutdown().await;
                return Err(ListenerError::Fatal(format!(
                    "{network}: reconnect attempts exhausted"
                )));
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.shutdown().await;
                    return Ok(());
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Stops watching config, unbinds, cancels confirmations and closes the
    /// connection.
    pub async fn shutdown(&self) {
        let network = self.network();
        self.inner.shutdown.cancel();
        self.inner.watcher.unwatch(network).await;
        if let Some(follower) = self.inner.follower.lock().await.take() {
            if let Err(e) = follower.await {
                warn!(%network, error = %e, "Connection follower ended abnormally");
            }
        }
        {
            let _guard = self.inner.rebind_lock.lock().await;
            self.inner.router.unbind().await;
        }
        self.inner.confirmer.cancel_all().await;
        self.inner.connections.shutdown().await;
        info!(%network, "Listener stopped");
    }

    pub async fn status(&self) -> ListenerStatus {
        let binding = self.binding();
        ListenerStatus {
            network: self.network(),
            connection_state: self.inner.connections.state(),
            binding_address: binding.as_ref().map(|b| b.address().to_string()),
            binding_version: binding.as_ref().map(|b| b.version()),
            last_event_at: self.inner.liveness.last_event_at(),
            pending_confirmations: self.inner.confirmer.pending_count().await,
            reconnect_attempts: self.inner.connections.attempts(),
        }
    }
}

/// Binds every connection the manager installs.
async fn follow_connections(
    inner: Weak<Inner>,
    mut connections: watch::Receiver<Option<Connection>>,
    shutdown: CancellationToken,
) {
    loop {
        let current = connections.borrow_and_update().clone();
        if let Some(conn) = current {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            ListenerContext { inner }.attach(&conn).await;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = connections.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
