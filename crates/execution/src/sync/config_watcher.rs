//! Watches the config feed and turns address changes into rebinds.

use super::backoff::Backoff;
use crate::error::ListenerError;
use chainwatch_data::{ConfigDocument, ConfigFeed, ConfigStream};
use chainwatch_domain::{ContractBinding, InterfaceDescriptor, Network, normalize_address};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decides what a config notification means for the active binding.
///
/// Returns `Ok(None)` when the address is unchanged (compared
/// case-insensitively), the successor binding otherwise.
///
/// # Errors
/// Returns [`ListenerError::Config`] for a missing or malformed address or
/// descriptor.
pub fn candidate_binding(
    current: Option<&ContractBinding>,
    document: &ConfigDocument,
) -> Result<Option<ContractBinding>, ListenerError> {
    let address = normalize_address(&document.address)?;
    let descriptor = InterfaceDescriptor::from_json(document.interface_descriptor.clone())?;

    match current {
        Some(active) if active.same_address(&address) => Ok(None),
        Some(active) => Ok(Some(active.successor(&address, descriptor)?)),
        None => Ok(Some(ContractBinding::initial(&address, descriptor)?)),
    }
}

/// Delay between attempts to resubscribe a feed that went away.
const RESUBSCRIBE_BACKOFF: Backoff = Backoff {
    base: Duration::from_secs(1),
    multiplier: 2,
    max_delay: Duration::from_secs(60),
};

type ChangeHandler =
    Arc<dyn Fn(Arc<ContractBinding>) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One watch per network over a shared [`ConfigFeed`].
pub struct ConfigWatcher {
    feed: Arc<dyn ConfigFeed>,
    watches: Mutex<HashMap<Network, WatchHandle>>,
}

impl ConfigWatcher {
    pub fn new(feed: Arc<dyn ConfigFeed>) -> Self {
        Self {
            feed,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Starts watching `network`.
    ///
    /// `active` tracks the binding currently in force; `on_change` receives
    /// every successor binding and is awaited before the next notification
    /// is looked at. A feed stream that ends is resubscribed with backoff,
    /// and the current document is re-read so changes made meanwhile are not
    /// missed.
    ///
    /// # Errors
    /// Returns [`ListenerError::Config`] if `network` is already watched and
    /// [`ListenerError::Store`] if the feed cannot be subscribed.
    pub async fn watch<F, Fut>(
        &self,
        network: Network,
        active: watch::Receiver<Option<Arc<ContractBinding>>>,
        on_change: F,
    ) -> Result<(), ListenerError>
    where
        F: Fn(Arc<ContractBinding>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let mut watches = self.watches.lock().await;
        if watches.get(&network).is_some_and(|w| !w.task.is_finished()) {
            return Err(ListenerError::Config(format!(
                "config for {network} is already watched"
            )));
        }

        let stream = self.feed.subscribe(network).await?;
        let on_change: ChangeHandler = Arc::new(move |binding| Box::pin(on_change(binding)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_watch(
            network,
            self.feed.clone(),
            stream,
            active,
            on_change,
            cancel.clone(),
        ));

        info!(%network, "Watching contract config");
        watches.insert(network, WatchHandle { cancel, task });
        Ok(())
    }

    /// Stops the watch for `network`. Returns `false` if there was none.
    pub async fn unwatch(&self, network: Network) -> bool {
        let Some(handle) = self.watches.lock().await.remove(&network) else {
            return false;
        };
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(%network, error = %e, "Config watch ended abnormally");
        }
        info!(%network, "Stopped watching contract config");
        true
    }

    pub async fn is_watching(&self, network: Network) -> bool {
        self.watches
            .lock()
            .await
            .get(&network)
            .is_some_and(|w| !w.task.is_finished())
    }
}

async fn run_watch(
    network: Network,
    feed: Arc<dyn ConfigFeed>,
    mut stream: ConfigStream,
    active: watch::Receiver<Option<Arc<ContractBinding>>>,
    on_change: ChangeHandler,
    cancel: CancellationToken,
) {
    loop {
        let document = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(document) => document,
                None => {
                    warn!(%network, "Config feed closed, resubscribing");
                    let Some((resumed, current)) = resubscribe(network, feed.as_ref(), &cancel).await else {
                        break;
                    };
                    stream = resumed;
                    match current {
                        Some(document) => document,
                        None => continue,
                    }
                }
            },
        };

        let current = active.borrow().clone();
        match candidate_binding(current.as_deref(), &document) {
            Ok(None) => {
                debug!(%network, address = %document.address, "Config address unchanged, ignoring");
            }
            Ok(Some(next)) => {
                info!(
                    %network,
                    old_address = ?current.as_ref().map(|b| b.address()),
                    new_address = %next.address(),
                    version = next.version(),
                    "Contract binding changed"
                );
                if let Err(e) = on_change(Arc::new(next)).await {
                    warn!(%network, error = %e, "Rebind failed");
                }
            }
            Err(e) => {
                warn!(%network, error = %e, "Rejected config notification, keeping current binding");
            }
        }
    }
}

/// Subscribes again until it works or `cancel` fires, then reads the
/// current document.
async fn resubscribe(
    network: Network,
    feed: &dyn ConfigFeed,
    cancel: &CancellationToken,
) -> Option<(ConfigStream, Option<ConfigDocument>)> {
    let mut attempt = 0u32;
    loop {
        let delay = RESUBSCRIBE_BACKOFF.delay(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match feed.subscribe(network).await {
            Ok(stream) => {
                info!(%network, attempt = attempt + 1, "Config feed resubscribed");
                let current = match feed.current(network).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(%network, error = %e, "Could not re-read config after resubscribing");
                        None
                    }
                };
                return Some((stream, current));
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                warn!(
                    %network,
                    attempt,
                    delay_ms = RESUBSCRIBE_BACKOFF.delay(attempt).as_millis() as u64,
                    error = %e,
                    "Config feed resubscribe failed"
                );
            }
        }
    }
}
