//! Decodes subscription logs and dispatches them to handlers.

use super::connection::Connection;
use super::liveness::LivenessMarker;
use crate::error::ListenerError;
use crate::handlers::HandlerTable;
use chainwatch_domain::{ContractBinding, EventKind, EventRecord, Network};
use chainwatch_protocols::{Address, EventDecoder, RawLog};
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ActiveBinding {
    binding: Arc<ContractBinding>,
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Delivers decoded events of the active binding to the handler table.
///
/// Every [`EventRouter::bind`] must be paired with exactly one
/// [`EventRouter::unbind`] before the next bind.
pub struct EventRouter {
    network: Network,
    handlers: HandlerTable,
    liveness: LivenessMarker,
    active: Mutex<Option<ActiveBinding>>,
}

impl EventRouter {
    pub fn new(network: Network, handlers: HandlerTable, liveness: LivenessMarker) -> Self {
        Self {
            network,
            handlers,
            liveness,
            active: Mutex::new(None),
        }
    }

    /// Subscribes to every handled event of `binding` on `connection`.
    ///
    /// # Errors
    /// Returns [`ListenerError::Config`] if the router is already bound or the
    /// binding is unusable, and [`ListenerError::Connection`] if the
    /// subscription cannot be opened (the connection is reported closed) or
    /// the connection goes away while it is being opened.
    pub async fn bind(
        &self,
        connection: &Connection,
        binding: Arc<ContractBinding>,
    ) -> Result<(), ListenerError> {
        let network = self.network;
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            return Err(ListenerError::Config(format!(
                "router already bound to {} v{}",
                current.binding.address(),
                current.binding.version()
            )));
        }

        let decoder = EventDecoder::from_descriptor(binding.interface())?;
        let address: Address = binding
            .address()
            .parse()
            .map_err(|e| ListenerError::Config(format!("address {}: {e}", binding.address())))?;

        let mut topics = Vec::new();
        for kind in self.handlers.kinds() {
            match decoder.topic_for(kind) {
                Some(topic) => topics.push(topic),
                None => warn!(%network, event = %kind, "Handled event is missing from the ABI"),
            }
        }

        // A subscribe request stuck on a dead socket is abandoned once the
        // connection is torn down.
        let cancel = connection.child_token();
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ListenerError::Connection(format!(
                    "connection {} closed while subscribing",
                    connection.generation()
                )));
            }
            subscribed = connection.provider().subscribe_logs(address, topics) => subscribed,
        };
        let stream = match subscribed {
            Ok(stream) => stream,
            Err(e) => {
                connection.report_closed(&format!("log subscription failed: {e}"));
                return Err(e.into());
            }
        };

        let dispatcher = Dispatcher {
            network,
            binding: binding.clone(),
            decoder,
            handlers: self.handlers.clone(),
            liveness: self.liveness.clone(),
        };
        let task = tokio::spawn(route(dispatcher, stream, connection.clone(), cancel.clone()));

        info!(
            %network,
            address = %binding.address(),
            version = binding.version(),
            generation = connection.generation(),
            "Router bound"
        );
        *active = Some(ActiveBinding {
            binding,
            generation: connection.generation(),
            cancel,
            task,
        });
        Ok(())
    }

    /// Detaches the active subscription and waits for its task to stop.
    /// Returns `false` when nothing was bound.
    pub async fn unbind(&self) -> bool {
        let Some(active) = self.active.lock().await.take() else {
            return false;
        };

        active.cancel.cancel();
        if let Err(e) = active.task.await {
            warn!(network = %self.network, error = %e, "Router task ended abnormally");
        }
        info!(
            network = %self.network,
            address = %active.binding.address(),
            version = active.binding.version(),
            "Router unbound"
        );
        true
    }

    /// Binding and connection generation currently routed.
    pub async fn bound(&self) -> Option<(Arc<ContractBinding>, u64)> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| (a.binding.clone(), a.generation))
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }
}

async fn route(
    dispatcher: Dispatcher,
    mut stream: chainwatch_protocols::LogStream,
    connection: Connection,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(log) => dispatcher.dispatch(log),
                None => {
                    if !cancel.is_cancelled() {
                        connection.report_closed("log subscription ended");
                    }
                    break;
                }
            },
        }
    }
    debug!(network = %dispatcher.network, "Router task stopped");
}

struct Dispatcher {
    network: Network,
    binding: Arc<ContractBinding>,
    decoder: EventDecoder,
    handlers: HandlerTable,
    liveness: LivenessMarker,
}

impl Dispatcher {
    fn dispatch(&self, log: RawLog) {
        let network = self.network;
        let (kind, args) = match self.decoder.decode(&log) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    %network,
                    tx_hash = ?log.transaction_hash,
                    error = %e,
                    "Dropping undecodable log"
                );
                return;
            }
        };
        self.liveness.mark();

        let record = EventRecord {
            event_name: kind,
            args,
            block_number: log.block_number,
            tx_hash: log.transaction_hash.map(|h| h.to_string()),
            observed_at: Utc::now(),
        };
        let Some(handler) = self.handlers.get(kind).cloned() else {
            debug!(%network, event = %kind, "No handler registered");
            return;
        };

        debug!(%network, event = %kind, block = ?record.block_number, "Dispatching event");
        let binding = self.binding.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(network, &binding, &record))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log_failure(network, kind, &record, &e.to_string()),
                Err(panic) => log_failure(network, kind, &record, &panic_message(panic.as_ref())),
            }
        });
    }
}

fn log_failure(network: Network, kind: EventKind, record: &EventRecord, reason: &str) {
    error!(
        %network,
        event = %kind,
        tx_hash = ?record.tx_hash,
        block = ?record.block_number,
        reason,
        "Event handler failed"
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
