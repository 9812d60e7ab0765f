//! Event handlers and the typed registration table.
//!
//! Handlers are registered per [`EventKind`]. Registration by name is
//! validated against the closed set of kinds so a typo in the routing table
//! fails at startup instead of silently never firing.

mod game_lifecycle;
mod player_actions;

pub use game_lifecycle::{GameLifecycleHandler, lifecycle_update};
pub use player_actions::{QueryFeePaidHandler, StatsHandler, stat_update};

use crate::confirmation::TransactionConfirmer;
use crate::error::ListenerError;
use async_trait::async_trait;
use chainwatch_data::StateStore;
use chainwatch_domain::{ContractBinding, EventKind, EventRecord, Network};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reacts to one decoded event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        network: Network,
        binding: &ContractBinding,
        record: &EventRecord,
    ) -> Result<(), ListenerError>;
}

/// Maps event kinds to their handler.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Registers `handler` under an event name.
    ///
    /// # Errors
    /// Returns [`ListenerError::Config`] if `name` is not a known event kind.
    pub fn register_named(
        &mut self,
        name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<&mut Self, ListenerError> {
        let kind = EventKind::from_name(name)
            .map_err(|e| ListenerError::Config(format!("handler table: {e}")))?;
        Ok(self.register(kind, handler))
    }

    pub fn get(&self, kind: EventKind) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&kind)
    }

    /// Registered kinds, in declaration order.
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Event routes of the game contract.
pub const DEFAULT_ROUTES: [&str; 10] = [
    "QueryFeePaid",
    "NextQueryFee",
    "CurrentPrizePool",
    "TotalQueries",
    "GameStarted",
    "GameEnded",
    "PrizeTransferApproved",
    "LastPlayerRewardAfterGameExhaustion",
    "RestOfThePlayersRewardAfterGameExhaustion",
    "GameResetByOwner",
];

/// Builds the standard table: query fees go to the confirmer, counters to
/// the stats document and everything else to the game lifecycle document.
///
/// # Errors
/// Returns [`ListenerError::Config`] if a route names an unknown event.
pub fn default_table(
    confirmer: TransactionConfirmer,
    store: Arc<dyn StateStore>,
) -> Result<HandlerTable, ListenerError> {
    let query_fee: Arc<dyn EventHandler> = Arc::new(QueryFeePaidHandler::new(confirmer));
    let stats: Arc<dyn EventHandler> = Arc::new(StatsHandler::new(store.clone()));
    let lifecycle: Arc<dyn EventHandler> = Arc::new(GameLifecycleHandler::new(store));

    let mut table = HandlerTable::new();
    for name in DEFAULT_ROUTES {
        let handler = match name {
            "QueryFeePaid" => query_fee.clone(),
            "NextQueryFee" | "CurrentPrizePool" | "TotalQueries" => stats.clone(),
            _ => lifecycle.clone(),
        };
        table.register_named(name, handler)?;
    }
    Ok(table)
}
