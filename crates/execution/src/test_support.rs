//! Scripted node fakes and helpers shared by the unit tests.

use crate::error::ListenerError;
use crate::handlers::EventHandler;
use async_trait::async_trait;
use chainwatch_domain::{ContractBinding, EventRecord, InterfaceDescriptor, Network};
use chainwatch_protocols::{
    Address, B256, Bytes, LogStream, NodeConnector, NodeProvider, ProtocolError, RawLog,
    ReceiptFuture, TxReceipt,
};
use futures::{FutureExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const ADDRESS_A: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const ADDRESS_B: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
pub const TX_1: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
pub const TX_2: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

pub fn game_abi() -> serde_json::Value {
    let uint = |name: &str| json!({"name": name, "type": "uint256", "indexed": false});
    let addr = |name: &str| json!({"name": name, "type": "address", "indexed": false});
    let event = |name: &str, inputs: Vec<serde_json::Value>| {
        json!({"type": "event", "name": name, "anonymous": false, "inputs": inputs})
    };
    json!([
        event(
            "QueryFeePaid",
            vec![
                json!({"name": "player", "type": "address", "indexed": true}),
                uint("feeAmount"),
                uint("queryID"),
                uint("blockNumber"),
                uint("timestamp"),
            ]
        ),
        event("NextQueryFee", vec![uint("nextFee"), uint("currentCount")]),
        event("CurrentPrizePool", vec![uint("prizePool")]),
        event("TotalQueries", vec![uint("queries")]),
        event("GameStarted", vec![uint("timestamp")]),
        event("PrizeTransferApproved", vec![addr("recipient"), uint("amount")]),
    ])
}

pub fn descriptor() -> InterfaceDescriptor {
    InterfaceDescriptor::from_json(game_abi()).unwrap()
}

pub fn binding(address: &str) -> Arc<ContractBinding> {
    Arc::new(ContractBinding::initial(address, descriptor()).unwrap())
}

fn word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn selector(signature: &str) -> B256 {
    chainwatch_protocols::keccak256(signature)
}

/// Builds a raw log emitted by `address`.
pub fn raw_log(address: &str, signature: &str, indexed: Vec<B256>, words: &[u64], tx: Option<&str>) -> RawLog {
    let mut topics = vec![selector(signature)];
    topics.extend(indexed);
    RawLog {
        address: address.parse().unwrap(),
        topics,
        data: Bytes::from(words.iter().flat_map(|w| word(*w)).collect::<Vec<u8>>()),
        block_number: Some(100),
        transaction_hash: tx.map(|h| h.parse().unwrap()),
    }
}

pub fn total_queries_log(address: &str, queries: u64) -> RawLog {
    raw_log(address, "TotalQueries(uint256)", vec![], &[queries], Some(TX_1))
}

pub fn query_fee_paid_log(address: &str, query_id: u64, tx: &str) -> RawLog {
    let player: Address = ADDRESS_B.parse().unwrap();
    raw_log(
        address,
        "QueryFeePaid(address,uint256,uint256,uint256,uint256)",
        vec![B256::left_padding_from(player.as_slice())],
        &[1_000_000_000_000_000, query_id, 100, 1_700_000_000],
        Some(tx),
    )
}

pub fn hash(value: &str) -> B256 {
    value.parse().unwrap()
}

#[derive(Default)]
struct Scripts {
    /// Receipt becomes visible to point queries from the n-th query on.
    receipts: HashMap<B256, (u32, bool)>,
    receipt_queries: HashMap<B256, u32>,
    /// Push notification delay and status.
    pushes: HashMap<B256, (Duration, bool)>,
}

/// Node whose behaviour is scripted by the test.
pub struct FakeNode {
    logs: broadcast::Sender<RawLog>,
    streams: Mutex<CancellationToken>,
    scripts: Mutex<Scripts>,
    heartbeat_failing: AtomicBool,
    subscribe_hanging: AtomicBool,
    subscriptions: AtomicUsize,
    watches: AtomicUsize,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            logs: broadcast::channel(256).0,
            streams: Mutex::new(CancellationToken::new()),
            scripts: Mutex::new(Scripts::default()),
            heartbeat_failing: AtomicBool::new(false),
            subscribe_hanging: AtomicBool::new(false),
            subscriptions: AtomicUsize::new(0),
            watches: AtomicUsize::new(0),
        })
    }

    pub fn emit(&self, log: RawLog) {
        let _ = self.logs.send(log);
    }

    /// Ends every open log stream, like a dropped socket.
    pub fn close_streams(&self) {
        let mut token = self.streams.lock().unwrap();
        token.cancel();
        *token = CancellationToken::new();
    }

    pub fn set_heartbeat_failing(&self, failing: bool) {
        self.heartbeat_failing.store(failing, Ordering::SeqCst);
    }

    /// Log subscribe requests never answer while set, like a half-dead socket.
    pub fn set_subscribe_hanging(&self, hanging: bool) {
        self.subscribe_hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn script_receipt(&self, tx: &str, visible_from_query: u32, success: bool) {
        self.scripts
            .lock()
            .unwrap()
            .receipts
            .insert(hash(tx), (visible_from_query, success));
    }

    pub fn script_push(&self, tx: &str, delay: Duration, success: bool) {
        self.scripts
            .lock()
            .unwrap()
            .pushes
            .insert(hash(tx), (delay, success));
    }

    pub fn receipt_queries(&self, tx: &str) -> u32 {
        self.scripts
            .lock()
            .unwrap()
            .receipt_queries
            .get(&hash(tx))
            .copied()
            .unwrap_or(0)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeProvider for FakeNode {
    async fn chain_id(&self) -> Result<u64, ProtocolError> {
        Ok(31337)
    }

    async fn block_number(&self) -> Result<u64, ProtocolError> {
        if self.heartbeat_failing.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("no response".to_string()));
        }
        Ok(100)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ProtocolError> {
        let mut scripts = self.scripts.lock().unwrap();
        let count = scripts.receipt_queries.entry(hash).or_insert(0);
        *count += 1;
        let count = *count;

        Ok(match scripts.receipts.get(&hash) {
            Some((from, success)) if count >= *from => Some(TxReceipt {
                transaction_hash: hash,
                success: *success,
                block_number: Some(100),
            }),
            _ => None,
        })
    }

    async fn subscribe_logs(
        &self,
        address: Address,
        topics: Vec<B256>,
    ) -> Result<LogStream, ProtocolError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        if self.subscribe_hanging.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let rx = self.logs.subscribe();
        let token = self.streams.lock().unwrap().clone();

        let stream = futures::stream::unfold((rx, token), |(mut rx, token)| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return None,
                    received = rx.recv() => match received {
                        Ok(log) => return Some((log, (rx, token))),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                }
            }
        })
        .filter(move |log| {
            let wanted = log.address == address
                && log.topics.first().is_some_and(|t| topics.contains(t));
            futures::future::ready(wanted)
        });
        Ok(stream.boxed())
    }

    async fn watch_receipt(&self, hash: B256) -> Result<ReceiptFuture, ProtocolError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripts.lock().unwrap().pushes.get(&hash).copied();

        Ok(match scripted {
            Some((delay, success)) => async move {
                tokio::time::sleep(delay).await;
                Ok(TxReceipt {
                    transaction_hash: hash,
                    success,
                    block_number: Some(100),
                })
            }
            .boxed(),
            None => futures::future::pending().boxed(),
        })
    }
}

/// Connector handing out one shared [`FakeNode`], with scripted failures.
pub struct FakeConnector {
    node: Arc<FakeNode>,
    failures_left: AtomicU32,
    connects: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub fn new(node: Arc<FakeNode>) -> Arc<Self> {
        Arc::new(Self {
            node,
            failures_left: AtomicU32::new(0),
            connects: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn last_connect_at(&self) -> Option<Instant> {
        self.connects.lock().unwrap().last().copied()
    }

    /// Time between consecutive connect attempts.
    pub fn connect_gaps(&self) -> Vec<Duration> {
        self.connects
            .lock()
            .unwrap()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }
}

#[async_trait]
impl NodeConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn NodeProvider>, ProtocolError> {
        self.connects.lock().unwrap().push(Instant::now());
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProtocolError::Transport("connection refused".to_string()));
        }
        Ok(self.node.clone())
    }
}

/// Handler recording every record it receives.
#[derive(Default)]
pub struct RecordingHandler {
    records: Mutex<Vec<(Network, String, EventRecord)>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Binding address seen by each delivery, in order.
    pub fn addresses(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, address, _)| address.clone())
            .collect()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, record)| record.clone())
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(
        &self,
        network: Network,
        binding: &ContractBinding,
        record: &EventRecord,
    ) -> Result<(), ListenerError> {
        self.records
            .lock()
            .unwrap()
            .push((network, binding.address().to_string(), record.clone()));
        Ok(())
    }
}

pub struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(
        &self,
        _network: Network,
        _binding: &ContractBinding,
        _record: &EventRecord,
    ) -> Result<(), ListenerError> {
        Err(ListenerError::Handler("boom".to_string()))
    }
}

pub struct PanickingHandler;

#[async_trait]
impl EventHandler for PanickingHandler {
    async fn handle(
        &self,
        _network: Network,
        _binding: &ContractBinding,
        _record: &EventRecord,
    ) -> Result<(), ListenerError> {
        panic!("handler bug");
    }
}

/// Polls `check` on virtual time until it holds or a minute passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..600 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}
