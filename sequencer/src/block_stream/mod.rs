// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::hex;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::block::{TransactionExecutionResult, UnprovenBlock};
use crate::production::BlockSubscriber;

#[derive(Debug, Clone, Copy)]
pub struct BlockStreamConfig {
    pub subscriber_buffer_capacity: usize,
}

impl Default for BlockStreamConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_capacity: 64,
        }
    }
}

/// Pushes produced blocks to live subscribers. Slow or closed subscribers
/// are dropped; producers never wait on them.
#[derive(Clone)]
pub struct BlockStream {
    inner: Arc<BlockStreamInner>,
}

pub struct LiveSubscription {
    pub receiver: mpsc::Receiver<BlockProducedMessage>,
    /// First block height this subscription will observe.
    pub live_start_height: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockProducedMessage {
    pub height: u64,
    pub hash: String,
    pub state_root: String,
    pub transactions: Vec<TransactionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub hash: String,
    pub sender: String,
    pub nonce: u64,
    pub method_id: u32,
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FanoutOutcome {
    delivered: u64,
    dropped_closed: u64,
    dropped_full: u64,
}

struct BlockStreamInner {
    subscriber_buffer_capacity: usize,
    next_height: AtomicU64,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<BlockProducedMessage>>>,
}

impl BlockStream {
    pub fn new(config: BlockStreamConfig) -> Self {
        Self {
            inner: Arc::new(BlockStreamInner {
                subscriber_buffer_capacity: config.subscriber_buffer_capacity.max(1),
                next_height: AtomicU64::new(0),
                next_subscriber_id: AtomicU64::new(0),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> LiveSubscription {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer_capacity);
        let subscriber_id = self
            .inner
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("block stream subscribers mutex poisoned");
        subscribers.insert(subscriber_id, tx);
        let live_start_height = self.inner.next_height.load(Ordering::Acquire);

        LiveSubscription {
            receiver: rx,
            live_start_height,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("block stream subscribers mutex poisoned")
            .len()
    }

    fn fanout(&self, message: BlockProducedMessage) -> FanoutOutcome {
        let mut to_remove = Vec::new();
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("block stream subscribers mutex poisoned");
        self.inner
            .next_height
            .store(message.height.saturating_add(1), Ordering::Release);

        let mut outcome = FanoutOutcome {
            delivered: 0,
            dropped_closed: 0,
            dropped_full: 0,
        };
        for (subscriber_id, sender) in subscribers.iter() {
            match sender.try_send(message.clone()) {
                Ok(()) => outcome.delivered = outcome.delivered.saturating_add(1),
                Err(TrySendError::Closed(_)) => {
                    to_remove.push(*subscriber_id);
                    outcome.dropped_closed = outcome.dropped_closed.saturating_add(1);
                    debug!(subscriber_id, "block stream removed closed subscriber");
                }
                Err(TrySendError::Full(_)) => {
                    to_remove.push(*subscriber_id);
                    outcome.dropped_full = outcome.dropped_full.saturating_add(1);
                    warn!(
                        subscriber_id,
                        "block stream dropped slow subscriber due to full channel"
                    );
                }
            }
        }

        for subscriber_id in to_remove {
            subscribers.remove(&subscriber_id);
        }
        outcome
    }
}

impl BlockProducedMessage {
    pub fn from_block(block: &UnprovenBlock) -> Self {
        Self {
            height: block.height,
            hash: block.transactions_hash.to_string(),
            state_root: block.state_root.to_string(),
            transactions: block
                .transactions
                .iter()
                .map(TransactionSummary::from_result)
                .collect(),
        }
    }
}

impl TransactionSummary {
    fn from_result(result: &TransactionExecutionResult) -> Self {
        Self {
            hash: hex::encode_prefixed(result.tx.hash()),
            sender: result.tx.sender.to_string(),
            nonce: result.tx.nonce(),
            method_id: result.tx.method_id(),
            status: result.status,
            status_message: result.status_message.clone(),
        }
    }
}

#[async_trait]
impl BlockSubscriber for BlockStream {
    async fn on_block_produced(&self, block: &Arc<UnprovenBlock>) {
        let outcome = self.fanout(BlockProducedMessage::from_block(block));
        debug!(
            height = block.height,
            delivered = outcome.delivered,
            dropped_closed = outcome.dropped_closed,
            dropped_full = outcome.dropped_full,
            "block fanout"
        );
    }
}
