// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod memory;
mod withdrawal_queue;

use std::sync::Arc;

use alloy_primitives::B256;
use app_core::runtime::Withdrawal;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::block::ProvenBatch;
use crate::storage::{BatchStorage, BlockStorageError};

pub use memory::InMemorySettlementLayer;
pub use withdrawal_queue::{
    OutgoingMessage, OutgoingMessageError, WithdrawalQueue, WithdrawalQueueConfig,
};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement layer unavailable: {0}")]
    Unavailable(String),
    #[error("settlement layer rejected batch {batch}: {reason}")]
    Rejected { batch: u64, reason: String },
    #[error("outgoing message {got} out of order, expected {expected}")]
    MessageOutOfOrder { expected: u64, got: u64 },
    #[error("cannot load proven batches")]
    LoadBatches {
        #[source]
        source: BlockStorageError,
    },
    #[error("proven batch {height} is missing from storage")]
    MissingBatch { height: u64 },
    #[error("cannot set up outgoing message queue")]
    OutgoingMessages {
        #[source]
        source: OutgoingMessageError,
    },
}

impl SettlementError {
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Rejected { .. } | Self::MessageOutOfOrder { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    pub batch_height: u64,
    pub last_block_height: u64,
    pub settlement_hash: B256,
}

#[derive(Debug, Clone)]
pub struct SettlementSubmitted {
    pub batch: ProvenBatch,
    pub receipt: SettlementReceipt,
}

/// The external chain that accepts proven batches and processes outgoing
/// messages.
#[async_trait]
pub trait SettlementLayer: Send + Sync {
    /// Index of the next outgoing message the layer expects, if it has ever
    /// processed one.
    async fn outgoing_message_cursor(&self) -> Result<Option<u64>, SettlementError>;

    async fn submit_batch(&self, batch: &ProvenBatch) -> Result<SettlementReceipt, SettlementError>;

    /// Hands released withdrawals to the layer. Returns the new cursor.
    async fn process_outgoing_messages(
        &self,
        messages: &[OutgoingMessage<Withdrawal>],
    ) -> Result<u64, SettlementError>;
}

#[async_trait]
pub trait SettlementSubscriber: Send + Sync {
    async fn on_settlement_submitted(&self, event: &SettlementSubmitted);
}

/// Submits stored proven batches in height order and notifies subscribers
/// after each successful submission.
pub struct SettlementModule {
    layer: Arc<dyn SettlementLayer>,
    batches: Arc<dyn BatchStorage>,
    subscribers: Vec<Arc<dyn SettlementSubscriber>>,
    next_batch: Mutex<u64>,
}

impl SettlementModule {
    pub fn new(layer: Arc<dyn SettlementLayer>, batches: Arc<dyn BatchStorage>) -> Self {
        Self {
            layer,
            batches,
            subscribers: Vec::new(),
            next_batch: Mutex::new(0),
        }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn SettlementSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn layer(&self) -> &Arc<dyn SettlementLayer> {
        &self.layer
    }

    pub async fn next_batch(&self) -> u64 {
        *self.next_batch.lock().await
    }

    /// Submits every stored batch not yet settled. Stops at the first failure;
    /// that batch and the ones after it are retried on the next call.
    pub async fn settle_pending(&self) -> Result<Vec<SettlementReceipt>, SettlementError> {
        let mut next = self.next_batch.lock().await;
        let head = self
            .batches
            .get_current_batch_height()
            .await
            .map_err(|source| SettlementError::LoadBatches { source })?;

        let mut receipts = Vec::new();
        while *next < head {
            let batch = self
                .batches
                .get_batch_at(*next)
                .await
                .map_err(|source| SettlementError::LoadBatches { source })?
                .ok_or(SettlementError::MissingBatch { height: *next })?;

            let receipt = match self.layer.submit_batch(&batch).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    warn!(batch = batch.height, error = %err, "settlement submission failed");
                    return Err(err);
                }
            };
            *next += 1;
            info!(
                batch = receipt.batch_height,
                last_block = receipt.last_block_height,
                hash = %receipt.settlement_hash,
                "batch settled"
            );

            let event = SettlementSubmitted {
                batch,
                receipt: receipt.clone(),
            };
            for subscriber in &self.subscribers {
                subscriber.on_settlement_submitted(&event).await;
            }
            receipts.push(receipt);
        }
        Ok(receipts)
    }
}
