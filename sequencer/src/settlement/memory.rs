// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::keccak256;
use app_core::runtime::Withdrawal;
use async_trait::async_trait;

use super::{OutgoingMessage, SettlementError, SettlementLayer, SettlementReceipt};
use crate::block::ProvenBatch;

#[derive(Debug, Default)]
struct Ledger {
    batches: Vec<ProvenBatch>,
    processed: Vec<OutgoingMessage<Withdrawal>>,
    cursor: Option<u64>,
}

/// Local stand-in for the settlement chain. Can be switched offline to
/// exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemorySettlementLayer {
    ledger: Mutex<Ledger>,
    offline: AtomicBool,
}

impl InMemorySettlementLayer {
    pub fn new(outgoing_message_cursor: Option<u64>) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                cursor: outgoing_message_cursor,
                ..Ledger::default()
            }),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn settled_batches(&self) -> Vec<ProvenBatch> {
        self.ledger.lock().expect("settlement ledger poisoned").batches.clone()
    }

    pub fn processed_messages(&self) -> Vec<OutgoingMessage<Withdrawal>> {
        self.ledger
            .lock()
            .expect("settlement ledger poisoned")
            .processed
            .clone()
    }

    fn ensure_online(&self) -> Result<(), SettlementError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(SettlementError::Unavailable("settlement layer offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementLayer for InMemorySettlementLayer {
    async fn outgoing_message_cursor(&self) -> Result<Option<u64>, SettlementError> {
        self.ensure_online()?;
        Ok(self.ledger.lock().expect("settlement ledger poisoned").cursor)
    }

    async fn submit_batch(
        &self,
        batch: &ProvenBatch,
    ) -> Result<SettlementReceipt, SettlementError> {
        self.ensure_online()?;
        let mut ledger = self.ledger.lock().expect("settlement ledger poisoned");
        let expected = ledger.batches.len() as u64;
        if batch.height != expected {
            return Err(SettlementError::Rejected {
                batch: batch.height,
                reason: format!("expected batch {expected}"),
            });
        }
        ledger.batches.push(batch.clone());
        Ok(SettlementReceipt {
            batch_height: batch.height,
            last_block_height: batch.public_output.last_block_height,
            settlement_hash: keccak256(&batch.proof),
        })
    }

    async fn process_outgoing_messages(
        &self,
        messages: &[OutgoingMessage<Withdrawal>],
    ) -> Result<u64, SettlementError> {
        self.ensure_online()?;
        let mut ledger = self.ledger.lock().expect("settlement ledger poisoned");
        let mut cursor = ledger.cursor.unwrap_or(0);
        for message in messages {
            if message.index != cursor {
                return Err(SettlementError::MessageOutOfOrder {
                    expected: cursor,
                    got: message.index,
                });
            }
            cursor += 1;
        }
        ledger.processed.extend_from_slice(messages);
        ledger.cursor = Some(cursor);
        Ok(cursor)
    }
}
