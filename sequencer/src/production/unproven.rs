// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use app_core::Transaction;
use app_core::runtime::{ExecutionContext, ExecutionError, Runtime};
use tracing::{debug, error, info, warn};

use super::{BlockSubscriber, ProducerError, ProductionGuard};
use crate::block::{TransactionExecutionResult, UnprovenBlock, UnprovenBlockMetadata};
use crate::mempool::Mempool;
use crate::state::MerkleStateService;
use crate::storage::UnprovenBlockStorage;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProducerConfig {
    /// Produce a block even when the mempool snapshot is empty.
    pub allow_empty_blocks: bool,
}

/// Turns mempool snapshots into unproven blocks over the unproven state.
pub struct UnprovenProducer {
    config: ProducerConfig,
    runtime: Arc<dyn Runtime>,
    mempool: Arc<Mempool>,
    state: Arc<MerkleStateService>,
    storage: Arc<dyn UnprovenBlockStorage>,
    subscribers: Vec<Arc<dyn BlockSubscriber>>,
    producing: AtomicBool,
}

impl UnprovenProducer {
    pub fn new(
        config: ProducerConfig,
        runtime: Arc<dyn Runtime>,
        mempool: Arc<Mempool>,
        state: Arc<MerkleStateService>,
        storage: Arc<dyn UnprovenBlockStorage>,
    ) -> Self {
        Self {
            config,
            runtime,
            mempool,
            state,
            storage,
            subscribers: Vec::new(),
            producing: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn BlockSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Produces at most one block. Returns `None` when another production is in
    /// flight or there is nothing to include.
    ///
    /// On error the staging state is discarded, the snapshot is put back at the
    /// front of the mempool and no block is appended.
    pub async fn produce_unproven(&self) -> Result<Option<Arc<UnprovenBlock>>, ProducerError> {
        let Some(_guard) = ProductionGuard::acquire(&self.producing) else {
            debug!("unproven production already in flight, skipping");
            return Ok(None);
        };

        let txs = self.mempool.drain();
        if txs.is_empty() && !self.config.allow_empty_blocks {
            return Ok(None);
        }

        let block = match self.build_block(&txs).await {
            Ok(block) => block,
            Err(err) => {
                error!(error = %err, tx_count = txs.len(), "unproven production aborted");
                if let Err(discard_err) = self.state.discard().await {
                    warn!(error = %discard_err, "failed to discard staging state");
                }
                self.mempool.requeue_front(txs);
                return Err(err);
            }
        };

        // The block is already appended; staging must follow it.
        self.state
            .commit()
            .await
            .map_err(|source| ProducerError::CommitStaging { source })?;

        info!(
            height = block.height,
            hash = %block.transactions_hash,
            state_root = %block.state_root,
            tx_count = block.transactions.len(),
            failed = block.transactions.iter().filter(|result| !result.status).count(),
            "unproven block produced"
        );

        for subscriber in &self.subscribers {
            subscriber.on_block_produced(&block).await;
        }
        Ok(Some(block))
    }

    async fn build_block(&self, txs: &[Transaction]) -> Result<Arc<UnprovenBlock>, ProducerError> {
        let height = self
            .storage
            .get_current_block_height()
            .await
            .map_err(|source| ProducerError::LoadHead { source })?;
        let previous = self
            .storage
            .get_newest_metadata()
            .await
            .map_err(|source| ProducerError::LoadHead { source })?;

        self.state
            .open_transaction()
            .await
            .map_err(|source| ProducerError::OpenStaging { source })?;

        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            results.push(self.execute_transaction(tx).await?);
        }

        let state_root = self
            .state
            .root()
            .await
            .map_err(|source| ProducerError::ComputeRoot { source })?;
        let block = Arc::new(UnprovenBlock::new(height, results, state_root));
        let metadata = UnprovenBlockMetadata::for_block(&block, previous.as_ref());

        self.storage
            .push_block_with_metadata(Arc::clone(&block), metadata)
            .await
            .map_err(|source| ProducerError::AppendBlock { source })?;
        Ok(block)
    }

    async fn execute_transaction(
        &self,
        tx: &Transaction,
    ) -> Result<TransactionExecutionResult, ProducerError> {
        let mut ctx = ExecutionContext::new(self.state.as_ref());
        match self.runtime.execute(tx, &mut ctx).await {
            Ok(()) => {
                let transitions = ctx.into_transitions();
                self.state
                    .apply_transitions(&transitions)
                    .await
                    .map_err(|source| ProducerError::ApplyTransitions { source })?;
                Ok(TransactionExecutionResult::success(tx.clone(), transitions))
            }
            Err(ExecutionError::Reverted(reason)) => {
                debug!(hash = %tx.hash(), %reason, "transaction reverted");
                Ok(TransactionExecutionResult::failure(tx.clone(), reason.to_string()))
            }
            Err(ExecutionError::State(source)) => Err(ProducerError::ExecutionState { source }),
        }
    }
}
