// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;

use alloy_primitives::B256;
use app_core::Transaction;
use app_core::runtime::Runtime;
use tokio::sync::Mutex;
use tracing::info;

use crate::block::{ProvenBatch, UnprovenBlock};
use crate::block_stream::{BlockStream, BlockStreamConfig};
use crate::mempool::{Mempool, MempoolOrdering, RejectionReason};
use crate::production::{
    BatchError, BatchProducer, ProducerConfig, ProducerError, SequencerError, UnprovenProducer,
};
use crate::prover::BlockProver;
use crate::query::{QueryError, QueryRegistry, QueryResult, QueryView};
use crate::settlement::{
    SettlementError, SettlementLayer, SettlementModule, SettlementReceipt, WithdrawalQueue,
    WithdrawalQueueConfig,
};
use crate::state::MerkleStateService;
use crate::storage::{InMemoryBatchStorage, InMemoryBlockStorage};

#[derive(Debug, Clone, Default)]
pub struct SequencerConfig {
    pub producer: ProducerConfig,
    pub mempool_ordering: MempoolOrdering,
    pub withdrawal_queue: WithdrawalQueueConfig,
    pub block_stream: BlockStreamConfig,
}

/// Owns every pipeline component. Subscriber lists are fixed here, at
/// construction; nothing is looked up globally afterwards.
pub struct Sequencer {
    runtime: Arc<dyn Runtime>,
    mempool: Arc<Mempool>,
    unproven_state: Arc<MerkleStateService>,
    proven_state: Arc<MerkleStateService>,
    blocks: Arc<InMemoryBlockStorage>,
    batches: Arc<InMemoryBatchStorage>,
    producer: UnprovenProducer,
    batch_producer: BatchProducer,
    settlement: SettlementModule,
    withdrawals: Arc<WithdrawalQueue>,
    block_stream: BlockStream,
    queries: QueryRegistry,
    dispatching: Mutex<()>,
}

impl Sequencer {
    /// Wires the pipeline. The withdrawal index counter is seeded from the
    /// settlement layer's outgoing message cursor.
    pub async fn start(
        config: SequencerConfig,
        runtime: Arc<dyn Runtime>,
        prover: Arc<dyn BlockProver>,
        settlement_layer: Arc<dyn SettlementLayer>,
    ) -> Result<Self, SettlementError> {
        let start_index = settlement_layer.outgoing_message_cursor().await?.unwrap_or(0);
        let withdrawals = Arc::new(
            WithdrawalQueue::new(&config.withdrawal_queue, runtime.as_ref(), start_index)
                .map_err(|source| SettlementError::OutgoingMessages { source })?,
        );

        let mempool = Arc::new(Mempool::new(config.mempool_ordering));
        let unproven_state = Arc::new(MerkleStateService::in_memory());
        let proven_state = Arc::new(MerkleStateService::in_memory());
        let blocks = Arc::new(InMemoryBlockStorage::new());
        let batches = Arc::new(InMemoryBatchStorage::new());
        let block_stream = BlockStream::new(config.block_stream);

        let mut producer = UnprovenProducer::new(
            config.producer,
            Arc::clone(&runtime),
            Arc::clone(&mempool),
            Arc::clone(&unproven_state),
            blocks.clone(),
        );
        producer.subscribe(withdrawals.clone());
        producer.subscribe(Arc::new(block_stream.clone()));

        let batch_producer = BatchProducer::new(
            blocks.clone(),
            prover,
            Arc::clone(&proven_state),
            batches.clone(),
        );

        let mut settlement = SettlementModule::new(settlement_layer, batches.clone());
        settlement.subscribe(withdrawals.clone());

        let queries = QueryRegistry::from_runtime(runtime.as_ref());
        info!(
            withdrawal_start_index = start_index,
            query_fields = queries.fields().len(),
            allow_empty_blocks = config.producer.allow_empty_blocks,
            "sequencer started"
        );

        Ok(Self {
            runtime,
            mempool,
            unproven_state,
            proven_state,
            blocks,
            batches,
            producer,
            batch_producer,
            settlement,
            withdrawals,
            block_stream,
            queries,
            dispatching: Mutex::new(()),
        })
    }

    pub fn submit(&self, tx: Transaction) -> Result<B256, RejectionReason> {
        self.mempool.add(tx)
    }

    pub async fn produce_unproven(&self) -> Result<Option<Arc<UnprovenBlock>>, ProducerError> {
        self.producer.produce_unproven().await
    }

    pub async fn produce_proven(&self) -> Result<Option<ProvenBatch>, BatchError> {
        self.batch_producer.produce_proven().await
    }

    pub async fn settle_pending(&self) -> Result<Vec<SettlementReceipt>, SettlementError> {
        self.settlement.settle_pending().await
    }

    /// Proves every queued block into one batch, then settles what is pending.
    pub async fn prove_and_settle(&self) -> Result<Vec<SettlementReceipt>, SequencerError> {
        self.produce_proven().await?;
        Ok(self.settle_pending().await?)
    }

    /// Hands up to `max` unlocked withdrawals to the settlement layer and
    /// removes them from the queue once accepted.
    pub async fn dispatch_withdrawals(&self, max: usize) -> Result<usize, SettlementError> {
        let _dispatching = self.dispatching.lock().await;
        let messages = self.withdrawals.peek(max).await;
        if messages.is_empty() {
            return Ok(0);
        }
        let cursor = self
            .settlement
            .layer()
            .process_outgoing_messages(&messages)
            .await?;
        let dispatched = self.withdrawals.pop(messages.len()).await.len();
        info!(dispatched, cursor, "withdrawals dispatched");
        Ok(dispatched)
    }

    pub async fn query(
        &self,
        view: QueryView,
        module: &str,
        field: &str,
        key: Option<&[u8]>,
    ) -> Result<QueryResult, QueryError> {
        let state = match view {
            QueryView::Unproven => self.unproven_state.as_ref(),
            QueryView::Proven => self.proven_state.as_ref(),
        };
        self.queries.get(state, module, field, key).await
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn unproven_state(&self) -> &Arc<MerkleStateService> {
        &self.unproven_state
    }

    pub fn proven_state(&self) -> &Arc<MerkleStateService> {
        &self.proven_state
    }

    pub fn block_storage(&self) -> &Arc<InMemoryBlockStorage> {
        &self.blocks
    }

    pub fn batch_storage(&self) -> &Arc<InMemoryBatchStorage> {
        &self.batches
    }

    pub fn settlement(&self) -> &SettlementModule {
        &self.settlement
    }

    pub fn withdrawals(&self) -> &Arc<WithdrawalQueue> {
        &self.withdrawals
    }

    pub fn block_stream(&self) -> &BlockStream {
        &self.block_stream
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }
}
