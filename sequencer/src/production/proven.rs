// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use alloy_primitives::B256;
use tracing::{debug, info, warn};

use super::{BatchError, ProductionGuard};
use crate::block::{ProvenBatch, UnprovenBlockWithPreviousMetadata};
use crate::prover::BlockProver;
use crate::state::MerkleStateService;
use crate::storage::{BatchStorage, UnprovenBlockQueue};

/// Proves queued unproven blocks and advances the proven state.
///
/// Steps per batch: peek the queue, prove, replay the blocks' successful
/// transitions on the proven state and check the root against the proof,
/// store the batch, commit, acknowledge the queue. The queue cursor only moves
/// once everything before it succeeded.
pub struct BatchProducer {
    queue: Arc<dyn UnprovenBlockQueue>,
    prover: Arc<dyn BlockProver>,
    proven_state: Arc<MerkleStateService>,
    batches: Arc<dyn BatchStorage>,
    producing: AtomicBool,
}

impl BatchProducer {
    pub fn new(
        queue: Arc<dyn UnprovenBlockQueue>,
        prover: Arc<dyn BlockProver>,
        proven_state: Arc<MerkleStateService>,
        batches: Arc<dyn BatchStorage>,
    ) -> Self {
        Self {
            queue,
            prover,
            proven_state,
            batches,
            producing: AtomicBool::new(false),
        }
    }

    pub async fn produce_proven(&self) -> Result<Option<ProvenBatch>, BatchError> {
        let Some(_guard) = ProductionGuard::acquire(&self.producing) else {
            debug!("batch production already in flight, skipping");
            return Ok(None);
        };

        let blocks = self
            .queue
            .peek_new_blocks()
            .await
            .map_err(|source| BatchError::LoadBlocks { source })?;
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Ok(None);
        };
        let next_cursor = last.block.height + 1;

        let height = self
            .batches
            .get_current_batch_height()
            .await
            .map_err(|source| BatchError::LoadBatchHead { source })?;
        let proof = self
            .prover
            .produce_proven(&blocks, first.last_block_metadata.as_ref())
            .await
            .map_err(|source| BatchError::Proving { source })?;
        let batch = ProvenBatch::new(height, proof);

        if let Err(err) = self.stage_and_store(&blocks, &batch).await {
            if let Err(discard_err) = self.proven_state.discard().await {
                warn!(error = %discard_err, "failed to discard proven staging state");
            }
            return Err(err);
        }

        self.proven_state
            .commit()
            .await
            .map_err(|source| BatchError::CommitProvenState { source })?;
        self.queue
            .advance_cursor(next_cursor)
            .await
            .map_err(|source| BatchError::AdvanceCursor { source })?;

        info!(
            batch = batch.height,
            first_block = batch.public_output.first_block_height,
            last_block = batch.public_output.last_block_height,
            state_root = %batch.public_output.state_root,
            "proven batch produced"
        );
        Ok(Some(batch))
    }

    async fn stage_and_store(
        &self,
        blocks: &[UnprovenBlockWithPreviousMetadata],
        batch: &ProvenBatch,
    ) -> Result<(), BatchError> {
        self.proven_state
            .open_transaction()
            .await
            .map_err(|source| BatchError::ProvenState { source })?;

        for entry in blocks {
            for result in entry.block.transactions.iter().filter(|result| result.status) {
                self.proven_state
                    .apply_transitions(&result.state_transitions)
                    .await
                    .map_err(|source| BatchError::ProvenState { source })?;
            }
        }

        let actual = self
            .proven_state
            .root()
            .await
            .map_err(|source| BatchError::ProvenState { source })?;
        check_root(batch.public_output.state_root, actual)?;

        self.batches
            .push_batch(batch.clone())
            .await
            .map_err(|source| BatchError::PushBatch { source })
    }
}

fn check_root(expected: B256, actual: B256) -> Result<(), BatchError> {
    if expected != actual {
        return Err(BatchError::StateRootMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{Address, B256, Bytes, U256};
    use app_core::path::Path;
    use app_core::runtime::{Mint, WalletConfig, WalletRuntime, method_id};
    use app_core::{RuntimeCall, Transaction};
    use async_trait::async_trait;
    use ssz::Encode;

    use super::BatchProducer;
    use crate::block::{BatchProof, UnprovenBlockMetadata, UnprovenBlockWithPreviousMetadata};
    use crate::mempool::Mempool;
    use crate::production::{BatchError, ProducerConfig, UnprovenProducer};
    use crate::prover::{BlockProver, MockBlockProver, ProverError};
    use crate::state::MerkleStateService;
    use crate::storage::{BatchStorage, InMemoryBatchStorage, InMemoryBlockStorage};

    struct Fixture {
        mempool: Arc<Mempool>,
        unproven: Arc<MerkleStateService>,
        proven: Arc<MerkleStateService>,
        blocks: Arc<InMemoryBlockStorage>,
        batches: Arc<InMemoryBatchStorage>,
        producer: UnprovenProducer,
    }

    impl Fixture {
        fn new() -> Self {
            let mempool = Arc::new(Mempool::default());
            let unproven = Arc::new(MerkleStateService::in_memory());
            let blocks = Arc::new(InMemoryBlockStorage::new());
            let producer = UnprovenProducer::new(
                ProducerConfig::default(),
                Arc::new(WalletRuntime::new(WalletConfig::default())),
                Arc::clone(&mempool),
                Arc::clone(&unproven),
                blocks.clone(),
            );
            Self {
                mempool,
                unproven,
                proven: Arc::new(MerkleStateService::in_memory()),
                blocks,
                batches: Arc::new(InMemoryBatchStorage::new()),
                producer,
            }
        }

        fn batch_producer(&self, prover: Arc<dyn BlockProver>) -> BatchProducer {
            BatchProducer::new(
                self.blocks.clone(),
                prover,
                Arc::clone(&self.proven),
                self.batches.clone(),
            )
        }

        async fn produce_minting(&self, nonce: u64) {
            let args = Mint {
                to: Address::repeat_byte(1),
                amount: U256::from(5_u64),
            };
            self.mempool
                .add(Transaction {
                    sender: Address::repeat_byte(1),
                    call: RuntimeCall {
                        nonce,
                        method_id: method_id(WalletRuntime::MINT),
                        args: Bytes::from(args.as_ssz_bytes()),
                    },
                    signature: Bytes::from(vec![1; 65]),
                })
                .expect("add");
            self.producer
                .produce_unproven()
                .await
                .expect("produce")
                .expect("block");
        }
    }

    #[tokio::test]
    async fn proven_state_catches_up_with_unproven() {
        let fixture = Fixture::new();
        fixture.produce_minting(0).await;
        fixture.produce_minting(1).await;
        assert_ne!(
            fixture.proven.root().await.expect("proven root"),
            fixture.unproven.root().await.expect("unproven root")
        );

        let batch_producer = fixture.batch_producer(Arc::new(MockBlockProver));
        let batch = batch_producer
            .produce_proven()
            .await
            .expect("prove")
            .expect("batch");
        assert_eq!(batch.height, 0);
        assert_eq!(batch.public_output.first_block_height, 0);
        assert_eq!(batch.public_output.last_block_height, 1);
        assert_eq!(
            fixture.proven.root().await.expect("proven root"),
            fixture.unproven.root().await.expect("unproven root")
        );

        assert!(batch_producer.produce_proven().await.expect("idle").is_none());

        fixture.produce_minting(2).await;
        let next = batch_producer
            .produce_proven()
            .await
            .expect("prove")
            .expect("batch");
        assert_eq!(next.height, 1);
        assert_eq!(next.public_output.first_block_height, 2);
        assert_eq!(next.public_output.state_root_before, batch.public_output.state_root);
    }

    struct OfflineProver;

    #[async_trait]
    impl BlockProver for OfflineProver {
        async fn produce_proven(
            &self,
            _blocks: &[UnprovenBlockWithPreviousMetadata],
            _preceding: Option<&UnprovenBlockMetadata>,
        ) -> Result<BatchProof, ProverError> {
            Err(ProverError::Unavailable("prover offline".to_string()))
        }
    }

    #[tokio::test]
    async fn prover_failure_leaves_blocks_queued() {
        let fixture = Fixture::new();
        fixture.produce_minting(0).await;

        let err = fixture
            .batch_producer(Arc::new(OfflineProver))
            .produce_proven()
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fixture.blocks.cursor().await, 0);

        let batch = fixture
            .batch_producer(Arc::new(MockBlockProver))
            .produce_proven()
            .await
            .expect("retry")
            .expect("batch");
        assert_eq!(batch.public_output.last_block_height, 0);
        assert_eq!(fixture.blocks.cursor().await, 1);
    }

    struct LyingProver;

    #[async_trait]
    impl BlockProver for LyingProver {
        async fn produce_proven(
            &self,
            blocks: &[UnprovenBlockWithPreviousMetadata],
            preceding: Option<&UnprovenBlockMetadata>,
        ) -> Result<BatchProof, ProverError> {
            let mut proof = MockBlockProver.produce_proven(blocks, preceding).await?;
            proof.public_output.state_root = B256::repeat_byte(0xee);
            Ok(proof)
        }
    }

    #[tokio::test]
    async fn root_mismatch_discards_proven_staging() {
        let fixture = Fixture::new();
        fixture.produce_minting(0).await;
        let before = fixture.proven.root().await.expect("root");

        let err = fixture
            .batch_producer(Arc::new(LyingProver))
            .produce_proven()
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::StateRootMismatch { .. }));
        assert_eq!(fixture.proven.root().await.expect("root"), before);
        assert_eq!(
            fixture
                .batches
                .get_current_batch_height()
                .await
                .expect("height"),
            0
        );
        assert_eq!(fixture.blocks.cursor().await, 0);

        // Proven state holds no trace of the rejected batch.
        let balance_path: Path = WalletRuntime::balance_path(Address::repeat_byte(1));
        let witness = fixture.proven.witness(&balance_path).await.expect("witness");
        assert!(witness.verify(before, B256::ZERO));
    }
}
