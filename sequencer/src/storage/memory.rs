// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    BatchStorage, BlockStorageError, HistoricalUnprovenBlockStorage, UnprovenBlockQueue,
    UnprovenBlockStorage,
};
use crate::block::{
    ProvenBatch, UnprovenBlock, UnprovenBlockMetadata, UnprovenBlockWithPreviousMetadata,
};

#[derive(Debug, Default)]
struct Chain {
    blocks: Vec<Arc<UnprovenBlock>>,
    metadata: Vec<UnprovenBlockMetadata>,
    cursor: u64,
}

impl Chain {
    fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn check_block(&self, block: &UnprovenBlock) -> Result<(), BlockStorageError> {
        if block.height != self.height() {
            return Err(BlockStorageError::NonContiguousHeight {
                expected: self.height(),
                got: block.height,
            });
        }
        Ok(())
    }

    fn check_metadata(
        &self,
        metadata: &UnprovenBlockMetadata,
        expected: u64,
    ) -> Result<(), BlockStorageError> {
        if metadata.height != expected {
            return Err(BlockStorageError::MetadataOutOfStep {
                expected,
                got: metadata.height,
            });
        }
        Ok(())
    }

    fn pending(&self) -> Vec<UnprovenBlockWithPreviousMetadata> {
        let start = self.cursor as usize;
        self.blocks
            .iter()
            .enumerate()
            .skip(start)
            .map(|(position, block)| UnprovenBlockWithPreviousMetadata {
                block: Arc::clone(block),
                last_block_metadata: position
                    .checked_sub(1)
                    .and_then(|previous| self.metadata.get(previous))
                    .copied(),
            })
            .collect()
    }

    fn advance(&mut self, height: u64) -> Result<(), BlockStorageError> {
        if height > self.height() {
            return Err(BlockStorageError::CursorBeyondHead {
                requested: height,
                height: self.height(),
            });
        }
        self.cursor = self.cursor.max(height);
        Ok(())
    }
}

/// Block list, metadata list and queue cursor behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryBlockStorage {
    chain: Mutex<Chain>,
}

impl InMemoryBlockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cursor(&self) -> u64 {
        self.chain.lock().await.cursor
    }
}

#[async_trait]
impl UnprovenBlockStorage for InMemoryBlockStorage {
    async fn push_block(&self, block: Arc<UnprovenBlock>) -> Result<(), BlockStorageError> {
        let mut chain = self.chain.lock().await;
        chain.check_block(&block)?;
        chain.blocks.push(block);
        Ok(())
    }

    async fn push_metadata(
        &self,
        metadata: UnprovenBlockMetadata,
    ) -> Result<(), BlockStorageError> {
        let mut chain = self.chain.lock().await;
        let expected = chain.metadata.len() as u64;
        chain.check_metadata(&metadata, expected)?;
        chain.metadata.push(metadata);
        Ok(())
    }

    async fn push_block_with_metadata(
        &self,
        block: Arc<UnprovenBlock>,
        metadata: UnprovenBlockMetadata,
    ) -> Result<(), BlockStorageError> {
        let mut chain = self.chain.lock().await;
        chain.check_block(&block)?;
        chain.check_metadata(&metadata, block.height)?;
        if chain.metadata.len() != chain.blocks.len() {
            return Err(BlockStorageError::MetadataOutOfStep {
                expected: chain.height(),
                got: chain.metadata.len() as u64,
            });
        }
        chain.blocks.push(block);
        chain.metadata.push(metadata);
        Ok(())
    }

    async fn get_current_block_height(&self) -> Result<u64, BlockStorageError> {
        Ok(self.chain.lock().await.height())
    }

    async fn get_latest_block(&self) -> Result<Option<Arc<UnprovenBlock>>, BlockStorageError> {
        Ok(self.chain.lock().await.blocks.last().cloned())
    }

    async fn get_newest_metadata(
        &self,
    ) -> Result<Option<UnprovenBlockMetadata>, BlockStorageError> {
        Ok(self.chain.lock().await.metadata.last().copied())
    }
}

#[async_trait]
impl HistoricalUnprovenBlockStorage for InMemoryBlockStorage {
    async fn get_block_at(
        &self,
        height: u64,
    ) -> Result<Option<Arc<UnprovenBlock>>, BlockStorageError> {
        let chain = self.chain.lock().await;
        Ok(usize::try_from(height)
            .ok()
            .and_then(|height| chain.blocks.get(height))
            .cloned())
    }

    async fn get_block(
        &self,
        transactions_hash: &B256,
    ) -> Result<Option<Arc<UnprovenBlock>>, BlockStorageError> {
        let chain = self.chain.lock().await;
        Ok(chain
            .blocks
            .iter()
            .find(|block| block.transactions_hash == *transactions_hash)
            .cloned())
    }
}

#[async_trait]
impl UnprovenBlockQueue for InMemoryBlockStorage {
    async fn peek_new_blocks(
        &self,
    ) -> Result<Vec<UnprovenBlockWithPreviousMetadata>, BlockStorageError> {
        Ok(self.chain.lock().await.pending())
    }

    async fn advance_cursor(&self, height: u64) -> Result<(), BlockStorageError> {
        self.chain.lock().await.advance(height)
    }

    async fn get_new_blocks(
        &self,
    ) -> Result<Vec<UnprovenBlockWithPreviousMetadata>, BlockStorageError> {
        let mut chain = self.chain.lock().await;
        let blocks = chain.pending();
        let head = chain.height();
        chain.advance(head)?;
        Ok(blocks)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBatchStorage {
    batches: Mutex<Vec<ProvenBatch>>,
}

impl InMemoryBatchStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchStorage for InMemoryBatchStorage {
    async fn push_batch(&self, batch: ProvenBatch) -> Result<(), BlockStorageError> {
        let mut batches = self.batches.lock().await;
        let expected = batches.len() as u64;
        if batch.height != expected {
            return Err(BlockStorageError::NonContiguousBatch {
                expected,
                got: batch.height,
            });
        }
        batches.push(batch);
        Ok(())
    }

    async fn get_current_batch_height(&self) -> Result<u64, BlockStorageError> {
        Ok(self.batches.lock().await.len() as u64)
    }

    async fn get_batch_at(&self, height: u64) -> Result<Option<ProvenBatch>, BlockStorageError> {
        let batches = self.batches.lock().await;
        Ok(usize::try_from(height)
            .ok()
            .and_then(|height| batches.get(height))
            .cloned())
    }

    async fn get_latest_batch(&self) -> Result<Option<ProvenBatch>, BlockStorageError> {
        Ok(self.batches.lock().await.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::B256;

    use super::{InMemoryBatchStorage, InMemoryBlockStorage};
    use crate::block::{BatchPublicOutput, ProvenBatch, UnprovenBlock, UnprovenBlockMetadata};
    use crate::storage::{
        BatchStorage, BlockStorageError, HistoricalUnprovenBlockStorage, UnprovenBlockQueue,
        UnprovenBlockStorage,
    };

    async fn push(storage: &InMemoryBlockStorage, height: u64) -> Arc<UnprovenBlock> {
        let root = B256::repeat_byte(height as u8 + 1);
        let block = Arc::new(UnprovenBlock::new(height, vec![], root));
        let previous = storage.get_newest_metadata().await.expect("metadata");
        let metadata = UnprovenBlockMetadata::for_block(&block, previous.as_ref());
        storage
            .push_block_with_metadata(Arc::clone(&block), metadata)
            .await
            .expect("push block");
        block
    }

    #[tokio::test]
    async fn get_new_blocks_returns_each_block_once() {
        let storage = InMemoryBlockStorage::new();
        push(&storage, 0).await;
        push(&storage, 1).await;

        let first = storage.get_new_blocks().await.expect("first read");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].last_block_metadata, None);
        assert_eq!(first[1].last_block_metadata.map(|meta| meta.height), Some(0));

        assert!(storage.get_new_blocks().await.expect("second read").is_empty());

        push(&storage, 2).await;
        let third = storage.get_new_blocks().await.expect("third read");
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].block.height, 2);
        assert_eq!(third[0].last_block_metadata.map(|meta| meta.height), Some(1));
    }

    #[tokio::test]
    async fn peek_leaves_cursor_until_acknowledged() {
        let storage = InMemoryBlockStorage::new();
        push(&storage, 0).await;

        assert_eq!(storage.peek_new_blocks().await.expect("peek").len(), 1);
        assert_eq!(storage.peek_new_blocks().await.expect("peek").len(), 1);
        storage.advance_cursor(1).await.expect("advance");
        assert!(storage.peek_new_blocks().await.expect("peek").is_empty());

        // Going backwards is ignored; going past the head is an error.
        storage.advance_cursor(0).await.expect("stale advance");
        assert_eq!(storage.cursor().await, 1);
        assert_eq!(
            storage.advance_cursor(5).await.unwrap_err(),
            BlockStorageError::CursorBeyondHead {
                requested: 5,
                height: 1
            }
        );
    }

    #[tokio::test]
    async fn rejects_gaps_and_looks_up_blocks() {
        let storage = InMemoryBlockStorage::new();
        let genesis = push(&storage, 0).await;

        let gap = Arc::new(UnprovenBlock::new(3, vec![], B256::ZERO));
        assert_eq!(
            storage.push_block(gap).await.unwrap_err(),
            BlockStorageError::NonContiguousHeight {
                expected: 1,
                got: 3
            }
        );

        assert_eq!(storage.get_current_block_height().await.expect("height"), 1);
        assert_eq!(storage.get_latest_block().await.expect("latest"), Some(Arc::clone(&genesis)));
        assert_eq!(storage.get_block_at(0).await.expect("at"), Some(Arc::clone(&genesis)));
        assert_eq!(storage.get_block_at(1).await.expect("at"), None);
        assert_eq!(
            storage.get_block(&genesis.transactions_hash).await.expect("by hash"),
            Some(genesis)
        );
    }

    #[tokio::test]
    async fn separate_pushes_keep_lists_in_step() {
        let storage = InMemoryBlockStorage::new();
        let block = Arc::new(UnprovenBlock::new(0, vec![], B256::ZERO));
        let metadata = UnprovenBlockMetadata::for_block(&block, None);
        storage.push_block(Arc::clone(&block)).await.expect("block");
        storage.push_metadata(metadata).await.expect("metadata");

        let queued = storage.peek_new_blocks().await.expect("peek");
        assert_eq!(queued[0].block, block);
        assert_eq!(
            storage.push_metadata(metadata).await.unwrap_err(),
            BlockStorageError::MetadataOutOfStep {
                expected: 1,
                got: 0
            }
        );
    }

    #[tokio::test]
    async fn batches_are_contiguous() {
        let storage = InMemoryBatchStorage::new();
        let output = BatchPublicOutput {
            first_block_height: 0,
            last_block_height: 0,
            state_root_before: B256::ZERO,
            state_root: B256::ZERO,
            block_hash_chain: B256::ZERO,
        };
        let batch = |height| ProvenBatch {
            height,
            proof: Default::default(),
            public_output: output,
        };

        storage.push_batch(batch(0)).await.expect("push");
        assert!(storage.push_batch(batch(2)).await.is_err());
        assert_eq!(storage.get_current_batch_height().await.expect("height"), 1);
        assert_eq!(storage.get_latest_batch().await.expect("latest"), Some(batch(0)));
        assert_eq!(storage.get_batch_at(1).await.expect("at"), None);
    }
}
