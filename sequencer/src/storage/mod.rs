// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod memory;

use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use thiserror::Error;

use crate::block::{
    ProvenBatch, UnprovenBlock, UnprovenBlockMetadata, UnprovenBlockWithPreviousMetadata,
};

pub use memory::{InMemoryBatchStorage, InMemoryBlockStorage};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockStorageError {
    #[error("block height {got} does not extend the chain, expected {expected}")]
    NonContiguousHeight { expected: u64, got: u64 },
    #[error("metadata for height {got} is out of step, expected {expected}")]
    MetadataOutOfStep { expected: u64, got: u64 },
    #[error("cursor {requested} is beyond chain height {height}")]
    CursorBeyondHead { requested: u64, height: u64 },
    #[error("batch height {got} does not extend the batch list, expected {expected}")]
    NonContiguousBatch { expected: u64, got: u64 },
    #[error("block storage unavailable: {0}")]
    Unavailable(String),
}

/// Append side used by the unproven producer.
#[async_trait]
pub trait UnprovenBlockStorage: Send + Sync {
    async fn push_block(&self, block: Arc<UnprovenBlock>) -> Result<(), BlockStorageError>;

    async fn push_metadata(&self, metadata: UnprovenBlockMetadata) -> Result<(), BlockStorageError>;

    /// Appends a block and its metadata together or not at all.
    async fn push_block_with_metadata(
        &self,
        block: Arc<UnprovenBlock>,
        metadata: UnprovenBlockMetadata,
    ) -> Result<(), BlockStorageError>;

    /// Number of stored blocks, which is also the height of the next block.
    async fn get_current_block_height(&self) -> Result<u64, BlockStorageError>;

    async fn get_latest_block(&self) -> Result<Option<Arc<UnprovenBlock>>, BlockStorageError>;

    async fn get_newest_metadata(&self) -> Result<Option<UnprovenBlockMetadata>, BlockStorageError>;
}

#[async_trait]
pub trait HistoricalUnprovenBlockStorage: Send + Sync {
    async fn get_block_at(
        &self,
        height: u64,
    ) -> Result<Option<Arc<UnprovenBlock>>, BlockStorageError>;

    async fn get_block(
        &self,
        transactions_hash: &B256,
    ) -> Result<Option<Arc<UnprovenBlock>>, BlockStorageError>;
}

/// Blocks not yet handed to the batch producer. A single consumer is assumed.
#[async_trait]
pub trait UnprovenBlockQueue: Send + Sync {
    /// Blocks from the cursor to the head, each paired with the metadata of its
    /// predecessor. Leaves the cursor untouched.
    async fn peek_new_blocks(
        &self,
    ) -> Result<Vec<UnprovenBlockWithPreviousMetadata>, BlockStorageError>;

    /// Moves the cursor forward to `height`. Moving to a height at or below
    /// the cursor is a no-op.
    async fn advance_cursor(&self, height: u64) -> Result<(), BlockStorageError>;

    /// Peek and advance past everything returned.
    async fn get_new_blocks(
        &self,
    ) -> Result<Vec<UnprovenBlockWithPreviousMetadata>, BlockStorageError> {
        let blocks = self.peek_new_blocks().await?;
        if let Some(last) = blocks.last() {
            self.advance_cursor(last.block.height + 1).await?;
        }
        Ok(blocks)
    }
}

#[async_trait]
pub trait BatchStorage: Send + Sync {
    async fn push_batch(&self, batch: ProvenBatch) -> Result<(), BlockStorageError>;

    async fn get_current_batch_height(&self) -> Result<u64, BlockStorageError>;

    async fn get_batch_at(&self, height: u64) -> Result<Option<ProvenBatch>, BlockStorageError>;

    async fn get_latest_batch(&self) -> Result<Option<ProvenBatch>, BlockStorageError>;
}
