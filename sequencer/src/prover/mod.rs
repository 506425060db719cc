// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{B256, Bytes, keccak256};
use async_trait::async_trait;
use thiserror::Error;

use crate::block::{
    BatchProof, BatchPublicOutput, UnprovenBlockMetadata, UnprovenBlockWithPreviousMetadata,
    chain_hash,
};
use crate::merkle::{InMemoryAsyncMerkleTreeStore, RollupMerkleTree};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProverError {
    #[error("cannot prove an empty batch")]
    EmptyBatch,
    #[error("batch is not contiguous: expected block {expected}, got {got}")]
    NonContiguousBlocks { expected: u64, got: u64 },
    #[error("prover unavailable: {0}")]
    Unavailable(String),
}

/// Proves a contiguous range of unproven blocks starting right after
/// `preceding` (or at genesis when it is `None`).
#[async_trait]
pub trait BlockProver: Send + Sync {
    async fn produce_proven(
        &self,
        blocks: &[UnprovenBlockWithPreviousMetadata],
        preceding: Option<&UnprovenBlockMetadata>,
    ) -> Result<BatchProof, ProverError>;
}

/// Commits to the public output without proving anything. The block roots are
/// trusted; the batch producer checks them against the proven state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBlockProver;

#[async_trait]
impl BlockProver for MockBlockProver {
    async fn produce_proven(
        &self,
        blocks: &[UnprovenBlockWithPreviousMetadata],
        preceding: Option<&UnprovenBlockMetadata>,
    ) -> Result<BatchProof, ProverError> {
        let first = blocks.first().ok_or(ProverError::EmptyBatch)?;

        let state_root_before = preceding
            .map(|meta| meta.state_root)
            .unwrap_or_else(RollupMerkleTree::<InMemoryAsyncMerkleTreeStore>::empty_root);
        let mut chain = preceding.map(|meta| meta.block_hash_chain).unwrap_or(B256::ZERO);
        let mut expected = preceding.map(|meta| meta.height + 1).unwrap_or(0);
        let mut state_root = state_root_before;

        for entry in blocks {
            if entry.block.height != expected {
                return Err(ProverError::NonContiguousBlocks {
                    expected,
                    got: entry.block.height,
                });
            }
            chain = chain_hash(chain, entry.block.transactions_hash);
            state_root = entry.block.state_root;
            expected += 1;
        }

        let public_output = BatchPublicOutput {
            first_block_height: first.block.height,
            last_block_height: expected - 1,
            state_root_before,
            state_root,
            block_hash_chain: chain,
        };
        Ok(BatchProof {
            proof: mock_proof(&public_output),
            public_output,
        })
    }
}

fn mock_proof(output: &BatchPublicOutput) -> Bytes {
    let mut buf = Vec::with_capacity(16 + 96);
    buf.extend_from_slice(&output.first_block_height.to_be_bytes());
    buf.extend_from_slice(&output.last_block_height.to_be_bytes());
    buf.extend_from_slice(output.state_root_before.as_slice());
    buf.extend_from_slice(output.state_root.as_slice());
    buf.extend_from_slice(output.block_hash_chain.as_slice());
    Bytes::copy_from_slice(keccak256(buf).as_slice())
}
