// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Blocks and batches as they flow from the unproven producer to settlement.

use std::sync::Arc;

use alloy_primitives::{B256, Bytes, keccak256};
use app_core::{StateTransition, Transaction};
use serde::Serialize;

/// Outcome of one transaction inside a block. Failed transactions are kept
/// with `status = false` and carry no state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionExecutionResult {
    pub tx: Transaction,
    pub status: bool,
    pub status_message: Option<String>,
    pub state_transitions: Vec<StateTransition>,
}

impl TransactionExecutionResult {
    pub fn success(tx: Transaction, state_transitions: Vec<StateTransition>) -> Self {
        Self {
            tx,
            status: true,
            status_message: None,
            state_transitions,
        }
    }

    pub fn failure(tx: Transaction, message: impl Into<String>) -> Self {
        Self {
            tx,
            status: false,
            status_message: Some(message.into()),
            state_transitions: Vec::new(),
        }
    }

    pub fn digest(&self) -> B256 {
        let mut buf = Vec::with_capacity(33 + 32 * self.state_transitions.len());
        buf.extend_from_slice(self.tx.hash().as_slice());
        buf.push(u8::from(self.status));
        for transition in &self.state_transitions {
            buf.extend_from_slice(transition.digest().as_slice());
        }
        keccak256(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnprovenBlock {
    pub height: u64,
    /// Chained digest over the execution results, see [`transactions_hash`].
    pub transactions_hash: B256,
    pub transactions: Vec<TransactionExecutionResult>,
    /// Unproven state root after applying this block.
    pub state_root: B256,
}

impl UnprovenBlock {
    pub fn new(
        height: u64,
        transactions: Vec<TransactionExecutionResult>,
        state_root: B256,
    ) -> Self {
        Self {
            height,
            transactions_hash: transactions_hash(&transactions),
            transactions,
            state_root,
        }
    }

    pub fn successful_transitions(&self) -> impl Iterator<Item = &StateTransition> {
        self.transactions
            .iter()
            .filter(|result| result.status)
            .flat_map(|result| result.state_transitions.iter())
    }

    pub fn transition_count(&self) -> u64 {
        self.successful_transitions().count() as u64
    }
}

pub fn transactions_hash(results: &[TransactionExecutionResult]) -> B256 {
    results
        .iter()
        .fold(B256::ZERO, |acc, result| chain_hash(acc, result.digest()))
}

pub fn chain_hash(previous: B256, next: B256) -> B256 {
    let mut buf = [0_u8; 64];
    buf[..32].copy_from_slice(previous.as_slice());
    buf[32..].copy_from_slice(next.as_slice());
    keccak256(buf)
}

/// Running commitments after a block, used as the starting point of the next
/// batch proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnprovenBlockMetadata {
    pub height: u64,
    pub state_root: B256,
    pub block_hash_chain: B256,
    /// Successful state transitions up to and including this block.
    pub state_transition_count: u64,
}

impl UnprovenBlockMetadata {
    pub fn for_block(block: &UnprovenBlock, previous: Option<&UnprovenBlockMetadata>) -> Self {
        let (chain, count) = previous
            .map(|meta| (meta.block_hash_chain, meta.state_transition_count))
            .unwrap_or((B256::ZERO, 0));
        Self {
            height: block.height,
            state_root: block.state_root,
            block_hash_chain: chain_hash(chain, block.transactions_hash),
            state_transition_count: count + block.transition_count(),
        }
    }
}

/// A queued block paired with the metadata of the block right before it.
/// `last_block_metadata` is `None` only for the genesis block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnprovenBlockWithPreviousMetadata {
    pub block: Arc<UnprovenBlock>,
    pub last_block_metadata: Option<UnprovenBlockMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPublicOutput {
    pub first_block_height: u64,
    pub last_block_height: u64,
    pub state_root_before: B256,
    pub state_root: B256,
    pub block_hash_chain: B256,
}

/// Prover output for a contiguous block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProof {
    pub proof: Bytes,
    pub public_output: BatchPublicOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvenBatch {
    pub height: u64,
    pub proof: Bytes,
    pub public_output: BatchPublicOutput,
}

impl ProvenBatch {
    pub fn new(height: u64, proof: BatchProof) -> Self {
        Self {
            height,
            proof: proof.proof,
            public_output: proof.public_output,
        }
    }
}
