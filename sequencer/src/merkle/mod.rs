// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Node store for the commitment tree. Nodes are addressed by `(index, depth)`
//! with the root at depth 0 and leaves at [`TREE_HEIGHT`].

mod memory;
mod tree;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryAsyncMerkleTreeStore;
pub use tree::{MerkleWitness, RollupMerkleTree, TREE_HEIGHT, hash_children};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MerkleStoreError {
    #[error("merkle store transaction already open")]
    TransactionAlreadyOpen,
    #[error("merkle store write outside of an open transaction")]
    NoOpenTransaction,
    #[error("merkle store unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous node store with a single staging transaction.
///
/// Writes are only accepted between `open_transaction` and `commit`/`discard`.
/// Reads observe staged writes of the open transaction on top of committed nodes.
#[async_trait]
pub trait AsyncMerkleTreeStore: Send + Sync {
    async fn open_transaction(&self) -> Result<(), MerkleStoreError>;

    async fn commit(&self) -> Result<(), MerkleStoreError>;

    /// Drops staged writes. A no-op when no transaction is open.
    async fn discard(&self) -> Result<(), MerkleStoreError>;

    async fn get_node(&self, index: U256, depth: u16) -> Result<Option<B256>, MerkleStoreError>;

    async fn set_node(&self, index: U256, depth: u16, value: B256) -> Result<(), MerkleStoreError>;
}
