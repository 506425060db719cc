// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AsyncMerkleTreeStore, MerkleStoreError};

type NodeKey = (U256, u16);

#[derive(Debug, Default)]
struct Nodes {
    committed: HashMap<NodeKey, B256>,
    staged: Option<HashMap<NodeKey, B256>>,
}

/// Development store. Completes every call without suspending but keeps the
/// transactional contract of a remote store.
#[derive(Debug, Default)]
pub struct InMemoryAsyncMerkleTreeStore {
    nodes: Mutex<Nodes>,
}

impl InMemoryAsyncMerkleTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn committed_node_count(&self) -> usize {
        self.nodes.lock().await.committed.len()
    }

    pub async fn has_open_transaction(&self) -> bool {
        self.nodes.lock().await.staged.is_some()
    }
}

#[async_trait]
impl AsyncMerkleTreeStore for InMemoryAsyncMerkleTreeStore {
    async fn open_transaction(&self) -> Result<(), MerkleStoreError> {
        let mut nodes = self.nodes.lock().await;
        if nodes.staged.is_some() {
            return Err(MerkleStoreError::TransactionAlreadyOpen);
        }
        nodes.staged = Some(HashMap::new());
        Ok(())
    }

    async fn commit(&self) -> Result<(), MerkleStoreError> {
        let mut nodes = self.nodes.lock().await;
        let staged = nodes
            .staged
            .take()
            .ok_or(MerkleStoreError::NoOpenTransaction)?;
        nodes.committed.extend(staged);
        Ok(())
    }

    async fn discard(&self) -> Result<(), MerkleStoreError> {
        self.nodes.lock().await.staged = None;
        Ok(())
    }

    async fn get_node(&self, index: U256, depth: u16) -> Result<Option<B256>, MerkleStoreError> {
        let nodes = self.nodes.lock().await;
        let key = (index, depth);
        let staged = nodes.staged.as_ref().and_then(|staged| staged.get(&key));
        Ok(staged.or_else(|| nodes.committed.get(&key)).copied())
    }

    async fn set_node(&self, index: U256, depth: u16, value: B256) -> Result<(), MerkleStoreError> {
        let mut nodes = self.nodes.lock().await;
        let staged = nodes
            .staged
            .as_mut()
            .ok_or(MerkleStoreError::NoOpenTransaction)?;
        staged.insert((index, depth), value);
        Ok(())
    }
}
