// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Path-addressed key/value state committed into a [`RollupMerkleTree`].
//!
//! The sequencer runs two instances: the unproven state, advanced by block
//! production, and the proven state, advanced only after a batch proof.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{B256, Bytes};
use app_core::StateTransition;
use app_core::path::Path;
use app_core::runtime::{StateAccessError, StateReader};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::merkle::{
    AsyncMerkleTreeStore, InMemoryAsyncMerkleTreeStore, MerkleStoreError, MerkleWitness,
    RollupMerkleTree,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] MerkleStoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEntry {
    pub key: Path,
    pub value: Option<Bytes>,
}

#[async_trait]
pub trait AsyncStateService: Send + Sync {
    /// One entry per requested key, in request order.
    async fn get_async(&self, keys: &[Path]) -> Result<Vec<StateEntry>, StateError>;

    async fn get_single_async(&self, key: &Path) -> Result<Option<Bytes>, StateError>;
}

#[derive(Debug, Default)]
struct Values {
    committed: HashMap<Path, Bytes>,
    staged: Option<HashMap<Path, Option<Bytes>>>,
}

impl Values {
    fn get(&self, key: &Path) -> Option<Bytes> {
        if let Some(value) = self.staged.as_ref().and_then(|staged| staged.get(key)) {
            return value.clone();
        }
        self.committed.get(key).cloned()
    }
}

pub struct MerkleStateService {
    tree: RollupMerkleTree<dyn AsyncMerkleTreeStore>,
    values: Mutex<Values>,
}

impl MerkleStateService {
    pub fn new(store: Arc<dyn AsyncMerkleTreeStore>) -> Self {
        Self {
            tree: RollupMerkleTree::new(store),
            values: Mutex::new(Values::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAsyncMerkleTreeStore::new()))
    }

    pub async fn open_transaction(&self) -> Result<(), StateError> {
        self.tree.store().open_transaction().await?;
        self.values.lock().await.staged = Some(HashMap::new());
        Ok(())
    }

    /// Stages transitions in order: each `to` value becomes the leaf commitment
    /// of its path.
    pub async fn apply_transitions(
        &self,
        transitions: &[StateTransition],
    ) -> Result<(), StateError> {
        for transition in transitions {
            self.tree
                .set_leaf(transition.path.leaf_index(), transition.to_commitment())
                .await?;
            let mut values = self.values.lock().await;
            let staged = values
                .staged
                .as_mut()
                .ok_or(MerkleStoreError::NoOpenTransaction)?;
            staged.insert(transition.path, transition.to.clone());
        }
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), StateError> {
        self.tree.store().commit().await?;
        let mut values = self.values.lock().await;
        if let Some(staged) = values.staged.take() {
            for (key, value) in staged {
                match value {
                    Some(value) => {
                        values.committed.insert(key, value);
                    }
                    None => {
                        values.committed.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn discard(&self) -> Result<(), StateError> {
        self.tree.store().discard().await?;
        self.values.lock().await.staged = None;
        Ok(())
    }

    pub async fn root(&self) -> Result<B256, StateError> {
        Ok(self.tree.root().await?)
    }

    pub async fn witness(&self, key: &Path) -> Result<MerkleWitness, StateError> {
        Ok(self.tree.witness(key.leaf_index()).await?)
    }
}

#[async_trait]
impl AsyncStateService for MerkleStateService {
    async fn get_async(&self, keys: &[Path]) -> Result<Vec<StateEntry>, StateError> {
        let values = self.values.lock().await;
        Ok(keys
            .iter()
            .map(|key| StateEntry {
                key: *key,
                value: values.get(key),
            })
            .collect())
    }

    async fn get_single_async(&self, key: &Path) -> Result<Option<Bytes>, StateError> {
        Ok(self.values.lock().await.get(key))
    }
}

#[async_trait]
impl StateReader for MerkleStateService {
    async fn read(&self, path: &Path) -> Result<Option<Bytes>, StateAccessError> {
        self.get_single_async(path)
            .await
            .map_err(|err| StateAccessError::new(err.to_string()))
    }
}
