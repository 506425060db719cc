// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::{Arc, OnceLock};

use alloy_primitives::{B256, U256, keccak256};

use super::{AsyncMerkleTreeStore, MerkleStoreError};

/// Number of levels below the root. Leaf index is the full 256-bit path.
pub const TREE_HEIGHT: u16 = 256;

pub fn hash_children(left: B256, right: B256) -> B256 {
    let mut buf = [0_u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Digest of an all-empty subtree rooted at each depth.
fn zero_digests() -> &'static [B256] {
    static ZEROS: OnceLock<Vec<B256>> = OnceLock::new();
    ZEROS.get_or_init(|| {
        let mut zeros = vec![B256::ZERO; usize::from(TREE_HEIGHT) + 1];
        for depth in (0..usize::from(TREE_HEIGHT)).rev() {
            zeros[depth] = hash_children(zeros[depth + 1], zeros[depth + 1]);
        }
        zeros
    })
}

/// Sparse binary tree over an [`AsyncMerkleTreeStore`]. Absent nodes read as
/// the empty-subtree digest of their depth.
pub struct RollupMerkleTree<S: ?Sized> {
    store: Arc<S>,
}

impl<S: AsyncMerkleTreeStore + ?Sized> RollupMerkleTree<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn empty_root() -> B256 {
        zero_digests()[0]
    }

    async fn node(&self, index: U256, depth: u16) -> Result<B256, MerkleStoreError> {
        let stored = self.store.get_node(index, depth).await?;
        Ok(stored.unwrap_or(zero_digests()[usize::from(depth)]))
    }

    pub async fn root(&self) -> Result<B256, MerkleStoreError> {
        self.node(U256::ZERO, 0).await
    }

    pub async fn get_leaf(&self, index: U256) -> Result<B256, MerkleStoreError> {
        self.node(index, TREE_HEIGHT).await
    }

    /// Writes a leaf and rehashes its path up to the root. Needs an open
    /// store transaction.
    pub async fn set_leaf(&self, index: U256, leaf: B256) -> Result<(), MerkleStoreError> {
        let mut index = index;
        let mut current = leaf;
        self.store.set_node(index, TREE_HEIGHT, current).await?;

        for depth in (1..=TREE_HEIGHT).rev() {
            let sibling = self.node(index ^ U256::from(1_u64), depth).await?;
            current = if index.bit(0) {
                hash_children(sibling, current)
            } else {
                hash_children(current, sibling)
            };
            index >>= 1_usize;
            self.store.set_node(index, depth - 1, current).await?;
        }
        Ok(())
    }

    pub async fn witness(&self, index: U256) -> Result<MerkleWitness, MerkleStoreError> {
        let mut siblings = Vec::with_capacity(usize::from(TREE_HEIGHT));
        let mut cursor = index;
        for depth in (1..=TREE_HEIGHT).rev() {
            siblings.push(self.node(cursor ^ U256::from(1_u64), depth).await?);
            cursor >>= 1_usize;
        }
        Ok(MerkleWitness { index, siblings })
    }
}

/// Sibling digests from the leaf level up to the children of the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleWitness {
    pub index: U256,
    pub siblings: Vec<B256>,
}

impl MerkleWitness {
    pub fn compute_root(&self, leaf: B256) -> B256 {
        let mut index = self.index;
        let mut current = leaf;
        for sibling in &self.siblings {
            current = if index.bit(0) {
                hash_children(*sibling, current)
            } else {
                hash_children(current, *sibling)
            };
            index >>= 1_usize;
        }
        current
    }

    pub fn verify(&self, root: B256, leaf: B256) -> bool {
        self.siblings.len() == usize::from(TREE_HEIGHT) && self.compute_root(leaf) == root
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{B256, U256};

    use super::{RollupMerkleTree, TREE_HEIGHT, hash_children};
    use crate::merkle::{AsyncMerkleTreeStore, InMemoryAsyncMerkleTreeStore};

    fn tree() -> RollupMerkleTree<InMemoryAsyncMerkleTreeStore> {
        RollupMerkleTree::new(Arc::new(InMemoryAsyncMerkleTreeStore::new()))
    }

    #[tokio::test]
    async fn fresh_tree_has_empty_root() {
        let tree = tree();
        let empty = RollupMerkleTree::<InMemoryAsyncMerkleTreeStore>::empty_root();
        assert_eq!(tree.root().await.expect("root"), empty);
        assert_ne!(empty, B256::ZERO);
    }

    #[tokio::test]
    async fn root_depends_on_leaf_position() {
        let left = tree();
        let right = tree();
        let leaf = B256::repeat_byte(7);

        left.store().open_transaction().await.expect("open");
        left.set_leaf(U256::from(0_u64), leaf).await.expect("set");
        right.store().open_transaction().await.expect("open");
        right.set_leaf(U256::from(1_u64), leaf).await.expect("set");

        assert_ne!(
            left.root().await.expect("root"),
            right.root().await.expect("root")
        );
    }

    #[tokio::test]
    async fn witness_verifies_against_root() {
        let tree = tree();
        let index = U256::MAX - U256::from(12_u64);
        let leaf = B256::repeat_byte(9);

        tree.store().open_transaction().await.expect("open");
        tree.set_leaf(U256::from(3_u64), B256::repeat_byte(1))
            .await
            .expect("set neighbour");
        tree.set_leaf(index, leaf).await.expect("set");
        tree.store().commit().await.expect("commit");

        let root = tree.root().await.expect("root");
        let witness = tree.witness(index).await.expect("witness");
        assert_eq!(witness.siblings.len(), usize::from(TREE_HEIGHT));
        assert!(witness.verify(root, leaf));
        assert!(!witness.verify(root, B256::repeat_byte(8)));
    }

    #[tokio::test]
    async fn clearing_a_leaf_restores_the_empty_root() {
        let tree = tree();
        tree.store().open_transaction().await.expect("open");
        tree.set_leaf(U256::from(42_u64), B256::repeat_byte(4))
            .await
            .expect("set");
        tree.set_leaf(U256::from(42_u64), B256::ZERO)
            .await
            .expect("clear");
        assert_eq!(
            tree.root().await.expect("root"),
            RollupMerkleTree::<InMemoryAsyncMerkleTreeStore>::empty_root()
        );
    }

    #[test]
    fn hash_children_is_order_sensitive() {
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        assert_ne!(hash_children(a, b), hash_children(b, a));
    }
}
