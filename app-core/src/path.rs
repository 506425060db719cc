// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt;

use alloy_primitives::{B256, U256, keccak256};
use serde::{Deserialize, Serialize};

/// 32-byte state key. Read as a big-endian integer it is also the leaf index in
/// the commitment tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub B256);

impl Path {
    pub fn from_property(module: &str, property: &str) -> Self {
        let mut buf = Vec::with_capacity(module.len() + property.len() + 1);
        buf.extend_from_slice(module.as_bytes());
        buf.push(b'.');
        buf.extend_from_slice(property.as_bytes());
        Self(keccak256(buf))
    }

    /// Parses `Module.property` into its property path.
    pub fn from_dotted(value: &str) -> Option<Self> {
        let (module, property) = value.split_once('.')?;
        if module.is_empty() || property.is_empty() {
            return None;
        }
        Some(Self::from_property(module, property))
    }

    pub fn from_key(base: Path, key: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(32 + key.len());
        buf.extend_from_slice(base.0.as_slice());
        buf.extend_from_slice(key);
        Self(keccak256(buf))
    }

    /// Map entry keyed by a counter, e.g. the n-th queued withdrawal.
    pub fn from_index(base: Path, index: u64) -> Self {
        Self::from_key(base, &index_key(index))
    }

    pub fn leaf_index(&self) -> U256 {
        U256::from_be_bytes(self.0.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn index_key(index: u64) -> [u8; 32] {
    U256::from(index).to_be_bytes::<32>()
}

#[cfg(test)]
mod tests {
    use super::Path;

    #[test]
    fn dotted_path_matches_property_path() {
        assert_eq!(
            Path::from_dotted("Withdrawals.withdrawals"),
            Some(Path::from_property("Withdrawals", "withdrawals"))
        );
        assert_eq!(Path::from_dotted("Withdrawals"), None);
        assert_eq!(Path::from_dotted(".withdrawals"), None);
    }

    #[test]
    fn keyed_paths_differ_per_key() {
        let base = Path::from_property("Balances", "balances");
        assert_ne!(Path::from_key(base, &[1]), Path::from_key(base, &[2]));
        assert_ne!(Path::from_index(base, 0), Path::from_index(base, 1));
        assert_ne!(Path::from_key(base, &[1]), base);
    }
}
