// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{B256, Bytes, keccak256};
use serde::{Deserialize, Serialize};

use crate::path::Path;

/// One write performed by a transaction. `None` means the path holds no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub path: Path,
    pub from: Option<Bytes>,
    pub to: Option<Bytes>,
}

impl StateTransition {
    pub fn from_commitment(&self) -> B256 {
        value_commitment(self.from.as_ref().map(|value| &value[..]))
    }

    pub fn to_commitment(&self) -> B256 {
        value_commitment(self.to.as_ref().map(|value| &value[..]))
    }

    pub fn digest(&self) -> B256 {
        let mut buf = [0_u8; 96];
        buf[..32].copy_from_slice(self.path.0.as_slice());
        buf[32..64].copy_from_slice(self.from_commitment().as_slice());
        buf[64..].copy_from_slice(self.to_commitment().as_slice());
        keccak256(buf)
    }
}

/// Leaf digest of a stored value. Absent values commit to zero so that deleting a
/// path restores the empty-subtree digest.
pub fn value_commitment(value: Option<&[u8]>) -> B256 {
    match value {
        Some(bytes) => keccak256(bytes),
        None => B256::ZERO,
    }
}
