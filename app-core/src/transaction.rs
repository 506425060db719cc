// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, B256, Bytes, keccak256};
use alloy_sol_types::{Eip712Domain, SolStruct, sol};
use serde::{Deserialize, Serialize};

sol! {
    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct RuntimeCall {
        uint64 nonce;
        uint32 method_id;
        bytes args;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub call: RuntimeCall,
    pub signature: Bytes,
}

impl Transaction {
    pub const SIGNATURE_BYTES: usize = 65;
    // Largest argument payload accepted at ingress; the reference methods need 52 bytes.
    pub const MAX_ARGS_BYTES: usize = 1024;

    /// Content hash identifying the transaction in the mempool and in blocks.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(20 + 32 + self.signature.len());
        buf.extend_from_slice(self.sender.as_slice());
        buf.extend_from_slice(self.call.eip712_hash_struct().as_slice());
        buf.extend_from_slice(&self.signature);
        keccak256(buf)
    }

    /// Hash the sender signs over.
    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        self.call.eip712_signing_hash(domain)
    }

    pub fn method_id(&self) -> u32 {
        self.call.method_id
    }

    pub fn nonce(&self) -> u64 {
        self.call.nonce
    }
}
