// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, U256, keccak256};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};

/// Method id of a qualified `Module.method` name: the first four bytes of its
/// keccak-256 digest, big-endian.
pub fn method_id(qualified: &str) -> u32 {
    let hash = keccak256(qualified.as_bytes());
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

#[derive(PartialEq, Debug, Encode, Decode, Clone)]
pub struct Mint {
    pub to: Address,
    pub amount: U256,
}

#[derive(PartialEq, Debug, Encode, Decode, Clone)]
pub struct Transfer {
    pub to: Address,
    pub amount: U256,
}

/// Arguments of `Withdrawals.withdraw` and the payload stored for settlement.
#[derive(PartialEq, Eq, Debug, Encode, Decode, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub recipient: Address,
    pub amount: U256,
}
