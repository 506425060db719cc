// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod context;
mod method;
mod wallet;

use std::fmt;

use alloy_primitives::U256;
use async_trait::async_trait;
use thiserror::Error;

use crate::state_field::StateField;
use crate::transaction::Transaction;

pub use context::{ExecutionContext, StateAccessError, StateReader};
pub use method::{Mint, Transfer, Withdrawal, method_id};
pub use wallet::{WalletConfig, WalletRuntime};

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The transaction is included with `status = false`; its writes are dropped.
    #[error("{0}")]
    Reverted(RevertReason),
    /// The state backend failed; block production must abort.
    #[error(transparent)]
    State(#[from] StateAccessError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    UnknownMethod { method_id: u32 },
    InvalidNonce { expected: u64, got: u64 },
    MalformedArgs { method: &'static str },
    InsufficientBalance { required: U256, available: U256 },
    MethodDisabled { method: &'static str },
    BalanceOverflow,
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMethod { method_id } => write!(f, "unknown method id {method_id:#010x}"),
            Self::InvalidNonce { expected, got } => {
                write!(f, "bad nonce: expected {expected}, got {got}")
            }
            Self::MalformedArgs { method } => write!(f, "malformed arguments for {method}"),
            Self::InsufficientBalance {
                required,
                available,
            } => {
                write!(
                    f,
                    "insufficient balance: required {required}, available {available}"
                )
            }
            Self::MethodDisabled { method } => write!(f, "{method} is disabled"),
            Self::BalanceOverflow => write!(f, "balance overflow"),
        }
    }
}

impl From<RevertReason> for ExecutionError {
    fn from(value: RevertReason) -> Self {
        Self::Reverted(value)
    }
}

/// Executes transactions against sequencer state. Implementations read and write
/// exclusively through the [`ExecutionContext`].
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Qualified `Module.method` name for a method id, if the runtime exposes it.
    fn resolve_method(&self, method_id: u32) -> Option<&'static str>;

    /// State fields exposed to the query layer.
    fn state_fields(&self) -> Vec<StateField>;

    async fn execute(
        &self,
        tx: &Transaction,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), ExecutionError>;
}
