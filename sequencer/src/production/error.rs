// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::B256;
use app_core::runtime::StateAccessError;
use thiserror::Error;

use crate::prover::ProverError;
use crate::state::StateError;
use crate::storage::BlockStorageError;

/// Infrastructure failures of unproven block production. Transaction reverts
/// are recorded inside the block and never surface here.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("cannot load chain head")]
    LoadHead {
        #[source]
        source: BlockStorageError,
    },
    #[error("cannot open staging state")]
    OpenStaging {
        #[source]
        source: StateError,
    },
    #[error("state read failed during execution")]
    ExecutionState {
        #[source]
        source: StateAccessError,
    },
    #[error("cannot apply state transitions to staging state")]
    ApplyTransitions {
        #[source]
        source: StateError,
    },
    #[error("cannot compute staging state root")]
    ComputeRoot {
        #[source]
        source: StateError,
    },
    #[error("cannot append block")]
    AppendBlock {
        #[source]
        source: BlockStorageError,
    },
    #[error("block appended but staging commit failed")]
    CommitStaging {
        #[source]
        source: StateError,
    },
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot load queued blocks")]
    LoadBlocks {
        #[source]
        source: BlockStorageError,
    },
    #[error("cannot load batch head")]
    LoadBatchHead {
        #[source]
        source: BlockStorageError,
    },
    #[error("proving failed")]
    Proving {
        #[source]
        source: ProverError,
    },
    #[error("cannot stage proven state")]
    ProvenState {
        #[source]
        source: StateError,
    },
    #[error("proven state root {actual} does not match proof output {expected}")]
    StateRootMismatch { expected: B256, actual: B256 },
    #[error("cannot store proven batch")]
    PushBatch {
        #[source]
        source: BlockStorageError,
    },
    #[error("batch stored but proven state commit failed")]
    CommitProvenState {
        #[source]
        source: StateError,
    },
    #[error("cannot acknowledge proven blocks")]
    AdvanceCursor {
        #[source]
        source: BlockStorageError,
    },
}

impl BatchError {
    /// The prover is an external collaborator; its failures leave the queue
    /// untouched and are retried on the next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Proving { .. })
    }
}
