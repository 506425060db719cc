// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Sequencing core for an application-specific rollup.
//!
//! Flow: API -> mempool -> unproven producer -> block storage -> batch
//! producer -> settlement -> withdrawal queue. The unproven producer is the
//! single writer of the unproven state; the batch producer is the single
//! consumer of the block queue and the single writer of the proven state.
pub mod api;
pub mod block;
pub mod block_stream;
pub mod context;
pub mod mempool;
pub mod merkle;
pub mod production;
pub mod prover;
pub mod query;
pub mod settlement;
pub mod state;
pub mod storage;

pub use context::{Sequencer, SequencerConfig};
