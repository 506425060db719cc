// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;
mod proven;
mod trigger;
mod types;
mod unproven;

use std::sync::Arc;

use async_trait::async_trait;

use crate::block::UnprovenBlock;

pub use error::{BatchError, ProducerError};
pub use proven::BatchProducer;
pub use trigger::{BlockTrigger, ProductionContext, TriggerConfig, TriggerError, TriggerStop};
pub use types::SequencerError;
pub(crate) use types::ProductionGuard;
pub use unproven::{ProducerConfig, UnprovenProducer};

/// Notified after a block and its metadata are durably appended.
#[async_trait]
pub trait BlockSubscriber: Send + Sync {
    async fn on_block_produced(&self, block: &Arc<UnprovenBlock>);
}
