// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BatchError, ProducerError};
use crate::context::Sequencer;

#[derive(Debug, Clone, Copy)]
pub struct TriggerConfig {
    pub block_interval: Duration,
    /// Blocks between proving attempts. Zero disables proving and settlement.
    pub blocks_per_batch: u64,
    /// Withdrawals handed to the settlement layer after each settlement.
    /// Zero leaves them queued.
    pub withdrawals_per_dispatch: usize,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("block trigger shutdown requested")]
    ShutdownRequested,
    #[error("unproven block production failed")]
    Production {
        #[source]
        source: ProducerError,
    },
    #[error("batch production failed")]
    Batch {
        #[source]
        source: BatchError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TriggerStop {
    shutdown: Arc<AtomicBool>,
}

impl TriggerStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Loop-local production state. The in-flight flag lives in each producer's
/// guard, so overlapping on-demand calls are covered as well.
#[derive(Debug, Clone, Default)]
pub struct ProductionContext {
    /// Height the next block will get.
    pub height: u64,
    pub next_trigger_at: Option<Instant>,
    pub last_duration: Duration,
    pub blocks_since_batch: u64,
}

pub struct BlockTrigger {
    sequencer: Arc<Sequencer>,
    config: TriggerConfig,
    stop: TriggerStop,
    context: ProductionContext,
}

impl BlockTrigger {
    pub fn new(sequencer: Arc<Sequencer>, config: TriggerConfig) -> Self {
        Self {
            sequencer,
            config,
            stop: TriggerStop::default(),
            context: ProductionContext::default(),
        }
    }

    pub fn spawn(self) -> (JoinHandle<TriggerError>, TriggerStop) {
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            let mut trigger = self;
            match trigger.run_forever().await {
                Err(err) => err,
                Ok(()) => unreachable!("block trigger loop is expected to be non-terminating"),
            }
        });
        (handle, stop)
    }

    async fn run_forever(&mut self) -> Result<(), TriggerError> {
        while !self.stop.is_shutdown_requested() {
            let started = Instant::now();
            self.tick().await?;

            let next = started + self.config.block_interval;
            self.context.next_trigger_at = Some(next);
            tokio::time::sleep_until(next).await;
        }

        Err(TriggerError::ShutdownRequested)
    }

    async fn tick(&mut self) -> Result<(), TriggerError> {
        let started = Instant::now();
        let produced = self
            .sequencer
            .produce_unproven()
            .await
            .map_err(|source| TriggerError::Production { source })?;
        if let Some(block) = produced {
            self.context.height = block.height + 1;
            self.context.blocks_since_batch += 1;
        }

        if self.config.blocks_per_batch > 0 {
            if self.context.blocks_since_batch >= self.config.blocks_per_batch {
                self.prove().await?;
            }
            self.settle_and_dispatch().await;
        }

        self.context.last_duration = started.elapsed();
        debug!(
            height = self.context.height,
            blocks_since_batch = self.context.blocks_since_batch,
            elapsed_ms = self.context.last_duration.as_millis() as u64,
            late_ms = self
                .context
                .next_trigger_at
                .map(|due| started.saturating_duration_since(due).as_millis() as u64),
            "block trigger tick"
        );
        Ok(())
    }

    async fn prove(&mut self) -> Result<(), TriggerError> {
        match self.sequencer.produce_proven().await {
            Ok(_) => {
                self.context.blocks_since_batch = 0;
                Ok(())
            }
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "proving failed, retrying next tick");
                Ok(())
            }
            Err(source) => Err(TriggerError::Batch { source }),
        }
    }

    /// Runs every tick, so stored batches whose submission failed are retried
    /// even when no new block is produced.
    async fn settle_and_dispatch(&self) {
        if let Err(err) = self.sequencer.settle_pending().await {
            warn!(error = %err, "settlement failed, retrying next tick");
            return;
        }

        if self.config.withdrawals_per_dispatch > 0
            && let Err(err) = self
                .sequencer
                .dispatch_withdrawals(self.config.withdrawals_per_dispatch)
                .await
        {
            warn!(error = %err, "withdrawal dispatch failed, retrying next tick");
        }
    }
}
