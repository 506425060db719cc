// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_sol_types::Eip712Domain;
use app_core::runtime::{WalletConfig, WalletRuntime};
use tracing_subscriber::EnvFilter;

use sequencer::api::{AppState, router};
use sequencer::block_stream::BlockStreamConfig;
use sequencer::mempool::MempoolOrdering;
use sequencer::production::{BlockTrigger, ProducerConfig, TriggerConfig, TriggerError};
use sequencer::prover::MockBlockProver;
use sequencer::settlement::{InMemorySettlementLayer, WithdrawalQueueConfig};
use sequencer::{Sequencer, SequencerConfig};

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_BLOCK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_BLOCKS_PER_BATCH: u64 = 5;
const DEFAULT_WITHDRAWALS_PER_DISPATCH: usize = 64;
const DEFAULT_MAX_BODY_BYTES: usize = 128 * 1024;
const DEFAULT_STREAM_BUFFER: usize = 64;
const DEFAULT_WITHDRAWAL_METHOD: &str = "Withdrawals.withdraw";
const DEFAULT_WITHDRAWAL_STATE_PATH: &str = "Withdrawals.withdrawals";
const DEFAULT_WITHDRAWAL_COUNTER_PATH: &str = "Withdrawals.counter";
const DEFAULT_DOMAIN_NAME: &str = "RollupSequencer";
const DEFAULT_DOMAIN_VERSION: &str = "1";
const DEFAULT_DOMAIN_CHAIN_ID: u64 = 1;
const DEFAULT_DOMAIN_VERIFYING_CONTRACT: &str = "0x0000000000000000000000000000000000000000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let domain = config.build_domain()?;

    let settlement_layer = Arc::new(InMemorySettlementLayer::new(config.settlement_cursor));
    let sequencer = Arc::new(
        Sequencer::start(
            SequencerConfig {
                producer: ProducerConfig {
                    allow_empty_blocks: config.allow_empty_blocks,
                },
                mempool_ordering: config.mempool_ordering,
                withdrawal_queue: WithdrawalQueueConfig {
                    withdrawal_method: config.withdrawal_method.clone(),
                    withdrawal_state_path: config.withdrawal_state_path.clone(),
                    withdrawal_counter_path: config.withdrawal_counter_path.clone(),
                },
                block_stream: BlockStreamConfig {
                    subscriber_buffer_capacity: config.stream_buffer,
                },
            },
            Arc::new(WalletRuntime::new(WalletConfig::default())),
            Arc::new(MockBlockProver),
            settlement_layer,
        )
        .await?,
    );

    let trigger = BlockTrigger::new(
        Arc::clone(&sequencer),
        TriggerConfig {
            block_interval: config.block_interval,
            blocks_per_batch: config.blocks_per_batch,
            withdrawals_per_dispatch: config.withdrawals_per_dispatch,
        },
    );
    let (mut trigger_handle, trigger_stop) = trigger.spawn();

    let state = Arc::new(AppState { sequencer, domain });
    let app = router(state, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    tracing::info!(address = %config.http_addr, "listening");
    tokio::select! {
        server_result = axum::serve(listener, app) => {
            trigger_stop.request_shutdown();
            let trigger_result = trigger_handle.await;
            match trigger_result {
                Ok(TriggerError::ShutdownRequested) => {}
                Ok(err) => {
                    return Err(format!("block trigger exited during shutdown: {err}").into());
                }
                Err(join_err) => {
                    return Err(
                        format!("block trigger join error during shutdown: {join_err}").into()
                    );
                }
            }
            server_result?;
        }
        trigger_result = &mut trigger_handle => {
            match trigger_result {
                Ok(err) => return Err(format!("block trigger exited: {err}").into()),
                Err(join_err) => {
                    return Err(format!("block trigger join error: {join_err}").into())
                }
            }
        }
    }

    Ok(())
}

struct Config {
    http_addr: String,
    block_interval: Duration,
    blocks_per_batch: u64,
    withdrawals_per_dispatch: usize,
    allow_empty_blocks: bool,
    mempool_ordering: MempoolOrdering,
    max_body_bytes: usize,
    stream_buffer: usize,
    withdrawal_method: String,
    withdrawal_state_path: String,
    withdrawal_counter_path: String,
    settlement_cursor: Option<u64>,
    domain_name: String,
    domain_version: String,
    domain_chain_id: u64,
    domain_verifying_contract: String,
}

impl Config {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            http_addr: env_string("SEQ_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            block_interval: Duration::from_millis(
                env_u64("SEQ_BLOCK_INTERVAL_MS", DEFAULT_BLOCK_INTERVAL_MS).max(1),
            ),
            blocks_per_batch: env_u64("SEQ_BLOCKS_PER_BATCH", DEFAULT_BLOCKS_PER_BATCH),
            withdrawals_per_dispatch: env_usize(
                "SEQ_WITHDRAWALS_PER_DISPATCH",
                DEFAULT_WITHDRAWALS_PER_DISPATCH,
            ),
            allow_empty_blocks: env_bool("SEQ_ALLOW_EMPTY_BLOCKS", false)?,
            mempool_ordering: env_string("SEQ_MEMPOOL_ORDERING", "fifo").parse()?,
            max_body_bytes: env_usize("SEQ_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            stream_buffer: env_usize("SEQ_STREAM_BUFFER", DEFAULT_STREAM_BUFFER).max(1),
            withdrawal_method: env_string("SEQ_WITHDRAWAL_METHOD", DEFAULT_WITHDRAWAL_METHOD),
            withdrawal_state_path: env_string(
                "SEQ_WITHDRAWAL_STATE_PATH",
                DEFAULT_WITHDRAWAL_STATE_PATH,
            ),
            withdrawal_counter_path: env_string(
                "SEQ_WITHDRAWAL_COUNTER_PATH",
                DEFAULT_WITHDRAWAL_COUNTER_PATH,
            ),
            settlement_cursor: std::env::var("SEQ_SETTLEMENT_CURSOR")
                .ok()
                .map(|value| {
                    value
                        .parse()
                        .map_err(|err| format!("invalid SEQ_SETTLEMENT_CURSOR: {err}"))
                })
                .transpose()?,
            domain_name: env_string("SEQ_DOMAIN_NAME", DEFAULT_DOMAIN_NAME),
            domain_version: env_string("SEQ_DOMAIN_VERSION", DEFAULT_DOMAIN_VERSION),
            domain_chain_id: env_u64("SEQ_DOMAIN_CHAIN_ID", DEFAULT_DOMAIN_CHAIN_ID),
            domain_verifying_contract: env_string(
                "SEQ_DOMAIN_VERIFYING_CONTRACT",
                DEFAULT_DOMAIN_VERIFYING_CONTRACT,
            ),
        })
    }

    fn build_domain(&self) -> Result<Eip712Domain, String> {
        let verifying_contract = parse_address(&self.domain_verifying_contract)?;
        Ok(Eip712Domain {
            name: Some(self.domain_name.clone().into()),
            version: Some(self.domain_version.clone().into()),
            chain_id: Some(U256::from(self.domain_chain_id)),
            verifying_contract: Some(verifying_contract),
            salt: None,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> Result<bool, String> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => match value.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => Err(format!("invalid {key}: {other}")),
        },
    }
}

fn parse_address(value: &str) -> Result<Address, String> {
    if !value.starts_with("0x") {
        return Err("address must be 0x-prefixed hex".to_string());
    }
    let bytes =
        alloy_primitives::hex::decode(value).map_err(|e| format!("invalid address hex: {e}"))?;
    if bytes.len() != 20 {
        return Err("address must be 20 bytes".to_string());
    }
    Ok(Address::from_slice(&bytes))
}
