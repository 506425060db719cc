// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;

use alloy_primitives::B256;
use app_core::path::Path;
use app_core::runtime::{Runtime, Withdrawal, method_id};
use async_trait::async_trait;
use serde::Serialize;
use ssz::Decode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::{SettlementSubmitted, SettlementSubscriber};
use crate::block::{TransactionExecutionResult, UnprovenBlock};
use crate::production::BlockSubscriber;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage<T> {
    pub index: u64,
    pub value: T,
}

#[derive(Debug, Clone)]
pub struct WithdrawalQueueConfig {
    /// Qualified `Module.method` of the withdrawal method.
    pub withdrawal_method: String,
    /// Qualified `Module.property` of the map holding withdrawals by log index.
    pub withdrawal_state_path: String,
    /// Qualified `Module.property` of the runtime's withdrawal log counter
    /// (8-byte big-endian, absent means 0).
    pub withdrawal_counter_path: String,
}

impl Default for WithdrawalQueueConfig {
    fn default() -> Self {
        Self {
            withdrawal_method: "Withdrawals.withdraw".to_string(),
            withdrawal_state_path: "Withdrawals.withdrawals".to_string(),
            withdrawal_counter_path: "Withdrawals.counter".to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutgoingMessageError {
    #[error("runtime does not expose withdrawal method {0}")]
    UnknownWithdrawalMethod(String),
    #[error("invalid withdrawal state path {0}")]
    InvalidStatePath(String),
    #[error("block {height} tx {tx} does not advance the withdrawal counter")]
    MissingLogIndex { height: u64, tx: B256 },
    #[error("block {height} tx {tx} has a malformed withdrawal counter")]
    MalformedLogIndex { height: u64, tx: B256 },
    #[error("block {height} tx {tx} has no withdrawal write at log index {log_index}")]
    MissingWithdrawal { height: u64, tx: B256, log_index: u64 },
    #[error("block {height} tx {tx} has an undecodable withdrawal at log index {log_index}")]
    MalformedWithdrawal { height: u64, tx: B256, log_index: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnlockOutcome {
    pub released: usize,
    pub quarantined: usize,
}

#[derive(Debug, Default)]
struct Queues {
    locked: Vec<Arc<UnprovenBlock>>,
    unlocked: Vec<OutgoingMessage<Withdrawal>>,
    quarantined: Vec<Arc<UnprovenBlock>>,
    next_index: u64,
}

/// Withdrawals waiting for settlement. Produced blocks are held locked until a
/// batch covering them settles; their successful withdrawals are then
/// released in order with consecutive indices.
///
/// The runtime stores each withdrawal under its own log index, read back from
/// the counter transition of the same transaction. The message index handed to
/// the settlement layer is separate and continues from `start_index`.
pub struct WithdrawalQueue {
    method_id: u32,
    state_path: Path,
    counter_path: Path,
    queues: Mutex<Queues>,
}

impl WithdrawalQueue {
    /// `start_index` seeds the message index counter, normally from the
    /// settlement layer's outgoing message cursor.
    pub fn new(
        config: &WithdrawalQueueConfig,
        runtime: &dyn Runtime,
        start_index: u64,
    ) -> Result<Self, OutgoingMessageError> {
        let method_id = method_id(&config.withdrawal_method);
        if runtime.resolve_method(method_id) != Some(config.withdrawal_method.as_str()) {
            return Err(OutgoingMessageError::UnknownWithdrawalMethod(
                config.withdrawal_method.clone(),
            ));
        }
        let parse = |dotted: &String| {
            Path::from_dotted(dotted)
                .ok_or_else(|| OutgoingMessageError::InvalidStatePath(dotted.clone()))
        };

        Ok(Self {
            method_id,
            state_path: parse(&config.withdrawal_state_path)?,
            counter_path: parse(&config.withdrawal_counter_path)?,
            queues: Mutex::new(Queues {
                next_index: start_index,
                ..Queues::default()
            }),
        })
    }

    pub async fn peek(&self, count: usize) -> Vec<OutgoingMessage<Withdrawal>> {
        let queues = self.queues.lock().await;
        queues.unlocked.iter().take(count).cloned().collect()
    }

    pub async fn pop(&self, count: usize) -> Vec<OutgoingMessage<Withdrawal>> {
        let mut queues = self.queues.lock().await;
        let count = count.min(queues.unlocked.len());
        queues.unlocked.drain(..count).collect()
    }

    pub async fn length(&self) -> usize {
        self.queues.lock().await.unlocked.len()
    }

    pub async fn locked_blocks(&self) -> usize {
        self.queues.lock().await.locked.len()
    }

    /// Settled blocks whose withdrawals could not be extracted. They are kept
    /// for inspection and never enumerated again.
    pub async fn quarantined_blocks(&self) -> Vec<Arc<UnprovenBlock>> {
        self.queues.lock().await.quarantined.clone()
    }

    pub async fn next_index(&self) -> u64 {
        self.queues.lock().await.next_index
    }

    pub async fn lock_block(&self, block: Arc<UnprovenBlock>) {
        self.queues.lock().await.locked.push(block);
    }

    /// Releases withdrawals of every locked block up to `settled_height`, in
    /// block then transaction order. A block whose withdrawals cannot be
    /// extracted is quarantined without consuming message indices; the blocks
    /// after it are still released.
    pub async fn unlock_settled(&self, settled_height: u64) -> UnlockOutcome {
        let mut queues = self.queues.lock().await;
        let settled = queues
            .locked
            .iter()
            .take_while(|block| block.height <= settled_height)
            .count();
        let blocks: Vec<_> = queues.locked.drain(..settled).collect();

        let mut outcome = UnlockOutcome::default();
        for block in blocks {
            match self.extract(&block) {
                Ok(withdrawals) => {
                    outcome.released += withdrawals.len();
                    for value in withdrawals {
                        let index = queues.next_index;
                        queues.unlocked.push(OutgoingMessage { index, value });
                        queues.next_index += 1;
                    }
                }
                Err(err) => {
                    error!(height = block.height, error = %err, "withdrawals quarantined");
                    outcome.quarantined += 1;
                    queues.quarantined.push(block);
                }
            }
        }
        outcome
    }

    fn extract(&self, block: &UnprovenBlock) -> Result<Vec<Withdrawal>, OutgoingMessageError> {
        block
            .transactions
            .iter()
            .filter(|result| result.status && result.tx.method_id() == self.method_id)
            .map(|result| self.extract_one(block.height, result))
            .collect()
    }

    fn extract_one(
        &self,
        height: u64,
        result: &TransactionExecutionResult,
    ) -> Result<Withdrawal, OutgoingMessageError> {
        let tx = result.tx.hash();
        let last_write = |path: Path| {
            result
                .state_transitions
                .iter()
                .rev()
                .find(|transition| transition.path == path)
        };

        let counter = last_write(self.counter_path)
            .ok_or(OutgoingMessageError::MissingLogIndex { height, tx })?;
        let log_index = match counter.from.as_ref() {
            None => 0,
            Some(bytes) => <[u8; 8]>::try_from(&bytes[..])
                .map(u64::from_be_bytes)
                .map_err(|_| OutgoingMessageError::MalformedLogIndex { height, tx })?,
        };

        let bytes = last_write(Path::from_index(self.state_path, log_index))
            .and_then(|transition| transition.to.as_ref())
            .ok_or(OutgoingMessageError::MissingWithdrawal {
                height,
                tx,
                log_index,
            })?;
        Withdrawal::from_ssz_bytes(bytes).map_err(|_| OutgoingMessageError::MalformedWithdrawal {
            height,
            tx,
            log_index,
        })
    }
}

#[async_trait]
impl BlockSubscriber for WithdrawalQueue {
    async fn on_block_produced(&self, block: &Arc<UnprovenBlock>) {
        self.lock_block(Arc::clone(block)).await;
    }
}

#[async_trait]
impl SettlementSubscriber for WithdrawalQueue {
    async fn on_settlement_submitted(&self, event: &SettlementSubmitted) {
        let settled_height = event.receipt.last_block_height;
        let outcome = self.unlock_settled(settled_height).await;
        info!(
            batch = event.batch.height,
            settled_height,
            released = outcome.released,
            quarantined = outcome.quarantined,
            "withdrawals unlocked"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{Address, B256, Bytes, U256};
    use app_core::runtime::{WalletConfig, WalletRuntime, Withdrawal, method_id};
    use app_core::{RuntimeCall, StateTransition, Transaction};
    use ssz::Encode;

    use super::{OutgoingMessageError, UnlockOutcome, WithdrawalQueue, WithdrawalQueueConfig};
    use crate::block::{TransactionExecutionResult, UnprovenBlock};

    fn queue(start_index: u64) -> WithdrawalQueue {
        WithdrawalQueue::new(
            &WithdrawalQueueConfig::default(),
            &WalletRuntime::new(WalletConfig::default()),
            start_index,
        )
        .expect("queue")
    }

    fn withdrawal(amount: u64) -> Withdrawal {
        Withdrawal {
            recipient: Address::repeat_byte(9),
            amount: U256::from(amount),
        }
    }

    fn withdraw_tx(nonce: u64, amount: u64) -> Transaction {
        Transaction {
            sender: Address::repeat_byte(1),
            call: RuntimeCall {
                nonce,
                method_id: method_id(WalletRuntime::WITHDRAW),
                args: Bytes::from(withdrawal(amount).as_ssz_bytes()),
            },
            signature: Bytes::from(vec![1; 65]),
        }
    }

    fn counter_bytes(value: u64) -> Bytes {
        Bytes::copy_from_slice(&value.to_be_bytes())
    }

    /// Transitions as the wallet runtime writes them for log slot `log_index`.
    fn withdraw_result(nonce: u64, log_index: u64, amount: u64) -> TransactionExecutionResult {
        TransactionExecutionResult::success(
            withdraw_tx(nonce, amount),
            vec![
                StateTransition {
                    path: WalletRuntime::withdrawal_path(log_index),
                    from: None,
                    to: Some(Bytes::from(withdrawal(amount).as_ssz_bytes())),
                },
                StateTransition {
                    path: WalletRuntime::withdrawal_counter_path(),
                    from: (log_index > 0).then(|| counter_bytes(log_index)),
                    to: Some(counter_bytes(log_index + 1)),
                },
            ],
        )
    }

    fn failed_withdraw(nonce: u64) -> TransactionExecutionResult {
        TransactionExecutionResult::failure(withdraw_tx(nonce, 500), "insufficient balance")
    }

    fn block(height: u64, results: Vec<TransactionExecutionResult>) -> Arc<UnprovenBlock> {
        Arc::new(UnprovenBlock::new(height, results, B256::ZERO))
    }

    #[tokio::test]
    async fn withdrawals_stay_locked_until_settled() {
        let queue = queue(0);
        queue.lock_block(block(0, vec![withdraw_result(0, 0, 5)])).await;
        assert_eq!(queue.length().await, 0);

        let outcome = queue.unlock_settled(0).await;
        assert_eq!(
            outcome,
            UnlockOutcome {
                released: 1,
                quarantined: 0
            }
        );
        assert_eq!(queue.locked_blocks().await, 0);
        let pending = queue.peek(10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].index, 0);
        assert_eq!(pending[0].value, withdrawal(5));
    }

    #[tokio::test]
    async fn consecutive_indices_skip_failed_withdrawals() {
        let queue = queue(0);
        queue
            .lock_block(block(
                0,
                vec![
                    withdraw_result(0, 0, 5),
                    failed_withdraw(1),
                    withdraw_result(1, 1, 6),
                ],
            ))
            .await;
        queue.unlock_settled(0).await;

        let popped = queue.pop(5).await;
        assert_eq!(
            popped.iter().map(|message| message.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(popped[1].value, withdrawal(6));
        assert_eq!(queue.length().await, 0);
    }

    #[tokio::test]
    async fn only_settled_heights_unlock() {
        let queue = queue(0);
        queue.lock_block(block(0, vec![withdraw_result(0, 0, 1)])).await;
        queue.lock_block(block(1, vec![withdraw_result(1, 1, 2)])).await;

        assert_eq!(queue.unlock_settled(0).await.released, 1);
        assert_eq!(queue.locked_blocks().await, 1);
        assert_eq!(queue.unlock_settled(1).await.released, 1);
        assert_eq!(queue.pop(1).await[0].index, 0);
        assert_eq!(queue.peek(1).await[0].index, 1);
    }

    #[tokio::test]
    async fn message_indices_continue_from_cursor_while_log_starts_at_zero() {
        let queue = queue(7);
        queue.lock_block(block(0, vec![withdraw_result(0, 0, 1)])).await;
        queue.lock_block(block(1, vec![withdraw_result(1, 1, 2)])).await;

        assert_eq!(queue.unlock_settled(1).await.released, 2);
        let pending = queue.peek(5).await;
        assert_eq!(
            pending.iter().map(|message| message.index).collect::<Vec<_>>(),
            vec![7, 8]
        );
        assert_eq!(pending[1].value, withdrawal(2));
        assert_eq!(queue.next_index().await, 9);
    }

    #[tokio::test]
    async fn broken_block_is_quarantined_without_blocking_later_ones() {
        let queue = queue(3);
        let mut broken = withdraw_result(0, 0, 1);
        broken.state_transitions.remove(0);
        queue.lock_block(block(0, vec![broken])).await;
        queue.lock_block(block(1, vec![withdraw_result(1, 1, 4)])).await;

        let outcome = queue.unlock_settled(1).await;

        assert_eq!(
            outcome,
            UnlockOutcome {
                released: 1,
                quarantined: 1
            }
        );
        assert_eq!(queue.locked_blocks().await, 0);
        let quarantined = queue.quarantined_blocks().await;
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].height, 0);
        let pending = queue.peek(5).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].index, 3);
        assert_eq!(pending[0].value, withdrawal(4));
        assert_eq!(queue.next_index().await, 4);
    }

    #[tokio::test]
    async fn withdrawal_without_counter_write_is_quarantined() {
        let queue = queue(0);
        let mut result = withdraw_result(0, 0, 1);
        result.state_transitions.pop();
        let broken = block(0, vec![result]);

        assert_eq!(
            queue.extract(&broken),
            Err(OutgoingMessageError::MissingLogIndex {
                height: 0,
                tx: broken.transactions[0].tx.hash(),
            })
        );
        queue.lock_block(broken).await;
        assert_eq!(queue.unlock_settled(0).await.quarantined, 1);
        assert_eq!(queue.length().await, 0);
    }

    #[test]
    fn rejects_unknown_method() {
        let config = WithdrawalQueueConfig {
            withdrawal_method: "Bridge.exit".to_string(),
            ..WithdrawalQueueConfig::default()
        };
        let err = WithdrawalQueue::new(&config, &WalletRuntime::new(WalletConfig::default()), 0)
            .err()
            .expect("unknown method");
        assert_eq!(
            err,
            OutgoingMessageError::UnknownWithdrawalMethod("Bridge.exit".to_string())
        );
    }
}
