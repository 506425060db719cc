// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use ssz::{Decode, Encode};

use crate::path::Path;
use crate::runtime::{
    ExecutionContext, ExecutionError, Mint, RevertReason, Runtime, StateAccessError, Transfer,
    Withdrawal, method_id,
};
use crate::state_field::StateField;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy)]
pub struct WalletConfig {
    /// Allows anyone to credit balances through `Balances.mint`. Development only.
    pub mint_enabled: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self { mint_enabled: true }
    }
}

/// Reference runtime: balances, account nonces and an outgoing withdrawal log.
#[derive(Debug)]
pub struct WalletRuntime {
    config: WalletConfig,
    methods: Vec<(u32, &'static str)>,
}

impl WalletRuntime {
    pub const MINT: &'static str = "Balances.mint";
    pub const TRANSFER: &'static str = "Balances.transfer";
    pub const WITHDRAW: &'static str = "Withdrawals.withdraw";

    pub const BALANCES: StateField = StateField::map("Balances", "balances");
    pub const NONCES: StateField = StateField::map("AccountState", "nonces");
    pub const WITHDRAWALS: StateField = StateField::map("Withdrawals", "withdrawals");
    pub const WITHDRAWAL_COUNTER: StateField = StateField::value("Withdrawals", "counter");

    pub fn new(config: WalletConfig) -> Self {
        let methods = [Self::MINT, Self::TRANSFER, Self::WITHDRAW]
            .into_iter()
            .map(|name| (method_id(name), name))
            .collect();
        Self { config, methods }
    }

    pub fn balance_path(addr: Address) -> Path {
        Path::from_key(Self::BALANCES.base_path(), addr.as_slice())
    }

    pub fn nonce_path(addr: Address) -> Path {
        Path::from_key(Self::NONCES.base_path(), addr.as_slice())
    }

    pub fn withdrawal_path(index: u64) -> Path {
        Path::from_index(Self::WITHDRAWALS.base_path(), index)
    }

    pub fn withdrawal_counter_path() -> Path {
        Self::WITHDRAWAL_COUNTER.base_path()
    }

    async fn balance_of(
        ctx: &ExecutionContext<'_>,
        addr: Address,
    ) -> Result<U256, StateAccessError> {
        decode_u256(ctx.get(&Self::balance_path(addr)).await?)
    }

    async fn credit(
        ctx: &mut ExecutionContext<'_>,
        addr: Address,
        amount: U256,
    ) -> Result<(), ExecutionError> {
        let current = Self::balance_of(ctx, addr).await?;
        let next = current
            .checked_add(amount)
            .ok_or(RevertReason::BalanceOverflow)?;
        ctx.set(Self::balance_path(addr), Some(encode_u256(next)))
            .await?;
        Ok(())
    }

    async fn debit(
        ctx: &mut ExecutionContext<'_>,
        addr: Address,
        amount: U256,
    ) -> Result<(), ExecutionError> {
        let available = Self::balance_of(ctx, addr).await?;
        if available < amount {
            return Err(RevertReason::InsufficientBalance {
                required: amount,
                available,
            }
            .into());
        }
        ctx.set(Self::balance_path(addr), Some(encode_u256(available - amount)))
            .await?;
        Ok(())
    }

    async fn push_withdrawal(
        ctx: &mut ExecutionContext<'_>,
        withdrawal: &Withdrawal,
    ) -> Result<(), ExecutionError> {
        let counter_path = Self::withdrawal_counter_path();
        let counter = decode_u64(ctx.get(&counter_path).await?)?;
        ctx.set(
            Self::withdrawal_path(counter),
            Some(withdrawal.as_ssz_bytes().into()),
        )
        .await?;
        ctx.set(counter_path, Some(encode_u64(counter.saturating_add(1))))
            .await?;
        Ok(())
    }
}

impl Default for WalletRuntime {
    fn default() -> Self {
        Self::new(WalletConfig::default())
    }
}

#[async_trait]
impl Runtime for WalletRuntime {
    fn resolve_method(&self, method_id: u32) -> Option<&'static str> {
        self.methods
            .iter()
            .find(|(id, _)| *id == method_id)
            .map(|(_, name)| *name)
    }

    fn state_fields(&self) -> Vec<StateField> {
        vec![
            Self::BALANCES,
            Self::NONCES,
            Self::WITHDRAWALS,
            Self::WITHDRAWAL_COUNTER,
        ]
    }

    async fn execute(
        &self,
        tx: &Transaction,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), ExecutionError> {
        let method = self
            .resolve_method(tx.method_id())
            .ok_or(RevertReason::UnknownMethod {
                method_id: tx.method_id(),
            })?;

        let expected_nonce = decode_u64(ctx.get(&Self::nonce_path(tx.sender)).await?)?;
        if tx.nonce() != expected_nonce {
            return Err(RevertReason::InvalidNonce {
                expected: expected_nonce,
                got: tx.nonce(),
            }
            .into());
        }

        match method {
            Self::MINT => {
                if !self.config.mint_enabled {
                    return Err(RevertReason::MethodDisabled { method }.into());
                }
                let args: Mint = decode_args(method, &tx.call.args)?;
                Self::credit(ctx, args.to, args.amount).await?;
            }
            Self::TRANSFER => {
                let args: Transfer = decode_args(method, &tx.call.args)?;
                Self::debit(ctx, tx.sender, args.amount).await?;
                Self::credit(ctx, args.to, args.amount).await?;
            }
            Self::WITHDRAW => {
                let args: Withdrawal = decode_args(method, &tx.call.args)?;
                Self::debit(ctx, tx.sender, args.amount).await?;
                Self::push_withdrawal(ctx, &args).await?;
            }
            _ => {
                return Err(RevertReason::UnknownMethod {
                    method_id: tx.method_id(),
                }
                .into());
            }
        }

        ctx.set(
            Self::nonce_path(tx.sender),
            Some(encode_u64(expected_nonce.saturating_add(1))),
        )
        .await?;
        Ok(())
    }
}

fn decode_args<T: Decode>(method: &'static str, bytes: &[u8]) -> Result<T, RevertReason> {
    T::from_ssz_bytes(bytes).map_err(|_| RevertReason::MalformedArgs { method })
}

fn decode_u256(value: Option<Bytes>) -> Result<U256, StateAccessError> {
    match value {
        None => Ok(U256::ZERO),
        Some(bytes) => U256::try_from_be_slice(&bytes)
            .ok_or_else(|| StateAccessError::new("stored balance exceeds 32 bytes")),
    }
}

fn decode_u64(value: Option<Bytes>) -> Result<u64, StateAccessError> {
    match value {
        None => Ok(0),
        Some(bytes) => <[u8; 8]>::try_from(&bytes[..])
            .map(u64::from_be_bytes)
            .map_err(|_| StateAccessError::new("stored counter must be 8 bytes")),
    }
}

fn encode_u256(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}

fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use alloy_primitives::{Address, Bytes, U256};
    use async_trait::async_trait;
    use ssz::{Decode, Encode};

    use super::{WalletConfig, WalletRuntime};
    use crate::path::Path;
    use crate::runtime::{
        ExecutionContext, ExecutionError, Mint, RevertReason, Runtime, StateAccessError,
        StateReader, Transfer, Withdrawal, method_id,
    };
    use crate::transaction::{RuntimeCall, Transaction};

    #[derive(Default)]
    struct MapReader(HashMap<Path, Bytes>);

    #[async_trait]
    impl StateReader for MapReader {
        async fn read(&self, path: &Path) -> Result<Option<Bytes>, StateAccessError> {
            Ok(self.0.get(path).cloned())
        }
    }

    fn call(sender: Address, nonce: u64, method: &str, args: Vec<u8>) -> Transaction {
        Transaction {
            sender,
            call: RuntimeCall {
                nonce,
                method_id: method_id(method),
                args: args.into(),
            },
            signature: vec![0x01; 65].into(),
        }
    }

    fn balance_bytes(amount: u64) -> Bytes {
        Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec())
    }

    #[tokio::test]
    async fn transfer_moves_balance_and_bumps_nonce() {
        let runtime = WalletRuntime::default();
        let alice = Address::from_slice(&[0x11; 20]);
        let bob = Address::from_slice(&[0x22; 20]);
        let reader = MapReader(HashMap::from([(
            WalletRuntime::balance_path(alice),
            balance_bytes(100),
        )]));

        let tx = call(
            alice,
            0,
            WalletRuntime::TRANSFER,
            Transfer {
                to: bob,
                amount: U256::from(40_u64),
            }
            .as_ssz_bytes(),
        );
        let mut ctx = ExecutionContext::new(&reader);
        runtime.execute(&tx, &mut ctx).await.expect("transfer");

        assert_eq!(
            ctx.get(&WalletRuntime::balance_path(alice)).await.expect("read"),
            Some(balance_bytes(60))
        );
        assert_eq!(
            ctx.get(&WalletRuntime::balance_path(bob)).await.expect("read"),
            Some(balance_bytes(40))
        );
        assert_eq!(
            ctx.get(&WalletRuntime::nonce_path(alice)).await.expect("read"),
            Some(Bytes::copy_from_slice(&1_u64.to_be_bytes()))
        );
        assert_eq!(ctx.transitions().len(), 3);
    }

    #[tokio::test]
    async fn insufficient_balance_reverts_without_writes() {
        let runtime = WalletRuntime::default();
        let alice = Address::from_slice(&[0x11; 20]);
        let reader = MapReader::default();
        let tx = call(
            alice,
            0,
            WalletRuntime::TRANSFER,
            Transfer {
                to: Address::ZERO,
                amount: U256::from(1_u64),
            }
            .as_ssz_bytes(),
        );

        let mut ctx = ExecutionContext::new(&reader);
        let err = runtime.execute(&tx, &mut ctx).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::Reverted(RevertReason::InsufficientBalance { .. })
        ));
        assert!(ctx.transitions().is_empty());
    }

    #[tokio::test]
    async fn wrong_nonce_and_unknown_method_revert() {
        let runtime = WalletRuntime::default();
        let alice = Address::from_slice(&[0x11; 20]);
        let reader = MapReader::default();
        let mint = Mint {
            to: alice,
            amount: U256::from(5_u64),
        }
        .as_ssz_bytes();

        let mut ctx = ExecutionContext::new(&reader);
        let err = runtime
            .execute(&call(alice, 3, WalletRuntime::MINT, mint), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Reverted(RevertReason::InvalidNonce {
                expected: 0,
                got: 3
            })
        ));

        let err = runtime
            .execute(&call(alice, 0, "Balances.burn", Vec::new()), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Reverted(RevertReason::UnknownMethod { .. })
        ));
    }

    #[tokio::test]
    async fn mint_respects_config() {
        let runtime = WalletRuntime::new(WalletConfig {
            mint_enabled: false,
        });
        let alice = Address::from_slice(&[0x11; 20]);
        let reader = MapReader::default();
        let mint = Mint {
            to: alice,
            amount: U256::from(5_u64),
        }
        .as_ssz_bytes();

        let mut ctx = ExecutionContext::new(&reader);
        let err = runtime
            .execute(&call(alice, 0, WalletRuntime::MINT, mint), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Reverted(RevertReason::MethodDisabled { .. })
        ));
    }

    #[tokio::test]
    async fn withdraw_appends_to_indexed_log() {
        let runtime = WalletRuntime::default();
        let alice = Address::from_slice(&[0x11; 20]);
        let recipient = Address::from_slice(&[0x99; 20]);
        let reader = MapReader(HashMap::from([(
            WalletRuntime::balance_path(alice),
            balance_bytes(10),
        )]));
        let withdrawal = Withdrawal {
            recipient,
            amount: U256::from(4_u64),
        };

        let mut ctx = ExecutionContext::new(&reader);
        runtime
            .execute(
                &call(alice, 0, WalletRuntime::WITHDRAW, withdrawal.as_ssz_bytes()),
                &mut ctx,
            )
            .await
            .expect("withdraw");

        let stored = ctx
            .get(&WalletRuntime::withdrawal_path(0))
            .await
            .expect("read")
            .expect("withdrawal stored at index 0");
        assert_eq!(
            Withdrawal::from_ssz_bytes(&stored).expect("decode"),
            withdrawal
        );
        assert_eq!(
            ctx.get(&WalletRuntime::withdrawal_counter_path())
                .await
                .expect("read"),
            Some(Bytes::copy_from_slice(&1_u64.to_be_bytes()))
        );
    }
}
