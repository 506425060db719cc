// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Mutex;

use alloy_primitives::{Address, B256};
use app_core::Transaction;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("transaction signature is empty")]
    EmptySignature,
    #[error("transaction {hash} is already pending")]
    Duplicate { hash: B256 },
}

/// Order in which a drained snapshot is handed to block production.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MempoolOrdering {
    /// Admission order.
    #[default]
    Fifo,
    /// Admission order of senders, with each sender's transactions sorted by
    /// nonce inside the slots that sender occupies.
    SenderNonce,
}

impl FromStr for MempoolOrdering {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fifo" => Ok(Self::Fifo),
            "sender_nonce" => Ok(Self::SenderNonce),
            other => Err(format!("unknown mempool ordering: {other}")),
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    txs: VecDeque<Transaction>,
    hashes: HashSet<B256>,
}

impl Pending {
    fn push_back(&mut self, tx: Transaction, hash: B256) {
        self.hashes.insert(hash);
        self.txs.push_back(tx);
    }
}

/// Pending signed transactions. Admission only checks the envelope; nonce and
/// balance rules are left to execution.
#[derive(Debug, Default)]
pub struct Mempool {
    ordering: MempoolOrdering,
    pending: Mutex<Pending>,
}

impl Mempool {
    pub fn new(ordering: MempoolOrdering) -> Self {
        Self {
            ordering,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn add(&self, tx: Transaction) -> Result<B256, RejectionReason> {
        if tx.signature.is_empty() {
            return Err(RejectionReason::EmptySignature);
        }
        let hash = tx.hash();
        let mut pending = self.pending.lock().expect("mempool mutex poisoned");
        if pending.hashes.contains(&hash) {
            return Err(RejectionReason::Duplicate { hash });
        }
        debug!(%hash, sender = %tx.sender, nonce = tx.nonce(), "transaction admitted");
        pending.push_back(tx, hash);
        Ok(hash)
    }

    /// Pending transactions in production order, without removing them.
    pub fn get_txs(&self) -> Vec<Transaction> {
        let pending = self.pending.lock().expect("mempool mutex poisoned");
        self.order(pending.txs.iter().cloned().collect())
    }

    /// Removes and returns every pending transaction in one step. Transactions
    /// added afterwards land in the next snapshot.
    pub fn drain(&self) -> Vec<Transaction> {
        let mut pending = self.pending.lock().expect("mempool mutex poisoned");
        pending.hashes.clear();
        let txs = pending.txs.drain(..).collect();
        drop(pending);
        self.order(txs)
    }

    /// Puts an aborted snapshot back ahead of anything admitted since.
    pub fn requeue_front(&self, txs: Vec<Transaction>) {
        let mut pending = self.pending.lock().expect("mempool mutex poisoned");
        let newer: Vec<Transaction> = pending.txs.drain(..).collect();
        let newer_hashes = std::mem::take(&mut pending.hashes);

        for tx in txs {
            let hash = tx.hash();
            if newer_hashes.contains(&hash) || pending.hashes.contains(&hash) {
                warn!(%hash, "dropping requeued duplicate");
                continue;
            }
            pending.push_back(tx, hash);
        }
        for tx in newer {
            let hash = tx.hash();
            pending.push_back(tx, hash);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("mempool mutex poisoned").txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn order(&self, txs: Vec<Transaction>) -> Vec<Transaction> {
        match self.ordering {
            MempoolOrdering::Fifo => txs,
            MempoolOrdering::SenderNonce => order_by_sender_nonce(txs),
        }
    }
}

fn order_by_sender_nonce(txs: Vec<Transaction>) -> Vec<Transaction> {
    let mut by_sender: HashMap<Address, Vec<Transaction>> = HashMap::new();
    let slots: Vec<Address> = txs.iter().map(|tx| tx.sender).collect();
    for tx in txs {
        by_sender.entry(tx.sender).or_default().push(tx);
    }
    for queue in by_sender.values_mut() {
        // Reverse so `pop` yields the lowest nonce first.
        queue.sort_by_key(|tx| std::cmp::Reverse(tx.nonce()));
    }
    slots
        .into_iter()
        .filter_map(|sender| by_sender.get_mut(&sender).and_then(Vec::pop))
        .collect()
}
