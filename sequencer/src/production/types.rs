// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use super::{BatchError, ProducerError};
use crate::mempool::RejectionReason;
use crate::settlement::SettlementError;

#[derive(Debug, Error, Clone)]
pub enum SequencerError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    External(String),
}

impl SequencerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::External(message.into())
    }
}

impl From<RejectionReason> for SequencerError {
    fn from(value: RejectionReason) -> Self {
        Self::invalid(value.to_string())
    }
}

impl From<ProducerError> for SequencerError {
    fn from(value: ProducerError) -> Self {
        Self::internal(error_chain(&value))
    }
}

impl From<BatchError> for SequencerError {
    fn from(value: BatchError) -> Self {
        if value.is_retryable() {
            Self::external(error_chain(&value))
        } else {
            Self::internal(error_chain(&value))
        }
    }
}

impl From<SettlementError> for SequencerError {
    fn from(value: SettlementError) -> Self {
        if value.is_external() {
            Self::external(error_chain(&value))
        } else {
            Self::internal(error_chain(&value))
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Holds a producer's in-flight flag until dropped.
pub(crate) struct ProductionGuard<'a>(&'a AtomicBool);

impl<'a> ProductionGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProductionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::{ProductionGuard, SequencerError};
    use crate::mempool::RejectionReason;

    #[test]
    fn guard_is_exclusive_until_dropped() {
        let flag = AtomicBool::new(false);
        let guard = ProductionGuard::acquire(&flag).expect("first acquire");
        assert!(ProductionGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(ProductionGuard::acquire(&flag).is_some());
    }

    #[test]
    fn rejection_maps_to_invalid() {
        let err = SequencerError::from(RejectionReason::EmptySignature);
        assert!(matches!(err, SequencerError::Invalid(message) if message.contains("signature")));
    }
}
