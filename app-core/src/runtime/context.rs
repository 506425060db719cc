// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;

use alloy_primitives::Bytes;
use async_trait::async_trait;
use thiserror::Error;

use crate::path::Path;
use crate::state_transition::StateTransition;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("state unavailable: {reason}")]
pub struct StateAccessError {
    pub reason: String,
}

impl StateAccessError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait StateReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Option<Bytes>, StateAccessError>;
}

/// Per-transaction view over the staging state. Reads observe this transaction's
/// own earlier writes; every write is recorded as a state transition in order.
pub struct ExecutionContext<'a> {
    reader: &'a dyn StateReader,
    writes: HashMap<Path, Option<Bytes>>,
    transitions: Vec<StateTransition>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(reader: &'a dyn StateReader) -> Self {
        Self {
            reader,
            writes: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    pub async fn get(&self, path: &Path) -> Result<Option<Bytes>, StateAccessError> {
        if let Some(value) = self.writes.get(path) {
            return Ok(value.clone());
        }
        self.reader.read(path).await
    }

    pub async fn set(&mut self, path: Path, value: Option<Bytes>) -> Result<(), StateAccessError> {
        let from = self.get(&path).await?;
        self.writes.insert(path, value.clone());
        self.transitions.push(StateTransition {
            path,
            from,
            to: value,
        });
        Ok(())
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<StateTransition> {
        self.transitions
    }
}
