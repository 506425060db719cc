// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Read access to runtime state by field descriptor.

use alloy_primitives::Bytes;
use app_core::path::Path;
use app_core::runtime::Runtime;
use app_core::{FieldPathError, StateField};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{AsyncStateService, StateError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryView {
    /// Includes every produced block.
    #[default]
    Unproven,
    /// Only blocks covered by a proven batch.
    Proven,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown state field {module}.{field}")]
    UnknownField { module: String, field: String },
    #[error(transparent)]
    Path(#[from] FieldPathError),
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub field: StateField,
    pub path: Path,
    pub value: Option<Bytes>,
}

/// Fields a runtime declared at registration. Paths are derived from each
/// field's [`app_core::FieldKind`] tag.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    fields: Vec<StateField>,
}

impl QueryRegistry {
    pub fn from_runtime(runtime: &dyn Runtime) -> Self {
        Self {
            fields: runtime.state_fields(),
        }
    }

    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    pub fn field(&self, module: &str, field: &str) -> Result<StateField, QueryError> {
        self.fields
            .iter()
            .find(|candidate| candidate.module == module && candidate.name == field)
            .copied()
            .ok_or_else(|| QueryError::UnknownField {
                module: module.to_string(),
                field: field.to_string(),
            })
    }

    pub fn resolve(
        &self,
        module: &str,
        field: &str,
        key: Option<&[u8]>,
    ) -> Result<(StateField, Path), QueryError> {
        let descriptor = self.field(module, field)?;
        Ok((descriptor, descriptor.path(key)?))
    }

    pub async fn get(
        &self,
        state: &dyn AsyncStateService,
        module: &str,
        field: &str,
        key: Option<&[u8]>,
    ) -> Result<QueryResult, QueryError> {
        let (field, path) = self.resolve(module, field, key)?;
        let value = state.get_single_async(&path).await?;
        Ok(QueryResult { field, path, value })
    }
}
