// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use serde::Serialize;
use thiserror::Error;

use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Value,
    Map,
}

/// A runtime state field exposed for queries, declared by the runtime when it is
/// registered with the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateField {
    pub module: &'static str,
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldPathError {
    #[error("{module}.{name} is a single value and takes no key")]
    UnexpectedKey {
        module: &'static str,
        name: &'static str,
    },
    #[error("{module}.{name} is a map and requires a key")]
    MissingKey {
        module: &'static str,
        name: &'static str,
    },
}

impl StateField {
    pub const fn value(module: &'static str, name: &'static str) -> Self {
        Self {
            module,
            name,
            kind: FieldKind::Value,
        }
    }

    pub const fn map(module: &'static str, name: &'static str) -> Self {
        Self {
            module,
            name,
            kind: FieldKind::Map,
        }
    }

    pub fn base_path(&self) -> Path {
        Path::from_property(self.module, self.name)
    }

    pub fn path(&self, key: Option<&[u8]>) -> Result<Path, FieldPathError> {
        match (self.kind, key) {
            (FieldKind::Value, None) => Ok(self.base_path()),
            (FieldKind::Map, Some(key)) => Ok(Path::from_key(self.base_path(), key)),
            (FieldKind::Value, Some(_)) => Err(FieldPathError::UnexpectedKey {
                module: self.module,
                name: self.name,
            }),
            (FieldKind::Map, None) => Err(FieldPathError::MissingKey {
                module: self.module,
                name: self.name,
            }),
        }
    }
}
