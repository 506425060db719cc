// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Runtime-side types shared by the sequencer and its clients.
//!
//! A transaction is a signed call into a runtime method. Executing it yields an
//! ordered list of state transitions over 32-byte paths; the sequencer commits
//! those paths into a Merkle tree.
pub mod path;
pub mod runtime;
pub mod state_field;
pub mod state_transition;
pub mod transaction;

pub use path::Path;
pub use state_field::{FieldKind, FieldPathError, StateField};
pub use state_transition::{StateTransition, value_commitment};
pub use transaction::{RuntimeCall, Transaction};
