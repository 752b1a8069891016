//! Error types for graph mutation.
//!
//! Most misuse of the graph is unrepresentable at the type level; the
//! remaining runtime failures are all mutation-ordering problems and are
//! reported through [`Error`]. Reads never fail, so derivers and reactor
//! callbacks stay infallible.

use thiserror::Error;

use crate::graph::NodeId;

/// A rejected graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A cell was written while a deriver was being captured. Derivers
    /// must be pure; move the write into a reactor callback.
    #[error("cannot mutate a cell while a derivation is being captured")]
    MutationInDeriver,

    /// A cell was written from a callback that is itself reacting to a
    /// change of that cell. Writes to unrelated cells are allowed and
    /// nest a fresh propagation.
    #[error("cell {node} was mutated from a callback reacting to it")]
    ReentrantMutation {
        /// The cell whose propagation was still in flight.
        node: NodeId,
    },

    /// A deriver read its own derivation, directly or through other
    /// derivations currently on the evaluation stack.
    #[error("derivation {node} reads itself (dependency cycle)")]
    DependencyCycle {
        /// The derivation that closed the cycle.
        node: NodeId,
    },
}
