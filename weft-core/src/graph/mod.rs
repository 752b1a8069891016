//! Dependency Graph
//!
//! This module implements the storage layer of the dependency graph: node
//! identity, evaluation modes, and the slot arena holding every node's
//! parent/child edge sets.
//!
//! # Design Decisions
//!
//! 1. Nodes are addressed by stable integer handles into a growable arena
//!    rather than linked by references. The graph needs bidirectional edges
//!    (parents for pull-based resolution, children for push-based marking),
//!    and index handles make those edges cycle-free and cheap to diff.
//!
//! 2. Edge sets are insertion-ordered (`indexmap`): parents are resolved in
//!    capture order and reactors fire in attachment order.
//!
//! 3. The arena stores values type-erased; the typed surface lives in
//!    `reactive`.
//!
//! The evaluation state machine that drives nodes through their modes lives
//! in [`crate::reactive`].

pub(crate) mod arena;
mod node;

pub use node::{Mode, NodeId};
