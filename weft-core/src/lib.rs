//! Weft Core
//!
//! This crate provides an in-process incremental computation engine built
//! around three primitives:
//!
//! - Atoms: mutable root values
//! - Derivations: lazily-memoized pure functions of other values, with
//!   dependencies captured dynamically on every evaluation
//! - Reactors and subscriptions: eager observers notified once per
//!   genuine change
//!
//! Writes propagate synchronously and glitch-free: every observer sees a
//! consistent snapshot of the graph, derivations recompute at most once
//! per write, and unchanged results stop propagation early.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: the slot arena holding the dependency graph, node modes,
//!   and ids
//! - `reactive`: the typed handles (`Atom`, `Derivation`, `Reactor`), the
//!   propagation engine, and the subscription controller
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{react, Atom, Derivation, ReactOptions};
//!
//! let count = Atom::new(1);
//!
//! let doubled = {
//!     let count = count.clone();
//!     Derivation::new(move || count.get() * 2)
//! };
//!
//! let sub = react(
//!     &doubled,
//!     |v| println!("doubled: {v}"),
//!     ReactOptions::default(),
//! );
//! // Prints "doubled: 2" on activation.
//!
//! count.set(5);
//! // Prints "doubled: 10".
//! # drop(sub);
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::Error;
pub use graph::{Mode, NodeId};
pub use reactive::{react, Atom, Condition, Derivable, Derivation, ReactOptions, Reactor, Subscription};
