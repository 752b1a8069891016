//! Reactive Layer
//!
//! The typed public surface over the dependency graph:
//!
//! - [`Atom`]: a mutable root value. Writing one propagates through the
//!   graph synchronously.
//! - [`Derivation`]: a lazily-memoized pure function of other derivables.
//!   Dependencies are captured dynamically each time the function runs.
//! - [`Reactor`]: an eager observer pinned to a single derivable source,
//!   notified once per genuine change while started.
//! - [`react`] / [`Subscription`]: declarative subscriptions with
//!   `from`/`when`/`until` conditions, `once`, and `skip_first`.
//!
//! Everything here is single-threaded; the graph lives in a thread-local
//! arena and handles are `!Send`.

mod atom;
mod derivation;
pub(crate) mod engine;
mod reactor;
mod scope;
mod subscribe;

pub use atom::Atom;
pub use derivation::Derivation;
pub use reactor::Reactor;
pub use subscribe::{react, Condition, ReactOptions, Subscription};

use crate::graph::NodeId;

/// Anything a derivation or reactor can read reactively.
///
/// Implemented by [`Atom`] and [`Derivation`]. `get` returns the current
/// value and, when called inside a running deriver, records the node as a
/// dependency of that deriver.
pub trait Derivable<T> {
    /// The graph node behind this handle.
    fn id(&self) -> NodeId;

    /// Current value, recorded as a dependency when captured.
    fn get(&self) -> T;
}
