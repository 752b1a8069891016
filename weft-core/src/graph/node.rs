//! Node identity and evaluation modes.
//!
//! Every reactive value in the graph is addressed by a [`NodeId`], a stable
//! index into a growable slot arena. Storing edges as sets of integer handles
//! (rather than direct references) avoids the ownership cycles that
//! bidirectional parent/child links would otherwise create.

use std::fmt;

/// Stable handle for a node in the dependency graph.
///
/// Handles are plain indices into the arena's slot table. A handle stays
/// valid for as long as the node it names is alive; slots are only reused
/// after the node has been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Get the raw index value, mainly useful for logging.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Evaluation state of a node.
///
/// The state machine drives both memoization and invalidation:
///
/// - A derivation is born [`New`](Mode::New) with no parents known; its
///   first `get()` evaluates it and lands on [`Changed`](Mode::Changed).
/// - A leaf-cell write marks descendants [`Unstable`](Mode::Unstable).
///   Pulling an unstable node settles it to [`Unchanged`](Mode::Unchanged)
///   (every parent held its value, cache returned unevaluated) or
///   [`Changed`](Mode::Changed) (some parent changed, recomputed).
/// - After a propagation pass, everything that was resolved returns to
///   [`Stable`](Mode::Stable); marked nodes nothing pulled are detached into
///   [`Disowned`](Mode::Disowned), keeping their parent list only as
///   untrusted snapshots.
/// - Stopping the last reactor observing a derivation moves it to
///   [`Orphaned`](Mode::Orphaned).
/// - A panicking deriver resets its node to [`New`](Mode::New).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Never evaluated; no trustworthy parent state exists.
    New,

    /// An ancestor changed; staleness has not been resolved yet.
    Unstable,

    /// Up to date; untouched by the latest propagation.
    Stable,

    /// Resolved during the current propagation; the recomputed or
    /// revalidated value equals the previous one.
    Unchanged,

    /// Resolved during the current propagation with a genuinely new value.
    Changed,

    /// Lost its last observer; edges are intact but untrusted.
    Orphaned,

    /// Detached during a sweep; parent edges severed, parents retained as
    /// `(parent, last observed value)` snapshots for polling revalidation.
    Disowned,
}

impl Mode {
    /// Whether the cached value may be returned without revalidation.
    pub fn cache_valid(self) -> bool {
        matches!(self, Mode::Stable | Mode::Unchanged | Mode::Changed)
    }
}
