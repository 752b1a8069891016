//! Reactive Engine
//!
//! The engine is the central coordinator that connects cells, derivations,
//! and reactors. It owns every graph transition: the per-node evaluation
//! state machine, dependency-edge diffing after each recomputation, the
//! mark/react/sweep propagation pass behind a cell write, and reactor
//! start/stop/force.
//!
//! # How It Works
//!
//! 1. Reading a node through a typed handle records it into the open
//!    capture scope and then *pulls* it: the mode dispatch below decides
//!    whether the cache can be returned, staleness must be resolved by
//!    walking parents, or the deriver must run.
//!
//! 2. Writing a cell marks descendant derivations `Unstable`, collects the
//!    active reactors reachable below the cell, forces each of them (which
//!    pulls their sources and notifies on genuine change), and finally
//!    sweeps: resolved nodes settle back to `Stable`, marked nodes nothing
//!    pulled are disowned.
//!
//! 3. A disowned node severed its child edges, so later writes never visit
//!    it; when it is eventually read it polls its stored parent snapshots to
//!    decide whether its cache survived the missed notifications.
//!
//! Everything here is synchronous and single-threaded; one full propagation
//! pass runs to completion inside the caller's invocation.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::Error;
use crate::graph::arena::{self, DeriverFn, EqualsFn, HookFn, Node, NodeKind, ReactFn, Value};
use crate::graph::{Mode, NodeId};

use super::scope::{self, CaptureScope};

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

/// Default comparator for a node holding values of type `T`.
pub(crate) fn equals_for<T: PartialEq + 'static>() -> EqualsFn {
    Rc::new(|a, b| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => a == b,
            // A node only ever compares values of its own type.
            _ => false,
        }
    })
}

/// Wrap a user comparator over `T` into the type-erased form.
pub(crate) fn equals_from<T: 'static>(eq: impl Fn(&T, &T) -> bool + 'static) -> EqualsFn {
    Rc::new(move |a, b| match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => eq(a, b),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Node construction and handle accounting
// ---------------------------------------------------------------------------

pub(crate) fn new_cell(value: Value, equals: EqualsFn) -> NodeId {
    arena::with(|a| a.insert(Node::new(NodeKind::Cell { value }, equals, Mode::Stable)))
}

pub(crate) fn new_derivation(deriver: DeriverFn, equals: EqualsFn) -> NodeId {
    arena::with(|a| {
        a.insert(Node::new(
            NodeKind::Derivation {
                deriver,
                state: None,
            },
            equals,
            Mode::New,
        ))
    })
}

pub(crate) fn new_reactor(
    source: NodeId,
    react: ReactFn,
    on_start: Option<HookFn>,
    on_stop: Option<HookFn>,
) -> NodeId {
    arena::with(|a| {
        a.insert(Node::new(
            NodeKind::Reactor {
                source,
                react,
                active: false,
                primed: false,
                on_start,
                on_stop,
            },
            // Reactors hold no value; the comparator is never consulted.
            Rc::new(|_, _| false),
            Mode::Stable,
        ))
    })
}

/// Account for a cloned application handle.
pub(crate) fn retain_handle(id: NodeId) {
    arena::with(|a| a.node_mut(id).handles += 1);
}

/// Account for a dropped application handle, reclaiming the slot (and any
/// parents it was keeping alive) once nothing references it.
pub(crate) fn release_handle(id: NodeId) {
    // `try_with`: handle drops can run inside the arena's own thread-local
    // destructor (a node's closure captured a handle); the slots are being
    // torn down wholesale then, so there is nothing left to release.
    let graveyard = arena::try_with(|a| {
        let mut graveyard = Vec::new();
        if a.contains(id) {
            a.node_mut(id).handles -= 1;
            reclaim(a, id, &mut graveyard);
        }
        graveyard
    })
    .unwrap_or_default();
    // Dropping removed nodes here, outside the arena borrow, lets their
    // derivers release the handles they captured without re-entrancy.
    drop(graveyard);
}

/// Free `id` if no handle and no child edge keeps it alive, then try its
/// parents, which may have been waiting on this child edge.
fn reclaim(a: &mut arena::Arena, id: NodeId, graveyard: &mut Vec<Node>) {
    if !a.contains(id) {
        return;
    }
    {
        let node = a.node(id);
        if node.handles > 0 || !node.children.is_empty() {
            return;
        }
        if let NodeKind::Reactor { active: true, .. } = node.kind {
            return;
        }
    }

    let node = a.remove(id);
    trace!(node = id.raw(), "reclaimed");
    let parent_ids: Vec<NodeId> = node.parents.keys().copied().collect();
    graveyard.push(node);

    for parent in parent_ids {
        if a.contains(parent) {
            a.node_mut(parent).children.shift_remove(&id);
            reclaim(a, parent, graveyard);
        }
    }
}

// ---------------------------------------------------------------------------
// Introspection helpers
// ---------------------------------------------------------------------------

pub(crate) fn mode_of(id: NodeId) -> Mode {
    arena::with(|a| a.node(id).mode)
}

pub(crate) fn reactor_active(id: NodeId) -> bool {
    arena::with(|a| {
        a.contains(id)
            && matches!(a.node(id).kind, NodeKind::Reactor { active: true, .. })
    })
}

/// Current value of an already-evaluated node, straight from the slot.
fn current_state_of(a: &arena::Arena, id: NodeId) -> Value {
    match &a.node(id).kind {
        NodeKind::Cell { value } => value.clone(),
        NodeKind::Derivation { state, .. } => state
            .clone()
            .expect("a captured or validated node has been evaluated"),
        NodeKind::Reactor { .. } => unreachable!("reactors hold no value"),
    }
}

// ---------------------------------------------------------------------------
// Pull-based evaluation: the mode state machine
// ---------------------------------------------------------------------------

/// A read through a public handle: capture, then pull.
pub(crate) fn read(id: NodeId) -> Value {
    scope::record(id);
    pull(id)
}

/// Resolve `id` to a trustworthy value, recomputing as little as possible.
pub(crate) fn pull(id: NodeId) -> Value {
    match mode_of(id) {
        // No trustworthy cached parent state exists.
        Mode::New | Mode::Orphaned => force_get(id),
        Mode::Unstable => settle_unstable(id),
        Mode::Disowned => settle_disowned(id),
        Mode::Stable | Mode::Unchanged | Mode::Changed => cached(id),
    }
}

fn cached(id: NodeId) -> Value {
    arena::with(|a| {
        debug_assert!(a.node(id).mode.cache_valid());
        current_state_of(a, id)
    })
}

/// Walk parents in capture order. If every parent held its value the cache
/// is revalidated without running the deriver; the first parent that ends
/// `Changed` forces a recomputation instead. This short-circuit bounds
/// recomputation to exactly the subgraph whose values actually changed.
fn settle_unstable(id: NodeId) -> Value {
    let parents: Vec<NodeId> = arena::with(|a| a.node(id).parents.keys().copied().collect());

    for parent in parents {
        if !mode_of(parent).cache_valid() {
            pull(parent);
        }
        match mode_of(parent) {
            Mode::Stable | Mode::Unchanged => {}
            Mode::Changed => return force_get(id),
            settled => panic!(
                "dependency graph corrupted: parent {parent} of {id} settled in mode {settled:?}"
            ),
        }
    }

    arena::with(|a| a.node_mut(id).mode = Mode::Unchanged);
    cached(id)
}

/// Polling-based staleness check for a node that missed push notifications
/// while detached: compare every stored `(parent, last observed value)`
/// snapshot against the parent's current value.
fn settle_disowned(id: NodeId) -> Value {
    let observed: Vec<(NodeId, Value)> = arena::with(|a| {
        a.node(id)
            .parents
            .iter()
            .map(|(parent, seen)| (*parent, seen.clone()))
            .collect()
    });

    for (parent, seen) in observed {
        let current = pull(parent);
        let equals = arena::with(|a| a.node(parent).equals.clone());
        if !equals(&*current, &*seen) {
            return force_get(id);
        }
    }

    // Every snapshot held: relink child edges and trust the cache again.
    arena::with(|a| {
        let parent_ids: Vec<NodeId> = a.node(id).parents.keys().copied().collect();
        for parent in parent_ids {
            a.node_mut(parent).children.insert(id);
        }
        a.node_mut(id).mode = Mode::Unchanged;
    });
    trace!(node = id.raw(), "disowned cache revalidated");
    cached(id)
}

/// Resets a node to `New` if its deriver unwinds, so a partially-updated
/// cache is never observable. Disarmed on successful evaluation.
struct ModeReset {
    id: NodeId,
    armed: bool,
}

impl ModeReset {
    fn arm(id: NodeId) -> Self {
        Self { id, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ModeReset {
    fn drop(&mut self) {
        if self.armed {
            arena::with(|a| {
                if a.contains(self.id) {
                    a.node_mut(self.id).mode = Mode::New;
                }
            });
        }
    }
}

/// Unconditionally run the deriver inside a fresh capture scope, update the
/// cache and mode, and diff the captured parent set against the previous
/// one. Edges are fully dynamic: two consecutive evaluations of the same
/// node may read entirely different parents.
pub(crate) fn force_get(id: NodeId) -> Value {
    if scope::owns_frame(id) {
        panic!("{}", Error::DependencyCycle { node: id });
    }

    let deriver = arena::with(|a| match &a.node(id).kind {
        NodeKind::Derivation { deriver, .. } => deriver.clone(),
        _ => unreachable!("only derivations are forced"),
    });

    trace!(node = id.raw(), "recomputing");

    let new_value = {
        let _scope_guard = CaptureScope::enter(id);
        let reset = ModeReset::arm(id);
        // No arena borrow is held here; the deriver is free to read the
        // graph. A panic propagates to the caller with the node reset to
        // `New` and the scope popped.
        let value = deriver();
        reset.disarm();

        let captured = scope::current_captured();
        drop(_scope_guard);

        commit(id, value.clone(), captured);
        value
    };

    new_value
}

/// Commit an evaluation result: compare against the cache, snapshot the
/// observed parent values, and rewire edges.
fn commit(id: NodeId, new_value: Value, captured: indexmap::IndexSet<NodeId>) {
    let (equals, old_state) = arena::with(|a| {
        let node = a.node(id);
        let old = match &node.kind {
            NodeKind::Derivation { state, .. } => state.clone(),
            _ => unreachable!("only derivations are forced"),
        };
        (node.equals.clone(), old)
    });

    // The comparator is user-replaceable; run it without the arena borrowed.
    let changed = match old_state {
        Some(old) => !equals(&*old, &*new_value),
        None => true,
    };

    let dropped = arena::with(|a| {
        // Snapshot each captured parent's value now. Nothing can have
        // changed between the deriver's reads and this point, so these are
        // exactly the values the deriver observed.
        let mut new_parents: IndexMap<NodeId, Value> = IndexMap::with_capacity(captured.len());
        for parent in captured {
            let snapshot = current_state_of(a, parent);
            new_parents.insert(parent, snapshot);
        }

        let old_parents: Vec<NodeId> = a.node(id).parents.keys().copied().collect();

        let mut graveyard = Vec::new();
        for former in old_parents {
            if !new_parents.contains_key(&former) {
                a.node_mut(former).children.shift_remove(&id);
                reclaim(a, former, &mut graveyard);
            }
        }
        for parent in new_parents.keys() {
            a.node_mut(*parent).children.insert(id);
        }

        let node = a.node_mut(id);
        node.parents = new_parents;
        node.mode = if changed { Mode::Changed } else { Mode::Unchanged };
        match &mut node.kind {
            NodeKind::Derivation { state, .. } => *state = Some(new_value),
            _ => unreachable!("only derivations are forced"),
        }
        graveyard
    });
    drop(dropped);
}

// ---------------------------------------------------------------------------
// Push-based propagation: cell writes
// ---------------------------------------------------------------------------

thread_local! {
    static PROPAGATING: RefCell<Vec<NodeId>> = const { RefCell::new(Vec::new()) };
}

/// Guard marking a cell's propagation pass as in flight, so a reactor
/// callback writing back to the same cell is caught instead of looping.
struct PropagationGuard(NodeId);

impl PropagationGuard {
    fn enter(id: NodeId) -> Self {
        PROPAGATING.with(|stack| stack.borrow_mut().push(id));
        Self(id)
    }
}

impl Drop for PropagationGuard {
    fn drop(&mut self) {
        PROPAGATING.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped, Some(self.0));
        });
    }
}

fn propagation_in_flight(id: NodeId) -> bool {
    PROPAGATING.with(|stack| stack.borrow().contains(&id))
}

/// Write a new value into a leaf cell and propagate.
///
/// A write of a value the cell's comparator considers equal is a no-op: no
/// descendant is marked and no reactor fires. Otherwise descendants are
/// marked `Unstable`, active reactors below the cell fire (each resolving
/// its source lazily), and a sweep settles or disowns what the pass touched.
pub(crate) fn set_cell(id: NodeId, value: Value) -> Result<(), Error> {
    if scope::is_capturing() {
        return Err(Error::MutationInDeriver);
    }
    if propagation_in_flight(id) {
        return Err(Error::ReentrantMutation { node: id });
    }

    let (equals, old) = arena::with(|a| {
        let node = a.node(id);
        let old = match &node.kind {
            NodeKind::Cell { value } => value.clone(),
            _ => unreachable!("only cells are written"),
        };
        (node.equals.clone(), old)
    });

    if equals(&*old, &*value) {
        trace!(cell = id.raw(), "write of equal value ignored");
        return Ok(());
    }

    let _guard = PropagationGuard::enter(id);

    arena::with(|a| {
        let node = a.node_mut(id);
        node.mode = Mode::Changed;
        match &mut node.kind {
            NodeKind::Cell { value: slot } => *slot = value,
            _ => unreachable!("only cells are written"),
        }
    });

    let mut reactors: SmallVec<[NodeId; 8]> = SmallVec::new();
    mark(id, &mut reactors);
    debug!(
        cell = id.raw(),
        reactors = reactors.len(),
        "propagating change"
    );

    for reactor in reactors {
        maybe_react(reactor);
    }

    sweep(id);
    Ok(())
}

enum MarkStep {
    Collect,
    Descend,
    Skip,
}

/// Mark phase: flip every descendant derivation to `Unstable` and collect
/// the active reactors encountered along the way, in child order.
fn mark(id: NodeId, reactors: &mut SmallVec<[NodeId; 8]>) {
    let children: Vec<NodeId> = arena::with(|a| a.node(id).children.iter().copied().collect());

    for child in children {
        let step = arena::with(|a| {
            let node = a.node_mut(child);
            match &node.kind {
                NodeKind::Reactor { active, .. } => {
                    if *active {
                        MarkStep::Collect
                    } else {
                        MarkStep::Skip
                    }
                }
                _ => {
                    if node.mode != Mode::Unstable {
                        node.mode = Mode::Unstable;
                        MarkStep::Descend
                    } else {
                        MarkStep::Skip
                    }
                }
            }
        });

        match step {
            MarkStep::Collect => reactors.push(child),
            MarkStep::Descend => mark(child, reactors),
            MarkStep::Skip => {}
        }
    }
}

enum SweepStep {
    Settle(Vec<NodeId>),
    Disown(Vec<NodeId>),
    Done,
}

/// Sweep phase: nodes the reaction phase resolved settle back to `Stable`;
/// marked nodes nothing pulled sever their child edges and become
/// `Disowned`, carrying their parent snapshots for later revalidation.
fn sweep(id: NodeId) {
    let step = arena::with(|a| {
        let node = a.node(id);
        if matches!(node.kind, NodeKind::Reactor { .. }) {
            return SweepStep::Done;
        }
        match node.mode {
            Mode::Changed | Mode::Unchanged => {
                SweepStep::Settle(node.children.iter().copied().collect())
            }
            Mode::Unstable => SweepStep::Disown(node.parents.keys().copied().collect()),
            _ => SweepStep::Done,
        }
    });

    match step {
        SweepStep::Settle(children) => {
            for child in children {
                sweep(child);
            }
            arena::with(|a| a.node_mut(id).mode = Mode::Stable);
        }
        SweepStep::Disown(parents) => {
            trace!(node = id.raw(), "disowned");
            arena::with(|a| {
                for parent in parents {
                    a.node_mut(parent).children.shift_remove(&id);
                }
                a.node_mut(id).mode = Mode::Disowned;
            });
        }
        SweepStep::Done => {}
    }
}

// ---------------------------------------------------------------------------
// Reactor lifecycle
// ---------------------------------------------------------------------------

/// Activate a reactor: link it as a child of its source (pinning the source
/// non-orphanable) and run `on_start`. No-op if already active.
pub(crate) fn start_reactor(id: NodeId) {
    let hook = arena::with(|a| {
        if !a.contains(id) {
            return None;
        }
        let (source, hook) = match &mut a.node_mut(id).kind {
            NodeKind::Reactor {
                source,
                active,
                primed,
                on_start,
                ..
            } => {
                if *active {
                    return None;
                }
                *active = true;
                *primed = false;
                (*source, on_start.clone())
            }
            _ => unreachable!("start on a non-reactor node"),
        };
        a.node_mut(source).children.insert(id);
        trace!(reactor = id.raw(), source = source.raw(), "reactor started");
        hook
    });

    if let Some(hook) = hook {
        (hook.borrow_mut())();
    }
}

/// Deactivate a reactor: unlink the child edge (marking a derivation source
/// `Orphaned` when this was its last child) and run `on_stop`. Idempotent.
pub(crate) fn stop_reactor(id: NodeId) {
    let stopped = arena::with(|a| {
        if !a.contains(id) {
            return None;
        }
        let (source, hook) = match &mut a.node_mut(id).kind {
            NodeKind::Reactor {
                source,
                active,
                on_stop,
                ..
            } => {
                if !*active {
                    return None;
                }
                *active = false;
                (*source, on_stop.clone())
            }
            _ => unreachable!("stop on a non-reactor node"),
        };

        let mut graveyard = Vec::new();
        if a.contains(source) {
            a.node_mut(source).children.shift_remove(&id);
            let source_node = a.node(source);
            if matches!(source_node.kind, NodeKind::Derivation { .. })
                && source_node.children.is_empty()
            {
                a.node_mut(source).mode = Mode::Orphaned;
            }
            reclaim(a, source, &mut graveyard);
        }
        trace!(reactor = id.raw(), "reactor stopped");
        Some((hook, graveyard))
    });

    if let Some((hook, graveyard)) = stopped {
        drop(graveyard);
        if let Some(hook) = hook {
            (hook.borrow_mut())();
        }
    }
}

/// Force a reactor: pull its source and notify. The callback fires when the
/// source resolved `Changed`, or unconditionally on the first force after a
/// start. No-op while stopped.
pub(crate) fn maybe_react(id: NodeId) {
    let info = arena::with(|a| {
        if !a.contains(id) {
            return None;
        }
        match &a.node(id).kind {
            NodeKind::Reactor {
                source,
                react,
                active,
                primed,
                ..
            } => {
                if !*active {
                    return None;
                }
                Some((*source, react.clone(), *primed))
            }
            _ => unreachable!("force on a non-reactor node"),
        }
    });

    let Some((source, react, primed)) = info else {
        return;
    };

    let value = pull(source);
    let fire = !primed || mode_of(source) == Mode::Changed;

    arena::with(|a| {
        if let NodeKind::Reactor { primed, .. } = &mut a.node_mut(id).kind {
            *primed = true;
        }
    });

    if fire {
        trace!(reactor = id.raw(), source = source.raw(), "reacting");
        // A callback borrowing itself re-entrantly (forcing its own
        // reactor from inside the callback) is the documented reentrancy
        // precondition violation and fails loudly here.
        (react.borrow_mut())(id, &value);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) fn edges_consistent(id: NodeId) -> bool {
    arena::with(|a| {
        let node = a.node(id);
        node.parents
            .keys()
            .all(|parent| a.node(*parent).children.contains(&id))
            && node
                .children
                .iter()
                .all(|child| match &a.node(*child).kind {
                    NodeKind::Reactor { source, .. } => *source == id,
                    _ => a.node(*child).parents.contains_key(&id),
                })
    })
}
