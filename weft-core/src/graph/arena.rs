//! Slot arena backing the dependency graph.
//!
//! All nodes live in a single thread-local table of slots, addressed by
//! [`NodeId`]. Parent and child edges are sets of handles, so the
//! bidirectional links of the graph never form reference cycles. Freed slots
//! go on a free list and are reused by later insertions.
//!
//! Values are stored type-erased as `Rc<dyn Any>`; the typed handles in
//! `reactive` downcast on read. The arena itself knows nothing about
//! evaluation — the state machine lives in `reactive::engine`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::node::{Mode, NodeId};

/// A type-erased node value.
pub(crate) type Value = Rc<dyn Any>;

/// Per-node equality comparator over type-erased values.
pub(crate) type EqualsFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// A derivation's computation function.
pub(crate) type DeriverFn = Rc<dyn Fn() -> Value>;

/// A reactor's callback. Receives the reactor's own id (so a callback can
/// stop its own reactor) and the source's current value.
pub(crate) type ReactFn = Rc<RefCell<dyn FnMut(NodeId, &Value)>>;

/// Reactor lifecycle hook (`on_start` / `on_stop`).
pub(crate) type HookFn = Rc<RefCell<dyn FnMut()>>;

/// What a slot holds besides the shared node bookkeeping.
pub(crate) enum NodeKind {
    /// Externally mutable leaf value; origin of all change propagation.
    Cell { value: Value },

    /// Lazily computed, memoized node. `state` is `None` until the first
    /// evaluation.
    Derivation {
        deriver: DeriverFn,
        state: Option<Value>,
    },

    /// Eager push-based subscriber attached to `source` while `active`.
    /// `primed` records whether it has reacted since it was last started;
    /// the first force after a start notifies unconditionally.
    Reactor {
        source: NodeId,
        react: ReactFn,
        active: bool,
        primed: bool,
        on_start: Option<HookFn>,
        on_stop: Option<HookFn>,
    },
}

/// A node slot: shared contract plus kind-specific payload.
pub(crate) struct Node {
    pub mode: Mode,
    pub equals: EqualsFn,

    /// Parents in capture order, each mapped to the value observed at this
    /// node's last evaluation. The snapshot is what DISOWNED revalidation
    /// polls against.
    pub parents: IndexMap<NodeId, Value>,

    /// Child edges in insertion order, so reactor firing order is
    /// deterministic.
    pub children: IndexSet<NodeId>,

    pub kind: NodeKind,

    /// Number of live application handles (`Atom`, `Derivation`, `Reactor`
    /// clones). A slot is reclaimed once this reaches zero and no children
    /// remain.
    pub handles: usize,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, equals: EqualsFn, mode: Mode) -> Self {
        Self {
            mode,
            equals,
            parents: IndexMap::new(),
            children: IndexSet::new(),
            kind,
            handles: 1,
        }
    }
}

/// The slot table. One per thread; the engine is single-threaded by
/// contract.
pub(crate) struct Arena {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
}

impl Arena {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("node handle names a live slot")
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("node handle names a live slot")
    }

    /// Take a node out of the arena, putting its slot on the free list.
    ///
    /// The caller is responsible for dropping the returned node outside of
    /// any arena borrow: dropping a deriver closure releases the handles it
    /// captured, which re-enters the arena.
    pub(crate) fn remove(&mut self, id: NodeId) -> Node {
        let node = self.slots[id.0 as usize]
            .take()
            .expect("node handle names a live slot");
        self.free.push(id.0);
        node
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

thread_local! {
    static ARENA: RefCell<Arena> = RefCell::new(Arena::new());
}

/// Run `f` with exclusive access to this thread's arena.
///
/// Callers must not invoke user code (derivers, callbacks, comparators)
/// while inside: user code reads the graph and would hit the `RefCell`
/// re-entrantly.
pub(crate) fn with<R>(f: impl FnOnce(&mut Arena) -> R) -> R {
    ARENA.with(|arena| f(&mut arena.borrow_mut()))
}

/// Like [`with`], but a no-op if the thread-local arena has already been
/// destroyed. Used by handle `Drop` impls, which may run inside the arena's
/// own thread-local destructor while the thread is exiting.
pub(crate) fn try_with<R>(f: impl FnOnce(&mut Arena) -> R) -> Option<R> {
    ARENA.try_with(|arena| f(&mut arena.borrow_mut())).ok()
}
