//! Reactor Implementation
//!
//! A Reactor is the eager, push-based subscriber that bridges the lazy
//! graph to side effects. While active it is registered as a child of its
//! source node, which pins the source non-orphanable and routes change
//! propagation to it: every write above the source forces the reactor,
//! which pulls the source and invokes its callback when the source resolved
//! with a genuinely new value.
//!
//! The first force after a start notifies unconditionally, so an observer
//! always sees the current value on activation; change detection governs
//! every later notification.
//!
//! # Reentrancy
//!
//! A callback must not synchronously mutate the node it observes. The write
//! path detects this and reports [`Error::ReentrantMutation`]; writing to
//! *other* atoms from a callback is fine and nests a full propagation pass.
//!
//! [`Error::ReentrantMutation`]: crate::error::Error::ReentrantMutation

use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::NodeId;

use super::engine;
use super::Derivable;

/// An eager subscriber wrapping a source node and a side-effecting
/// callback.
///
/// Dropping the handle stops the reactor and releases its node.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
/// let reactor = Reactor::new(&count, |v: &i32| println!("count = {v}"));
/// reactor.start();
/// reactor.force();     // prints "count = 0"
/// count.set(5);        // prints "count = 5"
/// ```
pub struct Reactor {
    id: NodeId,
}

impl Reactor {
    /// Create a reactor observing `source`. The reactor is inert until
    /// [`start`](Reactor::start) is called.
    pub fn new<T, D, F>(source: &D, mut on_react: F) -> Self
    where
        T: Clone + 'static,
        D: Derivable<T> + ?Sized,
        F: FnMut(&T) + 'static,
    {
        let react: Rc<RefCell<dyn FnMut(NodeId, &Rc<dyn std::any::Any>)>> =
            Rc::new(RefCell::new(move |_id: NodeId, value: &Rc<dyn std::any::Any>| {
                let value = value
                    .downcast_ref::<T>()
                    .expect("reactor value has the source's type");
                on_react(value);
            }));
        let id = engine::new_reactor(source.id(), react, None, None);
        Self { id }
    }

    pub(crate) fn from_raw(id: NodeId) -> Self {
        Self { id }
    }

    /// Register as a child of the source and run the start hook. No-op if
    /// already active.
    pub fn start(&self) {
        engine::start_reactor(self.id);
    }

    /// Unregister from the source (possibly orphaning it) and run the stop
    /// hook. Idempotent, immediate, always safe.
    pub fn stop(&self) {
        engine::stop_reactor(self.id);
    }

    /// Pull the source and invoke the callback if it resolved `Changed`, or
    /// unconditionally on the first force after a start. No-op while
    /// stopped.
    pub fn force(&self) {
        engine::maybe_react(self.id);
    }

    /// Whether the reactor is currently registered on its source.
    pub fn is_active(&self) -> bool {
        engine::reactor_active(self.id)
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        engine::stop_reactor(self.id);
        engine::release_handle(self.id);
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.id.raw())
            .field("active", &self.is_active())
            .finish()
    }
}
