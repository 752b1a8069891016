//! Atom Implementation
//!
//! An Atom is the externally mutable leaf cell, the origin of all change
//! propagation. Reading an atom inside a running derivation records it as a
//! dependency; writing it marks descendant derivations potentially stale and
//! fires the active reactors below it, all within the caller's invocation.
//!
//! A write of a value the atom's comparator considers equal is swallowed
//! entirely: nothing downstream is marked, no reactor fires.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::Error;
use crate::graph::NodeId;

use super::engine;
use super::Derivable;

/// A mutable leaf cell holding a value of type `T`.
///
/// Cloning an atom produces another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
///
/// // Read the value (captured as a dependency inside a deriver)
/// let value = count.get();
///
/// // Update the value (propagates to dependents)
/// count.set(5);
/// ```
pub struct Atom<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Atom<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new atom with the given initial value.
    pub fn new(value: T) -> Self {
        let id = engine::new_cell(Rc::new(value), engine::equals_for::<T>());
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> Atom<T>
where
    T: Clone + 'static,
{
    /// Create an atom with a custom equality comparator, used to decide
    /// whether a write actually changes anything.
    pub fn with_equality(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        let id = engine::new_cell(Rc::new(value), engine::equals_from(equals));
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        let value = engine::pull(self.id);
        value
            .downcast_ref::<T>()
            .expect("atom value has the handle's type")
            .clone()
    }

    /// Set a new value and propagate to dependents.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a deriver, or from a reactor callback
    /// reacting to this very atom (the documented reentrancy precondition).
    /// Use [`try_set`](Atom::try_set) to handle those cases as errors.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Fallible variant of [`set`](Atom::set): reports misuse instead of
    /// panicking. Writing from a callback that observes a *different* node
    /// is fine and nests a full propagation pass.
    pub fn try_set(&self, value: T) -> Result<(), Error> {
        engine::set_cell(self.id, Rc::new(value))
    }

    /// Update the value using a function of the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.get_untracked());
        self.set(next);
    }
}

impl<T> Derivable<T> for Atom<T>
where
    T: Clone + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn get(&self) -> T {
        let value = engine::read(self.id);
        value
            .downcast_ref::<T>()
            .expect("atom value has the handle's type")
            .clone()
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        engine::retain_handle(self.id);
        Self {
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Atom<T> {
    fn drop(&mut self) {
        engine::release_handle(self.id);
    }
}

impl<T> std::fmt::Debug for Atom<T>
where
    T: Clone + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id.raw())
            .field("value", &self.get_untracked())
            .finish()
    }
}
