//! Derivation Implementation
//!
//! A Derivation is a lazily computed, memoized graph node: a pure function
//! of whatever it reads, recomputed only when that actually matters.
//!
//! # How Derivations Work
//!
//! 1. On first access the deriver runs inside a capture scope; every node it
//!    reads becomes a parent, in capture order.
//!
//! 2. An upstream write marks the derivation potentially stale. The next
//!    access walks the parents: if every one held its value, the cache is
//!    revalidated without running the deriver; if any genuinely changed, the
//!    deriver runs once.
//!
//! 3. Each run re-captures dependencies from scratch, so a deriver with a
//!    conditional read may have entirely different parents between two
//!    evaluations.
//!
//! # Failure
//!
//! A panicking deriver propagates to the `get()` caller unmodified; the node
//! is reset so the next access evaluates afresh rather than exposing a
//! partially-updated cache. A deriver that reads itself, directly or through
//! other derivations, panics with a dependency-cycle diagnostic.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::graph::{Mode, NodeId};

use super::engine;
use super::Derivable;

/// A lazily computed, memoized value of type `T`.
///
/// Cloning a derivation produces another handle to the same node.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(2);
/// let c = count.clone();
/// let doubled = Derivation::new(move || c.get() * 2);
///
/// assert_eq!(doubled.get(), 4);   // computed
/// assert_eq!(doubled.get(), 4);   // cached
/// ```
pub struct Derivation<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Derivation<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new derivation. The deriver does not run until the first
    /// access.
    pub fn new(deriver: impl Fn() -> T + 'static) -> Self {
        let erased: Rc<dyn Fn() -> Rc<dyn std::any::Any>> =
            Rc::new(move || Rc::new(deriver()) as Rc<dyn std::any::Any>);
        let id = engine::new_derivation(erased, engine::equals_for::<T>());
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> Derivation<T>
where
    T: Clone + 'static,
{
    /// Create a derivation with a custom equality comparator, used to decide
    /// whether a recomputed value counts as a change.
    pub fn with_equality(
        deriver: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let erased: Rc<dyn Fn() -> Rc<dyn std::any::Any>> =
            Rc::new(move || Rc::new(deriver()) as Rc<dyn std::any::Any>);
        let id = engine::new_derivation(erased, engine::equals_from(equals));
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the current value without recording a dependency, still
    /// resolving staleness first.
    pub fn get_untracked(&self) -> T {
        let value = engine::pull(self.id);
        value
            .downcast_ref::<T>()
            .expect("derivation value has the handle's type")
            .clone()
    }

    /// Current evaluation mode, for introspection and tests.
    pub fn mode(&self) -> Mode {
        engine::mode_of(self.id)
    }
}

impl<T> Derivable<T> for Derivation<T>
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
            .expect("derivation value has the handle's type")
            .clone()
    }
}

impl<T> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        engine::retain_handle(self.id);
        Self {
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Derivation<T> {
    fn drop(&mut self) {
        engine::release_handle(self.id);
    }
}

impl<T> std::fmt::Debug for Derivation<T>
where
    T: Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.id.raw())
            .field("mode", &self.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell as StdCell;
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::reactive::Atom;

    #[test]
    fn lazy_until_first_access() {
        let runs = Rc::new(StdCell::new(0));
        let rc = runs.clone();

        let derived = Derivation::new(move || {
            rc.set(rc.get() + 1);
            42
        });

        assert_eq!(runs.get(), 0);
        assert_eq!(derived.get(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn consecutive_reads_hit_the_cache() {
        let runs = Rc::new(StdCell::new(0));
        let rc = runs.clone();

        let derived = Derivation::new(move || {
            rc.set(rc.get() + 1);
            42
        });

        assert_eq!(derived.get(), 42);
        assert_eq!(derived.get(), 42);
        assert_eq!(derived.get(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn recomputes_after_upstream_write() {
        let atom = Atom::new(5);
        let ac = atom.clone();
        let derived = Derivation::new(move || ac.get() * 2);

        assert_eq!(derived.get(), 10);
        atom.set(7);
        assert_eq!(derived.get(), 14);
    }

    #[test]
    fn chained_derivations_resolve_through() {
        let atom = Atom::new(5);

        let ac = atom.clone();
        let doubled = Derivation::new(move || ac.get() * 2);
        let dc = doubled.clone();
        let plus_ten = Derivation::new(move || dc.get() + 10);

        assert_eq!(plus_ten.get(), 20);

        atom.set(10);
        assert_eq!(plus_ten.get(), 30);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn unchanged_result_does_not_ripple_downstream() {
        let atom = Atom::new(1);
        let downstream_runs = Rc::new(StdCell::new(0));

        let ac = atom.clone();
        let parity = Derivation::new(move || ac.get() % 2);

        let (pc, dc) = (parity.clone(), downstream_runs.clone());
        let label = Derivation::new(move || {
            dc.set(dc.get() + 1);
            if pc.get() == 0 { "even" } else { "odd" }
        });

        assert_eq!(label.get(), "odd");
        assert_eq!(downstream_runs.get(), 1);

        // 1 -> 3 flips nothing: parity recomputes but is unchanged, so the
        // downstream deriver never runs again.
        atom.set(3);
        assert_eq!(label.get(), "odd");
        assert_eq!(downstream_runs.get(), 1);

        atom.set(4);
        assert_eq!(label.get(), "even");
        assert_eq!(downstream_runs.get(), 2);
    }

    #[test]
    fn custom_equality_suppresses_changes() {
        let atom = Atom::new(1.0_f64);
        let downstream_runs = Rc::new(StdCell::new(0));

        let ac = atom.clone();
        // Treat near-equal floats as the same value.
        let smoothed = Derivation::with_equality(
            move || ac.get() * 3.0,
            |a, b| (a - b).abs() < 0.5,
        );

        let (sc, dc) = (smoothed.clone(), downstream_runs.clone());
        let downstream = Derivation::new(move || {
            dc.set(dc.get() + 1);
            sc.get() as i64
        });

        assert_eq!(downstream.get(), 3);
        assert_eq!(downstream_runs.get(), 1);

        atom.set(1.1);
        assert_eq!(downstream.get(), 3);
        assert_eq!(downstream_runs.get(), 1);
    }

    #[test]
    fn dependencies_are_rediffed_each_evaluation() {
        let flag = Atom::new(true);
        let x = Atom::new(1);
        let y = Atom::new(10);
        let runs = Rc::new(StdCell::new(0));

        let (fc, xc, yc, rc) = (flag.clone(), x.clone(), y.clone(), runs.clone());
        let derived = Derivation::new(move || {
            rc.set(rc.get() + 1);
            if fc.get() { xc.get() } else { yc.get() }
        });

        assert_eq!(derived.get(), 1);
        assert_eq!(runs.get(), 1);

        flag.set(false);
        assert_eq!(derived.get(), 10);
        assert_eq!(runs.get(), 2);

        // `x` is no longer a parent; writing it must not invalidate.
        x.set(100);
        assert_eq!(derived.get(), 10);
        assert_eq!(runs.get(), 2);

        y.set(20);
        assert_eq!(derived.get(), 20);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn panicking_deriver_resets_and_recovers() {
        let atom = Atom::new(0);
        let ac = atom.clone();
        let derived = Derivation::new(move || {
            let v = ac.get();
            assert!(v >= 0, "negative input");
            v * 2
        });

        assert_eq!(derived.get(), 0);

        atom.set(-1);
        let dc = derived.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || dc.get()));
        assert!(result.is_err());
        assert_eq!(derived.mode(), Mode::New);

        // The next access evaluates afresh instead of exposing a poisoned
        // cache.
        atom.set(3);
        assert_eq!(derived.get(), 6);
    }

    #[test]
    #[should_panic(expected = "dependency cycle")]
    fn self_referential_deriver_panics() {
        let slot: Rc<RefCell<Option<Derivation<i32>>>> = Rc::new(RefCell::new(None));

        let sc = slot.clone();
        let derived = Derivation::new(move || {
            let this = sc.borrow().clone();
            match this {
                Some(d) => d.get() + 1,
                None => 0,
            }
        });
        *slot.borrow_mut() = Some(derived.clone());

        derived.get();
    }
}
