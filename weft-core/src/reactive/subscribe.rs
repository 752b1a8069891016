//! Reactive Subscription Controller
//!
//! [`react`] turns the lazy pull-based graph into a declarative,
//! conditionally-active side effect. It composes three reactors, wired only
//! through calls on each other:
//!
//! 1. An *inner* reactor wrapping the user's effect callback (honoring
//!    `skip_first` and `once`).
//! 2. A *controller* reactor observing the combined `(until, when)` state:
//!    `until` permanently ends the subscription, `when` pauses and resumes
//!    the inner reactor while `until` stays false.
//! 3. A one-shot *gate* reactor observing `from`: once true it starts the
//!    controller and stops itself; `from` has no further effect.
//!
//! Between themselves the reactors hold only non-owning node ids; the
//! returned [`Subscription`] owns all three handles and stops everything
//! when dropped.

use std::cell::Cell as StdCell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::NodeId;

use super::{engine, Atom, Derivable, Derivation, Reactor};

/// A boolean input to [`react`]: a literal, a plain predicate, or anything
/// derivable. Literals become constant cells, predicates become
/// derivations, so the controller only ever observes derivable booleans.
pub enum Condition {
    /// A fixed boolean.
    Literal(bool),
    /// A predicate re-evaluated reactively; reads inside it are captured.
    Predicate(Box<dyn Fn() -> bool>),
    /// An existing derivable boolean (an `Atom<bool>`, `Derivation<bool>`,
    /// or anything else implementing the trait).
    Derived(Rc<dyn Derivable<bool>>),
}

impl Condition {
    /// Wrap a predicate closure.
    pub fn predicate(f: impl Fn() -> bool + 'static) -> Self {
        Condition::Predicate(Box::new(f))
    }

    /// Wrap an existing derivable boolean.
    pub fn derived(source: impl Derivable<bool> + 'static) -> Self {
        Condition::Derived(Rc::new(source))
    }

    fn into_source(self) -> Rc<dyn Derivable<bool>> {
        match self {
            Condition::Literal(value) => Rc::new(Atom::new(value)),
            Condition::Predicate(f) => Rc::new(Derivation::new(move || f())),
            Condition::Derived(source) => source,
        }
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Condition::Literal(value)
    }
}

/// Options controlling a [`react`] subscription.
///
/// Defaults match an unconditional, immediately-active subscription:
/// `once = false`, `skip_first = false`, `from = true`, `until = false`,
/// `when = true`.
pub struct ReactOptions {
    /// Stop the whole subscription after the first delivered notification.
    pub once: bool,
    /// Swallow the first notification (the unconditional one delivered on
    /// activation).
    pub skip_first: bool,
    /// The subscription does nothing until this first becomes true; a
    /// one-shot gate with no further effect.
    pub from: Condition,
    /// Permanently ends the subscription when it becomes true.
    pub until: Condition,
    /// Pauses (false) and resumes (true) the effect while `until` stays
    /// false.
    pub when: Condition,
    /// Invoked whenever the inner reactor starts.
    pub on_start: Option<Box<dyn FnMut()>>,
    /// Invoked whenever the inner reactor stops.
    pub on_stop: Option<Box<dyn FnMut()>>,
}

impl Default for ReactOptions {
    fn default() -> Self {
        Self {
            once: false,
            skip_first: false,
            from: Condition::Literal(true),
            until: Condition::Literal(false),
            when: Condition::Literal(true),
            on_start: None,
            on_stop: None,
        }
    }
}

impl ReactOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn skip_first(mut self, skip_first: bool) -> Self {
        self.skip_first = skip_first;
        self
    }

    pub fn from(mut self, from: impl Into<Condition>) -> Self {
        self.from = from.into();
        self
    }

    pub fn until(mut self, until: impl Into<Condition>) -> Self {
        self.until = until.into();
        self
    }

    pub fn when(mut self, when: impl Into<Condition>) -> Self {
        self.when = when.into();
        self
    }

    pub fn on_start(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }
}

/// A running (or pending) subscription created by [`react`].
///
/// Dropping it stops all three reactors and releases their nodes; `stop`
/// does the same while keeping the handle.
pub struct Subscription {
    inner: Reactor,
    controller: Reactor,
    gate: Reactor,
    // Keep the condition graph alive for as long as the subscription.
    _conds: Derivation<(bool, bool)>,
    _from: Rc<dyn Derivable<bool>>,
}

impl Subscription {
    /// Permanently stop the subscription. Idempotent.
    pub fn stop(&self) {
        self.gate.stop();
        self.controller.stop();
        self.inner.stop();
    }

    /// Whether the effect is currently active (started and not paused).
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Subscribe `f` to `source` under the given options.
///
/// Activation performs one unconditional evaluate-and-notify (swallowed
/// when `skip_first` is set); afterwards `f` runs exactly once per genuine
/// change of the source while the subscription is active.
pub fn react<T, D, F>(source: &D, f: F, options: ReactOptions) -> Subscription
where
    T: Clone + 'static,
    D: Derivable<T> + ?Sized,
    F: FnMut(&T) + 'static,
{
    let ReactOptions {
        once,
        skip_first,
        from,
        until,
        when,
        on_start,
        on_stop,
    } = options;

    // Inner reactor: wraps the effect, honoring skip_first and once. It
    // only learns the controller's id after the controller exists, through
    // a shared cell, and never owns it.
    let controller_slot: Rc<StdCell<Option<NodeId>>> = Rc::new(StdCell::new(None));
    let inner_id = {
        let controller_slot = Rc::clone(&controller_slot);
        let mut skip_first = skip_first;
        let mut f = f;
        let react_fn: Rc<RefCell<dyn FnMut(NodeId, &Rc<dyn std::any::Any>)>> =
            Rc::new(RefCell::new(
                move |self_id: NodeId, value: &Rc<dyn std::any::Any>| {
                    if skip_first {
                        skip_first = false;
                        return;
                    }
                    let value = value
                        .downcast_ref::<T>()
                        .expect("reactor value has the source's type");
                    f(value);
                    if once {
                        engine::stop_reactor(self_id);
                        if let Some(controller) = controller_slot.get() {
                            engine::stop_reactor(controller);
                        }
                    }
                },
            ));
        let on_start = on_start.map(|h| Rc::new(RefCell::new(h)) as Rc<RefCell<dyn FnMut()>>);
        let on_stop = on_stop.map(|h| Rc::new(RefCell::new(h)) as Rc<RefCell<dyn FnMut()>>);
        engine::new_reactor(source.id(), react_fn, on_start, on_stop)
    };

    // Controller reactor: observes the combined (until, when) pair and
    // starts/stops the inner reactor accordingly.
    let until_source = until.into_source();
    let when_source = when.into_source();
    let conds = {
        let (u, w) = (Rc::clone(&until_source), Rc::clone(&when_source));
        Derivation::new(move || (u.get(), w.get()))
    };
    let controller_id = {
        let react_fn: Rc<RefCell<dyn FnMut(NodeId, &Rc<dyn std::any::Any>)>> =
            Rc::new(RefCell::new(
                move |self_id: NodeId, value: &Rc<dyn std::any::Any>| {
                    let &(until, when) = value
                        .downcast_ref::<(bool, bool)>()
                        .expect("controller observes the condition pair");
                    if until {
                        engine::stop_reactor(inner_id);
                        engine::stop_reactor(self_id);
                    } else if when {
                        if !engine::reactor_active(inner_id) {
                            engine::start_reactor(inner_id);
                            engine::maybe_react(inner_id);
                        }
                    } else if engine::reactor_active(inner_id) {
                        engine::stop_reactor(inner_id);
                    }
                },
            ));
        engine::new_reactor(conds.id(), react_fn, None, None)
    };
    controller_slot.set(Some(controller_id));

    // Gate reactor: one-shot activation on `from`.
    let from_source = from.into_source();
    let gate_id = {
        let react_fn: Rc<RefCell<dyn FnMut(NodeId, &Rc<dyn std::any::Any>)>> =
            Rc::new(RefCell::new(
                move |self_id: NodeId, value: &Rc<dyn std::any::Any>| {
                    let from = *value
                        .downcast_ref::<bool>()
                        .expect("gate observes a boolean");
                    if from {
                        engine::start_reactor(controller_id);
                        engine::maybe_react(controller_id);
                        engine::stop_reactor(self_id);
                    }
                },
            ));
        engine::new_reactor(from_source.id(), react_fn, None, None)
    };

    engine::start_reactor(gate_id);
    engine::maybe_react(gate_id);

    Subscription {
        inner: Reactor::from_raw(inner_id),
        controller: Reactor::from_raw(controller_id),
        gate: Reactor::from_raw(gate_id),
        _conds: conds,
        _from: from_source,
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
    fn default_subscription_notifies_on_activation_and_changes() {
        let atom = Atom::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::default(),
        );
        assert!(sub.is_active());
        assert_eq!(*log.borrow(), vec![1]);

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn when_pauses_and_resumes() {
        let atom = Atom::new(0);
        let when = Atom::new(false);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().when(Condition::derived(when.clone())),
        );

        // Paused from the start: nothing fires.
        assert!(!sub.is_active());
        atom.set(1);
        assert!(log.borrow().is_empty());

        // Resuming notifies once with the current value.
        when.set(true);
        assert!(sub.is_active());
        assert_eq!(*log.borrow(), vec![1]);

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1, 2]);

        // Pausing silences without ending the subscription.
        when.set(false);
        atom.set(3);
        assert_eq!(*log.borrow(), vec![1, 2]);

        when.set(true);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn until_ends_permanently() {
        let atom = Atom::new(0);
        let until = Atom::new(false);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().until(Condition::derived(until.clone())),
        );

        atom.set(1);
        assert_eq!(*log.borrow(), vec![0, 1]);

        until.set(true);
        assert!(!sub.is_active());

        atom.set(2);
        atom.set(3);
        assert_eq!(*log.borrow(), vec![0, 1]);

        // Flipping until back does not revive a dead subscription.
        until.set(false);
        atom.set(4);
        assert_eq!(*log.borrow(), vec![0, 1]);
    }

    #[test]
    fn from_defers_activation_once() {
        let atom = Atom::new(10);
        let from = Atom::new(false);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let _sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().from(Condition::derived(from.clone())),
        );

        atom.set(11);
        assert!(log.borrow().is_empty());

        from.set(true);
        assert_eq!(*log.borrow(), vec![11]);

        // The gate is one-shot: toggling from has no further effect.
        from.set(false);
        atom.set(12);
        assert_eq!(*log.borrow(), vec![11, 12]);
    }

    #[test]
    fn once_stops_after_first_delivery() {
        let atom = Atom::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().once(true),
        );

        // The activation notification counts as the single delivery.
        assert_eq!(*log.borrow(), vec![1]);
        assert!(!sub.is_active());

        atom.set(2);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn skip_first_swallows_the_activation_notification() {
        let atom = Atom::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let _sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().skip_first(true),
        );
        assert!(log.borrow().is_empty());

        atom.set(2);
        assert_eq!(*log.borrow(), vec![2]);
        atom.set(3);
        assert_eq!(*log.borrow(), vec![2, 3]);
    }

    #[test]
    fn once_with_skip_first_delivers_exactly_one_change() {
        let atom = Atom::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let lc = log.clone();
        let sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().once(true).skip_first(true),
        );

        // Activation swallowed by skip_first.
        assert!(log.borrow().is_empty());
        assert!(sub.is_active());

        // The next change delivers exactly once and ends the subscription.
        atom.set(2);
        assert_eq!(*log.borrow(), vec![2]);
        assert!(!sub.is_active());

        atom.set(3);
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn predicate_conditions_are_reactive() {
        let atom = Atom::new(0);
        let threshold = Atom::new(10);
        let log = Rc::new(RefCell::new(Vec::new()));

        let tc = threshold.clone();
        let lc = log.clone();
        let _sub = react(
            &atom,
            move |v: &i32| lc.borrow_mut().push(*v),
            ReactOptions::new().when(Condition::predicate(move || tc.get() < 5)),
        );

        atom.set(1);
        assert!(log.borrow().is_empty());

        threshold.set(3);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn lifecycle_hooks_follow_pause_and_resume() {
        let atom = Atom::new(0);
        let when = Atom::new(true);
        let starts = Rc::new(StdCell::new(0));
        let stops = Rc::new(StdCell::new(0));

        let (sc, tc) = (starts.clone(), stops.clone());
        let sub = react(
            &atom,
            |_: &i32| {},
            ReactOptions::new()
                .when(Condition::derived(when.clone()))
                .on_start(move || sc.set(sc.get() + 1))
                .on_stop(move || tc.set(tc.get() + 1)),
        );
        assert_eq!((starts.get(), stops.get()), (1, 0));

        when.set(false);
        assert_eq!((starts.get(), stops.get()), (1, 1));

        when.set(true);
        assert_eq!((starts.get(), stops.get()), (2, 1));

        sub.stop();
        assert_eq!((starts.get(), stops.get()), (2, 2));
    }

    #[test]
    fn dropping_the_subscription_stops_it() {
        let atom = Atom::new(0);
        let fired = Rc::new(StdCell::new(0));

        let fc = fired.clone();
        let sub = react(
            &atom,
            move |_: &i32| fc.set(fc.get() + 1),
            ReactOptions::default(),
        );
        assert_eq!(fired.get(), 1);

        drop(sub);
        atom.set(1);
        assert_eq!(fired.get(), 1);
    }
}
