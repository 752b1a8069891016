//! Capture Scope
//!
//! The capture scope tracks which computation is currently evaluating. This
//! enables dynamic dependency capture: when a node is read through its
//! public `get()`, it records itself in the innermost open scope, and the
//! set of recorded nodes becomes the evaluating derivation's parent set.
//!
//! # Implementation
//!
//! A thread-local stack of frames, one per evaluation in flight. Entering a
//! scope pushes a frame; the frame is popped by a guard on every exit path,
//! including unwinding out of a panicking deriver. Nested frames arise when
//! a deriver's read forces another derivation to evaluate.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::graph::NodeId;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One evaluation in flight.
struct Frame {
    /// The node whose deriver is running.
    owner: NodeId,
    /// Nodes read so far, in capture order.
    captured: IndexSet<NodeId>,
}

/// Guard that pops the scope when dropped.
///
/// Dropping on unwind keeps the stack consistent when a deriver panics.
pub(crate) struct CaptureScope {
    owner: NodeId,
}

impl CaptureScope {
    /// Open a capture scope for the given node's evaluation.
    pub(crate) fn enter(owner: NodeId) -> Self {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                owner,
                captured: IndexSet::new(),
            });
        });

        Self { owner }
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.owner, self.owner,
                    "capture scope mismatch: expected {}, got {}",
                    self.owner, frame.owner
                );
            }
        });
    }
}

/// Whether any evaluation is currently capturing reads.
pub(crate) fn is_capturing() -> bool {
    SCOPE_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Record a read of `id` into the innermost open scope, if any.
pub(crate) fn record(id: NodeId) {
    SCOPE_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            frame.captured.insert(id);
        }
    });
}

/// The nodes captured so far by the innermost open scope.
pub(crate) fn current_captured() -> IndexSet<NodeId> {
    SCOPE_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .map(|frame| frame.captured.clone())
            .unwrap_or_default()
    })
}

/// Whether `id` owns any frame on the stack. Used to detect a derivation
/// reading itself through an arbitrary chain.
pub(crate) fn owns_frame(id: NodeId) -> bool {
    SCOPE_STACK.with(|stack| stack.borrow().iter().any(|frame| frame.owner == id))
}
