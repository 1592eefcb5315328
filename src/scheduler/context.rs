//! Execution Context - Thread-wide batching and rendering flags.
//!
//! Every reconciler on a thread shares one execution context. It is changed
//! only through scopes: [`scoped`] applies a change and returns a guard that
//! restores the previous snapshot when dropped, so an early return, an error
//! or a panic inside the scope cannot leave a flag set.
//!
//! # Example
//!
//! ```ignore
//! use spark_reconciler::scheduler::context;
//!
//! {
//!     let _batch = context::scoped(|ctx| ctx.is_batching_updates = true);
//!     assert!(context::current().is_batching_updates);
//! }
//! assert!(!context::current().is_batching_updates);
//! ```

use std::cell::{Cell, RefCell};

use crate::types::Deadline;

// =============================================================================
// Snapshot
// =============================================================================

/// Flags describing what the current thread is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    pub is_batching_updates: bool,
    pub is_unbatching_updates: bool,
    pub is_batching_interactive_updates: bool,
    /// A root is being rendered (the work loop is running).
    pub is_rendering: bool,
    pub is_working: bool,
    pub is_committing: bool,
    /// Deadline forced on every update made in this scope.
    pub expiration_context: Option<Deadline>,
    /// Deadline of the pass currently rendering.
    pub render_deadline: Option<Deadline>,
}

thread_local! {
    static CONTEXT: Cell<ExecutionContext> = const {
        Cell::new(ExecutionContext {
            is_batching_updates: false,
            is_unbatching_updates: false,
            is_batching_interactive_updates: false,
            is_rendering: false,
            is_working: false,
            is_committing: false,
            expiration_context: None,
            render_deadline: None,
        })
    };

    /// Names of components currently in their render phase, innermost last.
    static RENDER_PHASE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Snapshot of the current execution context.
pub fn current() -> ExecutionContext {
    CONTEXT.with(Cell::get)
}

// =============================================================================
// Scopes
// =============================================================================

/// Restores the execution context captured when the scope was entered.
#[must_use = "the scope ends when the guard is dropped"]
pub struct ContextGuard {
    previous: ExecutionContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT.with(|context| context.set(self.previous));
    }
}

/// Apply `change` to the execution context until the guard drops.
pub fn scoped(change: impl FnOnce(&mut ExecutionContext)) -> ContextGuard {
    CONTEXT.with(|context| {
        let previous = context.get();
        let mut next = previous;
        change(&mut next);
        context.set(next);
        ContextGuard { previous }
    })
}

// =============================================================================
// Render Phase
// =============================================================================

/// Pops the component pushed by [`enter_render_phase`] when dropped.
#[must_use = "the render phase ends when the guard is dropped"]
pub struct RenderPhaseGuard {
    depth: usize,
}

impl Drop for RenderPhaseGuard {
    fn drop(&mut self) {
        RENDER_PHASE.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Mark `component` as rendering until the guard drops.
///
/// Work loops call this around a component's render so that updates issued
/// from inside it can be diagnosed.
pub fn enter_render_phase(component: impl Into<String>) -> RenderPhaseGuard {
    RENDER_PHASE.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        stack.push(component.into());
        RenderPhaseGuard { depth }
    })
}

/// Name of the component in its render phase, if any.
pub fn render_phase_component() -> Option<String> {
    RENDER_PHASE.with(|stack| stack.borrow().last().cloned())
}

/// Reset all execution context state (for testing).
pub fn reset_execution_context() {
    CONTEXT.with(|context| context.set(ExecutionContext::default()));
    RENDER_PHASE.with(|stack| stack.borrow_mut().clear());
}
