//! Diagnostics - Development-only, de-duplicated warnings.
//!
//! Warnings flag correctness smells (nested updates from render, non-callable
//! callbacks, deprecated lookups under strict mode). They never change the
//! result or control flow of the operation that emits them.
//!
//! In release builds (`debug_assertions` off) the warning functions are
//! no-ops: messages are not formatted and no bookkeeping state exists.
//! [`report_error`] is the exception and logs in every build.
//!
//! # Example
//!
//! ```ignore
//! use spark_reconciler::diagnostics::{warn_once, WarningKind};
//!
//! warn_once(WarningKind::FindNodeInStrictMode, "Button", || {
//!     "findDOMNode is deprecated in StrictMode.".to_string()
//! });
//! ```

#[cfg(debug_assertions)]
use std::cell::RefCell;
#[cfg(debug_assertions)]
use std::collections::HashSet;

// =============================================================================
// Types
// =============================================================================

/// Category of a diagnostic; de-duplication keys are scoped per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    NestedUpdate,
    InvalidCallback,
    FindNodeInStrictMode,
    MissingGetChildContext,
    DevTools,
}

/// A warning that was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

// =============================================================================
// Warning State
// =============================================================================

#[cfg(debug_assertions)]
thread_local! {
    /// (kind, key) pairs already warned about.
    static DID_WARN: RefCell<HashSet<(WarningKind, String)>> = RefCell::new(HashSet::new());

    /// Warnings emitted since the last `take_warnings()`.
    static EMITTED: RefCell<Vec<Warning>> = const { RefCell::new(Vec::new()) };
}

// =============================================================================
// Emitting
// =============================================================================

/// Emit a warning every time.
#[cfg(debug_assertions)]
pub fn warn(kind: WarningKind, message: impl FnOnce() -> String) {
    let message = message();
    log::warn!(target: "spark_reconciler", "{message}");
    EMITTED.with(|emitted| emitted.borrow_mut().push(Warning { kind, message }));
}

#[cfg(not(debug_assertions))]
#[inline]
pub fn warn(_kind: WarningKind, _message: impl FnOnce() -> String) {}

/// Emit a warning at most once per `(kind, key)`.
///
/// Returns true if the warning was emitted by this call.
#[cfg(debug_assertions)]
pub fn warn_once(kind: WarningKind, key: &str, message: impl FnOnce() -> String) -> bool {
    let first = DID_WARN.with(|did_warn| did_warn.borrow_mut().insert((kind, key.to_string())));
    if first {
        warn(kind, message);
    }
    first
}

#[cfg(not(debug_assertions))]
#[inline]
pub fn warn_once(_kind: WarningKind, _key: &str, _message: impl FnOnce() -> String) -> bool {
    false
}

/// Log a failure of external code in every build.
///
/// Debug builds also record it alongside the warnings.
pub fn report_error(kind: WarningKind, message: impl FnOnce() -> String) {
    let message = message();
    log::error!(target: "spark_reconciler", "{message}");
    #[cfg(debug_assertions)]
    EMITTED.with(|emitted| emitted.borrow_mut().push(Warning { kind, message }));
    #[cfg(not(debug_assertions))]
    let _ = kind;
}

/// Drain the warnings emitted on this thread.
#[cfg(debug_assertions)]
pub fn take_warnings() -> Vec<Warning> {
    EMITTED.with(|emitted| std::mem::take(&mut *emitted.borrow_mut()))
}

#[cfg(not(debug_assertions))]
pub fn take_warnings() -> Vec<Warning> {
    Vec::new()
}

/// Reset de-duplication state and drop recorded warnings (for testing).
pub fn reset_warning_state() {
    #[cfg(debug_assertions)]
    {
        DID_WARN.with(|did_warn| did_warn.borrow_mut().clear());
        EMITTED.with(|emitted| emitted.borrow_mut().clear());
    }
}
