//! Scheduler - Deadlines, execution context and root scheduling.
//!
//! - [`clock`]: time units and deadline buckets
//! - [`context`]: thread-wide batching flags, scoped with RAII guards
//! - `work`: the root schedule and the [`WorkLoop`] seam
//!
//! ```text
//! update ──► compute deadline ──► schedule_work ──► request_work
//!                                                      │
//!                          SYNC, not batching ◄────────┼────────► deferred
//!                                  │                   │             │
//!                          perform_sync_work   end of batch   perform_async_work
//!                                  └──────────► WorkLoop::perform_work ◄──┘
//! ```

pub mod clock;
pub mod context;
mod work;

pub use work::{Scheduler, WorkLoop, WorkOutcome, NESTED_UPDATE_LIMIT};
