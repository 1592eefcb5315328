//! Batching - Scopes controlling when scheduled work is performed.
//!
//! Each scope takes a closure over the reconciler and changes the thread-wide
//! execution context for its duration:
//!
//! - `batched_updates`: sync work waits for the outermost batch to end
//! - `unbatched_updates`: inside a batch, perform each update immediately
//! - `interactive_updates`: deadlines use the interactive bucket
//! - `deferred_updates` / `sync_updates`: force the deadline of every update
//! - `flush_sync` / `flush_controlled`: force sync and flush on exit
//!
//! The previous context is restored when the closure returns or unwinds.

use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::scheduler::clock::compute_async_expiration;
use crate::scheduler::context::{current, scoped};
use crate::types::{Deadline, RootId};

use super::Reconciler;

impl<H: HostConfig> Reconciler<H> {
    /// Run `f` with updates batched; sync work is performed when the
    /// outermost batch ends.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        let value = {
            let _batch = scoped(|ctx| ctx.is_batching_updates = true);
            f(self)
        };
        self.perform_sync_work_if_idle()?;
        Ok(value)
    }

    /// Inside a batch, perform the updates made by `f` immediately.
    pub fn unbatched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let ctx = current();
        if ctx.is_batching_updates && !ctx.is_unbatching_updates {
            let _unbatch = scoped(|ctx| ctx.is_unbatching_updates = true);
            return f(self);
        }
        f(self)
    }

    /// Run `f` with sync deadlines and perform all sync work before returning.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        if current().is_rendering {
            return Err(ReconcilerError::invariant(
                "flush_sync was called from inside a lifecycle method. It cannot be called when \
                 the reconciler is already rendering.",
            ));
        }
        let value = {
            let _scope = scoped(|ctx| {
                ctx.is_batching_updates = true;
                ctx.expiration_context = Some(Deadline::SYNC);
            });
            f(self)
        };
        self.scheduler.perform_sync_work()?;
        Ok(value)
    }

    /// Run `f` as an interactive (user input) batch.
    ///
    /// Pending interactive updates from an earlier batch are flushed first.
    pub fn interactive_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        let ctx = current();
        if ctx.is_batching_interactive_updates {
            return Ok(f(self));
        }
        if !ctx.is_batching_updates && !self.scheduler.is_rendering() {
            self.scheduler.flush_interactive_updates()?;
        }

        let value = {
            let _interactive = scoped(|ctx| {
                ctx.is_batching_interactive_updates = true;
                ctx.is_batching_updates = true;
            });
            f(self)
        };
        self.perform_sync_work_if_idle()?;
        Ok(value)
    }

    /// Perform interactive updates still pending.
    pub fn flush_interactive_updates(&mut self) -> Result<()> {
        self.scheduler.flush_interactive_updates()
    }

    /// Run `f` with every update given a low priority deadline.
    pub fn deferred_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let deadline = compute_async_expiration(self.scheduler.request_current_time());
        let _deferred = scoped(|ctx| ctx.expiration_context = Some(deadline));
        f(self)
    }

    /// Run `f` with every update given the sync deadline.
    pub fn sync_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let _sync = scoped(|ctx| ctx.expiration_context = Some(Deadline::SYNC));
        f(self)
    }

    /// Run `f` for a controlled input: its updates are sync and flushed on exit,
    /// unless an enclosing batch will flush them.
    pub fn flush_controlled(&mut self, f: impl FnOnce(&mut Self)) -> Result<()> {
        let ctx = current();
        if ctx.is_batching_updates && !ctx.is_unbatching_updates {
            f(self);
            return Ok(());
        }
        {
            let _scope = scoped(|ctx| {
                ctx.is_batching_updates = true;
                ctx.expiration_context = Some(Deadline::SYNC);
            });
            f(self);
        }
        self.perform_sync_work_if_idle()
    }

    /// Render `root` at `deadline` now, then flush sync work.
    pub fn flush_root(&mut self, root: RootId, deadline: Deadline) -> Result<()> {
        self.scheduler.flush_root(root, deadline)
    }

    /// Run the passive effects of earlier commits.
    pub fn flush_passive_effects(&mut self) {
        self.scheduler.flush_passive_effects();
    }

    /// Host callback for deferred work.
    pub fn perform_async_work(&mut self) -> Result<()> {
        self.scheduler.perform_async_work()
    }

    fn perform_sync_work_if_idle(&mut self) -> Result<()> {
        if !current().is_batching_updates && !self.scheduler.is_rendering() {
            self.scheduler.perform_sync_work()?;
        }
        Ok(())
    }
}
