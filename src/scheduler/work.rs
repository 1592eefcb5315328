//! Work Scheduler - Decides when and at what deadline roots are rendered.
//!
//! Roots with pending work sit in a schedule. Synchronous work is performed
//! before control returns to the caller (or at the end of the enclosing
//! batch); anything less urgent is deferred to the host, which calls back
//! through [`Scheduler::perform_async_work`].
//!
//! The scheduler never walks or diffs a tree itself. Rendering a root is
//! delegated to a [`WorkLoop`], which builds the in-progress tree and commits
//! it with [`WorkTree::commit_root`].

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::devtools::DevToolsBinding;
use crate::engine::{StateNode, WorkTree};
use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::types::{Deadline, Mode, NodeId, RootId, WorkTag};

use super::clock::{self, compute_expiration_for_mode};
use super::context::{self, ExecutionContext};

/// Commits of one root within one batch before updates are considered runaway.
pub const NESTED_UPDATE_LIMIT: u32 = 50;

// =============================================================================
// Work Loop Seam
// =============================================================================

/// How a render pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The pass finished and the work loop committed it.
    Committed,
    /// The pass stopped early to give control back; it restarts later.
    Yielded,
    /// The pass cannot finish until something external happens.
    Suspended,
}

/// The tree-diffing engine.
///
/// Implementations render `root` at `deadline`: build the in-progress tree
/// from the root's current node, process its update queue with
/// [`WorkTree::process_update_queue`], and on completion call
/// [`WorkTree::commit_root`] before returning [`WorkOutcome::Committed`].
pub trait WorkLoop<H: HostConfig> {
    fn perform_work(
        &mut self,
        tree: &mut WorkTree<H>,
        host: &H,
        root: RootId,
        deadline: Deadline,
    ) -> Result<WorkOutcome>;
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct Scheduler<H: HostConfig> {
    host: H,
    engine: Box<dyn WorkLoop<H>>,
    tree: Rc<RefCell<WorkTree<H>>>,

    /// Roots with pending work, in scheduling order.
    schedule: Vec<RootId>,
    next_flushed: Option<(RootId, Deadline)>,
    lowest_priority_pending_interactive: Option<Deadline>,
    /// Root and deadline of a pass that was started and not finished.
    work_in_progress: Option<(RootId, Deadline)>,
    /// This scheduler's work loop is on the stack. Other reconcilers on the
    /// thread may be rendering while this is false.
    rendering: Rc<Cell<bool>>,

    // Time
    origin_ms: u64,
    current_renderer_time: Deadline,
    current_scheduler_time: Deadline,
    /// Deadline of the deferred callback requested from the host.
    callback_expiration_time: Option<Deadline>,

    nested_update_count: u32,
    last_committed_root_during_batch: Option<RootId>,

    pub(crate) devtools: Option<DevToolsBinding<H::Instance>>,
}

impl<H: HostConfig> Scheduler<H> {
    pub fn new(host: H, engine: impl WorkLoop<H> + 'static) -> Self {
        let origin_ms = host.now();
        let start = clock::ms_to_deadline(0);
        Self {
            host,
            engine: Box::new(engine),
            tree: Rc::new(RefCell::new(WorkTree::new())),
            schedule: Vec::new(),
            next_flushed: None,
            lowest_priority_pending_interactive: None,
            work_in_progress: None,
            rendering: Rc::new(Cell::new(false)),
            origin_ms,
            current_renderer_time: start,
            current_scheduler_time: start,
            callback_expiration_time: None,
            nested_update_count: 0,
            last_committed_root_during_batch: None,
            devtools: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn tree(&self) -> Ref<'_, WorkTree<H>> {
        self.tree.borrow()
    }

    pub fn tree_mut(&self) -> RefMut<'_, WorkTree<H>> {
        self.tree.borrow_mut()
    }

    pub(crate) fn shared_tree(&self) -> &Rc<RefCell<WorkTree<H>>> {
        &self.tree
    }

    /// Deadline of the deferred callback currently requested from the host.
    pub fn callback_expiration_time(&self) -> Option<Deadline> {
        self.callback_expiration_time
    }

    /// Roots currently in the schedule.
    pub fn scheduled_roots(&self) -> &[RootId] {
        &self.schedule
    }

    /// Whether this scheduler is inside one of its own render passes.
    pub fn is_rendering(&self) -> bool {
        self.rendering.get()
    }

    /// The thread's execution context as seen by this scheduler.
    ///
    /// Render flags set by another reconciler's pass are cleared; batching
    /// flags are shared by every reconciler on the thread.
    fn execution_context(&self) -> ExecutionContext {
        let mut ctx = context::current();
        if !self.is_rendering() {
            ctx.is_rendering = false;
            ctx.is_working = false;
            ctx.is_committing = false;
            ctx.render_deadline = None;
        }
        ctx
    }

    // =========================================================================
    // Time & Deadlines
    // =========================================================================

    fn recompute_current_renderer_time(&mut self) {
        let elapsed = self.host.now().saturating_sub(self.origin_ms);
        let now = clock::ms_to_deadline(elapsed);
        self.current_renderer_time = self.current_renderer_time.max(now);
    }

    /// Logical time for a new update.
    ///
    /// All updates inside one batch (or while rendering) observe the same
    /// snapshot. The snapshot is refreshed only when no root has pending
    /// non-idle work.
    pub fn request_current_time(&mut self) -> Deadline {
        if self.is_rendering() {
            return self.current_scheduler_time;
        }
        self.find_highest_priority_root();
        match self.next_flushed {
            None | Some((_, Deadline::NEVER)) => {
                self.recompute_current_renderer_time();
                self.current_scheduler_time = self.current_renderer_time;
            }
            Some(_) => {}
        }
        self.current_scheduler_time
    }

    /// Deadline for an update on `node` issued at `current_time`.
    pub fn compute_expiration_for_node(&mut self, current_time: Deadline, node: NodeId) -> Result<Deadline> {
        let mode = self.tree.borrow().get(node)?.mode;
        let ctx = self.execution_context();
        let in_progress = self.work_in_progress.map(|(_, deadline)| deadline);
        let deadline = compute_expiration_for_mode(current_time, mode, &ctx, in_progress);

        // Track the least urgent interactive update so it can be flushed early
        if ctx.is_batching_interactive_updates && mode.contains(Mode::CONCURRENT) {
            let lowest = self.lowest_priority_pending_interactive;
            if lowest.is_none_or(|lowest| lowest.is_more_urgent_than(deadline)) {
                self.lowest_priority_pending_interactive = Some(deadline);
            }
        }
        Ok(deadline)
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Record `deadline` on `node` and its ancestors, then request work on
    /// the owning root.
    pub fn schedule_work(&mut self, node: NodeId, deadline: Deadline) -> Result<()> {
        let Some(root) = self.schedule_work_to_root(node, deadline)? else {
            log::trace!(target: "spark_reconciler", "update on detached node {node:?} dropped");
            return Ok(());
        };

        let ctx = self.execution_context();
        // A more urgent update interrupts an unfinished lower priority pass
        if !ctx.is_working {
            if let Some((_, rendering)) = self.work_in_progress {
                if deadline.is_more_urgent_than(rendering) {
                    self.work_in_progress = None;
                }
            }
        }

        let root_deadline = {
            let mut tree = self.tree.borrow_mut();
            let fiber_root = tree.root_mut(root)?;
            fiber_root.mark_pending_priority_level(deadline);
            fiber_root.earliest_pending.unwrap_or(deadline)
        };

        let rendering_this_root = self.work_in_progress.is_some_and(|(wip, _)| wip == root);
        if !ctx.is_working || ctx.is_committing || !rendering_this_root {
            self.request_work(root, root_deadline)?;
        }

        if self.nested_update_count > NESTED_UPDATE_LIMIT {
            self.nested_update_count = 0;
            return Err(ReconcilerError::invariant(
                "Maximum update depth exceeded. This can happen when a component repeatedly \
                 schedules updates while committing. The number of nested updates is limited \
                 to prevent infinite loops.",
            ));
        }
        Ok(())
    }

    fn schedule_work_to_root(&mut self, node: NodeId, deadline: Deadline) -> Result<Option<RootId>> {
        let mut tree = self.tree.borrow_mut();

        let mark = |expiration: &mut Option<Deadline>| {
            *expiration = Deadline::most_urgent(*expiration, Some(deadline));
        };

        mark(&mut tree.get_mut(node)?.expiration_time);
        if let Some(pair) = tree.alternate(node) {
            mark(&mut tree.get_mut(pair)?.expiration_time);
        }

        let mut top = node;
        loop {
            let Some(parent) = tree.get(top)?.return_ else {
                break;
            };
            mark(&mut tree.get_mut(parent)?.child_expiration_time);
            if let Some(pair) = tree.alternate(parent) {
                mark(&mut tree.get_mut(pair)?.child_expiration_time);
            }
            top = parent;
        }

        let top = tree.get(top)?;
        Ok(match (top.tag, &top.state_node) {
            (WorkTag::HostRoot, StateNode::Root(root)) => Some(*root),
            _ => None,
        })
    }

    fn add_root_to_schedule(&mut self, root: RootId, deadline: Deadline) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        let fiber_root = tree.root_mut(root)?;
        if fiber_root.is_scheduled {
            fiber_root.expiration_time = Deadline::most_urgent(fiber_root.expiration_time, Some(deadline));
        } else {
            fiber_root.is_scheduled = true;
            fiber_root.expiration_time = Some(deadline);
            self.schedule.push(root);
            log::trace!(target: "spark_reconciler", "scheduled {root:?} at {deadline:?}");
        }
        Ok(())
    }

    /// Make sure `root` is in the schedule and performed in time for
    /// `deadline`.
    pub fn request_work(&mut self, root: RootId, deadline: Deadline) -> Result<()> {
        self.add_root_to_schedule(root, deadline)?;

        let ctx = self.execution_context();
        if ctx.is_rendering {
            // Picked up once this scheduler's render finishes
            return Ok(());
        }

        if ctx.is_batching_updates {
            if ctx.is_unbatching_updates {
                self.next_flushed = Some((root, Deadline::SYNC));
                self.perform_work_on_root(root, Deadline::SYNC)?;
            }
            return Ok(());
        }

        if deadline == Deadline::SYNC {
            self.perform_sync_work()
        } else {
            self.schedule_callback_with_expiration_time(deadline);
            Ok(())
        }
    }

    fn schedule_callback_with_expiration_time(&mut self, deadline: Deadline) {
        if let Some(existing) = self.callback_expiration_time {
            if !deadline.is_more_urgent_than(existing) {
                // The existing callback fires early enough
                return;
            }
            self.host.cancel_deferred_work();
        }
        self.callback_expiration_time = Some(deadline);

        let current_ms = self.host.now().saturating_sub(self.origin_ms);
        let timeout = clock::deadline_to_ms(deadline).saturating_sub(current_ms);
        self.host.schedule_deferred_work(timeout);
    }

    fn find_highest_priority_root(&mut self) {
        let mut highest: Option<(RootId, Deadline)> = None;
        {
            let mut tree = self.tree.borrow_mut();
            self.schedule.retain(|&root| {
                let Some(fiber_root) = tree.roots.get_mut(root.0 as usize) else {
                    return false;
                };
                match fiber_root.expiration_time {
                    None => {
                        fiber_root.is_scheduled = false;
                        false
                    }
                    Some(deadline) => {
                        if highest.is_none_or(|(_, best)| deadline.is_more_urgent_than(best)) {
                            highest = Some((root, deadline));
                        }
                        true
                    }
                }
            });
        }
        self.next_flushed = highest;
    }

    fn unschedule(&mut self, root: RootId) {
        if let Ok(fiber_root) = self.tree.borrow_mut().root_mut(root) {
            fiber_root.expiration_time = None;
        }
    }

    // =========================================================================
    // Performing Work
    // =========================================================================

    /// Perform all synchronous work.
    pub fn perform_sync_work(&mut self) -> Result<()> {
        self.perform_work(Deadline::SYNC, false)
    }

    /// Host callback for deferred work.
    pub fn perform_async_work(&mut self) -> Result<()> {
        self.perform_work(Deadline::NEVER, true)
    }

    /// Perform work on scheduled roots whose deadline is at least as urgent
    /// as `min`, most urgent root first.
    pub(crate) fn perform_work(&mut self, min: Deadline, is_async: bool) -> Result<()> {
        self.find_highest_priority_root();
        if is_async {
            self.recompute_current_renderer_time();
            self.current_scheduler_time = self.current_renderer_time;
        }

        let result = self.perform_scheduled(min);

        if is_async {
            self.callback_expiration_time = None;
        }
        if result.is_ok() {
            if let Some((_, deadline)) = self.next_flushed {
                self.schedule_callback_with_expiration_time(deadline);
            }
        }
        self.finish_rendering();
        result
    }

    fn perform_scheduled(&mut self, min: Deadline) -> Result<()> {
        while let Some((root, deadline)) = self.next_flushed {
            if !deadline.is_satisfied_by(min) {
                break;
            }
            if self.perform_work_on_root(root, deadline)? == WorkOutcome::Yielded {
                break;
            }
            self.find_highest_priority_root();
        }
        Ok(())
    }

    fn finish_rendering(&mut self) {
        self.nested_update_count = 0;
        self.last_committed_root_during_batch = None;
    }

    /// Render (and possibly commit) one root.
    pub(crate) fn perform_work_on_root(&mut self, root: RootId, deadline: Deadline) -> Result<WorkOutcome> {
        if self.is_rendering() {
            return Err(ReconcilerError::invariant(
                "perform_work_on_root was called recursively. This error is likely caused by a \
                 bug in the reconciler.",
            ));
        }
        let _rendering = RenderingScope::enter(&self.rendering);
        let _thread_rendering = context::scoped(|ctx| ctx.is_rendering = true);

        self.flush_passive_effects();

        let commits_before = self.tree.borrow().get_root(root)?.commit_count;
        self.work_in_progress = Some((root, deadline));
        log::trace!(target: "spark_reconciler", "rendering {root:?} at {deadline:?}");

        let outcome = {
            let _working = context::scoped(|ctx| {
                ctx.is_working = true;
                ctx.render_deadline = Some(deadline);
            });
            let mut tree = self.tree.borrow_mut();
            let outcome = self.engine.perform_work(&mut tree, &self.host, root, deadline);
            if !matches!(outcome, Ok(WorkOutcome::Committed)) {
                tree.abort_all_in_flight();
            }
            outcome
        };

        match outcome {
            Err(err) => {
                self.work_in_progress = None;
                self.unschedule(root);
                Err(err)
            }
            Ok(WorkOutcome::Committed) => {
                self.work_in_progress = None;
                let commits_after = self.tree.borrow().get_root(root)?.commit_count;
                if commits_after == commits_before {
                    self.unschedule(root);
                    return Err(ReconcilerError::invariant(format!(
                        "the work loop reported a commit of {root:?} without committing it"
                    )));
                }
                self.on_root_committed(root)?;
                Ok(WorkOutcome::Committed)
            }
            Ok(WorkOutcome::Yielded) => {
                if deadline == Deadline::SYNC {
                    self.work_in_progress = None;
                    self.unschedule(root);
                    return Err(ReconcilerError::invariant(
                        "the work loop yielded a synchronous pass",
                    ));
                }
                Ok(WorkOutcome::Yielded)
            }
            Ok(WorkOutcome::Suspended) => {
                self.work_in_progress = None;
                self.unschedule(root);
                log::trace!(target: "spark_reconciler", "{root:?} suspended at {deadline:?}");
                Ok(WorkOutcome::Suspended)
            }
        }
    }

    fn on_root_committed(&mut self, root: RootId) -> Result<()> {
        if self.last_committed_root_during_batch == Some(root) {
            self.nested_update_count += 1;
        } else {
            self.last_committed_root_during_batch = Some(root);
            self.nested_update_count = 0;
        }

        let (unmounted, current) = {
            let mut tree = self.tree.borrow_mut();
            let current = tree.get_root(root)?.current;
            (tree.take_unmounted(), current)
        };
        if let Some(devtools) = &self.devtools {
            for node in unmounted {
                devtools.on_commit_unmount(node);
            }
            devtools.on_commit_root(root, current);
        }
        Ok(())
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Synchronously render `root` at `deadline`, then flush sync work.
    pub fn flush_root(&mut self, root: RootId, deadline: Deadline) -> Result<()> {
        if context::current().is_rendering {
            return Err(ReconcilerError::invariant(
                "flush_root: Cannot commit while already rendering.",
            ));
        }
        self.next_flushed = Some((root, deadline));
        self.perform_work_on_root(root, deadline)?;
        self.perform_sync_work()
    }

    /// Flush pending interactive updates, if any.
    pub fn flush_interactive_updates(&mut self) -> Result<()> {
        if self.is_rendering() {
            return Ok(());
        }
        if let Some(lowest) = self.lowest_priority_pending_interactive.take() {
            self.perform_work(lowest, false)?;
        }
        Ok(())
    }

    /// Run the passive effects left by earlier commits, in commit order.
    pub fn flush_passive_effects(&mut self) {
        let effects = self.tree.borrow_mut().take_passive_effects();
        if effects.is_empty() {
            return;
        }
        log::trace!(target: "spark_reconciler", "flushing {} passive effects", effects.len());
        for effect in effects {
            effect();
        }
    }
}

/// Marks a scheduler as rendering until dropped.
struct RenderingScope {
    flag: Rc<Cell<bool>>,
}

impl RenderingScope {
    fn enter(flag: &Rc<Cell<bool>>) -> Self {
        flag.set(true);
        Self { flag: flag.clone() }
    }
}

impl Drop for RenderingScope {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}
