//! Fiber Root - One mounted tree and its commit.
//!
//! A root record owns nothing but ids: `current` names the committed host-root
//! node; its paired buffer is where the next pass is built. Commit is the only
//! place that swaps `current` and the only place staged context becomes
//! committed context.

use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::scheduler::context;
use crate::types::{ContextObject, Deadline, Mode, NodeId, RootId, WorkTag};

use super::arena::{StateNode, WorkTree};

// =============================================================================
// Root Record
// =============================================================================

/// The top-level record of a mounted tree.
pub struct FiberRoot<H: HostConfig> {
    pub(crate) current: NodeId,
    pub(crate) container_info: H::Container,
    pub(crate) context: Option<ContextObject>,
    pub(crate) pending_context: Option<ContextObject>,
    pub(crate) is_concurrent: bool,
    pub(crate) hydrate: bool,

    // Pending priority bounds
    pub(crate) earliest_pending: Option<Deadline>,
    pub(crate) latest_pending: Option<Deadline>,

    // Scheduling
    /// Deadline this root is scheduled at, `None` when it has no work.
    pub(crate) expiration_time: Option<Deadline>,
    pub(crate) is_scheduled: bool,
    pub(crate) commit_count: u64,
}

impl<H: HostConfig> FiberRoot<H> {
    /// The committed host-root node.
    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn container_info(&self) -> &H::Container {
        &self.container_info
    }

    /// Committed context, unset until the first update.
    pub fn context(&self) -> Option<&ContextObject> {
        self.context.as_ref()
    }

    /// Context staged for the next commit.
    pub fn pending_context(&self) -> Option<&ContextObject> {
        self.pending_context.as_ref()
    }

    /// The context the next pass renders with: staged if any, else committed.
    pub fn context_for_render(&self) -> ContextObject {
        self.pending_context
            .clone()
            .or_else(|| self.context.clone())
            .unwrap_or_else(ContextObject::empty)
    }

    pub fn is_concurrent(&self) -> bool {
        self.is_concurrent
    }

    pub fn hydrate(&self) -> bool {
        self.hydrate
    }

    /// Deadline the root is currently scheduled at.
    pub fn expiration_time(&self) -> Option<Deadline> {
        self.expiration_time
    }

    /// Most urgent pending deadline.
    pub fn earliest_pending(&self) -> Option<Deadline> {
        self.earliest_pending
    }

    pub fn latest_pending(&self) -> Option<Deadline> {
        self.latest_pending
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    /// Stage `context` for this root.
    ///
    /// Unset committed context is set directly. Otherwise the value is staged
    /// in `pending_context`, unless it is the very object already committed
    /// and nothing else is staged.
    pub(crate) fn stage_context(&mut self, context: ContextObject) {
        match &self.context {
            None => self.context = Some(context),
            Some(committed) if self.pending_context.is_none() && committed.ptr_eq(&context) => {}
            Some(_) => self.pending_context = Some(context),
        }
    }

    pub(crate) fn mark_pending_priority_level(&mut self, deadline: Deadline) {
        self.earliest_pending = Deadline::most_urgent(self.earliest_pending, Some(deadline));
        self.latest_pending = Some(match self.latest_pending {
            Some(latest) => latest.max(deadline),
            None => deadline,
        });
    }

    pub(crate) fn mark_committed_priority_levels(&mut self, remaining: Option<Deadline>) {
        match remaining {
            None => {
                self.earliest_pending = None;
                self.latest_pending = None;
            }
            Some(remaining) => {
                self.earliest_pending = Some(remaining);
                self.latest_pending = Some(match self.latest_pending {
                    Some(latest) if latest > remaining => latest,
                    _ => remaining,
                });
            }
        }
    }
}

// =============================================================================
// Root Factory & Commit
// =============================================================================

impl<H: HostConfig> WorkTree<H> {
    /// Create a root and its uninitialized host-root node.
    pub fn create_fiber_root(
        &mut self,
        container_info: H::Container,
        is_concurrent: bool,
        hydrate: bool,
    ) -> RootId {
        let mode = if is_concurrent {
            Mode::CONCURRENT | Mode::STRICT
        } else {
            Mode::NONE
        };
        let root_id = RootId(self.roots.len() as u32);
        let current = self.create_node(WorkTag::HostRoot, None, None, mode);
        if let Some(node) = self.node_mut(current) {
            node.state_node = StateNode::Root(root_id);
        }

        self.roots.push(FiberRoot {
            current,
            container_info,
            context: None,
            pending_context: None,
            is_concurrent,
            hydrate,
            earliest_pending: None,
            latest_pending: None,
            expiration_time: None,
            is_scheduled: false,
            commit_count: 0,
        });
        log::trace!(target: "spark_reconciler", "created root {root_id:?} (concurrent: {is_concurrent})");
        root_id
    }

    pub fn root(&self, root: RootId) -> Option<&FiberRoot<H>> {
        self.roots.get(root.0 as usize)
    }

    pub(crate) fn root_mut(&mut self, root: RootId) -> Result<&mut FiberRoot<H>> {
        self.roots
            .get_mut(root.0 as usize)
            .ok_or_else(|| ReconcilerError::invariant(format!("root {root:?} does not exist")))
    }

    pub(crate) fn get_root(&self, root: RootId) -> Result<&FiberRoot<H>> {
        self.root(root)
            .ok_or_else(|| ReconcilerError::invariant(format!("root {root:?} does not exist")))
    }

    /// Ids of every root created in this tree.
    pub fn root_ids(&self) -> impl Iterator<Item = RootId> + '_ {
        (0..self.roots.len() as u32).map(RootId)
    }

    /// Commit `finished_work` as the new current tree of `root`.
    ///
    /// In one step this swaps `current`, commits the staged context, runs the
    /// callbacks of the updates the pass processed (in insertion order) and
    /// records the remaining work. Callbacks must not reach back into the tree.
    pub fn commit_root(&mut self, root: RootId, finished_work: NodeId) -> Result<()> {
        let previous = self.get_root(root)?.current;
        if finished_work == previous {
            return Err(ReconcilerError::invariant(
                "Cannot commit the same tree as before.",
            ));
        }
        let finished = self.get(finished_work)?;
        match (finished.tag, &finished.state_node) {
            (WorkTag::HostRoot, StateNode::Root(owner)) if *owner == root => {}
            _ => {
                return Err(ReconcilerError::invariant(format!(
                    "commit_root: {finished_work:?} is not the host root of {root:?}"
                )));
            }
        }
        let remaining = Deadline::most_urgent(finished.expiration_time, finished.child_expiration_time);

        let _committing = context::scoped(|ctx| ctx.is_committing = true);

        let fiber_root = self.root_mut(root)?;
        fiber_root.current = finished_work;
        if let Some(pending) = fiber_root.pending_context.take() {
            fiber_root.context = Some(pending);
        }
        fiber_root.mark_committed_priority_levels(remaining);
        fiber_root.expiration_time = remaining;
        fiber_root.commit_count += 1;

        self.commit_update_queue(finished_work)?;

        let commits = self.commits.get() + 1;
        self.commits.set(commits);
        log::trace!(target: "spark_reconciler", "committed {root:?} (remaining: {remaining:?})");
        Ok(())
    }
}
