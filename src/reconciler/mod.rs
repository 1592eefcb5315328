//! Reconciler - The public surface for mounting and updating trees.
//!
//! A [`Reconciler`] owns a host, a [`WorkLoop`] and the work tree they share.
//! Callers create containers, send element updates into them, and look up the
//! host instances behind component handles.
//!
//! # Example
//!
//! ```ignore
//! use spark_reconciler::{Element, Reconciler};
//!
//! let mut reconciler = Reconciler::new(host, work_loop);
//! let root = reconciler.create_container(container, false, false);
//!
//! // Blocking roots render synchronously
//! reconciler.update_container(Some(Element::host("box")), root, None, None)?;
//!
//! // Unmount
//! reconciler.update_container(None, root, None, None)?;
//! ```

mod batching;
pub mod context;
pub mod find;

use std::cell::{Ref, RefMut};
use std::rc::Rc;

use spark_signals::Signal;

use crate::devtools::{inject_internals, DevToolsConfig, FindHostInstanceByNode, Injection};
use crate::diagnostics::{warn, warn_once, WarningKind};
use crate::engine::{create_update, UpdateCallback, UpdatePayload, WorkTree};
use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::scheduler::{context as execution, Scheduler, WorkLoop};
use crate::types::{ComponentHandle, ContextObject, Deadline, Element, Mode, NodeId, RootId, WorkTag};

use self::find::{find_current_host_node, find_current_host_node_with_no_portals, find_current_node};

// =============================================================================
// Types
// =============================================================================

/// What [`Reconciler::get_public_root_instance`] exposes for a root's child.
pub enum PublicRootInstance<H: HostConfig> {
    /// A host component, translated by the host.
    Host(H::PublicInstance),
    /// Host text, as the raw instance.
    Text(H::Instance),
    Component(ComponentHandle),
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct Reconciler<H: HostConfig> {
    scheduler: Scheduler<H>,
}

impl<H: HostConfig> Reconciler<H> {
    pub fn new(host: H, work_loop: impl WorkLoop<H> + 'static) -> Self {
        Self {
            scheduler: Scheduler::new(host, work_loop),
        }
    }

    pub fn host(&self) -> &H {
        self.scheduler.host()
    }

    pub fn scheduler(&self) -> &Scheduler<H> {
        &self.scheduler
    }

    pub fn tree(&self) -> Ref<'_, WorkTree<H>> {
        self.scheduler.tree()
    }

    pub fn tree_mut(&self) -> RefMut<'_, WorkTree<H>> {
        self.scheduler.tree_mut()
    }

    /// Signal carrying the number of commits so far.
    pub fn commit_signal(&self) -> Signal<u64> {
        self.tree().commit_signal()
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Create a root for `container`.
    ///
    /// # Arguments
    ///
    /// * `container` - Host container the root renders into
    /// * `is_concurrent` - Concurrent roots defer non-urgent work; blocking roots render synchronously
    /// * `hydrate` - Reuse existing host content
    pub fn create_container(&mut self, container: H::Container, is_concurrent: bool, hydrate: bool) -> RootId {
        self.tree_mut().create_fiber_root(container, is_concurrent, hydrate)
    }

    /// Render `element` into `root`, or unmount its content when `element`
    /// is `None`.
    ///
    /// `parent` is the component the tree is rendered under, for context.
    /// `callback` runs once the update is committed.
    ///
    /// # Returns
    ///
    /// The deadline assigned to the update.
    pub fn update_container(
        &mut self,
        element: Option<Element>,
        root: RootId,
        parent: Option<ComponentHandle>,
        callback: Option<UpdateCallback>,
    ) -> Result<Deadline> {
        let current = self.tree().get_root(root)?.current;
        let current_time = self.scheduler.request_current_time();
        let deadline = self.scheduler.compute_expiration_for_node(current_time, current)?;
        self.update_container_at_expiration_time(element, root, parent, deadline, callback)
    }

    /// [`update_container`](Self::update_container) with a caller-chosen deadline.
    pub fn update_container_at_expiration_time(
        &mut self,
        element: Option<Element>,
        root: RootId,
        parent: Option<ComponentHandle>,
        deadline: Deadline,
        callback: Option<UpdateCallback>,
    ) -> Result<Deadline> {
        let current = {
            let mut tree = self.tree_mut();
            let context = context::get_context_for_subtree(&tree, parent)?;
            let fiber_root = tree.root_mut(root)?;
            fiber_root.stage_context(context);
            fiber_root.current
        };
        self.schedule_root_update(current, element, deadline, callback)
    }

    fn schedule_root_update(
        &mut self,
        current: NodeId,
        element: Option<Element>,
        deadline: Deadline,
        callback: Option<UpdateCallback>,
    ) -> Result<Deadline> {
        if let Some(name) = execution::render_phase_component() {
            warn_once(WarningKind::NestedUpdate, "", || {
                format!(
                    "Render methods should be a pure function of props and state; triggering \
                     nested component updates from render is not allowed. If necessary, trigger \
                     nested updates in componentDidUpdate.\n\nCheck the render method of {name}."
                )
            });
        }

        // Effects of earlier commits run before this update exists
        self.scheduler.flush_passive_effects();

        let mut update = create_update(deadline);
        update.payload = Some(UpdatePayload {
            element: element.map(Rc::new),
        });
        match callback {
            Some(UpdateCallback::Callable(callback)) => update.callback = Some(callback),
            Some(UpdateCallback::NotCallable(received)) => warn(WarningKind::InvalidCallback, || {
                format!(
                    "render(...): Expected the last optional `callback` argument to be a \
                     function. Instead received: {received}."
                )
            }),
            None => {}
        }

        self.tree_mut().enqueue_update(current, update)?;
        self.scheduler.schedule_work(current, deadline)?;
        Ok(deadline)
    }

    /// Public value of the first child of `root`'s committed tree.
    pub fn get_public_root_instance(&self, root: RootId) -> Result<Option<PublicRootInstance<H>>> {
        let tree = self.tree();
        let current = tree.get_root(root)?.current;
        let Some(child) = tree.get(current)?.child else {
            return Ok(None);
        };
        let child = tree.get(child)?;
        Ok(match (child.tag, child.state_node.host_instance()) {
            (WorkTag::HostComponent, Some(instance)) => {
                Some(PublicRootInstance::Host(self.host().get_public_instance(instance)))
            }
            (WorkTag::HostText, Some(instance)) => Some(PublicRootInstance::Text(instance.clone())),
            _ => child.state_node.component().map(PublicRootInstance::Component),
        })
    }

    // =========================================================================
    // Host Resolution
    // =========================================================================

    /// Host instance of the first host node rendered by `handle`.
    pub fn find_host_instance(&self, handle: ComponentHandle) -> Result<Option<H::Instance>> {
        let tree = self.tree();
        let node = instance_node(&tree, handle)?;
        Ok(find_current_host_node(&tree, node).and_then(|host| host_instance(&tree, host)))
    }

    /// Like [`find_host_instance`](Self::find_host_instance), but never looks
    /// inside portals.
    pub fn find_host_instance_with_no_portals(&self, handle: ComponentHandle) -> Result<Option<H::Instance>> {
        let tree = self.tree();
        let node = instance_node(&tree, handle)?;
        Ok(find_current_host_node_with_no_portals(&tree, node).and_then(|host| host_instance(&tree, host)))
    }

    /// Like [`find_host_instance`](Self::find_host_instance), warning once per
    /// component name when the lookup happens under strict mode.
    pub fn find_host_instance_with_warning(
        &self,
        handle: ComponentHandle,
        method_name: &str,
    ) -> Result<Option<H::Instance>> {
        let tree = self.tree();
        let node = instance_node(&tree, handle)?;
        let Some(host) = find_current_host_node(&tree, node) else {
            return Ok(None);
        };

        if tree.get(host)?.mode.contains(Mode::STRICT) {
            let component = find_current_node(&tree, node).unwrap_or(node);
            let component = tree.get(component)?;
            let name = component.component_name().unwrap_or("Component");
            let detail = if component.mode.contains(Mode::STRICT) {
                "which is inside StrictMode"
            } else {
                "which renders StrictMode children"
            };
            warn_once(WarningKind::FindNodeInStrictMode, name, || {
                format!(
                    "{method_name} is deprecated in StrictMode. {method_name} was passed an \
                     instance of {name} {detail}. Instead, add a ref directly to the element you \
                     want to reference."
                )
            });
        }
        Ok(host_instance(&tree, host))
    }

    /// Context visible to a subtree rendered under `parent`.
    pub fn get_context_for_subtree(&self, parent: Option<ComponentHandle>) -> Result<ContextObject> {
        context::get_context_for_subtree(&self.tree(), parent)
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    pub fn request_current_time(&mut self) -> Deadline {
        self.scheduler.request_current_time()
    }

    pub fn compute_expiration_for_node(&mut self, current_time: Deadline, node: NodeId) -> Result<Deadline> {
        self.scheduler.compute_expiration_for_node(current_time, node)
    }

    pub fn schedule_work(&mut self, node: NodeId, deadline: Deadline) -> Result<()> {
        self.scheduler.schedule_work(node, deadline)
    }

    // =========================================================================
    // DevTools
    // =========================================================================

    /// Register an inspection tool.
    ///
    /// # Returns
    ///
    /// `false` only when no hook is installed.
    pub fn inject_into_devtools(&mut self, config: DevToolsConfig<H::Instance>) -> bool {
        let tree = Rc::downgrade(self.scheduler.shared_tree());
        let find_host_instance_by_node: FindHostInstanceByNode<H::Instance> = Rc::new(move |node: NodeId| -> Option<H::Instance> {
            let tree = tree.upgrade()?;
            let tree = tree.try_borrow().ok()?;
            let host = find_current_host_node(&tree, node)?;
            host_instance(&tree, host)
        });

        let injection = inject_internals(config, find_host_instance_by_node);
        let registered = injection.registered();
        if let Injection::Bound(binding) = injection {
            self.scheduler.devtools = Some(binding);
        }
        registered
    }
}

/// The node a component handle is associated with.
fn instance_node<H: HostConfig>(tree: &WorkTree<H>, handle: ComponentHandle) -> Result<NodeId> {
    tree.instances()
        .node_for(handle)
        .ok_or_else(|| ReconcilerError::not_a_component(handle))
}

fn host_instance<H: HostConfig>(tree: &WorkTree<H>, node: NodeId) -> Option<H::Instance> {
    tree.node(node)?.state_node.host_instance().cloned()
}
