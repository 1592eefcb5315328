//! Work Tree - Generational arena of double-buffered work nodes.
//!
//! Nodes are NOT objects linked by pointers. They are slots in one arena,
//! addressed by generational [`NodeId`]s:
//!
//! ```text
//! slot 0: HostRoot       (gen 0)  alternate → slot 3
//! slot 1: ClassComponent (gen 0)  alternate → -
//! slot 2: HostComponent  (gen 2)  alternate → -      (slot reused twice)
//! slot 3: HostRoot       (gen 0)  alternate → slot 0
//! ```
//!
//! The pairing between a committed node and its in-progress buffer lives in a
//! parallel pairing table, so the relation is symmetric by construction and
//! never an ownership edge. Commit swaps the root's `current` id; no node is
//! ever copied into another.

use std::rc::Rc;

use spark_signals::{signal, Signal};

use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::types::{
    ComponentHandle, Deadline, EffectTag, Element, ElementType, Mode, NodeId, Props, RootId,
    WorkTag,
};

use super::registry::InstanceRegistry;
use super::root::FiberRoot;
use super::update_queue::UpdateQueue;

// =============================================================================
// State Node
// =============================================================================

/// The backing value of a work node.
pub enum StateNode<H: HostConfig> {
    None,
    /// Host roots point back at their root record.
    Root(RootId),
    /// Host components and host text.
    Host(H::Instance),
    /// Class components.
    Component(ComponentHandle),
    /// Portals render into another container.
    Portal(H::Container),
}

impl<H: HostConfig> StateNode<H> {
    /// The host instance, for host-kind nodes.
    pub fn host_instance(&self) -> Option<&H::Instance> {
        match self {
            Self::Host(instance) => Some(instance),
            _ => None,
        }
    }

    /// The component handle, for class nodes.
    pub fn component(&self) -> Option<ComponentHandle> {
        match self {
            Self::Component(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl<H: HostConfig> Clone for StateNode<H> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Root(root) => Self::Root(*root),
            Self::Host(instance) => Self::Host(instance.clone()),
            Self::Component(handle) => Self::Component(*handle),
            Self::Portal(container) => Self::Portal(container.clone()),
        }
    }
}

// =============================================================================
// Work Node
// =============================================================================

/// One node of the double-buffered tree.
pub struct WorkNode<H: HostConfig> {
    pub tag: WorkTag,
    pub key: Option<Rc<str>>,
    /// Element type this node was created from (`None` for roots).
    pub ty: Option<ElementType>,
    pub state_node: StateNode<H>,

    // Tree links
    pub return_: Option<NodeId>,
    pub child: Option<NodeId>,
    pub sibling: Option<NodeId>,
    pub index: usize,

    pub props: Props,
    pub mode: Mode,
    pub effect_tag: EffectTag,

    /// Pending work on this node itself.
    pub expiration_time: Option<Deadline>,
    /// Most urgent pending work in the subtree below this node.
    pub child_expiration_time: Option<Deadline>,

    /// Host roots: the element rendered by the last processed update.
    pub memoized_element: Option<Rc<Element>>,

    pub(crate) update_queue: Option<usize>,
}

impl<H: HostConfig> WorkNode<H> {
    fn new(tag: WorkTag, ty: Option<ElementType>, key: Option<Rc<str>>, mode: Mode) -> Self {
        Self {
            tag,
            key,
            ty,
            state_node: StateNode::None,
            return_: None,
            child: None,
            sibling: None,
            index: 0,
            props: Props::new(),
            mode,
            effect_tag: EffectTag::NONE,
            expiration_time: None,
            child_expiration_time: None,
            memoized_element: None,
            update_queue: None,
        }
    }

    /// Display name of this node's type.
    pub fn component_name(&self) -> Option<&str> {
        self.ty.as_ref().and_then(ElementType::name)
    }
}

struct Slot<H: HostConfig> {
    generation: u32,
    node: Option<WorkNode<H>>,
}

// =============================================================================
// Work Tree
// =============================================================================

/// Arena holding every work node, root record and update queue of a reconciler.
pub struct WorkTree<H: HostConfig> {
    slots: Vec<Slot<H>>,
    /// Pairing table, parallel to `slots`.
    alternates: Vec<Option<NodeId>>,
    /// Pool of freed slot indices for reuse.
    free_slots: Vec<u32>,

    pub(crate) queues: Vec<Option<UpdateQueue>>,
    pub(crate) free_queues: Vec<usize>,

    pub(crate) roots: Vec<FiberRoot<H>>,
    pub(crate) instances: InstanceRegistry,

    passive_effects: Vec<Box<dyn FnOnce()>>,
    /// Nodes detached since the last `take_unmounted()`.
    unmounted: Vec<NodeId>,
    /// Total commits; observable through `commit_signal()`.
    pub(crate) commits: Signal<u64>,
}

impl<H: HostConfig> Default for WorkTree<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostConfig> WorkTree<H> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            alternates: Vec::new(),
            free_slots: Vec::new(),
            queues: Vec::new(),
            free_queues: Vec::new(),
            roots: Vec::new(),
            instances: InstanceRegistry::new(),
            passive_effects: Vec::new(),
            unmounted: Vec::new(),
            commits: signal(0),
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a detached node.
    pub fn create_node(
        &mut self,
        tag: WorkTag,
        ty: Option<ElementType>,
        key: Option<Rc<str>>,
        mode: Mode,
    ) -> NodeId {
        let node = WorkNode::new(tag, ty, key, mode);

        // Reuse free slot or allocate new
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            self.alternates[index as usize] = None;
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        self.alternates.push(None);
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Allocate a node for `element`, inheriting `mode` from its parent.
    pub fn create_node_from_element(&mut self, element: &Element, mode: Mode) -> NodeId {
        let mode = match element.ty {
            ElementType::StrictMode => mode | Mode::STRICT,
            _ => mode,
        };
        let id = self.create_node(
            element.ty.work_tag(),
            Some(element.ty.clone()),
            element.key.clone(),
            mode,
        );
        if let Some(node) = self.node_mut(id) {
            node.props = element.props.clone();
        }
        id
    }

    /// Create (or reset) the in-progress buffer paired with `current`.
    ///
    /// The buffer shares `current`'s update queue, links and pending work.
    pub fn create_work_in_progress(&mut self, current: NodeId) -> Result<NodeId> {
        let source = self.get(current)?;
        let tag = source.tag;
        let ty = source.ty.clone();
        let key = source.key.clone();
        let mode = source.mode;
        let state_node = source.state_node.clone();
        let (child, sibling, return_, index) =
            (source.child, source.sibling, source.return_, source.index);
        let props = source.props.clone();
        let expiration_time = source.expiration_time;
        let child_expiration_time = source.child_expiration_time;
        let memoized_element = source.memoized_element.clone();
        let update_queue = source.update_queue;

        let wip = match self.alternate(current) {
            Some(existing) => existing,
            None => {
                let wip = self.create_node(tag, ty, key, mode);
                self.set_pair(current, wip);
                wip
            }
        };

        let node = self.get_mut(wip)?;
        node.state_node = state_node;
        node.child = child;
        node.sibling = sibling;
        node.return_ = return_;
        node.index = index;
        node.props = props;
        node.effect_tag = EffectTag::NONE;
        node.expiration_time = expiration_time;
        node.child_expiration_time = child_expiration_time;
        node.memoized_element = memoized_element;
        node.update_queue = update_queue;
        Ok(wip)
    }

    fn set_pair(&mut self, a: NodeId, b: NodeId) {
        self.alternates[a.index as usize] = Some(b);
        self.alternates[b.index as usize] = Some(a);
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Check if `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&WorkNode<H>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut WorkNode<H>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Like [`node`](Self::node), but a stale id is an invariant violation.
    pub fn get(&self, id: NodeId) -> Result<&WorkNode<H>> {
        self.node(id)
            .ok_or_else(|| ReconcilerError::invariant(format!("work node {id:?} does not exist")))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut WorkNode<H>> {
        self.node_mut(id)
            .ok_or_else(|| ReconcilerError::invariant(format!("work node {id:?} does not exist")))
    }

    /// The paired buffer node of `id`, if both are alive.
    pub fn alternate(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }
        let pair = self.alternates[id.index as usize]?;
        self.contains(pair).then_some(pair)
    }

    /// Children of `parent` in order.
    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        let mut children = Vec::new();
        let mut next = self.node(parent).and_then(|node| node.child);
        while let Some(id) = next {
            children.push(id);
            next = self.node(id).and_then(|node| node.sibling);
        }
        children
    }

    /// The root a node belongs to, found by walking return links.
    pub fn root_of(&self, id: NodeId) -> Option<RootId> {
        let mut top = id;
        while let Some(parent) = self.node(top)?.return_ {
            top = parent;
        }
        let node = self.node(top)?;
        match (node.tag, &node.state_node) {
            (WorkTag::HostRoot, StateNode::Root(root)) => Some(*root),
            _ => None,
        }
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    // =========================================================================
    // Linking
    // =========================================================================

    /// Replace the children of `parent`, in order.
    pub fn set_children(&mut self, parent: NodeId, children: &[NodeId]) -> Result<()> {
        self.get(parent)?;
        for (index, &child) in children.iter().enumerate() {
            let sibling = children.get(index + 1).copied();
            let node = self.get_mut(child)?;
            node.return_ = Some(parent);
            node.sibling = sibling;
            node.index = index;
        }
        self.get_mut(parent)?.child = children.first().copied();
        Ok(())
    }

    /// Append `child` after the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut children = self.children(parent);
        children.push(child);
        self.set_children(parent, &children)
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Free `id`, its subtree and the paired buffers of all of them.
    ///
    /// Component handles keep their association, so lookups through them
    /// report an unmounted component instead of failing.
    pub fn detach_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !self.contains(next) {
                continue;
            }
            stack.extend(self.children(next));
            if let Some(pair) = self.alternate(next) {
                stack.extend(self.children(pair));
                self.free_node(pair);
            }
            self.free_node(next);
            self.unmounted.push(next);
        }
    }

    fn free_node(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else { return };
        let queue = node.update_queue;
        let handle = node.state_node.component();
        let pair = self.alternates[id.index as usize].filter(|pair| self.contains(*pair));

        if let Some(handle) = handle {
            self.instances.mark_unmounted(handle);
        }
        // The queue is shared by the pair; free it with the last of the two
        if pair.is_none() {
            if let Some(queue) = queue {
                self.free_queue(queue);
            }
        }

        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.alternates[id.index as usize] = None;
        self.free_slots.push(id.index);
    }

    /// Nodes detached since the last call.
    pub fn take_unmounted(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.unmounted)
    }

    // =========================================================================
    // Passive Effects
    // =========================================================================

    /// Defer a side effect of the current commit until the next flush.
    pub fn schedule_passive_effect(&mut self, effect: impl FnOnce() + 'static) {
        self.passive_effects.push(Box::new(effect));
    }

    /// Take the deferred effects of earlier commits, in commit order.
    pub(crate) fn take_passive_effects(&mut self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut self.passive_effects)
    }

    pub fn has_pending_passive_effects(&self) -> bool {
        !self.passive_effects.is_empty()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceRegistry {
        &mut self.instances
    }

    /// Back the class node `id` with a component instance.
    ///
    /// A node that already has a handle keeps it; the association moves to `id`.
    pub fn attach_component(&mut self, id: NodeId) -> Result<ComponentHandle> {
        let node = self.get(id)?;
        if node.tag != WorkTag::ClassComponent {
            return Err(ReconcilerError::invariant(format!(
                "attach_component: {id:?} is not a class component"
            )));
        }
        let handle = match node.state_node.component() {
            Some(handle) => {
                self.instances.attach_handle(handle, id);
                handle
            }
            None => self.instances.attach(id),
        };
        self.get_mut(id)?.state_node = StateNode::Component(handle);
        Ok(handle)
    }

    /// Signal carrying the number of commits so far.
    pub fn commit_signal(&self) -> Signal<u64> {
        self.commits.clone()
    }
}
