//! Instance Registry - Handle ↔ work node association.
//!
//! Manages the lifecycle of composite component instances:
//! - Handle → node mapping (the "internal association" of a handle)
//! - Node → handle mapping for reverse lookups
//! - Mounted flag per instance
//!
//! Associations survive unmounting. A handle whose node is gone resolves to a
//! stale [`NodeId`], which lookups report as "unmounted" rather than as a
//! foreign object.

use std::collections::HashMap;

use crate::types::{ComponentHandle, NodeId};

// =============================================================================
// Instance Record
// =============================================================================

/// Bookkeeping for one composite component instance.
#[derive(Debug, Clone)]
pub struct ClassInstance {
    /// Node the instance was last attached to (either copy of a pair).
    pub node: NodeId,
    pub mounted: bool,
}

// =============================================================================
// Registry
// =============================================================================

/// Map between component handles and the work nodes backing them.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    /// Map handle to instance record.
    handle_to_instance: HashMap<ComponentHandle, ClassInstance>,

    /// Map node slot index to handle.
    index_to_handle: HashMap<u32, ComponentHandle>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a handle for a new instance backed by `node`.
    pub fn attach(&mut self, node: NodeId) -> ComponentHandle {
        let handle = ComponentHandle::component();
        self.attach_handle(handle, node);
        handle
    }

    /// Associate an existing handle with `node`.
    ///
    /// Re-attaching moves the association (e.g. onto the paired buffer).
    pub fn attach_handle(&mut self, handle: ComponentHandle, node: NodeId) {
        if let Some(previous) = self.handle_to_instance.get(&handle) {
            self.index_to_handle.remove(&previous.node.index);
        }
        self.handle_to_instance.insert(
            handle,
            ClassInstance {
                node,
                mounted: true,
            },
        );
        self.index_to_handle.insert(node.index, handle);
    }

    /// Mark the instance as unmounted. The association itself is kept.
    pub fn mark_unmounted(&mut self, handle: ComponentHandle) {
        if let Some(instance) = self.handle_to_instance.get_mut(&handle) {
            instance.mounted = false;
            self.index_to_handle.remove(&instance.node.index);
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn get(&self, handle: ComponentHandle) -> Option<&ClassInstance> {
        self.handle_to_instance.get(&handle)
    }

    /// Node associated with a handle (possibly stale if unmounted).
    pub fn node_for(&self, handle: ComponentHandle) -> Option<NodeId> {
        self.get(handle).map(|instance| instance.node)
    }

    /// Handle of the instance occupying a node slot.
    pub fn handle_for(&self, node: NodeId) -> Option<ComponentHandle> {
        let handle = self.index_to_handle.get(&node.index)?;
        let instance = self.handle_to_instance.get(handle)?;
        (instance.node == node).then_some(*handle)
    }

    pub fn is_mounted(&self, handle: ComponentHandle) -> bool {
        self.get(handle).is_some_and(|instance| instance.mounted)
    }

    /// Count of currently mounted instances.
    pub fn mounted_count(&self) -> usize {
        self.handle_to_instance
            .values()
            .filter(|instance| instance.mounted)
            .count()
    }

    /// Reset all registry state (for testing).
    pub fn clear(&mut self) {
        self.handle_to_instance.clear();
        self.index_to_handle.clear();
    }
}
