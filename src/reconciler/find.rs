//! Host Resolution - From a work node to the host node(s) backing it.
//!
//! Lookups always go through the committed tree: a node of an unfinished pass
//! is never returned, whichever copy of a pair the caller holds.

use crate::engine::{StateNode, WorkTree};
use crate::host::HostConfig;
use crate::types::{NodeId, WorkTag};

/// The committed copy of `node`, or `None` if it is no longer mounted.
pub fn find_current_node<H: HostConfig>(tree: &WorkTree<H>, node: NodeId) -> Option<NodeId> {
    let pair = tree.alternate(node);

    let mut top = node;
    while let Some(parent) = tree.node(top)?.return_ {
        top = parent;
    }
    let top_node = tree.node(top)?;
    let StateNode::Root(root) = top_node.state_node else {
        return None;
    };
    if top_node.tag != WorkTag::HostRoot {
        return None;
    }
    let current_root = tree.root(root)?.current();

    // Search the committed tree for either copy of the pair
    let mut stack = vec![current_root];
    while let Some(next) = stack.pop() {
        if next == node || Some(next) == pair {
            return Some(next);
        }
        let mut children = tree.children(next);
        children.reverse();
        stack.extend(children);
    }
    None
}

/// First host node at or below the committed copy of `node`, in tree order.
pub fn find_current_host_node<H: HostConfig>(tree: &WorkTree<H>, node: NodeId) -> Option<NodeId> {
    let current = find_current_node(tree, node)?;
    first_host_node(tree, current, true)
}

/// Like [`find_current_host_node`], but never looks inside portals.
pub fn find_current_host_node_with_no_portals<H: HostConfig>(
    tree: &WorkTree<H>,
    node: NodeId,
) -> Option<NodeId> {
    let current = find_current_node(tree, node)?;
    first_host_node(tree, current, false)
}

fn first_host_node<H: HostConfig>(tree: &WorkTree<H>, start: NodeId, enter_portals: bool) -> Option<NodeId> {
    let mut stack = vec![start];
    while let Some(next) = stack.pop() {
        let node = tree.node(next)?;
        if node.tag.is_host() {
            return Some(next);
        }
        if node.tag == WorkTag::HostPortal && !enter_portals {
            continue;
        }
        let mut children = tree.children(next);
        children.reverse();
        stack.extend(children);
    }
    None
}
