//! Legacy Context - Ambient values propagated down the tree.
//!
//! A class component that declares child-context keys is a *provider*: the
//! map returned by its child-context function is merged over the context it
//! received, and the result is visible to its whole subtree. Consumers only
//! see the keys they declare (see [`mask_context`]).
//!
//! ```text
//! root.context {theme: dark}
//!   └─ Provider (child keys: [lang]) → {theme: dark, lang: en}
//!        └─ Consumer (keys: [lang]) sees {lang: en}
//! ```

use crate::diagnostics::{warn_once, WarningKind};
use crate::engine::{StateNode, WorkTree};
use crate::error::{ReconcilerError, Result};
use crate::host::HostConfig;
use crate::types::{ClassComponent, ComponentHandle, ContextObject, ElementType, NodeId, Props, WorkTag};

use super::find::find_current_node;

/// Check if `ty` is a legacy context provider.
pub fn is_context_provider(ty: &ElementType) -> bool {
    match ty {
        ElementType::Class(class) => class.is_legacy_context_provider(),
        _ => false,
    }
}

/// Context visible to a subtree scheduled under `parent`.
///
/// Without a parent this is the canonical empty context, the same object on
/// every call.
pub fn get_context_for_subtree<H: HostConfig>(
    tree: &WorkTree<H>,
    parent: Option<ComponentHandle>,
) -> Result<ContextObject> {
    let Some(handle) = parent else {
        return Ok(ContextObject::empty());
    };
    let node = tree
        .instances()
        .node_for(handle)
        .ok_or_else(|| ReconcilerError::not_a_component(handle))?;

    let (current, parent_context) = find_current_unmasked_context(tree, handle, node)?;
    child_context_for(tree, current, &parent_context)
}

/// Context the mounted class component behind `handle` received.
///
/// Returns the committed copy of the node together with the context. The
/// context is rebuilt from the committed tree: the host root's context with
/// every provider ancestor's child context merged on top, outermost first.
fn find_current_unmasked_context<H: HostConfig>(
    tree: &WorkTree<H>,
    handle: ComponentHandle,
    node: NodeId,
) -> Result<(NodeId, ContextObject)> {
    let current = tree
        .instances()
        .is_mounted(handle)
        .then(|| find_current_node(tree, node))
        .flatten()
        .filter(|current| tree.node(*current).is_some_and(|n| n.tag == WorkTag::ClassComponent))
        .ok_or_else(|| {
            ReconcilerError::invariant(
                "Expected subtree parent to be a mounted class component. This error is likely \
                 caused by a bug in the reconciler.",
            )
        })?;

    let mut providers = Vec::new();
    let mut next = tree.get(current)?.return_;
    while let Some(id) = next {
        let ancestor = tree.get(id)?;
        match (&ancestor.tag, &ancestor.state_node, &ancestor.ty) {
            (WorkTag::HostRoot, StateNode::Root(root), _) => {
                let mut context = tree
                    .root(*root)
                    .and_then(|root| root.context().cloned())
                    .unwrap_or_else(ContextObject::empty);
                for provider in providers.into_iter().rev() {
                    context = child_context_for(tree, provider, &context)?;
                }
                return Ok((current, context));
            }
            (WorkTag::ClassComponent, _, Some(ty)) if is_context_provider(ty) => providers.push(id),
            _ => {}
        }
        next = ancestor.return_;
    }

    Err(ReconcilerError::invariant(
        "Found unexpected detached subtree parent. This error is likely caused by a bug in the \
         reconciler.",
    ))
}

/// Merge the child context of `class` over `parent_context`.
///
/// Every key the child-context function returns must be declared in the
/// class's child-context keys.
pub fn process_child_context(
    class: &ClassComponent,
    props: &Props,
    parent_context: &ContextObject,
) -> Result<ContextObject> {
    let Some(get_child_context) = &class.get_child_context else {
        let name = class.name.as_str();
        warn_once(WarningKind::MissingGetChildContext, name, || {
            format!(
                "{name}.childContextTypes is specified but there is no getChildContext() method \
                 on the instance. You can either define getChildContext() on {name} or remove \
                 childContextTypes from it."
            )
        });
        return Ok(parent_context.clone());
    };

    let child_context = get_child_context(props);
    let declared = class.child_context_types.as_deref().unwrap_or_default();
    if let Some(key) = child_context.keys().find(|key| !declared.contains(key)) {
        return Err(ReconcilerError::invariant(format!(
            "{}.getChildContext(): key \"{key}\" is not defined in childContextTypes.",
            class.name
        )));
    }
    Ok(parent_context.merged_with(&child_context))
}

/// Context a class node passes to its subtree.
///
/// Work loops call this when rendering a class node, with the context the
/// node itself received. Returns the merged context for providers,
/// `parent_context` otherwise. Nothing is stored: subtree lookups rebuild the
/// context from committed props.
pub fn child_context_for<H: HostConfig>(
    tree: &WorkTree<H>,
    node: NodeId,
    parent_context: &ContextObject,
) -> Result<ContextObject> {
    let work_node = tree.get(node)?;
    match &work_node.ty {
        Some(ElementType::Class(class)) if class.is_legacy_context_provider() => {
            process_child_context(class, &work_node.props, parent_context)
        }
        _ => Ok(parent_context.clone()),
    }
}

/// The part of `unmasked` that a component of type `ty` declared it reads.
///
/// Components that declare nothing see the empty context.
pub fn mask_context(unmasked: &ContextObject, ty: &ElementType) -> ContextObject {
    let declared = match ty {
        ElementType::Class(class) => class.context_types.as_ref(),
        ElementType::Function(function) => function.context_types.as_ref(),
        _ => None,
    };
    let Some(declared) = declared else {
        return ContextObject::empty();
    };

    declared
        .iter()
        .filter_map(|key| Some((key.clone(), unmasked.get(key)?.clone())))
        .collect()
}
