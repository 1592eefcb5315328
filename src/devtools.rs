//! DevTools Bridge - Read-only surface for inspection tools.
//!
//! An inspection tool registers a [`DevToolsHook`]. On registration the
//! reconciler hands it [`RendererInternals`]: two lookups between work nodes
//! and host instances. After that, every commit is reported to the hook.
//!
//! The hook is external code. Its failures are logged and never surface as
//! reconciler errors.

use std::error::Error;
use std::fmt;
use std::rc::Rc;

use crate::diagnostics::{report_error, warn, WarningKind};
use crate::types::{NodeId, RootId};

// =============================================================================
// Types
// =============================================================================

/// Build flavor reported to inspection tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundleType {
    Production,
    #[default]
    Development,
}

/// Id the hook assigned to this renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RendererId(pub u32);

/// Error type of hook callbacks.
pub type HookError = Box<dyn Error>;

/// Work node → nearest host instance at or below it.
pub type FindHostInstanceByNode<I> = Rc<dyn Fn(NodeId) -> Option<I>>;

/// Host instance → the work node that owns it.
pub type FindNodeByHostInstance<I> = Rc<dyn Fn(&I) -> Option<NodeId>>;

/// What the reconciler hands to an inspection tool.
pub struct RendererInternals<I> {
    pub bundle_type: BundleType,
    pub version: String,
    pub renderer_package_name: String,
    pub find_host_instance_by_node: FindHostInstanceByNode<I>,
    pub find_node_by_host_instance: FindNodeByHostInstance<I>,
}

impl<I> fmt::Debug for RendererInternals<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererInternals")
            .field("bundle_type", &self.bundle_type)
            .field("version", &self.version)
            .field("renderer_package_name", &self.renderer_package_name)
            .finish_non_exhaustive()
    }
}

/// The inspection tool side of the bridge.
pub trait DevToolsHook<I> {
    /// A disabled hook accepts registration without being injected.
    fn is_disabled(&self) -> bool {
        false
    }

    /// Hooks too old to understand work nodes are not injected.
    fn supports_work_nodes(&self) -> bool {
        true
    }

    fn inject(&self, internals: RendererInternals<I>) -> Result<RendererId, HookError>;

    fn on_commit_root(&self, renderer: RendererId, root: RootId, current: NodeId) -> Result<(), HookError> {
        let _ = (renderer, root, current);
        Ok(())
    }

    fn on_commit_unmount(&self, renderer: RendererId, node: NodeId) -> Result<(), HookError> {
        let _ = (renderer, node);
        Ok(())
    }
}

/// Registration request for an inspection tool.
pub struct DevToolsConfig<I> {
    /// The installed hook, if any.
    pub hook: Option<Rc<dyn DevToolsHook<I>>>,
    pub bundle_type: BundleType,
    pub version: String,
    pub renderer_package_name: String,
    /// Host instance → node lookup supplied by the renderer.
    pub find_node_by_host_instance: Option<FindNodeByHostInstance<I>>,
}

impl<I> Default for DevToolsConfig<I> {
    fn default() -> Self {
        Self {
            hook: None,
            bundle_type: BundleType::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            renderer_package_name: String::new(),
            find_node_by_host_instance: None,
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// An injected hook.
pub(crate) struct DevToolsBinding<I> {
    hook: Rc<dyn DevToolsHook<I>>,
    renderer: RendererId,
}

impl<I> DevToolsBinding<I> {
    pub(crate) fn on_commit_root(&self, root: RootId, current: NodeId) {
        if let Err(err) = self.hook.on_commit_root(self.renderer, root, current) {
            report_hook_error(&*err);
        }
    }

    pub(crate) fn on_commit_unmount(&self, node: NodeId) {
        if let Err(err) = self.hook.on_commit_unmount(self.renderer, node) {
            report_hook_error(&*err);
        }
    }
}

/// Result of registering a hook.
pub(crate) enum Injection<I> {
    /// No hook is installed.
    NoHook,
    /// A hook exists but was not injected (disabled, too old, or it failed).
    Skipped,
    Bound(DevToolsBinding<I>),
}

impl<I> Injection<I> {
    /// Check if registration counts as successful.
    pub(crate) fn registered(&self) -> bool {
        !matches!(self, Self::NoHook)
    }
}

/// Validate `config` and inject the internals into its hook.
pub(crate) fn inject_internals<I: 'static>(
    config: DevToolsConfig<I>,
    find_host_instance_by_node: FindHostInstanceByNode<I>,
) -> Injection<I> {
    let Some(hook) = config.hook else {
        return Injection::NoHook;
    };
    if hook.is_disabled() {
        return Injection::Skipped;
    }
    if !hook.supports_work_nodes() {
        warn(WarningKind::DevTools, || {
            "The installed version of DevTools is too old and will not work with the current \
             version of the reconciler. Please update DevTools."
                .to_string()
        });
        return Injection::Skipped;
    }

    let find_node_by_host_instance: FindNodeByHostInstance<I> = match config.find_node_by_host_instance {
        Some(lookup) => lookup,
        None => Rc::new(|_: &I| -> Option<NodeId> { None }),
    };
    let internals = RendererInternals {
        bundle_type: config.bundle_type,
        version: config.version,
        renderer_package_name: config.renderer_package_name,
        find_host_instance_by_node,
        find_node_by_host_instance,
    };

    match hook.inject(internals) {
        Ok(renderer) => {
            log::debug!(target: "spark_reconciler", "injected into devtools as {renderer:?}");
            Injection::Bound(DevToolsBinding { hook, renderer })
        }
        Err(err) => {
            report_hook_error(&*err);
            Injection::Skipped
        }
    }
}

fn report_hook_error(err: &dyn Error) {
    report_error(WarningKind::DevTools, || format!("DevTools encountered an error: {err}"));
}
