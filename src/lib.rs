//! # spark-reconciler
//!
//! Priority-scheduled tree-update coordinator for reactive UI trees.
//!
//! Commits are observable through [spark-signals](https://github.com/RLabs-Inc/spark-signals):
//! [`Reconciler::commit_signal`] is a plain signal that effects can watch.
//!
//! ## Architecture
//!
//! The reconciler accepts requests to replace the content of a mounted tree,
//! gives each one a priority deadline, queues it on the root, and asks a
//! scheduler to render the root in time. Rendering itself (walking and
//! diffing the tree) belongs to a pluggable [`WorkLoop`].
//!
//! ```text
//! update_container ─► context ─► update queue ─► schedule_work ─► WorkLoop ─► commit_root
//!                                                                                │
//!                                              find_host_instance ◄─ committed tree
//! ```
//!
//! Work nodes are slots in a generational arena. Every committed node has at
//! most one paired in-progress node, and commit swaps the root's `current`
//! id.
//!
//! ## Modules
//!
//! - [`types`] - Core types (Deadline, Element, ContextObject, NodeId, etc.)
//! - [`engine`] - Work tree arena, root records, update queues, instance registry
//! - [`scheduler`] - Priority clock, execution context, root scheduling
//! - [`reconciler`] - Public surface, context resolution, host lookups, batching
//! - [`devtools`] - Inspection tool bridge
//! - [`diagnostics`] - Development-only warnings

pub mod devtools;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod host;
pub mod reconciler;
pub mod scheduler;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use engine::{
    create_update, FiberRoot, ProcessedUpdate, StateNode, Update, UpdateCallback, UpdatePayload,
    WorkNode, WorkTree,
};

pub use error::{ReconcilerError, Result};

pub use host::HostConfig;

pub use reconciler::context::{
    child_context_for, get_context_for_subtree, is_context_provider, mask_context,
    process_child_context,
};
pub use reconciler::{PublicRootInstance, Reconciler};

pub use scheduler::context::{enter_render_phase, reset_execution_context};
pub use scheduler::{Scheduler, WorkLoop, WorkOutcome};

pub use devtools::{BundleType, DevToolsConfig, DevToolsHook, RendererId, RendererInternals};

pub use diagnostics::{reset_warning_state, take_warnings, Warning, WarningKind};
