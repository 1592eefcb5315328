//! Reconciler Engine - Work tree, root records and update queues.
//!
//! The engine manages the core data structures:
//! - Arena: Generational node slots and the pairing table
//! - Root: Root records and commit
//! - Registry: Component handle ↔ node association
//! - Update Queue: Pending updates shared by a node pair
//!
//! # Architecture
//!
//! Work nodes are NOT objects. They are slots in one arena, and every link
//! between them (child, sibling, return, alternate) is a [`NodeId`]:
//!
//! ```text
//! FiberRoot.current ──► slot 0: HostRoot ◄──pair──► slot 3: HostRoot (in progress)
//!                           │ child
//!                           ▼
//!                       slot 1: ClassComponent ──sibling──► slot 2: HostText
//! ```
//!
//! The work loop builds the in-progress tree through the same arena API and
//! calls [`WorkTree::commit_root`] when it finishes.
//!
//! [`NodeId`]: crate::types::NodeId

mod arena;
mod registry;
mod root;
mod update_queue;

pub use arena::{StateNode, WorkNode, WorkTree};
pub use registry::{ClassInstance, InstanceRegistry};
pub use root::FiberRoot;
pub use update_queue::{create_update, ProcessedUpdate, Update, UpdateCallback, UpdatePayload};
