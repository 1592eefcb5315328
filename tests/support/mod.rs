//! Shared fixtures: a stub host and a small work loop.
//!
//! The work loop diffs by position: a child is reused when the element at the
//! same index has the same type and key, otherwise it is created fresh and the
//! old one detached. Everything it does is recorded in an [`EngineLog`].

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use spark_reconciler::{
    child_context_for, mask_context, reset_execution_context, reset_warning_state,
    ComponentHandle, ContextObject, Deadline, Element, ElementType, HostConfig, Mode, NodeId,
    Reconciler, Result, RootId, StateNode, Value, WorkLoop, WorkOutcome, WorkTag, WorkTree,
};

// =============================================================================
// Stub Host
// =============================================================================

/// Host with a manual clock. Instances and containers are labels.
#[derive(Clone, Default)]
pub struct StubHost {
    pub clock: Rc<Cell<u64>>,
    /// Timeouts of every deferred callback requested.
    pub deferred: Rc<RefCell<Vec<u64>>>,
    pub cancelled: Rc<Cell<usize>>,
}

impl StubHost {
    pub fn advance(&self, ms: u64) {
        self.clock.set(self.clock.get() + ms);
    }
}

impl HostConfig for StubHost {
    type Instance = String;
    type Container = String;
    type PublicInstance = String;

    fn get_public_instance(&self, instance: &String) -> String {
        format!("public:{instance}")
    }

    fn now(&self) -> u64 {
        self.clock.get()
    }

    fn schedule_deferred_work(&self, timeout_ms: u64) {
        self.deferred.borrow_mut().push(timeout_ms);
    }

    fn cancel_deferred_work(&self) {
        self.cancelled.set(self.cancelled.get() + 1);
    }
}

// =============================================================================
// Engine Log
// =============================================================================

/// One render pass as the work loop saw it.
#[derive(Debug, Clone)]
pub struct Render {
    pub root: RootId,
    pub deadline: Deadline,
    /// Labels of the update payloads processed, in order.
    pub applied: Vec<String>,
    /// The root context the pass rendered with.
    pub root_context: ContextObject,
}

#[derive(Default)]
pub struct EngineLog {
    pub renders: Vec<Render>,
    /// Render, commit and passive effect events, in order.
    pub events: Vec<String>,
    /// Component name → handle, latest first wins.
    pub handles: Vec<(String, ComponentHandle)>,
    /// Component name → masked context it rendered with.
    pub contexts: Vec<(String, ContextObject)>,
}

impl EngineLog {
    pub fn handle(&self, name: &str) -> ComponentHandle {
        self.handles
            .iter()
            .rev()
            .find(|(component, _)| component == name)
            .map(|(_, handle)| *handle)
            .unwrap_or_else(|| panic!("{name} was never rendered"))
    }

    pub fn context_of(&self, name: &str) -> ContextObject {
        self.contexts
            .iter()
            .rev()
            .find(|(component, _)| component == name)
            .map(|(_, context)| context.clone())
            .unwrap_or_else(|| panic!("{name} was never rendered"))
    }

    pub fn applied(&self) -> Vec<Vec<String>> {
        self.renders.iter().map(|render| render.applied.clone()).collect()
    }
}

// =============================================================================
// Stub Work Loop
// =============================================================================

pub struct StubEngine {
    log: Rc<RefCell<EngineLog>>,
    /// Yield this many async passes (after processing the queue) before finishing.
    yields: Rc<Cell<usize>>,
    /// Suspend this many passes (after processing the queue) before finishing.
    suspends: Rc<Cell<usize>>,
    /// Leave a passive effect behind on every commit.
    passive_effects: bool,
    commits: usize,
}

impl StubEngine {
    pub fn new(log: Rc<RefCell<EngineLog>>) -> Self {
        Self {
            log,
            yields: Rc::new(Cell::new(0)),
            suspends: Rc::new(Cell::new(0)),
            passive_effects: false,
            commits: 0,
        }
    }

    pub fn with_passive_effects(mut self) -> Self {
        self.passive_effects = true;
        self
    }

    pub fn with_yields(mut self, yields: Rc<Cell<usize>>) -> Self {
        self.yields = yields;
        self
    }

    pub fn with_suspends(mut self, suspends: Rc<Cell<usize>>) -> Self {
        self.suspends = suspends;
        self
    }

    fn reconcile_children(
        &mut self,
        tree: &mut WorkTree<StubHost>,
        parent: NodeId,
        current_parent: Option<NodeId>,
        elements: &[Element],
        mode: Mode,
        context: &ContextObject,
    ) -> Result<()> {
        let old = current_parent.map(|current| tree.children(current)).unwrap_or_default();
        let mut children = Vec::new();
        let mut reused = Vec::new();

        for (index, element) in elements.iter().enumerate() {
            let matching = old.get(index).copied().filter(|&old_child| {
                tree.node(old_child)
                    .is_some_and(|node| node.ty.as_ref() == Some(&element.ty) && node.key == element.key)
            });
            let child = match matching {
                Some(old_child) => {
                    reused.push(old_child);
                    let wip = tree.create_work_in_progress(old_child)?;
                    tree.get_mut(wip)?.props = element.props.clone();
                    wip
                }
                None => tree.create_node_from_element(element, mode),
            };
            let child_context = self.begin_work(tree, child, context)?;
            let child_mode = tree.get(child)?.mode;
            self.reconcile_children(tree, child, matching, &element.children, child_mode, &child_context)?;
            children.push(child);
        }

        tree.set_children(parent, &children)?;
        for old_child in old {
            if !reused.contains(&old_child) {
                tree.detach_subtree(old_child);
            }
        }
        Ok(())
    }

    /// Prepare one node; returns the context for its children.
    fn begin_work(&mut self, tree: &mut WorkTree<StubHost>, node: NodeId, context: &ContextObject) -> Result<ContextObject> {
        let (tag, ty, props) = {
            let node = tree.get(node)?;
            (node.tag, node.ty.clone(), node.props.clone())
        };
        match (tag, ty) {
            (WorkTag::ClassComponent, Some(ty)) => {
                let handle = tree.attach_component(node)?;
                let name = ty.name().unwrap_or("Component").to_string();
                let mut log = self.log.borrow_mut();
                log.handles.push((name.clone(), handle));
                log.contexts.push((name, mask_context(context, &ty)));
                drop(log);
                child_context_for(tree, node, context)
            }
            (WorkTag::FunctionComponent, Some(ty)) => {
                let name = ty.name().unwrap_or("Component").to_string();
                self.log.borrow_mut().contexts.push((name, mask_context(context, &ty)));
                Ok(context.clone())
            }
            (WorkTag::HostComponent | WorkTag::HostText, ty) => {
                let work_node = tree.get_mut(node)?;
                if matches!(work_node.state_node, StateNode::None) {
                    let label = match (&ty, props.get("text")) {
                        (Some(ElementType::Text), Some(Value::Str(text))) => text.to_string(),
                        (Some(ty), _) => ty.name().unwrap_or("host").to_string(),
                        (None, _) => "host".to_string(),
                    };
                    work_node.state_node = StateNode::Host(label);
                }
                Ok(context.clone())
            }
            (WorkTag::HostPortal, _) => {
                let container = match props.get("container") {
                    Some(Value::Str(container)) => container.to_string(),
                    _ => "portal".to_string(),
                };
                tree.get_mut(node)?.state_node = StateNode::Portal(container);
                Ok(context.clone())
            }
            _ => Ok(context.clone()),
        }
    }
}

fn label(element: Option<&Rc<Element>>) -> String {
    match element {
        None => "null".to_string(),
        Some(element) => match (&element.ty, element.props.get("label")) {
            (_, Some(Value::Str(label))) => label.to_string(),
            (ty, _) => ty.name().unwrap_or("element").to_string(),
        },
    }
}

impl WorkLoop<StubHost> for StubEngine {
    fn perform_work(
        &mut self,
        tree: &mut WorkTree<StubHost>,
        _host: &StubHost,
        root: RootId,
        deadline: Deadline,
    ) -> Result<WorkOutcome> {
        let fiber_root = tree.root(root).expect("root exists");
        let current = fiber_root.current();
        let root_context = fiber_root.context_for_render();

        let wip = tree.create_work_in_progress(current)?;
        let processed = tree.process_update_queue(wip, deadline)?;
        let applied: Vec<String> = processed
            .iter()
            .map(|update| label(update.payload.as_ref().and_then(|payload| payload.element.as_ref())))
            .collect();
        self.log.borrow_mut().events.push(format!("render:{}", applied.join(",")));
        self.log.borrow_mut().renders.push(Render {
            root,
            deadline,
            applied,
            root_context: root_context.clone(),
        });

        if deadline != Deadline::SYNC && self.yields.get() > 0 {
            self.yields.set(self.yields.get() - 1);
            return Ok(WorkOutcome::Yielded);
        }
        if self.suspends.get() > 0 {
            self.suspends.set(self.suspends.get() - 1);
            return Ok(WorkOutcome::Suspended);
        }

        // The last processed payload wins
        if let Some(update) = processed.last() {
            let element = update.payload.as_ref().and_then(|payload| payload.element.clone());
            tree.get_mut(wip)?.memoized_element = element;
        }
        let element = tree.get(wip)?.memoized_element.clone();
        let mode = tree.get(wip)?.mode;
        let elements: Vec<Element> = element.iter().map(|element| (**element).clone()).collect();
        self.reconcile_children(tree, wip, Some(current), &elements, mode, &root_context)?;
        tree.get_mut(wip)?.child_expiration_time = None;

        tree.commit_root(root, wip)?;
        self.commits += 1;
        self.log.borrow_mut().events.push(format!("commit:{}", self.commits));

        if self.passive_effects {
            let log = self.log.clone();
            let commit = self.commits;
            tree.schedule_passive_effect(move || log.borrow_mut().events.push(format!("effect:{commit}")));
        }
        Ok(WorkOutcome::Committed)
    }
}

// =============================================================================
// Setup
// =============================================================================

pub struct Harness {
    pub reconciler: Reconciler<StubHost>,
    pub host: StubHost,
    pub log: Rc<RefCell<EngineLog>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(StubEngine::new)
    }

    pub fn with_engine(build: impl FnOnce(Rc<RefCell<EngineLog>>) -> StubEngine) -> Self {
        reset_execution_context();
        reset_warning_state();
        let host = StubHost::default();
        let log = Rc::new(RefCell::new(EngineLog::default()));
        let reconciler = Reconciler::new(host.clone(), build(log.clone()));
        Self { reconciler, host, log }
    }

    pub fn root(&mut self, concurrent: bool) -> RootId {
        self.reconciler.create_container("main".to_string(), concurrent, false)
    }

    pub fn current(&self, root: RootId) -> NodeId {
        self.reconciler.tree().root(root).expect("root exists").current()
    }

    pub fn render(&mut self, root: RootId, element: Element) -> Deadline {
        self.reconciler
            .update_container(Some(element), root, None, None)
            .expect("update succeeds")
    }
}

/// A host element carrying a `label` prop, reported by the engine log.
pub fn labeled(label: &str) -> Element {
    Element::host("box").with_prop("label", label)
}
