//! Integration tests for container updates, scheduling and batching scopes.

mod support;

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use spark_reconciler::scheduler::clock::{compute_async_expiration, compute_interactive_expiration};
use spark_reconciler::scheduler::context::{current, scoped};
use spark_reconciler::{
    enter_render_phase, take_warnings, ClassComponent, Deadline, Element, PublicRootInstance, Reconciler,
    ReconcilerError, RootId, UpdateCallback, Value, WarningKind, WorkLoop, WorkOutcome, WorkTree,
};

use support::{labeled, EngineLog, Harness, StubEngine, StubHost};

// =============================================================================
// Helper Functions
// =============================================================================

fn render_failed(_: &mut Reconciler<StubHost>) -> u32 {
    panic!("render failed")
}

fn events(h: &Harness) -> Vec<String> {
    h.log.borrow().events.clone()
}

/// Sends an update to each root of another reconciler, then renders like the
/// stub engine.
struct UpdatesOtherReconciler {
    engine: StubEngine,
    other: Rc<RefCell<Reconciler<StubHost>>>,
    targets: Vec<(RootId, &'static str)>,
}

impl WorkLoop<StubHost> for UpdatesOtherReconciler {
    fn perform_work(
        &mut self,
        tree: &mut WorkTree<StubHost>,
        host: &StubHost,
        root: RootId,
        deadline: Deadline,
    ) -> spark_reconciler::Result<WorkOutcome> {
        for &(target, label) in &self.targets {
            self.other
                .borrow_mut()
                .update_container(Some(labeled(label)), target, None, None)?;
        }
        self.engine.perform_work(tree, host, root, deadline)
    }
}

// =============================================================================
// Container Updates
// =============================================================================

#[test]
fn test_blocking_root_renders_synchronously() {
    let mut h = Harness::new();
    let root = h.root(false);

    let deadline = h.render(root, labeled("A"));

    assert_eq!(deadline, Deadline::SYNC);
    assert_eq!(h.log.borrow().applied(), vec![vec!["A".to_string()]]);
    assert_eq!(h.reconciler.tree().root(root).unwrap().commit_count(), 1);
    assert!(h.host.deferred.borrow().is_empty());
}

#[test]
fn test_updates_apply_in_insertion_order() {
    let mut h = Harness::new();
    let root = h.root(true);

    h.render(root, labeled("A"));
    h.render(root, labeled("B"));
    h.render(root, labeled("C"));
    assert!(h.log.borrow().renders.is_empty());

    h.reconciler.perform_async_work().unwrap();

    let applied = h.log.borrow().applied();
    assert_eq!(applied, vec![vec!["A", "B", "C"]]);
    let current = h.current(root);
    let tree = h.reconciler.tree();
    let memoized = tree.get(current).unwrap().memoized_element.clone().unwrap();
    assert_eq!(memoized.props.get("label"), Some(&Value::from("C")));
}

#[test]
fn test_end_to_end_update_then_update_with_callback() {
    let mut h = Harness::new();
    let root = h.root(true);

    let first = h.render(root, labeled("T1"));
    let current = h.current(root);
    {
        let tree = h.reconciler.tree();
        assert_eq!(tree.pending_updates(current).len(), 1);
        let fiber_root = tree.root(root).unwrap();
        assert!(fiber_root.context().unwrap().ptr_eq(&spark_reconciler::ContextObject::empty()));
        assert!(fiber_root.pending_context().is_none());
    }
    assert_eq!(h.host.deferred.borrow().len(), 1);

    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    let second = h
        .reconciler
        .update_container(
            Some(labeled("T1")),
            root,
            None,
            Some(UpdateCallback::new(move || seen.set(seen.get() + 1))),
        )
        .unwrap();

    assert_eq!(first, second);
    {
        let tree = h.reconciler.tree();
        let pending = tree.pending_updates(current);
        assert_eq!(pending, vec![(0, first), (1, first)]);
        // The committed context did not change, so nothing is restaged
        assert!(tree.root(root).unwrap().pending_context().is_none());
    }
    // The existing callback already fires in time
    assert_eq!(h.host.deferred.borrow().len(), 1);
    assert_eq!(calls.get(), 0);

    h.reconciler.perform_async_work().unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(h.log.borrow().applied(), vec![vec!["T1", "T1"]]);
    assert!(h.reconciler.scheduler().callback_expiration_time().is_none());
}

#[test]
fn test_null_element_unmounts_content() {
    let mut h = Harness::new();
    let root = h.root(false);

    h.render(root, Element::host("panel"));
    let instance = h.reconciler.get_public_root_instance(root).unwrap();
    assert!(matches!(instance, Some(PublicRootInstance::Host(ref public)) if public == "public:panel"));

    h.reconciler.update_container(None, root, None, None).unwrap();

    assert!(h.reconciler.get_public_root_instance(root).unwrap().is_none());
    assert_eq!(h.log.borrow().applied()[1], vec!["null".to_string()]);
}

#[test]
fn test_public_root_instance_variants() {
    let mut h = Harness::new();
    let root = h.root(false);
    assert!(h.reconciler.get_public_root_instance(root).unwrap().is_none());

    h.render(root, Element::text("hello"));
    let instance = h.reconciler.get_public_root_instance(root).unwrap();
    assert!(matches!(instance, Some(PublicRootInstance::Text(ref text)) if text == "hello"));

    let app = Rc::new(ClassComponent::new("App"));
    h.render(root, Element::class(&app).with_child(Element::host("box")));
    let handle = h.log.borrow().handle("App");
    let instance = h.reconciler.get_public_root_instance(root).unwrap();
    assert!(matches!(instance, Some(PublicRootInstance::Component(found)) if found == handle));
}

#[test]
fn test_unknown_root_is_an_error() {
    let mut h = Harness::new();
    let root = h.root(false);
    let mut other = Harness::new();
    other.root(false);
    let unknown = other.root(false);

    assert!(h.reconciler.update_container(None, unknown, None, None).is_err());
    assert!(h.reconciler.update_container(None, root, None, None).is_ok());
}

#[test]
fn test_invalid_callback_warns_and_update_still_applies() {
    let mut h = Harness::new();
    let root = h.root(false);

    h.reconciler
        .update_container(
            Some(labeled("A")),
            root,
            None,
            Some(UpdateCallback::not_callable("\"not a function\"")),
        )
        .unwrap();

    assert_eq!(h.log.borrow().applied(), vec![vec!["A".to_string()]]);
    if cfg!(debug_assertions) {
        let warnings = take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::InvalidCallback);
        assert_eq!(
            warnings[0].message,
            "render(...): Expected the last optional `callback` argument to be a function. \
             Instead received: \"not a function\"."
        );
    }
}

#[test]
fn test_nested_update_from_render_warns_once() {
    let mut h = Harness::new();
    let root = h.root(true);

    {
        let _phase = enter_render_phase("Child");
        h.render(root, labeled("A"));
        h.render(root, labeled("B"));
    }
    h.render(root, labeled("C"));

    if cfg!(debug_assertions) {
        let warnings = take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::NestedUpdate);
        assert!(warnings[0].message.ends_with("Check the render method of Child."));
    }
}

// =============================================================================
// Passive Effects
// =============================================================================

#[test]
fn test_passive_effects_run_before_the_next_update_is_created() {
    let mut h = Harness::with_engine(|log| StubEngine::new(log).with_passive_effects());
    let root = h.root(false);
    h.render(root, labeled("A"));
    assert_eq!(events(&h), vec!["render:A", "commit:1"]);

    let log = h.log.clone();
    let inside = h
        .reconciler
        .batched_updates(|r| {
            r.update_container(Some(labeled("B")), root, None, None).unwrap();
            log.borrow().events.clone()
        })
        .unwrap();

    // The effect ran while the batch was still open, before any render
    assert_eq!(inside, vec!["render:A", "commit:1", "effect:1"]);
    assert_eq!(events(&h), vec!["render:A", "commit:1", "effect:1", "render:B", "commit:2"]);
    assert!(h.reconciler.tree().has_pending_passive_effects());

    h.reconciler.flush_passive_effects();
    assert_eq!(events(&h).last().map(String::as_str), Some("effect:2"));
    assert!(!h.reconciler.tree().has_pending_passive_effects());
}

// =============================================================================
// Deadlines
// =============================================================================

#[test]
fn test_sync_scope_deadline_is_at_least_as_urgent() {
    let mut h = Harness::new();
    let root = h.root(true);

    let outside = h.render(root, labeled("async"));
    let inside = h
        .reconciler
        .sync_updates(|r| r.update_container(Some(labeled("sync")), root, None, None))
        .unwrap();

    assert_eq!(inside, Deadline::SYNC);
    assert!(!outside.is_more_urgent_than(inside));
    // The sync update rendered on its own, the async one is still pending
    assert_eq!(h.log.borrow().applied(), vec![vec!["sync".to_string()]]);
}

#[test]
fn test_concurrent_update_gets_async_bucket() {
    let mut h = Harness::new();
    let root = h.root(true);
    h.host.advance(1000);

    let now = h.reconciler.request_current_time();
    let deadline = h.render(root, labeled("A"));

    assert_eq!(deadline, compute_async_expiration(now));
    assert!(Deadline::SYNC.is_more_urgent_than(deadline));
}

#[test]
fn test_deferred_updates_use_low_priority_even_on_blocking_roots() {
    let mut h = Harness::new();
    let root = h.root(false);

    let now = h.reconciler.request_current_time();
    let deadline = h
        .reconciler
        .deferred_updates(|r| r.update_container(Some(labeled("A")), root, None, None))
        .unwrap();

    assert_eq!(deadline, compute_async_expiration(now));
    assert!(h.log.borrow().renders.is_empty());
    assert_eq!(h.host.deferred.borrow().len(), 1);

    h.reconciler.perform_async_work().unwrap();
    assert_eq!(h.log.borrow().applied(), vec![vec!["A".to_string()]]);
}

#[test]
fn test_interactive_updates_flush_before_async_work() {
    let mut h = Harness::new();
    let background = h.root(true);
    let input = h.root(true);

    let now = h.reconciler.request_current_time();
    let slow = h.render(background, labeled("background"));
    let fast = h
        .reconciler
        .interactive_updates(|r| r.update_container(Some(labeled("input")), input, None, None))
        .unwrap()
        .unwrap();

    assert_eq!(fast, compute_interactive_expiration(now));
    assert!(fast.is_more_urgent_than(slow));
    assert!(h.log.borrow().renders.is_empty());

    h.reconciler.flush_interactive_updates().unwrap();
    {
        let log = h.log.borrow();
        assert_eq!(log.renders.len(), 1);
        assert_eq!(log.renders[0].root, input);
    }

    h.reconciler.perform_async_work().unwrap();
    let log = h.log.borrow();
    assert_eq!(log.renders.len(), 2);
    assert_eq!(log.renders[1].root, background);
}

#[test]
fn test_most_urgent_root_renders_first() {
    let mut h = Harness::new();
    let background = h.root(true);
    let input = h.root(true);

    h.render(background, labeled("background"));
    h.reconciler
        .interactive_updates(|r| r.update_container(Some(labeled("input")), input, None, None))
        .unwrap()
        .unwrap();
    h.reconciler.perform_async_work().unwrap();

    let order: Vec<_> = h.log.borrow().renders.iter().map(|render| render.root).collect();
    assert_eq!(order, vec![input, background]);
    assert!(h.reconciler.scheduler().scheduled_roots().is_empty());
}

#[test]
fn test_update_at_explicit_expiration_time() {
    let mut h = Harness::new();
    let root = h.root(true);

    let deadline = h
        .reconciler
        .update_container_at_expiration_time(Some(labeled("A")), root, None, Deadline::SYNC, None)
        .unwrap();

    assert_eq!(deadline, Deadline::SYNC);
    assert_eq!(h.log.borrow().renders.len(), 1);
}

// =============================================================================
// Batching Scopes
// =============================================================================

#[test]
fn test_batched_updates_coalesce_into_one_render() {
    let mut h = Harness::new();
    let root = h.root(false);

    h.reconciler
        .batched_updates(|r| {
            for label in ["A", "B", "C"] {
                r.update_container(Some(labeled(label)), root, None, None).unwrap();
            }
        })
        .unwrap();

    assert_eq!(h.log.borrow().applied(), vec![vec!["A", "B", "C"]]);
}

#[test]
fn test_nested_batches_flush_at_the_outermost_end() {
    let mut h = Harness::new();
    let root = h.root(false);
    let log = h.log.clone();

    h.reconciler
        .batched_updates(|r| {
            r.batched_updates(|r| r.update_container(Some(labeled("A")), root, None, None).unwrap())
                .unwrap();
            assert!(log.borrow().renders.is_empty());
        })
        .unwrap();

    assert_eq!(h.log.borrow().renders.len(), 1);
}

#[test]
fn test_unbatched_updates_render_immediately() {
    let mut h = Harness::new();
    let root = h.root(false);
    let log = h.log.clone();

    h.reconciler
        .batched_updates(|r| {
            r.unbatched_updates(|r| r.update_container(Some(labeled("A")), root, None, None).unwrap());
            assert_eq!(log.borrow().renders.len(), 1);
            r.update_container(Some(labeled("B")), root, None, None).unwrap();
            assert_eq!(log.borrow().renders.len(), 1);
        })
        .unwrap();

    assert_eq!(h.log.borrow().applied(), vec![vec!["A"], vec!["B"]]);
}

#[test]
fn test_flush_sync_renders_before_returning() {
    let mut h = Harness::new();
    let root = h.root(true);

    let value = h
        .reconciler
        .flush_sync(|r| {
            r.update_container(Some(labeled("A")), root, None, None).unwrap();
            7
        })
        .unwrap();

    assert_eq!(value, 7);
    let log = h.log.borrow();
    assert_eq!(log.renders.len(), 1);
    assert_eq!(log.renders[0].deadline, Deadline::SYNC);
}

#[test]
fn test_flush_sync_while_rendering_is_an_invariant_violation() {
    let mut h = Harness::new();
    let _rendering = scoped(|ctx| ctx.is_rendering = true);

    let result = h.reconciler.flush_sync(|_| ());

    assert!(matches!(result, Err(ReconcilerError::InvariantViolation(_))));
}

#[test]
fn test_flush_controlled_renders_sync_on_exit() {
    let mut h = Harness::new();
    let root = h.root(true);

    h.reconciler
        .flush_controlled(|r| {
            r.update_container(Some(labeled("A")), root, None, None).unwrap();
        })
        .unwrap();

    let log = h.log.borrow();
    assert_eq!(log.renders.len(), 1);
    assert_eq!(log.renders[0].deadline, Deadline::SYNC);
}

#[test]
fn test_flush_root_renders_pending_async_work_now() {
    let mut h = Harness::new();
    let root = h.root(true);

    let deadline = h.render(root, labeled("A"));
    h.reconciler.flush_root(root, deadline).unwrap();

    assert_eq!(h.log.borrow().applied(), vec![vec!["A".to_string()]]);
}

#[test]
fn test_scope_is_restored_after_a_panic() {
    let mut h = Harness::new();
    let before = current();

    let result = catch_unwind(AssertUnwindSafe(|| h.reconciler.batched_updates(render_failed)));
    assert!(result.is_err());
    assert_eq!(current(), before);

    let result = catch_unwind(AssertUnwindSafe(|| h.reconciler.sync_updates(render_failed)));
    assert!(result.is_err());
    assert_eq!(current(), before);
    assert!(current().expiration_context.is_none());
}

#[test]
fn test_nested_update_limit() {
    let mut h = Harness::new();
    let root = h.root(false);

    let results = h
        .reconciler
        .batched_updates(|r| {
            (0..60)
                .map(|i| {
                    let label = format!("update {i}");
                    r.unbatched_updates(|r| r.update_container(Some(labeled(&label)), root, None, None))
                })
                .collect::<Vec<_>>()
        })
        .unwrap();

    assert!(results[..51].iter().all(Result::is_ok));
    match &results[51] {
        Err(ReconcilerError::InvariantViolation(message)) => {
            assert!(message.starts_with("Maximum update depth exceeded."));
        }
        other => panic!("expected the update limit, got {other:?}"),
    }
}

// =============================================================================
// Interrupted Passes
// =============================================================================

#[test]
fn test_yielded_pass_keeps_its_updates() {
    let yields = Rc::new(Cell::new(1));
    let budget = yields.clone();
    let mut h = Harness::with_engine(move |log| StubEngine::new(log).with_yields(budget));
    let root = h.root(true);

    let first = h.render(root, labeled("A"));
    h.reconciler.perform_async_work().unwrap();
    assert_eq!(yields.get(), 0);
    assert_eq!(h.reconciler.tree().root(root).unwrap().commit_count(), 0);
    assert_eq!(h.reconciler.tree().pending_updates(h.current(root)).len(), 1);

    // Not folded into the interrupted pass
    let second = h.render(root, labeled("B"));
    assert_eq!(second.raw(), first.raw() + 1);

    h.reconciler.perform_async_work().unwrap();

    assert_eq!(h.log.borrow().applied(), vec![vec!["A"], vec!["A"], vec!["B"]]);
    assert_eq!(h.reconciler.tree().root(root).unwrap().commit_count(), 2);
}

#[test]
fn test_suspended_pass_keeps_its_updates() {
    let suspends = Rc::new(Cell::new(1));
    let budget = suspends.clone();
    let mut h = Harness::with_engine(move |log| StubEngine::new(log).with_suspends(budget));
    let root = h.root(false);

    h.render(root, labeled("A"));
    assert_eq!(suspends.get(), 0);
    assert_eq!(h.reconciler.tree().root(root).unwrap().commit_count(), 0);
    assert_eq!(h.reconciler.tree().pending_updates(h.current(root)).len(), 1);
    assert!(h.reconciler.scheduler().scheduled_roots().is_empty());
    assert_eq!(h.reconciler.tree().root(root).unwrap().expiration_time(), None);

    h.render(root, labeled("B"));

    assert_eq!(h.log.borrow().applied(), vec![vec!["A"], vec!["A", "B"]]);
    assert_eq!(h.reconciler.tree().root(root).unwrap().commit_count(), 1);
    assert!(h.reconciler.tree().pending_updates(h.current(root)).is_empty());
}

// =============================================================================
// Multiple Reconcilers
// =============================================================================

#[test]
fn test_update_to_another_reconciler_during_a_render_is_not_lost() {
    let mut b = Harness::new();
    let blocking = b.root(false);
    let concurrent = b.root(true);
    let Harness {
        reconciler,
        host: b_host,
        log: b_log,
    } = b;
    let other = Rc::new(RefCell::new(reconciler));

    let a_log = Rc::new(RefCell::new(EngineLog::default()));
    let engine = UpdatesOtherReconciler {
        engine: StubEngine::new(a_log.clone()),
        other: other.clone(),
        targets: vec![(blocking, "B"), (concurrent, "C")],
    };
    let mut a = Reconciler::new(StubHost::default(), engine);
    let a_root = a.create_container("a".to_string(), false, false);
    a.update_container(Some(labeled("A")), a_root, None, None).unwrap();

    assert_eq!(a_log.borrow().applied(), vec![vec!["A"]]);
    assert!(!current().is_rendering);

    // The blocking root rendered synchronously, inside the other pass
    let b_renders: Vec<_> = b_log
        .borrow()
        .renders
        .iter()
        .map(|render| (render.root, render.applied.clone()))
        .collect();
    assert_eq!(b_renders, vec![(blocking, vec!["B".to_string()])]);
    let other = other.borrow();
    assert_eq!(other.tree().root(blocking).unwrap().commit_count(), 1);

    // The concurrent root was deferred to its own host at an async deadline
    assert_eq!(other.scheduler().scheduled_roots(), &[concurrent]);
    assert_eq!(b_host.deferred.borrow().len(), 1);
    let deadline = other.tree().root(concurrent).unwrap().expiration_time().unwrap();
    assert_ne!(deadline, Deadline::SYNC);
}

// =============================================================================
// Commit Signal
// =============================================================================

#[test]
fn test_commit_signal_drives_effects() {
    let mut h = Harness::new();
    let root = h.root(false);
    let commits = h.reconciler.commit_signal();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let record = seen.clone();
    let _effect = spark_signals::effect(move || record.borrow_mut().push(commits.get()));

    h.render(root, labeled("A"));
    h.render(root, labeled("B"));

    assert_eq!(*seen.borrow(), vec![0, 1, 2]);
}
