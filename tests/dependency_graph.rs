use std::path::PathBuf;

use taskgraph::FailureReason;
use taskgraph::dag::{DependencyGraph, ExecutionState, TaskSpec};
use taskgraph::errors::TaskGraphError;

fn noop(name: &str) -> TaskSpec {
    TaskSpec::noop(name)
}

#[test]
fn inputs_matching_outputs_create_dependencies() {
    let mut g = DependencyGraph::new();
    let a = g.add_task(noop("a").output("ws/a.tif")).unwrap();
    let b = g.add_task(noop("b").output("ws/b.tif")).unwrap();
    let merge = g
        .add_task(noop("merge").inputs(["ws/a.tif", "./ws/b.tif"]).output("ws/final.tif"))
        .unwrap();

    assert_eq!(g.dependencies_of(merge), vec![a, b]);
    assert_eq!(g.producer_of(&PathBuf::from("./ws/final.tif")), Some(merge));
    assert_eq!(g.ready_tasks(), vec![a, b]);
    assert_eq!(g.state(merge), Some(ExecutionState::Pending));
}

#[test]
fn dependents_unblock_only_when_every_dependency_is_done() {
    let mut g = DependencyGraph::new();
    let a = g.add_task(noop("a")).unwrap();
    let b = g.add_task(noop("b")).unwrap();
    let c = g.add_task(noop("c").depends_on(a).depends_on(b)).unwrap();

    assert_eq!(g.ready_tasks(), vec![a, b]);
    g.mark_running(a);
    g.mark_running(b);

    assert!(g.mark_succeeded(a).is_empty());
    assert!(!g.has_ready());

    assert!(g.mark_skipped(b).is_empty(), "a running task cannot be skipped");
    assert_eq!(g.mark_succeeded(b), vec![c]);
    assert_eq!(g.ready_tasks(), vec![c]);
}

#[test]
fn ready_order_is_priority_then_submission() {
    let mut g = DependencyGraph::new();
    let low = g.add_task(noop("low")).unwrap();
    let high = g.add_task(noop("high").priority(5)).unwrap();
    let also_low = g.add_task(noop("also_low")).unwrap();

    assert_eq!(g.ready_tasks(), vec![high, low, also_low]);
}

#[test]
fn cycle_is_rejected_without_mutation() {
    let mut g = DependencyGraph::new();
    // `consumer` reads x.tif and writes y.tif; nobody produces x.tif yet.
    g.add_task(noop("consumer").input("x.tif").output("y.tif")).unwrap();
    let before = g.counts();

    // Producing x.tif from y.tif closes the loop consumer -> producer -> consumer.
    let err = g
        .add_task(noop("producer").input("y.tif").output("x.tif"))
        .unwrap_err();

    match err {
        TaskGraphError::Cycle { task, path } => {
            assert_eq!(task, "producer");
            assert_eq!(path.first().map(String::as_str), Some("producer"));
            assert_eq!(path.last().map(String::as_str), Some("producer"));
            assert!(path.contains(&"consumer".to_string()));
        }
        other => panic!("expected cycle, got {other:?}"),
    }

    assert_eq!(g.len(), 1);
    assert_eq!(g.counts(), before);
    assert!(g.handle_of("producer").is_none());
    assert!(g.producer_of(&PathBuf::from("x.tif")).is_none());

    // The name and output are still free after the rejection.
    g.add_task(noop("producer").output("x.tif")).unwrap();
}

#[test]
fn duplicate_names_and_outputs_are_rejected() {
    let mut g = DependencyGraph::new();
    g.add_task(noop("warp").output("out.tif")).unwrap();

    assert!(matches!(
        g.add_task(noop("warp")),
        Err(TaskGraphError::DuplicateName(name)) if name == "warp"
    ));
    assert!(matches!(
        g.add_task(noop("other").output("./out.tif")),
        Err(TaskGraphError::DuplicateOutput { owner, .. }) if owner == "warp"
    ));
    assert_eq!(g.len(), 1);
}

#[test]
fn failure_poisons_transitive_dependents_only() {
    let mut g = DependencyGraph::new();
    let a = g.add_task(noop("a")).unwrap();
    let b = g.add_task(noop("b").depends_on(a)).unwrap();
    let c = g.add_task(noop("c").depends_on(b)).unwrap();
    let independent = g.add_task(noop("independent")).unwrap();

    g.ready_tasks();
    g.mark_running(a);
    let poisoned = g.mark_failed(a, FailureReason::execution("boom"));

    assert_eq!(poisoned, vec![b, c]);
    for h in [b, c] {
        assert_eq!(g.state(h), Some(ExecutionState::Failed));
        assert_eq!(
            g.failure(h),
            Some(&FailureReason::UpstreamFailed {
                upstream: "a".to_string()
            })
        );
    }
    assert_eq!(g.state(independent), Some(ExecutionState::Ready));
    assert_eq!(g.drain_failed(), vec![a, b, c]);
    assert!(!g.is_drained());
}

#[test]
fn unknown_dependency_handle_is_rejected() {
    let mut g = DependencyGraph::new();
    let a = g.add_task(noop("a")).unwrap();
    let mut other = DependencyGraph::new();
    other.add_task(noop("x")).unwrap();
    let foreign = other.add_task(noop("y")).unwrap();

    assert!(matches!(
        g.add_task(noop("b").depends_on(foreign)),
        Err(TaskGraphError::UnknownDependency { .. })
    ));
    g.add_task(noop("b").depends_on(a)).unwrap();
}

#[test]
fn execution_order_respects_edges() {
    let mut g = DependencyGraph::new();
    let merge = g.add_task(noop("merge").inputs(["a", "b"])).unwrap();
    let a = g.add_task(noop("a").output("a")).unwrap();
    let b = g.add_task(noop("b").output("b")).unwrap();

    let order = g.execution_order().unwrap();
    let pos = |h| order.iter().position(|x| *x == h).unwrap();
    assert!(pos(a) < pos(merge));
    assert!(pos(b) < pos(merge));
    assert_eq!(g.dependencies_of(merge), vec![a, b]);
}

#[test]
fn cancel_fails_everything_not_yet_running() {
    let mut g = DependencyGraph::new();
    let a = g.add_task(noop("a")).unwrap();
    let b = g.add_task(noop("b").depends_on(a)).unwrap();
    let c = g.add_task(noop("c")).unwrap();

    g.ready_tasks();
    g.mark_running(a);
    let cancelled = g.cancel_pending();

    assert_eq!(cancelled, vec![b, c]);
    assert_eq!(g.failure(c), Some(&FailureReason::Cancelled));
    assert_eq!(g.state(a), Some(ExecutionState::Running));

    g.mark_succeeded(a);
    assert!(g.is_drained());
    assert!(!g.has_ready());
}
