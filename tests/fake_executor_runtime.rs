use std::sync::{Arc, Mutex};

use taskgraph::errors::TaskGraphError;
use taskgraph::{ExecutionState, FailureReason, GraphConfig, TaskGraph, TaskSpec};
use taskgraph_test_utils::{FakeExecutor, init_tracing, with_timeout};

fn fake_graph(executed: &Arc<Mutex<Vec<String>>>, failing: &[&str]) -> TaskGraph {
    let log = Arc::clone(executed);
    let failing: Vec<String> = failing.iter().map(|s| s.to_string()).collect();
    TaskGraph::with_executor(GraphConfig::new("unused").persist(false), move |tx| {
        Box::new(FakeExecutor::new(tx, log).failing(failing))
    })
    .unwrap()
}

#[tokio::test]
async fn diamond_runs_in_dependency_order() {
    init_tracing();
    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut graph = fake_graph(&executed, &[]);

    let root = graph.add_task(TaskSpec::noop("root")).unwrap();
    let left = graph.add_task(TaskSpec::noop("left").depends_on(root)).unwrap();
    let right = graph.add_task(TaskSpec::noop("right").depends_on(root)).unwrap();
    let sink = graph
        .add_task(TaskSpec::noop("sink").depends_on_all([left, right]))
        .unwrap();

    let summary = with_timeout(graph.join()).await.unwrap();
    assert_eq!(summary.counts.succeeded, 4);
    assert_eq!(graph.state(sink), Some(ExecutionState::Succeeded));

    let order = executed.lock().unwrap().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order.first().map(String::as_str), Some("root"));
    assert_eq!(order.last().map(String::as_str), Some("sink"));

    graph.close().await.unwrap();
}

#[tokio::test]
async fn failing_task_poisons_downstream_only() {
    init_tracing();
    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut graph = fake_graph(&executed, &["extract"]);

    let extract = graph.add_task(TaskSpec::noop("extract")).unwrap();
    let transform = graph
        .add_task(TaskSpec::noop("transform").depends_on(extract))
        .unwrap();
    let load = graph.add_task(TaskSpec::noop("load").depends_on(transform)).unwrap();
    let unrelated = graph.add_task(TaskSpec::noop("unrelated")).unwrap();

    let failure = match with_timeout(graph.join()).await {
        Err(TaskGraphError::TasksFailed(failure)) => failure,
        other => panic!("expected TasksFailed, got {other:?}"),
    };
    assert_eq!(failure.len(), 3);
    assert_eq!(failure.root_causes().count(), 1);
    assert_eq!(failure.first().map(|f| f.task.as_str()), Some("extract"));

    for handle in [transform, load] {
        assert_eq!(
            graph.failure(handle),
            Some(&FailureReason::UpstreamFailed {
                upstream: "extract".to_string()
            })
        );
    }
    assert_eq!(graph.state(unrelated), Some(ExecutionState::Succeeded));

    let mut order = executed.lock().unwrap().clone();
    order.sort();
    assert_eq!(order, vec!["extract", "unrelated"]);

    graph.close().await.unwrap();
}
