use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use taskgraph::errors::TaskGraphError;
use taskgraph::exec::{ExecutorConfig, RemoteConfig};
use taskgraph::ops::{CommandOperation, CopyOperation, FnOperation, OperationRegistry};
use taskgraph::{ExecutionState, FailureReason, GraphConfig, TaskGraph, TaskSpec, worker};
use taskgraph_test_utils::{ExecLog, concat_task, init_tracing, with_timeout, write_task};
use tokio::net::TcpListener;

async fn spawn_worker() -> String {
    spawn_worker_with_heartbeat(Duration::from_millis(100)).await
}

async fn spawn_worker_with_heartbeat(heartbeat: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(OperationRegistry::with_builtins());
    tokio::spawn(worker::serve(listener, registry, heartbeat));
    addr.to_string()
}

/// Accepts connections and reads requests but never answers, like a
/// worker whose host froze.
async fn silent_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr.to_string()
}

/// An address nothing listens on.
async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn synchronous_executor_runs_the_whole_graph() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path();
    let log = ExecLog::new();

    let mut graph = TaskGraph::new(GraphConfig::for_workspace(ws).n_workers(-1)).unwrap();
    let a = ws.join("a.txt");
    let b = ws.join("b.txt");
    graph.add_task(write_task("a", &a, "A", &log)).unwrap();
    graph.add_task(write_task("b", &b, "B", &log)).unwrap();
    graph.add_task(concat_task("ab", &[a, b], ws.join("ab.txt"), &log)).unwrap();

    let summary = with_timeout(graph.join()).await.unwrap();
    assert_eq!(summary.counts.succeeded, 3);
    assert_eq!(log.names(), ["a", "b", "ab"]);
    graph.close().await.unwrap();
}

#[tokio::test]
async fn synchronous_executor_runs_external_commands() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path();
    let out = ws.join("out.txt");

    let mut graph = TaskGraph::new(GraphConfig::for_workspace(ws).n_workers(-1)).unwrap();
    let h = graph
        .add_task(
            TaskSpec::new(
                "write with sh",
                CommandOperation::new("sh").args(["-c", &format!("printf hi > {}", out.display())]),
            )
            .output(&out),
        )
        .unwrap();

    with_timeout(graph.join()).await.unwrap();
    assert_eq!(graph.result(h), Some(&json!({ "exit_code": 0 })));
    assert_eq!(fs::read_to_string(&out).unwrap(), "hi");
    graph.close().await.unwrap();
}

#[tokio::test]
async fn zero_workers_means_a_single_background_worker() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path();
    let log = ExecLog::new();

    let mut graph = TaskGraph::new(GraphConfig::for_workspace(ws).n_workers(0)).unwrap();
    for i in 0..4 {
        graph
            .add_task(write_task(&format!("t{i}"), ws.join(format!("{i}.txt")), "x", &log))
            .unwrap();
    }
    with_timeout(graph.join()).await.unwrap();
    assert_eq!(log.len(), 4);
    graph.close().await.unwrap();
}

#[tokio::test]
async fn local_pool_bounds_concurrency() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Local { workers: 2 })
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();

    for i in 0..6 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let op = FnOperation::new("busy", json!({ "i": i }), move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(i))
        });
        graph.add_task(TaskSpec::new(format!("busy {i}"), op)).unwrap();
    }

    with_timeout(graph.join()).await.unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    graph.close().await.unwrap();
}

#[tokio::test]
async fn panicking_body_fails_only_its_task() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path();
    let log = ExecLog::new();

    let mut graph = TaskGraph::new(GraphConfig::for_workspace(ws).n_workers(2)).unwrap();
    let boom = FnOperation::new("boom", json!({}), || panic!("worker exploded"));
    let h = graph.add_task(TaskSpec::new("boom", boom)).unwrap();
    graph.add_task(write_task("fine", ws.join("fine.txt"), "ok", &log)).unwrap();

    let err = with_timeout(graph.join()).await.unwrap_err();
    assert!(matches!(err, TaskGraphError::TasksFailed(ref f) if f.len() == 1));
    match graph.failure(h) {
        Some(FailureReason::Execution { message }) => assert!(message.contains("worker exploded")),
        other => panic!("unexpected failure {other:?}"),
    }
    assert_eq!(log.count("fine"), 1);
    graph.close().await.unwrap();
}

#[tokio::test]
async fn remote_workers_run_registry_operations() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path();
    let endpoint = spawn_worker().await;

    let source = ws.join("source.tif");
    fs::write(&source, b"raster bytes").unwrap();
    let copied = ws.join("out/copied.tif");

    let config = GraphConfig::for_workspace(ws)
        .executor(ExecutorConfig::Remote(RemoteConfig::new(vec![endpoint.clone()])));
    let mut graph = TaskGraph::new(config).unwrap();
    let copy = graph
        .add_task(
            TaskSpec::new("copy", CopyOperation::new(&source, &copied))
                .input(&source)
                .output(&copied),
        )
        .unwrap();
    let bad = graph
        .add_task(TaskSpec::new(
            "bad command",
            CommandOperation::new("sh").args(["-c", "echo nope >&2; exit 3"]),
        ))
        .unwrap();

    let err = with_timeout(graph.join()).await.unwrap_err();
    assert!(matches!(err, TaskGraphError::TasksFailed(ref f) if f.len() == 1));
    assert_eq!(graph.state(copy), Some(ExecutionState::Succeeded));
    assert_eq!(graph.result(copy), Some(&json!({ "bytes": 12 })));
    assert_eq!(fs::read(&copied).unwrap(), b"raster bytes");
    match graph.failure(bad) {
        Some(FailureReason::Execution { message }) => {
            assert!(message.contains("exited with code 3"), "{message}");
            assert!(message.contains("nope"), "{message}");
        }
        other => panic!("unexpected failure {other:?}"),
    }
    graph.close().await.unwrap();

    // A second coordinator finds the copy up to date.
    let config = GraphConfig::for_workspace(ws)
        .executor(ExecutorConfig::Remote(RemoteConfig::new(vec![endpoint])));
    let mut graph = TaskGraph::new(config).unwrap();
    let copy = graph
        .add_task(
            TaskSpec::new("copy", CopyOperation::new(&source, &copied))
                .input(&source)
                .output(&copied),
        )
        .unwrap();
    with_timeout(graph.join()).await.unwrap();
    assert_eq!(graph.state(copy), Some(ExecutionState::Skipped));
    graph.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_worker_is_retried_then_reported() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let endpoint = dead_endpoint().await;

    let remote = RemoteConfig::new(vec![endpoint]).retries(2, Duration::from_millis(10));
    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Remote(remote))
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();
    let h = graph.add_task(TaskSpec::noop("orphan")).unwrap();
    let after = graph.add_task(TaskSpec::noop("after").depends_on(h)).unwrap();

    let err = with_timeout(graph.join()).await.unwrap_err();
    assert!(matches!(err, TaskGraphError::TasksFailed(ref f) if f.len() == 2));
    assert!(matches!(
        graph.failure(h),
        Some(FailureReason::ExecutorUnavailable { attempts: 3, .. })
    ));
    assert_eq!(graph.state(after), Some(ExecutionState::Failed));
    graph.close().await.unwrap();
}

#[tokio::test]
async fn expired_walltime_fails_tasks_explicitly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let endpoint = spawn_worker().await;

    let remote = RemoteConfig::new(vec![endpoint]).walltime(Duration::from_millis(300));
    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Remote(remote))
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();
    let slow = graph
        .add_task(TaskSpec::new("slow", CommandOperation::new("sleep").arg("2")))
        .unwrap();

    with_timeout(graph.join()).await.unwrap_err();
    assert_eq!(graph.failure(slow), Some(&FailureReason::WalltimeExceeded));

    // Work submitted after the deadline is never sent.
    let late = graph.add_task(TaskSpec::noop("late")).unwrap();
    with_timeout(graph.join()).await.unwrap_err();
    assert_eq!(graph.failure(late), Some(&FailureReason::WalltimeExceeded));

    graph.close().await.unwrap();
}

#[tokio::test]
async fn dead_worker_hands_its_tasks_to_live_ones() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let live = spawn_worker().await;
    let dead = dead_endpoint().await;

    let remote = RemoteConfig::new(vec![dead, live]).retries(1, Duration::from_millis(10));
    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Remote(remote))
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();
    let handles: Vec<_> = (0..10)
        .map(|i| graph.add_task(TaskSpec::noop(format!("noop {i}"))).unwrap())
        .collect();

    let summary = with_timeout(graph.join()).await.unwrap();
    assert_eq!(summary.counts.succeeded, 10);
    for h in handles {
        assert_eq!(graph.state(h), Some(ExecutionState::Succeeded));
    }
    graph.close().await.unwrap();
}

#[tokio::test]
async fn every_worker_dead_still_fails_each_task() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let endpoints = vec![dead_endpoint().await, dead_endpoint().await];

    let remote = RemoteConfig::new(endpoints).retries(0, Duration::from_millis(10));
    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Remote(remote))
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|i| graph.add_task(TaskSpec::noop(format!("noop {i}"))).unwrap())
        .collect();

    let err = with_timeout(graph.join()).await.unwrap_err();
    assert!(matches!(err, TaskGraphError::TasksFailed(ref f) if f.len() == 4));
    for h in handles {
        assert!(matches!(
            graph.failure(h),
            Some(FailureReason::ExecutorUnavailable { attempts: 1, .. })
        ));
    }
    graph.close().await.unwrap();
}

#[tokio::test]
async fn silent_worker_trips_the_idle_timeout() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let endpoint = silent_endpoint().await;

    let remote = RemoteConfig::new(vec![endpoint]).idle_timeout(Duration::from_millis(200));
    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Remote(remote))
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();
    let h = graph.add_task(TaskSpec::noop("stuck")).unwrap();

    with_timeout(graph.join()).await.unwrap_err();
    match graph.failure(h) {
        Some(FailureReason::ExecutorUnavailable { message, .. }) => {
            assert!(message.contains("no message from worker"), "{message}");
        }
        other => panic!("unexpected failure {other:?}"),
    }
    graph.close().await.unwrap();
}

#[tokio::test]
async fn heartbeats_keep_long_tasks_alive() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let endpoint = spawn_worker_with_heartbeat(Duration::from_millis(50)).await;

    let remote = RemoteConfig::new(vec![endpoint]).idle_timeout(Duration::from_millis(300));
    let config = GraphConfig::for_workspace(dir.path())
        .executor(ExecutorConfig::Remote(remote))
        .persist(false);
    let mut graph = TaskGraph::new(config).unwrap();
    let h = graph
        .add_task(TaskSpec::new("long", CommandOperation::new("sleep").arg("1")))
        .unwrap();

    with_timeout(graph.join()).await.unwrap();
    assert_eq!(graph.state(h), Some(ExecutionState::Succeeded));
    graph.close().await.unwrap();
}
