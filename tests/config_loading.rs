use std::fs;
use std::time::Duration;

use taskgraph::config::{load_and_validate, load_or_default};
use taskgraph::exec::ExecutorConfig;
use taskgraph::types::HashAlgorithm;
use tempfile::tempdir;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("TaskGraph.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn graph_section_is_parsed_and_validated() {
    let (_dir, path) = write_config(
        r#"
[graph]
workspace = "out"
n_workers = 4
hash_algorithm = "blake3"
reporting_interval = "30s"
prune = true
"#,
    );

    let config = load_and_validate(&path).unwrap();
    assert_eq!(config.workspace, std::path::PathBuf::from("out"));
    assert!(matches!(config.executor, ExecutorConfig::Local { workers: 4 }));
    assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
    assert_eq!(config.reporting_interval, Some(Duration::from_secs(30)));
    assert!(config.persist);
    assert!(config.prune);

    let graph = config.graph_config();
    assert!(graph.prune_stale);
    assert!(graph.cache_dir.ends_with(".taskgraph"));
}

#[test]
fn negative_n_workers_selects_the_synchronous_executor() {
    let (_dir, path) = write_config("[graph]\nn_workers = -1\n");
    let config = load_and_validate(&path).unwrap();
    assert!(matches!(config.executor, ExecutorConfig::Synchronous));

    let (_dir, path) = write_config("[graph]\nn_workers = 0\n");
    let config = load_and_validate(&path).unwrap();
    assert!(matches!(config.executor, ExecutorConfig::Local { workers: 1 }));
}

#[test]
fn executor_accepts_the_long_synchronous_name() {
    for name in ["sync", "synchronous"] {
        let (_dir, path) = write_config(&format!("[graph]\nexecutor = \"{name}\"\n"));
        let config = load_and_validate(&path).unwrap();
        assert!(matches!(config.executor, ExecutorConfig::Synchronous), "{name}");
    }
}

#[test]
fn empty_file_uses_defaults() {
    let (_dir, path) = write_config("");
    let config = load_and_validate(&path).unwrap();
    assert_eq!(config.workspace, std::path::PathBuf::from("workspace_dir"));
    assert_eq!(config.hash_algorithm, HashAlgorithm::SizeTimestamp);
    assert!(matches!(config.executor, ExecutorConfig::Local { .. }));
    assert!(config.persist);
    assert!(!config.prune);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let raw = load_or_default(dir.path().join("absent.toml")).unwrap();
    assert!(raw.cluster.is_none());
    assert_eq!(raw.graph.n_workers, None);
}

#[test]
fn remote_cluster_section_carries_provisioning() {
    let (_dir, path) = write_config(
        r#"
[graph]
executor = "remote"

[cluster]
workers = ["node1:7878", "node2:7878"]
walltime = "00:10:00"
submit_retries = 5
retry_backoff = "250ms"
cores = 8
memory = "4GB"
queue = "normal,hns"
job_script_prologue = ["module load gdal"]
"#,
    );

    let config = load_and_validate(&path).unwrap();
    let remote = match config.executor {
        ExecutorConfig::Remote(remote) => remote,
        other => panic!("expected remote executor, got {other:?}"),
    };
    assert_eq!(remote.workers, vec!["node1:7878", "node2:7878"]);
    assert_eq!(remote.walltime, Some(Duration::from_secs(600)));
    assert_eq!(remote.submit_retries, 5);
    assert_eq!(remote.retry_backoff, Duration::from_millis(250));
    assert_eq!(remote.connect_timeout, Duration::from_secs(10));
    assert_eq!(remote.provisioning.cores, Some(8));
    assert_eq!(remote.provisioning.memory.as_deref(), Some("4GB"));
    assert_eq!(remote.provisioning.queue.as_deref(), Some("normal,hns"));
    assert_eq!(remote.provisioning.job_script_prologue, vec!["module load gdal"]);
}

#[test]
fn invalid_configs_are_rejected() {
    let cases = [
        "[graph]\nn_workers = -2\n",
        "[graph]\nreporting_interval = \"soon\"\n",
        "[graph]\nexecutor = \"local\"\nn_workers = -1\n",
        "[graph]\nexecutor = \"remote\"\n",
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1\"]\n",
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1:1\"]\nwalltime = \"later\"\n",
        "[graph]\nhash_algorithm = \"md5\"\n",
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1:1\"]\nidle_timeout = \"0s\"\n",
    ];

    for case in cases {
        let (_dir, path) = write_config(case);
        assert!(load_and_validate(&path).is_err(), "accepted invalid config:\n{case}");
    }
}

#[test]
fn oversized_durations_are_config_errors() {
    let cases = [
        "[graph]\nreporting_interval = \"9999999999999999999h\"\n",
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1:1\"]\nwalltime = \"9999999999999999999:00:00\"\n",
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1:1\"]\nretry_backoff = \"9999999999999999999m\"\n",
    ];

    for case in cases {
        let (_dir, path) = write_config(case);
        let err = load_and_validate(&path).unwrap_err();
        assert!(format!("{err:#}").contains("too large"), "{err:#}");
    }
}

#[test]
fn idle_timeout_defaults_and_overrides() {
    let (_dir, path) = write_config(
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1:1\"]\n",
    );
    let ExecutorConfig::Remote(remote) = load_and_validate(&path).unwrap().executor else {
        panic!("expected remote executor");
    };
    assert_eq!(remote.idle_timeout, Duration::from_secs(60));

    let (_dir, path) = write_config(
        "[graph]\nexecutor = \"remote\"\n[cluster]\nworkers = [\"node1:1\"]\nidle_timeout = \"5m\"\n",
    );
    let ExecutorConfig::Remote(remote) = load_and_validate(&path).unwrap().executor else {
        panic!("expected remote executor");
    };
    assert_eq!(remote.idle_timeout, Duration::from_secs(300));
}
