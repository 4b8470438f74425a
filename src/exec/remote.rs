// src/exec/remote.rs

//! Executor backed by pre-provisioned remote worker processes.
//!
//! Each configured endpoint gets one driver task. A driver pulls jobs from
//! the shared queue, keeps a persistent connection to its worker, and sends
//! one request at a time. A driver whose worker cannot be reached hands its
//! job back to the queue and retires, unless it is the last one left; only
//! then do jobs fail with `ExecutorUnavailable`. Nodes are never provisioned
//! here; the [`Provisioning`] hints are only logged so they show up next to
//! the run that asked for them.

use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dag::TaskHandle;
use crate::engine::{Completion, CompletionSender, FailureReason, TaskName, TaskOutcome};
use crate::errors::{Result, TaskGraphError};
use crate::exec::wire::{TcpJsonLines, WorkRequest, WorkResponse, WorkerMessage};
use crate::exec::{Executor, Job};
use crate::types::ExecutorKind;

/// Resource hints for the allocation the workers run in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provisioning {
    pub cores: Option<u32>,
    pub memory: Option<String>,
    pub queue: Option<String>,
    #[serde(default)]
    pub job_script_prologue: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// `host:port` of each worker.
    pub workers: Vec<String>,
    /// Lifetime of the allocation, counted from executor construction.
    pub walltime: Option<Duration>,
    /// Extra connection attempts after the first one fails.
    pub submit_retries: u32,
    /// Delay before the first retry; doubled after every attempt.
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    /// Longest silence tolerated from a worker holding a task. Workers send
    /// heartbeats while a task runs, so this only trips when one is gone.
    pub idle_timeout: Duration,
    pub provisioning: Provisioning,
}

impl RemoteConfig {
    pub fn new(workers: Vec<String>) -> Self {
        Self {
            workers,
            walltime: None,
            submit_retries: 3,
            retry_backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            provisioning: Provisioning::default(),
        }
    }

    pub fn walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    pub fn retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.submit_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

struct DriverSettings {
    submit_retries: u32,
    retry_backoff: Duration,
    connect_timeout: Duration,
    idle_timeout: Duration,
    deadline: Option<Instant>,
    /// Drivers still pulling jobs.
    live_drivers: AtomicUsize,
}

impl DriverSettings {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Retire the calling driver unless it is the last one pulling jobs.
    fn retire_driver(&self) -> bool {
        self.live_drivers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 1).then(|| n - 1))
            .is_ok()
    }
}

/// Task currently handed to a remote worker.
#[derive(Debug, Clone)]
struct InFlight {
    name: TaskName,
    worker: String,
}

type InFlightMap = Arc<StdMutex<HashMap<TaskHandle, InFlight>>>;

pub struct RemoteExecutor {
    queue: Option<mpsc::Sender<Job>>,
    drivers: Vec<JoinHandle<()>>,
    in_flight: InFlightMap,
    deadline: Option<Instant>,
}

impl RemoteExecutor {
    /// Start one driver per worker endpoint. Must be called from within a
    /// Tokio runtime.
    pub fn new(config: RemoteConfig, completions: CompletionSender) -> Self {
        // A walltime too large to represent never expires.
        let deadline = config.walltime.and_then(|w| Instant::now().checked_add(w));
        info!(
            workers = ?config.workers,
            walltime = ?config.walltime,
            provisioning = ?config.provisioning,
            "remote executor attached to pre-provisioned workers"
        );

        let (tx, rx) = mpsc::channel::<Job>(config.workers.len().max(1) * 2);
        let rx = Arc::new(Mutex::new(rx));
        let in_flight: InFlightMap = Arc::default();
        let settings = Arc::new(DriverSettings {
            submit_retries: config.submit_retries,
            retry_backoff: config.retry_backoff,
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            deadline,
            live_drivers: AtomicUsize::new(config.workers.len()),
        });

        let drivers = config
            .workers
            .iter()
            .map(|endpoint| {
                tokio::spawn(driver_loop(
                    endpoint.clone(),
                    Arc::clone(&rx),
                    tx.downgrade(),
                    completions.clone(),
                    Arc::clone(&in_flight),
                    Arc::clone(&settings),
                ))
            })
            .collect::<Vec<_>>();

        Self {
            queue: (!drivers.is_empty()).then_some(tx),
            drivers,
            in_flight,
            deadline,
        }
    }

    /// When the allocation's walltime runs out, if one was configured.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Names of tasks currently running on a remote worker.
    pub fn in_flight(&self) -> Vec<TaskName> {
        let map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<TaskName> = map.values().map(|f| f.name.clone()).collect();
        names.sort();
        names
    }
}

async fn driver_loop(
    endpoint: String,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    requeue: mpsc::WeakSender<Job>,
    completions: CompletionSender,
    in_flight: InFlightMap,
    settings: Arc<DriverSettings>,
) {
    let mut conn: Option<TcpJsonLines> = None;

    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let outcome = if settings.deadline_passed() {
            warn!(task = %job.name, worker = %endpoint, "walltime exhausted; task not sent");
            TaskOutcome::failed(FailureReason::WalltimeExceeded)
        } else if let Err(reason) = ensure_connected(&endpoint, &mut conn, &settings).await {
            if settings.retire_driver() {
                warn!(
                    task = %job.name,
                    worker = %endpoint,
                    remaining = settings.live_drivers.load(Ordering::SeqCst),
                    "worker unreachable; handing its task to the remaining workers"
                );
                hand_back(job, &requeue, &completions, reason).await;
                break;
            }
            TaskOutcome::failed(reason)
        } else {
            track(&in_flight, &job, &endpoint);
            let outcome = dispatch(&endpoint, &mut conn, &job, &settings).await;
            untrack(&in_flight, job.task);
            outcome
        };

        let sent = completions.send(Completion {
            task: job.task,
            name: job.name,
            outcome,
        });
        if sent.is_err() {
            debug!(worker = %endpoint, "coordinator gone; stopping driver");
            break;
        }
    }

    debug!(worker = %endpoint, "remote driver finished");
}

/// Put `job` back on the shared queue for another driver. Fails the job
/// with `reason` if the queue is already closed.
async fn hand_back(
    job: Job,
    requeue: &mpsc::WeakSender<Job>,
    completions: &CompletionSender,
    reason: FailureReason,
) {
    let job = match requeue.upgrade() {
        Some(tx) => match tx.send(job).await {
            Ok(()) => return,
            Err(mpsc::error::SendError(job)) => job,
        },
        None => job,
    };

    let _ = completions.send(Completion {
        task: job.task,
        name: job.name,
        outcome: TaskOutcome::failed(reason),
    });
}

fn track(in_flight: &InFlightMap, job: &Job, endpoint: &str) {
    let mut map = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    map.insert(
        job.task,
        InFlight {
            name: job.name.clone(),
            worker: endpoint.to_string(),
        },
    );
}

fn untrack(in_flight: &InFlightMap, task: TaskHandle) {
    let mut map = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    map.remove(&task);
}

async fn ensure_connected(
    endpoint: &str,
    conn: &mut Option<TcpJsonLines>,
    settings: &DriverSettings,
) -> std::result::Result<(), FailureReason> {
    if conn.is_none() {
        *conn = Some(connect_with_retry(endpoint, settings).await?);
    }
    Ok(())
}

enum Exchange {
    Done(WorkResponse),
    /// The worker sent nothing, not even a heartbeat, for the idle timeout.
    Idle,
    Broken(anyhow::Error),
}

async fn exchange(stream: &mut TcpJsonLines, request: &WorkRequest, idle_timeout: Duration) -> Exchange {
    if let Err(e) = stream.send(request).await {
        return Exchange::Broken(e);
    }

    loop {
        match tokio::time::timeout(idle_timeout, stream.recv::<WorkerMessage>()).await {
            Err(_) => return Exchange::Idle,
            Ok(Err(e)) => return Exchange::Broken(e),
            Ok(Ok(None)) => return Exchange::Broken(anyhow!("worker closed the connection")),
            Ok(Ok(Some(WorkerMessage::Heartbeat { task }))) => {
                debug!(task = %task, "worker heartbeat");
            }
            Ok(Ok(Some(WorkerMessage::Done(response)))) => return Exchange::Done(response),
        }
    }
}

/// Run one job on the driver's connected worker.
async fn dispatch(
    endpoint: &str,
    conn: &mut Option<TcpJsonLines>,
    job: &Job,
    settings: &DriverSettings,
) -> TaskOutcome {
    let Some(stream) = conn.as_mut() else {
        return TaskOutcome::failed(FailureReason::ExecutorUnavailable {
            attempts: 0,
            message: format!("{endpoint}: no connection"),
        });
    };

    let request = WorkRequest {
        task: job.name.clone(),
        operation: job.operation.spec(),
    };
    debug!(task = %job.name, worker = %endpoint, "sending task to remote worker");

    let reply = exchange(stream, &request, settings.idle_timeout);
    let result = match settings.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, reply).await,
        None => Ok(reply.await),
    };

    match result {
        Err(_elapsed) => {
            *conn = None;
            warn!(
                task = %job.name,
                worker = %endpoint,
                "walltime expired while the task was running remotely"
            );
            TaskOutcome::failed(FailureReason::WalltimeExceeded)
        }
        Ok(Exchange::Idle) => {
            *conn = None;
            warn!(
                task = %job.name,
                worker = %endpoint,
                idle_timeout = ?settings.idle_timeout,
                "remote worker went silent"
            );
            TaskOutcome::failed(FailureReason::ExecutorUnavailable {
                attempts: 1,
                message: format!(
                    "{endpoint}: no message from worker for {:?}",
                    settings.idle_timeout
                ),
            })
        }
        Ok(Exchange::Broken(e)) => {
            *conn = None;
            let message = format!("{endpoint}: {e:#}");
            warn!(task = %job.name, error = %message, "lost connection to remote worker");
            TaskOutcome::failed(FailureReason::execution(message))
        }
        Ok(Exchange::Done(response)) if response.task != job.name => {
            *conn = None;
            TaskOutcome::failed(FailureReason::execution(format!(
                "{endpoint}: expected reply for '{}', got '{}'",
                job.name, response.task
            )))
        }
        Ok(Exchange::Done(response)) => response.outcome,
    }
}

async fn connect_with_retry(
    endpoint: &str,
    settings: &DriverSettings,
) -> std::result::Result<TcpJsonLines, FailureReason> {
    let attempts = settings.submit_retries.saturating_add(1);
    let mut backoff = settings.retry_backoff;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(settings.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => {
                debug!(worker = %endpoint, attempt, "connected to remote worker");
                return Ok(TcpJsonLines::from_stream(stream));
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {:?}", settings.connect_timeout),
        }

        warn!(
            worker = %endpoint,
            attempt,
            attempts,
            error = %last_error,
            "could not reach remote worker"
        );
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(FailureReason::ExecutorUnavailable {
        attempts,
        message: format!("{endpoint}: {last_error}"),
    })
}

impl Executor for RemoteExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Remote
    }

    fn submit(&mut self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.queue.clone();

        Box::pin(async move {
            let tx = tx.ok_or_else(|| {
                TaskGraphError::ExecutorUnavailable("no remote workers available".to_string())
            })?;
            tx.send(job).await.map_err(|_| {
                TaskGraphError::ExecutorUnavailable("remote drivers have stopped".to_string())
            })
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.queue.take();
        let drivers = mem::take(&mut self.drivers);
        let leaked: Vec<InFlight> = {
            let map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            map.values().cloned().collect()
        };

        Box::pin(async move {
            if leaked.is_empty() {
                for driver in drivers {
                    if let Err(e) = driver.await {
                        warn!(error = %e, "remote driver ended abnormally");
                    }
                }
            } else {
                for task in &leaked {
                    warn!(
                        task = %task.name,
                        worker = %task.worker,
                        "abandoning task still running on a remote worker; it may keep consuming resources"
                    );
                }
                for driver in drivers {
                    driver.abort();
                }
            }
            info!("remote executor shut down");
            Ok(())
        })
    }
}
