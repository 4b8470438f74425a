// src/worker.rs

//! Remote worker process.
//!
//! Serves [`WorkRequest`]s from a coordinator's remote executor: rebuilds
//! the operation from its `{name, params}` through an [`OperationRegistry`],
//! runs it on the blocking pool and answers with a [`WorkResponse`]. While a
//! task runs, the connection carries a heartbeat every `heartbeat` period so
//! the coordinator can tell a slow task from a dead worker.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{FailureReason, TaskOutcome};
use crate::errors::Result;
use crate::exec::run_operation;
use crate::exec::wire::{TcpJsonLines, WorkRequest, WorkResponse, WorkerMessage};
use crate::ops::OperationRegistry;

/// Default period between heartbeats sent while a task runs.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Accept coordinator connections forever.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<OperationRegistry>,
    heartbeat: Duration,
) -> Result<()> {
    let heartbeat = heartbeat.max(MIN_HEARTBEAT);
    let addr = listener.local_addr()?;
    info!(
        %addr,
        operations = ?registry.names().collect::<Vec<_>>(),
        ?heartbeat,
        "worker listening"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "coordinator connected");
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, registry, heartbeat).await {
                warn!(%peer, error = %format!("{e:#}"), "worker connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<OperationRegistry>,
    heartbeat: Duration,
) -> anyhow::Result<()> {
    let mut conn = TcpJsonLines::from_stream(stream);

    while let Some(request) = conn.recv::<WorkRequest>().await? {
        let work = execute_request(&request, &registry);
        tokio::pin!(work);
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = ticker.tick() => {
                    conn.send(&WorkerMessage::Heartbeat { task: request.task.clone() }).await?;
                }
            }
        };

        conn.send(&WorkerMessage::Done(WorkResponse {
            task: request.task.clone(),
            outcome,
        }))
        .await?;
    }

    debug!(%peer, "coordinator disconnected");
    Ok(())
}

/// Run one request to completion.
pub async fn execute_request(request: &WorkRequest, registry: &OperationRegistry) -> TaskOutcome {
    let operation = match registry.instantiate(&request.operation) {
        Ok(operation) => operation,
        Err(e) => {
            warn!(task = %request.task, error = %format!("{e:#}"), "cannot build operation");
            return TaskOutcome::failed(FailureReason::execution(format!(
                "cannot build operation: {e:#}"
            )));
        }
    };

    let name = request.task.clone();
    match tokio::task::spawn_blocking(move || run_operation(&name, operation.as_ref())).await {
        Ok(outcome) => outcome,
        Err(e) => TaskOutcome::failed(FailureReason::execution(format!(
            "worker thread failed: {e}"
        ))),
    }
}
