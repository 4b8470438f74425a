// src/exec/wire.rs

//! Coordinator <-> worker protocol.
//!
//! One JSON document per line. The coordinator sends a [`WorkRequest`];
//! the worker sends [`WorkerMessage::Heartbeat`]s while the task runs and
//! then exactly one [`WorkerMessage::Done`] before reading the next request,
//! so a connection carries at most one task at a time.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::engine::{TaskName, TaskOutcome};
use crate::ops::OperationSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub task: TaskName,
    pub operation: OperationSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResponse {
    pub task: TaskName,
    pub outcome: TaskOutcome,
}

/// Worker -> coordinator message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The task is still running.
    Heartbeat { task: TaskName },
    Done(WorkResponse),
}

/// Newline-delimited JSON framing over any byte stream.
pub struct JsonLines<R, W> {
    reader: BufReader<R>,
    writer: W,
    line: String,
}

pub type TcpJsonLines = JsonLines<OwnedReadHalf, OwnedWriteHalf>;

impl TcpJsonLines {
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        JsonLines::new(read, write)
    }
}

impl<R, W> JsonLines<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut bytes = serde_json::to_vec(message).context("encoding message")?;
        bytes.push(b'\n');
        self.writer
            .write_all(&bytes)
            .await
            .context("writing message")?;
        self.writer.flush().await.context("flushing message")?;
        Ok(())
    }

    /// Next message, or `None` once the peer has closed the stream.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("reading message")?;
            if read == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let message = serde_json::from_str(line)
                .with_context(|| format!("decoding message: {line}"))?;
            return Ok(Some(message));
        }
    }
}
