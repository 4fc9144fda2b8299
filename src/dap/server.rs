//! Stdio DAP server
//!
//! Reads requests from the IDE and hands them to the adapter one at a time.
//! Every outbound message goes through a single writer task, which assigns
//! the strictly increasing `seq`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use crate::adapter::{Adapter, SessionInterrupt};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::ExecutionEngine;

use super::codec;
use super::types::{
    EventMessage, ExitedEventBody, OutgoingMessage, OutputEventBody, RequestMessage,
    ResponseMessage, StoppedEventBody, TerminatedEventBody,
};

/// Requests that tear the session down
const TEARDOWN_COMMANDS: [&str; 3] = ["terminate", "disconnect", "restart"];

/// How long queued messages may take to flush after the client is done
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Sender side of the outbound message queue
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, message: OutgoingMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("Outbound queue closed, dropping message");
        }
    }

    pub fn respond(&self, response: ResponseMessage) {
        self.send(OutgoingMessage::Response(response));
    }

    pub fn event(&self, event: &str, body: Option<Value>) {
        self.send(OutgoingMessage::Event(EventMessage::new(event, body)));
    }

    fn typed_event<T: serde::Serialize>(&self, event: &str, body: T) {
        match serde_json::to_value(body) {
            Ok(body) => self.event(event, Some(body)),
            Err(e) => tracing::error!(event, error = %e, "Failed to serialize event body"),
        }
    }

    pub fn stopped(&self, body: StoppedEventBody) {
        self.typed_event("stopped", body);
    }

    pub fn output(&self, category: &str, output: String) {
        self.typed_event(
            "output",
            OutputEventBody {
                category: Some(category.to_string()),
                output,
            },
        );
    }

    pub fn exited(&self, exit_code: i32) {
        self.typed_event("exited", ExitedEventBody { exit_code });
    }

    pub fn terminated(&self, restart: bool) {
        self.typed_event("terminated", TerminatedEventBody { restart });
    }
}

/// Stamp sequence numbers and write messages in queue order
async fn write_loop<W>(mut outgoing: mpsc::UnboundedReceiver<OutgoingMessage>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut seq = 0;
    while let Some(mut message) = outgoing.recv().await {
        seq += 1;
        message.set_seq(seq);
        let json = serde_json::to_string(&message)?;
        tracing::debug!("DAP >>> {}", json);
        codec::write_message(&mut writer, &json).await?;
    }
    Ok(())
}

/// Read requests until the client hangs up
async fn read_loop<R>(
    reader: R,
    requests: mpsc::UnboundedSender<RequestMessage>,
    interrupt: SessionInterrupt,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    while let Some(json) = codec::read_message(&mut reader).await? {
        tracing::debug!("DAP <<< {}", json);

        let value: Value = serde_json::from_str(&json)
            .map_err(|e| Error::DapProtocol(format!("Invalid JSON: {}", e)))?;
        if value.get("type").and_then(Value::as_str) != Some("request") {
            tracing::debug!("Ignoring non-request message");
            continue;
        }

        let request: RequestMessage = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request");
                continue;
            }
        };

        if TEARDOWN_COMMANDS.contains(&request.command.as_str()) {
            interrupt.fire();
        }
        if requests.send(request).is_err() {
            break;
        }
    }
    Ok(())
}

/// Serve one DAP client over a reader/writer pair (stdin/stdout in production)
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    config: Config,
    engine: Arc<dyn ExecutionEngine>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, outgoing) = Outbound::channel();
    let writer_task = tokio::spawn(write_loop(outgoing, writer));

    let interrupt = SessionInterrupt::new();
    let (requests_tx, mut requests_rx) = mpsc::unbounded_channel();
    let mut adapter = Adapter::new(config, engine, outbound.clone(), interrupt.clone());

    let mut worker = tokio::spawn(async move {
        while let Some(request) = requests_rx.recv().await {
            adapter.handle(request).await;
            if adapter.is_disconnected() {
                tracing::info!("Client disconnected");
                break;
            }
        }
        adapter.shutdown();
    });

    let read_result = tokio::select! {
        result = read_loop(reader, requests_tx, interrupt) => result,
        _ = &mut worker => Ok(()),
    };
    if !worker.is_finished() {
        // Input ended: let the adapter drain what was already queued
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Request worker failed");
        }
    }

    drop(outbound);
    match tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await {
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Failed to write to client"),
        Ok(Err(e)) => tracing::error!(error = %e, "Writer task failed"),
        _ => {}
    }

    read_result
}
