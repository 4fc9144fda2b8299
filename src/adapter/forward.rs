//! Background tasks feeding a session's side channels into DAP events

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};

use crate::common::text::Utf8Decoder;
use crate::dap::server::Outbound;
use crate::session::TerminationLatch;

/// Forward console text (program stdout and flushed debugger preambles)
pub fn spawn_console(mut console: mpsc::UnboundedReceiver<String>, outbound: Outbound) {
    tokio::spawn(async move {
        while let Some(text) = console.recv().await {
            outbound.output("stdout", text);
        }
    });
}

/// Forward program stderr
pub fn spawn_stderr<R>(mut stderr: R, outbound: Outbound)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8 * 1024];
        let mut decoder = Utf8Decoder::default();
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    if !text.is_empty() {
                        outbound.output("stderr", text);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Program stderr closed");
                    break;
                }
            }
        }
    });
}

/// Report process exit: `exited`, then `terminated` unless already reported
pub fn spawn_exit_watcher(exit: oneshot::Receiver<i32>, outbound: Outbound, latch: TerminationLatch) {
    tokio::spawn(async move {
        match exit.await {
            Ok(code) => outbound.exited(code),
            Err(_) => tracing::debug!("Engine dropped the exit notification"),
        }
        if latch.fire() {
            outbound.terminated(false);
        }
    });
}
