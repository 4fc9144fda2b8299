//! Output stream demultiplexer
//!
//! Owns the debugger's input and output channels. Every command that talks
//! to the debugger becomes a job on a FIFO queue consumed by one task, so at
//! most one reply is being read at any time and a command's bytes are never
//! written before the previous reply's prompt has been consumed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};

use crate::common::text::Utf8Decoder;
use crate::common::{Error, Result};

use super::parser;

/// Size of a single read from the debugger output
const READ_CHUNK: usize = 8 * 1024;

/// How a reply is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The program runs: user output is forwarded to the console as it arrives
    Run,
    /// Debugger introspection: carriage returns stripped, everything buffered
    Command,
}

/// What the debugger channel is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Idle,
    RunningCommand,
    RunningProgram,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RunningCommand => write!(f, "running-command"),
            Self::RunningProgram => write!(f, "running-program"),
        }
    }
}

/// A queued debugger interaction
struct Job {
    mode: ReadMode,
    command: Option<String>,
    reply: oneshot::Sender<String>,
}

/// Reply to a queued job
///
/// Resolves with the prompt-terminated utterance (terminator stripped), or
/// with [`Error::DebuggerExited`] if the debugger output ends first.
pub struct PendingReply {
    rx: oneshot::Receiver<String>,
}

impl Future for PendingReply {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| Error::DebuggerExited))
    }
}

/// Handle to the demultiplexer task
#[derive(Clone)]
pub struct Demux {
    jobs: mpsc::UnboundedSender<Job>,
    mode: watch::Receiver<RunMode>,
}

impl Demux {
    /// Spawn the demultiplexer over the debugger's channels
    ///
    /// Run-mode user output is sent to `console`.
    pub fn spawn<W, R>(
        input: W,
        output: R,
        terminator: String,
        console: mpsc::UnboundedSender<String>,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (mode_tx, mode_rx) = watch::channel(RunMode::Idle);

        let worker = Worker {
            input,
            output,
            terminator,
            console,
            pending: String::new(),
            decoder: Utf8Decoder::default(),
            mode: mode_tx,
        };
        tokio::spawn(worker.run(jobs_rx));

        Self {
            jobs: jobs_tx,
            mode: mode_rx,
        }
    }

    /// Queue a job without waiting for its reply
    ///
    /// `command` of `None` reads the next utterance without writing anything
    /// (used for the first prompt after launch).
    pub fn enqueue(&self, mode: ReadMode, command: Option<&str>) -> PendingReply {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            mode,
            command: command.map(str::to_string),
            reply,
        };
        // A closed queue drops the job, which resolves the reply as exited
        let _ = self.jobs.send(job);
        PendingReply { rx }
    }

    /// Write a command and wait for the prompt-terminated reply
    pub async fn send_and_await(&self, mode: ReadMode, command: &str) -> Result<String> {
        self.enqueue(mode, Some(command)).await
    }

    /// Run-class command (continue, step): program output streams to the console
    pub async fn run(&self, command: &str) -> Result<String> {
        self.send_and_await(ReadMode::Run, command).await
    }

    /// Introspection command: reply is buffered silently
    pub async fn command(&self, command: &str) -> Result<String> {
        self.send_and_await(ReadMode::Command, command).await
    }

    /// Current activity of the debugger channel
    pub fn run_mode(&self) -> RunMode {
        *self.mode.borrow()
    }

    /// Whether the demultiplexer task has stopped (debugger output ended)
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

/// Single consumer of the job queue; sole owner of the debugger channels
struct Worker<W, R> {
    input: W,
    output: R,
    terminator: String,
    console: mpsc::UnboundedSender<String>,
    /// Decoded output not yet consumed by a reply
    pending: String,
    decoder: Utf8Decoder,
    mode: watch::Sender<RunMode>,
}

impl<W, R> Worker<W, R>
where
    W: AsyncWrite + Send + Unpin + 'static,
    R: AsyncRead + Send + Unpin + 'static,
{
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            let running = match job.mode {
                ReadMode::Run => RunMode::RunningProgram,
                ReadMode::Command => RunMode::RunningCommand,
            };
            self.mode.send_replace(running);

            match self.serve(&job).await {
                Ok(reply) => {
                    self.mode.send_replace(RunMode::Idle);
                    let _ = job.reply.send(reply);
                }
                Err(e) => {
                    tracing::info!(error = %e, "Debugger channel closed");
                    break;
                }
            }
        }

        // Dropping the receiver resolves every queued reply as exited
        self.mode.send_replace(RunMode::Idle);
        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            drop(job);
        }
    }

    async fn serve(&mut self, job: &Job) -> Result<String> {
        if let Some(command) = &job.command {
            tracing::debug!(command = %command, "pdb <<<");
            self.input.write_all(command.as_bytes()).await?;
            self.input.write_all(b"\n").await?;
            self.input.flush().await?;
        }

        let reply = self.read_utterance(job.mode).await?;
        tracing::debug!(reply = %reply, "pdb >>>");
        Ok(reply)
    }

    /// Read until the prompt terminator, forwarding user output in run mode
    async fn read_utterance(&mut self, mode: ReadMode) -> Result<String> {
        let mut forwarding = mode == ReadMode::Run;
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            if let Some(mut end) = self.pending.find(&self.terminator) {
                if forwarding {
                    let (len, _) = parser::passthrough_len(&self.pending[..end]);
                    if len > 0 {
                        let chunk: String = self.pending.drain(..len).collect();
                        let _ = self.console.send(chunk);
                        end -= len;
                    }
                }
                let mut utterance: String = self.pending.drain(..end).collect();
                self.pending.drain(..self.terminator.len());
                if mode == ReadMode::Command {
                    utterance.retain(|c| c != '\r');
                }
                return Ok(utterance);
            }

            if forwarding {
                let (len, held) = parser::passthrough_len(&self.pending);
                if len > 0 {
                    let chunk: String = self.pending.drain(..len).collect();
                    let _ = self.console.send(chunk);
                }
                // Everything from the first debugger artifact on belongs to the reply
                if held {
                    forwarding = false;
                }
            }

            let n = self.output.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::DebuggerExited);
            }
            let text = self.decoder.decode(&buf[..n]);
            self.pending.push_str(&text);
        }
    }
}
