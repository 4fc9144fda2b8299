//! Debug session state machine
//!
//! Drives pdb through the demultiplexer and turns its replies into stop
//! outcomes. All debugger interaction for one session goes through here,
//! and every operation that depends on the current frame either restores it
//! or declares that it resets it to the innermost frame.

pub mod breakpoints;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::common::config::DebuggerConfig;
use crate::common::paths::normalize;
use crate::common::{Error, Result};
use crate::dap::types::{
    Breakpoint, ExceptionDetails, ExceptionInfoResponseBody, Source, StackFrame,
    StoppedEventBody, Variable,
};
use crate::engine::KillHandle;
use crate::mapping::PathTranslator;
use crate::pdb::bootstrap::{EXC_FRAME_ALIAS, EXC_LAST_ALIAS};
use crate::pdb::parser::{self, Classification};
use crate::pdb::{Demux, PendingReply};

pub use breakpoints::{BoundBreakpoint, BreakpointTable};

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No debugger process yet
    NotStarted,
    /// Waiting for the first prompt
    Launching,
    /// At a prompt; inspection allowed
    Stopped,
    /// A run-class command is in flight
    Running,
    /// Program finished, crashed, or was torn down
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Launching => write!(f, "launching"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Run-class commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Continue,
    Next,
    StepIn,
    StepOut,
}

impl RunCommand {
    fn pdb_command(self) -> &'static str {
        match self {
            Self::Continue => "c",
            Self::Next => "n",
            Self::StepIn => "s",
            Self::StepOut => "r",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Next => "next",
            Self::StepIn => "stepIn",
            Self::StepOut => "stepOut",
        }
    }
}

/// Where a run-class command left the session
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(StoppedEventBody),
    Terminated,
}

/// What started the reply being classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Launch,
    Continue,
    Step,
}

enum Verdict {
    Done(StopOutcome),
    /// Issue another run command without surfacing a stop
    Again(&'static str),
}

/// Shared "terminated was reported" flag for one session
///
/// Both the session and the process-exit watcher may observe the end of the
/// program; only the first to fire reports it.
#[derive(Debug, Clone, Default)]
pub struct TerminationLatch(Arc<AtomicBool>);

impl TerminationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once
    pub fn fire(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One pdb-backed debug session
pub struct Session {
    config: DebuggerConfig,
    demux: Demux,
    translator: PathTranslator,
    /// User-visible output (shared with the demultiplexer's forwarding)
    console: mpsc::UnboundedSender<String>,
    kill: KillHandle,
    state: SessionState,
    /// 1 = innermost
    current_frame: usize,
    uncaught_exception: bool,
    breakpoints: BreakpointTable,
    launch_reply: Option<PendingReply>,
}

impl Session {
    /// Start a session over a freshly spawned debugger
    ///
    /// Queues the read of the first prompt right away so every later
    /// command lines up behind it.
    pub fn new(
        config: DebuggerConfig,
        demux: Demux,
        translator: PathTranslator,
        console: mpsc::UnboundedSender<String>,
        kill: KillHandle,
    ) -> Self {
        let launch_reply = demux.enqueue(crate::pdb::ReadMode::Run, None);
        tracing::info!("Debug session launching");

        Self {
            config,
            demux,
            translator,
            console,
            kill,
            state: SessionState::Launching,
            current_frame: 1,
            uncaught_exception: false,
            breakpoints: BreakpointTable::new(),
            launch_reply: Some(launch_reply),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    pub fn has_uncaught_exception(&self) -> bool {
        self.uncaught_exception
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Wait for the first prompt and classify it
    pub async fn finish_launch(&mut self) -> Result<StopOutcome> {
        let reply = self
            .launch_reply
            .take()
            .ok_or_else(|| Error::invalid_state("finish launch", self.state))?;

        let result = match reply.await {
            Ok(text) => self.drive(text, Trigger::Launch).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Execute a run-class command and classify where it stopped
    ///
    /// Resets the current frame to the innermost one.
    pub async fn execute(&mut self, command: RunCommand) -> Result<StopOutcome> {
        if self.state == SessionState::Terminated {
            return Ok(StopOutcome::Terminated);
        }
        if self.uncaught_exception {
            tracing::info!(
                command = command.name(),
                "Run command after uncaught exception, terminating"
            );
            return Ok(self.terminate());
        }
        if self.state != SessionState::Stopped {
            return Err(Error::invalid_state(command.name(), self.state));
        }

        let result = self.execute_inner(command).await;
        self.settle(result)
    }

    async fn execute_inner(&mut self, command: RunCommand) -> Result<StopOutcome> {
        self.switch_frame(1).await?;

        let trigger = match command {
            RunCommand::Continue => Trigger::Continue,
            _ => Trigger::Step,
        };

        self.state = SessionState::Running;
        let reply = match self.demux.run(command.pdb_command()).await {
            Ok(reply) => reply,
            Err(e) => {
                if !matches!(e, Error::DebuggerExited) {
                    self.state = SessionState::Stopped;
                }
                return Err(e);
            }
        };
        self.drive(reply, trigger).await
    }

    /// Turn a lost debugger into a terminated session
    fn settle(&mut self, result: Result<StopOutcome>) -> Result<StopOutcome> {
        match result {
            Err(Error::DebuggerExited) => {
                tracing::info!("Debugger output ended");
                Ok(self.mark_terminated())
            }
            other => other,
        }
    }

    /// Classify replies, re-issuing transparent steps until a real stop
    async fn drive(&mut self, mut reply: String, trigger: Trigger) -> Result<StopOutcome> {
        let mut auto_steps = 0;

        loop {
            let command = match self.judge(&reply, trigger).await? {
                Verdict::Done(outcome) => return Ok(outcome),
                Verdict::Again(command) => command,
            };

            auto_steps += 1;
            if auto_steps > self.config.max_auto_steps {
                tracing::warn!(
                    limit = self.config.max_auto_steps,
                    "Transparent stepping limit reached, stopping"
                );
                self.stop_at_top();
                return Ok(StopOutcome::Stopped(StoppedEventBody::new("step")));
            }

            tracing::debug!(command, "Stepping transparently");
            self.state = SessionState::Running;
            reply = self.demux.run(command).await?;
        }
    }

    async fn judge(&mut self, reply: &str, trigger: Trigger) -> Result<Verdict> {
        match parser::classify(reply) {
            Classification::ProgramFinished { before } => {
                self.flush(before);
                tracing::info!("Program finished");
                Ok(Verdict::Done(self.mark_terminated()))
            }
            Classification::UncaughtException { before } => Ok(self.uncaught(before)),
            // Only the target failing to compile can produce this before any frame
            Classification::SyntaxError { before } if trigger == Trigger::Launch => {
                Ok(self.uncaught(before))
            }
            Classification::FunctionReturn { before } | Classification::FunctionCall { before } => {
                self.flush(before);
                Ok(Verdict::Again("s"))
            }
            Classification::SyntaxError { .. } | Classification::Stopped => {
                self.judge_stop(reply, trigger).await
            }
        }
    }

    fn uncaught(&mut self, before: &str) -> Verdict {
        self.flush(before);
        tracing::info!("Uncaught exception, entering post mortem");
        self.uncaught_exception = true;
        self.stop_at_top();

        let mut body = StoppedEventBody::new("exception");
        body.description = Some("Uncaught exception".to_string());
        body.text = last_exception_line(before);
        Verdict::Done(StopOutcome::Stopped(body))
    }

    async fn judge_stop(&mut self, reply: &str, trigger: Trigger) -> Result<Verdict> {
        let (preamble, rest) = parser::split_preamble(reply);
        let (output, raised) = parser::split_exception_marker(preamble);
        self.flush(output);

        if raised && trigger == Trigger::Step {
            tracing::debug!("Exception raised during step, stepping on");
            return Ok(Verdict::Again("s"));
        }

        let Some(top) = parser::parse_stack_frames(rest).into_iter().next() else {
            tracing::warn!(reply = %reply, "Stop reply has no frame");
            self.stop_at_top();
            return Ok(Verdict::Done(StopOutcome::Stopped(StoppedEventBody::new("step"))));
        };

        if !self.translator.is_user_code(&top.path).await? {
            tracing::debug!(path = %top.path, "Stopped outside user code, stepping out");
            return Ok(Verdict::Again("r"));
        }

        self.stop_at_top();
        let path = self.translator.to_workspace_path(&top.path).await?;
        let hits = self.breakpoints.hits(&path, top.line);
        tracing::debug!(path = %path, line = top.line, ?hits, ?trigger, "Stopped");

        let body = if hits.is_empty() {
            StoppedEventBody::new("step")
        } else {
            let mut body = StoppedEventBody::new("breakpoint");
            body.hit_breakpoint_ids = hits;
            body
        };
        Ok(Verdict::Done(StopOutcome::Stopped(body)))
    }

    fn stop_at_top(&mut self) {
        self.state = SessionState::Stopped;
        self.current_frame = 1;
    }

    fn mark_terminated(&mut self) -> StopOutcome {
        if self.state != SessionState::Terminated {
            tracing::info!(previous = %self.state, "Debug session terminated");
        }
        self.state = SessionState::Terminated;
        self.launch_reply = None;
        StopOutcome::Terminated
    }

    /// Tear the debug target down
    pub fn terminate(&mut self) -> StopOutcome {
        self.kill.kill();
        self.mark_terminated()
    }

    fn flush(&self, text: &str) {
        if !text.is_empty() {
            let _ = self.console.send(text.to_string());
        }
    }

    fn ensure_stopped(&self, action: &str) -> Result<()> {
        match self.state {
            SessionState::Stopped => Ok(()),
            state => Err(Error::invalid_state(action, state)),
        }
    }

    /// Move pdb's current frame with one batched up/down command
    ///
    /// The frame pointer only changes once pdb accepted the move.
    pub async fn switch_frame(&mut self, target: usize) -> Result<()> {
        if target == 0 {
            return Err(Error::FrameNotFound(target));
        }
        if target == self.current_frame {
            return Ok(());
        }

        let command = if target > self.current_frame {
            format!("u {}", target - self.current_frame)
        } else {
            format!("d {}", self.current_frame - target)
        };

        let reply = self.demux.command(&command).await?;
        if let Some(message) = parser::debugger_error(&reply) {
            tracing::warn!(command = %command, error = message, "Frame switch rejected");
            return Err(Error::debugger_error(&command, message));
        }

        tracing::debug!(from = self.current_frame, to = target, "Switched frame");
        self.current_frame = target;
        Ok(())
    }

    /// Go back to `previous` after a frame-transparent operation
    ///
    /// The operation's own error wins over a failure to restore.
    async fn restore_frame<T>(&mut self, previous: usize, result: Result<T>) -> Result<T> {
        let restored = self.switch_frame(previous).await;
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Replace every breakpoint of one source file
    ///
    /// Clears the file's bound ids in one `cl`, then binds each line in turn.
    /// A line pdb refuses comes back unverified with pdb's message.
    pub async fn set_breakpoints(&mut self, source: &str, lines: &[u32]) -> Result<Vec<Breakpoint>> {
        if self.state == SessionState::Terminated {
            return Err(Error::invalid_state("set breakpoints", self.state));
        }

        let source = normalize(source);
        let stale = self.breakpoints.ids_for(&source);
        if !stale.is_empty() {
            let ids: Vec<String> = stale.iter().map(u32::to_string).collect();
            let command = format!("cl {}", ids.join(" "));
            let reply = self.demux.command(&command).await?;
            if let Some(message) = parser::debugger_error(&reply) {
                tracing::warn!(command = %command, error = message, "Clearing breakpoints failed");
            }
            self.breakpoints.remove_source(&source);
        }

        let sandbox = self.translator.to_sandbox_path(&source).await?;
        let mut result = Vec::with_capacity(lines.len());

        for &line in lines {
            let command = format!("b {sandbox}:{line}");
            let reply = self.demux.command(&command).await?;

            match parser::parse_breakpoint(&reply) {
                Some(confirmed) => {
                    let path = self.translator.to_workspace_path(&confirmed.path).await?;
                    self.breakpoints.insert(BoundBreakpoint {
                        id: confirmed.id,
                        source: source.clone(),
                        path,
                        line: confirmed.line,
                    });
                    result.push(Breakpoint {
                        id: Some(confirmed.id),
                        verified: true,
                        message: None,
                        source: Some(Source::from_path(&source)),
                        line: Some(confirmed.line),
                    });
                }
                None => {
                    let message = parser::debugger_error(&reply)
                        .map(str::to_string)
                        .unwrap_or_else(|| reply.trim().to_string());
                    tracing::warn!(command = %command, error = %message, "Breakpoint not bound");
                    result.push(Breakpoint {
                        id: None,
                        verified: false,
                        message: Some(message),
                        source: Some(Source::from_path(&source)),
                        line: Some(line),
                    });
                }
            }
        }

        tracing::debug!(source = %source, bound = self.breakpoints.len(), "Breakpoints rebound");
        Ok(result)
    }

    /// Frames from `where`, innermost first, and the total visible count
    pub async fn stack_trace(&mut self, start: usize, levels: usize) -> Result<(Vec<StackFrame>, usize)> {
        self.ensure_stopped("get stack trace")?;

        let text = self.demux.command("where").await?;
        let hide = self.config.hide_internal_frames;

        let frames: Vec<_> = parser::parse_stack_frames(&text)
            .into_iter()
            .filter(|f| !(hide && parser::is_internal_frame(&f.path)))
            .collect();
        if frames.is_empty() {
            tracing::warn!(reply = %text, "No frames in stack dump");
        }

        let total = frames.len();
        let levels = if levels == 0 { usize::MAX } else { levels };
        let mut page = Vec::new();
        for frame in frames.into_iter().skip(start).take(levels) {
            let path = self.translator.to_workspace_path(&frame.path).await?;
            page.push(StackFrame {
                id: frame.id as i64,
                name: frame.name,
                source: Some(Source::from_path(&path)),
                line: frame.line,
                column: 1,
            });
        }

        Ok((page, total))
    }

    /// Locals of a frame, leaving the current frame unchanged
    pub async fn variables(&mut self, frame: usize) -> Result<Vec<Variable>> {
        self.ensure_stopped("get variables")?;

        let previous = self.current_frame;
        self.switch_frame(frame).await?;
        let result = self.read_variables().await;
        self.restore_frame(previous, result).await
    }

    async fn read_variables(&mut self) -> Result<Vec<Variable>> {
        let listing = self.demux.command("p dir()").await?;
        let names = parser::parse_variable_names(&listing);

        let mut variables = Vec::with_capacity(names.len());
        for name in names {
            let reply = self.demux.command(&format!("p {name}")).await?;
            let value = parser::debugger_error(&reply)
                .map(str::to_string)
                .unwrap_or_else(|| reply.trim_end().to_string());
            variables.push(Variable {
                name,
                value,
                type_name: None,
                variables_reference: 0,
            });
        }
        Ok(variables)
    }

    /// Evaluate an expression in a frame, leaving the current frame unchanged
    pub async fn evaluate(&mut self, expression: &str, frame: Option<usize>) -> Result<String> {
        self.ensure_stopped("evaluate")?;
        if expression.contains('\n') {
            return Err(Error::invalid_arguments(
                "evaluate",
                "multi-line expressions are not supported",
            ));
        }

        // A print call already shows its output; `p` would add "None"
        let command = if parser::is_print_call(expression) {
            format!("!{}", expression.trim())
        } else {
            format!("p {}", expression.trim())
        };

        let previous = self.current_frame;
        self.switch_frame(frame.unwrap_or(previous)).await?;
        let result = self.demux.command(&command).await;
        let reply = self.restore_frame(previous, result).await?;

        match parser::debugger_error(&reply) {
            Some(message) => Err(Error::debugger_error("evaluate", message)),
            None => Ok(reply.trim_end_matches('\n').to_string()),
        }
    }

    /// Details of the exception the session stopped on
    ///
    /// Asks for the last uncaught exception first, then for the one pdb
    /// stored in the innermost frame.
    pub async fn exception_info(&mut self) -> Result<ExceptionInfoResponseBody> {
        self.ensure_stopped("get exception info")?;

        let previous = self.current_frame;
        self.switch_frame(1).await?;
        let result = self.read_exception().await;
        let report = self
            .restore_frame(previous, result)
            .await?
            .ok_or_else(|| Error::debugger_error("exceptionInfo", "No exception is active"))?;

        Ok(ExceptionInfoResponseBody {
            exception_id: report.type_name.clone(),
            description: Some(report.message.clone()),
            break_mode: if self.uncaught_exception {
                "unhandled".to_string()
            } else {
                "always".to_string()
            },
            details: Some(ExceptionDetails {
                message: Some(report.message),
                type_name: Some(report.type_name),
                stack_trace: report.traceback,
            }),
        })
    }

    async fn read_exception(&mut self) -> Result<Option<parser::ExceptionReport>> {
        let last = self.demux.command(EXC_LAST_ALIAS).await?;
        if let Some(report) = parser::parse_exception_report(&last) {
            return Ok(Some(report));
        }
        let frame = self.demux.command(EXC_FRAME_ALIAS).await?;
        Ok(parser::parse_exception_report(&frame))
    }
}

/// Last `Type: message` line of a traceback, used as the stop's text
fn last_exception_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim_end)
        .find(|line| !line.is_empty() && !line.starts_with(' '))
        .filter(|line| !line.starts_with(parser::TRACEBACK_HEADER))
        .map(str::to_string)
}
