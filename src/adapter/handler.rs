//! Request dispatch
//!
//! Translates DAP requests into session operations.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::common::paths::normalize;
use crate::common::{Error, Result};
use crate::dap::types::*;
use crate::engine::EngineLaunch;
use crate::mapping;
use crate::pdb::{Bootstrap, Demux};
use crate::session::{RunCommand, Session, StopOutcome, TerminationLatch};

use super::{forward, Adapter, Handled, Then};

impl Adapter {
    pub(super) async fn dispatch(&mut self, request: &RequestMessage) -> Result<Handled> {
        match request.command.as_str() {
            // === Session Management ===
            "initialize" => Handled::body(capabilities()),

            "launch" => {
                let args: LaunchArguments = request.arguments()?;
                self.launch(args).await?;
                Ok(Handled::empty(Then::Initialized))
            }

            "configurationDone" => {
                let then = self.configuration_done().await?;
                Ok(Handled::empty(then))
            }

            "terminate" => {
                self.terminate_session();
                Ok(Handled::empty(Then::Terminated { restart: false }))
            }

            "disconnect" => {
                let args: DisconnectArguments = request.arguments()?;
                self.terminate_session();
                self.disconnected = !args.restart;
                Ok(Handled::empty(Then::Terminated {
                    restart: args.restart,
                }))
            }

            "restart" => {
                self.terminate_session();
                Ok(Handled::empty(Then::Terminated { restart: true }))
            }

            // === Breakpoints ===
            "setBreakpoints" => {
                let args: SetBreakpointsArguments = request.arguments()?;
                let source = args.source.path.clone().ok_or_else(|| {
                    Error::invalid_arguments("setBreakpoints", "source has no path")
                })?;
                let lines = args.requested_lines();

                let session = self.session_mut()?;
                let breakpoints = session.set_breakpoints(&source, &lines).await?;
                Handled::body(SetBreakpointsResponseBody { breakpoints })
            }

            // === Execution Control ===
            "continue" => {
                self.session_mut()?;
                Ok(Handled {
                    body: Some(serde_json::to_value(ContinueResponseBody {
                        all_threads_continued: true,
                    })?),
                    then: Then::Execute(RunCommand::Continue),
                })
            }

            "next" => self.run_command(RunCommand::Next),
            "stepIn" => self.run_command(RunCommand::StepIn),
            "stepOut" => self.run_command(RunCommand::StepOut),

            // === Inspection ===
            "threads" => Handled::body(ThreadsResponseBody {
                threads: vec![Thread {
                    id: THREAD_ID,
                    name: "main".to_string(),
                }],
            }),

            "stackTrace" => {
                let args: StackTraceArguments = request.arguments()?;
                let start = args.start_frame.unwrap_or(0).max(0) as usize;
                let levels = args.levels.unwrap_or(0).max(0) as usize;

                let session = self.session_mut()?;
                let (stack_frames, total) = session.stack_trace(start, levels).await?;
                Handled::body(StackTraceResponseBody {
                    stack_frames,
                    total_frames: Some(total as i64),
                })
            }

            "scopes" => {
                let args: ScopesArguments = request.arguments()?;
                frame_index(args.frame_id)?;
                self.session_mut()?;
                Handled::body(ScopesResponseBody {
                    scopes: vec![Scope {
                        name: "Locals".to_string(),
                        variables_reference: args.frame_id,
                        expensive: false,
                    }],
                })
            }

            "variables" => {
                let args: VariablesArguments = request.arguments()?;
                let frame = frame_index(args.variables_reference)?;
                let start = args.start.unwrap_or(0).max(0) as usize;
                let count = match args.count.unwrap_or(0) {
                    n if n > 0 => n as usize,
                    _ => usize::MAX,
                };

                let session = self.session_mut()?;
                let variables = session
                    .variables(frame)
                    .await?
                    .into_iter()
                    .skip(start)
                    .take(count)
                    .collect();
                Handled::body(VariablesResponseBody { variables })
            }

            "evaluate" => {
                let args: EvaluateArguments = request.arguments()?;
                let frame = args.frame_id.map(frame_index).transpose()?;

                let session = self.session_mut()?;
                let result = session.evaluate(&args.expression, frame).await?;
                Handled::body(EvaluateResponseBody {
                    result,
                    type_name: None,
                    variables_reference: 0,
                })
            }

            "exceptionInfo" => {
                let session = self.session_mut()?;
                Handled::body(session.exception_info().await?)
            }

            other => Err(Error::UnknownRequest(other.to_string())),
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::SessionNotActive)
    }

    fn run_command(&mut self, command: RunCommand) -> Result<Handled> {
        self.session_mut()?;
        Ok(Handled::empty(Then::Execute(command)))
    }

    /// Start the engine and wire a session to it
    async fn launch(&mut self, args: LaunchArguments) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| !s.is_terminated()) {
            return Err(Error::SessionAlreadyActive);
        }

        let program = normalize(&args.program);
        let terminator = self.config.debugger.prompt_terminator.clone();
        let (publisher, translator) =
            mapping::channel(Duration::from_secs(self.config.timeouts.mapping_secs));

        tracing::info!(
            program = %program,
            stop_on_entry = ?args.stop_on_entry,
            console = ?args.console,
            "Launching"
        );

        let process = self
            .engine
            .launch(EngineLaunch {
                program,
                args: args.args,
                cwd: args.cwd.map(PathBuf::from),
                env: args.env.unwrap_or_default(),
                python: args.python.map(PathBuf::from),
                bootstrap: Bootstrap::new(terminator.clone()),
                mapping: publisher,
            })
            .await?;

        let latch = TerminationLatch::new();
        let (console_tx, console_rx) = mpsc::unbounded_channel();
        forward::spawn_console(console_rx, self.outbound.clone());
        if let Some(stderr) = process.stderr {
            forward::spawn_stderr(stderr, self.outbound.clone());
        }
        forward::spawn_exit_watcher(process.exit, self.outbound.clone(), latch.clone());

        let demux = Demux::spawn(
            process.debugger_input,
            process.debugger_output,
            terminator,
            console_tx.clone(),
        );
        self.interrupt.arm(process.kill.clone());

        self.session = Some(Session::new(
            self.config.debugger.clone(),
            demux,
            translator,
            console_tx,
            process.kill,
        ));
        self.latch = latch;
        self.stop_on_entry = args.stop_on_entry.unwrap_or(true);
        Ok(())
    }

    /// Wait for the first prompt, then stop at entry, report, or continue
    async fn configuration_done(&mut self) -> Result<Then> {
        let stop_on_entry = self.stop_on_entry;
        let Some(session) = self.session.as_mut() else {
            // Nothing launched yet; the client may configure first
            return Ok(Then::Nothing);
        };

        let then = match session.finish_launch().await? {
            StopOutcome::Terminated => Then::Report(StopOutcome::Terminated),
            StopOutcome::Stopped(body) if body.reason == "exception" => {
                Then::Report(StopOutcome::Stopped(body))
            }
            StopOutcome::Stopped(_) if stop_on_entry => {
                Then::Report(StopOutcome::Stopped(StoppedEventBody::new("entry")))
            }
            StopOutcome::Stopped(body) if body.reason == "breakpoint" => {
                Then::Report(StopOutcome::Stopped(body))
            }
            StopOutcome::Stopped(_) => Then::Execute(RunCommand::Continue),
        };
        Ok(then)
    }

    fn terminate_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.terminate();
        }
    }
}

/// Capabilities advertised in the initialize response
fn capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: true,
        supports_evaluate_for_hovers: true,
        supports_exception_info_request: true,
        support_terminate_debuggee: true,
        supports_terminate_request: true,
        ..Default::default()
    }
}

/// DAP frame ids (and variable references) are pdb frame indices, 1 = innermost
fn frame_index(id: i64) -> Result<usize> {
    if id < 1 {
        return Err(Error::FrameNotFound(id.max(0) as usize));
    }
    Ok(id as usize)
}
