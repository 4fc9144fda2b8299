//! Protocol adapter
//!
//! Maps each DAP request to one session operation. Every request gets exactly
//! one correlated response; events a request causes (a stop after `next`,
//! `initialized` after `launch`) are emitted after that response.

mod forward;
mod handler;

use std::sync::{Arc, Mutex};

use crate::common::config::Config;
use crate::dap::server::Outbound;
use crate::dap::types::{RequestMessage, ResponseMessage};
use crate::engine::{ExecutionEngine, KillHandle};
use crate::session::{RunCommand, Session, StopOutcome, TerminationLatch};

/// Kill switch for the current session, usable while a request is in flight
///
/// A long `continue` occupies the adapter until the program stops; teardown
/// requests trip this from the reader side so they are not stuck behind it.
#[derive(Debug, Clone, Default)]
pub struct SessionInterrupt(Arc<Mutex<Option<KillHandle>>>);

impl SessionInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&self, kill: KillHandle) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(kill);
        }
    }

    /// Kill the current session's process, if any
    pub fn fire(&self) {
        if let Ok(slot) = self.0.lock() {
            if let Some(kill) = slot.as_ref() {
                tracing::info!("Interrupting debug target");
                kill.kill();
            }
        }
    }
}

/// What happens after the response went out
#[derive(Debug)]
enum Then {
    Nothing,
    /// Emit `initialized`
    Initialized,
    /// Report a stop or termination the request already observed
    Report(StopOutcome),
    /// Run a command and report where it stopped
    Execute(RunCommand),
    /// Report that the session was torn down
    Terminated { restart: bool },
}

/// Outcome of a successfully handled request
struct Handled {
    body: Option<serde_json::Value>,
    then: Then,
}

impl Handled {
    fn body<T: serde::Serialize>(body: T) -> crate::Result<Self> {
        Ok(Self {
            body: Some(serde_json::to_value(body)?),
            then: Then::Nothing,
        })
    }

    fn empty(then: Then) -> Self {
        Self { body: None, then }
    }
}

/// Request handler state for one client connection
pub struct Adapter {
    config: Config,
    engine: Arc<dyn ExecutionEngine>,
    outbound: Outbound,
    interrupt: SessionInterrupt,
    session: Option<Session>,
    /// Terminated-once flag of the current session
    latch: TerminationLatch,
    stop_on_entry: bool,
    disconnected: bool,
}

impl Adapter {
    pub fn new(
        config: Config,
        engine: Arc<dyn ExecutionEngine>,
        outbound: Outbound,
        interrupt: SessionInterrupt,
    ) -> Self {
        Self {
            config,
            engine,
            outbound,
            interrupt,
            session: None,
            latch: TerminationLatch::new(),
            stop_on_entry: true,
            disconnected: false,
        }
    }

    /// Whether the client has disconnected; no further requests are served
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Handle one request: respond, then emit whatever the request caused
    pub async fn handle(&mut self, request: RequestMessage) {
        tracing::debug!(seq = request.seq, command = %request.command, "DAP request");

        match self.dispatch(&request).await {
            Ok(handled) => {
                self.outbound
                    .respond(ResponseMessage::success(&request, handled.body));
                self.follow_up(handled.then).await;
            }
            Err(e) => {
                tracing::warn!(command = %request.command, error = %e, "Request failed");
                self.outbound
                    .respond(ResponseMessage::failure(&request, e.dap_message()));
            }
        }
    }

    async fn follow_up(&mut self, then: Then) {
        match then {
            Then::Nothing => {}
            Then::Initialized => self.outbound.event("initialized", None),
            Then::Report(outcome) => self.report(outcome),
            Then::Execute(command) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match session.execute(command).await {
                    Ok(outcome) => self.report(outcome),
                    Err(e) => {
                        // The response is already out; surface the failure in the console
                        tracing::warn!(?command, error = %e, "Run command failed");
                        self.outbound
                            .output("console", format!("pdb-dap: {}\n", e.dap_message()));
                        if e.is_fatal() {
                            self.report(StopOutcome::Terminated);
                        }
                    }
                }
            }
            Then::Terminated { restart } => {
                if self.latch.fire() {
                    self.outbound.terminated(restart);
                }
            }
        }
    }

    fn report(&mut self, outcome: StopOutcome) {
        match outcome {
            StopOutcome::Stopped(body) => {
                tracing::info!(reason = %body.reason, "Stopped");
                self.outbound.stopped(body);
            }
            StopOutcome::Terminated => {
                if self.latch.fire() {
                    self.outbound.terminated(false);
                }
            }
        }
    }

    /// Kill the debug target when the client goes away
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if !session.is_terminated() {
                tracing::info!("Client gone, terminating debug target");
                session.terminate();
            }
        }
    }
}
