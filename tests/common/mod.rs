//! Shared harness: a scripted pdb behind a mock execution engine, and a DAP
//! client talking to the adapter over in-memory pipes.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use pdb_dap::common::config::Config;
use pdb_dap::dap::codec;
use pdb_dap::engine::{EngineLaunch, EngineProcess, ExecutionEngine, KillHandle};
use pdb_dap::mapping::{Mount, MountTable};
use pdb_dap::Result;

/// Where the fake program lives inside the "sandbox"
pub const SANDBOX_PROGRAM: &str = "/sandbox/app.py";
/// The same program as the IDE sees it
pub const WORKSPACE_PROGRAM: &str = "/ws/app.py";

const WAIT: Duration = Duration::from_secs(15);

/// How the scripted pdb behaves
#[derive(Clone, Default)]
pub struct PdbScript {
    /// First utterance; defaults to a stop on line 1
    pub first: Option<String>,
    /// One-shot replies consumed before the default behavior
    pub canned: HashMap<String, VecDeque<String>>,
}

impl PdbScript {
    pub fn with_first(mut self, first: &str) -> Self {
        self.first = Some(first.to_string());
        self
    }

    pub fn with_reply(mut self, command: &str, reply: &str) -> Self {
        self.canned
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
        self
    }
}

/// Engine whose "process" is a task imitating pdb
#[derive(Clone, Default)]
pub struct MockEngine {
    script: PdbScript,
    /// Every command the fake pdb received, in order
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl MockEngine {
    pub fn new(script: PdbScript) -> Self {
        Self {
            script,
            commands: Arc::default(),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands that resume the program
    pub fn run_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| matches!(c.as_str(), "c" | "n" | "s" | "r"))
            .collect()
    }
}

#[async_trait]
impl ExecutionEngine for MockEngine {
    async fn launch(&self, launch: EngineLaunch) -> Result<EngineProcess> {
        let (debugger_input, pdb_in) = duplex(64 * 1024);
        let (pdb_out, debugger_output) = duplex(64 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = KillHandle::new();

        launch.mapping.publish(MountTable::new([
            Mount::new("/sandbox", "/ws", true),
            Mount::new("/usr/lib/python3.12", "/usr/lib/python3.12", false),
        ]));

        let pdb = FakePdb {
            prompt: launch.bootstrap.terminator().to_string(),
            script: self.script.clone(),
            commands: self.commands.clone(),
            line: 1,
            breakpoints: Vec::new(),
            next_id: 1,
        };
        tokio::spawn(pdb.run(pdb_in, pdb_out, kill.clone(), exit_tx));

        Ok(EngineProcess {
            debugger_input: Box::new(debugger_input),
            debugger_output: Box::new(debugger_output),
            stderr: None,
            exit: exit_rx,
            kill,
        })
    }
}

struct FakePdb {
    prompt: String,
    script: PdbScript,
    commands: Arc<Mutex<Vec<String>>>,
    line: u32,
    breakpoints: Vec<(u32, u32)>,
    next_id: u32,
}

impl FakePdb {
    async fn run(
        mut self,
        input: DuplexStream,
        mut output: DuplexStream,
        kill: KillHandle,
        exit: oneshot::Sender<i32>,
    ) {
        let first = self
            .script
            .first
            .clone()
            .unwrap_or_else(|| self.stop_text());
        let _ = output.write_all(format!("{first}{}", self.prompt).as_bytes()).await;

        let mut lines = BufReader::new(input).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = kill.killed() => break,
            };
            let Ok(Some(command)) = line else { break };
            self.commands.lock().unwrap().push(command.clone());

            let (reply, finished) = self.reply(&command);
            let _ = output
                .write_all(format!("{reply}{}", self.prompt).as_bytes())
                .await;
            if finished {
                break;
            }
        }

        drop(output);
        let _ = exit.send(0);
    }

    fn stop_text(&self) -> String {
        format!("> {SANDBOX_PROGRAM}({})<module>()\n-> x = {}\n", self.line, self.line)
    }

    fn reply(&mut self, command: &str) -> (String, bool) {
        if let Some(reply) = self
            .script
            .canned
            .get_mut(command)
            .and_then(VecDeque::pop_front)
        {
            let finished = reply.contains("The program finished and will be restarted");
            return (reply, finished);
        }

        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("b"), Some(location)) => {
                let (path, line) = location.rsplit_once(':').unwrap();
                let line: u32 = line.parse().unwrap();
                let id = self.next_id;
                self.next_id += 1;
                self.breakpoints.push((id, line));
                (format!("Breakpoint {id} at {path}:{line}\n"), false)
            }
            (Some("cl"), _) => {
                let ids: Vec<u32> = command[3..]
                    .split_whitespace()
                    .map(|id| id.parse().unwrap())
                    .collect();
                self.breakpoints.retain(|(id, _)| !ids.contains(id));
                let deleted: String = ids
                    .iter()
                    .map(|id| format!("Deleted breakpoint {id} at {SANDBOX_PROGRAM}\n"))
                    .collect();
                (deleted, false)
            }
            (Some("c"), None) => {
                let next = self
                    .breakpoints
                    .iter()
                    .map(|(_, line)| *line)
                    .filter(|line| *line > self.line)
                    .min();
                match next {
                    Some(line) => {
                        self.line = line;
                        (self.stop_text(), false)
                    }
                    None => (
                        "The program finished and will be restarted\n".to_string(),
                        true,
                    ),
                }
            }
            (Some("n" | "s" | "r"), None) => {
                self.line += 1;
                (self.stop_text(), false)
            }
            (Some("where"), None) => (
                format!(
                    "  /usr/lib/python3.12/bdb.py(600)run()\n-> exec(cmd, globals, locals)\n  <string>(1)<module>()\n  {SANDBOX_PROGRAM}(20)<module>()\n-> main()\n> {SANDBOX_PROGRAM}({})main()\n-> x = {}\n",
                    self.line, self.line
                ),
                false,
            ),
            (Some("u" | "d"), Some(_)) => (String::new(), false),
            (Some("p"), Some("dir()")) => ("['__builtins__', '__file__', 'x']\n".to_string(), false),
            (Some("p"), Some("x")) => (format!("{}\n", self.line), false),
            (Some("pdb_dap_exc_last" | "pdb_dap_exc_frame"), None) => (String::new(), false),
            _ => (
                format!("*** NameError: name '{command}' is not defined\n"),
                false,
            ),
        }
    }
}

/// DAP client driving the adapter in-process
pub struct TestClient {
    writer: DuplexStream,
    reader: BufReader<DuplexStream>,
    seq: i64,
    /// Events received but not yet consumed
    pending: VecDeque<Value>,
    /// Every message received, in order
    pub received: Vec<Value>,
    pub server: JoinHandle<Result<()>>,
}

impl TestClient {
    pub fn start(engine: impl ExecutionEngine + 'static) -> Self {
        Self::start_with(engine, Config::default())
    }

    pub fn start_with(engine: impl ExecutionEngine + 'static, config: Config) -> Self {
        let (writer, adapter_in) = duplex(64 * 1024);
        let (adapter_out, reader) = duplex(64 * 1024);
        let server = tokio::spawn(pdb_dap::dap::serve(
            adapter_in,
            adapter_out,
            config,
            Arc::new(engine),
        ));

        Self {
            writer,
            reader: BufReader::new(reader),
            seq: 0,
            pending: VecDeque::new(),
            received: Vec::new(),
            server,
        }
    }

    async fn next_message(&mut self) -> Value {
        let json = tokio::time::timeout(WAIT, codec::read_message(&mut self.reader))
            .await
            .expect("timed out waiting for the adapter")
            .expect("adapter stream failed")
            .expect("adapter closed the stream");
        let value: Value = serde_json::from_str(&json).unwrap();
        self.received.push(value.clone());
        value
    }

    /// Send a request without waiting; returns its seq
    pub async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        let request = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        codec::write_message(&mut self.writer, &request.to_string())
            .await
            .unwrap();
        self.seq
    }

    /// Wait for the response to `seq`, queueing events that arrive first
    pub async fn response(&mut self, seq: i64) -> Value {
        loop {
            let message = self.next_message().await;
            if message["type"] == "response" && message["request_seq"] == seq {
                return message;
            }
            if message["type"] == "event" {
                self.pending.push_back(message);
            }
        }
    }

    pub async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        self.response(seq).await
    }

    /// Wait for the next event with this name
    pub async fn event(&mut self, name: &str) -> Value {
        if let Some(pos) = self.pending.iter().position(|e| e["event"] == name) {
            return self.pending.remove(pos).unwrap();
        }
        loop {
            let message = self.next_message().await;
            if message["type"] == "event" {
                if message["event"] == name {
                    return message;
                }
                self.pending.push_back(message);
            }
        }
    }

    /// Unconsumed events with this name
    pub fn pending_events(&self, name: &str) -> usize {
        self.pending.iter().filter(|e| e["event"] == name).count()
    }

    /// initialize + launch + initialized event
    pub async fn launch(&mut self, stop_on_entry: bool) {
        self.launch_program(WORKSPACE_PROGRAM, stop_on_entry).await;
    }

    pub async fn launch_program(&mut self, program: &str, stop_on_entry: bool) {
        let init = self.request("initialize", json!({"adapterID": "pdb"})).await;
        assert_eq!(init["success"], true);

        let launch = self
            .request(
                "launch",
                json!({"program": program, "stopOnEntry": stop_on_entry}),
            )
            .await;
        assert_eq!(launch["success"], true, "launch failed: {launch}");
        self.event("initialized").await;
    }
}
