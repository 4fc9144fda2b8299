//! End-to-end tests of the DAP adapter against a scripted pdb
//!
//! Each test drives `pdb_dap::dap::serve` over in-memory pipes with a mock
//! execution engine whose program lives under `/sandbox` while the IDE sees
//! it under `/ws`.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{MockEngine, PdbScript, TestClient, SANDBOX_PROGRAM, WORKSPACE_PROGRAM};

const CRASH: &str = "Traceback (most recent call last):\n  File \"/sandbox/app.py\", line 3, in <module>\n    1 / 0\nZeroDivisionError: division by zero\nUncaught exception. Entering post mortem debugging\nRunning 'cont' or 'step' will restart the program\n> /sandbox/app.py(3)<module>()\n-> 1 / 0\n";

#[tokio::test]
async fn test_stop_on_entry_then_breakpoint() {
    let engine = MockEngine::default();
    let mut client = TestClient::start(engine.clone());
    client.launch(true).await;

    let done = client.request("configurationDone", json!({})).await;
    assert_eq!(done["success"], true);
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "entry");
    assert!(engine.run_commands().is_empty(), "entry stop must not run the program");

    let bps = client
        .request(
            "setBreakpoints",
            json!({"source": {"path": WORKSPACE_PROGRAM}, "breakpoints": [{"line": 5}]}),
        )
        .await;
    assert_eq!(bps["success"], true);
    let bp = &bps["body"]["breakpoints"][0];
    assert_eq!(bp["verified"], true);
    assert_eq!(bp["line"], 5);
    assert!(engine
        .commands()
        .contains(&format!("b {SANDBOX_PROGRAM}:5")));

    let cont = client.request("continue", json!({"threadId": 1})).await;
    assert_eq!(cont["success"], true);
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["hitBreakpointIds"], json!([bp["id"]]));
}

#[tokio::test]
async fn test_breakpoint_before_configuration_done() {
    let engine = MockEngine::default();
    let mut client = TestClient::start(engine.clone());
    client.launch(false).await;

    client
        .request(
            "setBreakpoints",
            json!({"source": {"path": WORKSPACE_PROGRAM}, "breakpoints": [{"line": 4}]}),
        )
        .await;
    client.request("configurationDone", json!({})).await;

    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(engine.run_commands(), vec!["c"]);
}

#[tokio::test]
async fn test_library_stop_is_stepped_out_once() {
    let script = PdbScript::default().with_reply(
        "n",
        "> /usr/lib/python3.12/json/__init__.py(231)dumps()\n-> if not skipkeys\n",
    );
    let engine = MockEngine::new(script);
    let mut client = TestClient::start(engine.clone());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;

    let next = client.request("next", json!({"threadId": 1})).await;
    assert_eq!(next["success"], true);
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");

    assert_eq!(engine.run_commands(), vec!["n", "r"]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_events("stopped"), 0);
}

#[tokio::test]
async fn test_set_breakpoints_is_idempotent() {
    let engine = MockEngine::default();
    let mut client = TestClient::start(engine.clone());
    client.launch(true).await;

    let args = json!({
        "source": {"path": WORKSPACE_PROGRAM},
        "breakpoints": [{"line": 3}, {"line": 8}]
    });
    let first = client.request("setBreakpoints", args.clone()).await;
    let second = client.request("setBreakpoints", args).await;

    let lines = |r: &serde_json::Value| {
        r["body"]["breakpoints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| (b["line"].clone(), b["verified"].clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(lines(&first), lines(&second));
    assert!(engine.commands().contains(&"cl 1 2".to_string()));

    // Only the rebound ids may fire
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;
    client.request("continue", json!({"threadId": 1})).await;
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["hitBreakpointIds"], json!([3]));
}

#[tokio::test]
async fn test_stack_trace_is_innermost_first_in_workspace_paths() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;

    let trace = client
        .request("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 20}))
        .await;
    assert_eq!(trace["success"], true);
    let frames = trace["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(trace["body"]["totalFrames"], 2);
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0]["id"], 1);
    assert_eq!(frames[0]["name"], "main");
    assert_eq!(frames[0]["source"]["path"], WORKSPACE_PROGRAM);
    assert_eq!(frames[1]["id"], 2);
    assert_eq!(frames[1]["line"], 20);
    assert_eq!(frames[1]["source"]["path"], WORKSPACE_PROGRAM);
}

#[tokio::test]
async fn test_evaluate_in_outer_frame_restores_current_frame() {
    let engine = MockEngine::default();
    let mut client = TestClient::start(engine.clone());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;

    let result = client
        .request("evaluate", json!({"expression": "x", "frameId": 2, "context": "watch"}))
        .await;
    assert_eq!(result["success"], true);
    assert_eq!(result["body"]["result"], "1");
    assert_eq!(engine.commands(), vec!["u 1", "p x", "d 1"]);

    // Still at the innermost frame: the next variables read needs no switch
    let vars = client
        .request("variables", json!({"variablesReference": 1}))
        .await;
    let names: Vec<_> = vars["body"]["variables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["x"]);
    assert_eq!(&engine.commands()[3..], ["p dir()", "p x"]);
}

#[tokio::test]
async fn test_evaluate_error_fails_request() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;

    let result = client.request("evaluate", json!({"expression": "nope"})).await;
    assert_eq!(result["success"], false);
    assert!(result["message"]
        .as_str()
        .unwrap()
        .contains("NameError"));
}

#[tokio::test]
async fn test_uncaught_exception_then_continue_terminates() {
    let script = PdbScript::default()
        .with_first(CRASH)
        .with_reply(
            "pdb_dap_exc_last",
            "ZeroDivisionError: division by zero\nTraceback (most recent call last):\n  File \"/sandbox/app.py\", line 3, in <module>\n",
        );
    let engine = MockEngine::new(script);
    let mut client = TestClient::start(engine.clone());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;

    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "exception");
    assert_eq!(stopped["body"]["text"], "ZeroDivisionError: division by zero");

    let info = client.request("exceptionInfo", json!({"threadId": 1})).await;
    assert_eq!(info["success"], true);
    assert_eq!(info["body"]["exceptionId"], "ZeroDivisionError");
    assert_eq!(info["body"]["breakMode"], "unhandled");

    let cont = client.request("continue", json!({"threadId": 1})).await;
    assert_eq!(cont["success"], true);
    client.event("terminated").await;
    client.event("exited").await;
    assert!(engine.run_commands().is_empty());
}

/// Collect console output until `needle` shows up
async fn console_until(client: &mut TestClient, needle: &str) -> String {
    let mut text = String::new();
    while !text.contains(needle) {
        let output = client.event("output").await;
        text.push_str(output["body"]["output"].as_str().unwrap());
    }
    text
}

/// Entry stop reached and acknowledged
async fn stopped_at_entry(client: &mut TestClient) {
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;
}

#[tokio::test]
async fn test_breakpoint_after_unterminated_program_output() {
    let script = PdbScript::default().with_reply(
        "c",
        "abc> /sandbox/app.py(5)<module>()\n-> x = 5\n",
    );
    let engine = MockEngine::new(script);
    let mut client = TestClient::start(engine.clone());
    stopped_at_entry(&mut client).await;

    let bps = client
        .request(
            "setBreakpoints",
            json!({"source": {"path": WORKSPACE_PROGRAM}, "breakpoints": [{"line": 5}]}),
        )
        .await;
    let id = bps["body"]["breakpoints"][0]["id"].clone();

    client.request("continue", json!({"threadId": 1})).await;
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["hitBreakpointIds"], json!([id]));

    let console = console_until(&mut client, "abc").await;
    assert_eq!(console, "abc");
    assert_eq!(engine.run_commands(), vec!["c"]);
}

#[tokio::test]
async fn test_exception_looking_output_is_a_plain_step() {
    let script = PdbScript::default().with_reply(
        "n",
        "MyError: shown\n> /sandbox/app.py(2)<module>()\n-> x = 2\n",
    );
    let engine = MockEngine::new(script);
    let mut client = TestClient::start(engine.clone());
    stopped_at_entry(&mut client).await;

    client.request("next", json!({"threadId": 1})).await;
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");
    assert_eq!(engine.run_commands(), vec!["n"]);

    let console = console_until(&mut client, "MyError: shown\n").await;
    assert!(!console.contains("->"), "debugger text leaked: {console:?}");
}

#[tokio::test]
async fn test_step_exception_forwards_output_then_steps_on() {
    let script = PdbScript::default().with_reply(
        "s",
        "about to fail\n--Exception--\nKeyError: 'k'\n> /sandbox/app.py(2)<module>()\n-> d['k']\n",
    );
    let engine = MockEngine::new(script);
    let mut client = TestClient::start(engine.clone());
    stopped_at_entry(&mut client).await;

    client.request("stepIn", json!({"threadId": 1})).await;
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");
    assert_eq!(engine.run_commands(), vec!["s", "s"]);

    let console = console_until(&mut client, "about to fail\n").await;
    assert!(!console.contains("--Exception--"));
    assert!(!console.contains("KeyError"));
}

#[tokio::test]
async fn test_syntax_error_output_while_stepping_keeps_running() {
    let script = PdbScript::default().with_reply(
        "n",
        "SyntaxError: not really\n> /sandbox/app.py(2)<module>()\n-> x = 2\n",
    );
    let engine = MockEngine::new(script);
    let mut client = TestClient::start(engine.clone());
    stopped_at_entry(&mut client).await;

    client.request("next", json!({"threadId": 1})).await;
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");
    console_until(&mut client, "SyntaxError: not really").await;

    let next = client.request("next", json!({"threadId": 1})).await;
    assert_eq!(next["success"], true);
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");
    assert_eq!(engine.run_commands(), vec!["n", "n"]);
    assert_eq!(client.pending_events("terminated"), 0);
}

#[tokio::test]
async fn test_program_finish_reports_terminated_once() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(false).await;
    client.request("configurationDone", json!({})).await;

    client.event("terminated").await;
    let exited = client.event("exited").await;
    assert_eq!(exited["body"]["exitCode"], 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_events("terminated"), 0);
}

#[tokio::test]
async fn test_unknown_request_fails() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(true).await;

    let response = client.request("pause", json!({"threadId": 1})).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["message"], "Unhandled request pause");
}

#[tokio::test]
async fn test_requests_before_launch_fail() {
    let mut client = TestClient::start(MockEngine::default());
    let response = client.request("next", json!({"threadId": 1})).await;
    assert_eq!(response["success"], false);

    let threads = client.request("threads", json!({})).await;
    assert_eq!(threads["success"], true);
    assert_eq!(threads["body"]["threads"][0]["id"], 1);
}

#[tokio::test]
async fn test_outgoing_seq_strictly_increases() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;
    client.request("next", json!({"threadId": 1})).await;
    client.event("stopped").await;
    client.request("stackTrace", json!({"threadId": 1})).await;

    let seqs: Vec<i64> = client
        .received
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect();
    assert!(seqs.len() >= 8);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seq not increasing: {seqs:?}");
}

#[tokio::test]
async fn test_response_precedes_caused_stop() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;

    let seq = client.send("stepIn", json!({"threadId": 1})).await;
    client.response(seq).await;
    client.event("stopped").await;

    let response = client
        .received
        .iter()
        .position(|m| m["type"] == "response" && m["request_seq"] == seq)
        .unwrap();
    let stopped = client
        .received
        .iter()
        .rposition(|m| m["event"] == "stopped")
        .unwrap();
    assert!(response < stopped);
}

#[tokio::test]
async fn test_disconnect_ends_server() {
    let mut client = TestClient::start(MockEngine::default());
    client.launch(true).await;
    client.request("configurationDone", json!({})).await;
    client.event("stopped").await;

    let response = client
        .request("disconnect", json!({"terminateDebuggee": true}))
        .await;
    assert_eq!(response["success"], true);

    let result = tokio::time::timeout(Duration::from_secs(5), client.server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
