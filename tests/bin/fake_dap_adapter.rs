//! Fake DAP adapter for integration tests.
//!
//! Speaks the same length-prefixed JSON framing as a real debug adapter,
//! over a TCP socket (there is no STDIO variant to fall back to). It
//! doesn't run any actual program — it simulates just enough of the
//! protocol surface for a `Session` to drive the full initialization
//! handshake and operation set against it.
//!
//! Usage: `fake_dap_adapter <port> [mode]`
//!
//! `mode` tweaks behavior for specific test scenarios. The `stopped` event
//! for both stopping modes below is sent right after the `launch`/`attach`
//! response, never earlier: a `Session` only starts listening for it once
//! that request is about to go out, so anything emitted during the
//! `configurationDone` turnaround would race a subscriber that isn't
//! wired up yet.
//!
//! - `stop-on-entry`: emit a `stopped(reason=entry)` event right after the
//!   `launch`/`attach` response.
//! - `no-response`: accept the connection but never answer any request,
//!   for exercising the DAP Client's timeout path.
//! - `conditional-loop`: treat the breakpoint registered by the first
//!   `setBreakpoints` call as gated by `condition="i==N"`; once launched,
//!   report the loop as already having run up to the matching iteration
//!   and stop there, with local variable `i` bound to `N`.
//! - `stop-twice`: like `stop-on-entry`, but the first `continue` stops
//!   again at a second (simulated) breakpoint instead of running to
//!   completion, and drops every `variablesReference` handed out before
//!   that `continue` — only the second `continue` ends the program. This
//!   is what exercises a client's stale-frame/stale-variable handling:
//!   ids from the first pause must not resolve against the second.
//!
//! In every other mode, `continue` always runs the (simulated) program to
//! completion: a single `terminated`+`exited` pair, never a second
//! `stopped`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};

struct Conn {
    stream: TcpStream,
    seq: i64,
}

impl Conn {
    fn write_message(&mut self, msg: &Value) {
        let content = serde_json::to_string(msg).expect("serialize DAP message");
        let header = format!("Content-Length: {}\r\n\r\n", content.len());
        self.stream.write_all(header.as_bytes()).expect("write header");
        self.stream.write_all(content.as_bytes()).expect("write body");
        self.stream.flush().expect("flush");
    }

    fn send_response(&mut self, request_seq: i64, command: &str, success: bool, body: Option<Value>) {
        let seq = self.next_seq();
        self.write_message(&json!({
            "seq": seq,
            "type": "response",
            "request_seq": request_seq,
            "command": command,
            "success": success,
            "body": body,
        }));
    }

    fn send_event(&mut self, event: &str, body: Option<Value>) {
        let seq = self.next_seq();
        self.write_message(&json!({
            "seq": seq,
            "type": "event",
            "event": event,
            "body": body,
        }));
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }
}

fn read_message(reader: &mut BufReader<TcpStream>) -> Option<Value> {
    let mut headers = String::new();
    loop {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => {
                    line.push(byte[0]);
                    if line.ends_with(b"\r\n") || line.ends_with(b"\n") {
                        break;
                    }
                }
                Err(_) => return None,
            }
        }
        let line = String::from_utf8_lossy(&line).to_string();
        if line == "\r\n" || line == "\n" {
            break;
        }
        headers.push_str(&line);
    }

    let content_length: usize = headers
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    let mut buf = vec![0u8; content_length];
    reader.read_exact(&mut buf).ok()?;
    serde_json::from_slice(&buf).ok()
}

struct Breakpoint {
    line: i64,
    condition: Option<String>,
}

struct FakeAdapter {
    conn: Conn,
    breakpoints: HashMap<String, Vec<Breakpoint>>,
    mode: String,
    variables_ref_counter: i64,
    variables: HashMap<i64, Vec<Value>>,
    continues_seen: i64,
}

impl FakeAdapter {
    fn handle_initialize(&mut self, request_seq: i64) {
        let capabilities = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsFunctionBreakpoints": true,
            "supportsConditionalBreakpoints": true,
            "supportsHitConditionalBreakpoints": true,
            "supportsEvaluateForHovers": true,
            "supportsSetVariable": true,
            "supportsSetExpression": true,
            "supportsRestartRequest": true,
            "supportsExceptionInfoRequest": true,
            "supportTerminateDebuggee": true,
            "supportsLogPoints": true,
            "supportsTerminateRequest": true,
            "supportsPause": true,
        });
        self.conn.send_response(request_seq, "initialize", true, Some(capabilities));
        self.conn.send_event("initialized", None);
    }

    fn handle_launch(&mut self, request_seq: i64) {
        self.conn.send_response(request_seq, "launch", true, None);
        self.conn
            .send_event("thread", Some(json!({"reason": "started", "threadId": 1})));
        self.stop_if_configured();
    }

    fn handle_attach(&mut self, request_seq: i64) {
        self.conn.send_response(request_seq, "attach", true, None);
        self.stop_if_configured();
    }

    /// `stop-on-entry`, `stop-twice`, and `conditional-loop` all resolve to
    /// exactly one `stopped` event, emitted once the launch/attach
    /// turnaround is done.
    fn stop_if_configured(&mut self) {
        match self.mode.as_str() {
            "stop-on-entry" => {
                self.conn.send_event(
                    "stopped",
                    Some(json!({"reason": "entry", "threadId": 1, "allThreadsStopped": true})),
                );
            }
            "stop-twice" => {
                self.conn.send_event(
                    "stopped",
                    Some(json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true})),
                );
            }
            "conditional-loop" => {
                let target = self
                    .breakpoints
                    .values()
                    .flatten()
                    .find_map(|bp| bp.condition.as_deref().and_then(parse_equals_condition));
                if let Some(target) = target {
                    self.variables.insert(
                        1,
                        vec![json!({"name": "i", "value": target.to_string(), "type": "int", "variablesReference": 0})],
                    );
                    self.conn.send_event(
                        "stopped",
                        Some(json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true})),
                    );
                }
            }
            _ => {}
        }
    }

    fn handle_set_breakpoints(&mut self, request_seq: i64, args: Option<Value>) {
        let Some(args) = args else {
            self.conn.send_response(request_seq, "setBreakpoints", false, None);
            return;
        };
        let path = args
            .get("source")
            .and_then(|s| s.get("path"))
            .and_then(|p| p.as_str())
            .unwrap_or("unknown")
            .to_string();

        let specs = args
            .get("breakpoints")
            .and_then(|b| b.as_array())
            .cloned()
            .unwrap_or_default();

        let resolved: Vec<Breakpoint> = specs
            .iter()
            .map(|bp| Breakpoint {
                line: bp.get("line").and_then(|l| l.as_i64()).unwrap_or(0),
                condition: bp.get("condition").and_then(|c| c.as_str()).map(str::to_string),
            })
            .collect();

        let body_breakpoints: Vec<Value> = resolved
            .iter()
            .enumerate()
            .map(|(idx, bp)| {
                json!({"id": idx as i64 + 1, "verified": true, "line": bp.line})
            })
            .collect();

        self.breakpoints.insert(path, resolved);
        self.conn.send_response(
            request_seq,
            "setBreakpoints",
            true,
            Some(json!({"breakpoints": body_breakpoints})),
        );
    }

    fn handle_set_function_breakpoints(&mut self, request_seq: i64) {
        self.conn.send_response(
            request_seq,
            "setFunctionBreakpoints",
            true,
            Some(json!({"breakpoints": []})),
        );
    }

    fn handle_set_exception_breakpoints(&mut self, request_seq: i64) {
        self.conn
            .send_response(request_seq, "setExceptionBreakpoints", true, None);
    }

    fn handle_configuration_done(&mut self, request_seq: i64) {
        self.conn.send_response(request_seq, "configurationDone", true, None);
    }

    /// Every scenario but `stop-twice` only ever resumes once, from a
    /// pause already established at launch/attach time, and that resume
    /// always runs the simulated program to completion. `stop-twice`
    /// stops again on its first `continue` — dropping every
    /// `variablesReference` handed out before it, the way a real adapter
    /// discards stale ones on resume — and only completes on the second.
    fn handle_continue(&mut self, request_seq: i64) {
        self.conn.send_response(
            request_seq,
            "continue",
            true,
            Some(json!({"allThreadsContinued": true})),
        );

        if self.mode == "stop-twice" && self.continues_seen == 0 {
            self.continues_seen += 1;
            self.variables.clear();
            self.conn.send_event(
                "stopped",
                Some(json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true})),
            );
            return;
        }

        self.conn.send_event("terminated", None);
        self.conn.send_event("exited", Some(json!({"exitCode": 0})));
    }

    fn handle_step(&mut self, request_seq: i64, command: &str) {
        self.conn.send_response(request_seq, command, true, None);
        self.conn
            .send_event("stopped", Some(json!({"reason": "step", "threadId": 1, "allThreadsStopped": true})));
    }

    fn handle_pause(&mut self, request_seq: i64) {
        self.conn.send_response(request_seq, "pause", true, None);
        self.conn
            .send_event("stopped", Some(json!({"reason": "pause", "threadId": 1})));
    }

    fn handle_threads(&mut self, request_seq: i64) {
        self.conn.send_response(
            request_seq,
            "threads",
            true,
            Some(json!({"threads": [{"id": 1, "name": "MainThread"}]})),
        );
    }

    fn handle_stack_trace(&mut self, request_seq: i64) {
        let frames = vec![
            json!({"id": 1, "name": "<module>", "source": {"name": "t.py", "path": "/tmp/t.py"}, "line": 2, "column": 1}),
        ];
        self.conn.send_response(
            request_seq,
            "stackTrace",
            true,
            Some(json!({"stackFrames": frames, "totalFrames": frames.len()})),
        );
    }

    fn handle_scopes(&mut self, request_seq: i64) {
        self.variables_ref_counter += 1;
        let reference = self.variables_ref_counter;
        if !self.variables.contains_key(&reference) {
            self.variables.insert(
                reference,
                vec![json!({"name": "x", "value": "1", "type": "int", "variablesReference": 0})],
            );
        }
        self.conn.send_response(
            request_seq,
            "scopes",
            true,
            Some(json!({"scopes": [{"name": "Locals", "variablesReference": reference, "expensive": false}]})),
        );
    }

    fn handle_variables(&mut self, request_seq: i64, args: Option<Value>) {
        let reference = args
            .as_ref()
            .and_then(|a| a.get("variablesReference"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let vars = self
            .variables
            .get(&reference)
            .cloned()
            .or_else(|| self.variables.get(&1).cloned())
            .unwrap_or_else(|| vec![json!({"name": "x", "value": "1", "type": "int", "variablesReference": 0})]);
        self.conn
            .send_response(request_seq, "variables", true, Some(json!({"variables": vars})));
    }

    fn handle_evaluate(&mut self, request_seq: i64, args: Option<Value>) {
        let expression = args
            .as_ref()
            .and_then(|a| a.get("expression"))
            .and_then(|e| e.as_str())
            .unwrap_or("");

        let result = if expression == "i" {
            self.variables
                .get(&1)
                .and_then(|vars| vars.first())
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
                .unwrap_or("0")
                .to_string()
        } else {
            match expression {
                "x" => "1".to_string(),
                "x + y" => "42".to_string(),
                _ => "None".to_string(),
            }
        };

        self.conn.send_response(
            request_seq,
            "evaluate",
            true,
            Some(json!({"result": result, "type": "int", "variablesReference": 0})),
        );
    }

    fn handle_set_variable(&mut self, request_seq: i64, args: Option<Value>) {
        let value = args
            .as_ref()
            .and_then(|a| a.get("value"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        self.conn.send_response(
            request_seq,
            "setVariable",
            true,
            Some(json!({"value": value, "type": "int"})),
        );
    }

    fn handle_restart(&mut self, request_seq: i64) {
        self.conn.send_response(request_seq, "restart", true, None);
    }

    fn handle_disconnect(&mut self, request_seq: i64, command: &str) {
        self.conn.send_response(request_seq, command, true, None);
        self.conn.send_event("terminated", None);
        self.conn.send_event("exited", Some(json!({"exitCode": 0})));
    }

    fn handle_request(&mut self, msg: &Value) {
        let request_seq = msg.get("seq").and_then(|s| s.as_i64()).unwrap_or(0);
        let command = msg.get("command").and_then(|c| c.as_str()).unwrap_or("");
        let args = msg.get("arguments").cloned();

        match command {
            "initialize" => self.handle_initialize(request_seq),
            "launch" => self.handle_launch(request_seq),
            "attach" => self.handle_attach(request_seq),
            "setBreakpoints" => self.handle_set_breakpoints(request_seq, args),
            "setFunctionBreakpoints" => self.handle_set_function_breakpoints(request_seq),
            "setExceptionBreakpoints" => self.handle_set_exception_breakpoints(request_seq),
            "configurationDone" => self.handle_configuration_done(request_seq),
            "continue" => self.handle_continue(request_seq),
            "next" => self.handle_step(request_seq, "next"),
            "stepIn" => self.handle_step(request_seq, "stepIn"),
            "stepOut" => self.handle_step(request_seq, "stepOut"),
            "pause" => self.handle_pause(request_seq),
            "threads" => self.handle_threads(request_seq),
            "stackTrace" => self.handle_stack_trace(request_seq),
            "scopes" => self.handle_scopes(request_seq),
            "variables" => self.handle_variables(request_seq, args),
            "evaluate" => self.handle_evaluate(request_seq, args),
            "setVariable" => self.handle_set_variable(request_seq, args),
            "restart" => self.handle_restart(request_seq),
            "disconnect" | "terminate" => self.handle_disconnect(request_seq, command),
            other => {
                eprintln!("fake_dap_adapter: unknown command {other}");
                self.conn.send_response(request_seq, other, false, Some(json!({"message": "unsupported"})));
            }
        }
    }
}

fn parse_equals_condition(condition: &str) -> Option<i64> {
    let (var, value) = condition.split_once("==")?;
    if var.trim() != "i" {
        return None;
    }
    value.trim().parse().ok()
}

fn main() {
    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().expect("usage: fake_dap_adapter <port> [mode]").parse().expect("port must be u16");
    let mode = args.next().unwrap_or_default();

    let listener = TcpListener::bind(("127.0.0.1", port)).expect("bind fake adapter port");
    let (stream, _) = listener.accept().expect("accept client connection");

    if mode == "no-response" {
        // Hold the connection open without ever writing a byte back, so
        // the client's request timeout path is what resolves the test.
        loop {
            std::thread::sleep(std::time::Duration::from_secs(60));
        }
    }

    let write_stream = stream.try_clone().expect("clone stream for writer");
    let mut reader = BufReader::new(stream);
    let mut adapter = FakeAdapter {
        conn: Conn { stream: write_stream, seq: 0 },
        breakpoints: HashMap::new(),
        mode,
        variables_ref_counter: 0,
        variables: HashMap::new(),
        continues_seen: 0,
    };

    while let Some(msg) = read_message(&mut reader) {
        if msg.get("type").and_then(|t| t.as_str()) == Some("request") {
            adapter.handle_request(&msg);
        }
    }
}
