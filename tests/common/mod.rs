//! Raw-protocol DAP client used by the integration tests.
//!
//! Speaks framed JSON over one end of a socket pair while the adapter under
//! test owns the other end, so every scenario exercises the real codec and
//! both session threads.

#![allow(dead_code)]

use anyhow::anyhow;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cobble_debugger::transport::Transport;
use cobble_debugger::{DebugAdapter, FrameContext};

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const BLOCK_PROBE: Duration = Duration::from_millis(300);

pub struct DapClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
    next_seq: i64,
    pending_events: VecDeque<Value>,
}

impl DapClient {
    pub fn new(stream: UnixStream) -> anyhow::Result<DapClient> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_write_timeout(Some(READ_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(DapClient {
            stream,
            reader,
            next_seq: 0,
            pending_events: VecDeque::new(),
        })
    }

    pub fn send_request(&mut self, command: &str, arguments: Value) -> anyhow::Result<i64> {
        self.next_seq += 1;
        let seq = self.next_seq;
        let payload = serde_json::to_vec(&json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        }))?;
        write!(self.stream, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(seq)
    }

    fn read_message(&mut self) -> anyhow::Result<Value> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(anyhow!("connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse()?);
            }
        }
        let len = content_length.ok_or_else(|| anyhow!("missing Content-Length"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Response for `request_seq`; events seen on the way are queued.
    pub fn read_response(&mut self, request_seq: i64) -> anyhow::Result<Value> {
        loop {
            let msg = self.read_message()?;
            if msg["type"] == "event" {
                self.pending_events.push_back(msg);
                continue;
            }
            if msg["type"] == "response" && msg["request_seq"] == json!(request_seq) {
                return Ok(msg);
            }
            return Err(anyhow!("unexpected message: {msg}"));
        }
    }

    /// Send a request and assert a successful response.
    pub fn request_ok(&mut self, command: &str, arguments: Value) -> anyhow::Result<Value> {
        let seq = self.send_request(command, arguments)?;
        let response = self.read_response(seq)?;
        anyhow::ensure!(
            response["success"] == json!(true),
            "{command} failed: {response}"
        );
        Ok(response)
    }

    /// Next event named `name`, from the queue or the wire.
    pub fn wait_for_event(&mut self, name: &str) -> anyhow::Result<Value> {
        if let Some(pos) = self.pending_events.iter().position(|e| e["event"] == name) {
            return Ok(self.pending_events.remove(pos).expect("position exists"));
        }
        loop {
            let msg = self.read_message()?;
            if msg["type"] != "event" {
                return Err(anyhow!("expected {name} event, got: {msg}"));
            }
            if msg["event"] == name {
                return Ok(msg);
            }
            self.pending_events.push_back(msg);
        }
    }
}

/// Spawn an adapter on its own thread (construction blocks until the client
/// configures) and hand back the client side.
pub fn start_adapter() -> (DapClient, JoinHandle<DebugAdapter>) {
    let (client_stream, server_stream) = UnixStream::pair().expect("socket pair");
    let handle = std::thread::spawn(move || {
        let transport = Transport::from_stream(server_stream).expect("transport");
        DebugAdapter::connect(transport, None).expect("adapter connects")
    });
    let client = DapClient::new(client_stream).expect("client");
    (client, handle)
}

/// initialize → initialized → launch → configurationDone, returning the
/// initialize response for capability checks.
pub fn handshake(client: &mut DapClient, supports_variable_type: bool) -> anyhow::Result<Value> {
    let response = client.request_ok(
        "initialize",
        json!({
            "clientID": "tests",
            "supportsVariableType": supports_variable_type,
        }),
    )?;
    client.wait_for_event("initialized")?;
    client.request_ok("launch", json!({}))?;
    client.request_ok("configurationDone", json!({}))?;
    Ok(response)
}

/// Mutable variable snapshot standing in for the interpreter state.
#[derive(Default)]
pub struct ScriptedContext {
    values: Mutex<BTreeMap<String, String>>,
}

impl ScriptedContext {
    pub fn shared() -> Arc<ScriptedContext> {
        Arc::new(ScriptedContext::default())
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

impl FrameContext for ScriptedContext {
    fn variable_names(&self) -> Vec<String> {
        self.values.lock().unwrap().keys().cloned().collect()
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }
}
