//! Adapter binary served over stdin/stdout.

use anyhow::anyhow;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

struct StdioDap {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: i64,
}

impl StdioDap {
    fn start() -> anyhow::Result<Self> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_midap"))
            .args(["--stdio", "--config", "/dev/null"])
            .env("RUST_LOG", "off")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        Ok(Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            seq: 1,
        })
    }

    fn call(&mut self, command: &str, arguments: Value) -> anyhow::Result<Value> {
        let seq = self.seq;
        self.seq += 1;
        let payload = serde_json::to_vec(&json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        }))?;
        write!(self.stdin, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stdin.write_all(&payload)?;
        self.stdin.flush()?;

        loop {
            let msg = self.read_message()?;
            if msg["type"] == "response" && msg["request_seq"] == seq {
                return Ok(msg);
            }
        }
    }

    fn read_message(&mut self) -> anyhow::Result<Value> {
        let mut content_length = None;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(anyhow!("adapter closed stdout"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse::<usize>()?);
            }
        }
        let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length"))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

#[test]
fn test_stdio_handshake() -> anyhow::Result<()> {
    let mut dap = StdioDap::start()?;

    let rsp = dap.call("initialize", json!({"adapterID": "midap"}))?;
    assert_eq!(rsp["success"], true);
    assert_eq!(rsp["body"]["supportsConfigurationDoneRequest"], true);

    let rsp = dap.call("launch", json!({
        "program": "/bin/true",
        "miDebuggerPath": "/nonexistent/midap-test-gdb",
    }))?;
    assert_eq!(rsp["success"], false, "{rsp}");

    let rsp = dap.call("disconnect", json!({}))?;
    assert_eq!(rsp["success"], true);

    let status = dap.child.wait()?;
    assert!(status.success());
    Ok(())
}
