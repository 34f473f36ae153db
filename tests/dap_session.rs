
use dap_client::{DapSession, SOURCE};
use serde_json::{json, Value};

fn assert_response(response: &Value, command: &str, request_seq: i64, success: bool) {
    assert_eq!(response.get("type").and_then(Value::as_str), Some("response"));
    assert_eq!(response.get("command").and_then(Value::as_str), Some(command));
    assert_eq!(
        response.get("request_seq").and_then(Value::as_i64),
        Some(request_seq)
    );
    assert_eq!(
        response.get("success").and_then(Value::as_bool),
        Some(success),
        "response: {response}"
    );
    assert!(response.get("seq").and_then(Value::as_i64).is_some());
}

#[test]
fn test_initialize_capabilities() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    let seq = session.client.send_request("initialize", json!({"clientID": "test"}))?;
    let rsp = session.client.read_response(seq)?;
    assert_response(&rsp, "initialize", seq, true);

    let caps = &rsp["body"];
    for cap in [
        "supportsConfigurationDoneRequest",
        "supportsFunctionBreakpoints",
        "supportsConditionalBreakpoints",
        "supportsHitConditionalBreakpoints",
        "supportsDisassembleRequest",
        "supportsTerminateRequest",
    ] {
        assert_eq!(caps[cap], true, "{cap}");
    }

    let seq = session.client.send_request("disconnect", json!({}))?;
    assert_response(&session.client.read_response(seq)?, "disconnect", seq, true);
    session.join()
}

#[test]
fn test_unknown_and_out_of_order_requests() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;

    let seq = session.client.send_request("readMemory", json!({}))?;
    let rsp = session.client.read_response(seq)?;
    assert_response(&rsp, "readMemory", seq, false);
    assert!(rsp["message"].as_str().unwrap().contains("readMemory"));

    // nothing is launched yet
    let seq = session.client.send_request("threads", json!({}))?;
    assert_response(&session.client.read_response(seq)?, "threads", seq, false);

    let rsp = session.client.call("initialize", json!({}))?;
    assert_eq!(rsp["success"], true);
    let rsp = session.client.call("launch", json!({}))?;
    assert_eq!(rsp["success"], false, "program is required: {rsp}");

    session.client.hang_up();
    session.join()
}

#[test]
fn test_malformed_frame_is_skipped() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    session
        .client
        .write_bytes(b"Content-Length: nope\r\n\r\n")?;
    session.client.write_raw(b"{not json")?;
    session
        .client
        .write_bytes(b"Content-Length: 18446744073709551615\r\n\r\n")?;
    session
        .client
        .write_bytes(b"Content-Length: \xff\r\n\r\n")?;

    let seq = session.client.send_request("initialize", json!({}))?;
    assert_response(&session.client.read_response(seq)?, "initialize", seq, true);

    session.client.hang_up();
    session.join()
}

#[test]
fn test_breakpoint_stop_and_inspection() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    let stopped = session.launch_to_breakpoint(5)?;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], 1);

    let rsp = session.client.call("threads", json!({}))?;
    assert_eq!(rsp["body"]["threads"], json!([{"id": 1, "name": "hello #1"}]));

    let rsp = session
        .client
        .call("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 20}))?;
    let frames = rsp["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(rsp["body"]["totalFrames"], 2);
    assert_eq!(frames[0]["name"], "main");
    assert_eq!(frames[0]["line"], 5);
    assert_eq!(frames[0]["source"]["path"], SOURCE);
    let frame_id = frames[0]["id"].as_i64().unwrap();

    let rsp = session.client.call("scopes", json!({"frameId": frame_id}))?;
    let scopes = rsp["body"]["scopes"].as_array().unwrap();
    assert_eq!(scopes[0]["name"], "Locals");
    let locals = scopes[0]["variablesReference"].clone();

    let rsp = session
        .client
        .call("variables", json!({"variablesReference": locals}))?;
    let vars = rsp["body"]["variables"].as_array().unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars[0]["name"], "count");
    assert_eq!(vars[0]["value"], "42");
    assert_eq!(vars[0]["variablesReference"], 0);
    assert_eq!(vars[1]["name"], "origin");
    let origin = vars[1]["variablesReference"].as_i64().unwrap();
    assert!(origin > 2);

    let rsp = session
        .client
        .call("variables", json!({"variablesReference": origin}))?;
    let fields = rsp["body"]["variables"].as_array().unwrap();
    assert_eq!(fields[0]["name"], "x");
    assert_eq!(fields[0]["evaluateName"], "origin.x");
    assert_eq!(fields[1]["value"], "2");

    let rsp = session
        .client
        .call("evaluate", json!({"expression": "count", "frameId": frame_id, "context": "watch"}))?;
    assert_eq!(rsp["body"]["result"], "42");
    assert_eq!(rsp["body"]["type"], "int");

    let seq = session
        .client
        .send_request("disconnect", json!({"terminateDebuggee": true}))?;
    assert_response(&session.client.read_response(seq)?, "disconnect", seq, true);
    assert!(session.backend.sent("<shutdown>"));
    session.join()
}

#[test]
fn test_step_and_run_to_exit() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    session.launch_to_breakpoint(5)?;

    let rsp = session.client.call("next", json!({"threadId": 1}))?;
    assert_eq!(rsp["success"], true, "{rsp}");
    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "step");
    assert!(session.backend.sent("-exec-next --thread 1"));

    let rsp = session.client.call("continue", json!({"threadId": 1}))?;
    assert_eq!(rsp["body"]["allThreadsContinued"], true);
    let exited = session.client.wait_for_event("exited")?;
    assert_eq!(exited["body"]["exitCode"], 0);
    session.client.wait_for_event("terminated")?;

    let rsp = session.client.call("disconnect", json!({}))?;
    assert_eq!(rsp["success"], true);
    session.join()
}

#[test]
fn test_breakpoint_update_and_rejection() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    session.launch_to_breakpoint(5)?;

    let rsp = session.client.call(
        "setBreakpoints",
        json!({"source": {"path": SOURCE}, "breakpoints": [{"line": 5}, {"line": 99}]}),
    )?;
    let bps = rsp["body"]["breakpoints"].as_array().unwrap();
    assert_eq!(bps[0]["verified"], true);
    assert_eq!(bps[0]["id"], 1);
    assert_eq!(bps[1]["verified"], false);
    assert!(bps[1]["message"].as_str().unwrap().contains("No line 99"));

    let inserts = session
        .backend
        .journal()
        .iter()
        .filter(|c| c.starts_with("-break-insert"))
        .count();
    assert_eq!(inserts, 2, "line 5 is not inserted twice");

    let rsp = session.client.call(
        "setBreakpoints",
        json!({"source": {"path": SOURCE}, "breakpoints": []}),
    )?;
    assert_eq!(rsp["body"]["breakpoints"], json!([]));
    assert!(session.backend.sent("-break-delete 1"));

    let rsp = session.client.call(
        "setFunctionBreakpoints",
        json!({"breakpoints": [{"name": "main", "condition": "argc > 1"}]}),
    )?;
    assert_eq!(rsp["body"]["breakpoints"][0]["verified"], true);
    assert!(session
        .backend
        .sent("-break-insert -f -c \"argc > 1\" \"main\""));

    let rsp = session.client.call("setExceptionBreakpoints", json!({"filters": []}))?;
    assert_eq!(rsp["success"], true);

    session.client.hang_up();
    session.join()
}

#[test]
fn test_disassemble_around_pc() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    session.launch_to_breakpoint(5)?;

    let rsp = session.client.call(
        "disassemble",
        json!({"memoryReference": "0x401136", "instructionOffset": 0, "instructionCount": 3}),
    )?;
    let instructions = rsp["body"]["instructions"].as_array().unwrap();
    assert_eq!(instructions.len(), 3);
    assert_eq!(instructions[0]["address"], "0x401136");
    assert_eq!(instructions[0]["instruction"], "nop");
    assert_eq!(instructions[1]["symbol"], "main+1");

    session.client.hang_up();
    session.join()
}
