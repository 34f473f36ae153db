use crate::breakpoint::{BreakpointStatus, FunctionBreakpoint, SourceBreakpoint};
use crate::dap::sourcemap::SourceMap;
use crate::mi::types::{Breakpoint, Library, Thread};
use crate::session::{Instruction, Scope, StackFrame};
use crate::variables::Variable;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// DAP request envelope.
#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope.
///
/// The protocol allows responses without `body`, a raw `Value` keeps the envelope
/// independent of the command.
#[derive(Debug, Serialize)]
pub struct DapResponse<'a> {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Source {
    /// Client side source of a backend path.
    pub fn from_backend_path(path: &str, source_map: &SourceMap) -> Self {
        let path = source_map.to_client(path);
        let name = path.rsplit(['/', '\\']).next().map(ToString::to_string);
        Self {
            name,
            path: Some(path),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetBreakpointsArguments {
    pub source: Source,
    pub breakpoints: Vec<SourceBreakpoint>,
    /// Deprecated form of `breakpoints`.
    pub lines: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetFunctionBreakpointsArguments {
    pub breakpoints: Vec<FunctionBreakpoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakpointLocationsArguments {
    pub source: Source,
    pub line: i64,
    pub end_line: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadArguments {
    pub thread_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackTraceArguments {
    pub thread_id: i64,
    pub start_frame: Option<usize>,
    pub levels: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateArguments {
    pub expression: String,
    pub frame_id: Option<i64>,
    /// `watch`, `repl`, `hover` or `clipboard`.
    pub context: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisassembleArguments {
    pub memory_reference: String,
    pub offset: i64,
    pub instruction_offset: i64,
    pub instruction_count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisconnectArguments {
    pub restart: bool,
    pub terminate_debuggee: Option<bool>,
}

pub fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsFunctionBreakpoints": true,
        "supportsConditionalBreakpoints": true,
        "supportsHitConditionalBreakpoints": true,
        "supportsEvaluateForHovers": true,
        "supportsTerminateRequest": true,
        "supportTerminateDebuggee": true,
        "supportsRestartRequest": true,
        "supportsDisassembleRequest": true,
        "supportsModulesRequest": true,
        "supportsBreakpointLocationsRequest": true,
        "supportsPauseRequest": true,
        "exceptionBreakpointFilters": [],
    })
}

pub fn breakpoint(bp: &Breakpoint, source_map: &SourceMap) -> Value {
    let mut body = json!({
        "id": bp.number,
        "verified": bp.enabled,
    });
    if let Some(line) = bp.line {
        body["line"] = json!(line);
    }
    if let Some(path) = bp.path() {
        body["source"] = json!(Source::from_backend_path(path, source_map));
    }
    if let Some(addr) = bp.addr {
        body["instructionReference"] = json!(format!("{addr:#x}"));
    }
    body
}

pub fn breakpoint_status(status: &BreakpointStatus, source_map: &SourceMap) -> Value {
    match &status.breakpoint {
        Some(bp) => breakpoint(bp, source_map),
        None => json!({
            "verified": false,
            "line": status.line,
            "message": status.message,
        }),
    }
}

pub fn thread(thread: &Thread) -> Value {
    json!({
        "id": thread.id,
        "name": thread.display_name(),
    })
}

pub fn stack_frame(frame: &StackFrame, source_map: &SourceMap) -> Value {
    let name = match (&frame.frame.func, &frame.frame.from) {
        (Some(func), _) => func.clone(),
        (None, Some(from)) => format!("?? from {from}"),
        (None, None) => "??".to_string(),
    };
    let mut body = json!({
        "id": frame.id,
        "name": name,
        "line": frame.frame.line.unwrap_or_default(),
        "column": 0,
    });
    if let Some(path) = frame.frame.path() {
        body["source"] = json!(Source::from_backend_path(path, source_map));
    }
    if let Some(addr) = frame.frame.addr {
        body["instructionPointerReference"] = json!(format!("{addr:#x}"));
    }
    body
}

pub fn scope(scope: &Scope) -> Value {
    json!({
        "name": scope.name,
        "variablesReference": scope.reference,
        "expensive": scope.expensive,
    })
}

pub fn variable(var: &Variable) -> Value {
    json!({
        "name": var.name,
        "value": var.value,
        "type": var.type_name,
        "evaluateName": var.evaluate_name,
        "variablesReference": var.reference,
    })
}

pub fn evaluate_result(var: &Variable) -> Value {
    json!({
        "result": var.value,
        "type": var.type_name,
        "variablesReference": var.reference,
    })
}

pub fn instruction(instruction: &Instruction) -> Value {
    json!({
        "address": format!("{:#x}", instruction.address),
        "instruction": instruction.instruction,
        "symbol": instruction.symbol,
    })
}

pub fn module(library: &Library) -> Value {
    let mut body = json!({
        "id": library.id,
        "name": library.name(),
        "path": library.path(),
        "symbolStatus": if library.symbols_loaded { "Symbols loaded." } else { "Symbols not found." },
    });
    if let Some((from, to)) = library.ranges.first() {
        body["addressRange"] = json!(format!("{from:#x}-{to:#x}"));
    }
    body
}
