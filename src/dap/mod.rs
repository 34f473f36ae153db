//! Debug Adapter Protocol frontend.
//!
//! [`DebugSession`] reads requests from a [`FrameReader`], routes them to a
//! [`Session`] and writes responses. Events produced by the session reach the client
//! through [`hook::DapHook`] that shares the same [`FrameWriter`].

pub mod hook;
pub mod protocol;
pub mod sourcemap;
pub mod tracer;
pub mod transport;

use crate::bridge::Spawner;
use crate::config::Config;
use crate::dap::hook::DapHook;
use crate::dap::protocol::*;
use crate::dap::sourcemap::SourceMap;
use crate::dap::transport::{FrameReader, FrameWriter};
use crate::error::Error;
use crate::session::{AttachRequest, LaunchRequest, Session, SessionHook};
use crate::utils::lock;
use crate::weak_error;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub struct DebugSession {
    session: Arc<Session>,
    reader: FrameReader,
    output: Arc<FrameWriter>,
    hook: Arc<DapHook>,
    source_map: Arc<Mutex<SourceMap>>,
}

/// Deserialize request arguments, absent arguments are the default ones.
fn arguments<T: DeserializeOwned + Default>(req: &DapRequest) -> Result<T, Error> {
    if req.arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(req.arguments.clone())
        .map_err(|e| Error::InvalidArguments(format!("{}: {e}", req.command)))
}

impl DebugSession {
    pub fn new(
        config: Config,
        spawner: Arc<dyn Spawner>,
        reader: FrameReader,
        writer: FrameWriter,
    ) -> Self {
        let output = Arc::new(writer);
        let source_map = Arc::new(Mutex::new(SourceMap::default()));
        let hook = Arc::new(DapHook::new(output.clone(), source_map.clone()));
        let session_hook: Arc<dyn SessionHook> = hook.clone();
        let session = Arc::new(Session::new(config, spawner, session_hook));
        Self {
            session,
            reader,
            output,
            hook,
            source_map,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn send_success(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_response_raw(req, true, None, None)
    }

    fn send_success_body<T: Serialize>(&self, req: &DapRequest, body: T) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_response_raw(req, true, None, Some(body))
    }

    fn send_err(&self, req: &DapRequest, message: impl ToString) -> anyhow::Result<()> {
        self.send_response_raw(req, false, Some(message.to_string()), None)
    }

    fn send_response_raw(
        &self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        Ok(self.output.send_response(req, success, message, body)?)
    }

    fn send_event(&self, name: &'static str) -> anyhow::Result<()> {
        Ok(self.output.send_event(name, None)?)
    }

    fn handle_initialize(&self, req: &DapRequest) -> anyhow::Result<()> {
        if let Some(client) = req.arguments.get("clientID").and_then(Value::as_str) {
            info!(target: "dap", "client: {client}");
        }
        self.session.initialize()?;
        self.send_success_body(req, capabilities())
    }

    fn handle_launch(&self, req: &DapRequest) -> anyhow::Result<()> {
        let request: LaunchRequest = arguments(req)?;
        *lock(&self.source_map) = SourceMap::from_launch_args(&req.arguments);
        self.hook.set_start_method("launch");
        self.session.launch(request)?;
        self.send_success(req)?;
        self.send_event("initialized")
    }

    fn handle_attach(&self, req: &DapRequest) -> anyhow::Result<()> {
        let request: AttachRequest = arguments(req)?;
        *lock(&self.source_map) = SourceMap::from_launch_args(&req.arguments);
        self.hook.set_start_method("attach");
        self.session.attach(request)?;
        self.send_success(req)?;
        self.send_event("initialized")
    }

    fn handle_configuration_done(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.session.configuration_done()?;
        self.send_success(req)
    }

    fn handle_set_breakpoints(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetBreakpointsArguments = arguments(req)?;
        let Some(client_path) = args.source.path.as_deref() else {
            return Err(Error::InvalidArguments("setBreakpoints: source path is required".to_string()).into());
        };
        let path = lock(&self.source_map).to_backend(client_path);

        let statuses = if args.breakpoints.is_empty() && !args.lines.is_empty() {
            self.session.request_breakpoint_set(&path, &args.lines)?
        } else {
            self.session.set_breakpoints(&path, &args.breakpoints)?
        };

        let source_map = lock(&self.source_map).clone();
        let breakpoints = statuses
            .iter()
            .map(|status| breakpoint_status(status, &source_map))
            .collect_vec();
        self.send_success_body(req, json!({ "breakpoints": breakpoints }))
    }

    fn handle_set_function_breakpoints(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetFunctionBreakpointsArguments = arguments(req)?;
        let statuses = self.session.set_function_breakpoints(&args.breakpoints)?;
        let source_map = lock(&self.source_map).clone();
        let breakpoints = statuses
            .iter()
            .map(|status| breakpoint_status(status, &source_map))
            .collect_vec();
        self.send_success_body(req, json!({ "breakpoints": breakpoints }))
    }

    /// No exception filters are offered, the request is acknowledged only.
    fn handle_set_exception_breakpoints(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_success_body(req, json!({ "breakpoints": [] }))
    }

    /// Every requested line is a candidate, the backend decides on insertion.
    fn handle_breakpoint_locations(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: BreakpointLocationsArguments = arguments(req)?;
        let end = args.end_line.unwrap_or(args.line).max(args.line);
        let breakpoints = (args.line..=end)
            .map(|line| json!({ "line": line }))
            .collect_vec();
        self.send_success_body(req, json!({ "breakpoints": breakpoints }))
    }

    fn handle_threads(&self, req: &DapRequest) -> anyhow::Result<()> {
        let threads = self.session.threads()?;
        let threads = threads.iter().map(thread).collect_vec();
        self.send_success_body(req, json!({ "threads": threads }))
    }

    fn handle_stack_trace(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: StackTraceArguments = arguments(req)?;
        let trace = self.session.stack_trace(
            args.thread_id,
            args.start_frame.unwrap_or_default(),
            args.levels,
        )?;
        let source_map = lock(&self.source_map).clone();
        let frames = trace
            .frames
            .iter()
            .map(|frame| stack_frame(frame, &source_map))
            .collect_vec();
        self.send_success_body(
            req,
            json!({
                "stackFrames": frames,
                "totalFrames": trace.total,
            }),
        )
    }

    fn handle_scopes(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: ScopesArguments = arguments(req)?;
        let scopes = self.session.scopes(args.frame_id)?;
        let scopes = scopes.iter().map(scope).collect_vec();
        self.send_success_body(req, json!({ "scopes": scopes }))
    }

    fn handle_variables(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: VariablesArguments = arguments(req)?;
        let vars = self.session.variables(args.variables_reference)?;
        let vars = vars.iter().map(variable).collect_vec();
        self.send_success_body(req, json!({ "variables": vars }))
    }

    fn handle_continue(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.session.continue_execution()?;
        self.send_success_body(req, json!({ "allThreadsContinued": true }))
    }

    fn handle_next(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: ThreadArguments = arguments(req)?;
        self.session.next(args.thread_id)?;
        self.send_success(req)
    }

    fn handle_step_in(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: ThreadArguments = arguments(req)?;
        self.session.step_in(args.thread_id)?;
        self.send_success(req)
    }

    fn handle_step_out(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: ThreadArguments = arguments(req)?;
        self.session.step_out(args.thread_id)?;
        self.send_success(req)
    }

    fn handle_pause(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.session.pause()?;
        self.send_success(req)
    }

    fn handle_evaluate(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: EvaluateArguments = arguments(req)?;
        if args.expression.trim().is_empty() {
            return Err(Error::InvalidArguments("evaluate: empty expression".to_string()).into());
        }
        debug!(target: "dap", "evaluate {:?} in {:?} context", args.expression, args.context);
        let var = self.session.evaluate(&args.expression, args.frame_id)?;
        self.send_success_body(req, evaluate_result(&var))
    }

    fn handle_disassemble(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: DisassembleArguments = arguments(req)?;
        let instructions = self.session.disassemble(
            &args.memory_reference,
            args.offset,
            args.instruction_offset,
            args.instruction_count,
        )?;
        let instructions = instructions.iter().map(instruction).collect_vec();
        self.send_success_body(req, json!({ "instructions": instructions }))
    }

    fn handle_modules(&self, req: &DapRequest) -> anyhow::Result<()> {
        let modules = self.session.modules();
        let total = modules.len();
        let modules = modules.iter().map(module).collect_vec();
        self.send_success_body(
            req,
            json!({
                "modules": modules,
                "totalModules": total,
            }),
        )
    }

    fn handle_restart(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.session.restart()?;
        self.send_success(req)
    }

    fn handle_terminate(&self, req: &DapRequest) -> anyhow::Result<()> {
        self.session.terminate()?;
        self.send_success(req)
    }

    fn handle_disconnect(&self, req: &DapRequest) -> anyhow::Result<()> {
        let args: DisconnectArguments = arguments(req)?;
        debug!(target: "dap", "disconnect, restart: {}", args.restart);
        self.session.disconnect(args.terminate_debuggee);
        self.send_success(req)
    }

    /// Handle a single request, returns `false` when the client is done with the session.
    fn dispatch(&mut self, req: &DapRequest) -> anyhow::Result<bool> {
        match req.command.as_str() {
            "initialize" => self.handle_initialize(req)?,
            "launch" => self.handle_launch(req)?,
            "attach" => self.handle_attach(req)?,
            "configurationDone" => self.handle_configuration_done(req)?,
            "setBreakpoints" => self.handle_set_breakpoints(req)?,
            "setFunctionBreakpoints" => self.handle_set_function_breakpoints(req)?,
            "setExceptionBreakpoints" => self.handle_set_exception_breakpoints(req)?,
            "breakpointLocations" => self.handle_breakpoint_locations(req)?,
            "threads" => self.handle_threads(req)?,
            "stackTrace" => self.handle_stack_trace(req)?,
            "scopes" => self.handle_scopes(req)?,
            "variables" => self.handle_variables(req)?,
            "continue" => self.handle_continue(req)?,
            "next" => self.handle_next(req)?,
            "stepIn" => self.handle_step_in(req)?,
            "stepOut" => self.handle_step_out(req)?,
            "pause" => self.handle_pause(req)?,
            "evaluate" => self.handle_evaluate(req)?,
            "disassemble" => self.handle_disassemble(req)?,
            "modules" => self.handle_modules(req)?,
            "restart" => self.handle_restart(req)?,
            "terminate" => self.handle_terminate(req)?,
            "disconnect" => {
                self.handle_disconnect(req)?;
                return Ok(false);
            }
            other => return Err(Error::UnsupportedCommand(other.to_string()).into()),
        }
        Ok(true)
    }

    /// Serve the client until it disconnects or the stream ends.
    pub fn run(mut self) -> anyhow::Result<()> {
        let result = self.serve();
        // no-op when the client already disconnected
        self.session.disconnect(None);
        result
    }

    fn serve(&mut self) -> anyhow::Result<()> {
        loop {
            let msg = match self.reader.read_frame() {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!(target: "dap", "client closed the stream");
                    return Ok(());
                }
                Err(e) if !e.is_fatal() => {
                    warn!(target: "dap", "drop message: {e:#}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let req: DapRequest = match serde_json::from_value(msg) {
                Ok(req) => req,
                Err(e) => {
                    warn!(target: "dap", "drop message: {e:#}");
                    continue;
                }
            };
            if req.r#type != "request" {
                debug!(target: "dap", "ignore {} message", req.r#type);
                continue;
            }

            let cont = match self.dispatch(&req) {
                Ok(cont) => cont,
                Err(e) => {
                    if e.downcast_ref::<Error>().is_some_and(Error::is_fatal) {
                        return Err(e);
                    }
                    debug!(target: "dap", "{} failed: {e:#}", req.command);
                    weak_error!(self.send_err(&req, format!("{e:#}")), "send response:");
                    true
                }
            };
            if !cont {
                return Ok(());
            }
        }
    }
}
