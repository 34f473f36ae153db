//! Debug session.
//!
//! A session owns a backend channel, a variable tree, a breakpoint synchronizer and a
//! thread cache. Client requests and backend events both drive its state machine:
//! `Uninitialized → Initialized → Configuring → Running ⇄ Stopped → Terminated`.
pub mod hook;
pub mod state;

pub use hook::{NopHook, SessionHook};
pub use state::SessionState;

use crate::breakpoint::{BreakpointStatus, BreakpointSync, FunctionBreakpoint, SourceBreakpoint};
use crate::bridge::{BackendEvent, MiChannel, OutputCategory, SpawnOptions, Spawner};
use crate::config::Config;
use crate::error::Error;
use crate::mi;
use crate::mi::types::{AsyncContext, Frame, Library, StopReason, Thread, VarObject};
use crate::mi::value::parse_u64;
use crate::session::state::ThreadCache;
use crate::utils::{lock, wait_while};
use crate::variables::{FrameSelector, VarTree, Variable, LOCALS_REF, NO_CHILDREN, REGISTERS_REF};
use crate::{muted_error, weak_error};
use itertools::Itertools;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Upper bound of a single instruction length.
const MAX_INSTRUCTION_LEN: u64 = 16;
/// Largest memory window disassembled by a single request.
const MAX_DISASSEMBLY_BYTES: u64 = 64 * 1024;

static INSTRUCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:=>)?\s*(0x[0-9a-fA-F]+)\s*<([^>]*)>:\s*(.*?)\s*$").expect("must compile")
});

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Overrides the configured backend executable.
    pub mi_debugger_path: Option<PathBuf>,
    pub stop_at_entry: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachRequest {
    #[serde(alias = "pid")]
    pub process_id: i64,
    pub program: Option<PathBuf>,
    pub mi_debugger_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Launch(LaunchRequest),
    Attach(AttachRequest),
}

impl Target {
    fn spawn_options(&self) -> SpawnOptions {
        match self {
            Target::Launch(req) => SpawnOptions {
                program: req.mi_debugger_path.clone(),
                cwd: req.cwd.clone(),
            },
            Target::Attach(req) => SpawnOptions {
                program: req.mi_debugger_path.clone(),
                cwd: None,
            },
        }
    }

    fn program_name(&self) -> String {
        let program = match self {
            Target::Launch(req) => Some(&req.program),
            Target::Attach(req) => req.program.as_ref(),
        };
        program
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "debuggee".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub name: &'static str,
    pub reference: i64,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    /// Client visible frame id, see [`FrameSelector::encode`].
    pub id: i64,
    pub frame: Frame,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: u64,
    /// Function and offset, like `main+4`.
    pub symbol: Option<String>,
    pub instruction: String,
}

impl Instruction {
    /// Parse a console disassembly line: `=> 0x0000000000401137 <main+1>:\tmov %rsp,%rbp`.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = INSTRUCTION_RE.captures(line.trim_end())?;
        let symbol = caps[2].trim();
        Some(Instruction {
            address: parse_u64(&caps[1])?,
            symbol: (!symbol.is_empty()).then(|| symbol.to_string()),
            instruction: caps[3].replace('\t', " "),
        })
    }
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    configuration_done: bool,
    target: Option<Target>,
    /// Next stop is caused by a pause request.
    pause_requested: bool,
    /// Debuggee is killed for a restart, its exit is not reported.
    restarting: bool,
    stop_thread: Option<i64>,
    libraries: Vec<Library>,
}

fn stop_reason(ctx: &AsyncContext, pause_requested: bool) -> &'static str {
    if pause_requested {
        return "pause";
    }
    match &ctx.reason {
        StopReason::BreakpointHit => "breakpoint",
        StopReason::WatchpointTrigger
        | StopReason::ReadWatchpointTrigger
        | StopReason::AccessWatchpointTrigger => "data breakpoint",
        StopReason::EndSteppingRange
        | StopReason::FunctionFinished
        | StopReason::LocationReached => "step",
        StopReason::SignalReceived if ctx.signal_name.as_deref() == Some("SIGINT") => "pause",
        StopReason::SignalReceived => "exception",
        _ => "pause",
    }
}

/// Quote a debuggee argument if the backend would split it.
fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        mi::quote(arg)
    } else {
        arg.to_string()
    }
}

pub struct Session {
    config: Config,
    spawner: Arc<dyn Spawner>,
    hook: Arc<dyn SessionHook>,
    inner: Mutex<Inner>,
    /// Fired when the debuggee starts running or the session ends.
    run_gate: Condvar,
    cache: Arc<Mutex<ThreadCache>>,
    vars: VarTree,
    breakpoints: Mutex<BreakpointSync>,
    channel: Mutex<Option<Arc<dyn MiChannel>>>,
    /// Bumped each time the channel is released, events of a released backend are dropped.
    backend_epoch: AtomicU64,
    exited_sent: AtomicBool,
    terminated_sent: AtomicBool,
}

impl Session {
    pub fn new(config: Config, spawner: Arc<dyn Spawner>, hook: Arc<dyn SessionHook>) -> Self {
        let vars = VarTree::new(config.timeouts.request());
        Self {
            config,
            spawner,
            hook,
            inner: Mutex::default(),
            run_gate: Condvar::new(),
            cache: Arc::default(),
            vars,
            breakpoints: Mutex::default(),
            channel: Mutex::default(),
            backend_epoch: AtomicU64::new(0),
            exited_sent: AtomicBool::new(false),
            terminated_sent: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    fn expect_state(
        &self,
        command: &'static str,
        allowed: &[SessionState],
    ) -> Result<SessionState, Error> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(Error::InvalidState { command, state })
        }
    }

    fn set_state(&self, state: SessionState) {
        lock(&self.inner).state = state;
        self.run_gate.notify_all();
    }

    fn channel_opt(&self) -> Option<Arc<dyn MiChannel>> {
        lock(&self.channel).clone()
    }

    fn channel(&self) -> Result<Arc<dyn MiChannel>, Error> {
        self.channel_opt().ok_or(Error::NotLaunched)
    }

    fn release_channel(&self) -> Option<Arc<dyn MiChannel>> {
        let mut channel = lock(&self.channel);
        self.backend_epoch.fetch_add(1, Ordering::SeqCst);
        channel.take()
    }

    fn is_attached(&self) -> bool {
        matches!(lock(&self.inner).target, Some(Target::Attach(_)))
    }

    fn default_frame(&self) -> Option<FrameSelector> {
        lock(&self.inner)
            .stop_thread
            .map(|thread_id| FrameSelector::new(thread_id, 0))
    }

    fn send_terminated(&self) {
        if !self.terminated_sent.swap(true, Ordering::SeqCst) {
            self.hook.on_terminated();
        }
    }

    /// Start (or restart after termination) the session handshake.
    ///
    /// After termination the previous backend is shut down and every handle, cached
    /// thread and breakpoint of the previous run is forgotten.
    pub fn initialize(&self) -> Result<(), Error> {
        let state = self.state();
        if !matches!(
            state,
            SessionState::Uninitialized | SessionState::Terminated
        ) {
            debug!(target: "session", "repeated initialize while {state}");
            return Ok(());
        }

        if let Some(channel) = self.release_channel() {
            debug!(target: "session", "shut down backend of the previous run");
            channel.shutdown();
        }
        self.vars.reset_on_resume();
        lock(&self.cache).invalidate();
        *lock(&self.breakpoints) = BreakpointSync::default();

        *lock(&self.inner) = Inner {
            state: SessionState::Initialized,
            ..Inner::default()
        };
        self.exited_sent.store(false, Ordering::SeqCst);
        self.terminated_sent.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn launch(self: &Arc<Self>, request: LaunchRequest) -> Result<(), Error> {
        if request.program.as_os_str().is_empty() {
            return Err(Error::InvalidArguments("`program` is required".to_string()));
        }
        self.start("launch", Target::Launch(request))
    }

    pub fn attach(self: &Arc<Self>, request: AttachRequest) -> Result<(), Error> {
        if request.process_id <= 0 {
            return Err(Error::InvalidArguments("`processId` is required".to_string()));
        }
        self.start("attach", Target::Attach(request))
    }

    fn start(self: &Arc<Self>, command: &'static str, target: Target) -> Result<(), Error> {
        let state = self.expect_state(
            command,
            &[SessionState::Initialized, SessionState::Configuring],
        )?;
        if self.channel_opt().is_some() {
            return Err(Error::InvalidState { command, state });
        }

        let (channel, events) = self.spawner.spawn(&target.spawn_options())?;
        if let Err(e) = Self::prepare(channel.as_ref(), &target) {
            channel.shutdown();
            return Err(e);
        }
        info!(target: "session", "{command} `{}`", target.program_name());

        let epoch = {
            let mut current = lock(&self.channel);
            *current = Some(channel.clone());
            self.backend_epoch.load(Ordering::SeqCst)
        };
        let configuration_done = {
            let mut inner = lock(&self.inner);
            inner.target = Some(target);
            inner.configuration_done
        };

        let applied = lock(&self.breakpoints).apply_deferred(channel.as_ref());
        for (path, statuses) in applied {
            let verified = statuses.iter().filter(|s| s.is_verified()).count();
            debug!(target: "session", "deferred breakpoints of `{path}`: {verified}/{} placed", statuses.len());
        }

        self.spawn_event_pump(events, epoch)?;
        if configuration_done {
            self.run(channel.as_ref())?;
        }
        Ok(())
    }

    fn prepare(channel: &dyn MiChannel, target: &Target) -> Result<(), Error> {
        match target {
            Target::Launch(req) => {
                channel.request(&format!(
                    "-file-exec-and-symbols {}",
                    mi::quote(&req.program.to_string_lossy())
                ))?;
                if !req.args.is_empty() {
                    let args = req.args.iter().map(|arg| quote_arg(arg)).join(" ");
                    channel.request(&format!("-exec-arguments {args}"))?;
                }
                if let Some(cwd) = &req.cwd {
                    channel.request(&format!(
                        "-environment-cd {}",
                        mi::quote(&cwd.to_string_lossy())
                    ))?;
                }
                for (key, value) in &req.env {
                    channel.request(&format!("-gdb-set environment {key}={value}"))?;
                }
                if req.stop_at_entry {
                    channel.request("-break-insert -t main")?;
                }
            }
            Target::Attach(req) => {
                if let Some(program) = &req.program {
                    channel.request(&format!(
                        "-file-exec-and-symbols {}",
                        mi::quote(&program.to_string_lossy())
                    ))?;
                }
                channel.request(&format!("-target-attach {}", req.process_id))?;
            }
        }
        Ok(())
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        events: Receiver<BackendEvent>,
        epoch: u64,
    ) -> Result<(), Error> {
        let session = Arc::downgrade(self);
        thread::Builder::new()
            .name("session-events".to_string())
            .spawn(move || {
                for event in events {
                    let Some(session) = session.upgrade() else {
                        break;
                    };
                    if session.backend_epoch.load(Ordering::SeqCst) != epoch {
                        debug!(target: "session", "drop {event:?} of a released backend");
                        continue;
                    }
                    session.handle_backend_event(event);
                }
                debug!(target: "session", "event pump finished");
            })
            .map(|_| ())
            .map_err(|e| Error::Spawn("session-events".to_string(), e.to_string()))
    }

    fn run(&self, channel: &dyn MiChannel) -> Result<(), Error> {
        let command = if self.is_attached() {
            "-exec-continue"
        } else {
            "-exec-run"
        };
        channel.request(command).map(|_| ())
    }

    pub fn configuration_done(&self) -> Result<(), Error> {
        self.expect_state("configurationDone", &[SessionState::Initialized])?;
        {
            let mut inner = lock(&self.inner);
            inner.state = SessionState::Configuring;
            inner.configuration_done = true;
        }
        match self.channel_opt() {
            Some(channel) => self.run(channel.as_ref()),
            None => Ok(()),
        }
    }

    pub fn set_breakpoints(
        &self,
        path: &str,
        requested: &[SourceBreakpoint],
    ) -> Result<Vec<BreakpointStatus>, Error> {
        self.expect_state(
            "setBreakpoints",
            &[
                SessionState::Initialized,
                SessionState::Configuring,
                SessionState::Running,
                SessionState::Stopped,
            ],
        )?;
        let channel = self.channel_opt();
        Ok(lock(&self.breakpoints).set_source_breakpoints(channel.as_deref(), path, requested))
    }

    pub fn set_function_breakpoints(
        &self,
        requested: &[FunctionBreakpoint],
    ) -> Result<Vec<BreakpointStatus>, Error> {
        self.expect_state(
            "setFunctionBreakpoints",
            &[
                SessionState::Initialized,
                SessionState::Configuring,
                SessionState::Running,
                SessionState::Stopped,
            ],
        )?;
        let channel = self.channel_opt();
        Ok(lock(&self.breakpoints).set_function_breakpoints(channel.as_deref(), requested))
    }

    pub fn threads(&self) -> Result<Vec<Thread>, Error> {
        let state = self.expect_state(
            "threads",
            &[
                SessionState::Configuring,
                SessionState::Running,
                SessionState::Stopped,
            ],
        )?;
        if state == SessionState::Configuring {
            let inner = lock(&self.inner);
            let (_inner, timed_out) = wait_while(
                &self.run_gate,
                inner,
                self.config.timeouts.run_gate(),
                |inner| inner.state == SessionState::Configuring,
            );
            if timed_out {
                debug!(target: "session", "debuggee is not running yet, no threads");
                return Ok(vec![]);
            }
        }

        let Some(channel) = self.channel_opt() else {
            return Ok(vec![]);
        };
        let epoch = {
            let cache = lock(&self.cache);
            if let Some(threads) = cache.threads() {
                return Ok(threads.to_vec());
            }
            cache.epoch()
        };
        let threads = Thread::list(&channel.request("-thread-info")?);
        lock(&self.cache).store_threads(epoch, threads.clone());
        Ok(threads)
    }

    /// Frames of a thread, `levels` of zero or `None` means all frames.
    pub fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: usize,
        levels: Option<usize>,
    ) -> Result<StackTrace, Error> {
        let state = self.expect_state(
            "stackTrace",
            &[SessionState::Running, SessionState::Stopped],
        )?;
        if state == SessionState::Running {
            return Ok(StackTrace::default());
        }
        let channel = self.channel()?;

        let cached = {
            let cache = lock(&self.cache);
            cache
                .frames(thread_id)
                .map(<[Frame]>::to_vec)
                .ok_or(cache.epoch())
        };
        let frames = match cached {
            Ok(frames) => frames,
            Err(epoch) => {
                let payload =
                    channel.request(&format!("-stack-list-frames --thread {thread_id}"))?;
                let frames = Frame::list(&payload);
                lock(&self.cache).store_frames(epoch, thread_id, frames.clone());
                frames
            }
        };

        let total = frames.len();
        let levels = levels.filter(|&l| l > 0).unwrap_or(usize::MAX);
        let frames = frames
            .into_iter()
            .skip(start_frame)
            .take(levels)
            .map(|frame| StackFrame {
                id: FrameSelector::new(thread_id, frame.level).encode(),
                frame,
            })
            .collect();
        Ok(StackTrace { frames, total })
    }

    pub fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>, Error> {
        self.expect_state("scopes", &[SessionState::Stopped])?;
        self.vars.select_frame(FrameSelector::decode(frame_id));
        Ok(vec![
            Scope {
                name: "Locals",
                reference: LOCALS_REF,
                expensive: false,
            },
            Scope {
                name: "Registers",
                reference: REGISTERS_REF,
                expensive: true,
            },
        ])
    }

    /// Children of a variable handle, scopes are populated on first use.
    pub fn variables(&self, reference: i64) -> Result<Vec<Variable>, Error> {
        let state = self.expect_state(
            "variables",
            &[SessionState::Running, SessionState::Stopped],
        )?;
        if state == SessionState::Running || reference == NO_CHILDREN {
            return Ok(vec![]);
        }
        let channel = self.channel()?;

        let frame = match self.vars.selected_frame() {
            Some(frame) => frame,
            None => {
                let Some(frame) = self.default_frame() else {
                    return Ok(vec![]);
                };
                self.vars.select_frame(frame);
                frame
            }
        };

        match reference {
            LOCALS_REF => {
                if let Some(cached) = self.vars.cached(LOCALS_REF) {
                    return Ok(cached);
                }
                let payload = channel.request(&format!(
                    "-stack-list-variables --thread {} --frame {} --no-values",
                    frame.thread_id, frame.level
                ))?;
                let names: Vec<String> = payload
                    .get_list("variables")
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.as_tuple()?.get_string("name"))
                    .collect();
                self.vars
                    .populate_scope(channel.as_ref(), LOCALS_REF, frame, &names)
            }
            REGISTERS_REF => self.vars.populate_registers(channel.as_ref(), frame),
            reference => self.vars.resolve_children(channel.as_ref(), reference),
        }
    }

    fn resume(
        &self,
        command: &'static str,
        mi_command: &str,
        thread_id: Option<i64>,
    ) -> Result<(), Error> {
        self.expect_state(command, &[SessionState::Stopped])?;
        if self.vars.outstanding_fetches() > 0 {
            return Err(Error::FetchInProgress);
        }
        let channel = self.channel()?;
        let mi_command = match thread_id {
            Some(thread_id) => format!("{mi_command} --thread {thread_id}"),
            None => mi_command.to_string(),
        };
        channel.request(&mi_command).map(|_| ())
    }

    pub fn continue_execution(&self) -> Result<(), Error> {
        self.resume("continue", "-exec-continue", None)
    }

    pub fn next(&self, thread_id: i64) -> Result<(), Error> {
        self.resume("next", "-exec-next", Some(thread_id))
    }

    pub fn step_in(&self, thread_id: i64) -> Result<(), Error> {
        self.resume("stepIn", "-exec-step", Some(thread_id))
    }

    pub fn step_out(&self, thread_id: i64) -> Result<(), Error> {
        self.resume("stepOut", "-exec-finish", Some(thread_id))
    }

    /// Interrupt the running debuggee, the stop is reported with a `pause` reason.
    pub fn pause(&self) -> Result<(), Error> {
        self.expect_state("pause", &[SessionState::Running])?;
        let channel = self.channel()?;
        lock(&self.inner).pause_requested = true;
        channel.interrupt().map_err(|e| {
            lock(&self.inner).pause_requested = false;
            e
        })
    }

    /// Evaluate an expression, in a stopped debuggee the result is expandable.
    pub fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<Variable, Error> {
        let state = self.expect_state(
            "evaluate",
            &[SessionState::Running, SessionState::Stopped],
        )?;
        let channel = self.channel()?;

        if state == SessionState::Running {
            let payload = channel.request(&format!(
                "-data-evaluate-expression {}",
                mi::quote(expression)
            ))?;
            return Ok(Variable {
                name: expression.to_string(),
                evaluate_name: expression.to_string(),
                type_name: None,
                value: payload.get_string("value").unwrap_or_default(),
                reference: NO_CHILDREN,
                object: None,
            });
        }

        let frame = frame_id
            .map(FrameSelector::decode)
            .or_else(|| self.vars.selected_frame())
            .or_else(|| self.default_frame());
        let frame_options = frame
            .map(|f| format!("--thread {} --frame {} ", f.thread_id, f.level))
            .unwrap_or_default();
        let object = self.vars.next_object_name();
        let payload = channel.request(&format!(
            "-var-create {frame_options}{object} * {}",
            mi::quote(expression)
        ))?;
        let obj = VarObject::from_tuple(&payload)?;
        Ok(self.vars.adopt(expression, &obj))
    }

    /// Disassemble `count` instructions around `memory_reference + offset`.
    pub fn disassemble(
        &self,
        memory_reference: &str,
        offset: i64,
        instruction_offset: i64,
        count: usize,
    ) -> Result<Vec<Instruction>, Error> {
        self.expect_state("disassemble", &[SessionState::Stopped])?;
        let channel = self.channel()?;

        let bad_reference =
            || Error::InvalidArguments(format!("bad memory reference `{memory_reference}`"));
        let target = parse_u64(memory_reference)
            .ok_or_else(bad_reference)?
            .checked_add_signed(offset)
            .ok_or_else(bad_reference)?;
        let back = instruction_offset
            .min(0)
            .unsigned_abs()
            .saturating_mul(MAX_INSTRUCTION_LEN)
            .min(MAX_DISASSEMBLY_BYTES);
        let start = target.saturating_sub(back);
        let bytes = (count as u64)
            .saturating_add(instruction_offset.unsigned_abs())
            .saturating_mul(MAX_INSTRUCTION_LEN)
            .min(MAX_DISASSEMBLY_BYTES);

        let instructions: Vec<Instruction> = channel
            .disassemble(start, bytes)?
            .iter()
            .filter_map(|line| Instruction::parse(line))
            .collect();
        let anchor = instructions
            .iter()
            .position(|i| i.address >= target)
            .unwrap_or_default() as i64;
        let first = usize::try_from(anchor.saturating_add(instruction_offset)).unwrap_or_default();
        Ok(instructions.into_iter().skip(first).take(count).collect())
    }

    /// Shared libraries reported so far.
    pub fn modules(&self) -> Vec<Library> {
        lock(&self.inner).libraries.clone()
    }

    /// Kill the debuggee and run it again, breakpoints are kept.
    pub fn restart(&self) -> Result<(), Error> {
        self.expect_state(
            "restart",
            &[SessionState::Running, SessionState::Stopped],
        )?;
        if self.is_attached() {
            return Err(Error::InvalidArguments(
                "restart is supported for launched programs only".to_string(),
            ));
        }
        let channel = self.channel()?;

        lock(&self.inner).restarting = true;
        if let Err(e) = channel.kill() {
            lock(&self.inner).restarting = false;
            return Err(e);
        }
        self.vars.reset_on_resume();
        lock(&self.cache).invalidate();
        {
            let mut inner = lock(&self.inner);
            inner.state = SessionState::Configuring;
            inner.stop_thread = None;
            inner.libraries.clear();
        }
        channel.request("-exec-run").map(|_| ())
    }

    pub fn terminate(&self) -> Result<(), Error> {
        self.teardown(Some(true));
        Ok(())
    }

    /// End the session. An attached debuggee is detached unless `terminate_debuggee` is set.
    pub fn disconnect(&self, terminate_debuggee: Option<bool>) {
        self.teardown(terminate_debuggee);
    }

    fn teardown(&self, terminate_debuggee: Option<bool>) {
        if let Some(channel) = self.release_channel() {
            if self.is_attached() && !terminate_debuggee.unwrap_or(false) {
                weak_error!(channel.request("-target-detach"), "detach:");
            }
            channel.shutdown();
        }
        lock(&self.breakpoints).clear_all();
        self.set_state(SessionState::Terminated);
        self.send_terminated();
    }

    /// Replace breakpoints of `path` with plain line breakpoints.
    pub fn request_breakpoint_set(
        &self,
        path: &str,
        lines: &[i64],
    ) -> Result<Vec<BreakpointStatus>, Error> {
        let requested = lines
            .iter()
            .map(|&line| SourceBreakpoint {
                line,
                ..SourceBreakpoint::default()
            })
            .collect_vec();
        self.set_breakpoints(path, &requested)
    }

    pub fn request_launch(self: &Arc<Self>, request: LaunchRequest) -> Result<(), Error> {
        self.launch(request)
    }

    pub fn request_evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<Variable, Error> {
        self.evaluate(expression, frame_id)
    }

    /// Apply an asynchronous backend event.
    pub fn handle_backend_event(&self, event: BackendEvent) {
        if self.state().is_terminated() && !matches!(event, BackendEvent::Exited) {
            debug!(target: "session", "ignore {event:?} after termination");
            return;
        }

        match event {
            BackendEvent::Running { thread_id } => {
                {
                    let mut inner = lock(&self.inner);
                    inner.state = SessionState::Running;
                    inner.restarting = false;
                }
                self.run_gate.notify_all();
                self.vars.reset_on_resume();
                lock(&self.cache).invalidate();
                self.hook.on_continued(thread_id);
            }
            BackendEvent::Stopped(ctx) => self.on_stop(ctx),
            BackendEvent::Output { category, text } => self.hook.on_output(category, &text),
            BackendEvent::BreakpointCreated(bp) => {
                lock(&self.breakpoints).on_created(bp.clone());
                self.hook.on_breakpoint_changed("new", &bp);
            }
            BackendEvent::BreakpointModified(bp) => {
                lock(&self.breakpoints).on_modified(bp.clone());
                self.hook.on_breakpoint_changed("changed", &bp);
            }
            BackendEvent::BreakpointDeleted(id) => {
                let removed = lock(&self.breakpoints).on_deleted(id);
                if let Some(bp) = removed {
                    self.hook.on_breakpoint_changed("removed", &bp);
                }
            }
            BackendEvent::LibraryLoaded(library) => {
                {
                    let mut inner = lock(&self.inner);
                    inner.libraries.retain(|l| l.id != library.id);
                    inner.libraries.push(library.clone());
                }
                self.hook.on_module_event("new", &library);
                let symbols = if library.symbols_loaded {
                    "Symbols loaded."
                } else {
                    "Symbols not loaded."
                };
                self.hook.on_output(
                    OutputCategory::Console,
                    &format!("Loaded '{}'. {symbols}\n", library.path()),
                );
            }
            BackendEvent::LibraryUnloaded(library) => {
                lock(&self.inner).libraries.retain(|l| l.id != library.id);
                self.hook.on_module_event("removed", &library);
            }
            BackendEvent::ThreadCreated(id) => {
                lock(&self.cache).invalidate();
                self.hook.on_thread_event("started", id);
            }
            BackendEvent::ThreadExited(id) => {
                lock(&self.cache).invalidate();
                self.hook.on_thread_event("exited", id);
            }
            BackendEvent::ProcessStarted { pid } => {
                let name = {
                    let mut inner = lock(&self.inner);
                    inner.restarting = false;
                    inner
                        .target
                        .as_ref()
                        .map(Target::program_name)
                        .unwrap_or_default()
                };
                self.run_gate.notify_all();
                self.hook.on_process(&name, pid);
            }
            BackendEvent::ProcessExited { exit_code } => {
                if lock(&self.inner).restarting {
                    debug!(target: "session", "debuggee killed for restart");
                    return;
                }
                self.on_debuggee_exit(exit_code.unwrap_or_default());
            }
            BackendEvent::Exited => {
                warn!(target: "session", "backend exited");
                if let Some(channel) = self.release_channel() {
                    // reaps the backend process
                    channel.shutdown();
                }
                lock(&self.breakpoints).clear_all();
                self.set_state(SessionState::Terminated);
                self.send_terminated();
            }
        }
    }

    fn on_stop(&self, ctx: AsyncContext) {
        if ctx.reason.is_exit() {
            self.on_debuggee_exit(ctx.exit_code.unwrap_or_default());
            return;
        }

        self.vars.reset_on_resume();
        let epoch = {
            let mut cache = lock(&self.cache);
            cache.invalidate();
            cache.epoch()
        };
        let (report, reason) = {
            let mut inner = lock(&self.inner);
            if ctx.thread_id.is_some() {
                inner.stop_thread = ctx.thread_id;
            }
            let pause_requested = std::mem::take(&mut inner.pause_requested);
            // a stop before the debuggee runs (attach) is not reported
            let report = matches!(
                inner.state,
                SessionState::Running | SessionState::Stopped
            );
            if report {
                inner.state = SessionState::Stopped;
            }
            (report, stop_reason(&ctx, pause_requested))
        };
        self.run_gate.notify_all();
        if !report {
            debug!(target: "session", "stop before configuration is done: {:?}", ctx.reason);
            return;
        }

        let description = ctx.signal_meaning.as_deref();
        self.hook
            .on_stopped(reason, ctx.thread_id, ctx.frame.as_ref(), description);

        if let Some(channel) = self.channel_opt() {
            self.prefetch(channel.as_ref(), epoch, ctx.thread_id);
        }
    }

    /// Refresh thread list and the call stack of the stopped thread in background.
    fn prefetch(&self, channel: &dyn MiChannel, epoch: u64, thread_id: Option<i64>) {
        let cache = self.cache.clone();
        muted_error!(channel.request_async(
            "-thread-info",
            Box::new(move |reply| {
                if let Ok(record) = reply {
                    lock(&cache).store_threads(epoch, Thread::list(&record.payload));
                }
            }),
        ));

        if let Some(thread_id) = thread_id {
            let cache = self.cache.clone();
            muted_error!(channel.request_async(
                &format!("-stack-list-frames --thread {thread_id}"),
                Box::new(move |reply| {
                    if let Ok(record) = reply {
                        lock(&cache).store_frames(epoch, thread_id, Frame::list(&record.payload));
                    }
                }),
            ));
        }
    }

    fn on_debuggee_exit(&self, code: i32) {
        info!(target: "session", "debuggee exited with code {code}");
        self.vars.reset_on_resume();
        self.set_state(SessionState::Terminated);
        if !self.exited_sent.swap(true, Ordering::SeqCst) {
            self.hook.on_exited(code);
        }
        self.send_terminated();
    }
}
