//! Backend process bridge.
//!
//! Owns the backend child process, writes token-prefixed commands into its stdin and
//! correlates result records from its stdout with pending commands. Asynchronous records
//! are published as [`BackendEvent`]s.
pub mod line;
pub mod pending;

use crate::backend::Backend;
use crate::bridge::line::LineBuffer;
use crate::bridge::pending::{encode, Completion, Continuation, PendingCommand, PendingTable};
use crate::config::{BackendConfig, Timeouts};
use crate::dap::tracer::FileTracer;
use crate::error::Error;
use crate::mi::types::{AsyncContext, Breakpoint, Library};
use crate::mi::value::Tuple;
use crate::mi::{self, AsyncKind, AsyncRecord, Record, ResultClass, ResultRecord, StreamKind};
use crate::utils::{lock, wait_while};
use crate::{muted_error, weak_error};
use log::{debug, trace, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use std::{mem, thread};
use strum_macros::IntoStaticStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
}

/// Asynchronous happenings of the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Running { thread_id: Option<i64> },
    Stopped(AsyncContext),
    Output { category: OutputCategory, text: String },
    BreakpointCreated(Breakpoint),
    BreakpointModified(Breakpoint),
    BreakpointDeleted(u32),
    LibraryLoaded(Library),
    LibraryUnloaded(Library),
    ThreadCreated(i64),
    ThreadExited(i64),
    ProcessStarted { pid: Option<i64> },
    ProcessExited { exit_code: Option<i32> },
    /// Backend process is gone, sent exactly once.
    Exited,
}

/// Out-of-band interruption of the running debuggee.
pub trait Interrupter: Send + Sync {
    fn interrupt(&self) -> Result<(), Error>;
}

/// Interrupts the backend by SIGINT, the backend forwards it to the debuggee.
pub struct SignalInterrupter {
    pid: Pid,
}

impl Interrupter for SignalInterrupter {
    fn interrupt(&self) -> Result<(), Error> {
        signal::kill(self.pid, Signal::SIGINT).map_err(Error::Signal)
    }
}

/// Command channel to an MI backend.
///
/// Continuations run on the backend reader thread and must not issue blocking requests.
pub trait MiChannel: Send + Sync {
    /// Issue a command and wait for its result record.
    fn request(&self, command: &str) -> Result<Tuple, Error>;

    /// Issue a command, `continuation` receives the result record.
    fn request_async(&self, command: &str, continuation: Continuation) -> Result<u32, Error>;

    /// Interrupt the running debuggee.
    fn interrupt(&self) -> Result<(), Error>;

    /// Kill the debuggee, the backend stays alive.
    fn kill(&self) -> Result<(), Error>;

    /// Disassemble `bytes` bytes starting at `address`, return raw instruction lines.
    fn disassemble(&self, address: u64, bytes: u64) -> Result<Vec<String>, Error>;

    /// Quit the backend, kill it if it does not exit in time.
    fn shutdown(&self);
}

#[derive(Default)]
struct RunState {
    alive: bool,
    running: bool,
    suppress_stops: usize,
    suppress_running: usize,
    resume_token: Option<u32>,
}

#[derive(Default)]
struct Disassembly {
    lines: Vec<String>,
    waiter: Option<SyncSender<Result<Vec<String>, Error>>>,
}

pub struct Bridge {
    backend: Backend,
    timeouts: Timeouts,
    writer: Mutex<Box<dyn Write + Send>>,
    interrupter: Box<dyn Interrupter>,
    pending: Mutex<PendingTable>,
    lines: Mutex<LineBuffer>,
    run_state: Mutex<RunState>,
    run_cond: Condvar,
    disassembly: Arc<Mutex<Disassembly>>,
    in_flight: Mutex<()>,
    events: Sender<BackendEvent>,
    exited_sent: AtomicBool,
    child: Mutex<Option<Child>>,
    tracer: Option<FileTracer>,
}

fn log_failure(command: String) -> Continuation {
    Box::new(move |reply| {
        if let Err(e) = reply {
            warn!(target: "bridge", "`{command}` failed: {e:#}");
        }
    })
}

impl Bridge {
    /// Create a bridge over an already connected command sink.
    pub fn from_parts(
        backend: Backend,
        writer: Box<dyn Write + Send>,
        interrupter: Box<dyn Interrupter>,
        timeouts: Timeouts,
    ) -> (Self, Receiver<BackendEvent>) {
        let (events, rx) = mpsc::channel();
        let bridge = Self {
            backend,
            timeouts,
            writer: Mutex::new(writer),
            interrupter,
            pending: Mutex::default(),
            lines: Mutex::default(),
            run_state: Mutex::new(RunState {
                alive: true,
                ..RunState::default()
            }),
            run_cond: Condvar::new(),
            disassembly: Arc::default(),
            in_flight: Mutex::new(()),
            events,
            exited_sent: AtomicBool::new(false),
            child: Mutex::new(None),
            tracer: None,
        };
        (bridge, rx)
    }

    /// Start a backend process and its reader threads.
    pub fn spawn(
        config: &BackendConfig,
        program: Option<PathBuf>,
        cwd: Option<PathBuf>,
        timeouts: Timeouts,
        tracer: Option<FileTracer>,
    ) -> Result<(Arc<Self>, Receiver<BackendEvent>), Error> {
        let backend = config.kind;
        let program = program
            .or_else(|| config.path.clone())
            .unwrap_or_else(|| PathBuf::from(backend.default_program()));
        let spawn_err = |e: String| Error::Spawn(program.display().to_string(), e);
        let resolved = which::which(&program).map_err(|e| spawn_err(e.to_string()))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&config.args)
            .args(backend.launch_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;
        debug!(target: "bridge", "backend {} started, pid {}", resolved.display(), child.id());

        let stdin = child.stdin.take().ok_or_else(|| spawn_err("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_err("no stdout".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| spawn_err("no stderr".into()))?;
        let interrupter = SignalInterrupter {
            pid: Pid::from_raw(child.id() as i32),
        };

        let (mut bridge, rx) =
            Bridge::from_parts(backend, Box::new(stdin), Box::new(interrupter), timeouts);
        bridge.tracer = tracer;
        bridge.child = Mutex::new(Some(child));
        let bridge = Arc::new(bridge);

        let reader = bridge.clone();
        thread::Builder::new()
            .name("mi-stdout".to_string())
            .spawn(move || {
                let mut stdout = stdout;
                let mut buf = [0u8; 4096];
                loop {
                    match stdout.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => reader.on_child_output(&buf[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            warn!(target: "bridge", "read backend output: {e}");
                            break;
                        }
                    }
                }
                reader.on_child_closed();
            })
            .map_err(|e| spawn_err(e.to_string()))?;

        let reader = bridge.clone();
        thread::Builder::new()
            .name("mi-stderr".to_string())
            .spawn(move || reader.drain_stderr(stderr))
            .map_err(|e| spawn_err(e.to_string()))?;

        for command in backend.setup_commands() {
            weak_error!(bridge.request(command), "backend setup:");
        }

        Ok((bridge, rx))
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.run_state).alive
    }

    pub fn is_running(&self) -> bool {
        lock(&self.run_state).running
    }

    /// Issue a command without waiting for the result, failures are logged.
    pub fn issue_command(&self, command: &str) -> Result<u32, Error> {
        self.submit(
            command,
            Completion::OneShot,
            log_failure(command.to_string()),
        )
    }

    /// Issue a command, `continuation` runs on the reader thread once the result arrives.
    pub fn issue_command_and_await(
        &self,
        command: &str,
        completion: Completion,
        continuation: Continuation,
    ) -> Result<u32, Error> {
        self.submit(command, completion, continuation)
    }

    /// Remove a pending command, its reply will be discarded.
    pub fn forget(&self, token: u32) -> bool {
        lock(&self.pending).forget(token)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    fn submit(
        &self,
        command: &str,
        completion: Completion,
        continuation: Continuation,
    ) -> Result<u32, Error> {
        let mut writer = lock(&self.writer);

        let token = {
            let mut pending = lock(&self.pending);
            if !self.is_alive() {
                return Err(Error::BackendGone);
            }
            let token = pending.next_token();
            pending.insert(token, PendingCommand::new(command, completion, continuation));
            token
        };

        let needs_pause = self.is_running() && !self.backend.is_interrupt_safe(command);
        let paused = if needs_pause {
            if let Err(e) = self.pause_for_command() {
                self.forget(token);
                return Err(e);
            }
            true
        } else {
            false
        };

        if let Err(e) = self.write_line(&mut **writer, token, command) {
            self.forget(token);
            return Err(e);
        }

        if paused && !self.backend.ends_inferior(command) {
            self.resume_after_command(&mut **writer)?;
        }
        Ok(token)
    }

    /// Interrupt the debuggee and wait until the stop is reported. The stop is consumed
    /// by the bridge.
    fn pause_for_command(&self) -> Result<(), Error> {
        {
            let mut state = lock(&self.run_state);
            if !state.running {
                return Ok(());
            }
            state.suppress_stops += 1;
        }
        debug!(target: "bridge", "interrupt debuggee to issue a command");

        if let Err(e) = self.interrupter.interrupt() {
            let mut state = lock(&self.run_state);
            state.suppress_stops = state.suppress_stops.saturating_sub(1);
            return Err(e);
        }

        let state = lock(&self.run_state);
        let (mut state, timed_out) = wait_while(
            &self.run_cond,
            state,
            self.timeouts.interrupt(),
            |s| s.running && s.alive,
        );
        if timed_out {
            state.suppress_stops = state.suppress_stops.saturating_sub(1);
            return Err(Error::Timeout("interrupt".to_string()));
        }
        if !state.alive {
            return Err(Error::BackendGone);
        }
        Ok(())
    }

    fn resume_after_command(&self, writer: &mut dyn Write) -> Result<(), Error> {
        let command = self.backend.continue_command();
        let token = {
            let mut pending = lock(&self.pending);
            let token = pending.next_token();
            pending.insert(
                token,
                PendingCommand::new(command, Completion::OneShot, log_failure(command.to_string())),
            );
            token
        };
        {
            let mut state = lock(&self.run_state);
            state.suppress_running += 1;
            state.resume_token = Some(token);
        }
        self.write_line(writer, token, command).map_err(|e| {
            self.forget(token);
            let mut state = lock(&self.run_state);
            state.suppress_running = state.suppress_running.saturating_sub(1);
            state.resume_token = None;
            e
        })
    }

    fn write_line(&self, writer: &mut dyn Write, token: u32, command: &str) -> Result<(), Error> {
        let line = encode(token, command);
        trace!(target: "bridge", "-> {}", line.trim_end());
        if let Some(tracer) = &self.tracer {
            tracer.traffic("mi->", &line);
        }
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| {
                warn!(target: "bridge", "write to backend: {e}");
                Error::BackendGone
            })
    }

    /// Blocking round-trip: issue a command and wait for its result with a timeout.
    ///
    /// Must not be called from a continuation.
    pub fn request(&self, command: &str) -> Result<Tuple, Error> {
        let _in_flight = lock(&self.in_flight);
        let (tx, rx) = mpsc::sync_channel(1);
        let token = self.submit(
            command,
            Completion::OneShot,
            Box::new(move |reply| {
                _ = tx.try_send(reply);
            }),
        )?;

        match rx.recv_timeout(self.timeouts.request()) {
            Ok(reply) => reply.map(|record| record.payload),
            Err(RecvTimeoutError::Timeout) => {
                self.forget(token);
                warn!(target: "bridge", "no reply for `{command}` (token {token})");
                Err(Error::Timeout(command.to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::BackendExited),
        }
    }

    /// Disassemble through the console interpreter, instruction lines are collected until
    /// the end-of-dump marker or the command result.
    pub fn disassemble(&self, address: u64, bytes: u64) -> Result<Vec<String>, Error> {
        let _in_flight = lock(&self.in_flight);
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut disassembly = lock(&self.disassembly);
            disassembly.lines.clear();
            disassembly.waiter = Some(tx);
        }

        let shared = self.disassembly.clone();
        let command = self.backend.disassemble_command(address, bytes);
        let submitted = self.submit(
            &command,
            Completion::OneShot,
            Box::new(move |reply| {
                let mut disassembly = lock(&shared);
                if let Some(waiter) = disassembly.waiter.take() {
                    let lines = mem::take(&mut disassembly.lines);
                    _ = waiter.try_send(reply.map(|_| lines));
                }
            }),
        );
        let token = match submitted {
            Ok(token) => token,
            Err(e) => {
                lock(&self.disassembly).waiter = None;
                return Err(e);
            }
        };

        match rx.recv_timeout(self.timeouts.request()) {
            Ok(result) => result,
            Err(_) => {
                self.forget(token);
                lock(&self.disassembly).waiter = None;
                Err(Error::Timeout(command))
            }
        }
    }

    pub fn interrupt(&self) -> Result<(), Error> {
        if !self.is_alive() {
            return Err(Error::BackendGone);
        }
        self.interrupter.interrupt()
    }

    /// Quit the backend, wait for it for a while and kill it if it is still alive.
    pub fn shutdown(&self) {
        if self.is_alive() {
            muted_error!(self.issue_command(self.backend.quit_command()));
        }

        let Some(mut child) = lock(&self.child).take() else {
            return;
        };
        let deadline = Instant::now() + self.timeouts.shutdown();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: "bridge", "backend exited with {status}");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                _ => break,
            }
        }
        warn!(target: "bridge", "backend did not quit in time, killing it");
        muted_error!(child.kill());
        muted_error!(child.wait());
    }

    fn emit(&self, event: BackendEvent) {
        _ = self.events.send(event);
    }

    /// Feed a chunk of backend stdout.
    pub fn on_child_output(&self, bytes: &[u8]) {
        let lines = lock(&self.lines).push(bytes);
        for line in lines {
            self.handle_line(&line);
        }
    }

    /// Forward backend stderr until it is closed. Undecodable bytes are replaced, the pipe
    /// is read to the end since the debuggee may share it.
    pub fn drain_stderr(&self, mut stderr: impl Read) {
        let mut lines = LineBuffer::default();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in lines.push(&buf[..n]) {
                        self.on_child_stderr(&line);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(target: "bridge", "read backend stderr: {e}");
                    break;
                }
            }
        }
        if let Some(line) = lines.finish() {
            self.on_child_stderr(&line);
        }
    }

    pub fn on_child_stderr(&self, line: &str) {
        if let Some(tracer) = &self.tracer {
            tracer.traffic("mi<-", line);
        }
        self.emit(BackendEvent::Output {
            category: OutputCategory::Stderr,
            text: format!("{line}\n"),
        });
    }

    /// Backend stdout is closed: fail all pending commands and report the exit once.
    pub fn on_child_closed(&self) {
        let rest = lock(&self.lines).finish();
        if let Some(line) = rest {
            self.handle_line(&line);
        }

        {
            let mut state = lock(&self.run_state);
            state.alive = false;
            state.running = false;
        }
        self.run_cond.notify_all();

        let drained = lock(&self.pending).drain();
        for (token, mut command) in drained {
            debug!(target: "bridge", "fail pending `{}` (token {token})", command.command);
            command.resolve(Err(Error::BackendExited));
        }
        if let Some(waiter) = lock(&self.disassembly).waiter.take() {
            _ = waiter.try_send(Err(Error::BackendExited));
        }

        if !self.exited_sent.swap(true, Ordering::SeqCst) {
            self.emit(BackendEvent::Exited);
        }
    }

    fn handle_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        trace!(target: "bridge", "<- {line}");
        if let Some(tracer) = &self.tracer {
            tracer.traffic("mi<-", line);
        }

        match mi::parse(line) {
            Record::Result(result) => self.handle_result(result),
            Record::Async(record) => self.handle_async(record),
            Record::Stream(StreamKind::Console, text) => {
                if lock(&self.disassembly).waiter.is_none() {
                    self.emit(BackendEvent::Output {
                        category: OutputCategory::Console,
                        text,
                    });
                }
            }
            Record::Stream(StreamKind::Target, text) => self.emit(BackendEvent::Output {
                category: OutputCategory::Stdout,
                text,
            }),
            Record::Stream(StreamKind::Log, text) => {
                debug!(target: "bridge", "backend log: {}", text.trim_end())
            }
            Record::DisassemblyData(text) => lock(&self.disassembly).lines.push(text),
            Record::DisassemblyEnd => {
                let mut disassembly = lock(&self.disassembly);
                if let Some(waiter) = disassembly.waiter.take() {
                    _ = waiter.try_send(Ok(mem::take(&mut disassembly.lines)));
                }
            }
            Record::Prompt => {}
            Record::RawProgramOutput(text) => self.emit(BackendEvent::Output {
                category: OutputCategory::Stdout,
                text: format!("{text}\n"),
            }),
        }
    }

    fn handle_result(&self, result: ResultRecord) {
        let error_message = || {
            result
                .payload
                .get_string("msg")
                .unwrap_or_else(|| "unknown backend error".to_string())
        };

        let Some(token) = result.token else {
            if result.class == ResultClass::Error {
                self.emit(BackendEvent::Output {
                    category: OutputCategory::Stderr,
                    text: format!("{}\n", error_message()),
                });
            }
            return;
        };

        {
            let mut state = lock(&self.run_state);
            if state.resume_token == Some(token) {
                state.resume_token = None;
                if result.class == ResultClass::Error {
                    state.suppress_running = state.suppress_running.saturating_sub(1);
                }
            }
        }

        let Some(mut command) = lock(&self.pending).take(token) else {
            warn!(target: "bridge", "discard reply with unknown or stale token {token}");
            return;
        };
        let reply = if result.class == ResultClass::Error {
            Err(Error::Backend(error_message()))
        } else {
            Ok(result)
        };
        command.resolve(reply);
        if command.completion == Completion::Permanent {
            lock(&self.pending).restore(token, command);
        }
    }

    fn handle_async(&self, record: AsyncRecord) {
        let payload = &record.payload;
        let event = match (record.kind, record.class.as_str()) {
            (AsyncKind::Exec, "running") => {
                let forward = {
                    let mut state = lock(&self.run_state);
                    state.running = true;
                    if state.suppress_running > 0 {
                        state.suppress_running -= 1;
                        false
                    } else {
                        true
                    }
                };
                self.run_cond.notify_all();
                forward.then(|| BackendEvent::Running {
                    thread_id: payload.get_i64("thread-id"),
                })
            }
            (AsyncKind::Exec, "stopped") => {
                let forward = {
                    let mut state = lock(&self.run_state);
                    state.running = false;
                    if state.suppress_stops > 0 {
                        state.suppress_stops -= 1;
                        false
                    } else {
                        true
                    }
                };
                self.run_cond.notify_all();
                if !forward {
                    debug!(target: "bridge", "consume stop caused by internal interrupt");
                }
                forward.then(|| BackendEvent::Stopped(AsyncContext::from_tuple(payload)))
            }
            (AsyncKind::Notify, "breakpoint-created") => {
                muted_error!(Breakpoint::from_payload(payload)).map(BackendEvent::BreakpointCreated)
            }
            (AsyncKind::Notify, "breakpoint-modified") => {
                muted_error!(Breakpoint::from_payload(payload)).map(BackendEvent::BreakpointModified)
            }
            (AsyncKind::Notify, "breakpoint-deleted") => payload
                .get_i64("id")
                .map(|id| BackendEvent::BreakpointDeleted(id as u32)),
            (AsyncKind::Notify, "library-loaded") => {
                muted_error!(Library::from_tuple(payload)).map(BackendEvent::LibraryLoaded)
            }
            (AsyncKind::Notify, "library-unloaded") => {
                muted_error!(Library::from_tuple(payload)).map(BackendEvent::LibraryUnloaded)
            }
            (AsyncKind::Notify, "thread-created") => {
                payload.get_i64("id").map(BackendEvent::ThreadCreated)
            }
            (AsyncKind::Notify, "thread-exited") => {
                payload.get_i64("id").map(BackendEvent::ThreadExited)
            }
            (AsyncKind::Notify, "thread-group-started") => Some(BackendEvent::ProcessStarted {
                pid: payload.get_i64("pid"),
            }),
            (AsyncKind::Notify, "thread-group-exited") => Some(BackendEvent::ProcessExited {
                exit_code: payload
                    .get_str("exit-code")
                    .and_then(|code| i32::from_str_radix(code, 8).ok()),
            }),
            (kind, class) => {
                debug!(target: "bridge", "ignore {kind:?} record `{class}`");
                None
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }
}

impl MiChannel for Bridge {
    fn request(&self, command: &str) -> Result<Tuple, Error> {
        Bridge::request(self, command)
    }

    fn request_async(&self, command: &str, continuation: Continuation) -> Result<u32, Error> {
        self.issue_command_and_await(command, Completion::OneShot, continuation)
    }

    fn interrupt(&self) -> Result<(), Error> {
        Bridge::interrupt(self)
    }

    fn kill(&self) -> Result<(), Error> {
        self.request(self.backend.kill_command()).map(|_| ())
    }

    fn disassemble(&self, address: u64, bytes: u64) -> Result<Vec<String>, Error> {
        Bridge::disassemble(self, address, bytes)
    }

    fn shutdown(&self) {
        Bridge::shutdown(self)
    }
}

/// Per session backend parameters.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Overrides the configured backend executable.
    pub program: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
}

/// Factory of backend channels, one per debug session.
pub trait Spawner: Send + Sync {
    fn spawn(
        &self,
        options: &SpawnOptions,
    ) -> Result<(Arc<dyn MiChannel>, Receiver<BackendEvent>), Error>;
}

/// Starts backend processes as configured.
pub struct ProcessSpawner {
    config: BackendConfig,
    timeouts: Timeouts,
    tracer: Option<FileTracer>,
}

impl ProcessSpawner {
    pub fn new(config: BackendConfig, timeouts: Timeouts, tracer: Option<FileTracer>) -> Self {
        Self {
            config,
            timeouts,
            tracer,
        }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(
        &self,
        options: &SpawnOptions,
    ) -> Result<(Arc<dyn MiChannel>, Receiver<BackendEvent>), Error> {
        let (bridge, events) = Bridge::spawn(
            &self.config,
            options.program.clone(),
            options.cwd.clone(),
            self.timeouts.clone(),
            self.tracer.clone(),
        )?;
        let channel: Arc<dyn MiChannel> = bridge;
        Ok((channel, events))
    }
}
