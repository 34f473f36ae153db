//! Scripted backend and recording hook for unit tests.
use crate::bridge::pending::{Continuation, Reply};
use crate::bridge::{BackendEvent, MiChannel, OutputCategory, SpawnOptions, Spawner};
use crate::error::Error;
use crate::mi::types::{Breakpoint, Frame, Library};
use crate::mi::value::{parse_results, Tuple};
use crate::mi::{ResultClass, ResultRecord};
use crate::session::SessionHook;
use crate::utils::lock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

pub struct ScriptedChannel {
    responder: Responder,
    journal: Mutex<Vec<String>>,
    token: AtomicU32,
    hold: AtomicBool,
    held: Mutex<Vec<(Reply, Continuation)>>,
}

impl ScriptedChannel {
    /// `responder` maps a command to a payload text or an error message.
    pub fn new(responder: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            journal: Mutex::default(),
            token: AtomicU32::new(1),
            hold: AtomicBool::new(false),
            held: Mutex::default(),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.journal)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_journal(&self) {
        lock(&self.journal).clear();
    }

    /// Keep async replies until [`ScriptedChannel::release`].
    pub fn hold_async(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        lock(&self.held).len()
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        let held = std::mem::take(&mut *lock(&self.held));
        for (reply, mut continuation) in held {
            continuation(reply);
        }
    }

    fn reply(&self, command: &str) -> Reply {
        lock(&self.journal).push(command.to_string());
        let token = self.token.fetch_add(1, Ordering::SeqCst);
        match (self.responder)(command) {
            Ok(text) => Ok(ResultRecord {
                token: Some(token),
                class: ResultClass::Done,
                payload: parse_results(&text).expect("valid scripted payload"),
            }),
            Err(msg) => Err(Error::Backend(msg)),
        }
    }
}

impl MiChannel for ScriptedChannel {
    fn request(&self, command: &str) -> Result<Tuple, Error> {
        self.reply(command).map(|r| r.payload)
    }

    fn request_async(&self, command: &str, mut continuation: Continuation) -> Result<u32, Error> {
        let reply = self.reply(command);
        if self.hold.load(Ordering::SeqCst) {
            lock(&self.held).push((reply, continuation));
        } else {
            continuation(reply);
        }
        Ok(self.token.load(Ordering::SeqCst))
    }

    fn interrupt(&self) -> Result<(), Error> {
        lock(&self.journal).push("<interrupt>".to_string());
        Ok(())
    }

    fn kill(&self) -> Result<(), Error> {
        self.request("<kill>").map(|_| ())
    }

    fn disassemble(&self, address: u64, bytes: u64) -> Result<Vec<String>, Error> {
        let payload = self.request(&format!("<disassemble {address:#x},+{bytes}>"))?;
        Ok(payload
            .get_list("lines")
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect())
    }

    fn shutdown(&self) {
        lock(&self.journal).push("<shutdown>".to_string());
    }
}

/// Spawner that hands out the same scripted channel on every spawn.
pub struct ScriptedSpawner {
    channel: Option<Arc<ScriptedChannel>>,
    spawned: AtomicUsize,
}

impl ScriptedSpawner {
    pub fn new(channel: Arc<ScriptedChannel>) -> Self {
        Self {
            channel: Some(channel),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Spawner whose backend can not be started.
    pub fn unavailable() -> Self {
        Self {
            channel: None,
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn(
        &self,
        _: &SpawnOptions,
    ) -> Result<(Arc<dyn MiChannel>, Receiver<BackendEvent>), Error> {
        let Some(channel) = &self.channel else {
            return Err(Error::Spawn(
                "gdb".to_string(),
                "No such file or directory".to_string(),
            ));
        };
        self.spawned.fetch_add(1, Ordering::SeqCst);
        // nothing is ever sent, the pump ends with the sender
        let (_, events) = mpsc::channel();
        let channel: Arc<dyn MiChannel> = channel.clone();
        Ok((channel, events))
    }
}

/// Hook that records every call as a line of text.
#[derive(Default)]
pub struct RecordingHook {
    events: Mutex<Vec<String>>,
}

impl RecordingHook {
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        lock(&self.events).push(event);
    }
}

impl SessionHook for RecordingHook {
    fn on_stopped(
        &self,
        reason: &str,
        thread_id: Option<i64>,
        frame: Option<&Frame>,
        _: Option<&str>,
    ) {
        let func = frame.and_then(|f| f.func.as_deref()).unwrap_or("-");
        self.push(format!("stopped {reason} {thread_id:?} {func}"));
    }

    fn on_continued(&self, thread_id: Option<i64>) {
        self.push(format!("continued {thread_id:?}"));
    }

    fn on_exited(&self, code: i32) {
        self.push(format!("exited {code}"));
    }

    fn on_terminated(&self) {
        self.push("terminated".to_string());
    }

    fn on_output(&self, category: OutputCategory, text: &str) {
        let category: &'static str = category.into();
        self.push(format!("output {category} {text}"));
    }

    fn on_module_event(&self, reason: &str, library: &Library) {
        self.push(format!("module {reason} {}", library.name()));
    }

    fn on_breakpoint_changed(&self, reason: &str, breakpoint: &Breakpoint) {
        self.push(format!("breakpoint {reason} {}", breakpoint.number));
    }

    fn on_thread_event(&self, reason: &str, thread_id: i64) {
        self.push(format!("thread {reason} {thread_id}"));
    }

    fn on_process(&self, name: &str, pid: Option<i64>) {
        self.push(format!("process {name} {pid:?}"));
    }
}
