//! Typed views over MI payload tuples.
use crate::error::Error;
use crate::mi::value::{Tuple, Value};
use std::str::FromStr;
use strum_macros::{Display, EnumString, IntoStaticStr};

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, Error> {
    value.ok_or(Error::MissingField(field))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub level: u32,
    pub addr: Option<u64>,
    pub func: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<i64>,
    pub from: Option<String>,
}

impl Frame {
    pub fn from_tuple(t: &Tuple) -> Self {
        Frame {
            level: t.get_i64("level").unwrap_or_default() as u32,
            addr: t.get_u64("addr"),
            func: t.get_string("func"),
            file: t.get_string("file"),
            fullname: t.get_string("fullname"),
            line: t.get_i64("line"),
            from: t.get_string("from"),
        }
    }

    /// Frames from `-stack-list-frames` reply.
    pub fn list(payload: &Tuple) -> Vec<Frame> {
        payload
            .get_list("stack")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_tuple)
            .map(Frame::from_tuple)
            .collect()
    }

    pub fn path(&self) -> Option<&str> {
        self.fullname.as_deref().or(self.file.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ThreadState {
    #[default]
    Unknown,
    Stopped,
    Running,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thread {
    pub id: i64,
    pub target_id: Option<String>,
    pub name: Option<String>,
    pub details: Option<String>,
    pub state: ThreadState,
    pub frame: Option<Frame>,
    pub core: Option<i64>,
}

impl Thread {
    pub fn from_tuple(t: &Tuple) -> Result<Self, Error> {
        Ok(Thread {
            id: required(t.get_i64("id"), "id")?,
            target_id: t.get_string("target-id"),
            name: t.get_string("name"),
            details: t.get_string("details"),
            state: t
                .get_str("state")
                .and_then(|s| ThreadState::from_str(s).ok())
                .unwrap_or_default(),
            frame: t.get_tuple("frame").map(Frame::from_tuple),
            core: t.get_i64("core"),
        })
    }

    /// Threads from `-thread-info` reply.
    pub fn list(payload: &Tuple) -> Vec<Thread> {
        payload
            .get_list("threads")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_tuple)
            .filter_map(|t| crate::muted_error!(Thread::from_tuple(t)))
            .collect()
    }

    pub fn display_name(&self) -> String {
        match (&self.name, &self.target_id) {
            (Some(name), _) => format!("{name} #{}", self.id),
            (None, Some(target_id)) => target_id.clone(),
            (None, None) => format!("Thread #{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
pub enum Disposition {
    #[default]
    #[strum(serialize = "keep")]
    Keep,
    #[strum(serialize = "del")]
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Breakpoint {
    pub number: u32,
    pub r#type: Option<String>,
    pub disposition: Disposition,
    pub enabled: bool,
    pub addr: Option<u64>,
    pub func: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<i64>,
    pub times: u32,
    pub condition: Option<String>,
    pub original_location: Option<String>,
}

impl Breakpoint {
    pub fn from_tuple(t: &Tuple) -> Result<Self, Error> {
        Ok(Breakpoint {
            number: required(t.get_i64("number"), "number")? as u32,
            r#type: t.get_string("type"),
            disposition: t
                .get_str("disp")
                .and_then(|s| Disposition::from_str(s).ok())
                .unwrap_or_default(),
            enabled: t.get_str("enabled") != Some("n"),
            addr: t.get_u64("addr"),
            func: t.get_string("func"),
            file: t.get_string("file"),
            fullname: t.get_string("fullname"),
            line: t.get_i64("line"),
            times: t.get_i64("times").unwrap_or_default() as u32,
            condition: t.get_string("cond"),
            original_location: t.get_string("original-location"),
        })
    }

    /// Breakpoint from a reply or notification carrying `bkpt=`.
    ///
    /// Multi-location breakpoints have no source position in the parent record, it is taken
    /// from the first location that has one.
    pub fn from_payload(payload: &Tuple) -> Result<Self, Error> {
        let mut records = payload.get_all("bkpt").filter_map(Value::as_tuple);
        let parent = required(records.next(), "bkpt")?;
        let mut bp = Breakpoint::from_tuple(parent)?;
        let locations = parent
            .get_list("locations")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_tuple)
            .chain(records);
        for location in locations {
            if bp.line.is_some() {
                break;
            }
            bp.line = location.get_i64("line");
            bp.file = bp.file.or_else(|| location.get_string("file"));
            bp.fullname = bp.fullname.or_else(|| location.get_string("fullname"));
            bp.addr = bp.addr.or_else(|| location.get_u64("addr"));
        }
        Ok(bp)
    }

    pub fn path(&self) -> Option<&str> {
        self.fullname.as_deref().or(self.file.as_deref())
    }
}

/// Backend variable object, result of `-var-create` or an element of `-var-list-children`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarObject {
    pub name: String,
    pub exp: Option<String>,
    pub numchild: u32,
    pub value: Option<String>,
    pub r#type: Option<String>,
    pub thread_id: Option<i64>,
    pub has_more: bool,
    pub dynamic: bool,
    pub display_hint: Option<String>,
}

impl VarObject {
    pub fn from_tuple(t: &Tuple) -> Result<Self, Error> {
        Ok(VarObject {
            name: required(t.get_string("name"), "name")?,
            exp: t.get_string("exp"),
            numchild: t.get_i64("numchild").unwrap_or_default() as u32,
            value: t.get_string("value"),
            r#type: t.get_string("type"),
            thread_id: t.get_i64("thread-id"),
            has_more: t.get_i64("has_more").unwrap_or_default() != 0,
            dynamic: t.get_i64("dynamic").unwrap_or_default() != 0,
            display_hint: t.get_string("displayhint"),
        })
    }

    pub fn children(payload: &Tuple) -> Vec<VarObject> {
        payload
            .get_list("children")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_tuple)
            .filter_map(|t| crate::muted_error!(VarObject::from_tuple(t)))
            .collect()
    }

    pub fn is_expandable(&self) -> bool {
        self.numchild > 0 || self.has_more || (self.dynamic && self.display_hint.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Library {
    pub id: String,
    pub target_name: Option<String>,
    pub host_name: Option<String>,
    pub symbols_loaded: bool,
    pub ranges: Vec<(u64, u64)>,
}

impl Library {
    pub fn from_tuple(t: &Tuple) -> Result<Self, Error> {
        let ranges = t
            .get_list("ranges")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_tuple)
            .filter_map(|r| Some((r.get_u64("from")?, r.get_u64("to")?)))
            .collect();
        Ok(Library {
            id: required(t.get_string("id"), "id")?,
            target_name: t.get_string("target-name"),
            host_name: t.get_string("host-name"),
            symbols_loaded: t.get_i64("symbols-loaded").unwrap_or_default() != 0,
            ranges,
        })
    }

    pub fn path(&self) -> &str {
        self.host_name
            .as_deref()
            .or(self.target_name.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn name(&self) -> &str {
        let path = self.path();
        path.rsplit(['/', '\\']).next().unwrap_or(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum StopReason {
    BreakpointHit,
    WatchpointTrigger,
    ReadWatchpointTrigger,
    AccessWatchpointTrigger,
    FunctionFinished,
    LocationReached,
    WatchpointScope,
    EndSteppingRange,
    ExitedSignalled,
    Exited,
    ExitedNormally,
    SignalReceived,
    SolibEvent,
    Fork,
    Vfork,
    SyscallEntry,
    SyscallReturn,
    Exec,
    #[strum(default)]
    Unknown(String),
}

impl StopReason {
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            StopReason::Exited | StopReason::ExitedNormally | StopReason::ExitedSignalled
        )
    }
}

/// Payload of a `*stopped` record.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncContext {
    pub reason: StopReason,
    pub thread_id: Option<i64>,
    /// Empty when all threads stopped.
    pub stopped_threads: Vec<i64>,
    pub core: Option<i64>,
    pub frame: Option<Frame>,
    pub signal_name: Option<String>,
    pub signal_meaning: Option<String>,
    pub exit_code: Option<i32>,
    pub breakpoint: Option<u32>,
}

impl AsyncContext {
    pub fn from_tuple(t: &Tuple) -> Self {
        let reason = match t.get_str("reason") {
            Some(reason) => {
                StopReason::from_str(reason).unwrap_or(StopReason::Unknown(reason.to_string()))
            }
            None => StopReason::Unknown(String::new()),
        };
        let stopped_threads = t
            .get_list("stopped-threads")
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str()?.parse().ok())
            .collect();
        AsyncContext {
            reason,
            thread_id: t.get_i64("thread-id"),
            stopped_threads,
            core: t.get_i64("core"),
            frame: t.get_tuple("frame").map(Frame::from_tuple),
            signal_name: t.get_string("signal-name"),
            signal_meaning: t.get_string("signal-meaning"),
            // gdb reports exit code in octal
            exit_code: t
                .get_str("exit-code")
                .and_then(|code| i32::from_str_radix(code, 8).ok()),
            breakpoint: t.get_i64("bkptno").map(|n| n as u32),
        }
    }
}
