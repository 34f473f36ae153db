use crate::bridge::OutputCategory;
use crate::dap::protocol;
use crate::dap::sourcemap::SourceMap;
use crate::dap::transport::FrameWriter;
use crate::mi::types::{Breakpoint, Frame, Library};
use crate::session::SessionHook;
use crate::utils::lock;
use crate::weak_error;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Turns session happenings into DAP events.
pub struct DapHook {
    output: Arc<FrameWriter>,
    source_map: Arc<Mutex<SourceMap>>,
    start_method: Mutex<&'static str>,
}

impl DapHook {
    pub fn new(output: Arc<FrameWriter>, source_map: Arc<Mutex<SourceMap>>) -> Self {
        Self {
            output,
            source_map,
            start_method: Mutex::new("launch"),
        }
    }

    /// `launch` or `attach`, reported in the `process` event.
    pub fn set_start_method(&self, method: &'static str) {
        *lock(&self.start_method) = method;
    }

    fn emit(&self, event: &'static str, body: Option<Value>) {
        weak_error!(self.output.send_event(event, body), "send event:");
    }
}

impl SessionHook for DapHook {
    fn on_stopped(
        &self,
        reason: &str,
        thread_id: Option<i64>,
        _frame: Option<&Frame>,
        description: Option<&str>,
    ) {
        let mut body = json!({
            "reason": reason,
            "allThreadsStopped": true,
        });
        if let Some(tid) = thread_id {
            body["threadId"] = json!(tid);
        }
        if let Some(description) = description {
            body["description"] = json!(description);
            body["text"] = json!(description);
        }
        self.emit("stopped", Some(body));
    }

    fn on_continued(&self, thread_id: Option<i64>) {
        self.emit(
            "continued",
            Some(json!({
                "threadId": thread_id.unwrap_or_default(),
                "allThreadsContinued": true,
            })),
        );
    }

    fn on_exited(&self, code: i32) {
        self.emit("exited", Some(json!({ "exitCode": code })));
    }

    fn on_terminated(&self) {
        self.emit("terminated", None);
    }

    fn on_output(&self, category: OutputCategory, text: &str) {
        let category: &'static str = category.into();
        self.emit(
            "output",
            Some(json!({
                "category": category,
                "output": text,
            })),
        );
    }

    fn on_module_event(&self, reason: &str, library: &Library) {
        self.emit(
            "module",
            Some(json!({
                "reason": reason,
                "module": protocol::module(library),
            })),
        );
    }

    fn on_breakpoint_changed(&self, reason: &str, breakpoint: &Breakpoint) {
        let bp = protocol::breakpoint(breakpoint, &lock(&self.source_map));
        self.emit(
            "breakpoint",
            Some(json!({
                "reason": reason,
                "breakpoint": bp,
            })),
        );
    }

    fn on_thread_event(&self, reason: &str, thread_id: i64) {
        self.emit(
            "thread",
            Some(json!({
                "reason": reason,
                "threadId": thread_id,
            })),
        );
    }

    fn on_process(&self, name: &str, pid: Option<i64>) {
        let start_method = *lock(&self.start_method);
        let mut body = json!({
            "name": name,
            "isLocalProcess": true,
            "startMethod": start_method,
        });
        if let Some(pid) = pid {
            body["systemProcessId"] = json!(pid);
        }
        self.emit("process", Some(body));
    }
}
