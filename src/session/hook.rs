use crate::bridge::OutputCategory;
use crate::mi::types::{Breakpoint, Frame, Library};

/// Receiver of session happenings, a protocol frontend turns them into its own events.
///
/// Methods are called from the session event pump, implementations must not call back
/// into the session.
pub trait SessionHook: Send + Sync {
    /// Debuggee stopped, called once per stop.
    ///
    /// # Arguments
    ///
    /// * `reason`: one of `breakpoint`, `step`, `pause`, `exception`, `data breakpoint`
    /// * `thread_id`: the thread that caused a stop
    /// * `frame`: the place of the stop
    /// * `description`: human readable details (signal meaning for example)
    fn on_stopped(
        &self,
        reason: &str,
        thread_id: Option<i64>,
        frame: Option<&Frame>,
        description: Option<&str>,
    );

    /// Debuggee resumed.
    fn on_continued(&self, thread_id: Option<i64>);

    /// Debuggee exited with `code`.
    fn on_exited(&self, code: i32);

    /// Debug session is over, called once.
    fn on_terminated(&self);

    fn on_output(&self, category: OutputCategory, text: &str);

    /// Shared library `new` or `removed`.
    fn on_module_event(&self, reason: &str, library: &Library);

    /// Breakpoint `new`, `changed` or `removed` by the backend.
    fn on_breakpoint_changed(&self, reason: &str, breakpoint: &Breakpoint);

    /// Thread `started` or `exited`.
    fn on_thread_event(&self, reason: &str, thread_id: i64);

    /// Debuggee process started.
    fn on_process(&self, name: &str, pid: Option<i64>);
}

/// Hook that ignores everything.
pub struct NopHook;

impl SessionHook for NopHook {
    fn on_stopped(&self, _: &str, _: Option<i64>, _: Option<&Frame>, _: Option<&str>) {}

    fn on_continued(&self, _: Option<i64>) {}

    fn on_exited(&self, _: i32) {}

    fn on_terminated(&self) {}

    fn on_output(&self, _: OutputCategory, _: &str) {}

    fn on_module_event(&self, _: &str, _: &Library) {}

    fn on_breakpoint_changed(&self, _: &str, _: &Breakpoint) {}

    fn on_thread_event(&self, _: &str, _: i64) {}

    fn on_process(&self, _: &str, _: Option<i64>) {}
}
