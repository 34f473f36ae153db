use crate::mi::types::{Frame, Thread};
use std::collections::HashMap;
use strum_macros::{Display, IntoStaticStr};

/// Debug session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initialized,
    /// Configuration is done, waiting for the debuggee to run.
    Configuring,
    Running,
    Stopped,
    Terminated,
}

impl SessionState {
    pub fn is_terminated(&self) -> bool {
        *self == SessionState::Terminated
    }
}

/// Threads and call stacks of the last stop.
///
/// Every resume starts a new epoch, answers of fetches started in an older epoch
/// are dropped.
#[derive(Default)]
pub struct ThreadCache {
    epoch: u64,
    threads: Option<Vec<Thread>>,
    frames: HashMap<i64, Vec<Frame>>,
}

impl ThreadCache {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.threads = None;
        self.frames.clear();
    }

    pub fn threads(&self) -> Option<&[Thread]> {
        self.threads.as_deref()
    }

    pub fn store_threads(&mut self, epoch: u64, threads: Vec<Thread>) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.threads = Some(threads);
        true
    }

    pub fn frames(&self, thread_id: i64) -> Option<&[Frame]> {
        self.frames.get(&thread_id).map(Vec::as_slice)
    }

    pub fn store_frames(&mut self, epoch: u64, thread_id: i64, frames: Vec<Frame>) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.frames.insert(thread_id, frames);
        true
    }
}
