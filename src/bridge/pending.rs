use crate::error::Error;
use crate::mi::ResultRecord;
use std::collections::HashMap;

/// Largest token representable with six digits.
pub const MAX_TOKEN: u32 = 999_999;

pub type Reply = Result<ResultRecord, Error>;
pub type Continuation = Box<dyn FnMut(Reply) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Entry is removed with the first reply.
    OneShot,
    /// Entry survives replies until forgotten.
    Permanent,
}

pub struct PendingCommand {
    pub command: String,
    pub completion: Completion,
    continuation: Continuation,
}

impl PendingCommand {
    pub fn new(command: impl Into<String>, completion: Completion, continuation: Continuation) -> Self {
        Self {
            command: command.into(),
            completion,
            continuation,
        }
    }

    pub fn resolve(&mut self, reply: Reply) {
        (self.continuation)(reply)
    }
}

/// Commands waiting for a result record, keyed by token.
pub struct PendingTable {
    next: u32,
    entries: HashMap<u32, PendingCommand>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }
}

impl PendingTable {
    /// Allocate the next free token, wrapping back to 1 after [`MAX_TOKEN`].
    pub fn next_token(&mut self) -> u32 {
        loop {
            let token = self.next;
            self.next = if self.next >= MAX_TOKEN { 1 } else { self.next + 1 };
            if !self.entries.contains_key(&token) {
                return token;
            }
        }
    }

    pub fn insert(&mut self, token: u32, command: PendingCommand) {
        self.entries.insert(token, command);
    }

    /// Remove an entry. Permanent entries are put back with [`PendingTable::restore`].
    pub fn take(&mut self, token: u32) -> Option<PendingCommand> {
        self.entries.remove(&token)
    }

    pub fn restore(&mut self, token: u32, command: PendingCommand) {
        self.entries.entry(token).or_insert(command);
    }

    pub fn forget(&mut self, token: u32) -> bool {
        self.entries.remove(&token).is_some()
    }

    pub fn drain(&mut self) -> Vec<(u32, PendingCommand)> {
        self.entries.drain().collect()
    }

    pub fn contains(&self, token: u32) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Format a command line as written to the backend.
pub fn encode(token: u32, command: &str) -> String {
    format!("{token:06}{command}\n")
}
