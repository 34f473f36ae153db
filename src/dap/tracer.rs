use crate::utils::lock;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Appends adapter diagnostics and, optionally, every protocol message to a file.
///
/// Clones share the file, so DAP and MI traffic end up interleaved in arrival order.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<File>>,
    traffic: bool,
}

impl FileTracer {
    pub fn new(path: &Path, traffic: bool) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            traffic,
        })
    }

    pub fn line(&self, text: &str) {
        _ = writeln!(lock(&self.file), "{text}");
    }

    /// Record a message, `direction` is one of `<-`, `->` (DAP) or `mi<-`, `mi->` (backend).
    pub fn traffic(&self, direction: &str, text: &str) {
        if self.traffic {
            self.line(&format!("{direction} {}", text.trim_end()));
        }
    }
}
