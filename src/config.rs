//! Adapter configuration.
//!
//! Read from `--config <path>` or `~/.config/midap/config.toml`, example:
//!
//! ```toml
//! [backend]
//! kind = "gdb"
//! path = "/usr/local/bin/gdb"
//! args = ["-nx"]
//!
//! [timeouts]
//! request_ms = 5000
//! ```
use crate::backend::Backend;
use crate::error::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PATH: &str = ".config/midap/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: Backend,
    /// Backend executable, resolved through `PATH` if relative.
    pub path: Option<PathBuf>,
    /// Extra arguments placed before the interpreter selection.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Blocking round-trip with the backend.
    pub request_ms: u64,
    /// Wait for a stop after an out-of-band interrupt.
    pub interrupt_ms: u64,
    /// Wait for the backend to quit before it is killed.
    pub shutdown_ms: u64,
    /// Wait for the debuggee to start running.
    pub run_gate_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_ms: 5000,
            interrupt_ms: 2000,
            shutdown_ms: 1000,
            run_gate_ms: 3000,
        }
    }
}

impl Timeouts {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn interrupt(&self) -> Duration {
        Duration::from_millis(self.interrupt_ms)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_millis(self.shutdown_ms)
    }

    pub fn run_gate(&self) -> Duration {
        Duration::from_millis(self.run_gate_ms)
    }
}

impl Config {
    /// Load configuration from an explicit file, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let Some(default) = home::home_dir().map(|home| home.join(DEFAULT_PATH)) else {
                    return Ok(Config::default());
                };
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::de::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}
