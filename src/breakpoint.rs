//! Breakpoint synchronizer.
//!
//! Clients send the whole set of breakpoints of a file (or of all functions) each time,
//! the backend only knows insert and delete. The synchronizer keeps the placed set and
//! turns a new declarative set into the minimal command sequence.
use crate::bridge::MiChannel;
use crate::mi;
use crate::mi::types::Breakpoint;
use crate::weak_error;
use itertools::Itertools;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: i64,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
}

/// Outcome of a single requested breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointStatus {
    pub breakpoint: Option<Breakpoint>,
    /// Requested line, used when the backend did not place the breakpoint.
    pub line: Option<i64>,
    pub message: Option<String>,
}

impl BreakpointStatus {
    fn verified(bp: Breakpoint) -> Self {
        Self {
            breakpoint: Some(bp),
            line: None,
            message: None,
        }
    }

    fn unverified(line: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            breakpoint: None,
            line,
            message: Some(message.into()),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.breakpoint.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Placed {
    id: u32,
    condition: Option<String>,
    hit_condition: Option<String>,
}

struct Request<K> {
    key: K,
    condition: Option<String>,
    hit_condition: Option<String>,
}

/// Translate a hit condition (`5`, `>= 5`, `== 5`) into an ignore count.
fn ignore_count(hit_condition: &str) -> Option<u32> {
    let n: u32 = hit_condition
        .trim()
        .trim_start_matches(['>', '=', ' '])
        .parse()
        .ok()?;
    Some(n.saturating_sub(1))
}

fn insert_command(location: &str, condition: Option<&str>, hit_condition: Option<&str>) -> String {
    let mut command = "-break-insert -f".to_string();
    if let Some(condition) = condition.filter(|c| !c.trim().is_empty()) {
        command.push_str(&format!(" -c {}", mi::quote(condition)));
    }
    if let Some(count) = hit_condition.and_then(ignore_count) {
        command.push_str(&format!(" -i {count}"));
    }
    command.push(' ');
    command.push_str(&mi::quote(location));
    command
}

#[derive(Default)]
pub struct BreakpointSync {
    by_id: BTreeMap<u32, Breakpoint>,
    by_file: HashMap<String, BTreeMap<i64, Placed>>,
    by_function: BTreeMap<String, Placed>,
    deferred_sources: BTreeMap<String, Vec<SourceBreakpoint>>,
    deferred_functions: Option<Vec<FunctionBreakpoint>>,
}

impl BreakpointSync {
    pub fn get(&self, id: u32) -> Option<&Breakpoint> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Lines placed for a file, ascending.
    pub fn placed_lines(&self, path: &str) -> Vec<i64> {
        self.by_file
            .get(path)
            .map(|lines| lines.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Replace the breakpoint set of `path`. Without a backend the set is kept until
    /// [`BreakpointSync::apply_deferred`].
    pub fn set_source_breakpoints(
        &mut self,
        channel: Option<&dyn MiChannel>,
        path: &str,
        requested: &[SourceBreakpoint],
    ) -> Vec<BreakpointStatus> {
        let Some(channel) = channel else {
            self.deferred_sources
                .insert(path.to_string(), requested.to_vec());
            return requested
                .iter()
                .map(|bp| BreakpointStatus::unverified(Some(bp.line), "pending program start"))
                .collect();
        };

        let requests: Vec<_> = requested
            .iter()
            .map(|bp| Request {
                key: bp.line,
                condition: bp.condition.clone(),
                hit_condition: bp.hit_condition.clone(),
            })
            .collect();
        let placed = self.by_file.entry(path.to_string()).or_default();
        let statuses = reconcile(channel, &mut self.by_id, placed, &requests, |line| {
            format!("{path}:{line}")
        });
        if placed.is_empty() {
            self.by_file.remove(path);
        }
        statuses
            .into_iter()
            .zip(requested)
            .map(|(mut status, bp)| {
                if !status.is_verified() {
                    status.line = Some(bp.line);
                }
                status
            })
            .collect()
    }

    /// Replace the function breakpoint set.
    pub fn set_function_breakpoints(
        &mut self,
        channel: Option<&dyn MiChannel>,
        requested: &[FunctionBreakpoint],
    ) -> Vec<BreakpointStatus> {
        let Some(channel) = channel else {
            self.deferred_functions = Some(requested.to_vec());
            return requested
                .iter()
                .map(|_| BreakpointStatus::unverified(None, "pending program start"))
                .collect();
        };

        let requests: Vec<_> = requested
            .iter()
            .map(|bp| Request {
                key: bp.name.clone(),
                condition: bp.condition.clone(),
                hit_condition: bp.hit_condition.clone(),
            })
            .collect();
        reconcile(
            channel,
            &mut self.by_id,
            &mut self.by_function,
            &requests,
            |name| name.clone(),
        )
    }

    /// Place breakpoints requested before the backend existed.
    pub fn apply_deferred(&mut self, channel: &dyn MiChannel) -> Vec<(String, Vec<BreakpointStatus>)> {
        let sources = std::mem::take(&mut self.deferred_sources);
        let mut applied = sources
            .into_iter()
            .map(|(path, requested)| {
                let statuses = self.set_source_breakpoints(Some(channel), &path, &requested);
                (path, statuses)
            })
            .collect_vec();
        if let Some(functions) = self.deferred_functions.take() {
            let statuses = self.set_function_breakpoints(Some(channel), &functions);
            applied.push((String::new(), statuses));
        }
        applied
    }

    /// Breakpoint created by the backend itself (console command, temporary breakpoint).
    pub fn on_created(&mut self, bp: Breakpoint) {
        self.by_id.insert(bp.number, bp);
    }

    pub fn on_modified(&mut self, bp: Breakpoint) {
        self.by_id.insert(bp.number, bp);
    }

    pub fn on_deleted(&mut self, id: u32) -> Option<Breakpoint> {
        for lines in self.by_file.values_mut() {
            lines.retain(|_, placed| placed.id != id);
        }
        self.by_file.retain(|_, lines| !lines.is_empty());
        self.by_function.retain(|_, placed| placed.id != id);
        self.by_id.remove(&id)
    }

    /// Forget placed breakpoints, the backend that owned them is gone.
    pub fn clear_all(&mut self) {
        self.by_id.clear();
        self.by_file.clear();
        self.by_function.clear();
    }
}

fn reconcile<K: Ord + Clone + std::fmt::Debug>(
    channel: &dyn MiChannel,
    by_id: &mut BTreeMap<u32, Breakpoint>,
    placed: &mut BTreeMap<K, Placed>,
    requested: &[Request<K>],
    location: impl Fn(&K) -> String,
) -> Vec<BreakpointStatus> {
    let wanted: BTreeSet<&K> = requested.iter().map(|r| &r.key).collect();
    let removed = placed
        .keys()
        .filter(|key| !wanted.contains(key))
        .cloned()
        .collect_vec();
    for key in removed {
        if let Some(old) = placed.remove(&key) {
            debug!(target: "breakpoint", "delete breakpoint {} at {key:?}", old.id);
            weak_error!(channel.request(&format!("-break-delete {}", old.id)));
            by_id.remove(&old.id);
        }
    }

    requested
        .iter()
        .map(|req| {
            if let Some(existing) = placed.get_mut(&req.key) {
                let id = existing.id;
                if existing.condition != req.condition {
                    let command = match req.condition.as_deref().filter(|c| !c.trim().is_empty()) {
                        Some(condition) => format!("-break-condition {id} {condition}"),
                        None => format!("-break-condition {id}"),
                    };
                    if let Err(e) = channel.request(&command) {
                        return BreakpointStatus::unverified(None, e.to_string());
                    }
                    existing.condition = req.condition.clone();
                }
                if existing.hit_condition != req.hit_condition {
                    let count = req
                        .hit_condition
                        .as_deref()
                        .and_then(ignore_count)
                        .unwrap_or_default();
                    weak_error!(channel.request(&format!("-break-after {id} {count}")));
                    existing.hit_condition = req.hit_condition.clone();
                }
                return match by_id.get(&id) {
                    Some(bp) => BreakpointStatus::verified(bp.clone()),
                    None => BreakpointStatus::unverified(None, "breakpoint is not known"),
                };
            }

            let command = insert_command(
                &location(&req.key),
                req.condition.as_deref(),
                req.hit_condition.as_deref(),
            );
            let inserted = channel
                .request(&command)
                .and_then(|payload| Breakpoint::from_payload(&payload));
            match inserted {
                Ok(bp) => {
                    placed.insert(
                        req.key.clone(),
                        Placed {
                            id: bp.number,
                            condition: req.condition.clone(),
                            hit_condition: req.hit_condition.clone(),
                        },
                    );
                    by_id.insert(bp.number, bp.clone());
                    BreakpointStatus::verified(bp)
                }
                Err(e) => {
                    warn!(target: "breakpoint", "insert breakpoint at {:?}: {e:#}", req.key);
                    BreakpointStatus::unverified(None, e.to_string())
                }
            }
        })
        .collect()
}
