//! Variable reference tree.
//!
//! Every expandable variable shown to the client gets an integer handle. Handles live until
//! the next stop, resume or frame change, after that the whole tree is discarded and handle
//! allocation restarts. Children are resolved on demand only.
use crate::bridge::pending::{Continuation, Reply};
use crate::bridge::MiChannel;
use crate::error::Error;
use crate::mi;
use crate::mi::types::VarObject;
use crate::mi::value::Value;
use crate::utils::lock;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// Handle of a variable without children.
pub const NO_CHILDREN: i64 = 0;
/// Handle of the local variables scope.
pub const LOCALS_REF: i64 = 1;
/// Handle of the registers scope.
pub const REGISTERS_REF: i64 = 2;
const FIRST_DYNAMIC_REF: i64 = 3;

const ACCESS_SPECIFIERS: [&str; 3] = ["public", "private", "protected"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSelector {
    pub thread_id: i64,
    pub level: u32,
}

impl FrameSelector {
    pub fn new(thread_id: i64, level: u32) -> Self {
        Self { thread_id, level }
    }

    /// Client visible frame id.
    pub fn encode(&self) -> i64 {
        (self.thread_id << 16) | self.level as i64
    }

    pub fn decode(frame_id: i64) -> Self {
        Self {
            thread_id: frame_id >> 16,
            level: (frame_id & 0xFFFF) as u32,
        }
    }

    fn options(&self) -> String {
        format!("--thread {} --frame {}", self.thread_id, self.level)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub evaluate_name: String,
    pub type_name: Option<String>,
    pub value: String,
    /// [`NO_CHILDREN`] or a handle to resolve children with.
    pub reference: i64,
    /// Backend variable object.
    pub object: Option<String>,
}

impl Variable {
    fn from_object(name: &str, evaluate_name: &str, obj: &VarObject) -> Self {
        let value = match &obj.value {
            Some(value) => value.clone(),
            None if obj.is_expandable() => "{...}".to_string(),
            None => String::new(),
        };
        Self {
            name: name.to_string(),
            evaluate_name: evaluate_name.to_string(),
            type_name: obj.r#type.clone(),
            value,
            reference: NO_CHILDREN,
            object: Some(obj.name.clone()),
        }
    }

    fn unavailable(name: &str, error: &Error) -> Self {
        Self {
            name: name.to_string(),
            evaluate_name: name.to_string(),
            type_name: None,
            value: format!("<{error}>"),
            reference: NO_CHILDREN,
            object: None,
        }
    }

    pub fn has_children(&self) -> bool {
        self.reference != NO_CHILDREN
    }
}

fn child_expression(parent: &str, exp: &str) -> String {
    if exp.parse::<u64>().is_ok() {
        format!("{parent}[{exp}]")
    } else if exp.starts_with('*') {
        exp.to_string()
    } else {
        format!("{parent}.{exp}")
    }
}

struct TreeState {
    generation: u64,
    next_ref: i64,
    children: HashMap<i64, Vec<Variable>>,
    owners: HashMap<i64, Variable>,
    objects: u64,
    live_objects: Vec<String>,
    stale_objects: Vec<String>,
    frame: Option<FrameSelector>,
}

impl Default for TreeState {
    fn default() -> Self {
        Self {
            generation: 0,
            next_ref: FIRST_DYNAMIC_REF,
            children: HashMap::new(),
            owners: HashMap::new(),
            objects: 0,
            live_objects: vec![],
            stale_objects: vec![],
            frame: None,
        }
    }
}

impl TreeState {
    fn allocate(&mut self, var: &mut Variable) {
        var.reference = self.next_ref;
        self.next_ref += 1;
        self.owners.insert(var.reference, var.clone());
    }

    fn next_object(&mut self) -> String {
        self.objects += 1;
        let name = format!("var{}", self.objects);
        self.live_objects.push(name.clone());
        name
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.next_ref = FIRST_DYNAMIC_REF;
        self.children.clear();
        self.owners.clear();
        let live = std::mem::take(&mut self.live_objects);
        self.stale_objects.extend(live);
    }
}

pub struct VarTree {
    state: Arc<Mutex<TreeState>>,
    outstanding: Arc<AtomicUsize>,
    timeout: Duration,
}

impl VarTree {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::default(),
            outstanding: Arc::new(AtomicUsize::new(0)),
            timeout,
        }
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Number of asynchronous variable fetches not answered yet.
    pub fn outstanding_fetches(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Invalidate every handle, backend variable objects are deleted at next population.
    pub fn reset_on_resume(&self) {
        let mut state = lock(&self.state);
        state.reset();
        state.frame = None;
    }

    /// Switch to another frame, the tree is reset if the frame differs from current one.
    pub fn select_frame(&self, frame: FrameSelector) -> bool {
        let mut state = lock(&self.state);
        if state.frame == Some(frame) {
            return false;
        }
        if state.frame.is_some() {
            state.reset();
        }
        state.frame = Some(frame);
        true
    }

    pub fn selected_frame(&self) -> Option<FrameSelector> {
        lock(&self.state).frame
    }

    pub fn cached(&self, reference: i64) -> Option<Vec<Variable>> {
        lock(&self.state).children.get(&reference).cloned()
    }

    /// Reserve a name for a new backend variable object.
    pub fn next_object_name(&self) -> String {
        lock(&self.state).next_object()
    }

    /// Register a variable object created outside the tree (by expression evaluation).
    pub fn adopt(&self, expression: &str, obj: &VarObject) -> Variable {
        let mut var = Variable::from_object(expression, expression, obj);
        if obj.is_expandable() {
            lock(&self.state).allocate(&mut var);
        }
        var
    }

    fn delete_stale(&self, channel: &dyn MiChannel) {
        let stale = std::mem::take(&mut lock(&self.state).stale_objects);
        for object in stale {
            let continuation: Continuation = Box::new(|reply: Reply| {
                if let Err(e) = reply {
                    debug!(target: "variables", "delete variable object: {e:#}");
                }
            });
            crate::muted_error!(channel.request_async(&format!("-var-delete {object}"), continuation));
        }
    }

    /// Create backend variable objects for `names` in `frame` and store them under `scope`.
    ///
    /// Objects are created concurrently, the call waits for all answers (bounded by timeout)
    /// and keeps the order of `names`.
    pub fn populate_scope(
        &self,
        channel: &dyn MiChannel,
        scope: i64,
        frame: FrameSelector,
        names: &[String],
    ) -> Result<Vec<Variable>, Error> {
        self.delete_stale(channel);
        if let Some(cached) = self.cached(scope) {
            return Ok(cached);
        }

        let (generation, objects) = {
            let mut state = lock(&self.state);
            let objects: Vec<_> = names.iter().map(|_| state.next_object()).collect();
            (state.generation, objects)
        };

        let batch = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for (idx, (name, object)) in names.iter().zip(objects).enumerate() {
            let command = format!(
                "-var-create {} {object} * {}",
                frame.options(),
                mi::quote(name)
            );

            let reply_tx = tx.clone();
            let state = self.state.clone();
            let outstanding = self.outstanding.clone();
            let in_batch = batch.clone();
            let var_name = name.clone();
            let continuation: Continuation = Box::new(move |reply: Reply| {
                let var = match reply.and_then(|r| VarObject::from_tuple(&r.payload)) {
                    Ok(obj) => {
                        let mut var = Variable::from_object(&var_name, &var_name, &obj);
                        if obj.is_expandable() {
                            let mut state = lock(&state);
                            if state.generation == generation {
                                state.allocate(&mut var);
                            }
                        }
                        var
                    }
                    Err(e) => Variable::unavailable(&var_name, &e),
                };
                if in_batch
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                }
                _ = reply_tx.send((idx, var));
            });

            batch.fetch_add(1, Ordering::SeqCst);
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = channel.request_async(&command, continuation) {
                // continuation is dropped by the channel
                batch.fetch_sub(1, Ordering::SeqCst);
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                _ = tx.send((idx, Variable::unavailable(name, &e)));
            }
        }
        drop(tx);

        let mut slots: Vec<Option<Variable>> = vec![None; names.len()];
        let deadline = Instant::now() + self.timeout;
        for _ in 0..names.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok((idx, var)) => slots[idx] = Some(var),
                Err(_) => {
                    let missing = batch.swap(0, Ordering::SeqCst);
                    self.outstanding.fetch_sub(missing, Ordering::SeqCst);
                    warn!(target: "variables", "{missing} variable(s) not created in time");
                    break;
                }
            }
        }

        let vars: Vec<Variable> = slots.into_iter().flatten().collect();
        let mut state = lock(&self.state);
        if state.generation != generation {
            return Ok(vec![]);
        }
        state.children.insert(scope, vars.clone());
        Ok(vars)
    }

    /// Children of a variable handle. Unknown and outdated handles have no children.
    pub fn resolve_children(
        &self,
        channel: &dyn MiChannel,
        reference: i64,
    ) -> Result<Vec<Variable>, Error> {
        if reference == NO_CHILDREN {
            return Ok(vec![]);
        }
        let (generation, owner) = {
            let state = lock(&self.state);
            if let Some(children) = state.children.get(&reference) {
                return Ok(children.clone());
            }
            match state.owners.get(&reference) {
                Some(owner) => (state.generation, owner.clone()),
                None => return Ok(vec![]),
            }
        };
        let Some(object) = owner.object.as_deref() else {
            return Ok(vec![]);
        };

        let mut children = vec![];
        self.list_children(channel, object, &owner.evaluate_name, &mut children)?;

        let mut state = lock(&self.state);
        if state.generation != generation {
            return Ok(vec![]);
        }
        let vars: Vec<Variable> = children
            .into_iter()
            .map(|(mut var, expandable)| {
                if expandable {
                    state.allocate(&mut var);
                }
                var
            })
            .collect();
        state.children.insert(reference, vars.clone());
        Ok(vars)
    }

    fn list_children(
        &self,
        channel: &dyn MiChannel,
        object: &str,
        parent_expression: &str,
        out: &mut Vec<(Variable, bool)>,
    ) -> Result<(), Error> {
        let payload = channel.request(&format!(
            "-var-list-children --all-values {}",
            mi::quote(object)
        ))?;
        for child in VarObject::children(&payload) {
            let exp = child.exp.clone().unwrap_or_default();
            if child.r#type.is_none() && ACCESS_SPECIFIERS.contains(&exp.as_str()) {
                self.list_children(channel, &child.name, parent_expression, out)?;
                continue;
            }
            let evaluate_name = child_expression(parent_expression, &exp);
            out.push((
                Variable::from_object(&exp, &evaluate_name, &child),
                child.is_expandable(),
            ));
        }
        Ok(())
    }

    /// Registers of `frame`, stored under [`REGISTERS_REF`].
    pub fn populate_registers(
        &self,
        channel: &dyn MiChannel,
        frame: FrameSelector,
    ) -> Result<Vec<Variable>, Error> {
        if let Some(cached) = self.cached(REGISTERS_REF) {
            return Ok(cached);
        }
        let generation = self.generation();

        let names = channel.request("-data-list-register-names")?;
        let names: Vec<&str> = names
            .get_list("register-names")
            .unwrap_or_default()
            .iter()
            .map(|v| v.as_str().unwrap_or_default())
            .collect();
        let values = channel.request(&format!(
            "-data-list-register-values {} --skip-unavailable x",
            frame.options()
        ))?;
        let vars: Vec<Variable> = values
            .get_list("register-values")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_tuple)
            .filter_map(|reg| {
                let name = *names.get(reg.get_i64("number")? as usize)?;
                if name.is_empty() {
                    return None;
                }
                Some(Variable {
                    name: name.to_string(),
                    evaluate_name: format!("${name}"),
                    type_name: None,
                    value: reg.get_string("value")?,
                    reference: NO_CHILDREN,
                    object: None,
                })
            })
            .collect();

        let mut state = lock(&self.state);
        if state.generation != generation {
            return Ok(vec![]);
        }
        state.children.insert(REGISTERS_REF, vars.clone());
        Ok(vars)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::ScriptedChannel;
    use std::thread;

    fn channel() -> Arc<ScriptedChannel> {
        Arc::new(ScriptedChannel::new(|command| {
            if command.starts_with("-var-create") {
                // the backend names an object the way it was asked to
                let object = command.split_whitespace().rev().nth(2).unwrap_or_default();
                return match command {
                    c if c.ends_with("* \"p\"") => Ok(format!(
                        r#"name="{object}",numchild="1",value="{{...}}",type="struct point",has_more="0""#
                    )),
                    c if c.ends_with("* \"n\"") => Ok(format!(
                        r#"name="{object}",numchild="0",value="3",type="int""#
                    )),
                    _ => Err("No symbol \"missing\" in current context.".to_string()),
                };
            }
            let reply = match command {
                "-var-list-children --all-values \"var1\"" => {
                    r#"numchild="1",children=[child={name="var1.public",exp="public",numchild="2"}]"#
                }
                "-var-list-children --all-values \"var1.public\"" => {
                    r#"numchild="2",children=[child={name="var1.public.x",exp="x",numchild="0",value="1",type="int"},child={name="var1.public.arr",exp="arr",numchild="4",value="[4]",type="int [4]"}]"#
                }
                "-data-list-register-names" => r#"register-names=["rax","","rip"]"#,
                c if c.starts_with("-data-list-register-values") => {
                    r#"register-values=[{number="0",value="0x1c"},{number="1",value="0x0"},{number="2",value="0x401136"}]"#
                }
                _ => "",
            };
            Ok(reply.to_string())
        }))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_frame_selector_encoding() {
        let frame = FrameSelector::new(3, 7);
        assert_eq!(frame.encode(), (3 << 16) | 7);
        assert_eq!(FrameSelector::decode(frame.encode()), frame);
    }

    #[test]
    fn test_populate_scope_keeps_order() {
        let channel = channel();
        let tree = VarTree::new(Duration::from_secs(1));
        let frame = FrameSelector::new(1, 0);

        let vars = tree
            .populate_scope(channel.as_ref(), LOCALS_REF, frame, &names(&["p", "n", "missing"]))
            .unwrap();

        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0].name, "p");
        assert_eq!(vars[0].reference, FIRST_DYNAMIC_REF);
        assert_eq!(vars[1].name, "n");
        assert_eq!(vars[1].value, "3");
        assert_eq!(vars[1].reference, NO_CHILDREN);
        assert!(vars[2].value.contains("No symbol"));
        assert_eq!(tree.outstanding_fetches(), 0);
        assert_eq!(
            channel.journal()[0],
            "-var-create --thread 1 --frame 0 var1 * \"p\""
        );

        // second call is served from cache
        channel.clear_journal();
        let again = tree
            .populate_scope(channel.as_ref(), LOCALS_REF, frame, &names(&["p", "n", "missing"]))
            .unwrap();
        assert_eq!(again, vars);
        assert!(channel.journal().is_empty());
    }

    #[test]
    fn test_resolve_children_flattens_access_specifiers() {
        let channel = channel();
        let tree = VarTree::new(Duration::from_secs(1));
        let vars = tree
            .populate_scope(channel.as_ref(), LOCALS_REF, FrameSelector::new(1, 0), &names(&["p"]))
            .unwrap();

        let children = tree.resolve_children(channel.as_ref(), vars[0].reference).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "x");
        assert_eq!(children[0].evaluate_name, "p.x");
        assert!(!children[0].has_children());
        assert_eq!(children[1].name, "arr");
        assert_eq!(children[1].reference, FIRST_DYNAMIC_REF + 1);

        // expandable child is not expanded eagerly
        assert_eq!(channel.count("-var-list-children"), 2);
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let channel = channel();
        let tree = VarTree::new(Duration::from_secs(1));
        let frame = FrameSelector::new(1, 0);
        let vars = tree
            .populate_scope(channel.as_ref(), LOCALS_REF, frame, &names(&["p"]))
            .unwrap();
        let old = vars[0].reference;

        tree.reset_on_resume();
        channel.clear_journal();

        assert!(tree.resolve_children(channel.as_ref(), old).unwrap().is_empty());
        assert!(tree.cached(LOCALS_REF).is_none());
        assert!(channel.journal().is_empty());

        let fresh = tree
            .populate_scope(channel.as_ref(), LOCALS_REF, frame, &names(&["p"]))
            .unwrap();
        assert_eq!(fresh[0].reference, FIRST_DYNAMIC_REF);
        assert_eq!(fresh[0].object.as_deref(), Some("var2"));
        assert_eq!(channel.journal()[0], "-var-delete var1");
    }

    #[test]
    fn test_late_answer_after_reset_is_dropped() {
        let channel = channel();
        channel.hold_async();
        let tree = Arc::new(VarTree::new(Duration::from_secs(5)));

        let (c, t) = (channel.clone(), tree.clone());
        let handle = thread::spawn(move || {
            t.populate_scope(c.as_ref(), LOCALS_REF, FrameSelector::new(1, 0), &names(&["p"]))
        });
        while channel.held_count() == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(tree.outstanding_fetches(), 1);

        tree.reset_on_resume();
        channel.release();

        assert!(handle.join().unwrap().unwrap().is_empty());
        assert_eq!(tree.outstanding_fetches(), 0);
        assert!(tree.resolve_children(channel.as_ref(), FIRST_DYNAMIC_REF).unwrap().is_empty());
    }

    #[test]
    fn test_frame_change_resets() {
        let channel = channel();
        let tree = VarTree::new(Duration::from_secs(1));
        assert!(tree.select_frame(FrameSelector::new(1, 0)));
        tree.populate_scope(channel.as_ref(), LOCALS_REF, FrameSelector::new(1, 0), &names(&["n"]))
            .unwrap();
        assert!(!tree.select_frame(FrameSelector::new(1, 0)));
        assert!(tree.cached(LOCALS_REF).is_some());

        assert!(tree.select_frame(FrameSelector::new(1, 1)));
        assert!(tree.cached(LOCALS_REF).is_none());
    }

    #[test]
    fn test_registers() {
        let channel = channel();
        let tree = VarTree::new(Duration::from_secs(1));
        let regs = tree
            .populate_registers(channel.as_ref(), FrameSelector::new(1, 0))
            .unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].name, "rax");
        assert_eq!(regs[1].name, "rip");
        assert_eq!(regs[1].value, "0x401136");
        assert_eq!(regs[1].evaluate_name, "$rip");
        assert_eq!(
            channel.journal()[1],
            "-data-list-register-values --thread 1 --frame 0 --skip-unavailable x"
        );
    }
}
