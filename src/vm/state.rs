// questscript Runtime State
// Compiled programs, the shared world storage, and per-instance
// continuations.

use crate::builtins::BuiltinRegistry;
use crate::compiler::{
    compile_unit, CodeBuffer, CompileOptions, SymbolKind, SymbolTable, VarScope,
};
use crate::error::{ScriptError, ScriptResult};
use crate::vm::scope::{ScopeMap, MAX_ARRAY_INDEX};
use crate::vm::value::{Slot, Value, VarRef};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Execution state of one script instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    AwaitingInput,
    AwaitingTimer,
    /// A host-armed jump (event label) will run on the next burst
    GotoPending,
    /// Unwinding a user-function return
    Returning,
    /// Dialog closed; the next resume ends the instance
    Closed,
    Terminated,
}

/// What a suspended instance is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Input,
    /// Milliseconds
    Timer(u32),
}

/// Outcome of one execution burst
#[derive(Debug)]
pub enum RunResult {
    Finished,
    Suspended(WaitKind),
    Errored(ScriptError),
}

/// Dialog-side effects emitted by builtins for the host to drain
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Message { actor: i32, text: String },
    NextPrompt { actor: i32 },
    Menu { actor: i32, options: Vec<String> },
    InputRequest { actor: i32, string_input: bool },
    CloseDialog { actor: i32 },
}

/// An attached external actor (player): storage routing ids plus
/// read-only computed parameters
#[derive(Debug, Default, Clone)]
pub struct Actor {
    pub account_id: i32,
    pub char_id: i32,
    pub params: FxHashMap<Arc<str>, i32>,
}

/// One compiled unit, shared by every instance executing it
#[derive(Debug)]
pub struct CompiledScript {
    pub name: String,
    pub source: String,
    pub code: Vec<u8>,
    pub lines: Vec<usize>,
    /// Exported label table (folded name -> offset)
    pub labels: FxHashMap<Arc<str>, u32>,
    /// User functions defined in this unit (folded name -> offset)
    pub functions: FxHashMap<Arc<str>, u32>,
    pub symbols: Arc<RwLock<SymbolTable>>,
    pub warnings: Vec<ScriptError>,
    /// `.`-scoped variables, persistent for this script definition
    pub npc_vars: Mutex<ScopeMap>,
    /// Live instances currently rooted in this program
    pub instances: AtomicUsize,
}

impl CompiledScript {
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name.to_ascii_lowercase().as_str()).copied()
    }

    /// Unloadable once nothing executes it and its persistent map is empty
    pub fn can_unload(&self) -> bool {
        self.instances.load(Ordering::Relaxed) == 0 && self.npc_vars.lock().is_empty()
    }

    pub fn disassemble(&self) -> String {
        let view = CodeBuffer {
            code: self.code.clone(),
            lines: self.lines.clone(),
        };
        view.disassemble(&self.symbols.read(), &self.name)
    }
}

/// Shared engine state: symbol table, builtin registry, and every
/// storage scope that outlives a single instance.
#[derive(Debug)]
pub struct World {
    pub symbols: Arc<RwLock<SymbolTable>>,
    pub builtins: Arc<BuiltinRegistry>,
    pub globals: Mutex<ScopeMap>,
    pub accounts: Mutex<FxHashMap<i32, ScopeMap>>,
    pub account_globals: Mutex<FxHashMap<i32, ScopeMap>>,
    pub characters: Mutex<FxHashMap<i32, ScopeMap>>,
    pub char_temps: Mutex<FxHashMap<i32, ScopeMap>>,
    pub actors: Mutex<FxHashMap<i32, Actor>>,
    /// actor id -> instance currently owning its pending-input slot
    pub input_owner: Mutex<FxHashMap<i32, u64>>,
    /// Cross-program user functions (folded name -> program + entry)
    pub functions: Mutex<FxHashMap<Arc<str>, (Arc<CompiledScript>, u32)>>,
    pub events: Mutex<Vec<HostEvent>>,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

impl World {
    pub fn new() -> Arc<World> {
        Self::with_builtins(BuiltinRegistry::core())
    }

    pub fn with_builtins(builtins: BuiltinRegistry) -> Arc<World> {
        let mut symbols = SymbolTable::new();
        builtins.install(&mut symbols);
        Arc::new(World {
            symbols: Arc::new(RwLock::new(symbols)),
            builtins: Arc::new(builtins),
            globals: Mutex::new(ScopeMap::new()),
            accounts: Mutex::new(FxHashMap::default()),
            account_globals: Mutex::new(FxHashMap::default()),
            characters: Mutex::new(FxHashMap::default()),
            char_temps: Mutex::new(FxHashMap::default()),
            actors: Mutex::new(FxHashMap::default()),
            input_owner: Mutex::new(FxHashMap::default()),
            functions: Mutex::new(FxHashMap::default()),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Compile one unit against this world's shared symbol table and
    /// register any user functions it defines.
    pub fn compile(
        self: &Arc<Self>,
        source: &str,
        name: &str,
        options: &CompileOptions,
    ) -> ScriptResult<Arc<CompiledScript>> {
        let output = {
            let mut symbols = self.symbols.write();
            compile_unit(source, name, &mut symbols, &self.builtins, options)
        }
        .map_err(|e| e.with_source(source))?;

        let script = Arc::new(CompiledScript {
            name: name.to_string(),
            source: source.to_string(),
            code: output.code,
            lines: output.lines,
            labels: output.labels,
            functions: output.functions,
            symbols: self.symbols.clone(),
            warnings: output.warnings,
            npc_vars: Mutex::new(ScopeMap::new()),
            instances: AtomicUsize::new(0),
        });

        let mut functions = self.functions.lock();
        for (fname, &offset) in &script.functions {
            functions.insert(fname.clone(), (script.clone(), offset));
        }
        Ok(script)
    }

    /// Create a fresh instance at instruction pointer 0
    pub fn instantiate(
        self: &Arc<Self>,
        script: &Arc<CompiledScript>,
        actor_id: i32,
        source_id: i32,
    ) -> ScriptState {
        script.instances.fetch_add(1, Ordering::Relaxed);
        ScriptState {
            world: self.clone(),
            script: script.clone(),
            origin: script.clone(),
            instance_id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            ip: 0,
            state: RunState::Running,
            stack: Vec::new(),
            frame_base: 0,
            locals: Arc::new(Mutex::new(ScopeMap::new())),
            instance_vars: Arc::new(Mutex::new(ScopeMap::new())),
            actor_id,
            source_id,
            resume_value: None,
            warnings: Vec::new(),
        }
    }

    pub fn attach_actor(&self, actor_id: i32, actor: Actor) {
        self.actors.lock().insert(actor_id, actor);
    }

    /// Drop an actor and its transient per-character variables
    pub fn detach_actor(&self, actor_id: i32) {
        if let Some(actor) = self.actors.lock().remove(&actor_id) {
            self.char_temps.lock().remove(&actor.char_id);
        }
        self.input_owner.lock().remove(&actor_id);
    }

    pub fn drain_events(&self) -> Vec<HostEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn push_event(&self, event: HostEvent) {
        self.events.lock().push(event);
    }
}

/// One running (or suspended) script instance: a continuation over a
/// shared compiled program.
#[derive(Debug)]
pub struct ScriptState {
    pub world: Arc<World>,
    /// Program currently executing (changes across user-function calls)
    pub script: Arc<CompiledScript>,
    /// Program this instance was instantiated from; owns the instance
    /// count even while mid-call-chain in another program
    origin: Arc<CompiledScript>,
    pub instance_id: u64,
    pub ip: usize,
    pub state: RunState,
    pub stack: Vec<Slot>,
    pub frame_base: usize,
    /// `.@` transient locals of the current call frame
    pub locals: Arc<Mutex<ScopeMap>>,
    /// `'` per-instance scope
    pub instance_vars: Arc<Mutex<ScopeMap>>,
    /// 0 = no attached actor
    pub actor_id: i32,
    pub source_id: i32,
    /// Value delivered by the host for the re-run of a suspended call
    pub resume_value: Option<Value>,
    pub warnings: Vec<String>,
}

impl ScriptState {
    /// Arm a pending jump to an exported label (host event dispatch).
    /// The operand stack is discarded; execution restarts at the label
    /// on the next burst.
    pub fn jump_to_label(&mut self, name: &str) -> Result<(), String> {
        let offset = self
            .script
            .label_offset(name)
            .ok_or_else(|| format!("script '{}' has no label '{}'", self.script.name, name))?;
        self.stack.clear();
        self.frame_base = 0;
        self.ip = offset as usize;
        self.state = RunState::GotoPending;
        self.resume_value = None;
        Ok(())
    }

    pub fn attached_actor(&self) -> Option<Actor> {
        if self.actor_id == 0 {
            return None;
        }
        self.world.actors.lock().get(&self.actor_id).cloned()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn default_for(r: &VarRef) -> Value {
        if r.is_string {
            Value::str_from("")
        } else {
            Value::Int(0)
        }
    }

    /// Resolve a variable reference to its current value. Unset slots
    /// read as 0 / "". A missing attachment warns and yields the
    /// default rather than failing the instance.
    pub fn read_var(&mut self, r: &VarRef) -> Value {
        if let Some(map) = &r.local_override {
            return map
                .lock()
                .get(&r.name, r.index)
                .unwrap_or_else(|| Self::default_for(r));
        }

        let stored = match r.scope {
            VarScope::CallLocal => self.locals.lock().get(&r.name, r.index),
            VarScope::Npc => self.script.npc_vars.lock().get(&r.name, r.index),
            VarScope::Instance => self.instance_vars.lock().get(&r.name, r.index),
            VarScope::Global => self.world.globals.lock().get(&r.name, r.index),
            VarScope::Account
            | VarScope::AccountGlobal
            | VarScope::Character
            | VarScope::CharTemp => match self.attached_actor() {
                None => {
                    self.warn(format!(
                        "reading '{}' requires an attached actor; using the default",
                        r.name
                    ));
                    None
                }
                Some(actor) => {
                    let world = self.world.clone();
                    match r.scope {
                        VarScope::Account => world
                            .accounts
                            .lock()
                            .get(&actor.account_id)
                            .and_then(|m| m.get(&r.name, r.index)),
                        VarScope::AccountGlobal => world
                            .account_globals
                            .lock()
                            .get(&actor.account_id)
                            .and_then(|m| m.get(&r.name, r.index)),
                        VarScope::Character => world
                            .characters
                            .lock()
                            .get(&actor.char_id)
                            .and_then(|m| m.get(&r.name, r.index)),
                        _ => world
                            .char_temps
                            .lock()
                            .get(&actor.char_id)
                            .and_then(|m| m.get(&r.name, r.index)),
                    }
                }
            },
        };
        stored.unwrap_or_else(|| Self::default_for(r))
    }

    /// Store through a variable reference. Type mismatches and
    /// out-of-range indices are errors; a missing attachment warns and
    /// drops the write.
    pub fn write_var(&mut self, r: &VarRef, value: Value) -> Result<(), String> {
        if r.index > MAX_ARRAY_INDEX {
            return Err(format!(
                "index {} of '{}' is beyond the array limit {}",
                r.index, r.name, MAX_ARRAY_INDEX
            ));
        }
        match (&value, r.is_string) {
            (Value::Int(_), true) => {
                return Err(format!("cannot store an int in string variable '{}'", r.name))
            }
            (Value::Str(_), false) => {
                return Err(format!("cannot store a string in int variable '{}'", r.name))
            }
            _ => {}
        }

        if let Some(map) = &r.local_override {
            map.lock().set(&r.name, r.index, value);
            return Ok(());
        }

        match r.scope {
            VarScope::CallLocal => self.locals.lock().set(&r.name, r.index, value),
            VarScope::Npc => self.script.npc_vars.lock().set(&r.name, r.index, value),
            VarScope::Instance => self.instance_vars.lock().set(&r.name, r.index, value),
            VarScope::Global => self.world.globals.lock().set(&r.name, r.index, value),
            VarScope::Account
            | VarScope::AccountGlobal
            | VarScope::Character
            | VarScope::CharTemp => match self.attached_actor() {
                None => {
                    self.warn(format!(
                        "writing '{}' requires an attached actor; ignoring the write",
                        r.name
                    ));
                }
                Some(actor) => {
                    let world = self.world.clone();
                    match r.scope {
                        VarScope::Account => world
                            .accounts
                            .lock()
                            .entry(actor.account_id)
                            .or_default()
                            .set(&r.name, r.index, value),
                        VarScope::AccountGlobal => world
                            .account_globals
                            .lock()
                            .entry(actor.account_id)
                            .or_default()
                            .set(&r.name, r.index, value),
                        VarScope::Character => world
                            .characters
                            .lock()
                            .entry(actor.char_id)
                            .or_default()
                            .set(&r.name, r.index, value),
                        _ => world
                            .char_temps
                            .lock()
                            .entry(actor.char_id)
                            .or_default()
                            .set(&r.name, r.index, value),
                    }
                }
            },
        }
        Ok(())
    }

    /// The scope map a reference resolves into, for bulk array
    /// operations. None when an attachment is required but missing.
    pub fn scope_handle(&mut self, r: &VarRef) -> Option<ScopeHandle> {
        if let Some(map) = &r.local_override {
            return Some(ScopeHandle::Shared(map.clone()));
        }
        match r.scope {
            VarScope::CallLocal => Some(ScopeHandle::Shared(self.locals.clone())),
            VarScope::Instance => Some(ScopeHandle::Shared(self.instance_vars.clone())),
            VarScope::Npc => Some(ScopeHandle::Npc(self.script.clone())),
            VarScope::Global => Some(ScopeHandle::Globals(self.world.clone())),
            VarScope::Account
            | VarScope::AccountGlobal
            | VarScope::Character
            | VarScope::CharTemp => {
                let actor = match self.attached_actor() {
                    Some(a) => a,
                    None => {
                        self.warn(format!(
                            "array access on '{}' requires an attached actor",
                            r.name
                        ));
                        return None;
                    }
                };
                let key = match r.scope {
                    VarScope::Account | VarScope::AccountGlobal => actor.account_id,
                    _ => actor.char_id,
                };
                Some(ScopeHandle::Keyed(self.world.clone(), r.scope, key))
            }
        }
    }
}

/// A borrowed-on-demand handle to whichever scope map a reference lives
/// in; used by the array builtins to read membership lists.
pub enum ScopeHandle {
    Shared(Arc<Mutex<ScopeMap>>),
    Npc(Arc<CompiledScript>),
    Globals(Arc<World>),
    Keyed(Arc<World>, VarScope, i32),
}

impl ScopeHandle {
    /// Run a closure against the resolved map
    pub fn with<R>(&self, f: impl FnOnce(&mut ScopeMap) -> R) -> R {
        match self {
            ScopeHandle::Shared(map) => f(&mut map.lock()),
            ScopeHandle::Npc(script) => f(&mut script.npc_vars.lock()),
            ScopeHandle::Globals(world) => f(&mut world.globals.lock()),
            ScopeHandle::Keyed(world, scope, key) => {
                let mut maps = match scope {
                    VarScope::Account => world.accounts.lock(),
                    VarScope::AccountGlobal => world.account_globals.lock(),
                    VarScope::Character => world.characters.lock(),
                    _ => world.char_temps.lock(),
                };
                f(maps.entry(*key).or_default())
            }
        }
    }
}

impl Drop for ScriptState {
    fn drop(&mut self) {
        // the origin program keeps the live-instance count, even when
        // termination happens mid-call-chain in another unit
        self.origin.instances.fetch_sub(1, Ordering::Relaxed);
        if self.actor_id != 0 {
            let mut owners = self.world.input_owner.lock();
            if owners.get(&self.actor_id) == Some(&self.instance_id) {
                owners.remove(&self.actor_id);
            }
        }
    }
}

/// Build a variable reference for a symbol, reading the metadata the
/// parser resolved at intern time.
pub fn make_var_ref(symbols: &SymbolTable, id: crate::compiler::SymbolId) -> VarRef {
    let sym = symbols.get(id);
    debug_assert!(!matches!(sym.kind, SymbolKind::BuiltinFunc | SymbolKind::UserFunc));
    VarRef {
        id,
        name: sym.folded.clone(),
        index: 0,
        scope: sym.scope,
        is_string: sym.is_string,
        local_override: None,
    }
}
