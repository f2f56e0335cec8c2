// questscript Builtin Commands
// The host-facing command catalog: dialog, flow control, arrays, and
// the implicit assignment plumbing the compiler lowers onto.

use crate::compiler::SymbolTable;
use crate::vm::scope::MAX_ARRAY_INDEX;
use crate::vm::state::{HostEvent, ScriptState, WaitKind};
use crate::vm::value::{Slot, Value, VarRef};
use rand::Rng;
use rustc_hash::FxHashMap;

/// What a builtin hands back to the dispatch loop
#[derive(Debug)]
pub enum BuiltinFlow {
    /// Replace the call with this value
    Value(Value),
    /// Replace the call with a variable reference (element access)
    Ref(VarRef),
    /// No meaningful result; the call yields 0
    Nothing,
    /// Suspend the instance; the call re-runs on resume
    Suspend(WaitKind),
    /// Terminate the instance
    End,
    /// Close the dialog; the next resume ends the instance
    Close,
}

pub type BuiltinFn = fn(&mut Call<'_>) -> Result<BuiltinFlow, String>;

pub struct Builtin {
    pub name: &'static str,
    /// Argument shape: one letter per required argument (`i` int,
    /// `s` string, `v` any value, `r` variable reference), `?` before
    /// optional arguments, trailing `*` for a variadic tail.
    pub signature: &'static str,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct BuiltinRegistry {
    entries: Vec<Builtin>,
    by_name: FxHashMap<&'static str, usize>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard catalog
    pub fn core() -> Self {
        let mut reg = Self::new();
        reg.register("set", "rv", builtin_set);
        reg.register("getelementofarray", "ri", builtin_getelementofarray);
        reg.register("setarray", "rv*", builtin_setarray);
        reg.register("cleararray", "rvi", builtin_cleararray);
        reg.register("copyarray", "rri", builtin_copyarray);
        reg.register("deletearray", "r?i", builtin_deletearray);
        reg.register("getarraysize", "r", builtin_getarraysize);
        reg.register("inarray", "rv", builtin_inarray);
        reg.register("getarg", "i?v", builtin_getarg);
        reg.register("mes", "s*", builtin_mes);
        reg.register("next", "", builtin_next);
        reg.register("close", "", builtin_close);
        reg.register("select", "s*", builtin_select);
        reg.register("menu", "s*", builtin_select);
        reg.register("input", "r?ii", builtin_input);
        reg.register("sleep", "i", builtin_sleep);
        reg.register("sleep2", "i", builtin_sleep2);
        reg.register("end", "", builtin_end);
        reg.register("rand", "i?i", builtin_rand);
        reg.register("strlen", "s", builtin_strlen);
        reg
    }

    pub fn register(&mut self, name: &'static str, signature: &'static str, func: BuiltinFn) {
        let index = self.entries.len();
        self.entries.push(Builtin {
            name,
            signature,
            func,
        });
        self.by_name.insert(name, index);
    }

    /// Bind every entry into a symbol table; the symbol's value is the
    /// registry index.
    pub fn install(&self, symbols: &mut SymbolTable) {
        for (index, builtin) in self.entries.iter().enumerate() {
            // declared names are static and kind-consistent
            let _ = symbols.declare_builtin(builtin.name, index as i32);
        }
    }

    pub fn get(&self, index: usize) -> Option<&Builtin> {
        self.entries.get(index)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn signature(&self, index: usize) -> &str {
        self.entries.get(index).map_or("", |b| b.signature)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One builtin invocation: the instance plus a cloned argument list.
/// Arguments are cloned off the operand stack so a suspended call finds
/// them untouched when it re-runs.
pub struct Call<'a> {
    pub state: &'a mut ScriptState,
    args: Vec<Slot>,
}

impl<'a> Call<'a> {
    pub fn new(state: &'a mut ScriptState, args: Vec<Slot>) -> Self {
        Self { state, args }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    fn resolve(&mut self, slot: Slot) -> Result<Value, String> {
        match slot {
            Slot::Int(v) => Ok(Value::Int(v)),
            Slot::Str(s) => Ok(Value::Str(s)),
            Slot::Ref(r) => Ok(self.state.read_var(&r)),
            other => Err(format!("argument is a {}, not a value", other.kind_name())),
        }
    }

    pub fn value(&mut self, index: usize) -> Result<Value, String> {
        let slot = self
            .args
            .get(index)
            .cloned()
            .ok_or_else(|| format!("missing argument #{}", index + 1))?;
        self.resolve(slot)
    }

    pub fn int(&mut self, index: usize) -> Result<i32, String> {
        match self.value(index)? {
            Value::Int(v) => Ok(v),
            Value::Str(_) => Err(format!("argument #{} must be an int", index + 1)),
        }
    }

    pub fn opt_int(&mut self, index: usize, default: i32) -> Result<i32, String> {
        if index < self.args.len() {
            self.int(index)
        } else {
            Ok(default)
        }
    }

    /// String rendering of an argument; ints are formatted
    pub fn text(&mut self, index: usize) -> Result<String, String> {
        Ok(self.value(index)?.to_string())
    }

    pub fn var(&self, index: usize) -> Result<VarRef, String> {
        match self.args.get(index) {
            Some(Slot::Ref(r)) => Ok(r.clone()),
            Some(other) => Err(format!(
                "argument #{} must be a variable, not a {}",
                index + 1,
                other.kind_name()
            )),
            None => Err(format!("missing argument #{}", index + 1)),
        }
    }

    /// The host-delivered value, present only on the re-run after a
    /// suspension
    pub fn take_resume(&mut self) -> Option<Value> {
        self.state.resume_value.take()
    }

    pub fn actor(&self) -> Option<i32> {
        if self.state.actor_id == 0 {
            None
        } else {
            Some(self.state.actor_id)
        }
    }

    fn require_actor(&self) -> Result<i32, String> {
        self.actor()
            .ok_or_else(|| "requires an attached actor".to_string())
    }

    /// Claim the actor's pending-input slot for this instance
    fn claim_input(&mut self) -> Result<(), String> {
        let actor = self.require_actor()?;
        let mut owners = self.state.world.input_owner.lock();
        match owners.get(&actor) {
            Some(&owner) if owner != self.state.instance_id => {
                Err("the actor is already answering another script".to_string())
            }
            _ => {
                owners.insert(actor, self.state.instance_id);
                Ok(())
            }
        }
    }

    fn release_input(&mut self) {
        if self.state.actor_id == 0 {
            return;
        }
        let mut owners = self.state.world.input_owner.lock();
        if owners.get(&self.state.actor_id) == Some(&self.state.instance_id) {
            owners.remove(&self.state.actor_id);
        }
    }

    fn push_event(&self, event: HostEvent) {
        self.state.world.push_event(event);
    }
}

// ---------------------------------------------------------------------
// assignment and arrays

fn builtin_set(call: &mut Call) -> Result<BuiltinFlow, String> {
    let target = call.var(0)?;
    let value = call.value(1)?;
    call.state.write_var(&target, value.clone())?;
    Ok(BuiltinFlow::Value(value))
}

fn builtin_getelementofarray(call: &mut Call) -> Result<BuiltinFlow, String> {
    let base = call.var(0)?;
    let index = call.int(1)?;
    if index < 0 || index as u32 > MAX_ARRAY_INDEX {
        return Err(format!(
            "index {} of '{}' is outside 0..={}",
            index, base.name, MAX_ARRAY_INDEX
        ));
    }
    Ok(BuiltinFlow::Ref(base.at_index(base.index + index as u32)))
}

fn builtin_setarray(call: &mut Call) -> Result<BuiltinFlow, String> {
    let base = call.var(0)?;
    for i in 1..call.arg_count() {
        let value = call.value(i)?;
        let slot = base.at_index(base.index + (i as u32 - 1));
        call.state.write_var(&slot, value)?;
    }
    Ok(BuiltinFlow::Nothing)
}

fn builtin_cleararray(call: &mut Call) -> Result<BuiltinFlow, String> {
    let base = call.var(0)?;
    let value = call.value(1)?;
    let count = call.int(2)?;
    if count < 0 {
        return Err("count must not be negative".to_string());
    }
    for k in 0..count as u32 {
        call.state.write_var(&base.at_index(base.index + k), value.clone())?;
    }
    Ok(BuiltinFlow::Nothing)
}

fn builtin_copyarray(call: &mut Call) -> Result<BuiltinFlow, String> {
    let dest = call.var(0)?;
    let src = call.var(1)?;
    let count = call.int(2)?;
    if count < 0 {
        return Err("count must not be negative".to_string());
    }
    if dest.is_string != src.is_string {
        return Err("source and destination arrays differ in type".to_string());
    }
    for k in 0..count as u32 {
        let value = call.state.read_var(&src.at_index(src.index + k));
        call.state.write_var(&dest.at_index(dest.index + k), value)?;
    }
    Ok(BuiltinFlow::Nothing)
}

/// Remove `count` slots at the reference's index, shifting later
/// entries down; with no count, truncate from the index onward.
fn builtin_deletearray(call: &mut Call) -> Result<BuiltinFlow, String> {
    let base = call.var(0)?;
    let count = if call.arg_count() > 1 {
        let c = call.int(1)?;
        if c < 0 {
            return Err("count must not be negative".to_string());
        }
        Some(c as u32)
    } else {
        None
    };

    let handle = match call.state.scope_handle(&base) {
        Some(h) => h,
        None => return Ok(BuiltinFlow::Nothing),
    };
    handle.with(|map| {
        let members: Vec<u32> = map.members(&base.name).to_vec();
        match count {
            None => {
                for index in members.into_iter().filter(|&m| m >= base.index) {
                    map.set(&base.name, index, Value::Int(0));
                }
            }
            Some(count) => {
                let moved: Vec<(u32, Value)> = members
                    .iter()
                    .filter(|&&m| m >= base.index + count)
                    .filter_map(|&m| map.get(&base.name, m).map(|v| (m, v)))
                    .collect();
                for index in members.into_iter().filter(|&m| m >= base.index) {
                    map.set(&base.name, index, Value::Int(0));
                }
                for (index, value) in moved {
                    map.set(&base.name, index - count, value);
                }
            }
        }
    });
    Ok(BuiltinFlow::Nothing)
}

fn builtin_getarraysize(call: &mut Call) -> Result<BuiltinFlow, String> {
    let base = call.var(0)?;
    let size = match call.state.scope_handle(&base) {
        Some(handle) => handle.with(|map| map.array_size(&base.name)),
        None => 0,
    };
    Ok(BuiltinFlow::Value(Value::Int(size as i32)))
}

/// First populated index holding the value, or -1
fn builtin_inarray(call: &mut Call) -> Result<BuiltinFlow, String> {
    let base = call.var(0)?;
    let needle = call.value(1)?;
    let found = match call.state.scope_handle(&base) {
        Some(handle) => handle.with(|map| {
            map.members(&base.name)
                .iter()
                .find(|&&m| map.get(&base.name, m).as_ref() == Some(&needle))
                .map(|&m| m as i32)
        }),
        None => None,
    };
    Ok(BuiltinFlow::Value(Value::Int(found.unwrap_or(-1))))
}

// ---------------------------------------------------------------------
// user-function arguments

fn builtin_getarg(call: &mut Call) -> Result<BuiltinFlow, String> {
    let wanted = call.int(0)?;
    if wanted < 0 {
        return Err("argument index must not be negative".to_string());
    }

    let info_pos = call
        .state
        .stack
        .iter()
        .rposition(|s| matches!(s, Slot::RetInfo(_)));
    let frame = info_pos.map(|pos| match &call.state.stack[pos] {
        Slot::RetInfo(info) => (info.marker_pos, pos),
        _ => unreachable!(),
    });

    let slot = frame.and_then(|(marker_pos, info_pos)| {
        let args = &call.state.stack[marker_pos + 1..info_pos];
        args.get(wanted as usize).cloned()
    });

    match slot {
        Some(slot) => Ok(BuiltinFlow::Value(call.resolve(slot)?)),
        None if call.arg_count() > 1 => Ok(BuiltinFlow::Value(call.value(1)?)),
        None if frame.is_none() => Err("used outside a user function".to_string()),
        None => Err(format!("argument {} was not passed", wanted)),
    }
}

// ---------------------------------------------------------------------
// dialog

fn builtin_mes(call: &mut Call) -> Result<BuiltinFlow, String> {
    let actor = match call.actor() {
        Some(a) => a,
        None => {
            call.state.warn("mes without an attached actor; dropped");
            return Ok(BuiltinFlow::Nothing);
        }
    };
    for i in 0..call.arg_count() {
        let text = call.text(i)?;
        call.push_event(HostEvent::Message { actor, text });
    }
    Ok(BuiltinFlow::Nothing)
}

fn builtin_next(call: &mut Call) -> Result<BuiltinFlow, String> {
    if call.take_resume().is_some() {
        call.release_input();
        return Ok(BuiltinFlow::Nothing);
    }
    call.claim_input()?;
    let actor = call.require_actor()?;
    call.push_event(HostEvent::NextPrompt { actor });
    Ok(BuiltinFlow::Suspend(WaitKind::Input))
}

fn builtin_close(call: &mut Call) -> Result<BuiltinFlow, String> {
    if let Some(actor) = call.actor() {
        call.push_event(HostEvent::CloseDialog { actor });
    }
    Ok(BuiltinFlow::Close)
}

/// Present a menu; resumes with the 1-based choice
fn builtin_select(call: &mut Call) -> Result<BuiltinFlow, String> {
    if let Some(choice) = call.take_resume() {
        call.release_input();
        return match choice {
            Value::Int(v) => Ok(BuiltinFlow::Value(Value::Int(v))),
            Value::Str(_) => Err("menu choice must be an int".to_string()),
        };
    }
    call.claim_input()?;
    let actor = call.require_actor()?;
    let mut options = Vec::with_capacity(call.arg_count());
    for i in 0..call.arg_count() {
        options.push(call.text(i)?);
    }
    call.push_event(HostEvent::Menu { actor, options });
    Ok(BuiltinFlow::Suspend(WaitKind::Input))
}

/// Prompt for a value into a variable; int inputs are clamped into
/// [min, max]
fn builtin_input(call: &mut Call) -> Result<BuiltinFlow, String> {
    let target = call.var(0)?;
    if let Some(delivered) = call.take_resume() {
        call.release_input();
        let min = call.opt_int(1, 0)?;
        let max = call.opt_int(2, i32::MAX)?;
        let value = match (delivered, target.is_string) {
            (Value::Str(s), true) => Value::Str(s),
            (Value::Int(v), false) => {
                if v < min || v > max {
                    call.state
                        .warn(format!("input {} clamped into {}..={}", v, min, max));
                }
                Value::Int(v.clamp(min, max))
            }
            (other, _) => {
                return Err(format!(
                    "expected a {} input, got a {}",
                    if target.is_string { "string" } else { "int" },
                    other.type_name()
                ))
            }
        };
        call.state.write_var(&target, value)?;
        return Ok(BuiltinFlow::Value(Value::Int(0)));
    }
    call.claim_input()?;
    let actor = call.require_actor()?;
    call.push_event(HostEvent::InputRequest {
        actor,
        string_input: target.is_string,
    });
    Ok(BuiltinFlow::Suspend(WaitKind::Input))
}

// ---------------------------------------------------------------------
// timing and termination

/// Pause for the given milliseconds, detaching the actor
fn builtin_sleep(call: &mut Call) -> Result<BuiltinFlow, String> {
    if call.take_resume().is_some() {
        return Ok(BuiltinFlow::Nothing);
    }
    let millis = call.int(0)?.max(0) as u32;
    call.state.actor_id = 0;
    Ok(BuiltinFlow::Suspend(WaitKind::Timer(millis)))
}

/// Pause keeping the actor attached
fn builtin_sleep2(call: &mut Call) -> Result<BuiltinFlow, String> {
    if call.take_resume().is_some() {
        return Ok(BuiltinFlow::Nothing);
    }
    let millis = call.int(0)?.max(0) as u32;
    Ok(BuiltinFlow::Suspend(WaitKind::Timer(millis)))
}

fn builtin_end(_call: &mut Call) -> Result<BuiltinFlow, String> {
    Ok(BuiltinFlow::End)
}

// ---------------------------------------------------------------------
// misc

fn builtin_rand(call: &mut Call) -> Result<BuiltinFlow, String> {
    let mut rng = rand::rng();
    let value = if call.arg_count() >= 2 {
        let a = call.int(0)?;
        let b = call.int(1)?;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        rng.random_range(lo..=hi)
    } else {
        let bound = call.int(0)?;
        if bound <= 0 {
            return Err("bound must be positive".to_string());
        }
        rng.random_range(0..bound)
    };
    Ok(BuiltinFlow::Value(Value::Int(value)))
}

fn builtin_strlen(call: &mut Call) -> Result<BuiltinFlow, String> {
    let text = call.text(0)?;
    Ok(BuiltinFlow::Value(Value::Int(text.chars().count() as i32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_catalog_is_name_addressable() {
        let reg = BuiltinRegistry::core();
        for name in ["set", "getelementofarray", "mes", "select", "getarg"] {
            let index = reg.lookup(name).unwrap();
            assert_eq!(reg.get(index).unwrap().name, name);
        }
        assert!(reg.lookup("summon_dragon").is_none());
    }

    #[test]
    fn install_binds_registry_indices() {
        let reg = BuiltinRegistry::core();
        let mut symbols = SymbolTable::new();
        reg.install(&mut symbols);
        let id = symbols.lookup("set").unwrap();
        let sym = symbols.get(id);
        assert_eq!(sym.value as usize, reg.lookup("set").unwrap());
        assert_eq!(reg.signature(sym.value as usize), "rv");
    }
}
