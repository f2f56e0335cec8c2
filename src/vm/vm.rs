// questscript Virtual Machine
// Stack-machine dispatch loop: operators, calls, jumps, suspension.

use crate::builtins::{BuiltinFlow, Call};
use crate::compiler::opcode::{self, Instr, OpCode};
use crate::compiler::SymbolKind;
use crate::error::{ErrorKind, ScriptError, Span};
use crate::vm::scope::ScopeMap;
use crate::vm::state::{make_var_ref, RunResult, RunState, ScriptState, WaitKind};
use crate::vm::value::{ReturnInfo, Slot, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Runaway-script protection ceilings, per unsuspended burst
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub max_instructions: u32,
    pub max_jumps: u32,
    pub max_stack: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_instructions: 655360,
            max_jumps: 2048,
            max_stack: 4096,
        }
    }
}

#[derive(Debug, Default)]
pub struct Vm {
    pub options: VmOptions,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: VmOptions) -> Self {
        Self { options }
    }

    /// Deliver a host value to a suspended instance and continue it
    pub fn resume(&self, st: &mut ScriptState, value: Value) -> RunResult {
        match st.state {
            RunState::Terminated => RunResult::Finished,
            RunState::Closed => {
                st.state = RunState::Terminated;
                RunResult::Finished
            }
            RunState::AwaitingInput | RunState::AwaitingTimer => {
                st.resume_value = Some(value);
                st.state = RunState::Running;
                self.run(st)
            }
            _ => self.run(st),
        }
    }

    /// Execute one burst: until the instance finishes, suspends or errors
    pub fn run(&self, st: &mut ScriptState) -> RunResult {
        match st.state {
            RunState::Terminated => return RunResult::Finished,
            RunState::Closed => {
                st.state = RunState::Terminated;
                return RunResult::Finished;
            }
            _ => st.state = RunState::Running,
        }

        let mut instructions: u32 = 0;
        let mut jumps: u32 = 0;

        loop {
            if st.ip >= st.script.code.len() {
                st.state = RunState::Terminated;
                return RunResult::Finished;
            }
            let op_ip = st.ip;
            instructions += 1;
            if instructions > self.options.max_instructions {
                return fail(
                    st,
                    op_ip,
                    ErrorKind::ResourceError,
                    format!(
                        "runaway script: executed more than {} instructions in one burst",
                        self.options.max_instructions
                    ),
                );
            }
            if st.stack.len() > self.options.max_stack {
                return fail(
                    st,
                    op_ip,
                    ErrorKind::ResourceError,
                    "operand stack overflow".to_string(),
                );
            }

            let mut ip = st.ip;
            let instr = match opcode::read_instr(&st.script.code, &mut ip) {
                Some(i) => i,
                None => {
                    return fail(
                        st,
                        op_ip,
                        ErrorKind::RuntimeError,
                        "corrupt bytecode".to_string(),
                    )
                }
            };

            match instr {
                Instr::Int(v) => {
                    st.ip = ip;
                    st.stack.push(Slot::Int(v));
                }
                Instr::Op(op) => match op {
                    OpCode::Nop => st.ip = ip,
                    OpCode::Pos => {
                        let target = match opcode::read_u24(&st.script.code, &mut ip) {
                            Some(t) => t,
                            None => {
                                return fail(
                                    st,
                                    op_ip,
                                    ErrorKind::RuntimeError,
                                    "truncated label payload".to_string(),
                                )
                            }
                        };
                        st.ip = ip;
                        st.stack.push(Slot::Pos(target));
                    }
                    OpCode::Name => {
                        let id = match opcode::read_u24(&st.script.code, &mut ip) {
                            Some(t) => t,
                            None => {
                                return fail(
                                    st,
                                    op_ip,
                                    ErrorKind::RuntimeError,
                                    "truncated symbol payload".to_string(),
                                )
                            }
                        };
                        st.ip = ip;
                        if let Err(e) = push_name(st, id) {
                            return fail(st, op_ip, e.0, e.1);
                        }
                    }
                    OpCode::Str => {
                        let code = &st.script.code;
                        let start = ip;
                        let mut end = start;
                        while end < code.len() && code[end] != 0 {
                            end += 1;
                        }
                        let text = String::from_utf8_lossy(&code[start..end]).into_owned();
                        st.ip = (end + 1).min(code.len());
                        st.stack.push(Slot::Str(Arc::from(text.as_str())));
                    }
                    OpCode::Arg => {
                        st.ip = ip;
                        st.stack.push(Slot::ArgMarker);
                    }
                    OpCode::Deref => {
                        st.ip = ip;
                        match pop_value(st) {
                            Ok(v) => st.stack.push(Slot::from_value(v)),
                            Err(e) => return fail(st, op_ip, e.0, e.1),
                        }
                    }
                    OpCode::Pop => {
                        st.ip = ip;
                        st.stack.pop();
                    }
                    OpCode::Eol => {
                        st.ip = ip;
                        let base = st.frame_base;
                        st.stack.truncate(base);
                    }
                    OpCode::Goto => {
                        jumps += 1;
                        if jumps > self.options.max_jumps {
                            return fail(
                                st,
                                op_ip,
                                ErrorKind::ResourceError,
                                format!(
                                    "runaway script: more than {} jumps in one burst",
                                    self.options.max_jumps
                                ),
                            );
                        }
                        match read_target(st, &mut ip) {
                            Ok(target) => st.ip = target as usize,
                            Err(e) => return fail(st, op_ip, e.0, e.1),
                        }
                    }
                    OpCode::JumpZero => {
                        let target = match read_target(st, &mut ip) {
                            Ok(t) => t,
                            Err(e) => return fail(st, op_ip, e.0, e.1),
                        };
                        st.ip = ip;
                        let cond = match pop_value(st) {
                            Ok(v) => v,
                            Err(e) => return fail(st, op_ip, e.0, e.1),
                        };
                        if !cond.is_truthy() {
                            jumps += 1;
                            if jumps > self.options.max_jumps {
                                return fail(
                                    st,
                                    op_ip,
                                    ErrorKind::ResourceError,
                                    format!(
                                        "runaway script: more than {} jumps in one burst",
                                        self.options.max_jumps
                                    ),
                                );
                            }
                            st.ip = target as usize;
                        }
                    }
                    OpCode::Func => {
                        st.ip = ip;
                        match self.dispatch_call(st, op_ip) {
                            CallOutcome::Continue => {}
                            CallOutcome::Done(result) => return result,
                        }
                    }
                    OpCode::Return => {
                        st.ip = ip;
                        match self.unwind_return(st, op_ip) {
                            CallOutcome::Continue => {}
                            CallOutcome::Done(result) => return result,
                        }
                    }
                    OpCode::End => {
                        st.state = RunState::Terminated;
                        return RunResult::Finished;
                    }
                    OpCode::Neg | OpCode::LNot | OpCode::Not => {
                        st.ip = ip;
                        if let Err(e) = unary_op(st, op) {
                            return fail(st, op_ip, e.0, e.1);
                        }
                    }
                    _ => {
                        st.ip = ip;
                        if let Err(e) = binary_op(st, op) {
                            return fail(st, op_ip, e.0, e.1);
                        }
                    }
                },
            }
        }
    }

    /// Execute the `Func` opcode: builtin dispatch or user-function call
    fn dispatch_call(&self, st: &mut ScriptState, op_ip: usize) -> CallOutcome {
        let marker_pos = match st.stack.iter().rposition(|s| matches!(s, Slot::ArgMarker)) {
            Some(p) if p > 0 => p,
            _ => {
                return CallOutcome::Done(fail(
                    st,
                    op_ip,
                    ErrorKind::RuntimeError,
                    "call without an argument marker".to_string(),
                ))
            }
        };
        let callee = match &st.stack[marker_pos - 1] {
            Slot::FuncRef(id) => *id,
            other => {
                return CallOutcome::Done(fail(
                    st,
                    op_ip,
                    ErrorKind::TypeError,
                    format!("call target is a {}, not a function", other.kind_name()),
                ))
            }
        };

        let (kind, registry_index, name) = {
            let symbols = st.script.symbols.clone();
            let symbols = symbols.read();
            let sym = symbols.get(callee);
            (sym.kind, sym.value, sym.folded.clone())
        };

        match kind {
            SymbolKind::BuiltinFunc => {
                let builtins = st.world.builtins.clone();
                let builtin = match builtins.get(registry_index as usize) {
                    Some(b) => b,
                    None => {
                        return CallOutcome::Done(fail(
                            st,
                            op_ip,
                            ErrorKind::RuntimeError,
                            format!("builtin '{}' is not registered", name),
                        ))
                    }
                };
                // arguments are cloned, never consumed: a suspended call
                // re-runs with the stack intact
                let args: Vec<Slot> = st.stack[marker_pos + 1..].to_vec();
                let mut call = Call::new(st, args);
                match (builtin.func)(&mut call) {
                    Ok(BuiltinFlow::Value(v)) => {
                        st.stack.truncate(marker_pos - 1);
                        st.stack.push(Slot::from_value(v));
                        CallOutcome::Continue
                    }
                    Ok(BuiltinFlow::Ref(r)) => {
                        st.stack.truncate(marker_pos - 1);
                        st.stack.push(Slot::Ref(r));
                        CallOutcome::Continue
                    }
                    Ok(BuiltinFlow::Nothing) => {
                        st.stack.truncate(marker_pos - 1);
                        st.stack.push(Slot::Int(0));
                        CallOutcome::Continue
                    }
                    Ok(BuiltinFlow::Suspend(wait)) => {
                        // rewind to the call opcode; the same call is
                        // re-entered when the host resumes us
                        st.ip = op_ip;
                        st.state = match wait {
                            WaitKind::Input => RunState::AwaitingInput,
                            WaitKind::Timer(_) => RunState::AwaitingTimer,
                        };
                        CallOutcome::Done(RunResult::Suspended(wait))
                    }
                    Ok(BuiltinFlow::End) => {
                        st.state = RunState::Terminated;
                        CallOutcome::Done(RunResult::Finished)
                    }
                    Ok(BuiltinFlow::Close) => {
                        st.stack.truncate(marker_pos - 1);
                        st.state = RunState::Closed;
                        CallOutcome::Done(RunResult::Suspended(WaitKind::Input))
                    }
                    Err(message) => CallOutcome::Done(fail(
                        st,
                        op_ip,
                        ErrorKind::RuntimeError,
                        format!("in '{}': {}", name, message),
                    )),
                }
            }
            SymbolKind::UserFunc | SymbolKind::UserFuncDecl => {
                let target = st
                    .script
                    .functions
                    .get(&name)
                    .map(|&off| (st.script.clone(), off))
                    .or_else(|| st.world.functions.lock().get(&name).cloned());
                let (target_script, entry) = match target {
                    Some(t) => t,
                    None => {
                        return CallOutcome::Done(fail(
                            st,
                            op_ip,
                            ErrorKind::NameError,
                            format!("function '{}' is not defined", name),
                        ))
                    }
                };

                let info = ReturnInfo {
                    ip: st.ip,
                    script: st.script.clone(),
                    locals: st.locals.clone(),
                    frame_base: st.frame_base,
                    marker_pos,
                    argc: st.stack.len() - marker_pos - 1,
                };
                st.stack.push(Slot::RetInfo(Box::new(info)));
                st.frame_base = st.stack.len();
                st.locals = Arc::new(Mutex::new(ScopeMap::new()));
                st.script = target_script;
                st.ip = entry as usize;
                CallOutcome::Continue
            }
            _ => CallOutcome::Done(fail(
                st,
                op_ip,
                ErrorKind::NameError,
                format!("'{}' is not callable", name),
            )),
        }
    }

    /// Execute `Return`: pop the value, restore the caller's
    /// continuation, or finish the script when there is no caller.
    fn unwind_return(&self, st: &mut ScriptState, op_ip: usize) -> CallOutcome {
        // resolve the value before the callee's scope goes away
        let value = match pop_value(st) {
            Ok(v) => v,
            Err(e) => return CallOutcome::Done(fail(st, op_ip, e.0, e.1)),
        };

        let info_pos = match st.stack.iter().rposition(|s| matches!(s, Slot::RetInfo(_))) {
            Some(p) => p,
            None => {
                st.state = RunState::Terminated;
                return CallOutcome::Done(RunResult::Finished);
            }
        };
        st.state = RunState::Returning;
        let info = match st.stack[info_pos].clone() {
            Slot::RetInfo(b) => *b,
            _ => unreachable!(),
        };

        st.stack.truncate(info.marker_pos - 1);
        st.ip = info.ip;
        st.script = info.script;
        st.locals = info.locals;
        st.frame_base = info.frame_base;
        st.stack.push(Slot::from_value(value));
        st.state = RunState::Running;
        CallOutcome::Continue
    }
}

enum CallOutcome {
    Continue,
    Done(RunResult),
}

type OpError = (ErrorKind, String);

fn fail(st: &mut ScriptState, op_ip: usize, kind: ErrorKind, message: String) -> RunResult {
    st.state = RunState::Terminated;
    let line = st.script.lines.get(op_ip).copied().unwrap_or(0).max(1);
    let error = ScriptError::new(
        kind,
        message,
        Span::from_positions(line, 1, line, 1),
        &st.script.name,
    )
    .with_source(&st.script.source);
    RunResult::Errored(error)
}

/// Push the slot a `Name` opcode denotes, based on the symbol's kind
fn push_name(st: &mut ScriptState, id: u32) -> Result<(), OpError> {
    let symbols = st.script.symbols.clone();
    let symbols = symbols.read();
    if id as usize >= symbols.len() {
        return Err((
            ErrorKind::RuntimeError,
            format!("reference to unknown symbol #{}", id),
        ));
    }
    let sym = symbols.get(id);
    match sym.kind {
        SymbolKind::Int => st.stack.push(Slot::Int(sym.value)),
        SymbolKind::Pos => st.stack.push(Slot::Pos(sym.pos.unwrap_or_default())),
        SymbolKind::BuiltinFunc | SymbolKind::UserFunc | SymbolKind::UserFuncDecl => {
            st.stack.push(Slot::FuncRef(id))
        }
        SymbolKind::Param => {
            let name = sym.folded.clone();
            drop(symbols);
            let value = st
                .attached_actor()
                .and_then(|actor| actor.params.get(&name).copied());
            match value {
                Some(v) => st.stack.push(Slot::Int(v)),
                None => {
                    st.warn(format!("parameter '{}' is unavailable; using 0", name));
                    st.stack.push(Slot::Int(0));
                }
            }
        }
        _ => {
            let var = make_var_ref(&symbols, id);
            drop(symbols);
            st.stack.push(Slot::Ref(var));
        }
    }
    Ok(())
}

/// A jump target: a resolved `Pos`, or a `Name` whose symbol resolved
/// to a label elsewhere in this compilation
fn read_target(st: &ScriptState, ip: &mut usize) -> Result<u32, OpError> {
    match opcode::read_instr(&st.script.code, ip) {
        Some(Instr::Op(OpCode::Pos)) => opcode::read_u24(&st.script.code, ip)
            .ok_or_else(|| (ErrorKind::RuntimeError, "truncated jump target".to_string())),
        Some(Instr::Op(OpCode::Name)) => {
            let id = opcode::read_u24(&st.script.code, ip)
                .ok_or_else(|| (ErrorKind::RuntimeError, "truncated jump target".to_string()))?;
            let symbols = st.script.symbols.read();
            let sym = symbols.get(id);
            match (sym.kind, sym.pos) {
                (SymbolKind::Pos, Some(pos)) => Ok(pos),
                _ => Err((
                    ErrorKind::NameError,
                    format!("jump to unresolved label '{}'", sym.name),
                )),
            }
        }
        _ => Err((
            ErrorKind::RuntimeError,
            "jump opcode without a target".to_string(),
        )),
    }
}

fn pop_value(st: &mut ScriptState) -> Result<Value, OpError> {
    let slot = st
        .stack
        .pop()
        .ok_or_else(|| (ErrorKind::RuntimeError, "operand stack underflow".to_string()))?;
    resolve_slot(st, slot)
}

fn resolve_slot(st: &mut ScriptState, slot: Slot) -> Result<Value, OpError> {
    match slot {
        Slot::Int(v) => Ok(Value::Int(v)),
        Slot::Str(s) => Ok(Value::Str(s)),
        Slot::Ref(r) => Ok(st.read_var(&r)),
        other => Err((
            ErrorKind::TypeError,
            format!("cannot use a {} as a value", other.kind_name()),
        )),
    }
}

/// Clamp an i64 intermediate into the 32-bit value range, warning
/// instead of wrapping
fn clamp_i32(st: &mut ScriptState, value: i64, what: &str) -> i32 {
    if value > i32::MAX as i64 {
        st.warn(format!("{} overflowed; clamped to {}", what, i32::MAX));
        i32::MAX
    } else if value < i32::MIN as i64 {
        st.warn(format!("{} underflowed; clamped to {}", what, i32::MIN));
        i32::MIN
    } else {
        value as i32
    }
}

fn unary_op(st: &mut ScriptState, op: OpCode) -> Result<(), OpError> {
    let operand = pop_value(st)?;
    let result = match op {
        OpCode::LNot => Value::Int(if operand.is_truthy() { 0 } else { 1 }),
        OpCode::Neg => match operand {
            Value::Int(v) => Value::Int(clamp_i32(st, -(v as i64), "negation")),
            Value::Str(_) => {
                return Err((
                    ErrorKind::TypeError,
                    "cannot negate a string".to_string(),
                ))
            }
        },
        OpCode::Not => match operand {
            Value::Int(v) => Value::Int(!v),
            Value::Str(_) => {
                return Err((
                    ErrorKind::TypeError,
                    "cannot bitwise-invert a string".to_string(),
                ))
            }
        },
        _ => unreachable!(),
    };
    st.stack.push(Slot::from_value(result));
    Ok(())
}

fn binary_op(st: &mut ScriptState, op: OpCode) -> Result<(), OpError> {
    let rhs = pop_value(st)?;
    let lhs = pop_value(st)?;

    // `+` against a string operand concatenates, coercing the other side
    if op == OpCode::Add {
        if let (Value::Str(_), _) | (_, Value::Str(_)) = (&lhs, &rhs) {
            let text = format!("{}{}", lhs, rhs);
            st.stack.push(Slot::Str(Arc::from(text.as_str())));
            return Ok(());
        }
    }

    let result = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_binary(st, op, a, b)?,
        (Value::Str(a), Value::Str(b)) => str_binary(op, &a, &b)?,
        (a, b) => {
            return Err((
                ErrorKind::TypeError,
                format!(
                    "operator {} cannot mix {} and {}",
                    op.name(),
                    a.type_name(),
                    b.type_name()
                ),
            ))
        }
    };
    st.stack.push(Slot::from_value(result));
    Ok(())
}

fn int_binary(st: &mut ScriptState, op: OpCode, a: i32, b: i32) -> Result<Value, OpError> {
    let v = match op {
        OpCode::Add => clamp_i32(st, a as i64 + b as i64, "addition"),
        OpCode::Sub => clamp_i32(st, a as i64 - b as i64, "subtraction"),
        OpCode::Mul => clamp_i32(st, a as i64 * b as i64, "multiplication"),
        OpCode::Div => {
            if b == 0 {
                return Err((ErrorKind::RangeError, "division by zero".to_string()));
            }
            clamp_i32(st, a as i64 / b as i64, "division")
        }
        OpCode::Mod => {
            if b == 0 {
                return Err((ErrorKind::RangeError, "modulo by zero".to_string()));
            }
            a.wrapping_rem(b)
        }
        OpCode::Eq => (a == b) as i32,
        OpCode::Ne => (a != b) as i32,
        OpCode::Gt => (a > b) as i32,
        OpCode::Ge => (a >= b) as i32,
        OpCode::Lt => (a < b) as i32,
        OpCode::Le => (a <= b) as i32,
        OpCode::And => a & b,
        OpCode::Or => a | b,
        OpCode::Xor => a ^ b,
        OpCode::LAnd => ((a != 0) && (b != 0)) as i32,
        OpCode::LOr => ((a != 0) || (b != 0)) as i32,
        OpCode::Shl => a.wrapping_shl(b as u32 & 31),
        OpCode::Shr => a.wrapping_shr(b as u32 & 31),
        _ => {
            return Err((
                ErrorKind::RuntimeError,
                format!("{} is not a binary operator", op.name()),
            ))
        }
    };
    Ok(Value::Int(v))
}

fn str_binary(op: OpCode, a: &str, b: &str) -> Result<Value, OpError> {
    let v = match op {
        OpCode::Eq => (a == b) as i32,
        OpCode::Ne => (a != b) as i32,
        OpCode::Gt => (a > b) as i32,
        OpCode::Ge => (a >= b) as i32,
        OpCode::Lt => (a < b) as i32,
        OpCode::Le => (a <= b) as i32,
        _ => {
            return Err((
                ErrorKind::TypeError,
                format!("operator {} does not apply to strings", op.name()),
            ))
        }
    };
    Ok(Value::Int(v))
}
