// questscript Runtime Values and Stack Slots

use crate::compiler::symbols::{SymbolId, VarScope};
use crate::vm::scope::ScopeMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A first-class script value: 32-bit integer or string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Str(Arc<str>),
}

impl Value {
    pub fn str_from(text: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(text.as_ref()))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// The "nothing stored here" value for this type; writing it to a
    /// variable deletes the slot
    pub fn is_zero_like(&self) -> bool {
        match self {
            Value::Int(v) => *v == 0,
            Value::Str(s) => s.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::str_from(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(Arc::from(s.as_str()))
    }
}

/// A resolved variable reference: symbol, array index and storage class.
/// `local_override` lets a callee operate on a caller's local scope map
/// (argument-by-reference plumbing).
#[derive(Debug, Clone)]
pub struct VarRef {
    pub id: SymbolId,
    /// Folded symbol name; the storage key, stable across recompiles
    pub name: Arc<str>,
    pub index: u32,
    pub scope: VarScope,
    pub is_string: bool,
    pub local_override: Option<Arc<Mutex<ScopeMap>>>,
}

impl VarRef {
    pub fn at_index(&self, index: u32) -> VarRef {
        VarRef {
            index,
            ..self.clone()
        }
    }
}

/// Saved continuation pushed when entering a user function
#[derive(Debug, Clone)]
pub struct ReturnInfo {
    /// Caller's resume point
    pub ip: usize,
    /// Caller's program (calls may cross compilation units)
    pub script: Arc<crate::vm::state::CompiledScript>,
    /// Caller's transient locals
    pub locals: Arc<Mutex<ScopeMap>>,
    pub frame_base: usize,
    /// Stack position of the argument-list marker
    pub marker_pos: usize,
    pub argc: usize,
}

/// One operand-stack slot
#[derive(Debug, Clone)]
pub enum Slot {
    Int(i32),
    Str(Arc<str>),
    Ref(VarRef),
    /// Resolved code offset (jump target)
    Pos(u32),
    /// Function named on the stack, awaiting its `Func` opcode
    FuncRef(SymbolId),
    /// Start-of-arguments marker
    ArgMarker,
    RetInfo(Box<ReturnInfo>),
}

impl Slot {
    pub fn from_value(value: Value) -> Slot {
        match value {
            Value::Int(v) => Slot::Int(v),
            Value::Str(s) => Slot::Str(s),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Slot::Int(_) => "int",
            Slot::Str(_) => "string",
            Slot::Ref(_) => "variable",
            Slot::Pos(_) => "label",
            Slot::FuncRef(_) => "function",
            Slot::ArgMarker => "argument marker",
            Slot::RetInfo(_) => "return record",
        }
    }
}
