// questscript Runtime
// Values, scoped storage, world/instance state, and the dispatch loop.

pub mod scope;
pub mod state;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;

pub use scope::{ScopeMap, SnapValue, SnapshotError, VarSnapshot, MAX_ARRAY_INDEX};
pub use state::{
    make_var_ref, Actor, CompiledScript, HostEvent, RunResult, RunState, ScopeHandle, ScriptState,
    WaitKind, World,
};
pub use value::{ReturnInfo, Slot, Value, VarRef};
pub use vm::{Vm, VmOptions};
