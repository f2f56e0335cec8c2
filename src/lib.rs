//! questscript: an embeddable quest-dialog scripting engine.
//!
//! Source text compiles through a recursive-descent front end into a
//! compact variable-length bytecode, executed by a resumable stack
//! machine. Instances suspend at dialog and timer boundaries and carry
//! their continuation (instruction pointer, operand stack, call frames,
//! local scopes) across host round-trips.
//!
//! ```
//! use questscript::compiler::CompileOptions;
//! use questscript::vm::{RunResult, Value, Vm, World};
//!
//! let world = World::new();
//! let script = world
//!     .compile("$greeted = $greeted + 1;", "counter", &CompileOptions::default())
//!     .unwrap();
//! let mut instance = world.instantiate(&script, 0, 0);
//! let vm = Vm::new();
//! assert!(matches!(vm.run(&mut instance), RunResult::Finished));
//!
//! let name: std::sync::Arc<str> = std::sync::Arc::from("$greeted");
//! assert_eq!(world.globals.lock().get(&name, 0), Some(Value::Int(1)));
//! ```

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use builtins::{Builtin, BuiltinFlow, BuiltinRegistry, Call};
pub use compiler::{compile_unit, CompileOptions, CompileOutput, SymbolTable, VarScope};
pub use error::{ErrorKind, ScriptError, ScriptResult, Span};
pub use vm::{
    Actor, CompiledScript, HostEvent, RunResult, RunState, ScriptState, Value, Vm, VmOptions,
    WaitKind, World,
};
