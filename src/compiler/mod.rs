// questscript Compiler Module
// source text -> tokens -> AST -> linear bytecode

pub mod code;
pub mod compiler;
pub mod opcode;
pub mod symbols;

pub use code::CodeBuffer;
pub use compiler::{CompileOptions, CompileOutput, Lowering};
pub use opcode::{Instr, OpCode};
pub use symbols::{Symbol, SymbolId, SymbolKind, SymbolTable, VarScope};

use crate::builtins::BuiltinRegistry;
use crate::error::ScriptResult;
use crate::lexer::Scanner;
use crate::parser::Parser;

/// Compile one unit against a shared symbol table. Label state from
/// previous units is cleared first; constants, parameters, builtins and
/// user-function bindings persist.
pub fn compile_unit(
    source: &str,
    name: &str,
    symbols: &mut SymbolTable,
    builtins: &BuiltinRegistry,
    options: &CompileOptions,
) -> ScriptResult<CompileOutput> {
    reset_labels(symbols);

    let mut scanner = Scanner::new(source, name);
    let tokens = scanner.scan_tokens()?;
    let scan_warnings = scanner.take_warnings();

    let program = Parser::new(tokens, name, symbols).parse(options.require_braces)?;

    if !options.allow_empty && program.iter().all(|s| matches!(s, crate::ast::Stmt::Empty(_))) {
        return Err(crate::error::ScriptError::syntax_error(
            "Script body is empty",
            crate::error::Span::default(),
            name,
        ));
    }

    let mut output = Lowering::new(symbols, builtins, options, name).run(&program)?;
    let mut warnings = scan_warnings;
    warnings.append(&mut output.warnings);
    output.warnings = warnings;
    Ok(output)
}

/// Labels are per-unit: resolved (`Pos`) and pending (`Label`) symbols
/// revert to plain names before the next unit compiles.
fn reset_labels(symbols: &mut SymbolTable) {
    let label_ids: Vec<SymbolId> = symbols
        .iter()
        .filter(|(_, s)| matches!(s.kind, SymbolKind::Pos | SymbolKind::Label))
        .map(|(id, _)| id)
        .collect();
    for id in label_ids {
        let sym = symbols.get_mut(id);
        sym.kind = SymbolKind::Nop;
        sym.pos = None;
        sym.backpatch.clear();
    }
}
