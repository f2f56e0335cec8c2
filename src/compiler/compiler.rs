// questscript Bytecode Lowering
// Walks the AST and emits linear bytecode: structured control flow is
// lowered to conditional jumps, gotos and synthesized labels;
// assignments and array accesses desugar to implicit builtin calls.

use crate::ast::{self, AssignTarget, BinaryOp, Expr, Stmt, SwitchArm, UnaryOp};
use crate::builtins::BuiltinRegistry;
use crate::compiler::code::CodeBuffer;
use crate::compiler::opcode::OpCode;
use crate::compiler::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::error::{ErrorKind, ScriptError, ScriptResult, Span};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Compilation options, mostly host policy knobs
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// The whole script body must be wrapped in `{ ... }`
    pub require_braces: bool,
    /// An empty body compiles to an empty program instead of erroring
    pub allow_empty: bool,
    /// Populate the label-name -> offset table for host event dispatch
    pub export_labels: bool,
    /// Arity mismatches on builtins are hard errors instead of warnings
    pub strict_arity: bool,
    /// Labels still unresolved at end of compilation are hard errors
    /// instead of downgrading to plain global-variable names
    pub strict_labels: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            require_braces: false,
            allow_empty: true,
            export_labels: true,
            strict_arity: false,
            strict_labels: false,
        }
    }
}

/// Raw output of lowering one compilation unit
#[derive(Debug, Default)]
pub struct CompileOutput {
    pub code: Vec<u8>,
    pub lines: Vec<usize>,
    /// User labels defined in this unit (folded name -> offset)
    pub labels: FxHashMap<Arc<str>, u32>,
    /// User functions defined in this unit (folded name -> offset)
    pub functions: FxHashMap<Arc<str>, u32>,
    pub warnings: Vec<ScriptError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Loop,
    Switch,
}

/// One open loop/switch construct, targets for break/continue
struct ControlFrame {
    kind: FrameKind,
    break_label: SymbolId,
    continue_label: Option<SymbolId>,
}

pub struct Lowering<'a> {
    symbols: &'a mut SymbolTable,
    builtins: &'a BuiltinRegistry,
    options: &'a CompileOptions,
    file: String,
    code: CodeBuffer,
    frames: Vec<ControlFrame>,
    label_counter: u32,
    warnings: Vec<ScriptError>,
    labels: FxHashMap<Arc<str>, u32>,
    functions: FxHashMap<Arc<str>, u32>,
    declared_funcs: Vec<(SymbolId, Span)>,
    set_id: SymbolId,
    element_id: SymbolId,
}

impl<'a> Lowering<'a> {
    pub fn new(
        symbols: &'a mut SymbolTable,
        builtins: &'a BuiltinRegistry,
        options: &'a CompileOptions,
        file: impl Into<String>,
    ) -> Self {
        let set_id = symbols.intern("set");
        let element_id = symbols.intern("getelementofarray");
        Self {
            symbols,
            builtins,
            options,
            file: file.into(),
            code: CodeBuffer::new(),
            frames: Vec::new(),
            label_counter: 0,
            warnings: Vec::new(),
            labels: FxHashMap::default(),
            functions: FxHashMap::default(),
            declared_funcs: Vec::new(),
            set_id,
            element_id,
        }
    }

    pub fn run(mut self, program: &[Stmt]) -> ScriptResult<CompileOutput> {
        for stmt in program {
            self.lower_stmt(stmt)?;
        }
        self.code.emit_op(OpCode::End, self.last_line());
        self.finish()
    }

    fn finish(mut self) -> ScriptResult<CompileOutput> {
        // function declared but never given a body
        for (id, span) in &self.declared_funcs {
            if self.symbols.get(*id).kind == SymbolKind::UserFuncDecl {
                return Err(ScriptError::new(
                    ErrorKind::UndefinedFunction,
                    format!(
                        "Function '{}' was declared but never defined",
                        self.symbols.get(*id).name
                    ),
                    *span,
                    &self.file,
                ));
            }
        }

        // labels referenced but never placed
        let mut dangling = Vec::new();
        for (id, sym) in self.symbols.iter() {
            if sym.kind == SymbolKind::Label && !sym.backpatch.is_empty() {
                dangling.push(id);
            }
        }
        for id in dangling {
            let name = self.symbols.get(id).name.clone();
            if self.options.strict_labels {
                return Err(ScriptError::duplicate_label(
                    format!("Label '{}' is referenced but never defined", name),
                    Span::default(),
                    &self.file,
                ));
            }
            // compatibility fallback: the Name sites stay in place and
            // resolve at runtime like an ordinary unset global
            self.warnings.push(ScriptError::new(
                ErrorKind::NameError,
                format!(
                    "Label '{}' is never defined; treating references as a variable",
                    name
                ),
                Span::default(),
                &self.file,
            ));
            let sym = self.symbols.get_mut(id);
            sym.kind = SymbolKind::Nop;
            sym.backpatch.clear();
        }

        let labels = if self.options.export_labels {
            std::mem::take(&mut self.labels)
        } else {
            FxHashMap::default()
        };

        Ok(CompileOutput {
            code: self.code.code,
            lines: self.code.lines,
            labels,
            functions: self.functions,
            warnings: self.warnings,
        })
    }

    // ---- statements ----

    fn lower_stmt(&mut self, stmt: &Stmt) -> ScriptResult<()> {
        match stmt {
            Stmt::Empty(_) => Ok(()),
            Stmt::Expr(e) => {
                self.lower_expr(e)?;
                self.code.emit_op(OpCode::Eol, e.span().start.line);
                Ok(())
            }
            Stmt::Block(stmts, _) => {
                for s in stmts {
                    self.lower_stmt(s)?;
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then,
                otherwise,
                span,
            } => self.lower_if(cond, then, otherwise.as_deref(), *span),
            Stmt::While { cond, body, span } => self.lower_while(cond, body, *span),
            Stmt::DoWhile { body, cond, span } => self.lower_do_while(body, cond, *span),
            Stmt::For {
                init,
                cond,
                step,
                body,
                span,
            } => self.lower_for(init.as_ref(), cond.as_ref(), step.as_ref(), body, *span),
            Stmt::Switch { value, arms, span } => self.lower_switch(value, arms, *span),
            Stmt::Break(span) => self.lower_break(*span),
            Stmt::Continue(span) => self.lower_continue(*span),
            Stmt::Label { id, span } => self.lower_label(*id, *span),
            Stmt::Goto { id, span } => {
                self.code.emit_op(OpCode::Goto, span.start.line);
                self.code
                    .emit_label_ref(&mut *self.symbols, *id, span.start.line);
                Ok(())
            }
            Stmt::Return { value, span } => {
                let line = span.start.line;
                match value {
                    Some(e) => self.lower_expr(e)?,
                    None => self.code.emit_int(0, line),
                }
                self.code.emit_op(OpCode::Return, line);
                Ok(())
            }
            Stmt::FuncDecl { id, span } => {
                self.declared_funcs.push((*id, *span));
                Ok(())
            }
            Stmt::FuncDef { id, body, span } => self.lower_func_def(*id, body, *span),
        }
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then: &Stmt,
        otherwise: Option<&Stmt>,
        span: Span,
    ) -> ScriptResult<()> {
        let line = span.start.line;
        let end = self.new_label("IF_END");

        self.lower_expr(cond)?;
        match otherwise {
            None => {
                self.code.emit_op(OpCode::JumpZero, line);
                self.code.emit_label_ref(&mut *self.symbols, end, line);
                self.lower_stmt(then)?;
            }
            Some(else_branch) => {
                let els = self.new_label("IF_ELSE");
                self.code.emit_op(OpCode::JumpZero, line);
                self.code.emit_label_ref(&mut *self.symbols, els, line);
                self.lower_stmt(then)?;
                self.code.emit_op(OpCode::Goto, line);
                self.code.emit_label_ref(&mut *self.symbols, end, line);
                self.place_label(els);
                self.lower_stmt(else_branch)?;
            }
        }
        self.place_label(end);
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &Stmt, span: Span) -> ScriptResult<()> {
        let line = span.start.line;
        let next = self.new_label("LP_NEXT");
        let end = self.new_label("LP_END");

        self.place_label(next);
        self.lower_expr(cond)?;
        self.code.emit_op(OpCode::JumpZero, line);
        self.code.emit_label_ref(&mut *self.symbols, end, line);

        self.frames.push(ControlFrame {
            kind: FrameKind::Loop,
            break_label: end,
            continue_label: Some(next),
        });
        let body_result = self.lower_stmt(body);
        self.frames.pop();
        body_result?;

        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, next, line);
        self.place_label(end);
        Ok(())
    }

    fn lower_do_while(&mut self, body: &Stmt, cond: &Expr, span: Span) -> ScriptResult<()> {
        let line = span.start.line;
        let begin = self.new_label("DO_BEGIN");
        let end = self.new_label("DO_END");
        // the continue target sits in front of the condition test and is
        // only materialized when the body actually uses continue
        let cont = if ast::uses_continue(body) {
            Some(self.new_label("DO_NEXT"))
        } else {
            None
        };

        self.place_label(begin);
        self.frames.push(ControlFrame {
            kind: FrameKind::Loop,
            break_label: end,
            continue_label: cont,
        });
        let body_result = self.lower_stmt(body);
        self.frames.pop();
        body_result?;

        if let Some(c) = cont {
            self.place_label(c);
        }
        self.lower_expr(cond)?;
        self.code.emit_op(OpCode::JumpZero, line);
        self.code.emit_label_ref(&mut *self.symbols, end, line);
        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, begin, line);
        self.place_label(end);
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&Expr>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
        span: Span,
    ) -> ScriptResult<()> {
        let line = span.start.line;
        let test = self.new_label("FOR_TEST");
        let next = self.new_label("FOR_NEXT");
        let begin = self.new_label("FOR_BEGIN");
        let end = self.new_label("FOR_END");

        if let Some(e) = init {
            self.lower_expr(e)?;
            self.code.emit_op(OpCode::Pop, line);
        }
        self.place_label(test);
        if let Some(e) = cond {
            self.lower_expr(e)?;
            self.code.emit_op(OpCode::JumpZero, line);
            self.code.emit_label_ref(&mut *self.symbols, end, line);
        }
        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, begin, line);

        self.place_label(next);
        if let Some(e) = step {
            self.lower_expr(e)?;
            self.code.emit_op(OpCode::Pop, line);
        }
        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, test, line);

        self.place_label(begin);
        self.frames.push(ControlFrame {
            kind: FrameKind::Loop,
            break_label: end,
            continue_label: Some(next),
        });
        let body_result = self.lower_stmt(body);
        self.frames.pop();
        body_result?;

        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, next, line);
        self.place_label(end);
        Ok(())
    }

    fn lower_switch(&mut self, value: &Expr, arms: &[SwitchArm], span: Span) -> ScriptResult<()> {
        let line = span.start.line;
        let hidden = {
            let name = format!("'!sw{}", self.label_counter);
            self.label_counter += 1;
            self.symbols.intern(&name)
        };
        let end = self.new_label("SW_END");

        // hidden = value
        self.code.emit_name(self.set_id, line);
        self.code.emit_op(OpCode::Arg, line);
        self.code.emit_name(hidden, line);
        self.lower_expr(value)?;
        self.code.emit_op(OpCode::Func, line);
        self.code.emit_op(OpCode::Pop, line);

        // per-arm labels; case arms additionally get a test label
        let body_labels: Vec<SymbolId> = arms.iter().map(|_| self.new_label("SW_BODY")).collect();
        let test_labels: Vec<Option<SymbolId>> = arms
            .iter()
            .map(|a| a.constant.as_ref().map(|_| self.new_label("SW_TEST")))
            .collect();
        let default_body: Option<SymbolId> = arms
            .iter()
            .zip(&body_labels)
            .find(|(a, _)| a.constant.is_none())
            .map(|(_, &l)| l);

        // entry: jump to the first case test; with no cases at all, fall
        // straight to default (or past the switch)
        let entry = test_labels
            .iter()
            .flatten()
            .next()
            .copied()
            .or(default_body)
            .unwrap_or(end);
        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, entry, line);

        let mut seen = FxHashSet::default();
        let mut default_seen = false;
        self.frames.push(ControlFrame {
            kind: FrameKind::Switch,
            break_label: end,
            continue_label: None,
        });

        let mut arms_result = Ok(());
        'arms: for (i, arm) in arms.iter().enumerate() {
            let arm_line = arm.span.start.line;
            match &arm.constant {
                Some(kexpr) => {
                    let k = match self.const_eval(kexpr) {
                        Ok(k) => k,
                        Err(e) => {
                            arms_result = Err(e);
                            break 'arms;
                        }
                    };
                    if !seen.insert(k) {
                        arms_result = Err(ScriptError::duplicate_label(
                            format!("Duplicate case value {}", k),
                            arm.span,
                            &self.file,
                        ));
                        break 'arms;
                    }

                    // a body finishing just above falls through the test
                    self.code.emit_op(OpCode::Goto, arm_line);
                    self.code
                        .emit_label_ref(&mut *self.symbols, body_labels[i], arm_line);

                    self.place_label(test_labels[i].unwrap());
                    let fail = test_labels[i + 1..]
                        .iter()
                        .flatten()
                        .next()
                        .copied()
                        .or(default_body)
                        .unwrap_or(end);
                    self.code.emit_name(hidden, arm_line);
                    self.code.emit_int(k, arm_line);
                    self.code.emit_op(OpCode::Eq, arm_line);
                    self.code.emit_op(OpCode::JumpZero, arm_line);
                    self.code.emit_label_ref(&mut *self.symbols, fail, arm_line);
                    self.place_label(body_labels[i]);
                }
                None => {
                    if default_seen {
                        arms_result = Err(ScriptError::duplicate_label(
                            "Multiple 'default' arms in one switch",
                            arm.span,
                            &self.file,
                        ));
                        break 'arms;
                    }
                    default_seen = true;
                    self.place_label(body_labels[i]);
                }
            }

            for s in &arm.body {
                if let Err(e) = self.lower_stmt(s) {
                    arms_result = Err(e);
                    break 'arms;
                }
            }
        }
        self.frames.pop();
        arms_result?;

        self.place_label(end);
        // clear the hidden dispatch variable so it cannot leak
        self.code.emit_name(self.set_id, line);
        self.code.emit_op(OpCode::Arg, line);
        self.code.emit_name(hidden, line);
        self.code.emit_int(0, line);
        self.code.emit_op(OpCode::Func, line);
        self.code.emit_op(OpCode::Pop, line);
        Ok(())
    }

    fn lower_break(&mut self, span: Span) -> ScriptResult<()> {
        let target = self.frames.last().map(|f| f.break_label).ok_or_else(|| {
            ScriptError::nesting_error("'break' outside of a loop or switch", span, &self.file)
        })?;
        self.code.emit_op(OpCode::Goto, span.start.line);
        self.code
            .emit_label_ref(&mut *self.symbols, target, span.start.line);
        Ok(())
    }

    fn lower_continue(&mut self, span: Span) -> ScriptResult<()> {
        // switch frames pass continue through to the enclosing loop
        let target = self
            .frames
            .iter()
            .rev()
            .find_map(|f| f.continue_label)
            .ok_or_else(|| {
                ScriptError::nesting_error("'continue' outside of a loop", span, &self.file)
            })?;
        self.code.emit_op(OpCode::Goto, span.start.line);
        self.code
            .emit_label_ref(&mut *self.symbols, target, span.start.line);
        Ok(())
    }

    fn lower_label(&mut self, id: SymbolId, span: Span) -> ScriptResult<()> {
        let sym = self.symbols.get(id);
        match sym.kind {
            SymbolKind::Pos => {
                return Err(ScriptError::duplicate_label(
                    format!("Label '{}' is defined twice", sym.name),
                    span,
                    &self.file,
                ))
            }
            SymbolKind::Nop | SymbolKind::Label => {}
            other => {
                return Err(ScriptError::duplicate_label(
                    format!("'{}' already denotes {:?}, cannot be a label", sym.name, other),
                    span,
                    &self.file,
                ))
            }
        }
        self.place_label(id);
        let sym = self.symbols.get(id);
        self.labels
            .insert(sym.folded.clone(), sym.pos.unwrap_or_default());
        Ok(())
    }

    fn lower_func_def(&mut self, id: SymbolId, body: &[Stmt], span: Span) -> ScriptResult<()> {
        let line = span.start.line;
        let folded = self.symbols.get(id).folded.clone();
        if self.functions.contains_key(&folded) {
            return Err(ScriptError::duplicate_label(
                format!("Function '{}' is defined twice", self.symbols.get(id).name),
                span,
                &self.file,
            ));
        }

        let skip = self.new_label("FN_SKIP");
        self.code.emit_op(OpCode::Goto, line);
        self.code.emit_label_ref(&mut *self.symbols, skip, line);

        let entry = self.code.len() as u32;
        {
            let sym = self.symbols.get_mut(id);
            sym.kind = SymbolKind::UserFunc;
            sym.pos = Some(entry);
        }
        self.functions.insert(folded, entry);

        // loops outside the function are not visible to its body
        let saved_frames = std::mem::take(&mut self.frames);
        let mut body_result = Ok(());
        for s in body {
            if let Err(e) = self.lower_stmt(s) {
                body_result = Err(e);
                break;
            }
        }
        self.frames = saved_frames;
        body_result?;

        // implicit return when control falls off the end
        self.code.emit_int(0, line);
        self.code.emit_op(OpCode::Return, line);
        self.place_label(skip);
        Ok(())
    }

    // ---- expressions ----

    fn lower_expr(&mut self, expr: &Expr) -> ScriptResult<()> {
        match expr {
            Expr::Int(v, span) => {
                self.code.emit_int(*v, span.start.line);
                Ok(())
            }
            Expr::Str(s, span) => {
                self.code.emit_str(s, span.start.line);
                Ok(())
            }
            Expr::Var { id, span } => {
                if self.symbols.get(*id).deprecated {
                    let name = self.symbols.get(*id).name.clone();
                    self.warnings.push(
                        ScriptError::new(
                            ErrorKind::NameError,
                            format!("'{}' is deprecated", name),
                            *span,
                            &self.file,
                        )
                        .with_help("Use the replacement constant instead"),
                    );
                }
                self.code.emit_name(*id, span.start.line);
                Ok(())
            }
            Expr::Index { id, index, span } => self.lower_element_ref(*id, index, *span),
            Expr::Unary { op, operand, span } => {
                self.lower_expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::LogicalNot => OpCode::LNot,
                    UnaryOp::BitNot => OpCode::Not,
                };
                self.code.emit_op(opcode, span.start.line);
                Ok(())
            }
            Expr::Binary { op, lhs, rhs, span } => {
                self.lower_expr(lhs)?;
                self.lower_expr(rhs)?;
                self.code.emit_op(binary_opcode(*op), span.start.line);
                Ok(())
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
                span,
            } => {
                let line = span.start.line;
                let els = self.new_label("TERN_ELSE");
                let end = self.new_label("TERN_END");
                self.lower_expr(cond)?;
                self.code.emit_op(OpCode::JumpZero, line);
                self.code.emit_label_ref(&mut *self.symbols, els, line);
                self.lower_expr(then)?;
                self.code.emit_op(OpCode::Goto, line);
                self.code.emit_label_ref(&mut *self.symbols, end, line);
                self.place_label(els);
                self.lower_expr(otherwise)?;
                self.place_label(end);
                Ok(())
            }
            Expr::Call { callee, args, span } => self.lower_call(*callee, args, *span),
            Expr::Assign {
                target,
                op,
                value,
                span,
            } => self.lower_assign(target, *op, value, *span),
            Expr::IncDec {
                target,
                increment,
                prefix,
                span,
            } => self.lower_inc_dec(target, *increment, *prefix, *span),
        }
    }

    /// `Name(getelementofarray) Arg Name(var) <index> Func` - pushes a
    /// reference slot with the index applied
    fn lower_element_ref(&mut self, id: SymbolId, index: &Expr, span: Span) -> ScriptResult<()> {
        let line = span.start.line;
        self.code.emit_name(self.element_id, line);
        self.code.emit_op(OpCode::Arg, line);
        self.code.emit_name(id, line);
        self.lower_expr(index)?;
        self.code.emit_op(OpCode::Func, line);
        Ok(())
    }

    fn lower_call(&mut self, callee: SymbolId, args: &[Expr], span: Span) -> ScriptResult<()> {
        let line = span.start.line;
        let (kind, name, registry_index) = {
            let sym = self.symbols.get(callee);
            (sym.kind, sym.name.clone(), sym.value)
        };
        match kind {
            SymbolKind::BuiltinFunc => {
                let signature = self.builtins.signature(registry_index as usize);
                self.check_arity(&name, signature, args.len(), span)?;
            }
            SymbolKind::UserFunc | SymbolKind::UserFuncDecl => {}
            _ => {
                return Err(ScriptError::new(
                    ErrorKind::UndefinedFunction,
                    format!("'{}' is not a known function", name),
                    span,
                    &self.file,
                ))
            }
        }

        self.code.emit_name(callee, line);
        self.code.emit_op(OpCode::Arg, line);
        for arg in args {
            self.lower_expr(arg)?;
        }
        self.code.emit_op(OpCode::Func, line);
        Ok(())
    }

    /// Lower `target = value` (or `target op= value`) as a call to the
    /// `set` builtin; the call's result is the stored value.
    fn lower_assign(
        &mut self,
        target: &AssignTarget,
        op: Option<BinaryOp>,
        value: &Expr,
        span: Span,
    ) -> ScriptResult<()> {
        let line = span.start.line;
        self.code.emit_name(self.set_id, line);
        self.code.emit_op(OpCode::Arg, line);
        self.lower_target_ref(target)?;
        match op {
            None => self.lower_expr(value)?,
            Some(op) => {
                self.lower_target_ref(target)?;
                self.lower_expr(value)?;
                self.code.emit_op(binary_opcode(op), line);
            }
        }
        self.code.emit_op(OpCode::Func, line);
        Ok(())
    }

    fn lower_inc_dec(
        &mut self,
        target: &AssignTarget,
        increment: bool,
        prefix: bool,
        span: Span,
    ) -> ScriptResult<()> {
        let line = span.start.line;
        if !prefix {
            // postfix yields the previous value: read it eagerly before
            // the write-back, then drop the write-back's result
            self.lower_target_ref(target)?;
            self.code.emit_op(OpCode::Deref, line);
        }

        self.code.emit_name(self.set_id, line);
        self.code.emit_op(OpCode::Arg, line);
        self.lower_target_ref(target)?;
        self.lower_target_ref(target)?;
        self.code.emit_int(1, line);
        self.code.emit_op(
            if increment { OpCode::Add } else { OpCode::Sub },
            line,
        );
        self.code.emit_op(OpCode::Func, line);

        if !prefix {
            self.code.emit_op(OpCode::Pop, line);
        }
        Ok(())
    }

    fn lower_target_ref(&mut self, target: &AssignTarget) -> ScriptResult<()> {
        match &target.index {
            None => {
                self.code.emit_name(target.id, target.span.start.line);
                Ok(())
            }
            Some(index) => self.lower_element_ref(target.id, index, target.span),
        }
    }

    // ---- helpers ----

    fn const_eval(&self, expr: &Expr) -> ScriptResult<i32> {
        match expr {
            Expr::Int(v, _) => Ok(*v),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
                ..
            } => Ok(self.const_eval(operand)?.wrapping_neg()),
            Expr::Var { id, span } => {
                let sym = self.symbols.get(*id);
                if sym.kind == SymbolKind::Int {
                    Ok(sym.value)
                } else {
                    Err(ScriptError::syntax_error(
                        format!("'{}' is not a constant", sym.name),
                        *span,
                        &self.file,
                    ))
                }
            }
            other => Err(ScriptError::syntax_error(
                "Case value must be a constant integer",
                other.span(),
                &self.file,
            )),
        }
    }

    fn check_arity(
        &mut self,
        name: &str,
        signature: &str,
        argc: usize,
        span: Span,
    ) -> ScriptResult<()> {
        let mut min = 0usize;
        let mut max = Some(0usize);
        let mut optional = false;
        for c in signature.chars() {
            match c {
                '?' => optional = true,
                '*' => max = None,
                _ => {
                    if !optional {
                        min += 1;
                    }
                    if let Some(m) = max.as_mut() {
                        *m += 1;
                    }
                }
            }
        }

        let problem = if argc < min {
            Some(format!(
                "'{}' needs at least {} argument(s), got {}",
                name, min, argc
            ))
        } else if max.map_or(false, |m| argc > m) {
            Some(format!(
                "'{}' takes at most {} argument(s), got {}",
                name,
                max.unwrap(),
                argc
            ))
        } else {
            None
        };

        if let Some(message) = problem {
            let err = ScriptError::arity_error(message, span, &self.file)
                .with_help(format!("Signature: {}({})", name, signature));
            if self.options.strict_arity {
                return Err(err);
            }
            self.warnings.push(err);
        }
        Ok(())
    }

    fn new_label(&mut self, tag: &str) -> SymbolId {
        // '!' cannot start a scanned word, so these never collide with
        // user labels
        let name = format!("!L{}_{}", self.label_counter, tag);
        self.label_counter += 1;
        self.symbols.intern(&name)
    }

    fn place_label(&mut self, id: SymbolId) {
        self.code.define_label(&mut *self.symbols, id);
    }

    fn last_line(&self) -> usize {
        self.code.lines.last().copied().unwrap_or(1).max(1)
    }
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::Ne => OpCode::Ne,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::Ge => OpCode::Ge,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Le => OpCode::Le,
        BinaryOp::BitAnd => OpCode::And,
        BinaryOp::BitOr => OpCode::Or,
        BinaryOp::BitXor => OpCode::Xor,
        BinaryOp::LogicalAnd => OpCode::LAnd,
        BinaryOp::LogicalOr => OpCode::LOr,
        BinaryOp::Shl => OpCode::Shl,
        BinaryOp::Shr => OpCode::Shr,
    }
}
