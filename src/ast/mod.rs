// questscript AST Definitions
// Tagged-variant IR produced by the parser and consumed by the bytecode
// lowering pass.

use crate::compiler::symbols::SymbolId;
use crate::error::Span;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    LogicalNot,
    BitNot,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    Shl,
    Shr,
}

/// Assignable left-hand side: a variable, optionally indexed
#[derive(Debug, Clone)]
pub struct AssignTarget {
    pub id: SymbolId,
    pub index: Option<Box<Expr>>,
    pub span: Span,
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    Int(i32, Span),
    Str(String, Span),
    Var {
        id: SymbolId,
        span: Span,
    },
    Index {
        id: SymbolId,
        index: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
        span: Span,
    },
    Call {
        callee: SymbolId,
        args: Vec<Expr>,
        span: Span,
    },
    /// `x = e`, or `x op= e` when `op` is present
    Assign {
        target: AssignTarget,
        op: Option<BinaryOp>,
        value: Box<Expr>,
        span: Span,
    },
    /// `++x`, `--x`, `x++`, `x--`
    IncDec {
        target: AssignTarget,
        increment: bool,
        prefix: bool,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, s) | Expr::Str(_, s) => *s,
            Expr::Var { span, .. }
            | Expr::Index { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Ternary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Assign { span, .. }
            | Expr::IncDec { span, .. } => *span,
        }
    }
}

/// One `case K:` or `default:` arm of a switch
#[derive(Debug, Clone)]
pub struct SwitchArm {
    /// None for `default:`
    pub constant: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Statement nodes
#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Block(Vec<Stmt>, Span),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
        span: Span,
    },
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    Switch {
        value: Expr,
        arms: Vec<SwitchArm>,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Label {
        id: SymbolId,
        span: Span,
    },
    Goto {
        id: SymbolId,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    /// `function NAME;`
    FuncDecl {
        id: SymbolId,
        span: Span,
    },
    /// `function NAME { ... }`
    FuncDef {
        id: SymbolId,
        body: Vec<Stmt>,
        span: Span,
    },
    Empty(Span),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(e) => e.span(),
            Stmt::Block(_, s)
            | Stmt::Break(s)
            | Stmt::Continue(s)
            | Stmt::Empty(s) => *s,
            Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::DoWhile { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::Label { span, .. }
            | Stmt::Goto { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::FuncDecl { span, .. }
            | Stmt::FuncDef { span, .. } => *span,
        }
    }
}

/// True if a `continue` in `stmt` would bind to the construct that
/// directly contains it. Does not descend into nested loops (their
/// `continue` binds to them) or function bodies.
pub fn uses_continue(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Continue(_) => true,
        Stmt::Block(stmts, _) => stmts.iter().any(uses_continue),
        Stmt::If {
            then, otherwise, ..
        } => uses_continue(then) || otherwise.as_deref().map_or(false, uses_continue),
        // break binds to the switch, continue passes through it
        Stmt::Switch { arms, .. } => arms.iter().any(|a| a.body.iter().any(uses_continue)),
        _ => false,
    }
}
