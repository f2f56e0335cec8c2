// questscript Parser
// Recursive-descent parser producing the AST consumed by the bytecode
// lowering pass. Scope sigils are resolved into the symbol table here,
// once, never re-derived from the text afterwards.

use crate::ast::{AssignTarget, BinaryOp, Expr, Stmt, SwitchArm, UnaryOp};
use crate::compiler::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::error::{ScriptError, ScriptResult, Span};
use crate::lexer::token::{Token, TokenKind};

/// Bound on open constructs / expression recursion
pub const MAX_NESTING: usize = 256;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    symbols: &'a mut SymbolTable,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, symbols: &'a mut SymbolTable) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            symbols,
            depth: 0,
        }
    }

    /// Parse a whole compilation unit
    pub fn parse(&mut self, require_braces: bool) -> ScriptResult<Vec<Stmt>> {
        let mut statements = Vec::new();

        if require_braces {
            self.consume_kind(&TokenKind::LeftBrace, "Expected '{' to open the script body")?;
            while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
                statements.push(self.parse_statement()?);
            }
            self.consume_kind(&TokenKind::RightBrace, "Expected '}' to close the script body")?;
            if !self.is_at_end() {
                let tok = self.peek().clone();
                return Err(self.error_at(&tok, "Unexpected code after the closing '}'"));
            }
        } else {
            while !self.is_at_end() {
                statements.push(self.parse_statement()?);
            }
        }

        Ok(statements)
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> ScriptResult<Stmt> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            let tok = self.peek().clone();
            return Err(ScriptError::nesting_error(
                format!("Blocks nested deeper than {}", MAX_NESTING),
                tok.span,
                &self.file,
            ));
        }
        let result = self.parse_statement_inner();
        self.depth -= 1;
        result
    }

    fn parse_statement_inner(&mut self) -> ScriptResult<Stmt> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty(tok.span))
            }
            TokenKind::LeftBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Function => self.parse_function(),
            TokenKind::Break => {
                self.advance();
                self.consume_kind(&TokenKind::Semicolon, "Expected ';' after 'break'")?;
                Ok(Stmt::Break(tok.span))
            }
            TokenKind::Continue => {
                self.advance();
                self.consume_kind(&TokenKind::Semicolon, "Expected ';' after 'continue'")?;
                Ok(Stmt::Continue(tok.span))
            }
            TokenKind::Goto => {
                self.advance();
                let (name, span) = self.expect_bare_word("Expected a label name after 'goto'")?;
                let id = self.symbols.intern(&name);
                self.consume_kind(&TokenKind::Semicolon, "Expected ';' after goto target")?;
                Ok(Stmt::Goto { id, span })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_kind(&TokenKind::Semicolon, "Expected ';' after return value")?;
                Ok(Stmt::Return {
                    value,
                    span: tok.span,
                })
            }
            TokenKind::Case | TokenKind::Default => Err(self.error_at(
                &tok,
                "'case'/'default' only make sense inside a switch block",
            )),
            TokenKind::Ident(name) => {
                // `word:` is a plain jump target
                if self.peek_next_is(&TokenKind::Colon) && is_bare_word(name) {
                    let name = name.clone();
                    self.advance();
                    self.advance();
                    let id = self.symbols.intern(&name);
                    return Ok(Stmt::Label { id, span: tok.span });
                }

                // bare builtin / user-function call without parentheses
                if is_bare_word(name) && !self.peek_next_is(&TokenKind::LeftParen) {
                    if let Some(id) = self.symbols.lookup(name) {
                        if is_callable(self.symbols.get(id).kind) {
                            return self.parse_bare_call(id, tok.span);
                        }
                    }
                }

                self.parse_expr_statement()
            }
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_block(&mut self) -> ScriptResult<Stmt> {
        let open = self.advance().clone();
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        self.consume_kind(&TokenKind::RightBrace, "Expected '}' to close the block")?;
        Ok(Stmt::Block(statements, open.span))
    }

    fn parse_if(&mut self) -> ScriptResult<Stmt> {
        let kw = self.advance().clone();
        self.consume_kind(&TokenKind::LeftParen, "Expected '(' after 'if'")?;
        let cond = self.parse_expression()?;
        self.consume_kind(&TokenKind::RightParen, "Expected ')' after if condition")?;
        let then = Box::new(self.parse_statement()?);
        let otherwise = if self.match_kind(&TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
            span: kw.span,
        })
    }

    fn parse_while(&mut self) -> ScriptResult<Stmt> {
        let kw = self.advance().clone();
        self.consume_kind(&TokenKind::LeftParen, "Expected '(' after 'while'")?;
        let cond = self.parse_expression()?;
        self.consume_kind(&TokenKind::RightParen, "Expected ')' after while condition")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While {
            cond,
            body,
            span: kw.span,
        })
    }

    fn parse_do_while(&mut self) -> ScriptResult<Stmt> {
        let kw = self.advance().clone();
        let body = Box::new(self.parse_statement()?);
        self.consume_kind(&TokenKind::While, "Expected 'while' after do body")?;
        self.consume_kind(&TokenKind::LeftParen, "Expected '(' after 'while'")?;
        let cond = self.parse_expression()?;
        self.consume_kind(&TokenKind::RightParen, "Expected ')' after do-while condition")?;
        self.consume_kind(&TokenKind::Semicolon, "Expected ';' after do-while")?;
        Ok(Stmt::DoWhile {
            body,
            cond,
            span: kw.span,
        })
    }

    fn parse_for(&mut self) -> ScriptResult<Stmt> {
        let kw = self.advance().clone();
        self.consume_kind(&TokenKind::LeftParen, "Expected '(' after 'for'")?;

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr_or_assign()?)
        };
        self.consume_kind(&TokenKind::Semicolon, "Expected ';' after for initializer")?;

        let cond = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_kind(&TokenKind::Semicolon, "Expected ';' after for condition")?;

        let step = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expr_or_assign()?)
        };
        self.consume_kind(&TokenKind::RightParen, "Expected ')' after for clauses")?;

        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            span: kw.span,
        })
    }

    fn parse_switch(&mut self) -> ScriptResult<Stmt> {
        let kw = self.advance().clone();
        self.consume_kind(&TokenKind::LeftParen, "Expected '(' after 'switch'")?;
        let value = self.parse_expression()?;
        self.consume_kind(&TokenKind::RightParen, "Expected ')' after switch value")?;
        self.consume_kind(&TokenKind::LeftBrace, "Expected '{' to open the switch body")?;

        let mut arms: Vec<SwitchArm> = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::Case => {
                    self.advance();
                    let constant = self.parse_expression()?;
                    self.consume_kind(&TokenKind::Colon, "Expected ':' after case value")?;
                    arms.push(SwitchArm {
                        constant: Some(constant),
                        body: Vec::new(),
                        span: tok.span,
                    });
                }
                TokenKind::Default => {
                    self.advance();
                    self.consume_kind(&TokenKind::Colon, "Expected ':' after 'default'")?;
                    arms.push(SwitchArm {
                        constant: None,
                        body: Vec::new(),
                        span: tok.span,
                    });
                }
                _ => {
                    let stmt = self.parse_statement()?;
                    match arms.last_mut() {
                        Some(arm) => arm.body.push(stmt),
                        None => {
                            return Err(ScriptError::nesting_error(
                                "Statement before the first 'case' in a switch",
                                tok.span,
                                &self.file,
                            ))
                        }
                    }
                }
            }
        }
        self.consume_kind(&TokenKind::RightBrace, "Expected '}' to close the switch body")?;
        Ok(Stmt::Switch {
            value,
            arms,
            span: kw.span,
        })
    }

    fn parse_function(&mut self) -> ScriptResult<Stmt> {
        let kw = self.advance().clone();
        let (name, span) = self.expect_bare_word("Expected a function name after 'function'")?;
        let id = self.symbols.intern(&name);
        match self.symbols.get(id).kind {
            SymbolKind::Nop => self.symbols.get_mut(id).kind = SymbolKind::UserFuncDecl,
            SymbolKind::UserFuncDecl | SymbolKind::UserFunc => {}
            other => {
                return Err(ScriptError::duplicate_label(
                    format!("'{}' already denotes {:?}, cannot be a function", name, other),
                    span,
                    &self.file,
                ))
            }
        }

        if self.match_kind(&TokenKind::Semicolon) {
            return Ok(Stmt::FuncDecl { id, span: kw.span });
        }

        self.consume_kind(&TokenKind::LeftBrace, "Expected ';' or '{' after function name")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        self.consume_kind(&TokenKind::RightBrace, "Expected '}' to close the function body")?;
        Ok(Stmt::FuncDef {
            id,
            body,
            span: kw.span,
        })
    }

    /// `name arg, arg, ...;` - no-parentheses call form
    fn parse_bare_call(&mut self, callee: SymbolId, span: Span) -> ScriptResult<Stmt> {
        self.advance();
        let mut args = Vec::new();
        if !self.check(&TokenKind::Semicolon) {
            loop {
                args.push(self.parse_expression()?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume_kind(&TokenKind::Semicolon, "Expected ';' after call arguments")?;
        Ok(Stmt::Expr(Expr::Call { callee, args, span }))
    }

    fn parse_expr_statement(&mut self) -> ScriptResult<Stmt> {
        let expr = self.parse_expr_or_assign()?;
        self.consume_kind(&TokenKind::Semicolon, "Expected ';' after expression")?;
        Ok(Stmt::Expr(expr))
    }

    // ---- expressions ----

    /// An expression, or an assignment when the parsed expression turns
    /// out to be an lvalue followed by an assignment operator.
    fn parse_expr_or_assign(&mut self) -> ScriptResult<Expr> {
        let expr = self.parse_expression()?;

        let op_tok = self.peek().clone();
        let compound = match op_tok.kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Mod),
            TokenKind::AmpEqual => Some(BinaryOp::BitAnd),
            TokenKind::PipeEqual => Some(BinaryOp::BitOr),
            TokenKind::CaretEqual | TokenKind::TildeEqual => Some(BinaryOp::BitXor),
            TokenKind::ShlEqual => Some(BinaryOp::Shl),
            TokenKind::ShrEqual => Some(BinaryOp::Shr),
            _ => return Ok(expr),
        };
        self.advance();

        let target = self.as_assign_target(expr, &op_tok)?;
        let value = Box::new(self.parse_expr_or_assign()?);
        Ok(Expr::Assign {
            target,
            op: compound,
            value,
            span: op_tok.span,
        })
    }

    fn as_assign_target(&self, expr: Expr, at: &Token) -> ScriptResult<AssignTarget> {
        match expr {
            Expr::Var { id, span } => Ok(AssignTarget {
                id,
                index: None,
                span,
            }),
            Expr::Index { id, index, span } => Ok(AssignTarget {
                id,
                index: Some(index),
                span,
            }),
            _ => Err(self.error_at(at, "Invalid assignment target")),
        }
    }

    fn parse_expression(&mut self) -> ScriptResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            let tok = self.peek().clone();
            return Err(ScriptError::nesting_error(
                format!("Expressions nested deeper than {}", MAX_NESTING),
                tok.span,
                &self.file,
            ));
        }
        let result = self.parse_ternary();
        self.depth -= 1;
        result
    }

    fn parse_ternary(&mut self) -> ScriptResult<Expr> {
        let cond = self.parse_logical_or()?;
        if self.check(&TokenKind::Question) {
            let q = self.advance().clone();
            let then = self.parse_expression()?;
            self.consume_kind(&TokenKind::Colon, "Expected ':' in ternary expression")?;
            let otherwise = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
                span: q.span,
            });
        }
        Ok(cond)
    }

    fn parse_logical_or(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_logical_and()?;
        while self.check(&TokenKind::OrOr) {
            let op_tok = self.advance().clone();
            let rhs = self.parse_logical_and()?;
            expr = binary(BinaryOp::LogicalOr, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_bit_or()?;
        while self.check(&TokenKind::AndAnd) {
            let op_tok = self.advance().clone();
            let rhs = self.parse_bit_or()?;
            expr = binary(BinaryOp::LogicalAnd, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_bit_or(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_bit_xor()?;
        while self.check(&TokenKind::Pipe) {
            let op_tok = self.advance().clone();
            let rhs = self.parse_bit_xor()?;
            expr = binary(BinaryOp::BitOr, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_bit_xor(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_bit_and()?;
        // binary `~` is an exclusive-or alias
        while self.check(&TokenKind::Caret) || self.check(&TokenKind::Tilde) {
            let op_tok = self.advance().clone();
            let rhs = self.parse_bit_and()?;
            expr = binary(BinaryOp::BitXor, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_bit_and(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_equality()?;
        while self.check(&TokenKind::Ampersand) {
            let op_tok = self.advance().clone();
            let rhs = self.parse_equality()?;
            expr = binary(BinaryOp::BitAnd, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::Ne,
                _ => break,
            };
            let op_tok = self.advance().clone();
            let rhs = self.parse_comparison()?;
            expr = binary(op, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_shift()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                _ => break,
            };
            let op_tok = self.advance().clone();
            let rhs = self.parse_shift()?;
            expr = binary(op, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_shift(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::ShiftLeft => BinaryOp::Shl,
                TokenKind::ShiftRight => BinaryOp::Shr,
                _ => break,
            };
            let op_tok = self.advance().clone();
            let rhs = self.parse_term()?;
            expr = binary(op, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let op_tok = self.advance().clone();
            let rhs = self.parse_factor()?;
            expr = binary(op, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let op_tok = self.advance().clone();
            let rhs = self.parse_unary()?;
            expr = binary(op, expr, rhs, op_tok.span);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ScriptResult<Expr> {
        let tok = self.peek().clone();
        let op = match tok.kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::LogicalNot),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary {
                op,
                operand,
                span: tok.span,
            });
        }

        if matches!(tok.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            self.advance();
            let operand = self.parse_unary()?;
            let target = self.as_assign_target(operand, &tok)?;
            return Ok(Expr::IncDec {
                target,
                increment: matches!(tok.kind, TokenKind::PlusPlus),
                prefix: true,
                span: tok.span,
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_primary()?;
        while matches!(
            self.peek().kind,
            TokenKind::PlusPlus | TokenKind::MinusMinus
        ) {
            let tok = self.advance().clone();
            let target = self.as_assign_target(expr, &tok)?;
            expr = Expr::IncDec {
                target,
                increment: matches!(tok.kind, TokenKind::PlusPlus),
                prefix: false,
                span: tok.span,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ScriptResult<Expr> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Int(*value, tok.span))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Str(text.clone(), tok.span))
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume_kind(&TokenKind::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                let id = self.symbols.intern(&name);

                if self.check(&TokenKind::LeftParen) {
                    if !is_callable(self.symbols.get(id).kind) {
                        return Err(ScriptError::new(
                            crate::error::ErrorKind::UndefinedFunction,
                            format!("'{}' is not a known function", name),
                            tok.span,
                            &self.file,
                        )
                        .with_help(
                            "Declare it with 'function NAME;' or check the builtin name",
                        ));
                    }
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RightParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.match_kind(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume_kind(&TokenKind::RightParen, "Expected ')' after arguments")?;
                    return Ok(Expr::Call {
                        callee: id,
                        args,
                        span: tok.span,
                    });
                }

                if self.match_kind(&TokenKind::LeftBracket) {
                    let index = Box::new(self.parse_expression()?);
                    self.consume_kind(&TokenKind::RightBracket, "Expected ']' after array index")?;
                    return Ok(Expr::Index {
                        id,
                        index,
                        span: tok.span,
                    });
                }

                Ok(Expr::Var { id, span: tok.span })
            }
            _ => Err(self.error_at(&tok, "Expected an expression")),
        }
    }

    // ---- token helpers ----

    fn is_at_end(&self) -> bool {
        self.peek().is_eof()
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_next_is(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.current + 1)
            .map_or(false, |t| same_kind(&t.kind, kind))
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        same_kind(&self.peek().kind, kind)
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_kind(&mut self, kind: &TokenKind, message: &str) -> ScriptResult<Token> {
        if self.check(kind) {
            return Ok(self.advance().clone());
        }
        let tok = self.peek().clone();
        Err(self.error_at(&tok, message))
    }

    fn expect_bare_word(&mut self, message: &str) -> ScriptResult<(String, Span)> {
        let tok = self.peek().clone();
        if let TokenKind::Ident(name) = &tok.kind {
            if is_bare_word(name) {
                let name = name.clone();
                self.advance();
                return Ok((name, tok.span));
            }
        }
        Err(self.error_at(&tok, message))
    }

    fn error_at(&self, token: &Token, message: &str) -> ScriptError {
        let message = if token.is_eof() {
            format!("{} (found end of script)", message)
        } else {
            format!("{} (found '{}')", message, token.lexeme)
        };
        ScriptError::syntax_error(message, token.span, &self.file)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span,
    }
}

fn same_kind(a: &TokenKind, b: &TokenKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// A name with no scope sigil and no `$` suffix: usable as a label,
/// function name or character variable
fn is_bare_word(name: &str) -> bool {
    name.chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && !name.ends_with('$')
}

fn is_callable(kind: SymbolKind) -> bool {
    matches!(
        kind,
        SymbolKind::BuiltinFunc | SymbolKind::UserFunc | SymbolKind::UserFuncDecl
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse_src(source: &str) -> ScriptResult<(Vec<Stmt>, SymbolTable)> {
        let mut symbols = SymbolTable::new();
        symbols.declare_builtin("mes", 0).unwrap();
        symbols.declare_builtin("set", 1).unwrap();
        let tokens = Scanner::new(source, "test.qs").scan_tokens()?;
        let stmts = Parser::new(tokens, "test.qs", &mut symbols).parse(false)?;
        Ok((stmts, symbols))
    }

    #[test]
    fn parses_bare_call_without_parens() {
        let (stmts, symbols) = parse_src("mes \"hello\", \"world\";").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Call { callee, args, .. }) => {
                assert_eq!(symbols.get(*callee).name, "mes");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_label_statement() {
        let (stmts, symbols) = parse_src("OnInit:\nmes \"hi\";").unwrap();
        match &stmts[0] {
            Stmt::Label { id, .. } => assert_eq!(symbols.get(*id).name, "OnInit"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn assignment_desugars_with_compound_op() {
        let (stmts, _) = parse_src(".@x += 2;").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Assign { op, .. }) => assert_eq!(*op, Some(BinaryOp::Add)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn tilde_is_xor_in_binary_position() {
        let (stmts, _) = parse_src(".@x = 1 ~ 2;").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Assign { value, .. }) => match value.as_ref() {
                Expr::Binary { op, .. } => assert_eq!(*op, BinaryOp::BitXor),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_parenthesized_callee_is_an_error() {
        assert!(parse_src(".@x = frobnicate(1);").is_err());
    }

    #[test]
    fn statement_before_first_case_rejected() {
        assert!(parse_src("switch (1) { .@x = 1; case 1: }").is_err());
    }

    #[test]
    fn function_declaration_then_definition() {
        let src = "function helper;\nfunction helper { return 1; }";
        let (stmts, symbols) = parse_src(src).unwrap();
        assert!(matches!(stmts[0], Stmt::FuncDecl { .. }));
        match &stmts[1] {
            Stmt::FuncDef { id, body, .. } => {
                assert_eq!(symbols.get(*id).name, "helper");
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
