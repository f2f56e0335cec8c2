// questscript Scanner (Lexer)
// Converts script source into tokens

use crate::error::{ScriptError, ScriptResult, Span};
use crate::lexer::token::{Token, TokenKind};

/// Scanner that tokenizes quest script source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_column: usize,
    file: String,
    warnings: Vec<ScriptError>,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_column: 1,
            file: file.into(),
            warnings: Vec::new(),
        }
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(&mut self) -> ScriptResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            Span::single(self.line, self.column, self.current),
        ));

        Ok(std::mem::take(&mut self.tokens))
    }

    /// Warnings collected during scanning (overflow clamps)
    pub fn take_warnings(&mut self) -> Vec<ScriptError> {
        std::mem::take(&mut self.warnings)
    }

    fn scan_token(&mut self) -> ScriptResult<()> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '?' => self.add_token(TokenKind::Question),

            '+' => {
                let kind = if self.match_char('=') {
                    TokenKind::PlusEqual
                } else if self.match_char('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.add_token(kind);
            }
            '-' => {
                let kind = if self.match_char('=') {
                    TokenKind::MinusEqual
                } else if self.match_char('-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            '*' => {
                let kind = if self.match_char('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                };
                self.add_token(kind);
            }
            '/' => {
                if self.match_char('/') {
                    // Single-line comment
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else if self.match_char('=') {
                    self.add_token(TokenKind::SlashEqual);
                } else {
                    self.add_token(TokenKind::Slash);
                }
            }
            '%' => {
                let kind = if self.match_char('=') {
                    TokenKind::PercentEqual
                } else {
                    TokenKind::Percent
                };
                self.add_token(kind);
            }

            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '<' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::LessEqual);
                } else if self.match_char('<') {
                    let kind = if self.match_char('=') {
                        TokenKind::ShlEqual
                    } else {
                        TokenKind::ShiftLeft
                    };
                    self.add_token(kind);
                } else {
                    self.add_token(TokenKind::Less);
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::GreaterEqual);
                } else if self.match_char('>') {
                    let kind = if self.match_char('=') {
                        TokenKind::ShrEqual
                    } else {
                        TokenKind::ShiftRight
                    };
                    self.add_token(kind);
                } else {
                    self.add_token(TokenKind::Greater);
                }
            }

            '&' => {
                let kind = if self.match_char('&') {
                    TokenKind::AndAnd
                } else if self.match_char('=') {
                    TokenKind::AmpEqual
                } else {
                    TokenKind::Ampersand
                };
                self.add_token(kind);
            }
            '|' => {
                let kind = if self.match_char('|') {
                    TokenKind::OrOr
                } else if self.match_char('=') {
                    TokenKind::PipeEqual
                } else {
                    TokenKind::Pipe
                };
                self.add_token(kind);
            }
            '^' => {
                let kind = if self.match_char('=') {
                    TokenKind::CaretEqual
                } else {
                    TokenKind::Caret
                };
                self.add_token(kind);
            }
            '~' => {
                let kind = if self.match_char('=') {
                    TokenKind::TildeEqual
                } else {
                    TokenKind::Tilde
                };
                self.add_token(kind);
            }

            // Whitespace
            ' ' | '\r' | '\t' => {}
            '\n' => {
                self.line += 1;
                self.column = 1;
            }

            '"' => self.string()?,

            c if c.is_ascii_digit() => self.number()?,

            // Words may begin with a scope sigil: @ $ # ## . .@ '
            c if is_word_start(c) => self.word(c)?,

            _ => {
                return Err(self
                    .error(&format!("Unexpected character '{}'", c))
                    .with_help("Remove this character or check for typos"));
            }
        }

        Ok(())
    }

    /// Scan a word: optional scope sigil, identifier characters, and an
    /// optional `$` suffix marking a string-typed variable.
    fn word(&mut self, first: char) -> ScriptResult<()> {
        match first {
            '.' => {
                // `.` or `.@`
                self.match_char('@');
            }
            '#' => {
                // `#` or `##`
                self.match_char('#');
            }
            '$' => {
                // `$` or `$@`
                self.match_char('@');
            }
            '@' | '\'' => {}
            _ => {}
        }

        let had_sigil = !matches!(first, 'a'..='z' | 'A'..='Z' | '_');

        if had_sigil && !is_ident_char(self.peek()) {
            return Err(self
                .error("Scope sigil must be followed by a name")
                .with_help("Write a variable name after the sigil, e.g. .@count"));
        }

        while is_ident_char(self.peek()) {
            self.advance();
        }

        // `$` suffix marks a string-typed variable
        self.match_char('$');

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = if had_sigil {
            TokenKind::Ident(text)
        } else {
            keyword_or_ident(&text)
        };
        self.add_token(kind);
        Ok(())
    }

    fn string(&mut self) -> ScriptResult<()> {
        let start_line = self.line;
        let start_col = self.start_column;
        let mut value = String::new();

        while self.peek() != '"' && !self.is_at_end() {
            let c = self.advance();
            if c == '\\' {
                if self.is_at_end() {
                    break;
                }
                let esc = self.advance();
                // Only single-character escapes are valid; anything that
                // would decode to more than one character is an error.
                match esc {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    _ => {
                        return Err(self
                            .error(&format!("Invalid escape sequence '\\{}'", esc))
                            .with_help("Valid escapes: \\n, \\t, \\r, \\\\, \\\", \\'"));
                    }
                }
            } else {
                if c == '\n' {
                    self.line += 1;
                    self.column = 1;
                }
                value.push(c);
            }
        }

        if self.is_at_end() {
            return Err(ScriptError::syntax_error(
                "Unterminated string",
                Span::from_positions(start_line, start_col, self.line, self.column),
                &self.file,
            )
            .with_help("Add a closing double quote to terminate the string"));
        }

        // Consume the closing quote
        self.advance();
        self.add_token(TokenKind::Str(value));
        Ok(())
    }

    /// Scan a decimal or `0x` hexadecimal integer. Values outside the
    /// 32-bit signed range are clamped with a warning, never wrapped.
    fn number(&mut self) -> ScriptResult<()> {
        let mut value: i64 = 0;
        let mut overflowed = false;

        let first = self.source[self.start];
        if first == '0' && (self.peek() == 'x' || self.peek() == 'X') {
            self.advance();
            if !self.peek().is_ascii_hexdigit() {
                return Err(self
                    .error("Expected hex digits after '0x'")
                    .with_help("Write at least one digit, e.g. 0x1F"));
            }
            while self.peek().is_ascii_hexdigit() {
                let d = self.advance().to_digit(16).unwrap() as i64;
                value = value.saturating_mul(16).saturating_add(d);
                if value > i32::MAX as i64 {
                    overflowed = true;
                    value = i32::MAX as i64;
                }
            }
        } else {
            value = first.to_digit(10).unwrap() as i64;
            while self.peek().is_ascii_digit() {
                let d = self.advance().to_digit(10).unwrap() as i64;
                value = value.saturating_mul(10).saturating_add(d);
                if value > i32::MAX as i64 {
                    overflowed = true;
                    value = i32::MAX as i64;
                }
            }
        }

        if overflowed {
            let lexeme: String = self.source[self.start..self.current].iter().collect();
            self.warnings.push(
                self.error(&format!("Integer literal '{}' clamped to {}", lexeme, i32::MAX)),
            );
        }

        self.add_token(TokenKind::Int(value as i32));
        Ok(())
    }

    fn block_comment(&mut self) -> ScriptResult<()> {
        let start_line = self.line;
        let start_col = self.start_column;
        let mut depth = 1;

        while depth > 0 && !self.is_at_end() {
            if self.peek() == '/' && self.peek_next() == '*' {
                self.advance();
                self.advance();
                depth += 1;
            } else if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                depth -= 1;
            } else {
                if self.peek() == '\n' {
                    self.line += 1;
                    self.column = 1;
                }
                self.advance();
            }
        }

        if depth > 0 {
            return Err(ScriptError::syntax_error(
                "Unterminated block comment",
                Span::from_positions(start_line, start_col, self.line, self.column),
                &self.file,
            )
            .with_help("Add '*/' to close the block comment"));
        }

        Ok(())
    }

    // Helper methods
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.source.len() {
            '\0'
        } else {
            self.source[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.current += 1;
            self.column += 1;
            true
        }
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = Span::from_positions(self.line, self.start_column, self.line, self.column - 1);
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::syntax_error(
            message,
            Span::from_positions(self.line, self.start_column, self.line, self.column),
            &self.file,
        )
    }
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '@' | '$' | '#' | '.' | '\'')
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// Keywords match case-insensitively, like everything else in the language
fn keyword_or_ident(text: &str) -> TokenKind {
    match text.to_ascii_lowercase().as_str() {
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "for" => TokenKind::For,
        "switch" => TokenKind::Switch,
        "case" => TokenKind::Case,
        "default" => TokenKind::Default,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "goto" => TokenKind::Goto,
        "return" => TokenKind::Return,
        "function" => TokenKind::Function,
        _ => TokenKind::Ident(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source, "test.qs");
        scanner
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn scans_sigil_words() {
        let toks = kinds(".@count = $serverwide$ + #bank;");
        assert_eq!(toks[0], TokenKind::Ident(".@count".to_string()));
        assert_eq!(toks[1], TokenKind::Equal);
        assert_eq!(toks[2], TokenKind::Ident("$serverwide$".to_string()));
        assert_eq!(toks[4], TokenKind::Ident("#bank".to_string()));
    }

    #[test]
    fn scans_hex_and_clamps_overflow() {
        assert_eq!(kinds("0x10")[0], TokenKind::Int(16));

        let mut scanner = Scanner::new("99999999999", "test.qs");
        let toks = scanner.scan_tokens().unwrap();
        assert_eq!(toks[0].kind, TokenKind::Int(i32::MAX));
        assert_eq!(scanner.take_warnings().len(), 1);
    }

    #[test]
    fn rejects_multi_char_escape() {
        let mut scanner = Scanner::new("\"bad\\x41\"", "test.qs");
        assert!(scanner.scan_tokens().is_err());
    }

    #[test]
    fn rejects_unterminated_block_comment() {
        let mut scanner = Scanner::new("/* no end", "test.qs");
        assert!(scanner.scan_tokens().is_err());
    }

    #[test]
    fn scans_compound_assignment() {
        let toks = kinds("a <<= 2; b ~= c;");
        assert_eq!(toks[1], TokenKind::ShlEqual);
        assert_eq!(toks[5], TokenKind::TildeEqual);
    }
}
