// questscript Bytecode Buffer
// Append-only code buffer with per-byte line tracking, label patch
// bookkeeping and a disassembler.

use crate::compiler::opcode::{self, Instr, OpCode};
use crate::compiler::symbols::{SymbolId, SymbolKind, SymbolTable};

/// Growable bytecode buffer for one compilation unit
#[derive(Debug, Default)]
pub struct CodeBuffer {
    pub code: Vec<u8>,
    /// Source line per emitted byte, for runtime error reports
    pub lines: Vec<usize>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn push(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn emit_op(&mut self, op: OpCode, line: usize) {
        let mut bytes = [0u8; 5];
        let mut n = 0;
        opcode::encode_op(
            &mut |b| {
                bytes[n] = b;
                n += 1;
            },
            op,
        );
        for &b in &bytes[..n] {
            self.push(b, line);
        }
    }

    /// Emit an inline integer literal. Negative values are lowered to
    /// the positive magnitude followed by a negate.
    pub fn emit_int(&mut self, value: i32, line: usize) {
        let magnitude = if value < 0 {
            (-(value as i64)) as u32
        } else {
            value as u32
        };
        let mut bytes = [0u8; 8];
        let mut n = 0;
        opcode::encode_int(
            &mut |b| {
                bytes[n] = b;
                n += 1;
            },
            magnitude,
        );
        for &b in &bytes[..n] {
            self.push(b, line);
        }
        if value < 0 {
            self.emit_op(OpCode::Neg, line);
        }
    }

    /// Emit an inline string literal: `Str` tag, bytes, NUL terminator.
    /// Embedded NULs cannot be represented and are dropped.
    pub fn emit_str(&mut self, text: &str, line: usize) {
        self.emit_op(OpCode::Str, line);
        for &b in text.as_bytes() {
            if b != 0 {
                self.push(b, line);
            }
        }
        self.push(0, line);
    }

    fn emit_u24(&mut self, value: u32, line: usize) {
        self.push((value & 0xff) as u8, line);
        self.push(((value >> 8) & 0xff) as u8, line);
        self.push(((value >> 16) & 0xff) as u8, line);
    }

    /// Emit a `Name` reference to a symbol (variable, function or
    /// builtin), resolved by kind at runtime.
    pub fn emit_name(&mut self, id: SymbolId, line: usize) {
        self.emit_op(OpCode::Name, line);
        self.emit_u24(id, line);
    }

    /// Emit a jump-target reference. Resolved labels emit `Pos` with
    /// the final offset; unresolved ones emit `Name` and record a patch
    /// site on the symbol. Both forms occupy four bytes, so resolution
    /// can rewrite in place.
    pub fn emit_label_ref(&mut self, symbols: &mut SymbolTable, id: SymbolId, line: usize) {
        let sym = symbols.get(id);
        match (sym.kind, sym.pos) {
            (SymbolKind::Pos, Some(pos)) => {
                self.emit_op(OpCode::Pos, line);
                self.emit_u24(pos, line);
            }
            _ => {
                let site = self.len() as u32;
                self.emit_name(id, line);
                symbols.add_patch(id, site);
            }
        }
    }

    /// Resolve a label at the current end of the buffer: rewrite every
    /// recorded patch site from `Name` + id to `Pos` + offset and mark
    /// the symbol resolved. Callers are responsible for rejecting
    /// duplicate definitions beforehand.
    pub fn define_label(&mut self, symbols: &mut SymbolTable, id: SymbolId) {
        let offset = self.len() as u32;
        let sites = std::mem::take(&mut symbols.get_mut(id).backpatch);
        for site in sites {
            let at = site as usize;
            self.code[at] = OpCode::Pos as u8;
            self.code[at + 1] = (offset & 0xff) as u8;
            self.code[at + 2] = ((offset >> 8) & 0xff) as u8;
            self.code[at + 3] = ((offset >> 16) & 0xff) as u8;
        }
        let sym = symbols.get_mut(id);
        sym.kind = SymbolKind::Pos;
        sym.pos = Some(offset);
    }

    /// Human-readable listing of the buffer
    pub fn disassemble(&self, symbols: &SymbolTable, name: &str) -> String {
        let mut out = format!("== {} ==\n", name);
        let mut ip = 0;
        while ip < self.code.len() {
            let at = ip;
            let line = self.lines.get(at).copied().unwrap_or(0);
            match opcode::read_instr(&self.code, &mut ip) {
                Some(Instr::Int(v)) => {
                    out.push_str(&format!("{:06} {:>4} INT   {}\n", at, line, v));
                }
                Some(Instr::Op(op)) => match op {
                    OpCode::Pos => {
                        let target = opcode::read_u24(&self.code, &mut ip).unwrap_or(0);
                        out.push_str(&format!("{:06} {:>4} POS   {:06}\n", at, line, target));
                    }
                    OpCode::Name => {
                        let id = opcode::read_u24(&self.code, &mut ip).unwrap_or(0);
                        let label = if (id as usize) < symbols.len() {
                            symbols.get(id).name.as_str()
                        } else {
                            "?"
                        };
                        out.push_str(&format!("{:06} {:>4} NAME  {}\n", at, line, label));
                    }
                    OpCode::Str => {
                        let start = ip;
                        while ip < self.code.len() && self.code[ip] != 0 {
                            ip += 1;
                        }
                        let text = String::from_utf8_lossy(&self.code[start..ip]);
                        if ip < self.code.len() {
                            ip += 1;
                        }
                        out.push_str(&format!("{:06} {:>4} STR   {:?}\n", at, line, text));
                    }
                    other => {
                        out.push_str(&format!("{:06} {:>4} {}\n", at, line, other.name()));
                    }
                },
                None => {
                    out.push_str(&format!("{:06} {:>4} <bad byte {:#04x}>\n", at, line, self.code[at]));
                    ip = at + 1;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::opcode::{read_instr, read_u24};

    #[test]
    fn forward_references_rewritten_to_same_offset() {
        let mut symbols = SymbolTable::new();
        let mut code = CodeBuffer::new();
        let label = symbols.intern("L_target");

        // three forward references before the definition
        for _ in 0..3 {
            code.emit_op(OpCode::Goto, 1);
            code.emit_label_ref(&mut symbols, label, 1);
        }
        assert_eq!(symbols.get(label).backpatch.len(), 3);

        code.emit_op(OpCode::End, 2);
        code.define_label(&mut symbols, label);
        let expected = code.len() as u32;

        assert_eq!(symbols.get(label).kind, SymbolKind::Pos);
        assert_eq!(symbols.get(label).pos, Some(expected));
        assert!(symbols.get(label).backpatch.is_empty());

        // decode: every Goto target must equal the resolved offset
        let mut ip = 0;
        let mut seen = 0;
        while ip < code.len() {
            match read_instr(&code.code, &mut ip).unwrap() {
                Instr::Op(OpCode::Goto) => {
                    assert_eq!(read_instr(&code.code, &mut ip), Some(Instr::Op(OpCode::Pos)));
                    assert_eq!(read_u24(&code.code, &mut ip), Some(expected));
                    seen += 1;
                }
                Instr::Op(OpCode::End) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn backward_reference_emits_resolved_pos() {
        let mut symbols = SymbolTable::new();
        let mut code = CodeBuffer::new();
        let label = symbols.intern("L_loop");

        code.emit_op(OpCode::Nop, 1);
        code.define_label(&mut symbols, label);
        let offset = code.len() as u32;
        code.emit_op(OpCode::Goto, 2);
        code.emit_label_ref(&mut symbols, label, 2);

        let mut ip = 0;
        assert_eq!(read_instr(&code.code, &mut ip), Some(Instr::Op(OpCode::Nop)));
        assert_eq!(read_instr(&code.code, &mut ip), Some(Instr::Op(OpCode::Goto)));
        assert_eq!(read_instr(&code.code, &mut ip), Some(Instr::Op(OpCode::Pos)));
        assert_eq!(read_u24(&code.code, &mut ip), Some(offset));
    }

    #[test]
    fn string_payload_nul_terminated() {
        let mut code = CodeBuffer::new();
        code.emit_str("hi", 1);
        let mut ip = 0;
        assert_eq!(read_instr(&code.code, &mut ip), Some(Instr::Op(OpCode::Str)));
        assert_eq!(&code.code[ip..], &[b'h', b'i', 0]);
    }
}
