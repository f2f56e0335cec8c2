// questscript Bytecode Opcodes
// Opcodes and inline integers share one byte stream using two disjoint
// variable-length encodings. An opcode chunk byte carries 0x40 as its
// continuation bit and its final byte is plain (< 0x40); an inline
// integer sets 0x80 on every byte, with 0x40 again marking continuation.
// The decoder can therefore tell the two apart from the first byte.

/// Bytecode operation codes. Every discriminant stays below 0x40 so an
/// opcode always encodes as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    /// Resolved label: 24-bit little-endian code offset follows
    Pos = 1,
    /// Named symbol reference: 24-bit little-endian symbol id follows
    Name = 2,
    /// Inline string literal: raw bytes follow, terminated by NUL
    Str = 3,
    /// Call the function whose marker/arguments sit on the stack
    Func = 4,
    /// Push the argument-list start marker
    Arg = 5,
    /// End of statement: discard everything above the frame base
    Eol = 6,
    Pop = 7,
    /// Resolve a variable reference on top of the stack to its value
    Deref = 8,
    Goto = 9,
    /// Pop the condition; jump when it is zero / empty
    JumpZero = 10,
    Return = 11,
    End = 12,

    // Binary operators
    Add = 13,
    Sub = 14,
    Mul = 15,
    Div = 16,
    Mod = 17,
    Eq = 18,
    Ne = 19,
    Gt = 20,
    Ge = 21,
    Lt = 22,
    Le = 23,
    And = 24,
    Or = 25,
    Xor = 26,
    LAnd = 27,
    LOr = 28,
    Shl = 29,
    Shr = 30,

    // Unary operators
    Neg = 31,
    LNot = 32,
    Not = 33,
}

impl OpCode {
    pub fn from_u32(value: u32) -> Option<OpCode> {
        use OpCode::*;
        Some(match value {
            0 => Nop,
            1 => Pos,
            2 => Name,
            3 => Str,
            4 => Func,
            5 => Arg,
            6 => Eol,
            7 => Pop,
            8 => Deref,
            9 => Goto,
            10 => JumpZero,
            11 => Return,
            12 => End,
            13 => Add,
            14 => Sub,
            15 => Mul,
            16 => Div,
            17 => Mod,
            18 => Eq,
            19 => Ne,
            20 => Gt,
            21 => Ge,
            22 => Lt,
            23 => Le,
            24 => And,
            25 => Or,
            26 => Xor,
            27 => LAnd,
            28 => LOr,
            29 => Shl,
            30 => Shr,
            31 => Neg,
            32 => LNot,
            33 => Not,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Nop => "NOP",
            Pos => "POS",
            Name => "NAME",
            Str => "STR",
            Func => "FUNC",
            Arg => "ARG",
            Eol => "EOL",
            Pop => "POP",
            Deref => "DEREF",
            Goto => "GOTO",
            JumpZero => "JMPZ",
            Return => "RET",
            End => "END",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Eq => "EQ",
            Ne => "NE",
            Gt => "GT",
            Ge => "GE",
            Lt => "LT",
            Le => "LE",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            LAnd => "LAND",
            LOr => "LOR",
            Shl => "SHL",
            Shr => "SHR",
            Neg => "NEG",
            LNot => "LNOT",
            Not => "NOT",
        }
    }
}

/// One decoded instruction-stream element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// Inline non-negative integer literal
    Int(i32),
    Op(OpCode),
}

/// Append an opcode using the 0x40-continuation encoding. Values below
/// 0x40 (all current opcodes) take one byte.
pub fn encode_op(out: &mut impl FnMut(u8), op: OpCode) {
    let mut v = op as u32;
    while v >= 0x40 {
        out(((v & 0x3f) as u8) | 0x40);
        v = (v - 0x40) >> 6;
    }
    out(v as u8);
}

/// Append a non-negative integer using the MSB-tagged encoding: every
/// byte sets 0x80, continuation chunks additionally set 0x40.
pub fn encode_int(out: &mut impl FnMut(u8), value: u32) {
    let mut a = value;
    while a >= 0x40 {
        out(((a & 0x3f) as u8) | 0xC0);
        a = (a - 0x40) >> 6;
    }
    out((a as u8) | 0x80);
}

/// Decode the element at `*ip`, advancing `*ip` past it. The payloads
/// of `Pos`/`Name`/`Str` are not consumed here; callers read them.
///
/// The continuation bit (0x40) is deliberately kept in the accumulated
/// chunk value: each continuation chunk contributes an extra 0x40, which
/// is exactly the amount the encoder subtracted.
pub fn read_instr(code: &[u8], ip: &mut usize) -> Option<Instr> {
    let first = *code.get(*ip)?;
    let inline_int = first & 0x80 != 0;

    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        let b = *code.get(*ip)?;
        *ip += 1;
        value = value.wrapping_add(((b & 0x7f) as u32) << shift);
        shift += 6;
        if b & 0x40 == 0 {
            break;
        }
    }

    if inline_int {
        Some(Instr::Int(value as i32))
    } else {
        OpCode::from_u32(value).map(Instr::Op)
    }
}

/// Read a 24-bit little-endian payload (label offset or symbol id)
pub fn read_u24(code: &[u8], ip: &mut usize) -> Option<u32> {
    if *ip + 3 > code.len() {
        return None;
    }
    let v = code[*ip] as u32 | (code[*ip + 1] as u32) << 8 | (code[*ip + 2] as u32) << 16;
    *ip += 3;
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_int_vec(v: u32) -> Vec<u8> {
        let mut out = Vec::new();
        encode_int(&mut |b| out.push(b), v);
        out
    }

    #[test]
    fn int_round_trip() {
        for v in [0u32, 1, 0x3f, 0x40, 0x41, 0x7f, 0x80, 1000, 65535, i32::MAX as u32] {
            let bytes = encode_int_vec(v);
            assert!(bytes.iter().all(|b| b & 0x80 != 0), "MSB tag on {v}");
            let mut ip = 0;
            assert_eq!(read_instr(&bytes, &mut ip), Some(Instr::Int(v as i32)));
            assert_eq!(ip, bytes.len());
        }
    }

    #[test]
    fn op_round_trip() {
        let mut out = Vec::new();
        encode_op(&mut |b| out.push(b), OpCode::JumpZero);
        assert_eq!(out.len(), 1);
        let mut ip = 0;
        assert_eq!(read_instr(&out, &mut ip), Some(Instr::Op(OpCode::JumpZero)));
    }

    #[test]
    fn op_and_int_streams_distinguishable() {
        let mut out = Vec::new();
        encode_op(&mut |b| out.push(b), OpCode::Add);
        encode_int(&mut |b| out.push(b), 300);
        encode_op(&mut |b| out.push(b), OpCode::Eol);

        let mut ip = 0;
        assert_eq!(read_instr(&out, &mut ip), Some(Instr::Op(OpCode::Add)));
        assert_eq!(read_instr(&out, &mut ip), Some(Instr::Int(300)));
        assert_eq!(read_instr(&out, &mut ip), Some(Instr::Op(OpCode::Eol)));
        assert_eq!(ip, out.len());
    }

    #[test]
    fn u24_round_trip() {
        let code = [0x34, 0x12, 0x01];
        let mut ip = 0;
        assert_eq!(read_u24(&code, &mut ip), Some(0x011234));
        assert_eq!(ip, 3);
    }
}
