//! Intermediate representation
//!
//! Typed three-address code over unbounded virtual registers, organized
//! as procedures of labeled basic blocks. Control flow stays structured
//! as labels and branches; there is no SSA form and a virtual register
//! may be written on more than one join path, but each register number is
//! allocated exactly once per procedure.
//!
//! The IR has a stable text form used for golden-file testing and the
//! `--dump-ir` driver option. `parse_module(print(m))` yields a module
//! structurally equal to `m`.

use bitflags::bitflags;
use std::fmt;

/// Scalar IR types. `ptr` is a 16-bit address on this target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrType {
    Void,
    I8,
    I16,
    I32,
    I64,
    I128,
    Ptr,
}

impl IrType {
    pub fn size(self) -> u64 {
        match self {
            IrType::Void => 0,
            IrType::I8 => 1,
            IrType::I16 | IrType::Ptr => 2,
            IrType::I32 => 4,
            IrType::I64 => 8,
            IrType::I128 => 16,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IrType::Void => "void",
            IrType::I8 => "i8",
            IrType::I16 => "i16",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::I128 => "i128",
            IrType::Ptr => "ptr",
        }
    }

    pub fn from_name(name: &str) -> Option<IrType> {
        match name {
            "void" => Some(IrType::Void),
            "i8" => Some(IrType::I8),
            "i16" => Some(IrType::I16),
            "i32" => Some(IrType::I32),
            "i64" => Some(IrType::I64),
            "i128" => Some(IrType::I128),
            "ptr" => Some(IrType::Ptr),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A virtual register, unique within its procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOperand {
    VReg(VReg),
    Imm(i64),
    /// Global symbol, printed `@name`.
    Sym(String),
    /// Local variable slot, printed bare.
    Local(String),
    /// String payload (inline assembler templates).
    Str(String),
}

impl fmt::Display for IrOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrOperand::VReg(r) => write!(f, "{}", r),
            IrOperand::Imm(v) => write!(f, "{}", v),
            IrOperand::Sym(s) => write!(f, "@{}", s),
            IrOperand::Local(s) => write!(f, "{}", s),
            IrOperand::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// IR operations. Signedness is encoded in the operation, not the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOp {
    Imm,
    Copy,
    Add,
    Sub,
    Mul,
    Sdiv,
    Udiv,
    Srem,
    Urem,
    And,
    Or,
    Xor,
    Bnot,
    Neg,
    Shl,
    Sra,
    Srl,
    Eq,
    Neq,
    Slt,
    Slteq,
    Sgt,
    Sgteq,
    Ult,
    Ulteq,
    Ugt,
    Ugteq,
    Sext,
    Zext,
    Trunc,
    Read,
    Write,
    Lvarptr,
    Gvarptr,
    Call,
    Calli,
    Copymem,
    Asm,
}

const OP_NAMES: &[(IrOp, &str)] = &[
    (IrOp::Imm, "imm"),
    (IrOp::Copy, "copy"),
    (IrOp::Add, "add"),
    (IrOp::Sub, "sub"),
    (IrOp::Mul, "mul"),
    (IrOp::Sdiv, "sdiv"),
    (IrOp::Udiv, "udiv"),
    (IrOp::Srem, "srem"),
    (IrOp::Urem, "urem"),
    (IrOp::And, "and"),
    (IrOp::Or, "or"),
    (IrOp::Xor, "xor"),
    (IrOp::Bnot, "bnot"),
    (IrOp::Neg, "neg"),
    (IrOp::Shl, "shl"),
    (IrOp::Sra, "sra"),
    (IrOp::Srl, "srl"),
    (IrOp::Eq, "eq"),
    (IrOp::Neq, "neq"),
    (IrOp::Slt, "slt"),
    (IrOp::Slteq, "slteq"),
    (IrOp::Sgt, "sgt"),
    (IrOp::Sgteq, "sgteq"),
    (IrOp::Ult, "ult"),
    (IrOp::Ulteq, "ulteq"),
    (IrOp::Ugt, "ugt"),
    (IrOp::Ugteq, "ugteq"),
    (IrOp::Sext, "sext"),
    (IrOp::Zext, "zext"),
    (IrOp::Trunc, "trunc"),
    (IrOp::Read, "read"),
    (IrOp::Write, "write"),
    (IrOp::Lvarptr, "lvarptr"),
    (IrOp::Gvarptr, "gvarptr"),
    (IrOp::Call, "call"),
    (IrOp::Calli, "calli"),
    (IrOp::Copymem, "copymem"),
    (IrOp::Asm, "asm"),
];

impl IrOp {
    pub fn name(self) -> &'static str {
        OP_NAMES
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, n)| *n)
            .expect("op name table complete")
    }

    pub fn from_name(name: &str) -> Option<IrOp> {
        OP_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(op, _)| *op)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            IrOp::Eq
                | IrOp::Neq
                | IrOp::Slt
                | IrOp::Slteq
                | IrOp::Sgt
                | IrOp::Sgteq
                | IrOp::Ult
                | IrOp::Ulteq
                | IrOp::Ugt
                | IrOp::Ugteq
        )
    }
}

/// Three-address instruction: `dest = op type args`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrInstr {
    pub dest: Option<VReg>,
    pub op: IrOp,
    pub ty: IrType,
    pub args: Vec<IrOperand>,
}

impl fmt::Display for IrInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dest) = self.dest {
            write!(f, "{} = ", dest)?;
        }
        write!(f, "{} {}", self.op.name(), self.ty)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", arg)?;
            } else {
                write!(f, ", {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Block terminator. Every basic block ends in exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum IrTerm {
    Jump {
        target: String,
    },
    Branch {
        cond: IrOperand,
        then_label: String,
        else_label: String,
    },
    Ret {
        ty: IrType,
        value: Option<IrOperand>,
    },
}

impl fmt::Display for IrTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrTerm::Jump { target } => write!(f, "jmp {}", target),
            IrTerm::Branch {
                cond,
                then_label,
                else_label,
            } => write!(f, "br {}, {}, {}", cond, then_label, else_label),
            IrTerm::Ret { ty, value } => match value {
                Some(v) => write!(f, "ret {} {}", ty, v),
                None => write!(f, "ret"),
            },
        }
    }
}

/// A labeled basic block.
#[derive(Debug, Clone, PartialEq)]
pub struct IrBlock {
    pub label: String,
    pub instrs: Vec<IrInstr>,
    pub term: IrTerm,
}

bitflags! {
    /// Procedure attributes carried from source attributes into the IR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProcAttrs: u8 {
        /// User service routine calling convention.
        const USR = 1;
        /// Callers may discard the return value without a diagnostic.
        const MAY_IGNORE_RETURN = 2;
    }
}

/// An IR procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct IrProc {
    pub name: String,
    pub args: Vec<(String, IrType)>,
    pub ret: IrType,
    pub attrs: ProcAttrs,
    /// Local variable slots: name and size in bytes.
    pub lvars: Vec<(String, u64)>,
    pub blocks: Vec<IrBlock>,
}

impl fmt::Display for IrProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc @{}(", self.name)?;
        for (i, (name, ty)) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", name, ty)?;
        }
        write!(f, ") {}", self.ret)?;
        if self.attrs.contains(ProcAttrs::USR) {
            write!(f, " usr")?;
        }
        if self.attrs.contains(ProcAttrs::MAY_IGNORE_RETURN) {
            write!(f, " mayignore")?;
        }
        writeln!(f, " {{")?;
        for (name, size) in &self.lvars {
            writeln!(f, "lvar {} {}", name, size)?;
        }
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for instr in &block.instrs {
                writeln!(f, "    {}", instr)?;
            }
            writeln!(f, "    {}", block.term)?;
        }
        writeln!(f, "}}")
    }
}

/// One entry of a global data initializer tree.
#[derive(Debug, Clone, PartialEq)]
pub enum IrDataEntry {
    /// Typed integer constant.
    Int(IrType, i64),
    /// Address of another global plus a byte offset.
    Addr { sym: String, offset: i64 },
    /// A run of zero bytes.
    Zero(u64),
}

impl fmt::Display for IrDataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrDataEntry::Int(ty, v) => write!(f, "{} {}", ty, v),
            IrDataEntry::Addr { sym, offset } => {
                if *offset == 0 {
                    write!(f, "ptr @{}", sym)
                } else if *offset > 0 {
                    write!(f, "ptr @{}+{}", sym, offset)
                } else {
                    write!(f, "ptr @{}{}", sym, offset)
                }
            }
            IrDataEntry::Zero(n) => write!(f, "zero {}", n),
        }
    }
}

/// A global data declaration: total size plus initializer entries laid
/// out in order.
#[derive(Debug, Clone, PartialEq)]
pub struct IrData {
    pub name: String,
    pub size: u64,
    pub entries: Vec<IrDataEntry>,
    /// Read-only data (string literals) goes in a separate section.
    pub readonly: bool,
}

impl fmt::Display for IrData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.readonly {
            write!(f, "rodata @{} {} {{ ", self.name, self.size)?;
        } else {
            write!(f, "data @{} {} {{ ", self.name, self.size)?;
        }
        for (i, e) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        writeln!(f, " }}")
    }
}

/// Ordered module entry.
#[derive(Debug, Clone, PartialEq)]
pub enum IrEntry {
    Proc(IrProc),
    Data(IrData),
}

/// An IR module: ordered procedures and data declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IrModule {
    pub entries: Vec<IrEntry>,
}

impl IrModule {
    pub fn procs(&self) -> impl Iterator<Item = &IrProc> {
        self.entries.iter().filter_map(|e| match e {
            IrEntry::Proc(p) => Some(p),
            _ => None,
        })
    }

    pub fn data(&self) -> impl Iterator<Item = &IrData> {
        self.entries.iter().filter_map(|e| match e {
            IrEntry::Data(d) => Some(d),
            _ => None,
        })
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match entry {
                IrEntry::Proc(p) => write!(f, "{}", p)?,
                IrEntry::Data(d) => write!(f, "{}", d)?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Text-form parser
// ---------------------------------------------------------------------------

/// Parse the IR text form back into a module. Errors carry a line number
/// and message; this parser is for golden-file tests and tooling, not for
/// untrusted input.
pub fn parse_module(text: &str) -> Result<IrModule, String> {
    Parser {
        lines: text.lines().enumerate().collect(),
        at: 0,
    }
    .module()
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    at: usize,
}

impl<'a> Parser<'a> {
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        while self.at < self.lines.len() {
            let (n, line) = self.lines[self.at];
            self.at += 1;
            let line = line.trim();
            if !line.is_empty() {
                return Some((n + 1, line));
            }
        }
        None
    }

    fn module(&mut self) -> Result<IrModule, String> {
        let mut entries = Vec::new();
        while let Some((n, line)) = self.next_line() {
            if let Some(rest) = line.strip_prefix("proc ") {
                entries.push(IrEntry::Proc(self.proc(n, rest)?));
            } else if let Some(rest) = line.strip_prefix("data ") {
                entries.push(IrEntry::Data(data_decl(n, rest, false)?));
            } else if let Some(rest) = line.strip_prefix("rodata ") {
                entries.push(IrEntry::Data(data_decl(n, rest, true)?));
            } else {
                return Err(format!("line {}: expected proc or data", n));
            }
        }
        Ok(IrModule { entries })
    }

    fn proc(&mut self, n: usize, header: &str) -> Result<IrProc, String> {
        let header = header
            .strip_suffix('{')
            .ok_or_else(|| format!("line {}: missing '{{' in proc header", n))?
            .trim();
        let name_start = header
            .strip_prefix('@')
            .ok_or_else(|| format!("line {}: proc name must start with '@'", n))?;
        let open = name_start
            .find('(')
            .ok_or_else(|| format!("line {}: missing '(' in proc header", n))?;
        let close = name_start
            .find(')')
            .ok_or_else(|| format!("line {}: missing ')' in proc header", n))?;
        let name = name_start[..open].to_string();
        let mut args = Vec::new();
        let arg_text = &name_start[open + 1..close];
        if !arg_text.trim().is_empty() {
            for part in arg_text.split(',') {
                let mut it = part.split_whitespace();
                let aname = it
                    .next()
                    .ok_or_else(|| format!("line {}: bad argument", n))?;
                let aty = it
                    .next()
                    .and_then(IrType::from_name)
                    .ok_or_else(|| format!("line {}: bad argument type", n))?;
                args.push((aname.to_string(), aty));
            }
        }
        let mut tail = name_start[close + 1..].split_whitespace();
        let ret = tail
            .next()
            .and_then(IrType::from_name)
            .ok_or_else(|| format!("line {}: missing return type", n))?;
        let mut attrs = ProcAttrs::default();
        for word in tail {
            match word {
                "usr" => attrs |= ProcAttrs::USR,
                "mayignore" => attrs |= ProcAttrs::MAY_IGNORE_RETURN,
                other => return Err(format!("line {}: unknown attribute '{}'", n, other)),
            }
        }

        let mut lvars = Vec::new();
        let mut blocks: Vec<IrBlock> = Vec::new();
        let mut cur: Option<(String, Vec<IrInstr>)> = None;
        loop {
            let (n, line) = self
                .next_line()
                .ok_or_else(|| "unexpected end of proc".to_string())?;
            if line == "}" {
                if cur.is_some() {
                    return Err(format!("line {}: block without terminator", n));
                }
                break;
            }
            if let Some(rest) = line.strip_prefix("lvar ") {
                let mut it = rest.split_whitespace();
                let name = it
                    .next()
                    .ok_or_else(|| format!("line {}: bad lvar", n))?
                    .to_string();
                let size: u64 = it
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| format!("line {}: bad lvar size", n))?;
                lvars.push((name, size));
                continue;
            }
            if let Some(label) = line.strip_suffix(':') {
                if cur.is_some() {
                    return Err(format!("line {}: block without terminator", n));
                }
                cur = Some((label.to_string(), Vec::new()));
                continue;
            }
            let (label, instrs) = cur
                .as_mut()
                .ok_or_else(|| format!("line {}: instruction outside block", n))?;
            if let Some(term) = parse_term(line) {
                blocks.push(IrBlock {
                    label: std::mem::take(label),
                    instrs: std::mem::take(instrs),
                    term: term?,
                });
                cur = None;
            } else {
                instrs.push(parse_instr(n, line)?);
            }
        }
        Ok(IrProc {
            name,
            args,
            ret,
            attrs,
            lvars,
            blocks,
        })
    }
}

fn parse_operand(text: &str) -> Result<IrOperand, String> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('%') {
        let n: u32 = rest
            .parse()
            .map_err(|_| format!("bad vreg '{}'", text))?;
        return Ok(IrOperand::VReg(VReg(n)));
    }
    if let Some(rest) = text.strip_prefix('@') {
        return Ok(IrOperand::Sym(rest.to_string()));
    }
    if text.starts_with('"') {
        // Debug-escaped string; accept the simple escapes the printer emits
        let inner = &text[1..text.len() - 1];
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(other) => out.push(other),
                    None => return Err("bad string operand".to_string()),
                }
            } else {
                out.push(c);
            }
        }
        return Ok(IrOperand::Str(out));
    }
    if text.starts_with('-') || text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        let v: i64 = text
            .parse()
            .map_err(|_| format!("bad immediate '{}'", text))?;
        return Ok(IrOperand::Imm(v));
    }
    Ok(IrOperand::Local(text.to_string()))
}

fn parse_instr(n: usize, line: &str) -> Result<IrInstr, String> {
    let (dest, rest) = match line.split_once(" = ") {
        Some((d, rest)) => {
            let d = d.trim();
            let num: u32 = d
                .strip_prefix('%')
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| format!("line {}: bad destination '{}'", n, d))?;
            (Some(VReg(num)), rest.trim())
        }
        None => (None, line),
    };
    let mut head = rest.splitn(3, ' ');
    let op = head
        .next()
        .and_then(IrOp::from_name)
        .ok_or_else(|| format!("line {}: unknown op", n))?;
    let ty = head
        .next()
        .and_then(IrType::from_name)
        .ok_or_else(|| format!("line {}: missing type", n))?;
    let mut args = Vec::new();
    if let Some(tail) = head.next() {
        let mut rest = tail.trim();
        if op == IrOp::Asm {
            // the quoted template may contain commas; split after the
            // closing quote instead
            let end = find_string_end(rest)
                .ok_or_else(|| format!("line {}: bad asm template", n))?;
            args.push(parse_operand(&rest[..end])?);
            rest = rest[end..].trim_start_matches(',').trim();
        }
        if !rest.is_empty() {
            for part in rest.split(',') {
                args.push(parse_operand(part)?);
            }
        }
    }
    Ok(IrInstr { dest, op, ty, args })
}

/// Index one past the closing quote of a debug-escaped string starting
/// at `text[0]`, or `None` if unterminated.
fn find_string_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Returns `Some` when the line is a terminator.
fn parse_term(line: &str) -> Option<Result<IrTerm, String>> {
    if let Some(rest) = line.strip_prefix("jmp ") {
        return Some(Ok(IrTerm::Jump {
            target: rest.trim().to_string(),
        }));
    }
    if let Some(rest) = line.strip_prefix("br ") {
        let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Some(Err(format!("bad branch '{}'", line)));
        }
        let cond = match parse_operand(parts[0]) {
            Ok(op) => op,
            Err(e) => return Some(Err(e)),
        };
        return Some(Ok(IrTerm::Branch {
            cond,
            then_label: parts[1].to_string(),
            else_label: parts[2].to_string(),
        }));
    }
    if line == "ret" {
        return Some(Ok(IrTerm::Ret {
            ty: IrType::Void,
            value: None,
        }));
    }
    if let Some(rest) = line.strip_prefix("ret ") {
        let mut it = rest.splitn(2, ' ');
        let ty = match it.next().and_then(IrType::from_name) {
            Some(ty) => ty,
            None => return Some(Err(format!("bad return type in '{}'", line))),
        };
        let value = match it.next() {
            Some(v) => match parse_operand(v) {
                Ok(op) => Some(op),
                Err(e) => return Some(Err(e)),
            },
            None => None,
        };
        return Some(Ok(IrTerm::Ret { ty, value }));
    }
    None
}

fn data_decl(n: usize, rest: &str, readonly: bool) -> Result<IrData, String> {
    let rest = rest.trim();
    let name_rest = rest
        .strip_prefix('@')
        .ok_or_else(|| format!("line {}: data name must start with '@'", n))?;
    let (head, body) = name_rest
        .split_once('{')
        .ok_or_else(|| format!("line {}: missing '{{' in data", n))?;
    let mut it = head.split_whitespace();
    let name = it
        .next()
        .ok_or_else(|| format!("line {}: missing data name", n))?
        .to_string();
    let size: u64 = it
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("line {}: missing data size", n))?;
    let body = body
        .trim()
        .strip_suffix('}')
        .ok_or_else(|| format!("line {}: missing '}}' in data", n))?
        .trim();
    let mut entries = Vec::new();
    if !body.is_empty() {
        for part in body.split(',') {
            entries.push(data_entry(n, part.trim())?);
        }
    }
    Ok(IrData {
        name,
        size,
        entries,
        readonly,
    })
}

fn data_entry(n: usize, text: &str) -> Result<IrDataEntry, String> {
    if let Some(rest) = text.strip_prefix("zero ") {
        let v: u64 = rest
            .trim()
            .parse()
            .map_err(|_| format!("line {}: bad zero run '{}'", n, text))?;
        return Ok(IrDataEntry::Zero(v));
    }
    if let Some(rest) = text.strip_prefix("ptr @") {
        let (sym, offset) = if let Some(idx) = rest.rfind(['+', '-']) {
            let (s, off) = rest.split_at(idx);
            let offset: i64 = off
                .parse()
                .map_err(|_| format!("line {}: bad address offset '{}'", n, text))?;
            (s.to_string(), offset)
        } else {
            (rest.to_string(), 0)
        };
        return Ok(IrDataEntry::Addr { sym, offset });
    }
    let mut it = text.split_whitespace();
    let ty = it
        .next()
        .and_then(IrType::from_name)
        .ok_or_else(|| format!("line {}: bad data entry '{}'", n, text))?;
    let v: i64 = it
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("line {}: bad data value '{}'", n, text))?;
    Ok(IrDataEntry::Int(ty, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_module() -> IrModule {
        IrModule {
            entries: vec![
                IrEntry::Data(IrData {
                    name: "g".to_string(),
                    size: 2,
                    entries: vec![IrDataEntry::Int(IrType::I16, 7)],
                    readonly: false,
                }),
                IrEntry::Proc(IrProc {
                    name: "main".to_string(),
                    args: vec![],
                    ret: IrType::I16,
                    attrs: ProcAttrs::default(),
                    lvars: vec![("i".to_string(), 2)],
                    blocks: vec![
                        IrBlock {
                            label: "entry".to_string(),
                            instrs: vec![IrInstr {
                                dest: Some(VReg(0)),
                                op: IrOp::Imm,
                                ty: IrType::I16,
                                args: vec![IrOperand::Imm(0)],
                            }],
                            term: IrTerm::Branch {
                                cond: IrOperand::VReg(VReg(0)),
                                then_label: "exit".to_string(),
                                else_label: "exit".to_string(),
                            },
                        },
                        IrBlock {
                            label: "exit".to_string(),
                            instrs: vec![],
                            term: IrTerm::Ret {
                                ty: IrType::I16,
                                value: Some(IrOperand::VReg(VReg(0))),
                            },
                        },
                    ],
                }),
            ],
        }
    }

    #[test]
    fn test_roundtrip() {
        let module = sample_module();
        let text = module.to_string();
        let reparsed = parse_module(&text).unwrap();
        assert_eq!(module, reparsed);
    }

    #[test]
    fn test_print_is_fixed_point() {
        let module = sample_module();
        let once = module.to_string();
        let twice = parse_module(&once).unwrap().to_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_proc_attrs_roundtrip() {
        let mut module = sample_module();
        if let IrEntry::Proc(p) = &mut module.entries[1] {
            p.attrs = ProcAttrs::USR | ProcAttrs::MAY_IGNORE_RETURN;
        }
        let reparsed = parse_module(&module.to_string()).unwrap();
        assert_eq!(module, reparsed);
    }

    #[test]
    fn test_instr_display() {
        let instr = IrInstr {
            dest: Some(VReg(3)),
            op: IrOp::Add,
            ty: IrType::I16,
            args: vec![IrOperand::VReg(VReg(1)), IrOperand::VReg(VReg(2))],
        };
        assert_eq!(instr.to_string(), "%3 = add i16 %1, %2");
    }

    #[test]
    fn test_call_roundtrip() {
        let text = "proc @f() i16 {\nentry:\n    %0 = call i16 @g, 1, %1\n    ret i16 %0\n}\n";
        let module = parse_module(text).unwrap();
        let proc = module.procs().next().unwrap();
        assert_eq!(
            proc.blocks[0].instrs[0].args,
            vec![
                IrOperand::Sym("g".to_string()),
                IrOperand::Imm(1),
                IrOperand::VReg(VReg(1))
            ]
        );
        assert_eq!(parse_module(&module.to_string()).unwrap(), module);
    }

    #[test]
    fn test_addr_entry_roundtrip() {
        let text = "data @p 2 { ptr @g+4 }\n";
        let module = parse_module(text).unwrap();
        assert_eq!(
            module.data().next().unwrap().entries[0],
            IrDataEntry::Addr {
                sym: "g".to_string(),
                offset: 4
            }
        );
        assert_eq!(module.to_string(), text);
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let text = "proc @f() void {\nentry:\n    %0 = imm i16 1\n}\n";
        assert!(parse_module(text).is_err());
    }

    #[test]
    fn test_asm_string_roundtrip() {
        let text = "proc @f() void {\nentry:\n    asm void \"ld a, 1\\n\"\n    ret\n}\n";
        let module = parse_module(text).unwrap();
        assert_eq!(
            module.procs().next().unwrap().blocks[0].instrs[0].args[0],
            IrOperand::Str("ld a, 1\n".to_string())
        );
        assert_eq!(parse_module(&module.to_string()).unwrap(), module);
    }
}
