//! Z80 instruction representation
//!
//! Instructions as mnemonic plus operand list, printable as assembler
//! text. Before register allocation the operand set includes virtual
//! 16-bit register pairs (`vrr3`) and their 8-bit halves (`vr3.l`,
//! `vr3.h`) alongside the physical registers; a later allocation pass
//! (out of scope here) rewrites those onto the machine set. Printing is
//! deterministic: the same module always renders byte-identical text.

use bitflags::bitflags;
use std::fmt;

/// Physical 8-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

impl fmt::Display for Reg8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reg8::A => "a",
            Reg8::B => "b",
            Reg8::C => "c",
            Reg8::D => "d",
            Reg8::E => "e",
            Reg8::H => "h",
            Reg8::L => "l",
        };
        write!(f, "{}", s)
    }
}

/// Physical register pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    AF,
    BC,
    DE,
    HL,
    IX,
    IY,
    SP,
}

impl fmt::Display for Reg16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reg16::AF => "af",
            Reg16::BC => "bc",
            Reg16::DE => "de",
            Reg16::HL => "hl",
            Reg16::IX => "ix",
            Reg16::IY => "iy",
            Reg16::SP => "sp",
        };
        write!(f, "{}", s)
    }
}

/// Condition codes for conditional jumps, calls and returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    NZ,
    Z,
    NC,
    C,
    PO,
    PE,
    P,
    M,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::NZ => "nz",
            Cond::Z => "z",
            Cond::NC => "nc",
            Cond::C => "c",
            Cond::PO => "po",
            Cond::PE => "pe",
            Cond::P => "p",
            Cond::M => "m",
        };
        write!(f, "{}", s)
    }
}

/// A virtual 16-bit register pair, unbounded and uniquely numbered
/// within a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vrr(pub u32);

impl fmt::Display for Vrr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vrr{}", self.0)
    }
}

/// Halves of a virtual register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrPart {
    L,
    H,
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(Reg8),
    Reg16(Reg16),
    /// 8-bit half of a virtual pair: `vr3.l` / `vr3.h`.
    Vr(Vrr, VrPart),
    /// Whole virtual pair: `vrr3`.
    Vrr(Vrr),
    Imm8(u8),
    Imm16(u16),
    /// Memory through HL: `(hl)`.
    IndHL,
    /// Memory through DE: `(de)`.
    IndDE,
    /// Indexed frame access: `(ix+4)` / `(ix-2)`.
    IndIx(i16),
    /// Label or symbol reference, optionally with an addend.
    Sym(String, i64),
    Cond(Cond),
}

impl Operand {
    pub fn sym(name: impl Into<String>) -> Operand {
        Operand::Sym(name.into(), 0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Reg16(r) => write!(f, "{}", r),
            Operand::Vr(vrr, VrPart::L) => write!(f, "vr{}.l", vrr.0),
            Operand::Vr(vrr, VrPart::H) => write!(f, "vr{}.h", vrr.0),
            Operand::Vrr(vrr) => write!(f, "{}", vrr),
            Operand::Imm8(v) => write!(f, "{}", v),
            Operand::Imm16(v) => write!(f, "{}", v),
            Operand::IndHL => write!(f, "(hl)"),
            Operand::IndDE => write!(f, "(de)"),
            Operand::IndIx(d) => {
                if *d >= 0 {
                    write!(f, "(ix+{})", d)
                } else {
                    write!(f, "(ix{})", d)
                }
            }
            Operand::Sym(name, 0) => write!(f, "{}", name),
            Operand::Sym(name, off) if *off > 0 => write!(f, "{}+{}", name, off),
            Operand::Sym(name, off) => write!(f, "{}{}", name, off),
            Operand::Cond(c) => write!(f, "{}", c),
        }
    }
}

/// Mnemonics emitted by the instruction selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnem {
    Ld,
    Push,
    Pop,
    Ex,
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Xor,
    Cp,
    Inc,
    Dec,
    Neg,
    Cpl,
    Rla,
    Rra,
    Sla,
    Sra,
    Srl,
    Rl,
    Rr,
    Jp,
    Jr,
    Djnz,
    Call,
    Ret,
    Ldir,
    Nop,
    Halt,
    Scf,
    Ccf,
}

impl fmt::Display for Mnem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mnem::Ld => "ld",
            Mnem::Push => "push",
            Mnem::Pop => "pop",
            Mnem::Ex => "ex",
            Mnem::Add => "add",
            Mnem::Adc => "adc",
            Mnem::Sub => "sub",
            Mnem::Sbc => "sbc",
            Mnem::And => "and",
            Mnem::Or => "or",
            Mnem::Xor => "xor",
            Mnem::Cp => "cp",
            Mnem::Inc => "inc",
            Mnem::Dec => "dec",
            Mnem::Neg => "neg",
            Mnem::Cpl => "cpl",
            Mnem::Rla => "rla",
            Mnem::Rra => "rra",
            Mnem::Sla => "sla",
            Mnem::Sra => "sra",
            Mnem::Srl => "srl",
            Mnem::Rl => "rl",
            Mnem::Rr => "rr",
            Mnem::Jp => "jp",
            Mnem::Jr => "jr",
            Mnem::Djnz => "djnz",
            Mnem::Call => "call",
            Mnem::Ret => "ret",
            Mnem::Ldir => "ldir",
            Mnem::Nop => "nop",
            Mnem::Halt => "halt",
            Mnem::Scf => "scf",
            Mnem::Ccf => "ccf",
        };
        write!(f, "{}", s)
    }
}

/// One instruction: mnemonic plus operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub mnem: Mnem,
    pub ops: Vec<Operand>,
}

impl Instr {
    pub fn new(mnem: Mnem, ops: Vec<Operand>) -> Self {
        Instr { mnem, ops }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnem)?;
        for (i, op) in self.ops.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}

/// One output line of a procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Label(String),
    Instr(Instr),
    /// Inline assembler template text, passed through untouched.
    Verbatim(String),
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Label(l) => write!(f, "{}:", l),
            Line::Instr(i) => write!(f, "    {}", i),
            Line::Verbatim(text) => write!(f, "    {}", text),
        }
    }
}

bitflags! {
    /// Procedure-level flags carried over from the IR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Z80ProcFlags: u8 {
        /// User service routine: preserves AF, BC and DE.
        const USR = 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Z80Proc {
    /// Exported symbol, `_`-prefixed C name.
    pub name: String,
    pub flags: Z80ProcFlags,
    pub lines: Vec<Line>,
}

impl fmt::Display for Z80Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Assembled data directive.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Byte(u8),
    Word(u16),
    WordSym(String, i64),
    Space(u64),
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::Byte(v) => write!(f, "    defb {}", v),
            DataItem::Word(v) => write!(f, "    defw {}", v),
            DataItem::WordSym(sym, 0) => write!(f, "    defw {}", sym),
            DataItem::WordSym(sym, off) if *off > 0 => write!(f, "    defw {}+{}", sym, off),
            DataItem::WordSym(sym, off) => write!(f, "    defw {}{}", sym, off),
            DataItem::Space(n) => write!(f, "    defs {}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Z80Data {
    pub name: String,
    pub readonly: bool,
    pub items: Vec<DataItem>,
}

impl fmt::Display for Z80Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for item in &self.items {
            writeln!(f, "{}", item)?;
        }
        Ok(())
    }
}

/// A selected module: procedures and data in IR order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Z80Module {
    pub procs: Vec<Z80Proc>,
    pub data: Vec<Z80Data>,
}

impl fmt::Display for Z80Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.procs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", p)?;
        }
        if !self.procs.is_empty() && !self.data.is_empty() {
            writeln!(f)?;
        }
        for (i, d) in self.data.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instr_display() {
        let i = Instr::new(
            Mnem::Ld,
            vec![Operand::Reg16(Reg16::HL), Operand::Vrr(Vrr(3))],
        );
        assert_eq!(i.to_string(), "ld hl, vrr3");
        let i = Instr::new(
            Mnem::Ld,
            vec![Operand::Vr(Vrr(2), VrPart::H), Operand::Reg(Reg8::A)],
        );
        assert_eq!(i.to_string(), "ld vr2.h, a");
    }

    #[test]
    fn test_ix_displacement_display() {
        assert_eq!(Operand::IndIx(4).to_string(), "(ix+4)");
        assert_eq!(Operand::IndIx(-6).to_string(), "(ix-6)");
    }

    #[test]
    fn test_cond_jump_display() {
        let i = Instr::new(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NZ), Operand::sym(".f_body")],
        );
        assert_eq!(i.to_string(), "jp nz, .f_body");
    }

    #[test]
    fn test_data_display() {
        let d = Z80Data {
            name: "_g".to_string(),
            readonly: false,
            items: vec![
                DataItem::Byte(7),
                DataItem::Word(258),
                DataItem::WordSym("_other".to_string(), 4),
                DataItem::Space(10),
            ],
        };
        let text = d.to_string();
        assert!(text.contains("defb 7"));
        assert!(text.contains("defw 258"));
        assert!(text.contains("defw _other+4"));
        assert!(text.contains("defs 10"));
    }

    #[test]
    fn test_module_display_deterministic() {
        let module = Z80Module {
            procs: vec![Z80Proc {
                name: "_f".to_string(),
                flags: Z80ProcFlags::default(),
                lines: vec![
                    Line::Label(".f_entry".to_string()),
                    Line::Instr(Instr::new(Mnem::Ret, vec![])),
                ],
            }],
            data: vec![],
        };
        assert_eq!(module.to_string(), module.to_string());
        assert!(module.to_string().contains("_f:\n.f_entry:\n    ret\n"));
    }
}
