//! Z80 instruction selection
//!
//! Maximal-munch translation of IR instructions onto Z80 sequences over
//! virtual registers. Every IR virtual register maps to a run of
//! virtual 16-bit pairs; operations wider than 16 bits are synthesized
//! as word loops with explicit carry propagation, so 32-, 64- and
//! 128-bit arithmetic all come out of the same patterns. 8-bit
//! operations go through the A accumulator, 16-bit ones through HL with
//! DE as the second operand.
//!
//! The selector does not recover: IR it cannot lower is an internal
//! error, not a user diagnostic. Output is deterministic.
//!
//! Calling convention: arguments are pushed right-to-left, each padded
//! to a whole number of 16-bit words; results return in A (8 bits),
//! HL (16) or DE:HL (32). Wider results arrive through a hidden pointer
//! argument, which the IR generator already arranged. `usr` procedures
//! additionally preserve BC and DE. The frame pointer is IX: arguments
//! at positive displacements, locals at negative ones.

use crate::CompileError;
use crate::ir::{
    IrBlock, IrData, IrDataEntry, IrEntry, IrInstr, IrModule, IrOp, IrOperand, IrProc, IrTerm,
    IrType, ProcAttrs,
};
use crate::z80::{
    Cond, DataItem, Instr, Line, Mnem, Operand, Reg8, Reg16, VrPart, Vrr, Z80Data, Z80Module,
    Z80Proc, Z80ProcFlags,
};
use std::collections::HashMap;

/// Lower an IR module to Z80 instructions over virtual registers.
pub fn select(module: &IrModule) -> Result<Z80Module, CompileError> {
    let mut out = Z80Module::default();
    for entry in &module.entries {
        match entry {
            IrEntry::Proc(p) => out.procs.push(ProcSel::new(p).run()?),
            IrEntry::Data(d) => out.data.push(select_data(d)),
        }
    }
    Ok(out)
}

/// C-visible symbols get an underscore; internal names (string
/// literals) get two so they cannot collide with user code.
fn mangle(name: &str) -> String {
    match name.strip_prefix('.') {
        Some(rest) => format!("__{}", rest),
        None => format!("_{}", name),
    }
}

fn select_data(d: &IrData) -> Z80Data {
    let mut items = Vec::new();
    for entry in &d.entries {
        match entry {
            IrDataEntry::Int(ty, v) => {
                let bytes = ty.size().max(1);
                if bytes == 1 {
                    items.push(DataItem::Byte(*v as u8));
                } else {
                    for i in 0..bytes / 2 {
                        items.push(DataItem::Word((*v >> (16 * i)) as u16));
                    }
                }
            }
            IrDataEntry::Addr { sym, offset } => {
                items.push(DataItem::WordSym(mangle(sym), *offset));
            }
            IrDataEntry::Zero(n) => {
                if *n > 0 {
                    items.push(DataItem::Space(*n));
                }
            }
        }
    }
    Z80Data {
        name: mangle(&d.name),
        readonly: d.readonly,
        items,
    }
}

/// Round a byte count up to whole 16-bit words.
fn words_of(bytes: u64) -> u32 {
    (bytes.div_ceil(2)).max(1) as u32
}

struct ProcSel<'a> {
    proc: &'a IrProc,
    lines: Vec<Line>,
    /// IR vreg number -> (first virtual pair, width in bytes).
    vmap: HashMap<u32, (u32, u64)>,
    next_vrr: u32,
    next_tmp: u32,
    /// Slot name -> IX displacement (args positive, locals negative).
    frame: HashMap<String, i16>,
    frame_size: u64,
}

impl<'a> ProcSel<'a> {
    fn new(proc: &'a IrProc) -> Self {
        let mut frame = HashMap::new();
        // saved IX and the return address sit at (ix+0) and (ix+2)
        let mut arg_off: i16 = 4;
        for (name, ty) in &proc.args {
            frame.insert(name.clone(), arg_off);
            arg_off += (words_of(ty.size().max(1)) * 2) as i16;
        }
        let mut local_off: i16 = 0;
        for (name, size) in &proc.lvars {
            let rounded = (words_of(*size) * 2) as i16;
            local_off -= rounded;
            frame.insert(name.clone(), local_off);
        }
        ProcSel {
            proc,
            lines: Vec::new(),
            vmap: HashMap::new(),
            next_vrr: 0,
            next_tmp: 0,
            frame,
            frame_size: (-local_off) as u64,
        }
    }

    fn internal<T>(&self, what: &str) -> Result<T, CompileError> {
        Err(CompileError::Internal(format!(
            "instruction selector: {} (in '{}')",
            what, self.proc.name
        )))
    }

    // -- emission helpers -------------------------------------------------

    fn emit(&mut self, mnem: Mnem, ops: Vec<Operand>) {
        self.lines.push(Line::Instr(Instr::new(mnem, ops)));
    }

    fn label(&mut self, label: String) {
        self.lines.push(Line::Label(label));
    }

    fn blk_label(&self, label: &str) -> String {
        format!(".{}_{}", self.proc.name, label)
    }

    fn tmp_label(&mut self, base: &str) -> String {
        let l = format!(".{}__{}{}", self.proc.name, base, self.next_tmp);
        self.next_tmp += 1;
        l
    }

    /// Allocate a run of fresh virtual pairs.
    fn fresh(&mut self, bytes: u64) -> u32 {
        let base = self.next_vrr;
        self.next_vrr += words_of(bytes);
        base
    }

    fn vreg(&mut self, n: u32, bytes: u64) -> (u32, u64) {
        if let Some(&entry) = self.vmap.get(&n) {
            return entry;
        }
        let base = self.fresh(bytes);
        self.vmap.insert(n, (base, bytes));
        (base, bytes)
    }

    fn arg_vreg(&mut self, instr: &IrInstr, i: usize, bytes: u64) -> Result<u32, CompileError> {
        match instr.args.get(i) {
            Some(IrOperand::VReg(vr)) => Ok(self.vreg(vr.0, bytes).0),
            _ => self.internal(&format!("operand {} of '{}' is not a vreg", i, instr.op.name())),
        }
    }

    fn dest(&mut self, instr: &IrInstr, bytes: u64) -> Result<u32, CompileError> {
        match instr.dest {
            Some(vr) => Ok(self.vreg(vr.0, bytes).0),
            None => self.internal(&format!("'{}' without destination", instr.op.name())),
        }
    }

    /// `vrrN` operand for word `i` of a run.
    fn w(base: u32, i: u32) -> Operand {
        Operand::Vrr(Vrr(base + i))
    }

    /// 8-bit operand for byte `j` of a run (little-endian).
    fn b(base: u32, j: u64) -> Operand {
        let part = if j % 2 == 0 { VrPart::L } else { VrPart::H };
        Operand::Vr(Vrr(base + (j / 2) as u32), part)
    }

    fn ld(&mut self, dst: Operand, src: Operand) {
        self.emit(Mnem::Ld, vec![dst, src]);
    }

    fn a(&self) -> Operand {
        Operand::Reg(Reg8::A)
    }

    fn hl(&self) -> Operand {
        Operand::Reg16(Reg16::HL)
    }

    fn de(&self) -> Operand {
        Operand::Reg16(Reg16::DE)
    }

    /// Copy `bytes` worth of a virtual run.
    fn copy_run(&mut self, dst: u32, src: u32, bytes: u64) {
        if dst == src {
            return;
        }
        if bytes == 1 {
            self.ld(Self::b(dst, 0), Self::b(src, 0));
            return;
        }
        for i in 0..words_of(bytes) {
            self.ld(Self::w(dst, i), Self::w(src, i));
        }
    }

    fn zero_run(&mut self, dst: u32, bytes: u64) {
        if bytes == 1 {
            self.ld(Self::b(dst, 0), Operand::Imm8(0));
            return;
        }
        for i in 0..words_of(bytes) {
            self.ld(Self::w(dst, i), Operand::Imm16(0));
        }
    }

    // -- procedure shell --------------------------------------------------

    fn run(mut self) -> Result<Z80Proc, CompileError> {
        let usr = self.proc.attrs.contains(ProcAttrs::USR);

        // prologue: frame pointer, local space, callee-saved registers
        self.emit(Mnem::Push, vec![Operand::Reg16(Reg16::IX)]);
        self.ld(Operand::Reg16(Reg16::IX), Operand::Imm16(0));
        self.emit(
            Mnem::Add,
            vec![Operand::Reg16(Reg16::IX), Operand::Reg16(Reg16::SP)],
        );
        if self.frame_size > 0 {
            let disp = (self.frame_size as u16).wrapping_neg();
            self.ld(self.hl(), Operand::Imm16(disp));
            self.emit(Mnem::Add, vec![self.hl(), Operand::Reg16(Reg16::SP)]);
            self.ld(Operand::Reg16(Reg16::SP), self.hl());
        }
        if usr {
            self.emit(Mnem::Push, vec![Operand::Reg16(Reg16::BC)]);
            self.emit(Mnem::Push, vec![Operand::Reg16(Reg16::DE)]);
        }

        let blocks: &[IrBlock] = &self.proc.blocks;
        for block in blocks {
            let label = self.blk_label(&block.label);
            self.label(label);
            for instr in &block.instrs {
                self.instr(instr)?;
            }
            self.term(&block.term)?;
        }

        Ok(Z80Proc {
            name: mangle(&self.proc.name),
            flags: if usr {
                Z80ProcFlags::USR
            } else {
                Z80ProcFlags::default()
            },
            lines: self.lines,
        })
    }

    fn epilogue(&mut self) {
        if self.proc.attrs.contains(ProcAttrs::USR) {
            self.emit(Mnem::Pop, vec![Operand::Reg16(Reg16::DE)]);
            self.emit(Mnem::Pop, vec![Operand::Reg16(Reg16::BC)]);
        }
        self.ld(Operand::Reg16(Reg16::SP), Operand::Reg16(Reg16::IX));
        self.emit(Mnem::Pop, vec![Operand::Reg16(Reg16::IX)]);
        self.emit(Mnem::Ret, vec![]);
    }

    fn term(&mut self, term: &IrTerm) -> Result<(), CompileError> {
        match term {
            IrTerm::Jump { target } => {
                let l = self.blk_label(target);
                self.emit(Mnem::Jp, vec![Operand::Sym(l, 0)]);
            }
            IrTerm::Branch {
                cond,
                then_label,
                else_label,
            } => {
                let vr = match cond {
                    IrOperand::VReg(vr) => self.vreg(vr.0, 1).0,
                    _ => return self.internal("branch condition is not a vreg"),
                };
                self.ld(self.a(), Self::b(vr, 0));
                self.emit(Mnem::Or, vec![self.a()]);
                let t = self.blk_label(then_label);
                let e = self.blk_label(else_label);
                self.emit(Mnem::Jp, vec![Operand::Cond(Cond::NZ), Operand::Sym(t, 0)]);
                self.emit(Mnem::Jp, vec![Operand::Sym(e, 0)]);
            }
            IrTerm::Ret { ty, value } => {
                if let Some(v) = value {
                    let vr = match v {
                        IrOperand::VReg(vr) => self.vreg(vr.0, ty.size().max(1)).0,
                        _ => return self.internal("return value is not a vreg"),
                    };
                    match ty.size() {
                        1 => self.ld(self.a(), Self::b(vr, 0)),
                        2 => self.ld(self.hl(), Self::w(vr, 0)),
                        4 => {
                            self.ld(self.hl(), Self::w(vr, 0));
                            self.ld(self.de(), Self::w(vr, 1));
                        }
                        _ => {
                            return self.internal("return value too wide for registers");
                        }
                    }
                }
                self.epilogue();
            }
        }
        Ok(())
    }

    // -- instruction lowering ---------------------------------------------

    fn instr(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        let bytes = instr.ty.size().max(1);
        match instr.op {
            IrOp::Imm => {
                let value = match instr.args.first() {
                    Some(IrOperand::Imm(v)) => *v,
                    _ => return self.internal("imm without constant"),
                };
                let d = self.dest(instr, bytes)?;
                if bytes == 1 {
                    self.ld(Self::b(d, 0), Operand::Imm8(value as u8));
                } else {
                    for i in 0..words_of(bytes) {
                        let word = (value >> (16 * i)) as u16;
                        self.ld(Self::w(d, i), Operand::Imm16(word));
                    }
                }
            }
            IrOp::Copy => {
                let s = self.arg_vreg(instr, 0, bytes)?;
                let d = self.dest(instr, bytes)?;
                self.copy_run(d, s, bytes);
            }
            IrOp::Add | IrOp::Sub => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, bytes)?;
                self.add_sub(d, l, r, bytes, instr.op == IrOp::Sub);
            }
            IrOp::And | IrOp::Or | IrOp::Xor => {
                let mnem = match instr.op {
                    IrOp::And => Mnem::And,
                    IrOp::Or => Mnem::Or,
                    _ => Mnem::Xor,
                };
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, bytes)?;
                for j in 0..bytes {
                    self.ld(self.a(), Self::b(l, j));
                    self.emit(mnem, vec![Self::b(r, j)]);
                    self.ld(Self::b(d, j), self.a());
                }
            }
            IrOp::Bnot => {
                let s = self.arg_vreg(instr, 0, bytes)?;
                let d = self.dest(instr, bytes)?;
                for j in 0..bytes {
                    self.ld(self.a(), Self::b(s, j));
                    self.emit(Mnem::Cpl, vec![]);
                    self.ld(Self::b(d, j), self.a());
                }
            }
            IrOp::Neg => {
                let s = self.arg_vreg(instr, 0, bytes)?;
                let d = self.dest(instr, bytes)?;
                self.negate(d, s, bytes);
            }
            IrOp::Mul => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, bytes)?;
                self.mul(d, l, r, bytes);
            }
            IrOp::Udiv | IrOp::Urem => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, bytes)?;
                self.udivmod(d, l, r, bytes, instr.op == IrOp::Urem);
            }
            IrOp::Sdiv | IrOp::Srem => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, bytes)?;
                self.sdivmod(d, l, r, bytes, instr.op == IrOp::Srem);
            }
            IrOp::Shl | IrOp::Sra | IrOp::Srl => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, 1)?;
                let d = self.dest(instr, bytes)?;
                self.shift(instr.op, d, l, r, bytes);
            }
            IrOp::Eq | IrOp::Neq => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, 1)?;
                self.equality(d, l, r, bytes, instr.op == IrOp::Neq);
            }
            IrOp::Ult | IrOp::Ulteq | IrOp::Ugt | IrOp::Ugteq => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, 1)?;
                self.unsigned_compare(instr.op, d, l, r, bytes);
            }
            IrOp::Slt | IrOp::Slteq | IrOp::Sgt | IrOp::Sgteq => {
                let l = self.arg_vreg(instr, 0, bytes)?;
                let r = self.arg_vreg(instr, 1, bytes)?;
                let d = self.dest(instr, 1)?;
                self.signed_compare(instr.op, d, l, r, bytes);
            }
            IrOp::Sext | IrOp::Zext | IrOp::Trunc => {
                let src = match instr.args.first() {
                    Some(IrOperand::VReg(vr)) => *vr,
                    _ => return self.internal("conversion operand is not a vreg"),
                };
                let (s, sbytes) = match self.vmap.get(&src.0) {
                    Some(&e) => e,
                    None => return self.internal("conversion of an undefined vreg"),
                };
                let d = self.dest(instr, bytes)?;
                self.convert(instr.op, d, s, sbytes, bytes);
            }
            IrOp::Read => {
                let a = self.arg_vreg(instr, 0, 2)?;
                let d = self.dest(instr, bytes)?;
                self.ld(self.hl(), Self::w(a, 0));
                for j in 0..bytes {
                    self.ld(self.a(), Operand::IndHL);
                    self.ld(Self::b(d, j), self.a());
                    if j + 1 < bytes {
                        self.emit(Mnem::Inc, vec![self.hl()]);
                    }
                }
            }
            IrOp::Write => {
                let a = self.arg_vreg(instr, 0, 2)?;
                let v = self.arg_vreg(instr, 1, bytes)?;
                self.ld(self.hl(), Self::w(a, 0));
                for j in 0..bytes {
                    self.ld(self.a(), Self::b(v, j));
                    self.ld(Operand::IndHL, self.a());
                    if j + 1 < bytes {
                        self.emit(Mnem::Inc, vec![self.hl()]);
                    }
                }
            }
            IrOp::Lvarptr => {
                let name = match instr.args.first() {
                    Some(IrOperand::Local(name)) => name.clone(),
                    _ => return self.internal("lvarptr without a slot name"),
                };
                let disp = match self.frame.get(&name) {
                    Some(&d) => d,
                    None => return self.internal(&format!("unknown slot '{}'", name)),
                };
                let d = self.dest(instr, 2)?;
                self.emit(Mnem::Push, vec![Operand::Reg16(Reg16::IX)]);
                self.emit(Mnem::Pop, vec![self.hl()]);
                self.ld(self.de(), Operand::Imm16(disp as u16));
                self.emit(Mnem::Add, vec![self.hl(), self.de()]);
                self.ld(Self::w(d, 0), self.hl());
            }
            IrOp::Gvarptr => {
                let name = match instr.args.first() {
                    Some(IrOperand::Sym(name)) => name.clone(),
                    _ => return self.internal("gvarptr without a symbol"),
                };
                let d = self.dest(instr, 2)?;
                self.ld(Self::w(d, 0), Operand::Sym(mangle(&name), 0));
            }
            IrOp::Call | IrOp::Calli => self.call(instr, bytes)?,
            IrOp::Copymem => {
                let dst = self.arg_vreg(instr, 0, 2)?;
                let src = self.arg_vreg(instr, 1, 2)?;
                let size = match instr.args.get(2) {
                    Some(IrOperand::Imm(n)) => *n,
                    _ => return self.internal("copymem without a size"),
                };
                self.ld(self.hl(), Self::w(src, 0));
                self.ld(self.de(), Self::w(dst, 0));
                self.ld(Operand::Reg16(Reg16::BC), Operand::Imm16(size as u16));
                self.emit(Mnem::Ldir, vec![]);
            }
            IrOp::Asm => {
                let template = match instr.args.first() {
                    Some(IrOperand::Str(text)) => text.clone(),
                    _ => return self.internal("asm without a template"),
                };
                for line in template.lines() {
                    if !line.trim().is_empty() {
                        self.lines.push(Line::Verbatim(line.trim().to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    // -- arithmetic synthesis ---------------------------------------------

    /// Addition and subtraction: A for 8 bits, HL/DE word chains with
    /// carry propagation beyond.
    fn add_sub(&mut self, d: u32, l: u32, r: u32, bytes: u64, sub: bool) {
        if bytes == 1 {
            self.ld(self.a(), Self::b(l, 0));
            let mnem = if sub { Mnem::Sub } else { Mnem::Add };
            self.emit(mnem, vec![Self::b(r, 0)]);
            self.ld(Self::b(d, 0), self.a());
            return;
        }
        for i in 0..words_of(bytes) {
            self.ld(self.hl(), Self::w(l, i));
            self.ld(self.de(), Self::w(r, i));
            if sub {
                if i == 0 {
                    // clear carry before the first borrow
                    self.emit(Mnem::Or, vec![self.a()]);
                }
                self.emit(Mnem::Sbc, vec![self.hl(), self.de()]);
            } else if i == 0 {
                self.emit(Mnem::Add, vec![self.hl(), self.de()]);
            } else {
                self.emit(Mnem::Adc, vec![self.hl(), self.de()]);
            }
            self.ld(Self::w(d, i), self.hl());
        }
    }

    /// Two's complement negation as `0 - x`.
    fn negate(&mut self, d: u32, s: u32, bytes: u64) {
        if bytes == 1 {
            self.ld(self.a(), Self::b(s, 0));
            self.emit(Mnem::Neg, vec![]);
            self.ld(Self::b(d, 0), self.a());
            return;
        }
        self.emit(Mnem::Or, vec![self.a()]);
        for i in 0..words_of(bytes) {
            self.ld(self.hl(), Operand::Imm16(0));
            self.ld(self.de(), Self::w(s, i));
            self.emit(Mnem::Sbc, vec![self.hl(), self.de()]);
            self.ld(Self::w(d, i), self.hl());
        }
    }

    /// Shift a whole run left one bit (low byte first).
    fn shift_left_once(&mut self, base: u32, bytes: u64) {
        for j in 0..bytes {
            let mnem = if j == 0 { Mnem::Sla } else { Mnem::Rl };
            self.emit(mnem, vec![Self::b(base, j)]);
        }
    }

    /// Shift a whole run right one bit; `arith` keeps the sign.
    fn shift_right_once(&mut self, base: u32, bytes: u64, arith: bool) {
        for j in (0..bytes).rev() {
            let mnem = if j + 1 == bytes {
                if arith { Mnem::Sra } else { Mnem::Srl }
            } else {
                Mnem::Rr
            };
            self.emit(mnem, vec![Self::b(base, j)]);
        }
    }

    /// Open-coded shift-and-add multiplication at full width: the
    /// multiplier shifts right bit by bit, the multiplicand doubles,
    /// and set bits add into the accumulator.
    fn mul(&mut self, d: u32, l: u32, r: u32, bytes: u64) {
        let m = self.fresh(bytes); // running multiplicand
        let q = self.fresh(bytes); // multiplier being consumed
        let acc = self.fresh(bytes);
        let cnt = self.fresh(1);
        self.copy_run(m, l, bytes);
        self.copy_run(q, r, bytes);
        self.zero_run(acc, bytes);
        self.ld(Self::b(cnt, 0), Operand::Imm8((bytes * 8) as u8));

        let loop_l = self.tmp_label("mul");
        let skip_l = self.tmp_label("mulskip");
        self.label(loop_l.clone());
        self.shift_right_once(q, bytes, false);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NC), Operand::Sym(skip_l.clone(), 0)],
        );
        self.add_sub(acc, acc, m, bytes, false);
        self.label(skip_l);
        self.shift_left_once(m, bytes);
        self.ld(self.a(), Self::b(cnt, 0));
        self.emit(Mnem::Dec, vec![self.a()]);
        self.ld(Self::b(cnt, 0), self.a());
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NZ), Operand::Sym(loop_l, 0)],
        );
        self.copy_run(d, acc, bytes);
    }

    /// Restoring division: the dividend shifts left into the remainder,
    /// which the divisor is subtracted from and added back on borrow.
    fn udivmod(&mut self, d: u32, l: u32, r: u32, bytes: u64, want_rem: bool) {
        let n = self.fresh(bytes); // dividend being consumed
        let rem = self.fresh(bytes);
        let quo = self.fresh(bytes);
        let cnt = self.fresh(1);
        self.copy_run(n, l, bytes);
        self.zero_run(rem, bytes);
        self.zero_run(quo, bytes);
        self.ld(Self::b(cnt, 0), Operand::Imm8((bytes * 8) as u8));

        let loop_l = self.tmp_label("div");
        let restore_l = self.tmp_label("divrest");
        let quot_l = self.tmp_label("divq");
        self.label(loop_l.clone());
        // next dividend bit into the remainder
        self.shift_left_once(n, bytes);
        for j in 0..bytes {
            self.emit(Mnem::Rl, vec![Self::b(rem, j)]);
        }
        // rem -= divisor
        self.add_sub(rem, rem, r, bytes, true);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::C), Operand::Sym(restore_l.clone(), 0)],
        );
        self.emit(Mnem::Scf, vec![]);
        self.emit(Mnem::Jp, vec![Operand::Sym(quot_l.clone(), 0)]);
        self.label(restore_l);
        self.add_sub(rem, rem, r, bytes, false);
        self.emit(Mnem::Or, vec![self.a()]); // carry = 0
        self.label(quot_l);
        for j in 0..bytes {
            self.emit(Mnem::Rl, vec![Self::b(quo, j)]);
        }
        self.ld(self.a(), Self::b(cnt, 0));
        self.emit(Mnem::Dec, vec![self.a()]);
        self.ld(Self::b(cnt, 0), self.a());
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NZ), Operand::Sym(loop_l, 0)],
        );
        self.copy_run(d, if want_rem { rem } else { quo }, bytes);
    }

    /// Signed division via unsigned division on magnitudes, fixing the
    /// result sign afterwards. The remainder takes the dividend's sign.
    fn sdivmod(&mut self, d: u32, l: u32, r: u32, bytes: u64, want_rem: bool) {
        let labs = self.fresh(bytes);
        let rabs = self.fresh(bytes);
        let sign = self.fresh(1);
        self.copy_run(labs, l, bytes);
        self.copy_run(rabs, r, bytes);

        // result sign: quotient flips when operand signs differ, the
        // remainder follows the dividend
        let ltop = Self::b(l, bytes - 1);
        let rtop = Self::b(r, bytes - 1);
        self.ld(self.a(), ltop.clone());
        if !want_rem {
            self.emit(Mnem::Xor, vec![rtop]);
        }
        self.ld(Self::b(sign, 0), self.a());

        // take magnitudes
        let lpos = self.tmp_label("sdivl");
        self.ld(self.a(), ltop);
        self.emit(Mnem::Rla, vec![]);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NC), Operand::Sym(lpos.clone(), 0)],
        );
        self.negate(labs, labs, bytes);
        self.label(lpos);
        let rpos = self.tmp_label("sdivr");
        self.ld(self.a(), Self::b(r, bytes - 1));
        self.emit(Mnem::Rla, vec![]);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NC), Operand::Sym(rpos.clone(), 0)],
        );
        self.negate(rabs, rabs, bytes);
        self.label(rpos);

        self.udivmod(d, labs, rabs, bytes, want_rem);

        let done = self.tmp_label("sdivd");
        self.ld(self.a(), Self::b(sign, 0));
        self.emit(Mnem::Rla, vec![]);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NC), Operand::Sym(done.clone(), 0)],
        );
        self.negate(d, d, bytes);
        self.label(done);
    }

    /// Variable-count shift as a single-bit loop.
    fn shift(&mut self, op: IrOp, d: u32, l: u32, r: u32, bytes: u64) {
        self.copy_run(d, l, bytes);
        let done = self.tmp_label("shdone");
        let loop_l = self.tmp_label("shloop");
        self.ld(self.a(), Self::b(r, 0));
        self.emit(Mnem::Or, vec![self.a()]);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::Z), Operand::Sym(done.clone(), 0)],
        );
        self.label(loop_l.clone());
        match op {
            IrOp::Shl => self.shift_left_once(d, bytes),
            IrOp::Sra => self.shift_right_once(d, bytes, true),
            _ => self.shift_right_once(d, bytes, false),
        }
        self.emit(Mnem::Dec, vec![self.a()]);
        self.emit(
            Mnem::Jp,
            vec![Operand::Cond(Cond::NZ), Operand::Sym(loop_l, 0)],
        );
        self.label(done);
    }

    /// Equality: OR together the XOR of every byte pair, then collapse
    /// the result to 0 or 1.
    fn equality(&mut self, d: u32, l: u32, r: u32, bytes: u64, negate: bool) {
        let acc = self.fresh(1);
        for j in 0..bytes {
            self.ld(self.a(), Self::b(l, j));
            self.emit(Mnem::Xor, vec![Self::b(r, j)]);
            if j > 0 {
                self.emit(Mnem::Or, vec![Self::b(acc, 0)]);
            }
            if j + 1 < bytes {
                self.ld(Self::b(acc, 0), self.a());
            }
        }
        // a == 0 exactly when the operands were equal
        self.emit(Mnem::Cp, vec![Operand::Imm8(1)]);
        self.emit(Mnem::Sbc, vec![self.a(), self.a()]);
        if negate {
            self.emit(Mnem::Inc, vec![self.a()]);
        } else {
            self.emit(Mnem::And, vec![Operand::Imm8(1)]);
        }
        self.ld(Self::b(d, 0), self.a());
    }

    /// `l < r` unsigned: the borrow out of a full-width subtract.
    fn ult_into_a(&mut self, l: u32, r: u32, bytes: u64) {
        if bytes == 1 {
            self.ld(self.a(), Self::b(l, 0));
            self.emit(Mnem::Sub, vec![Self::b(r, 0)]);
        } else {
            for i in 0..words_of(bytes) {
                self.ld(self.hl(), Self::w(l, i));
                self.ld(self.de(), Self::w(r, i));
                if i == 0 {
                    self.emit(Mnem::Or, vec![self.a()]);
                }
                self.emit(Mnem::Sbc, vec![self.hl(), self.de()]);
            }
        }
        // carry -> 0xff, no carry -> 0
        self.emit(Mnem::Sbc, vec![self.a(), self.a()]);
        self.emit(Mnem::And, vec![Operand::Imm8(1)]);
    }

    fn unsigned_compare(&mut self, op: IrOp, d: u32, l: u32, r: u32, bytes: u64) {
        let (a, b, invert) = match op {
            IrOp::Ult => (l, r, false),
            IrOp::Ugt => (r, l, false),
            IrOp::Ulteq => (r, l, true),
            _ => (l, r, true), // ugteq = !(l < r)
        };
        self.ult_into_a(a, b, bytes);
        if invert {
            self.emit(Mnem::Xor, vec![Operand::Imm8(1)]);
        }
        self.ld(Self::b(d, 0), self.a());
    }

    /// Signed comparison: XOR the sign bit of both operands, then
    /// compare unsigned.
    fn signed_compare(&mut self, op: IrOp, d: u32, l: u32, r: u32, bytes: u64) {
        let lt = self.fresh(bytes);
        let rt = self.fresh(bytes);
        self.copy_run(lt, l, bytes);
        self.copy_run(rt, r, bytes);
        for base in [lt, rt] {
            self.ld(self.a(), Self::b(base, bytes - 1));
            self.emit(Mnem::Xor, vec![Operand::Imm8(0x80)]);
            self.ld(Self::b(base, bytes - 1), self.a());
        }
        let uop = match op {
            IrOp::Slt => IrOp::Ult,
            IrOp::Slteq => IrOp::Ulteq,
            IrOp::Sgt => IrOp::Ugt,
            _ => IrOp::Ugteq,
        };
        self.unsigned_compare(uop, d, lt, rt, bytes);
    }

    /// Width conversions. Sign extension replicates the top bit through
    /// the added bytes; zero extension clears them; truncation copies
    /// the low bytes.
    fn convert(&mut self, op: IrOp, d: u32, s: u32, sbytes: u64, dbytes: u64) {
        let copy = sbytes.min(dbytes);
        for j in 0..copy {
            self.ld(self.a(), Self::b(s, j));
            self.ld(Self::b(d, j), self.a());
        }
        if dbytes <= sbytes {
            return;
        }
        match op {
            IrOp::Sext => {
                // A still holds the top source byte
                self.emit(Mnem::Rla, vec![]);
                self.emit(Mnem::Sbc, vec![self.a(), self.a()]);
                for j in copy..dbytes {
                    self.ld(Self::b(d, j), self.a());
                }
            }
            _ => {
                for j in copy..dbytes {
                    self.ld(Self::b(d, j), Operand::Imm8(0));
                }
            }
        }
    }

    /// Calls: arguments push right-to-left, each padded to whole words
    /// with the high word first so the low word lands at the lower
    /// address.
    fn call(&mut self, instr: &IrInstr, ret_bytes: u64) -> Result<(), CompileError> {
        let indirect = instr.op == IrOp::Calli;
        let mut pushed_words: u32 = 0;
        // operand 0 is the callee; the rest are arguments
        let args = &instr.args[1..];
        for arg in args.iter().rev() {
            let vr = match arg {
                IrOperand::VReg(vr) => *vr,
                _ => return self.internal("call argument is not a vreg"),
            };
            let (base, bytes) = match self.vmap.get(&vr.0) {
                Some(&e) => e,
                None => return self.internal("call argument is undefined"),
            };
            let words = words_of(bytes);
            for i in (0..words).rev() {
                self.emit(Mnem::Push, vec![Self::w(base, i)]);
            }
            pushed_words += words;
        }

        if indirect {
            let f = self.arg_vreg(instr, 0, 2)?;
            let ret_l = self.tmp_label("icall");
            self.ld(self.hl(), Operand::Sym(ret_l.clone(), 0));
            self.emit(Mnem::Push, vec![self.hl()]);
            self.ld(self.hl(), Self::w(f, 0));
            self.emit(Mnem::Jp, vec![Operand::IndHL]);
            self.label(ret_l);
        } else {
            let name = match instr.args.first() {
                Some(IrOperand::Sym(name)) => name.clone(),
                _ => return self.internal("call without a callee symbol"),
            };
            self.emit(Mnem::Call, vec![Operand::Sym(mangle(&name), 0)]);
        }

        for _ in 0..pushed_words * 2 {
            self.emit(Mnem::Inc, vec![Operand::Reg16(Reg16::SP)]);
        }

        if let Some(dest) = instr.dest {
            let d = self.vreg(dest.0, ret_bytes).0;
            match ret_bytes {
                1 => self.ld(Self::b(d, 0), self.a()),
                2 => self.ld(Self::w(d, 0), self.hl()),
                4 => {
                    self.ld(Self::w(d, 0), self.hl());
                    self.ld(Self::w(d, 1), self.de());
                }
                _ => return self.internal("call result too wide for registers"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::input::StringSource;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile_z80(src: &str) -> Z80Module {
        let config = CompilerConfig::new();
        let mut source = StringSource::new("t.c", src);
        let lexer = Lexer::new(&mut source);
        let (module, mut diags) = Parser::new(lexer).parse_module().unwrap();
        let ir = crate::cgen::generate(&module, &config, &mut diags).unwrap();
        assert!(
            !diags.has_errors(),
            "unexpected errors: {:?}",
            diags.iter().collect::<Vec<_>>()
        );
        select(&ir).unwrap()
    }

    fn proc_text(m: &Z80Module, name: &str) -> String {
        m.procs
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no proc '{}'", name))
            .to_string()
    }

    #[test]
    fn test_return_zero_loads_hl() {
        let m = compile_z80("int main(void) { return 0; }");
        let text = proc_text(&m, "_main");
        assert!(text.contains("ld vrr0, 0"));
        assert!(text.contains("ld hl, vrr0"));
        assert!(text.ends_with("    ret\n"));
    }

    #[test]
    fn test_global_load_into_hl() {
        let m = compile_z80("int c = 2; int f(void) { return c; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("ld vrr0, _c"));
        // 16-bit read through HL
        assert!(text.contains("ld hl, vrr0"));
        assert!(text.contains("ld a, (hl)"));
    }

    #[test]
    fn test_8bit_add_uses_accumulator() {
        // increment stays at 8 bits, so the add goes through A
        let m = compile_z80("void f(char *p) { (*p)++; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("ld a, vr"));
        assert!(text.contains("add vr"));
    }

    #[test]
    fn test_char_arithmetic_promotes_to_16bit() {
        let m = compile_z80("char f(char a, char b) { return (char)(a + b); }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("add hl, de"));
    }

    #[test]
    fn test_16bit_add_uses_hl_de() {
        let m = compile_z80("int f(int a, int b) { return a + b; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("ld hl, vrr"));
        assert!(text.contains("ld de, vrr"));
        assert!(text.contains("add hl, de"));
    }

    #[test]
    fn test_32bit_add_propagates_carry() {
        let m = compile_z80("long f(long a, long b) { return a + b; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("add hl, de"));
        assert!(text.contains("adc hl, de"));
    }

    #[test]
    fn test_64bit_sub_has_borrow_chain() {
        let m = compile_z80(
            "void f(long long *d, long long *a, long long *b) { *d = *a - *b; }",
        );
        let text = proc_text(&m, "_f");
        let sbc_count = text.matches("sbc hl, de").count();
        assert_eq!(sbc_count, 4);
    }

    #[test]
    fn test_mul_is_shift_and_add_loop() {
        let m = compile_z80("int f(int a, int b) { return a * b; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("__mul"));
        assert!(text.contains("sla vr"));
        assert!(text.contains("jp nc,"));
    }

    #[test]
    fn test_div_is_restoring_loop() {
        let m = compile_z80("unsigned f(unsigned a, unsigned b) { return a / b; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("__div"));
        assert!(text.contains("__divrest"));
        assert!(text.contains("scf"));
    }

    #[test]
    fn test_signed_compare_xors_sign_bit() {
        let m = compile_z80("_Bool f(int a, int b) { return a < b; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("xor 128"));
        assert!(text.contains("sbc hl, de"));
    }

    #[test]
    fn test_sign_extension_replicates_sign() {
        let m = compile_z80("long f(int x) { return x; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("rla"));
        assert!(text.contains("sbc a, a"));
    }

    #[test]
    fn test_frame_and_args() {
        let m = compile_z80("int f(int x, int y) { return x + y; }");
        let text = proc_text(&m, "_f");
        assert!(text.starts_with("_f:\n    push ix\n    ld ix, 0\n    add ix, sp\n"));
        // both args are addressed relative to IX
        assert!(text.contains("ld de, 4"));
        assert!(text.contains("ld de, 6"));
    }

    #[test]
    fn test_call_pushes_args_and_cleans_up() {
        let m = compile_z80(
            "int f(int x, int y); int g(void) { return f(1, 2); }",
        );
        let text = proc_text(&m, "_g");
        assert!(text.contains("push vrr"));
        assert!(text.contains("call _f"));
        assert_eq!(text.matches("inc sp").count(), 4);
        assert!(text.contains("ld vrr"));
    }

    #[test]
    fn test_usr_preserves_bc_de() {
        let m = compile_z80("void f(void) __attribute__((usr)) { }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("push bc\n    push de"));
        assert!(text.contains("pop de\n    pop bc"));
    }

    #[test]
    fn test_struct_copy_uses_ldir() {
        let m = compile_z80(
            "struct p { int x; int y; }; void f(struct p *a, struct p *b) { *a = *b; }",
        );
        let text = proc_text(&m, "_f");
        assert!(text.contains("ldir"));
        assert!(text.contains("ld bc, 4"));
    }

    #[test]
    fn test_inline_asm_verbatim() {
        let m = compile_z80("void f(void) { asm(\"halt\"); }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("\n    halt\n"));
    }

    #[test]
    fn test_branch_tests_condition() {
        let m = compile_z80("int f(int x) { if (x) return 1; return 2; }");
        let text = proc_text(&m, "_f");
        assert!(text.contains("or a"));
        assert!(text.contains("jp nz, .f_if_then"));
    }

    #[test]
    fn test_data_directives() {
        let m = compile_z80("int a; int b = 258; char c = 7; const char *s = \"x\";");
        let a = m.data.iter().find(|d| d.name == "_a").unwrap();
        assert_eq!(a.items, vec![DataItem::Space(2)]);
        let b = m.data.iter().find(|d| d.name == "_b").unwrap();
        assert_eq!(b.items, vec![DataItem::Word(258)]);
        let c = m.data.iter().find(|d| d.name == "_c").unwrap();
        assert_eq!(c.items, vec![DataItem::Byte(7)]);
        let s = m.data.iter().find(|d| d.name == "_s").unwrap();
        assert_eq!(s.items, vec![DataItem::WordSym("__str0".to_string(), 0)]);
        assert!(m.data.iter().any(|d| d.name == "__str0" && d.readonly));
    }

    #[test]
    fn test_output_is_deterministic() {
        let src = "int g; int f(int x) { int i; for (i = 0; i < x; i = i + 1) g = g * 2; return g; }";
        let a = compile_z80(src).to_string();
        let b = compile_z80(src).to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn test_indirect_call() {
        let m = compile_z80(
            "int (*fp)(int); int g(int x) { return fp(x); }",
        );
        let text = proc_text(&m, "_g");
        assert!(text.contains("jp (hl)"));
        assert!(text.contains("__icall"));
    }

    #[test]
    fn test_int128_word_loop() {
        let m = compile_z80(
            "void f(__int128 *d, __int128 *a, __int128 *b) { *d = *a + *b; }",
        );
        let text = proc_text(&m, "_f");
        assert_eq!(text.matches("adc hl, de").count(), 7);
    }
}
