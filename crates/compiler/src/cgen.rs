//! Semantic analysis and IR generation
//!
//! A single lowering pass over the AST that owns all of the language
//! rules: scope and symbol management, declaration checking, constant
//! expression evaluation, integer promotion and the usual arithmetic
//! conversions, truth-value discipline, strict-enum rules, pointer
//! qualifier checking, record layout, and finally the translation of
//! statements and expressions into basic blocks of typed three-address
//! instructions.
//!
//! Diagnostics accumulate on the shared list; a malformed declaration or
//! statement is skipped and analysis continues with its neighbors, so
//! one run reports as much as it can. The IR built so far is returned
//! even when errors were recorded, for inspection by the driver.

use crate::CompileError;
use crate::ast::{self, AssignOp, BinOp, Designator, PostOp, QualKind, RecordKind, UnOp};
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostics;
use crate::ir::{
    IrBlock, IrData, IrDataEntry, IrEntry, IrInstr, IrModule, IrOp, IrOperand, IrProc, IrTerm,
    IrType, ProcAttrs, VReg,
};
use crate::lexer::{self, Token};
use crate::pos::SourcePos;
use crate::symbols::{ScopeStack, SymKind, Symbol};
use crate::types::{BitField, CgType, EnumDef, FuncType, IntElem, Quals, RecordDef, RecordLayout,
    RecordMember, TyKind};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Scalar results wider than 32 bits do not fit the register return
/// convention and travel through a hidden pointer, like records.
const MAX_REG_RET_BITS: u32 = 32;

/// Outcome of one lowering step. `Invalid` means the diagnostic has been
/// recorded and the enclosing declaration or statement should be
/// abandoned; `Fatal` aborts the whole compilation.
enum CgErr {
    Invalid,
    Fatal(CompileError),
}

impl From<CompileError> for CgErr {
    fn from(e: CompileError) -> Self {
        CgErr::Fatal(e)
    }
}

type CgResult<T> = Result<T, CgErr>;

/// A compile-time constant: value plus semantic type.
#[derive(Debug, Clone)]
struct ConstVal {
    value: i128,
    ty: CgType,
}

/// An expression result: its semantic type and the virtual register
/// holding the value. Void expressions have no register; record-typed
/// results hold the address of their storage.
#[derive(Debug, Clone)]
struct EVal {
    ty: CgType,
    vr: Option<VReg>,
}

impl EVal {
    fn reg(&self) -> VReg {
        self.vr.expect("value of void expression")
    }
}

/// An lvalue: the address of the object plus bit-field placement when
/// the designated member is a bit-field.
#[derive(Debug, Clone)]
struct LVal {
    ty: CgType,
    addr: VReg,
    bits: Option<BitField>,
}

/// Per-switch lowering state.
struct SwitchFrame {
    /// Case labels in source order, paired with their block labels.
    cases: Vec<(i128, String)>,
    /// Next entry of `cases` to consume when a `case` statement is
    /// reached during body lowering.
    case_at: usize,
    default_label: Option<String>,
}

/// Per-procedure lowering state.
struct ProcCtx {
    name: String,
    ret: CgType,
    ret_hidden: bool,
    attrs: ProcAttrs,
    args: Vec<(String, IrType)>,
    lvars: Vec<(String, u64)>,
    slot_names: HashSet<String>,
    blocks: Vec<IrBlock>,
    label: String,
    instrs: Vec<IrInstr>,
    terminated: bool,
    next_vreg: u32,
    next_label: u32,
    breaks: Vec<String>,
    continues: Vec<String>,
    switches: Vec<SwitchFrame>,
    labels_defined: HashSet<String>,
    labels_used: HashMap<String, SourcePos>,
    /// Labels that must survive pruning even without an IR predecessor
    /// (user labels, asm goto targets).
    extra_roots: HashSet<String>,
    warned_unreachable: bool,
}

impl ProcCtx {
    fn new(name: String, ret: CgType, ret_hidden: bool, attrs: ProcAttrs) -> Self {
        ProcCtx {
            name,
            ret,
            ret_hidden,
            attrs,
            args: Vec::new(),
            lvars: Vec::new(),
            slot_names: HashSet::new(),
            blocks: Vec::new(),
            label: "entry".to_string(),
            instrs: Vec::new(),
            terminated: false,
            next_vreg: 0,
            next_label: 0,
            breaks: Vec::new(),
            continues: Vec::new(),
            switches: Vec::new(),
            labels_defined: HashSet::new(),
            labels_used: HashMap::new(),
            extra_roots: HashSet::new(),
            warned_unreachable: false,
        }
    }
}

/// A module-level object collected during lowering and emitted as IR
/// data once the whole translation unit has been seen (so tentative
/// definitions can be completed by a later initializer).
struct GlobalSlot {
    name: String,
    ty: CgType,
    entries: Option<Vec<IrDataEntry>>,
}

pub struct Cgen<'a> {
    config: &'a CompilerConfig,
    diags: &'a mut Diagnostics,
    scopes: ScopeStack,
    procs: Vec<IrProc>,
    globals: Vec<GlobalSlot>,
    global_index: HashMap<String, usize>,
    strings: Vec<IrData>,
    next_str: u32,
    fn_attrs: HashMap<String, ProcAttrs>,
    defined_fns: HashSet<String>,
    cur: Option<ProcCtx>,
}

/// Lower a parsed translation unit to IR. Diagnostics go on `diags`;
/// the produced module is returned even when errors were recorded.
pub fn generate(
    module: &ast::Module,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> Result<IrModule, CompileError> {
    let mut cgen = Cgen {
        config,
        diags,
        scopes: ScopeStack::new(),
        procs: Vec::new(),
        globals: Vec::new(),
        global_index: HashMap::new(),
        strings: Vec::new(),
        next_str: 0,
        fn_attrs: HashMap::new(),
        defined_fns: HashSet::new(),
        cur: None,
    };
    cgen.run(module)
}

impl<'a> Cgen<'a> {
    fn run(&mut self, module: &ast::Module) -> Result<IrModule, CompileError> {
        for decl in &module.decls {
            let result = match decl {
                ast::ExtDecl::Decl(d) => self.global_decl(d),
                ast::ExtDecl::FuncDef(f) => self.func_def(f),
            };
            match result {
                Ok(()) | Err(CgErr::Invalid) => {}
                Err(CgErr::Fatal(e)) => return Err(e),
            }
        }

        let mut out = IrModule::default();
        for proc in self.procs.drain(..) {
            out.entries.push(IrEntry::Proc(proc));
        }
        for global in self.globals.drain(..) {
            let size = global.ty.size();
            let entries = global
                .entries
                .unwrap_or_else(|| vec![IrDataEntry::Zero(size)]);
            out.entries.push(IrEntry::Data(IrData {
                name: global.name,
                size,
                entries,
                readonly: false,
            }));
        }
        for s in self.strings.drain(..) {
            out.entries.push(IrEntry::Data(s));
        }
        Ok(out)
    }

    fn internal<T>(&mut self, what: &str) -> CgResult<T> {
        Err(CgErr::Fatal(CompileError::Internal(format!(
            "code generator invariant violated: {}",
            what
        ))))
    }

    // -- block and register management ------------------------------------

    fn ctx(&mut self) -> &mut ProcCtx {
        self.cur.as_mut().expect("no open procedure")
    }

    fn vreg(&mut self) -> VReg {
        let ctx = self.ctx();
        let r = VReg(ctx.next_vreg);
        ctx.next_vreg += 1;
        r
    }

    fn new_label(&mut self, base: &str) -> String {
        let ctx = self.ctx();
        let label = format!("{}{}", base, ctx.next_label);
        ctx.next_label += 1;
        label
    }

    fn emit(&mut self, dest: Option<VReg>, op: IrOp, ty: IrType, args: Vec<IrOperand>) {
        let ctx = self.ctx();
        debug_assert!(!ctx.terminated, "emitting into a closed block");
        ctx.instrs.push(IrInstr { dest, op, ty, args });
    }

    fn emit_to(&mut self, op: IrOp, ty: IrType, args: Vec<IrOperand>) -> VReg {
        let dest = self.vreg();
        self.emit(Some(dest), op, ty, args);
        dest
    }

    fn emit_imm(&mut self, ty: IrType, value: i64) -> VReg {
        self.emit_to(IrOp::Imm, ty, vec![IrOperand::Imm(value)])
    }

    /// Close the current block with `term`. Subsequent instructions are
    /// rejected until a new block is started.
    fn set_term(&mut self, term: IrTerm) {
        let ctx = self.ctx();
        if ctx.terminated {
            return;
        }
        let block = IrBlock {
            label: std::mem::take(&mut ctx.label),
            instrs: std::mem::take(&mut ctx.instrs),
            term,
        };
        ctx.blocks.push(block);
        ctx.terminated = true;
    }

    /// Begin a new block. Falls through from the current one with an
    /// explicit jump when it is still open.
    fn start_block(&mut self, label: String) {
        if !self.ctx().terminated {
            self.set_term(IrTerm::Jump {
                target: label.clone(),
            });
        }
        let ctx = self.ctx();
        ctx.label = label;
        ctx.terminated = false;
    }

    fn is_terminated(&mut self) -> bool {
        self.ctx().terminated
    }

    /// Allocate a local slot with a unique name.
    fn new_slot(&mut self, base: &str, size: u64) -> String {
        let ctx = self.ctx();
        let mut name = base.to_string();
        let mut n = 0;
        while ctx.slot_names.contains(&name) {
            n += 1;
            name = format!("{}.{}", base, n);
        }
        ctx.slot_names.insert(name.clone());
        ctx.lvars.push((name.clone(), size));
        name
    }

    /// Temporary slot for record values and wide return results.
    fn temp_slot(&mut self, size: u64) -> String {
        let n = self.ctx().lvars.len();
        self.new_slot(&format!(".t{}", n), size)
    }

    // -- declaration specifiers -------------------------------------------

    /// Combine the declaration specifiers into a storage class and a
    /// base type, diagnosing everything §6.7 of the standard asks for on
    /// the way.
    fn check_decl_specs(
        &mut self,
        specs: &ast::DeclSpecs,
    ) -> CgResult<(Option<ast::StorageClass>, CgType)> {
        let storage = match specs.storage.len() {
            0 => None,
            1 => Some(specs.storage[0].0),
            _ => {
                let (_, tok) = &specs.storage[1];
                self.diags
                    .error(&tok.pos, "Multiple storage classes in declaration");
                return Err(CgErr::Invalid);
            }
        };

        let quals = self.check_quals(&specs.quals);
        let base = self.combine_type_specs(specs)?;
        Ok((storage, base.with_quals(quals)))
    }

    /// Fold a qualifier list into a set, diagnosing duplicates and
    /// ordering against the (const, restrict, volatile) convention.
    fn check_quals(&mut self, quals: &[ast::Qual]) -> Quals {
        let mut set = Quals::empty();
        let mut last_rank = 0u8;
        for q in quals {
            let (flag, rank) = match q.kind {
                QualKind::Const => (Quals::CONST, 1),
                QualKind::Restrict => (Quals::RESTRICT, 2),
                QualKind::Volatile => (Quals::VOLATILE, 3),
            };
            if set.contains(flag) {
                self.diags.warn(
                    &q.tok.pos,
                    format!("Duplicate '{}' qualifier", q.kind.spelling()),
                );
                continue;
            }
            if rank < last_rank && self.config.warnings.qualifier_order {
                self.diags.warn(
                    &q.tok.pos,
                    format!(
                        "'{}' qualifier out of preferred order (const, restrict, volatile)",
                        q.kind.spelling()
                    ),
                );
            }
            last_rank = last_rank.max(rank);
            set |= flag;
        }
        set
    }

    /// Canonicalize the multiset of type specifiers (`long int` ==
    /// `long`, `unsigned long long int` == `unsigned long long`, ...).
    fn combine_type_specs(&mut self, specs: &ast::DeclSpecs) -> CgResult<CgType> {
        use ast::TypeSpec as TS;

        let pos = specs
            .pos()
            .unwrap_or_else(|| SourcePos::start("<unknown>"));
        if specs.tspecs.is_empty() {
            self.diags
                .error(&pos, "Type specifier missing in declaration");
            return Err(CgErr::Invalid);
        }

        let mut void = 0;
        let mut char_ = 0;
        let mut short = 0;
        let mut int = 0;
        let mut long = 0;
        let mut signed = 0;
        let mut unsigned = 0;
        let mut bool_ = 0;
        let mut int128 = 0;
        let mut other: Option<CgType> = None;

        for ts in &specs.tspecs {
            match ts {
                TS::Void(_) => void += 1,
                TS::Char(_) => char_ += 1,
                TS::Short(_) => short += 1,
                TS::Int(_) => int += 1,
                TS::Long(_) => long += 1,
                TS::Signed(_) => signed += 1,
                TS::Unsigned(_) => unsigned += 1,
                TS::Bool(_) => bool_ += 1,
                TS::Int128(_) => int128 += 1,
                TS::Float(tok) | TS::Double(tok) => {
                    self.diags
                        .error(&tok.pos, "Floating point types are not supported");
                    return Err(CgErr::Invalid);
                }
                TS::Record(rs) => {
                    if other.is_some() {
                        self.diags
                            .error(&rs.kw.pos, "Invalid combination of type specifiers");
                        return Err(CgErr::Invalid);
                    }
                    other = Some(self.record_spec_type(rs)?);
                }
                TS::Enum(es) => {
                    if other.is_some() {
                        self.diags
                            .error(&es.kw.pos, "Invalid combination of type specifiers");
                        return Err(CgErr::Invalid);
                    }
                    other = Some(self.enum_spec_type(es)?);
                }
                TS::TypedefName(tok) => {
                    if other.is_some() {
                        self.diags
                            .error(&tok.pos, "Invalid combination of type specifiers");
                        return Err(CgErr::Invalid);
                    }
                    let sym = match self.scopes.lookup_ord(&tok.text) {
                        Some(sym) if sym.kind == SymKind::Typedef => sym.clone(),
                        _ => {
                            self.diags.error(
                                &tok.pos,
                                format!("Unknown type name '{}'", tok.text),
                            );
                            return Err(CgErr::Invalid);
                        }
                    };
                    other = Some(sym.ty);
                }
            }
        }

        if let Some(ty) = other {
            if void + char_ + short + int + long + signed + unsigned + bool_ + int128 != 0 {
                self.diags
                    .error(&pos, "Invalid combination of type specifiers");
                return Err(CgErr::Invalid);
            }
            return Ok(ty);
        }

        if signed > 0 && unsigned > 0 {
            self.diags
                .error(&pos, "Both 'signed' and 'unsigned' in declaration");
            return Err(CgErr::Invalid);
        }
        let is_signed = unsigned == 0;
        let dup = void > 1 || char_ > 1 || short > 1 || int > 1 || signed > 1 || unsigned > 1
            || bool_ > 1
            || int128 > 1
            || long > 2;
        if dup {
            self.diags
                .error(&pos, "Invalid combination of type specifiers");
            return Err(CgErr::Invalid);
        }

        let ty = if void == 1 {
            if char_ + short + int + long + signed + unsigned + bool_ + int128 != 0 {
                self.diags
                    .error(&pos, "Invalid combination of type specifiers");
                return Err(CgErr::Invalid);
            }
            CgType::void()
        } else if bool_ == 1 {
            if char_ + short + int + long + signed + unsigned + int128 != 0 {
                self.diags
                    .error(&pos, "Invalid combination of type specifiers");
                return Err(CgErr::Invalid);
            }
            CgType::bool()
        } else if char_ == 1 {
            if short + int + long + int128 != 0 {
                self.diags
                    .error(&pos, "Invalid combination of type specifiers");
                return Err(CgErr::Invalid);
            }
            CgType::int(IntElem::Char, is_signed)
        } else if int128 == 1 {
            if short + int + long != 0 {
                self.diags
                    .error(&pos, "Invalid combination of type specifiers");
                return Err(CgErr::Invalid);
            }
            CgType::int(IntElem::Int128, is_signed)
        } else if short == 1 {
            if long != 0 {
                self.diags
                    .error(&pos, "Invalid combination of type specifiers");
                return Err(CgErr::Invalid);
            }
            CgType::int(IntElem::Short, is_signed)
        } else if long == 2 {
            CgType::int(IntElem::LongLong, is_signed)
        } else if long == 1 {
            CgType::int(IntElem::Long, is_signed)
        } else {
            // plain int, or bare signed/unsigned
            CgType::int(IntElem::Int, is_signed)
        };
        Ok(ty)
    }

    // -- record and enum specifiers ---------------------------------------

    fn record_spec_type(&mut self, rs: &ast::RecordSpec) -> CgResult<CgType> {
        let def = match (&rs.tag, &rs.body) {
            (Some(tag), Some(_)) => {
                let existing = self.scopes.lookup_tag_local(&tag.text).cloned();
                let def = match existing {
                    Some(sym) => match &sym.ty.kind {
                        TyKind::Record(def) if def.kind == rs.kind => {
                            if def.is_complete() {
                                self.diags.error(
                                    &tag.pos,
                                    format!(
                                        "Redefinition of '{} {}'",
                                        rs.kind.spelling(),
                                        tag.text
                                    ),
                                );
                                return Err(CgErr::Invalid);
                            }
                            def.clone()
                        }
                        _ => {
                            self.diags.error(
                                &tag.pos,
                                format!("'{}' defined as a different kind of tag", tag.text),
                            );
                            return Err(CgErr::Invalid);
                        }
                    },
                    None => {
                        self.warn_tag_shadow(tag, rs.kind.spelling());
                        let def = RecordDef::new(rs.kind, Some(tag.text.clone()));
                        self.insert_tag(tag, SymKind::RecordTag, record_type(&def));
                        def
                    }
                };
                let layout = self.record_layout(rs.kind, rs.body.as_ref().expect("body"))?;
                *def.layout.borrow_mut() = Some(layout);
                def
            }
            (Some(tag), None) => {
                match self.scopes.lookup_tag(&tag.text) {
                    Some(sym) => match &sym.ty.kind {
                        TyKind::Record(def) if def.kind == rs.kind => def.clone(),
                        _ => {
                            self.diags.error(
                                &tag.pos,
                                format!("'{}' is a different kind of tag", tag.text),
                            );
                            return Err(CgErr::Invalid);
                        }
                    },
                    None => {
                        // forward declaration
                        let def = RecordDef::new(rs.kind, Some(tag.text.clone()));
                        self.insert_tag(tag, SymKind::RecordTag, record_type(&def));
                        def
                    }
                }
            }
            (None, Some(_)) => {
                let def = RecordDef::new(rs.kind, None);
                let layout = self.record_layout(rs.kind, rs.body.as_ref().expect("body"))?;
                *def.layout.borrow_mut() = Some(layout);
                def
            }
            (None, None) => return self.internal("record specifier with no tag and no body"),
        };
        Ok(record_type(&def))
    }

    /// A struct tag introduced at narrower scope over an existing enum
    /// tag (or the other way round) is likely an accident.
    fn warn_tag_shadow(&mut self, tag: &Token, kind: &str) {
        if !self.config.warnings.shadow {
            return;
        }
        if let Some(outer) = self.scopes.lookup_tag(&tag.text) {
            let outer_kind = match &outer.ty.kind {
                TyKind::Record(def) => def.kind.spelling(),
                TyKind::Enum(_) => "enum",
                _ => return,
            };
            if outer_kind != kind {
                self.diags.warn(
                    &tag.pos,
                    format!(
                        "Tag '{}' shadows a {} tag from an outer scope",
                        tag.text, outer_kind
                    ),
                );
            }
        }
    }

    fn insert_tag(&mut self, tok: &Token, kind: SymKind, ty: CgType) {
        let sym = Symbol {
            name: tok.text.clone(),
            kind,
            ty,
            tok: tok.clone(),
        };
        // collisions were checked by the callers
        let _ = self.scopes.insert_tag(sym);
    }

    /// Lay out a record body: byte offsets for plain members, bit
    /// offsets within a storage unit for bit-fields, everything at
    /// offset zero for unions.
    fn record_layout(
        &mut self,
        kind: RecordKind,
        body: &[ast::MemberDecl],
    ) -> CgResult<RecordLayout> {
        let mut members: Vec<RecordMember> = Vec::new();
        let mut offset: u64 = 0;
        let mut size: u64 = 0;
        // open bit-field storage unit: (unit offset, unit size, next bit)
        let mut unit: Option<(u64, u64, u32)> = None;

        for mdecl in body {
            let (storage, base) = match self.check_decl_specs(&mdecl.specs) {
                Ok(v) => v,
                Err(CgErr::Invalid) => continue,
                Err(fatal) => return Err(fatal),
            };
            if let Some(sc) = storage {
                let pos = mdecl.specs.pos().unwrap_or_else(|| mdecl.semi.pos.clone());
                self.diags.error(
                    &pos,
                    format!("Storage class '{}' in record member", sc.spelling()),
                );
            }
            for md in &mdecl.declarators {
                let ty = match self.declarator_type(base.clone(), &md.decl) {
                    Ok(ty) => ty,
                    Err(CgErr::Invalid) => continue,
                    Err(fatal) => return Err(fatal),
                };
                let name_tok = md.decl.name();
                let pos = name_tok
                    .map(|t| t.pos.clone())
                    .unwrap_or_else(|| md.decl.pos());

                if let Some(width_expr) = &md.width {
                    let width = match self.eval_const_expr(width_expr) {
                        Ok(c) => c,
                        Err(CgErr::Invalid) => continue,
                        Err(fatal) => return Err(fatal),
                    };
                    let elem = match ty.int_elem() {
                        Some(elem) if !ty.is_record() => elem,
                        _ => {
                            self.diags
                                .error(&pos, "Bit-field must have an integer type");
                            continue;
                        }
                    };
                    if width.value < 0 || width.value as u32 > elem.bits() {
                        self.diags
                            .error(&pos, "Bit-field width exceeds its type");
                        continue;
                    }
                    let width = width.value as u32;
                    if width == 0 {
                        if name_tok.is_some() {
                            self.diags
                                .error(&pos, "Zero-width bit-field must be anonymous");
                        }
                        // close the open unit, forcing the next field to
                        // a fresh one
                        unit = None;
                        continue;
                    }
                    let unit_size = elem.size();
                    let (unit_off, bit_off) = match unit {
                        Some((uo, us, next_bit))
                            if kind == RecordKind::Struct
                                && us == unit_size
                                && next_bit + width <= elem.bits() =>
                        {
                            let bit = next_bit;
                            unit = Some((uo, us, next_bit + width));
                            (uo, bit)
                        }
                        _ => {
                            let uo = if kind == RecordKind::Struct { offset } else { 0 };
                            if kind == RecordKind::Struct {
                                offset += unit_size;
                            }
                            unit = Some((uo, unit_size, width));
                            (uo, 0)
                        }
                    };
                    if name_tok.is_none() {
                        // anonymous bit-field: takes space, no member
                        size = size.max(unit_off + unit_size);
                        continue;
                    }
                    let name = name_tok.expect("checked above").text.clone();
                    if members.iter().any(|m| m.name == name) {
                        self.diags
                            .error(&pos, format!("Duplicate member '{}'", name));
                        continue;
                    }
                    size = size.max(unit_off + unit_size);
                    members.push(RecordMember {
                        name,
                        ty,
                        offset: unit_off,
                        bits: Some(BitField {
                            bit_off,
                            width,
                        }),
                    });
                    continue;
                }

                // plain member
                unit = None;
                let name = match name_tok {
                    Some(tok) => tok.text.clone(),
                    None => {
                        self.diags.error(&pos, "Record member has no name");
                        continue;
                    }
                };
                if !ty.is_complete() {
                    self.diags.error(
                        &pos,
                        format!("Member '{}' has incomplete type '{}'", name, ty),
                    );
                    continue;
                }
                if members.iter().any(|m| m.name == name) {
                    self.diags
                        .error(&pos, format!("Duplicate member '{}'", name));
                    continue;
                }
                let moffset = if kind == RecordKind::Struct { offset } else { 0 };
                if kind == RecordKind::Struct {
                    offset += ty.size();
                }
                size = size.max(moffset + ty.size());
                mark_enum_strict(&ty);
                members.push(RecordMember {
                    name,
                    ty,
                    offset: moffset,
                    bits: None,
                });
            }
        }
        Ok(RecordLayout { members, size })
    }

    fn enum_spec_type(&mut self, es: &ast::EnumSpec) -> CgResult<CgType> {
        let def = match (&es.tag, &es.body) {
            (Some(tag), Some(body)) => {
                let existing = self.scopes.lookup_tag_local(&tag.text).cloned();
                let def = match existing {
                    Some(sym) => match &sym.ty.kind {
                        TyKind::Enum(def) => {
                            if def.complete.get() {
                                self.diags.error(
                                    &tag.pos,
                                    format!("Redefinition of 'enum {}'", tag.text),
                                );
                                return Err(CgErr::Invalid);
                            }
                            def.clone()
                        }
                        _ => {
                            self.diags.error(
                                &tag.pos,
                                format!("'{}' defined as a different kind of tag", tag.text),
                            );
                            return Err(CgErr::Invalid);
                        }
                    },
                    None => {
                        self.warn_tag_shadow(tag, "enum");
                        let def = EnumDef::new(Some(tag.text.clone()));
                        self.insert_tag(tag, SymKind::EnumTag, enum_type(&def));
                        def
                    }
                };
                self.enum_body(&def, body)?;
                def
            }
            (Some(tag), None) => match self.scopes.lookup_tag(&tag.text) {
                Some(sym) => match &sym.ty.kind {
                    TyKind::Enum(def) => def.clone(),
                    _ => {
                        self.diags.error(
                            &tag.pos,
                            format!("'{}' is a different kind of tag", tag.text),
                        );
                        return Err(CgErr::Invalid);
                    }
                },
                None => {
                    let def = EnumDef::new(Some(tag.text.clone()));
                    self.insert_tag(tag, SymKind::EnumTag, enum_type(&def));
                    def
                }
            },
            (None, Some(body)) => {
                let def = EnumDef::new(None);
                self.enum_body(&def, body)?;
                def
            }
            (None, None) => return self.internal("enum specifier with no tag and no body"),
        };
        Ok(enum_type(&def))
    }

    fn enum_body(&mut self, def: &Rc<EnumDef>, body: &[ast::Enumerator]) -> CgResult<()> {
        let mut next: i64 = 0;
        for e in body {
            let value = match &e.value {
                Some(expr) => {
                    let c = match self.eval_const_expr(expr) {
                        Ok(c) => c,
                        Err(CgErr::Invalid) => continue,
                        Err(fatal) => return Err(fatal),
                    };
                    c.value as i64
                }
                None => next,
            };
            if value < i16::MIN as i64 || value > i16::MAX as i64 {
                self.diags.warn(
                    &e.name.pos,
                    format!("Enumerator value {} does not fit in int", value),
                );
            }
            next = value + 1;
            def.elems.borrow_mut().push((e.name.text.clone(), value));
            let sym = Symbol {
                name: e.name.text.clone(),
                kind: SymKind::EnumElem { value },
                ty: enum_type(def),
                tok: e.name.clone(),
            };
            if let Err(prev) = self.scopes.insert_ord(sym) {
                self.diags.error(
                    &e.name.pos,
                    format!("Redefinition of '{}'", e.name.text),
                );
                self.diags
                    .note(&prev.tok.pos, "Previous definition is here");
            }
        }
        def.complete.set(true);
        Ok(())
    }

    // -- declarators ------------------------------------------------------

    /// Apply a declarator chain to the base type, walking outermost
    /// derivation first so `int *a[3]` comes out as array-of-pointer.
    fn declarator_type(&mut self, base: CgType, decl: &ast::Declarator) -> CgResult<CgType> {
        match decl {
            ast::Declarator::Ident(_) | ast::Declarator::Abstract(_) => Ok(base),
            ast::Declarator::Paren(inner) => self.declarator_type(base, inner),
            ast::Declarator::Pointer { quals, inner, .. } => {
                let quals = self.check_quals(quals);
                let ptr = CgType::ptr_to(base).with_quals(quals);
                self.declarator_type(ptr, inner)
            }
            ast::Declarator::Array {
                inner,
                lbracket,
                size,
            } => {
                if base.is_func() {
                    self.diags
                        .error(&lbracket.pos, "Array of functions is not a valid type");
                    return Err(CgErr::Invalid);
                }
                if !base.is_complete() {
                    self.diags
                        .error(&lbracket.pos, "Array element type is incomplete");
                    return Err(CgErr::Invalid);
                }
                let size = match size {
                    Some(expr) => {
                        let c = self.eval_const_expr(expr)?;
                        if c.value <= 0 {
                            self.diags
                                .error(&lbracket.pos, "Array size must be positive");
                            return Err(CgErr::Invalid);
                        }
                        Some(c.value as u64)
                    }
                    None => None,
                };
                let arr = CgType::new(TyKind::Array {
                    elem: Box::new(base),
                    size,
                });
                self.declarator_type(arr, inner)
            }
            ast::Declarator::Function {
                inner,
                lparen,
                params,
                variadic,
            } => {
                if base.is_func() {
                    self.diags
                        .error(&lparen.pos, "Function may not return a function type");
                    return Err(CgErr::Invalid);
                }
                if base.is_array() {
                    self.diags
                        .error(&lparen.pos, "Function may not return an array type");
                    return Err(CgErr::Invalid);
                }
                let mut ptypes = Vec::new();
                for p in params {
                    let ty = self.param_type(p)?;
                    ptypes.push(ty);
                }
                let func = CgType::new(TyKind::Func(Box::new(FuncType {
                    ret: base,
                    params: ptypes,
                    variadic: *variadic,
                })));
                self.declarator_type(func, inner)
            }
        }
    }

    /// Parameter type with the standard adjustments: arrays decay to
    /// pointers, function types become pointers to function.
    fn param_type(&mut self, p: &ast::ParamDecl) -> CgResult<CgType> {
        let (storage, base) = self.check_decl_specs(&p.specs)?;
        if let Some(sc) = storage {
            if sc != ast::StorageClass::Register {
                let pos = p.specs.pos().unwrap_or_else(|| p.decl.pos());
                self.diags.error(
                    &pos,
                    format!("Storage class '{}' in parameter declaration", sc.spelling()),
                );
            }
        }
        let ty = self.declarator_type(base, &p.decl)?;
        Ok(decay(ty))
    }

    // -- constant expression evaluation -----------------------------------

    /// Evaluate an integer constant expression, with overflow, shift
    /// range and sign diagnostics. Used for enumerators, array sizes,
    /// case labels, bit-field widths and global initializers.
    fn eval_const_expr(&mut self, e: &ast::Expr) -> CgResult<ConstVal> {
        match e {
            ast::Expr::Paren { inner, .. } => self.eval_const_expr(inner),
            ast::Expr::IntLit(tok) => self.int_literal(tok),
            ast::Expr::CharLit(tok) => match lexer::parse_char_text(&tok.text) {
                Ok((value, _wide)) => Ok(ConstVal {
                    value: value as i128,
                    ty: CgType::int(IntElem::Int, true),
                }),
                Err(msg) => {
                    self.diags.error(&tok.pos, msg);
                    Err(CgErr::Invalid)
                }
            },
            ast::Expr::Ident(tok) => match self.scopes.lookup_ord(&tok.text) {
                Some(sym) => match sym.kind {
                    SymKind::EnumElem { value } => Ok(ConstVal {
                        value: value as i128,
                        ty: sym.ty.clone(),
                    }),
                    _ => {
                        self.diags.error(
                            &tok.pos,
                            format!("'{}' is not a constant expression", tok.text),
                        );
                        Err(CgErr::Invalid)
                    }
                },
                None => {
                    self.diags.error(
                        &tok.pos,
                        format!("Undeclared identifier '{}'", tok.text),
                    );
                    Err(CgErr::Invalid)
                }
            },
            ast::Expr::SizeofExpr { kw, expr } => {
                let ty = self.expr_type_quiet(expr)?;
                self.sizeof_value(kw, &ty)
            }
            ast::Expr::SizeofType { kw, tname } => {
                let ty = self.type_name_type(tname)?;
                self.sizeof_value(kw, &ty)
            }
            ast::Expr::Cast { tname, expr, lparen } => {
                let to = self.type_name_type(tname)?;
                let c = self.eval_const_expr(expr)?;
                if !to.is_integer() {
                    self.diags
                        .error(&lparen.pos, "Cast in constant expression must be integer");
                    return Err(CgErr::Invalid);
                }
                Ok(ConstVal {
                    value: wrap_const(c.value, &to),
                    ty: to,
                })
            }
            ast::Expr::Unary { op, tok, expr } => {
                let c = self.eval_const_expr(expr)?;
                let promoted = promote_type(&c.ty);
                let value = match op {
                    UnOp::Plus => c.value,
                    UnOp::Minus => -c.value,
                    UnOp::BitNot => {
                        if c.value < 0 {
                            self.diags
                                .warn(&tok.pos, "Bitwise operation on a negative value");
                        }
                        !c.value
                    }
                    UnOp::LogNot => {
                        return Ok(ConstVal {
                            value: (c.value == 0) as i128,
                            ty: CgType::bool(),
                        });
                    }
                    _ => {
                        self.diags
                            .error(&tok.pos, "Not a constant expression");
                        return Err(CgErr::Invalid);
                    }
                };
                let wrapped = wrap_const(value, &promoted);
                if wrapped != value {
                    self.diags
                        .warn(&tok.pos, "Integer overflow in constant expression");
                }
                Ok(ConstVal {
                    value: wrapped,
                    ty: promoted,
                })
            }
            ast::Expr::Binary { op, tok, lhs, rhs } => {
                if matches!(op, BinOp::LogAnd | BinOp::LogOr) {
                    let l = self.eval_const_expr(lhs)?;
                    // both sides always evaluate in a constant expression
                    let r = self.eval_const_expr(rhs)?;
                    let value = match op {
                        BinOp::LogAnd => (l.value != 0 && r.value != 0) as i128,
                        _ => (l.value != 0 || r.value != 0) as i128,
                    };
                    return Ok(ConstVal {
                        value,
                        ty: CgType::bool(),
                    });
                }
                let l = self.eval_const_expr(lhs)?;
                let r = self.eval_const_expr(rhs)?;
                self.eval_const_binop(*op, tok, l, r)
            }
            ast::Expr::Cond {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let c = self.eval_const_expr(cond)?;
                let t = self.eval_const_expr(then_expr)?;
                let f = self.eval_const_expr(else_expr)?;
                Ok(if c.value != 0 { t } else { f })
            }
            other => {
                self.diags
                    .error(&other.pos(), "Not a constant expression");
                Err(CgErr::Invalid)
            }
        }
    }

    fn sizeof_value(&mut self, kw: &Token, ty: &CgType) -> CgResult<ConstVal> {
        if !ty.is_complete() && !ty.is_func() {
            self.diags
                .error(&kw.pos, "Invalid application of sizeof to an incomplete type");
            return Err(CgErr::Invalid);
        }
        if ty.is_func() {
            self.diags
                .error(&kw.pos, "Invalid application of sizeof to a function type");
            return Err(CgErr::Invalid);
        }
        Ok(ConstVal {
            value: ty.size() as i128,
            ty: CgType::int(IntElem::Int, false),
        })
    }

    fn eval_const_binop(
        &mut self,
        op: BinOp,
        tok: &Token,
        l: ConstVal,
        r: ConstVal,
    ) -> CgResult<ConstVal> {
        self.warn_enum_mixing(&l.ty, &r.ty, &tok.pos);
        let ty = uac_type(&l.ty, &r.ty);
        let bits = ty.int_elem().map(IntElem::bits).unwrap_or(16);
        let signed = ty.is_signed();

        if op.is_bitwise() && (l.value < 0 || r.value < 0) {
            self.diags
                .warn(&tok.pos, "Bitwise operation on a negative value");
        }
        if matches!(op, BinOp::Shl | BinOp::Shr)
            && (r.value < 0 || r.value >= bits as i128)
        {
            self.diags.warn(
                &tok.pos,
                format!("Shift amount {} is out of range 0..{}", r.value, bits - 1),
            );
        }
        if matches!(op, BinOp::Div | BinOp::Mod) && r.value == 0 {
            self.diags
                .error(&tok.pos, "Division by zero in constant expression");
            return Err(CgErr::Invalid);
        }

        if op.is_relational() {
            let value = match op {
                BinOp::Lt => l.value < r.value,
                BinOp::LtEq => l.value <= r.value,
                BinOp::Gt => l.value > r.value,
                BinOp::GtEq => l.value >= r.value,
                BinOp::Eq => l.value == r.value,
                _ => l.value != r.value,
            };
            return Ok(ConstVal {
                value: value as i128,
                ty: CgType::bool(),
            });
        }

        let lv = wrap_const(l.value, &ty);
        let rv = wrap_const(r.value, &ty);
        let shift = (r.value.rem_euclid(bits as i128)) as u32;
        let raw = match op {
            BinOp::Add => lv + rv,
            BinOp::Sub => lv - rv,
            BinOp::Mul => lv * rv,
            BinOp::Div => lv / rv,
            BinOp::Mod => lv % rv,
            BinOp::Shl => lv << shift,
            BinOp::Shr => {
                if signed {
                    lv >> shift
                } else {
                    (wrap_unsigned(lv, bits) >> shift) as i128
                }
            }
            BinOp::BitAnd => lv & rv,
            BinOp::BitXor => lv ^ rv,
            BinOp::BitOr => lv | rv,
            _ => unreachable!("handled above"),
        };
        let wrapped = wrap_const(raw, &ty);
        if wrapped != raw && !matches!(op, BinOp::Shl) {
            self.diags
                .warn(&tok.pos, "Integer overflow in constant expression");
        }
        Ok(ConstVal { value: wrapped, ty })
    }

    /// Decode an integer-literal token, picking its C type from the
    /// value, base and suffix.
    fn int_literal(&mut self, tok: &Token) -> CgResult<ConstVal> {
        let parsed = match lexer::parse_int_text(&tok.text) {
            Ok(p) => p,
            Err(msg) => {
                self.diags.error(&tok.pos, msg);
                return Err(CgErr::Invalid);
            }
        };
        let v = parsed.value as i128;
        // candidate list per C89 6.1.3.2, signed first for decimal
        let mut candidates: Vec<(IntElem, bool)> = Vec::new();
        let start = match parsed.suffix {
            lexer::IntSuffix::None => IntElem::Int,
            lexer::IntSuffix::Long => IntElem::Long,
            lexer::IntSuffix::LongLong => IntElem::LongLong,
        };
        for elem in [IntElem::Int, IntElem::Long, IntElem::LongLong] {
            if elem < start {
                continue;
            }
            if !parsed.unsigned {
                candidates.push((elem, true));
            }
            if parsed.unsigned || !parsed.decimal {
                candidates.push((elem, false));
            }
        }
        for (elem, signed) in candidates {
            let ty = CgType::int(elem, signed);
            if wrap_const(v, &ty) == v {
                return Ok(ConstVal { value: v, ty });
            }
        }
        self.diags.warn(
            &tok.pos,
            format!("Integer literal '{}' does not fit in any type", tok.text),
        );
        Ok(ConstVal {
            value: wrap_const(v, &CgType::int(IntElem::LongLong, false)),
            ty: CgType::int(IntElem::LongLong, false),
        })
    }

    fn warn_enum_mixing(&mut self, l: &CgType, r: &CgType, pos: &SourcePos) {
        if !self.config.warnings.enum_handling {
            return;
        }
        let strict = |t: &CgType| match &t.kind {
            TyKind::Enum(def) if def.strict.get() => Some(Rc::as_ptr(def)),
            _ => None,
        };
        match (strict(l), strict(r)) {
            (Some(a), Some(b)) if a != b => {
                self.diags
                    .warn(pos, "Mixing values of two different enum types");
            }
            (Some(_), None) if r.is_integer() && !r.is_bool() => {
                self.diags
                    .warn(pos, format!("Mixing {} and integer values", l));
            }
            (None, Some(_)) if l.is_integer() && !l.is_bool() => {
                self.diags
                    .warn(pos, format!("Mixing {} and integer values", r));
            }
            _ => {}
        }
    }

    /// Type of an expression without emitting code or value diagnostics;
    /// used by `sizeof`.
    fn expr_type_quiet(&mut self, e: &ast::Expr) -> CgResult<CgType> {
        match e.unparen() {
            ast::Expr::IntLit(tok) => Ok(self.int_literal(tok)?.ty),
            ast::Expr::CharLit(_) => Ok(CgType::int(IntElem::Int, true)),
            ast::Expr::StrLit(parts) => {
                let (bytes, _) = self.string_bytes(parts)?;
                Ok(CgType::new(TyKind::Array {
                    elem: Box::new(CgType::int(IntElem::Char, true)),
                    size: Some(bytes.len() as u64 + 1),
                }))
            }
            ast::Expr::Ident(tok) => match self.scopes.lookup_ord(&tok.text) {
                Some(sym) => Ok(sym.ty.clone()),
                None => {
                    self.diags.error(
                        &tok.pos,
                        format!("Undeclared identifier '{}'", tok.text),
                    );
                    Err(CgErr::Invalid)
                }
            },
            ast::Expr::SizeofExpr { .. } | ast::Expr::SizeofType { .. } => {
                Ok(CgType::int(IntElem::Int, false))
            }
            ast::Expr::Cast { tname, .. } => self.type_name_type(tname),
            ast::Expr::Unary { op, expr, tok } => {
                let inner = self.expr_type_quiet(expr)?;
                match op {
                    UnOp::Deref => match inner.pointee() {
                        Some(t) => Ok(t.clone()),
                        None => {
                            self.diags
                                .error(&tok.pos, "Dereferencing a non-pointer");
                            Err(CgErr::Invalid)
                        }
                    },
                    UnOp::Addr => Ok(CgType::ptr_to(inner)),
                    UnOp::LogNot => Ok(CgType::bool()),
                    _ => Ok(promote_type(&inner)),
                }
            }
            ast::Expr::Binary { op, lhs, rhs, .. } => {
                if op.is_relational() || matches!(op, BinOp::LogAnd | BinOp::LogOr) {
                    return Ok(CgType::bool());
                }
                let l = self.expr_type_quiet(lhs)?;
                let r = self.expr_type_quiet(rhs)?;
                if l.is_pointer() {
                    return Ok(l);
                }
                if r.is_pointer() {
                    return Ok(r);
                }
                Ok(uac_type(&l, &r))
            }
            ast::Expr::Assign { lhs, .. } => self.expr_type_quiet(lhs),
            ast::Expr::Cond { then_expr, .. } => self.expr_type_quiet(then_expr),
            ast::Expr::Comma { rhs, .. } => self.expr_type_quiet(rhs),
            ast::Expr::Index { base, .. } => {
                let b = decay(self.expr_type_quiet(base)?);
                match b.pointee() {
                    Some(t) => Ok(t.clone()),
                    None => {
                        self.diags
                            .error(&e.pos(), "Subscripted value is not a pointer");
                        Err(CgErr::Invalid)
                    }
                }
            }
            ast::Expr::Member {
                base,
                member,
                indirect,
                ..
            } => {
                let bty = self.expr_type_quiet(base)?;
                let (m, _) = self.member_lookup(&bty, member, *indirect)?;
                Ok(m.ty)
            }
            ast::Expr::Call { callee, .. } => {
                let cty = decay(self.expr_type_quiet(callee)?);
                match func_of(&cty) {
                    Some(ft) => Ok(ft.ret.clone()),
                    None => {
                        self.diags
                            .error(&e.pos(), "Called object is not a function");
                        Err(CgErr::Invalid)
                    }
                }
            }
            ast::Expr::Postfix { expr, .. } => self.expr_type_quiet(expr),
            ast::Expr::Paren { .. } => unreachable!("unparen applied"),
        }
    }

    fn type_name_type(&mut self, tname: &ast::TypeName) -> CgResult<CgType> {
        let (_, base) = self.check_decl_specs(&tname.specs)?;
        self.declarator_type(base, &tname.decl)
    }

    /// Look up `member` in the record type of `base` (or the pointee
    /// for `->`), returning the member and the record's definition.
    fn member_lookup(
        &mut self,
        base: &CgType,
        member: &Token,
        indirect: bool,
    ) -> CgResult<(RecordMember, Rc<RecordDef>)> {
        let rec_ty = if indirect {
            match base.pointee() {
                Some(t) => t.clone(),
                None => {
                    self.diags.error(
                        &member.pos,
                        format!("'->' applied to non-pointer type '{}'", base),
                    );
                    return Err(CgErr::Invalid);
                }
            }
        } else {
            base.clone()
        };
        let def = match &rec_ty.kind {
            TyKind::Record(def) => def.clone(),
            _ => {
                self.diags.error(
                    &member.pos,
                    format!("Member access on non-record type '{}'", rec_ty),
                );
                return Err(CgErr::Invalid);
            }
        };
        let layout = def.layout.borrow();
        let layout = match layout.as_ref() {
            Some(l) => l,
            None => {
                self.diags.error(
                    &member.pos,
                    format!("Member access on incomplete type '{}'", rec_ty),
                );
                return Err(CgErr::Invalid);
            }
        };
        match layout.member(&member.text) {
            Some(m) => {
                let m = m.clone();
                let def = def.clone();
                drop(layout);
                Ok((m, def))
            }
            None => {
                self.diags.error(
                    &member.pos,
                    format!("'{}' has no member named '{}'", rec_ty, member.text),
                );
                Err(CgErr::Invalid)
            }
        }
    }

    // -- conversions ------------------------------------------------------

    /// Integer promotion: anything narrower than `int` becomes `int`.
    fn promote(&mut self, v: EVal) -> EVal {
        let promoted = promote_type(&v.ty);
        if promoted.same_as(&v.ty) || v.vr.is_none() {
            return EVal {
                ty: promoted,
                vr: v.vr,
            };
        }
        let vr = self.emit_convert(v.reg(), &v.ty, &promoted);
        EVal {
            ty: promoted,
            vr: Some(vr),
        }
    }

    /// Emit the register-level conversion between two scalar types; the
    /// source signedness picks sign or zero extension.
    fn emit_convert(&mut self, vr: VReg, from: &CgType, to: &CgType) -> VReg {
        let from_ir = ir_type(from);
        let to_ir = ir_type(to);
        if to.is_bool() && !from.is_bool() {
            let zero = self.emit_imm(from_ir, 0);
            return self.emit_to(
                IrOp::Neq,
                from_ir,
                vec![IrOperand::VReg(vr), IrOperand::VReg(zero)],
            );
        }
        if from_ir == to_ir {
            return vr;
        }
        if to_ir.size() < from_ir.size() {
            return self.emit_to(IrOp::Trunc, to_ir, vec![IrOperand::VReg(vr)]);
        }
        let op = if from.is_signed() { IrOp::Sext } else { IrOp::Zext };
        self.emit_to(op, to_ir, vec![IrOperand::VReg(vr)])
    }

    /// Conversion applied on assignment, argument passing, return and
    /// initialization, with the implicit-conversion diagnostics.
    fn assign_convert(&mut self, v: EVal, to: &CgType, pos: &SourcePos) -> CgResult<EVal> {
        if to.same_as(&v.ty) {
            return Ok(v);
        }
        // record types must match exactly; handled by the callers that
        // copy memory
        if to.is_record() || v.ty.is_record() {
            self.diags.error(
                pos,
                format!("Incompatible types: expected '{}', found '{}'", to, v.ty),
            );
            return Err(CgErr::Invalid);
        }
        if to.is_pointer() && v.ty.is_pointer() {
            self.check_ptr_assign(to, &v.ty, pos);
            return Ok(EVal {
                ty: to.clone(),
                vr: v.vr,
            });
        }
        if (to.is_pointer() && v.ty.is_integer()) || (to.is_integer() && v.ty.is_pointer()) {
            if self.config.warnings.conversion {
                self.diags.warn(
                    pos,
                    format!("Implicit conversion from {} to {}", v.ty, to),
                );
            }
            let vr = self.emit_convert(v.reg(), &v.ty, to);
            return Ok(EVal {
                ty: to.clone(),
                vr: Some(vr),
            });
        }
        if !to.is_scalar() || !v.ty.is_scalar() {
            self.diags.error(
                pos,
                format!("Incompatible types: expected '{}', found '{}'", to, v.ty),
            );
            return Err(CgErr::Invalid);
        }

        // integer <-> integer, enum, _Bool
        self.warn_implicit_int_conv(&v.ty, to, pos);
        let vr = self.emit_convert(v.reg(), &v.ty, to);
        Ok(EVal {
            ty: to.clone(),
            vr: Some(vr),
        })
    }

    fn warn_implicit_int_conv(&mut self, from: &CgType, to: &CgType, pos: &SourcePos) {
        let strict_enum = |t: &CgType| matches!(&t.kind, TyKind::Enum(d) if d.strict.get());
        if self.config.warnings.enum_handling
            && (strict_enum(from) || strict_enum(to))
        {
            self.diags.warn(
                pos,
                format!("Implicit conversion from {} to {}", from, to),
            );
            return;
        }
        if !self.config.warnings.conversion {
            return;
        }
        if from.is_bool() != to.is_bool() {
            self.diags.warn(
                pos,
                format!("Implicit conversion from {} to {}", from, to),
            );
            return;
        }
        let (fe, te) = match (from.int_elem(), to.int_elem()) {
            (Some(f), Some(t)) => (f, t),
            _ => return,
        };
        if te.size() < fe.size() {
            self.diags.warn(
                pos,
                format!("Conversion from {} to {} may lose significant digits", from, to),
            );
        }
    }

    /// The qualifier-monotone rule for multi-level pointer assignment:
    /// the target may add qualifiers at an inner level only when every
    /// enclosing pointee level is const.
    fn check_ptr_assign(&mut self, to: &CgType, from: &CgType, pos: &SourcePos) {
        let mut to_t = match to.pointee() {
            Some(t) => t,
            None => return,
        };
        let mut from_t = match from.pointee() {
            Some(t) => t,
            None => return,
        };
        let mut outer_const = true;
        let mut depth = 1;
        loop {
            let missing = from_t.quals - to_t.quals;
            if !missing.is_empty() {
                let name = if missing.contains(Quals::CONST) {
                    "const"
                } else if missing.contains(Quals::VOLATILE) {
                    "volatile"
                } else {
                    "restrict"
                };
                self.diags
                    .warn(pos, format!("Assignment discards '{}' qualifier", name));
            }
            let added = to_t.quals - from_t.quals;
            if !added.is_empty() && depth > 1 && !outer_const {
                self.diags.warn(
                    pos,
                    "Pointer conversion adds qualifiers at an unprotected level",
                );
            }
            outer_const = outer_const && to_t.quals.contains(Quals::CONST);
            match (&to_t.kind, &from_t.kind) {
                (TyKind::Pointer(a), TyKind::Pointer(b)) => {
                    to_t = a;
                    from_t = b;
                    depth += 1;
                }
                (TyKind::Void, _) | (_, TyKind::Void) => return,
                _ => {
                    if !to_t.same_as(from_t) {
                        self.diags.warn(pos, "Incompatible pointer types");
                    }
                    return;
                }
            }
        }
    }

    /// Usual arithmetic conversions over two scalar operands. Returns
    /// the converted registers and the common type. `relational` turns
    /// on the mixed-sign comparison warning.
    fn usual_arith(
        &mut self,
        l: EVal,
        r: EVal,
        pos: &SourcePos,
        relational: bool,
    ) -> CgResult<(VReg, VReg, CgType)> {
        self.warn_enum_mixing(&l.ty, &r.ty, pos);
        let l = self.promote(l);
        let r = self.promote(r);
        let le = l.ty.int_elem().unwrap_or(IntElem::Int);
        let re = r.ty.int_elem().unwrap_or(IntElem::Int);

        if relational
            && self.config.warnings.mixed_sign
            && l.ty.is_signed() != r.ty.is_signed()
        {
            // no warning when the unsigned side is strictly narrower:
            // it converts to the wider signed type losslessly
            let (ue, se) = if l.ty.is_signed() { (re, le) } else { (le, re) };
            if ue >= se {
                self.diags.warn(pos, "Comparison of mixed-sign integers");
            }
        }

        let common = uac_type(&l.ty, &r.ty);
        let lv = self.emit_convert(l.reg(), &l.ty, &common);
        let rv = self.emit_convert(r.reg(), &r.ty, &common);
        Ok((lv, rv, common))
    }

    fn warn_bool_operand(&mut self, ty: &CgType, pos: &SourcePos) {
        if ty.is_bool() && self.config.warnings.conversion {
            self.diags
                .warn(pos, "Using _Bool as an arithmetic operand");
        }
    }

    /// Evaluate an expression as a truth value, diagnosing non-`_Bool`
    /// operands where the grammar requires a truth value.
    fn gen_truth(&mut self, e: &ast::Expr) -> CgResult<VReg> {
        let v = self.gen_expr(e)?;
        let pos = e.pos();
        if !v.ty.is_scalar() {
            self.diags
                .error(&pos, format!("Truth value required, found '{}'", v.ty));
            return Err(CgErr::Invalid);
        }
        if v.ty.is_bool() {
            return Ok(v.reg());
        }
        if self.config.warnings.conversion {
            self.diags
                .warn(&pos, format!("Using {} as a truth value", v.ty));
        }
        let ity = ir_type(&v.ty);
        let zero = self.emit_imm(ity, 0);
        Ok(self.emit_to(
            IrOp::Neq,
            ity,
            vec![IrOperand::VReg(v.reg()), IrOperand::VReg(zero)],
        ))
    }

    // -- expressions ------------------------------------------------------

    fn gen_expr(&mut self, e: &ast::Expr) -> CgResult<EVal> {
        match e {
            ast::Expr::Paren { inner, .. } => self.gen_expr(inner),
            ast::Expr::IntLit(_) | ast::Expr::CharLit(_) => {
                let c = self.eval_const_expr(e)?;
                let ity = ir_type(&c.ty);
                let vr = self.emit_imm(ity, c.value as i64);
                Ok(EVal {
                    ty: c.ty,
                    vr: Some(vr),
                })
            }
            ast::Expr::StrLit(parts) => self.string_literal(parts),
            ast::Expr::Ident(tok) => self.gen_ident(tok),
            ast::Expr::SizeofExpr { .. } | ast::Expr::SizeofType { .. } => {
                let c = self.eval_const_expr(e)?;
                let vr = self.emit_imm(IrType::I16, c.value as i64);
                Ok(EVal {
                    ty: c.ty,
                    vr: Some(vr),
                })
            }
            ast::Expr::Member { .. } | ast::Expr::Index { .. } => {
                let lv = self.gen_lval(e)?;
                Ok(self.load_lval(&lv))
            }
            ast::Expr::Unary {
                op: UnOp::Deref,
                tok,
                expr,
            } => {
                let inner = self.gen_expr(expr)?;
                let pointee = match inner.ty.pointee() {
                    Some(t) => t.clone(),
                    None => {
                        self.diags.error(
                            &tok.pos,
                            format!("Dereferencing non-pointer type '{}'", inner.ty),
                        );
                        return Err(CgErr::Invalid);
                    }
                };
                // dereferencing a function pointer yields the function
                // designator, which immediately decays back
                if pointee.is_func() {
                    return Ok(inner);
                }
                let lv = LVal {
                    ty: pointee,
                    addr: inner.reg(),
                    bits: None,
                };
                Ok(self.load_lval(&lv))
            }
            ast::Expr::Unary {
                op: UnOp::Addr,
                tok,
                expr,
            } => {
                let lv = self.gen_lval(expr)?;
                if lv.bits.is_some() {
                    self.diags
                        .error(&tok.pos, "Cannot take the address of a bit-field");
                    return Err(CgErr::Invalid);
                }
                Ok(EVal {
                    ty: CgType::ptr_to(lv.ty),
                    vr: Some(lv.addr),
                })
            }
            ast::Expr::Unary {
                op: op @ (UnOp::PreInc | UnOp::PreDec),
                tok,
                expr,
            } => {
                let dec = *op == UnOp::PreDec;
                self.gen_incdec(expr, tok, dec, false)
            }
            ast::Expr::Unary { op, tok, expr } => {
                let v = self.gen_expr(expr)?;
                if !v.ty.is_arith() {
                    self.diags.error(
                        &tok.pos,
                        format!("Arithmetic operand required, found '{}'", v.ty),
                    );
                    return Err(CgErr::Invalid);
                }
                match op {
                    UnOp::Plus => {
                        self.warn_bool_operand(&v.ty, &tok.pos);
                        Ok(self.promote(v))
                    }
                    UnOp::Minus => {
                        self.warn_bool_operand(&v.ty, &tok.pos);
                        let v = self.promote(v);
                        let ity = ir_type(&v.ty);
                        let vr = self.emit_to(IrOp::Neg, ity, vec![IrOperand::VReg(v.reg())]);
                        Ok(EVal {
                            ty: v.ty,
                            vr: Some(vr),
                        })
                    }
                    UnOp::BitNot => {
                        self.warn_bool_operand(&v.ty, &tok.pos);
                        let v = self.promote(v);
                        let ity = ir_type(&v.ty);
                        let vr = self.emit_to(IrOp::Bnot, ity, vec![IrOperand::VReg(v.reg())]);
                        Ok(EVal {
                            ty: v.ty,
                            vr: Some(vr),
                        })
                    }
                    UnOp::LogNot => {
                        let t = self.gen_truth(expr)?;
                        let zero = self.emit_imm(IrType::I8, 0);
                        let vr = self.emit_to(
                            IrOp::Eq,
                            IrType::I8,
                            vec![IrOperand::VReg(t), IrOperand::VReg(zero)],
                        );
                        Ok(EVal {
                            ty: CgType::bool(),
                            vr: Some(vr),
                        })
                    }
                    UnOp::Deref | UnOp::Addr | UnOp::PreInc | UnOp::PreDec => {
                        unreachable!("handled above")
                    }
                }
            }
            ast::Expr::Postfix { op, tok, expr } => {
                let dec = *op == PostOp::Dec;
                self.gen_incdec(expr, tok, dec, true)
            }
            ast::Expr::Binary { op, tok, lhs, rhs } => self.gen_binary(*op, tok, lhs, rhs),
            ast::Expr::Assign { op, tok, lhs, rhs } => self.gen_assign(*op, tok, lhs, rhs),
            ast::Expr::Cond {
                cond,
                qtok,
                then_expr,
                else_expr,
            } => self.gen_cond_expr(cond, qtok, then_expr, else_expr),
            ast::Expr::Comma { lhs, rhs, .. } => {
                self.gen_expr(lhs)?;
                self.gen_expr(rhs)
            }
            ast::Expr::Cast {
                lparen,
                tname,
                expr,
            } => {
                let to = self.type_name_type(tname)?;
                let v = self.gen_expr(expr)?;
                if to.is_void() {
                    return Ok(EVal {
                        ty: CgType::void(),
                        vr: None,
                    });
                }
                if !to.is_scalar() || !v.ty.is_scalar() {
                    self.diags.error(
                        &lparen.pos,
                        format!("Invalid cast from '{}' to '{}'", v.ty, to),
                    );
                    return Err(CgErr::Invalid);
                }
                let vr = self.emit_convert(v.reg(), &v.ty, &to);
                Ok(EVal {
                    ty: to,
                    vr: Some(vr),
                })
            }
            ast::Expr::Call {
                callee,
                lparen,
                args,
            } => self.gen_call(callee, lparen, args),
        }
    }

    fn gen_ident(&mut self, tok: &Token) -> CgResult<EVal> {
        let sym = match self.scopes.lookup_ord(&tok.text) {
            Some(sym) => sym.clone(),
            None => {
                self.diags.error(
                    &tok.pos,
                    format!("Undeclared identifier '{}'", tok.text),
                );
                return Err(CgErr::Invalid);
            }
        };
        match sym.kind {
            SymKind::EnumElem { value } => {
                let vr = self.emit_imm(IrType::I16, value);
                Ok(EVal {
                    ty: sym.ty,
                    vr: Some(vr),
                })
            }
            SymKind::Typedef => {
                self.diags.error(
                    &tok.pos,
                    format!("Unexpected type name '{}' in expression", tok.text),
                );
                Err(CgErr::Invalid)
            }
            _ => {
                let lv = self.sym_lval(&sym);
                if sym.ty.is_func() {
                    return Ok(EVal {
                        ty: CgType::ptr_to(sym.ty),
                        vr: Some(lv.addr),
                    });
                }
                Ok(self.load_lval(&lv))
            }
        }
    }

    fn sym_lval(&mut self, sym: &Symbol) -> LVal {
        let addr = match &sym.kind {
            SymKind::Global { .. } => self.emit_to(
                IrOp::Gvarptr,
                IrType::Ptr,
                vec![IrOperand::Sym(sym.name.clone())],
            ),
            SymKind::StaticLocal { data_name } => {
                let data_name = data_name.clone();
                self.emit_to(IrOp::Gvarptr, IrType::Ptr, vec![IrOperand::Sym(data_name)])
            }
            SymKind::Local { slot } => {
                let slot = slot.clone();
                self.emit_to(IrOp::Lvarptr, IrType::Ptr, vec![IrOperand::Local(slot)])
            }
            SymKind::Arg { .. } => self.emit_to(
                IrOp::Lvarptr,
                IrType::Ptr,
                vec![IrOperand::Local(sym.name.clone())],
            ),
            _ => unreachable!("sym_lval on non-object symbol"),
        };
        LVal {
            ty: sym.ty.clone(),
            addr,
            bits: None,
        }
    }

    fn gen_lval(&mut self, e: &ast::Expr) -> CgResult<LVal> {
        match e {
            ast::Expr::Paren { inner, .. } => self.gen_lval(inner),
            ast::Expr::Ident(tok) => {
                let sym = match self.scopes.lookup_ord(&tok.text) {
                    Some(sym) => sym.clone(),
                    None => {
                        self.diags.error(
                            &tok.pos,
                            format!("Undeclared identifier '{}'", tok.text),
                        );
                        return Err(CgErr::Invalid);
                    }
                };
                match sym.kind {
                    SymKind::EnumElem { .. } | SymKind::Typedef => {
                        self.diags.error(
                            &tok.pos,
                            format!("'{}' is not an lvalue", tok.text),
                        );
                        Err(CgErr::Invalid)
                    }
                    _ => Ok(self.sym_lval(&sym)),
                }
            }
            ast::Expr::Unary {
                op: UnOp::Deref,
                tok,
                expr,
            } => {
                let inner = self.gen_expr(expr)?;
                match inner.ty.pointee() {
                    Some(t) => Ok(LVal {
                        ty: t.clone(),
                        addr: inner.reg(),
                        bits: None,
                    }),
                    None => {
                        self.diags.error(
                            &tok.pos,
                            format!("Dereferencing non-pointer type '{}'", inner.ty),
                        );
                        Err(CgErr::Invalid)
                    }
                }
            }
            ast::Expr::Index {
                base,
                lbracket,
                index,
            } => {
                let b = self.gen_expr(base)?;
                let b = EVal {
                    ty: decay(b.ty),
                    vr: b.vr,
                };
                let elem = match b.ty.pointee() {
                    Some(t) => t.clone(),
                    None => {
                        self.diags
                            .error(&lbracket.pos, "Subscripted value is not a pointer");
                        return Err(CgErr::Invalid);
                    }
                };
                let idx = self.gen_expr(index)?;
                if !idx.ty.is_integer() {
                    self.diags
                        .error(&lbracket.pos, "Array subscript is not an integer");
                    return Err(CgErr::Invalid);
                }
                let addr = self.ptr_offset(b.reg(), &idx, elem.size(), false);
                Ok(LVal {
                    ty: elem,
                    addr,
                    bits: None,
                })
            }
            ast::Expr::Member {
                base,
                member,
                indirect,
                ..
            } => {
                let (base_ty, base_addr) = if *indirect {
                    let b = self.gen_expr(base)?;
                    (b.ty.clone(), b.reg())
                } else if matches!(base.unparen(), ast::Expr::Call { .. }) {
                    // record-valued call results already live at an
                    // address
                    let b = self.gen_expr(base)?;
                    (b.ty.clone(), b.reg())
                } else {
                    let lv = self.gen_lval(base)?;
                    (lv.ty.clone(), lv.addr)
                };
                let (m, _) = self.member_lookup(&base_ty, member, *indirect)?;
                let addr = if m.offset != 0 {
                    let off = self.emit_imm(IrType::I16, m.offset as i64);
                    self.emit_to(
                        IrOp::Add,
                        IrType::Ptr,
                        vec![IrOperand::VReg(base_addr), IrOperand::VReg(off)],
                    )
                } else {
                    base_addr
                };
                Ok(LVal {
                    ty: m.ty,
                    addr,
                    bits: m.bits,
                })
            }
            other => {
                self.diags
                    .error(&other.pos(), "Expression is not an lvalue");
                Err(CgErr::Invalid)
            }
        }
    }

    /// `base + index * scale` over 16-bit pointers; `negate` subtracts.
    fn ptr_offset(&mut self, base: VReg, index: &EVal, scale: u64, negate: bool) -> VReg {
        let idx16 = self.emit_convert(index.reg(), &index.ty, &CgType::int(IntElem::Int, true));
        let scaled = if scale == 1 {
            idx16
        } else {
            let s = self.emit_imm(IrType::I16, scale as i64);
            self.emit_to(
                IrOp::Mul,
                IrType::I16,
                vec![IrOperand::VReg(idx16), IrOperand::VReg(s)],
            )
        };
        let op = if negate { IrOp::Sub } else { IrOp::Add };
        self.emit_to(
            op,
            IrType::Ptr,
            vec![IrOperand::VReg(base), IrOperand::VReg(scaled)],
        )
    }

    /// Read through an lvalue. Arrays decay to their first element's
    /// address; record values are represented by their address.
    fn load_lval(&mut self, lv: &LVal) -> EVal {
        if lv.ty.is_array() {
            return EVal {
                ty: decay(lv.ty.clone()),
                vr: Some(lv.addr),
            };
        }
        if lv.ty.is_record() {
            return EVal {
                ty: lv.ty.clone(),
                vr: Some(lv.addr),
            };
        }
        let ity = ir_type(&lv.ty);
        let unit = self.emit_to(IrOp::Read, ity, vec![IrOperand::VReg(lv.addr)]);
        let vr = match lv.bits {
            None => unit,
            Some(bf) => {
                // shift the field to the top, then arithmetic or logical
                // shift back down to extend or clear the upper bits
                let total = lv
                    .ty
                    .int_elem()
                    .map(IntElem::bits)
                    .unwrap_or(16);
                let up = self.emit_imm(IrType::I8, (total - bf.bit_off - bf.width) as i64);
                let shifted = self.emit_to(
                    IrOp::Shl,
                    ity,
                    vec![IrOperand::VReg(unit), IrOperand::VReg(up)],
                );
                let down = self.emit_imm(IrType::I8, (total - bf.width) as i64);
                let op = if lv.ty.is_signed() { IrOp::Sra } else { IrOp::Srl };
                self.emit_to(
                    op,
                    ity,
                    vec![IrOperand::VReg(shifted), IrOperand::VReg(down)],
                )
            }
        };
        EVal {
            ty: lv.ty.clone(),
            vr: Some(vr),
        }
    }

    /// Store a scalar through an lvalue, with the bit-field
    /// read-modify-write when the field does not cover its whole unit.
    fn store_lval(&mut self, lv: &LVal, value: VReg) {
        let ity = ir_type(&lv.ty);
        match lv.bits {
            None => {
                self.emit(
                    None,
                    IrOp::Write,
                    ity,
                    vec![IrOperand::VReg(lv.addr), IrOperand::VReg(value)],
                );
            }
            Some(bf) => {
                let total = lv.ty.int_elem().map(IntElem::bits).unwrap_or(16);
                if bf.width == total {
                    // field covers the unit: plain store
                    self.emit(
                        None,
                        IrOp::Write,
                        ity,
                        vec![IrOperand::VReg(lv.addr), IrOperand::VReg(value)],
                    );
                    return;
                }
                let mask: i64 = ((1u64 << bf.width) - 1) as i64;
                let unit = self.emit_to(IrOp::Read, ity, vec![IrOperand::VReg(lv.addr)]);
                let keep_mask = self.emit_imm(ity, !(mask << bf.bit_off));
                let kept = self.emit_to(
                    IrOp::And,
                    ity,
                    vec![IrOperand::VReg(unit), IrOperand::VReg(keep_mask)],
                );
                let vmask = self.emit_imm(ity, mask);
                let vlow = self.emit_to(
                    IrOp::And,
                    ity,
                    vec![IrOperand::VReg(value), IrOperand::VReg(vmask)],
                );
                let off = self.emit_imm(IrType::I8, bf.bit_off as i64);
                let vshift = self.emit_to(
                    IrOp::Shl,
                    ity,
                    vec![IrOperand::VReg(vlow), IrOperand::VReg(off)],
                );
                let merged = self.emit_to(
                    IrOp::Or,
                    ity,
                    vec![IrOperand::VReg(kept), IrOperand::VReg(vshift)],
                );
                self.emit(
                    None,
                    IrOp::Write,
                    ity,
                    vec![IrOperand::VReg(lv.addr), IrOperand::VReg(merged)],
                );
            }
        }
    }

    fn gen_binary(
        &mut self,
        op: BinOp,
        tok: &Token,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> CgResult<EVal> {
        match op {
            BinOp::LogAnd | BinOp::LogOr => self.gen_shortcircuit(op, lhs, rhs),
            _ => {
                let l = self.gen_expr(lhs)?;
                let r = self.gen_expr(rhs)?;
                self.gen_binary_vals(op, tok, l, r)
            }
        }
    }

    /// Binary operation over two evaluated operands; shared by plain
    /// binary expressions and compound assignment.
    fn gen_binary_vals(
        &mut self,
        op: BinOp,
        tok: &Token,
        l: EVal,
        r: EVal,
    ) -> CgResult<EVal> {
        let pos = &tok.pos;

        if op.is_relational() {
            return self.gen_compare(op, tok, l, r);
        }

        // pointer arithmetic
        let lty = decay(l.ty.clone());
        let rty = decay(r.ty.clone());
        if op == BinOp::Add && lty.is_pointer() && rty.is_integer() {
            let size = lty.pointee().map(CgType::size).unwrap_or(1);
            let vr = self.ptr_offset(l.reg(), &r, size, false);
            return Ok(EVal {
                ty: lty,
                vr: Some(vr),
            });
        }
        if op == BinOp::Add && lty.is_integer() && rty.is_pointer() {
            let size = rty.pointee().map(CgType::size).unwrap_or(1);
            let vr = self.ptr_offset(r.reg(), &l, size, false);
            return Ok(EVal {
                ty: rty,
                vr: Some(vr),
            });
        }
        if op == BinOp::Sub && lty.is_pointer() && rty.is_integer() {
            let size = lty.pointee().map(CgType::size).unwrap_or(1);
            let vr = self.ptr_offset(l.reg(), &r, size, true);
            return Ok(EVal {
                ty: lty,
                vr: Some(vr),
            });
        }
        if op == BinOp::Sub && lty.is_pointer() && rty.is_pointer() {
            let size = lty.pointee().map(CgType::size).unwrap_or(1).max(1);
            let diff = self.emit_to(
                IrOp::Sub,
                IrType::I16,
                vec![IrOperand::VReg(l.reg()), IrOperand::VReg(r.reg())],
            );
            let vr = if size == 1 {
                diff
            } else {
                let s = self.emit_imm(IrType::I16, size as i64);
                self.emit_to(
                    IrOp::Sdiv,
                    IrType::I16,
                    vec![IrOperand::VReg(diff), IrOperand::VReg(s)],
                )
            };
            return Ok(EVal {
                ty: CgType::int(IntElem::Int, true),
                vr: Some(vr),
            });
        }

        if !l.ty.is_arith() || !r.ty.is_arith() {
            self.diags.error(
                pos,
                format!(
                    "Invalid operands to '{}' ('{}' and '{}')",
                    op.spelling(),
                    l.ty,
                    r.ty
                ),
            );
            return Err(CgErr::Invalid);
        }
        self.warn_bool_operand(&l.ty, pos);
        self.warn_bool_operand(&r.ty, pos);

        // shifts promote each operand separately; the result has the
        // promoted left type
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            let l = self.promote(l);
            let r = self.promote(r);
            let ity = ir_type(&l.ty);
            let amount = self.emit_convert(r.reg(), &r.ty, &CgType::int(IntElem::Char, false));
            let irop = match op {
                BinOp::Shl => IrOp::Shl,
                _ if l.ty.is_signed() => IrOp::Sra,
                _ => IrOp::Srl,
            };
            let vr = self.emit_to(
                irop,
                ity,
                vec![IrOperand::VReg(l.reg()), IrOperand::VReg(amount)],
            );
            return Ok(EVal {
                ty: l.ty,
                vr: Some(vr),
            });
        }

        let (lv, rv, ty) = self.usual_arith(l, r, pos, false)?;
        let signed = ty.is_signed();
        let irop = match op {
            BinOp::Add => IrOp::Add,
            BinOp::Sub => IrOp::Sub,
            BinOp::Mul => IrOp::Mul,
            BinOp::Div => {
                if signed {
                    IrOp::Sdiv
                } else {
                    IrOp::Udiv
                }
            }
            BinOp::Mod => {
                if signed {
                    IrOp::Srem
                } else {
                    IrOp::Urem
                }
            }
            BinOp::BitAnd => IrOp::And,
            BinOp::BitXor => IrOp::Xor,
            BinOp::BitOr => IrOp::Or,
            _ => unreachable!("handled above"),
        };
        let ity = ir_type(&ty);
        let vr = self.emit_to(irop, ity, vec![IrOperand::VReg(lv), IrOperand::VReg(rv)]);
        Ok(EVal {
            ty,
            vr: Some(vr),
        })
    }

    fn gen_compare(&mut self, op: BinOp, tok: &Token, l: EVal, r: EVal) -> CgResult<EVal> {
        let pos = &tok.pos;
        let lty = decay(l.ty.clone());
        let rty = decay(r.ty.clone());
        let (lv, rv, cmp_ty) = if lty.is_pointer() && rty.is_pointer() {
            (l.reg(), r.reg(), CgType::int(IntElem::Int, false))
        } else if lty.is_pointer() || rty.is_pointer() {
            self.diags
                .warn(pos, "Comparison between pointer and integer");
            let common = CgType::int(IntElem::Int, false);
            let lv = self.emit_convert(l.reg(), &lty, &common);
            let rv = self.emit_convert(r.reg(), &rty, &common);
            (lv, rv, common)
        } else {
            if !l.ty.is_arith() || !r.ty.is_arith() {
                self.diags.error(
                    pos,
                    format!(
                        "Invalid operands to '{}' ('{}' and '{}')",
                        op.spelling(),
                        l.ty,
                        r.ty
                    ),
                );
                return Err(CgErr::Invalid);
            }
            let (lv, rv, ty) = self.usual_arith(l, r, pos, true)?;
            (lv, rv, ty)
        };
        let signed = cmp_ty.is_signed();
        let irop = match op {
            BinOp::Eq => IrOp::Eq,
            BinOp::NotEq => IrOp::Neq,
            BinOp::Lt => {
                if signed {
                    IrOp::Slt
                } else {
                    IrOp::Ult
                }
            }
            BinOp::LtEq => {
                if signed {
                    IrOp::Slteq
                } else {
                    IrOp::Ulteq
                }
            }
            BinOp::Gt => {
                if signed {
                    IrOp::Sgt
                } else {
                    IrOp::Ugt
                }
            }
            BinOp::GtEq => {
                if signed {
                    IrOp::Sgteq
                } else {
                    IrOp::Ugteq
                }
            }
            _ => unreachable!("relational only"),
        };
        let ity = ir_type(&cmp_ty);
        let vr = self.emit_to(irop, ity, vec![IrOperand::VReg(lv), IrOperand::VReg(rv)]);
        Ok(EVal {
            ty: CgType::bool(),
            vr: Some(vr),
        })
    }

    /// `&&` and `||` lower to a branch diamond writing one destination
    /// register, so the right-hand side only evaluates when needed.
    fn gen_shortcircuit(&mut self, op: BinOp, lhs: &ast::Expr, rhs: &ast::Expr) -> CgResult<EVal> {
        let dest = self.vreg();
        let (base, shortcut_value) = match op {
            BinOp::LogAnd => ("and", 0),
            _ => ("or", 1),
        };
        let rhs_label = self.new_label(&format!("{}_rhs", base));
        let short_label = self.new_label(&format!("{}_short", base));
        let join_label = self.new_label(&format!("{}_join", base));

        let lt = self.gen_truth(lhs)?;
        let (then_l, else_l) = match op {
            BinOp::LogAnd => (rhs_label.clone(), short_label.clone()),
            _ => (short_label.clone(), rhs_label.clone()),
        };
        self.set_term(IrTerm::Branch {
            cond: IrOperand::VReg(lt),
            then_label: then_l,
            else_label: else_l,
        });

        self.start_block(rhs_label);
        let rt = self.gen_truth(rhs)?;
        self.emit(Some(dest), IrOp::Copy, IrType::I8, vec![IrOperand::VReg(rt)]);
        self.set_term(IrTerm::Jump {
            target: join_label.clone(),
        });

        self.start_block(short_label);
        self.emit(
            Some(dest),
            IrOp::Imm,
            IrType::I8,
            vec![IrOperand::Imm(shortcut_value)],
        );
        self.set_term(IrTerm::Jump {
            target: join_label.clone(),
        });

        self.start_block(join_label);
        Ok(EVal {
            ty: CgType::bool(),
            vr: Some(dest),
        })
    }

    /// `c ? a : b` with a join block and one destination register.
    fn gen_cond_expr(
        &mut self,
        cond: &ast::Expr,
        qtok: &Token,
        then_expr: &ast::Expr,
        else_expr: &ast::Expr,
    ) -> CgResult<EVal> {
        let then_label = self.new_label("cond_then");
        let else_label = self.new_label("cond_else");
        let join_label = self.new_label("cond_join");

        let ct = self.gen_truth(cond)?;
        self.set_term(IrTerm::Branch {
            cond: IrOperand::VReg(ct),
            then_label: then_label.clone(),
            else_label: else_label.clone(),
        });

        // the arms must agree on a common type; evaluate the first, note
        // its type, convert both into the destination register
        let dest = self.vreg();

        self.start_block(then_label);
        let t = self.gen_expr(then_expr)?;
        let result_ty = if t.ty.is_arith() {
            let quiet_else = self.expr_type_quiet(else_expr)?;
            if quiet_else.is_arith() {
                uac_type(&t.ty, &quiet_else)
            } else {
                t.ty.clone()
            }
        } else {
            t.ty.clone()
        };
        let ity = ir_type(&result_ty);
        if t.vr.is_some() {
            let tv = self.emit_convert(t.reg(), &t.ty, &result_ty);
            self.emit(Some(dest), IrOp::Copy, ity, vec![IrOperand::VReg(tv)]);
        }
        self.set_term(IrTerm::Jump {
            target: join_label.clone(),
        });

        self.start_block(else_label);
        let f = self.gen_expr(else_expr)?;
        if !f.ty.same_as(&result_ty) && !(f.ty.is_arith() && result_ty.is_arith()) {
            self.diags.error(
                &qtok.pos,
                format!(
                    "Incompatible conditional arms ('{}' and '{}')",
                    result_ty, f.ty
                ),
            );
            return Err(CgErr::Invalid);
        }
        if f.vr.is_some() {
            let fv = self.emit_convert(f.reg(), &f.ty, &result_ty);
            self.emit(Some(dest), IrOp::Copy, ity, vec![IrOperand::VReg(fv)]);
        }
        self.set_term(IrTerm::Jump {
            target: join_label.clone(),
        });

        self.start_block(join_label);
        let vr = if result_ty.is_void() { None } else { Some(dest) };
        Ok(EVal { ty: result_ty, vr })
    }

    fn gen_assign(
        &mut self,
        op: AssignOp,
        tok: &Token,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> CgResult<EVal> {
        let lv = self.gen_lval(lhs)?;
        if lv.ty.quals.contains(Quals::CONST) {
            self.diags
                .error(&tok.pos, "Assignment to a read-only object");
            return Err(CgErr::Invalid);
        }

        if lv.ty.is_record() {
            if op != AssignOp::Plain {
                self.diags
                    .error(&tok.pos, "Invalid operands to compound assignment");
                return Err(CgErr::Invalid);
            }
            let r = self.gen_expr(rhs)?;
            if !r.ty.same_as(&lv.ty) {
                self.diags.error(
                    &tok.pos,
                    format!("Incompatible types: expected '{}', found '{}'", lv.ty, r.ty),
                );
                return Err(CgErr::Invalid);
            }
            self.emit(
                None,
                IrOp::Copymem,
                IrType::Ptr,
                vec![
                    IrOperand::VReg(lv.addr),
                    IrOperand::VReg(r.reg()),
                    IrOperand::Imm(lv.ty.size() as i64),
                ],
            );
            return Ok(EVal {
                ty: lv.ty,
                vr: Some(lv.addr),
            });
        }

        let value = match op {
            AssignOp::Plain => {
                let r = self.gen_expr(rhs)?;
                self.check_bitfield_range(&lv, rhs, &tok.pos);
                self.assign_convert(r, &lv.ty, &tok.pos)?
            }
            AssignOp::Compound(binop) => {
                let old = self.load_lval(&lv);
                let r = self.gen_expr(rhs)?;
                let result = self.gen_binary_vals(binop, tok, old, r)?;
                // the implicit conversion back to the target is part of
                // the operator; no diagnostics on this leg
                let vr = self.emit_convert(result.reg(), &result.ty, &lv.ty);
                EVal {
                    ty: lv.ty.clone(),
                    vr: Some(vr),
                }
            }
        };
        self.store_lval(&lv, value.reg());
        Ok(value)
    }

    /// A constant stored into a bit-field must fit its width.
    fn check_bitfield_range(&mut self, lv: &LVal, rhs: &ast::Expr, pos: &SourcePos) {
        let bf = match lv.bits {
            Some(bf) => bf,
            None => return,
        };
        if !self.config.warnings.bitfield_range {
            return;
        }
        let value = match rhs.unparen() {
            ast::Expr::IntLit(tok) => match lexer::parse_int_text(&tok.text) {
                Ok(p) => p.value as i128,
                Err(_) => return,
            },
            _ => return,
        };
        let max: i128 = if lv.ty.is_signed() {
            (1i128 << (bf.width - 1)) - 1
        } else {
            (1i128 << bf.width) - 1
        };
        let min: i128 = if lv.ty.is_signed() {
            -(1i128 << (bf.width - 1))
        } else {
            0
        };
        if value < min || value > max {
            self.diags.warn(
                pos,
                format!("Value {} does not fit in a {}-bit field", value, bf.width),
            );
        }
    }

    fn gen_incdec(
        &mut self,
        expr: &ast::Expr,
        tok: &Token,
        dec: bool,
        post: bool,
    ) -> CgResult<EVal> {
        let lv = self.gen_lval(expr)?;
        if lv.ty.quals.contains(Quals::CONST) {
            self.diags
                .error(&tok.pos, "Assignment to a read-only object");
            return Err(CgErr::Invalid);
        }
        if !lv.ty.is_scalar() {
            self.diags.error(
                &tok.pos,
                format!("Cannot increment value of type '{}'", lv.ty),
            );
            return Err(CgErr::Invalid);
        }
        let old = self.load_lval(&lv);
        let ity = ir_type(&lv.ty);
        let step = if lv.ty.is_pointer() {
            lv.ty.pointee().map(CgType::size).unwrap_or(1) as i64
        } else {
            1
        };
        let one = self.emit_imm(ity, step);
        let op = if dec { IrOp::Sub } else { IrOp::Add };
        let new = self.emit_to(
            op,
            ity,
            vec![IrOperand::VReg(old.reg()), IrOperand::VReg(one)],
        );
        self.store_lval(&lv, new);
        Ok(EVal {
            ty: lv.ty,
            vr: Some(if post { old.reg() } else { new }),
        })
    }

    fn gen_call(
        &mut self,
        callee: &ast::Expr,
        lparen: &Token,
        args: &[ast::Expr],
    ) -> CgResult<EVal> {
        // direct calls go through the symbol; anything else is an
        // indirect call through a function pointer value
        let mut direct: Option<(String, ProcAttrs)> = None;
        let mut callee_ty = None;
        if let ast::Expr::Ident(tok) = callee.unparen() {
            if let Some(sym) = self.scopes.lookup_ord(&tok.text) {
                if sym.ty.is_func() && matches!(sym.kind, SymKind::Global { .. }) {
                    let attrs = self
                        .fn_attrs
                        .get(&sym.name)
                        .copied()
                        .unwrap_or_default();
                    direct = Some((sym.name.clone(), attrs));
                    callee_ty = Some(sym.ty.clone());
                }
            }
        }
        let (ft, callee_val) = match (&direct, callee_ty) {
            (Some(_), Some(ty)) => {
                let ft = match &ty.kind {
                    TyKind::Func(ft) => (**ft).clone(),
                    _ => return self.internal("direct callee is not a function"),
                };
                (ft, None)
            }
            _ => {
                let v = self.gen_expr(callee)?;
                let ft = match func_of(&v.ty) {
                    Some(ft) => ft.clone(),
                    None => {
                        self.diags
                            .error(&lparen.pos, "Called object is not a function");
                        return Err(CgErr::Invalid);
                    }
                };
                (ft, Some(v.reg()))
            }
        };

        if args.len() < ft.params.len() {
            self.diags.error(&lparen.pos, "Too few arguments to function");
            return Err(CgErr::Invalid);
        }
        if args.len() > ft.params.len() && !ft.variadic {
            self.diags
                .error(&lparen.pos, "Too many arguments to function");
            return Err(CgErr::Invalid);
        }

        let mut arg_regs = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let v = self.gen_expr(arg)?;
            let vr = if let Some(pty) = ft.params.get(i) {
                if pty.is_record() {
                    if !v.ty.same_as(pty) {
                        self.diags.error(
                            &arg.pos(),
                            format!(
                                "Incompatible argument: expected '{}', found '{}'",
                                pty, v.ty
                            ),
                        );
                        return Err(CgErr::Invalid);
                    }
                    v.reg()
                } else {
                    self.assign_convert(v, pty, &arg.pos())?.reg()
                }
            } else {
                // default argument promotions for the variadic tail
                if v.ty.is_record() {
                    v.reg()
                } else if v.ty.is_arith() {
                    self.promote(v).reg()
                } else {
                    v.reg()
                }
            };
            arg_regs.push(IrOperand::VReg(vr));
        }

        let hidden = ret_needs_hidden_ptr(&ft.ret);
        let mut ops = Vec::new();
        let (call_op, callee_op) = match (&direct, callee_val) {
            (Some((name, _)), _) => (IrOp::Call, IrOperand::Sym(name.clone())),
            (None, Some(vr)) => (IrOp::Calli, IrOperand::VReg(vr)),
            (None, None) => return self.internal("indirect call without callee value"),
        };
        ops.push(callee_op);

        let ret_slot = if hidden {
            let slot = self.temp_slot(ft.ret.size());
            let addr = self.emit_to(IrOp::Lvarptr, IrType::Ptr, vec![IrOperand::Local(slot)]);
            ops.push(IrOperand::VReg(addr));
            Some(addr)
        } else {
            None
        };
        ops.extend(arg_regs);

        if ft.ret.is_void() || hidden {
            self.emit(None, call_op, IrType::Void, ops);
        } else {
            let ity = ir_type(&ft.ret);
            let dest = self.emit_to(call_op, ity, ops);
            return Ok(EVal {
                ty: ft.ret.clone(),
                vr: Some(dest),
            });
        }

        match ret_slot {
            None => Ok(EVal {
                ty: CgType::void(),
                vr: None,
            }),
            Some(addr) => {
                if ft.ret.is_record() {
                    Ok(EVal {
                        ty: ft.ret.clone(),
                        vr: Some(addr),
                    })
                } else {
                    let ity = ir_type(&ft.ret);
                    let vr = self.emit_to(IrOp::Read, ity, vec![IrOperand::VReg(addr)]);
                    Ok(EVal {
                        ty: ft.ret.clone(),
                        vr: Some(vr),
                    })
                }
            }
        }
    }

    // -- string literals --------------------------------------------------

    /// Concatenate adjacent string-literal tokens into their byte
    /// contents. Wide if any part is wide.
    fn string_bytes(&mut self, parts: &[Token]) -> CgResult<(Vec<u8>, bool)> {
        let mut bytes = Vec::new();
        let mut wide = false;
        for part in parts {
            match lexer::parse_str_text(&part.text) {
                Ok((b, w)) => {
                    bytes.extend(b);
                    wide |= w;
                }
                Err(msg) => {
                    self.diags.error(&part.pos, msg);
                    return Err(CgErr::Invalid);
                }
            }
        }
        Ok((bytes, wide))
    }

    /// Lower a string literal to an anonymous read-only data object and
    /// yield a pointer to its first element.
    fn string_literal(&mut self, parts: &[Token]) -> CgResult<EVal> {
        let (bytes, wide) = self.string_bytes(parts)?;
        let name = self.intern_string(&bytes, wide);
        let vr = self.emit_to(IrOp::Gvarptr, IrType::Ptr, vec![IrOperand::Sym(name)]);
        let elem = if wide {
            CgType::int(IntElem::Short, true)
        } else {
            CgType::int(IntElem::Char, true)
        };
        Ok(EVal {
            ty: CgType::ptr_to(elem),
            vr: Some(vr),
        })
    }

    fn intern_string(&mut self, bytes: &[u8], wide: bool) -> String {
        let name = format!(".str{}", self.next_str);
        self.next_str += 1;
        let (entries, size) = if wide {
            let mut entries: Vec<IrDataEntry> = bytes
                .iter()
                .map(|&b| IrDataEntry::Int(IrType::I16, b as i64))
                .collect();
            entries.push(IrDataEntry::Zero(2));
            (entries, (bytes.len() as u64 + 1) * 2)
        } else {
            let mut entries: Vec<IrDataEntry> = bytes
                .iter()
                .map(|&b| IrDataEntry::Int(IrType::I8, b as i64))
                .collect();
            entries.push(IrDataEntry::Zero(1));
            (entries, bytes.len() as u64 + 1)
        };
        self.strings.push(IrData {
            name: name.clone(),
            size,
            entries,
            readonly: true,
        });
        name
    }

    // -- statements -------------------------------------------------------

    fn gen_stmt(&mut self, s: &ast::Stmt) -> CgResult<()> {
        if self.is_terminated() {
            match s {
                ast::Stmt::Labeled { .. }
                | ast::Stmt::Case { .. }
                | ast::Stmt::Default { .. }
                | ast::Stmt::Compound(_) => {}
                ast::Stmt::Empty { .. } => return Ok(()),
                other => {
                    if !self.ctx().warned_unreachable {
                        self.ctx().warned_unreachable = true;
                        let pos = other.pos();
                        self.diags.warn(&pos, "Statement is unreachable");
                    }
                    return Ok(());
                }
            }
        }
        match s {
            ast::Stmt::Compound(block) => {
                self.scopes.push();
                let result = self.gen_block_items(&block.items);
                self.scopes.pop();
                result
            }
            ast::Stmt::Empty { .. } => Ok(()),
            ast::Stmt::Expr { expr, .. } => {
                let v = self.gen_expr(expr)?;
                self.warn_unused_value(expr, &v);
                Ok(())
            }
            ast::Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => self.gen_if(cond, then_branch, else_branch.as_deref()),
            ast::Stmt::While { cond, body, .. } => self.gen_while(cond, body),
            ast::Stmt::DoWhile { body, cond, .. } => self.gen_do_while(body, cond),
            ast::Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => self.gen_for(init, cond.as_ref(), step.as_ref(), body),
            ast::Stmt::Switch { kw, cond, body } => self.gen_switch(kw, cond, body),
            ast::Stmt::Case { kw, stmt, .. } => {
                let picked = {
                    let ctx = self.ctx();
                    match ctx.switches.last_mut() {
                        Some(frame) if frame.case_at < frame.cases.len() => {
                            let label = frame.cases[frame.case_at].1.clone();
                            frame.case_at += 1;
                            Some(Some(label))
                        }
                        Some(_) => Some(None),
                        None => None,
                    }
                };
                match picked {
                    Some(Some(label)) => {
                        self.start_block(label);
                        self.gen_stmt(stmt)
                    }
                    Some(None) => self.internal("case list out of sync"),
                    None => {
                        self.diags.error(&kw.pos, "Case label outside switch");
                        Err(CgErr::Invalid)
                    }
                }
            }
            ast::Stmt::Default { kw, stmt } => {
                let picked = {
                    let ctx = self.ctx();
                    ctx.switches
                        .last()
                        .map(|frame| frame.default_label.clone())
                };
                match picked {
                    Some(Some(label)) => {
                        self.start_block(label);
                        self.gen_stmt(stmt)
                    }
                    Some(None) => self.internal("default label missing"),
                    None => {
                        self.diags.error(&kw.pos, "Default label outside switch");
                        Err(CgErr::Invalid)
                    }
                }
            }
            ast::Stmt::Break { kw } => match self.ctx().breaks.last().cloned() {
                Some(target) => {
                    self.set_term(IrTerm::Jump { target });
                    Ok(())
                }
                None => {
                    self.diags
                        .error(&kw.pos, "Break statement outside loop or switch");
                    Err(CgErr::Invalid)
                }
            },
            ast::Stmt::Continue { kw } => match self.ctx().continues.last().cloned() {
                Some(target) => {
                    self.set_term(IrTerm::Jump { target });
                    Ok(())
                }
                None => {
                    self.diags
                        .error(&kw.pos, "Continue statement outside loop");
                    Err(CgErr::Invalid)
                }
            },
            ast::Stmt::Return { kw, expr } => self.gen_return(kw, expr.as_ref()),
            ast::Stmt::Goto { kw, label } => {
                let target = user_label(&label.text);
                self.ctx()
                    .labels_used
                    .entry(label.text.clone())
                    .or_insert_with(|| kw.pos.clone());
                self.set_term(IrTerm::Jump { target });
                Ok(())
            }
            ast::Stmt::Labeled { label, stmt } => {
                if !self.ctx().labels_defined.insert(label.text.clone()) {
                    self.diags.error(
                        &label.pos,
                        format!("Label '{}' defined more than once", label.text),
                    );
                    return Err(CgErr::Invalid);
                }
                let target = user_label(&label.text);
                self.start_block(target);
                self.gen_stmt(stmt)
            }
            ast::Stmt::Asm(asm) => self.gen_asm(asm),
        }
    }

    fn gen_block_items(&mut self, items: &[ast::BlockItem]) -> CgResult<()> {
        for item in items {
            let result = match item {
                ast::BlockItem::Decl(d) => self.local_decl(d),
                ast::BlockItem::Stmt(s) => self.gen_stmt(s),
            };
            match result {
                Ok(()) | Err(CgErr::Invalid) => {}
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(())
    }

    fn warn_unused_value(&mut self, e: &ast::Expr, v: &EVal) {
        if !self.config.warnings.unused_value || v.ty.is_void() {
            return;
        }
        match e.unparen() {
            ast::Expr::Assign { .. }
            | ast::Expr::Postfix { .. }
            | ast::Expr::Unary {
                op: UnOp::PreInc | UnOp::PreDec,
                ..
            } => {}
            ast::Expr::Comma { rhs, .. } => self.warn_unused_value(rhs, v),
            ast::Expr::Call { callee, .. } => {
                if let ast::Expr::Ident(tok) = callee.unparen() {
                    if let Some(attrs) = self.fn_attrs.get(&tok.text) {
                        if attrs.contains(ProcAttrs::MAY_IGNORE_RETURN) {
                            return;
                        }
                    }
                }
                let pos = e.pos();
                self.diags
                    .warn(&pos, "Computed expression value is not used");
            }
            _ => {
                let pos = e.pos();
                self.diags
                    .warn(&pos, "Computed expression value is not used");
            }
        }
    }

    fn gen_if(
        &mut self,
        cond: &ast::Expr,
        then_branch: &ast::Stmt,
        else_branch: Option<&ast::Stmt>,
    ) -> CgResult<()> {
        let then_label = self.new_label("if_then");
        let else_label = self.new_label("if_else");
        let join_label = self.new_label("if_join");

        let c = self.gen_truth(cond)?;
        self.set_term(IrTerm::Branch {
            cond: IrOperand::VReg(c),
            then_label: then_label.clone(),
            else_label: if else_branch.is_some() {
                else_label.clone()
            } else {
                join_label.clone()
            },
        });

        self.start_block(then_label);
        self.gen_stmt(then_branch)?;
        if !self.is_terminated() {
            self.set_term(IrTerm::Jump {
                target: join_label.clone(),
            });
        }

        if let Some(else_branch) = else_branch {
            self.start_block(else_label);
            self.gen_stmt(else_branch)?;
            if !self.is_terminated() {
                self.set_term(IrTerm::Jump {
                    target: join_label.clone(),
                });
            }
        }

        self.start_block(join_label);
        Ok(())
    }

    fn gen_while(&mut self, cond: &ast::Expr, body: &ast::Stmt) -> CgResult<()> {
        let header = self.new_label("while_header");
        let body_label = self.new_label("while_body");
        let join = self.new_label("while_join");

        self.start_block(header.clone());
        let c = self.gen_truth(cond)?;
        self.set_term(IrTerm::Branch {
            cond: IrOperand::VReg(c),
            then_label: body_label.clone(),
            else_label: join.clone(),
        });

        self.start_block(body_label);
        self.ctx().breaks.push(join.clone());
        self.ctx().continues.push(header.clone());
        let result = self.gen_stmt(body);
        self.ctx().breaks.pop();
        self.ctx().continues.pop();
        result?;
        if !self.is_terminated() {
            self.set_term(IrTerm::Jump {
                target: header.clone(),
            });
        }

        self.start_block(join);
        Ok(())
    }

    fn gen_do_while(&mut self, body: &ast::Stmt, cond: &ast::Expr) -> CgResult<()> {
        let body_label = self.new_label("do_body");
        let cond_label = self.new_label("do_cond");
        let join = self.new_label("do_join");

        self.start_block(body_label.clone());
        self.ctx().breaks.push(join.clone());
        self.ctx().continues.push(cond_label.clone());
        let result = self.gen_stmt(body);
        self.ctx().breaks.pop();
        self.ctx().continues.pop();
        result?;

        self.start_block(cond_label);
        let c = self.gen_truth(cond)?;
        self.set_term(IrTerm::Branch {
            cond: IrOperand::VReg(c),
            then_label: body_label,
            else_label: join.clone(),
        });

        self.start_block(join);
        Ok(())
    }

    fn gen_for(
        &mut self,
        init: &ast::ForInit,
        cond: Option<&ast::Expr>,
        step: Option<&ast::Expr>,
        body: &ast::Stmt,
    ) -> CgResult<()> {
        // the C99 init declaration lives in its own scope
        self.scopes.push();
        let result = self.gen_for_inner(init, cond, step, body);
        self.scopes.pop();
        result
    }

    fn gen_for_inner(
        &mut self,
        init: &ast::ForInit,
        cond: Option<&ast::Expr>,
        step: Option<&ast::Expr>,
        body: &ast::Stmt,
    ) -> CgResult<()> {
        match init {
            ast::ForInit::Empty => {}
            ast::ForInit::Expr(e) => {
                let v = self.gen_expr(e)?;
                self.warn_unused_value(e, &v);
            }
            ast::ForInit::Decl(d) => self.local_decl(d)?,
        }

        // when the initial test is known non-zero the test rotates to
        // the loop bottom and disappears entirely
        let rotated = cond.is_none_or(const_nonzero);
        let header = self.new_label("for_header");
        let body_label = self.new_label("for_body");
        let step_label = self.new_label("for_step");
        let join = self.new_label("for_join");

        if rotated {
            self.start_block(body_label.clone());
        } else {
            self.start_block(header.clone());
            let cond = cond.expect("non-rotated loop has a condition");
            let c = self.gen_truth(cond)?;
            self.set_term(IrTerm::Branch {
                cond: IrOperand::VReg(c),
                then_label: body_label.clone(),
                else_label: join.clone(),
            });
            self.start_block(body_label.clone());
        }

        self.ctx().breaks.push(join.clone());
        self.ctx().continues.push(step_label.clone());
        let result = self.gen_stmt(body);
        self.ctx().breaks.pop();
        self.ctx().continues.pop();
        result?;

        self.start_block(step_label);
        if let Some(step) = step {
            self.gen_expr(step)?;
        }
        let back = if rotated { body_label } else { header };
        self.set_term(IrTerm::Jump { target: back });

        self.start_block(join);
        Ok(())
    }

    fn gen_switch(&mut self, kw: &Token, cond: &ast::Expr, body: &ast::Stmt) -> CgResult<()> {
        let v = self.gen_expr(cond)?;
        if !v.ty.is_integer() {
            self.diags.error(
                &kw.pos,
                format!("Switch condition must be an integer, found '{}'", v.ty),
            );
            return Err(CgErr::Invalid);
        }
        let cond_ir = ir_type(&v.ty);
        let cond_vr = v.reg();

        // collect the case labels up front so the compare chain can be
        // emitted before the body
        let mut case_exprs = Vec::new();
        let mut has_default = false;
        collect_cases(body, &mut case_exprs, &mut has_default);

        let mut cases: Vec<(i128, String)> = Vec::new();
        for expr in &case_exprs {
            let c = self.eval_const_expr(expr)?;
            self.warn_enum_mixing(&v.ty, &c.ty, &expr.pos());
            if cases.iter().any(|(val, _)| *val == c.value) {
                self.diags
                    .error(&expr.pos(), format!("Duplicate case value {}", c.value));
                continue;
            }
            let label = self.new_label("sw_case");
            cases.push((c.value, label));
        }

        let join = self.new_label("sw_join");
        let default_label = if has_default {
            Some(self.new_label("sw_default"))
        } else {
            None
        };

        // unhandled enumerators in a strict-enum switch without default
        if !has_default && self.config.warnings.enum_handling {
            if let TyKind::Enum(def) = &v.ty.kind {
                if def.strict.get() {
                    for (name, value) in def.elems.borrow().iter() {
                        if !cases.iter().any(|(v, _)| *v == *value as i128) {
                            self.diags.warn(
                                &kw.pos,
                                format!(
                                    "Enumeration value '{}' not handled in switch.",
                                    name
                                ),
                            );
                        }
                    }
                }
            }
        }

        // compare-and-branch chain, no jump tables
        for (value, label) in &cases {
            let next = self.new_label("sw_next");
            let imm = self.emit_imm(cond_ir, *value as i64);
            let eq = self.emit_to(
                IrOp::Eq,
                cond_ir,
                vec![IrOperand::VReg(cond_vr), IrOperand::VReg(imm)],
            );
            self.set_term(IrTerm::Branch {
                cond: IrOperand::VReg(eq),
                then_label: label.clone(),
                else_label: next.clone(),
            });
            self.start_block(next);
        }
        let chain_end = default_label.clone().unwrap_or_else(|| join.clone());
        self.set_term(IrTerm::Jump { target: chain_end });

        self.ctx().switches.push(SwitchFrame {
            cases,
            case_at: 0,
            default_label,
        });
        self.ctx().breaks.push(join.clone());
        let result = self.gen_stmt(body);
        self.ctx().breaks.pop();
        self.ctx().switches.pop();
        result?;

        self.start_block(join);
        Ok(())
    }

    fn gen_return(&mut self, kw: &Token, expr: Option<&ast::Expr>) -> CgResult<()> {
        let ret_ty = self.ctx().ret.clone();
        let hidden = self.ctx().ret_hidden;
        match expr {
            None => {
                if !ret_ty.is_void() {
                    self.diags
                        .warn(&kw.pos, "Return without a value in a non-void function");
                }
                self.set_term(IrTerm::Ret {
                    ty: IrType::Void,
                    value: None,
                });
            }
            Some(e) => {
                if ret_ty.is_void() {
                    self.diags
                        .error(&kw.pos, "Return with a value in a void function");
                    return Err(CgErr::Invalid);
                }
                let v = self.gen_expr(e)?;
                if hidden {
                    let slot_addr = self.emit_to(
                        IrOp::Lvarptr,
                        IrType::Ptr,
                        vec![IrOperand::Local(RET_SLOT.to_string())],
                    );
                    let dst = self.emit_to(
                        IrOp::Read,
                        IrType::Ptr,
                        vec![IrOperand::VReg(slot_addr)],
                    );
                    if ret_ty.is_record() {
                        if !v.ty.same_as(&ret_ty) {
                            self.diags.error(
                                &kw.pos,
                                format!(
                                    "Incompatible return type: expected '{}', found '{}'",
                                    ret_ty, v.ty
                                ),
                            );
                            return Err(CgErr::Invalid);
                        }
                        self.emit(
                            None,
                            IrOp::Copymem,
                            IrType::Ptr,
                            vec![
                                IrOperand::VReg(dst),
                                IrOperand::VReg(v.reg()),
                                IrOperand::Imm(ret_ty.size() as i64),
                            ],
                        );
                    } else {
                        let converted = self.assign_convert(v, &ret_ty, &kw.pos)?;
                        self.emit(
                            None,
                            IrOp::Write,
                            ir_type(&ret_ty),
                            vec![IrOperand::VReg(dst), IrOperand::VReg(converted.reg())],
                        );
                    }
                    self.set_term(IrTerm::Ret {
                        ty: IrType::Void,
                        value: None,
                    });
                } else {
                    let converted = self.assign_convert(v, &ret_ty, &kw.pos)?;
                    self.set_term(IrTerm::Ret {
                        ty: ir_type(&ret_ty),
                        value: Some(IrOperand::VReg(converted.reg())),
                    });
                }
            }
        }
        Ok(())
    }

    /// Inline assembler: the template passes through to the instruction
    /// selector verbatim; extended operands are evaluated and appended
    /// so their registers exist at the asm site.
    fn gen_asm(&mut self, asm: &ast::AsmStmt) -> CgResult<()> {
        let mut template = String::new();
        for part in &asm.template {
            match lexer::parse_str_text(&part.text) {
                Ok((bytes, _)) => template.push_str(&String::from_utf8_lossy(&bytes)),
                Err(msg) => {
                    self.diags.error(&part.pos, msg);
                    return Err(CgErr::Invalid);
                }
            }
        }
        let mut args = vec![IrOperand::Str(template)];
        for out in &asm.outputs {
            let lv = self.gen_lval(&out.expr)?;
            args.push(IrOperand::VReg(lv.addr));
        }
        for input in &asm.inputs {
            let v = self.gen_expr(&input.expr)?;
            if let Some(vr) = v.vr {
                args.push(IrOperand::VReg(vr));
            }
        }
        for label in &asm.labels {
            let target = user_label(&label.text);
            self.ctx()
                .labels_used
                .entry(label.text.clone())
                .or_insert_with(|| label.pos.clone());
            self.ctx().extra_roots.insert(target);
        }
        self.emit(None, IrOp::Asm, IrType::Void, args);
        Ok(())
    }

    // -- declarations -----------------------------------------------------

    fn proc_attrs(&mut self, attr_lists: &[&[ast::Attr]]) -> ProcAttrs {
        let mut attrs = ProcAttrs::default();
        for list in attr_lists {
            for attr in *list {
                match attr.name.text.as_str() {
                    "usr" => attrs |= ProcAttrs::USR,
                    "may_ignore_return" => attrs |= ProcAttrs::MAY_IGNORE_RETURN,
                    other => {
                        self.diags.warn(
                            &attr.name.pos,
                            format!("Unknown attribute '{}'", other),
                        );
                    }
                }
            }
        }
        attrs
    }

    fn global_decl(&mut self, d: &ast::Decl) -> CgResult<()> {
        let (storage, base) = self.check_decl_specs(&d.specs)?;

        if d.declarators.is_empty() {
            let declares_tag = d
                .specs
                .tspecs
                .iter()
                .any(|ts| matches!(ts, ast::TypeSpec::Record(_) | ast::TypeSpec::Enum(_)));
            if !declares_tag {
                let pos = d.specs.pos().unwrap_or_else(|| d.semi.pos.clone());
                self.diags
                    .warn(&pos, "Declaration does not declare anything");
            }
            return Ok(());
        }

        for id in &d.declarators {
            match self.global_declarator(storage, &base, id, &d.specs.attrs) {
                Ok(()) | Err(CgErr::Invalid) => {}
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(())
    }

    fn global_declarator(
        &mut self,
        storage: Option<ast::StorageClass>,
        base: &CgType,
        id: &ast::InitDeclarator,
        spec_attrs: &[ast::Attr],
    ) -> CgResult<()> {
        let mut ty = self.declarator_type(base.clone(), &id.decl)?;
        let name_tok = match id.decl.name() {
            Some(tok) => tok.clone(),
            None => {
                let pos = id.decl.pos();
                self.diags.error(&pos, "Declarator has no name");
                return Err(CgErr::Invalid);
            }
        };
        let name = name_tok.text.clone();

        if storage == Some(ast::StorageClass::Typedef) {
            if id.init.is_some() {
                self.diags
                    .error(&name_tok.pos, "Typedef may not have an initializer");
                return Err(CgErr::Invalid);
            }
            // a typedef makes its enum strict
            mark_enum_strict(&ty);
            self.declare_sym(&name_tok, SymKind::Typedef, ty)?;
            return Ok(());
        }

        if ty.is_func() {
            let attrs = self.proc_attrs(&[spec_attrs, &id.attrs]);
            if id.init.is_some() {
                self.diags
                    .error(&name_tok.pos, "Function declared like a variable");
                return Err(CgErr::Invalid);
            }
            let is_static = storage == Some(ast::StorageClass::Static);
            self.declare_function(&name_tok, ty, is_static, attrs)?;
            return Ok(());
        }

        if ty.is_void() {
            self.diags.error(
                &name_tok.pos,
                format!("Variable '{}' has incomplete type 'void'", name),
            );
            return Err(CgErr::Invalid);
        }

        // `int a[] = {...}` takes its size from the initializer
        if let TyKind::Array { elem, size: None } = &ty.kind {
            match &id.init {
                Some(ast::Init::List { entries, .. }) => {
                    let n = self.list_array_extent(entries)?;
                    ty = CgType::new(TyKind::Array {
                        elem: elem.clone(),
                        size: Some(n),
                    })
                    .with_quals(ty.quals);
                }
                Some(ast::Init::Expr(e)) => {
                    if let ast::Expr::StrLit(parts) = e.unparen() {
                        let (bytes, _) = self.string_bytes(parts)?;
                        ty = CgType::new(TyKind::Array {
                            elem: elem.clone(),
                            size: Some(bytes.len() as u64 + 1),
                        })
                        .with_quals(ty.quals);
                    }
                }
                None => {
                    if storage != Some(ast::StorageClass::Extern) {
                        self.diags
                            .error(&name_tok.pos, format!("Array '{}' has no size", name));
                        return Err(CgErr::Invalid);
                    }
                }
            }
        }

        if !ty.is_complete() && storage != Some(ast::StorageClass::Extern) {
            self.diags.error(
                &name_tok.pos,
                format!("Variable '{}' has incomplete type '{}'", name, ty),
            );
            return Err(CgErr::Invalid);
        }
        mark_enum_strict(&ty);

        let is_static = storage == Some(ast::StorageClass::Static);
        let entries = match &id.init {
            Some(init) => Some(self.global_init_entries(&ty, init)?),
            None => None,
        };

        // merge with a previous declaration of the same name
        if let Some(prev) = self.scopes.lookup_ord_local(&name).cloned() {
            let prev_static = matches!(prev.kind, SymKind::Global { is_static: true });
            if !prev.ty.same_as(&ty) || !matches!(prev.kind, SymKind::Global { .. }) {
                self.diags.error(
                    &name_tok.pos,
                    format!("Conflicting declaration of '{}'", name),
                );
                self.diags
                    .note(&prev.tok.pos, "Previous declaration is here");
                return Err(CgErr::Invalid);
            }
            if prev_static != is_static && storage != Some(ast::StorageClass::Extern) {
                self.diags.error(
                    &name_tok.pos,
                    format!("Static/non-static mismatch for '{}'", name),
                );
                return Err(CgErr::Invalid);
            }
        } else {
            self.declare_sym(&name_tok, SymKind::Global { is_static }, ty.clone())?;
        }

        if storage == Some(ast::StorageClass::Extern) && entries.is_none() {
            return Ok(()); // declaration only
        }

        match self.global_index.get(&name).copied() {
            Some(idx) => {
                if let Some(entries) = entries {
                    if self.globals[idx].entries.is_some() {
                        self.diags
                            .error(&name_tok.pos, format!("Redefinition of '{}'", name));
                        return Err(CgErr::Invalid);
                    }
                    self.globals[idx].entries = Some(entries);
                }
            }
            None => {
                self.global_index.insert(name.clone(), self.globals.len());
                self.globals.push(GlobalSlot { name, ty, entries });
            }
        }
        Ok(())
    }

    fn declare_sym(&mut self, tok: &Token, kind: SymKind, ty: CgType) -> CgResult<()> {
        if self.scopes.depth() > 1 && self.scopes.shadows(&tok.text) && self.config.warnings.shadow
        {
            self.diags.warn(
                &tok.pos,
                format!("Declaration of '{}' shadows an outer declaration", tok.text),
            );
        }
        let sym = Symbol {
            name: tok.text.clone(),
            kind,
            ty,
            tok: tok.clone(),
        };
        if let Err(prev) = self.scopes.insert_ord(sym) {
            self.diags
                .error(&tok.pos, format!("Redefinition of '{}'", tok.text));
            self.diags
                .note(&prev.tok.pos, "Previous definition is here");
            return Err(CgErr::Invalid);
        }
        Ok(())
    }

    fn declare_function(
        &mut self,
        tok: &Token,
        ty: CgType,
        is_static: bool,
        attrs: ProcAttrs,
    ) -> CgResult<()> {
        let name = tok.text.clone();
        if let Some(prev) = self.scopes.lookup_ord_local(&name).cloned() {
            if !prev.ty.same_as(&ty) {
                self.diags.error(
                    &tok.pos,
                    format!("Conflicting declaration of '{}'", name),
                );
                self.diags
                    .note(&prev.tok.pos, "Previous declaration is here");
                return Err(CgErr::Invalid);
            }
            if let SymKind::Global {
                is_static: prev_static,
            } = prev.kind
            {
                if prev_static && !is_static {
                    self.diags.error(
                        &tok.pos,
                        format!("Function '{}' was previously declared static", name),
                    );
                    return Err(CgErr::Invalid);
                }
            }
        } else {
            self.declare_sym(tok, SymKind::Global { is_static }, ty)?;
        }
        *self.fn_attrs.entry(name).or_default() |= attrs;
        Ok(())
    }

    fn local_decl(&mut self, d: &ast::Decl) -> CgResult<()> {
        let (storage, base) = self.check_decl_specs(&d.specs)?;
        for id in &d.declarators {
            match self.local_declarator(storage, &base, id) {
                Ok(()) | Err(CgErr::Invalid) => {}
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(())
    }

    fn local_declarator(
        &mut self,
        storage: Option<ast::StorageClass>,
        base: &CgType,
        id: &ast::InitDeclarator,
    ) -> CgResult<()> {
        let mut ty = self.declarator_type(base.clone(), &id.decl)?;
        let name_tok = match id.decl.name() {
            Some(tok) => tok.clone(),
            None => {
                let pos = id.decl.pos();
                self.diags.error(&pos, "Declarator has no name");
                return Err(CgErr::Invalid);
            }
        };
        let name = name_tok.text.clone();

        if storage == Some(ast::StorageClass::Typedef) {
            mark_enum_strict(&ty);
            return self.declare_sym(&name_tok, SymKind::Typedef, ty);
        }
        if ty.is_func() || storage == Some(ast::StorageClass::Extern) {
            // block-scope reference to a module-level object
            return self.declare_sym(&name_tok, SymKind::Global { is_static: false }, ty);
        }

        if let TyKind::Array { elem, size: None } = &ty.kind {
            if let Some(ast::Init::List { entries, .. }) = &id.init {
                let n = self.list_array_extent(entries)?;
                ty = CgType::new(TyKind::Array {
                    elem: elem.clone(),
                    size: Some(n),
                })
                .with_quals(ty.quals);
            } else {
                self.diags
                    .error(&name_tok.pos, format!("Array '{}' has no size", name));
                return Err(CgErr::Invalid);
            }
        }
        if !ty.is_complete() {
            self.diags.error(
                &name_tok.pos,
                format!("Variable '{}' has incomplete type '{}'", name, ty),
            );
            return Err(CgErr::Invalid);
        }
        mark_enum_strict(&ty);

        if storage == Some(ast::StorageClass::Static) {
            // static locals live in module data under a mangled name
            let data_name = self.static_local_name(&name);
            let entries = match &id.init {
                Some(init) => Some(self.global_init_entries(&ty, init)?),
                None => None,
            };
            self.global_index
                .insert(data_name.clone(), self.globals.len());
            self.globals.push(GlobalSlot {
                name: data_name.clone(),
                ty: ty.clone(),
                entries,
            });
            return self.declare_sym(&name_tok, SymKind::StaticLocal { data_name }, ty);
        }

        let slot = self.new_slot(&name, ty.size());
        self.declare_sym(
            &name_tok,
            SymKind::Local { slot: slot.clone() },
            ty.clone(),
        )?;

        if let Some(init) = &id.init {
            let addr = self.emit_to(IrOp::Lvarptr, IrType::Ptr, vec![IrOperand::Local(slot)]);
            self.local_init(&ty, addr, init, &name_tok.pos)?;
        }
        Ok(())
    }

    fn static_local_name(&mut self, name: &str) -> String {
        let proc = self.ctx().name.clone();
        let mut candidate = format!("{}.{}", proc, name);
        let mut n = 0;
        while self.global_index.contains_key(&candidate) {
            n += 1;
            candidate = format!("{}.{}.{}", proc, name, n);
        }
        candidate
    }

    /// Initialize a local object at `addr`.
    fn local_init(
        &mut self,
        ty: &CgType,
        addr: VReg,
        init: &ast::Init,
        pos: &SourcePos,
    ) -> CgResult<()> {
        match init {
            ast::Init::Expr(e) => {
                if ty.is_record() {
                    let v = self.gen_expr(e)?;
                    if !v.ty.same_as(ty) {
                        self.diags.error(
                            pos,
                            format!("Incompatible types: expected '{}', found '{}'", ty, v.ty),
                        );
                        return Err(CgErr::Invalid);
                    }
                    self.emit(
                        None,
                        IrOp::Copymem,
                        IrType::Ptr,
                        vec![
                            IrOperand::VReg(addr),
                            IrOperand::VReg(v.reg()),
                            IrOperand::Imm(ty.size() as i64),
                        ],
                    );
                    return Ok(());
                }
                if ty.is_array() {
                    // character arrays initialize from a string literal
                    if let ast::Expr::StrLit(parts) = e.unparen() {
                        let (bytes, wide) = self.string_bytes(parts)?;
                        let src_name = self.intern_string(&bytes, wide);
                        let src = self.emit_to(
                            IrOp::Gvarptr,
                            IrType::Ptr,
                            vec![IrOperand::Sym(src_name)],
                        );
                        let copy = ty
                            .size()
                            .min(if wide { 2 * (bytes.len() as u64 + 1) } else {
                                bytes.len() as u64 + 1
                            });
                        self.emit(
                            None,
                            IrOp::Copymem,
                            IrType::Ptr,
                            vec![
                                IrOperand::VReg(addr),
                                IrOperand::VReg(src),
                                IrOperand::Imm(copy as i64),
                            ],
                        );
                        return Ok(());
                    }
                    self.diags
                        .error(pos, "Array initializer must be a brace list");
                    return Err(CgErr::Invalid);
                }
                let v = self.gen_expr(e)?;
                let converted = self.assign_convert(v, ty, pos)?;
                self.emit(
                    None,
                    IrOp::Write,
                    ir_type(ty),
                    vec![IrOperand::VReg(addr), IrOperand::VReg(converted.reg())],
                );
                Ok(())
            }
            ast::Init::List { lbrace, entries } => {
                if ty.is_scalar() {
                    // a scalar may be wrapped in one set of braces
                    if entries.len() != 1 || !entries[0].designators.is_empty() {
                        self.diags
                            .error(&lbrace.pos, "Invalid initializer for a scalar");
                        return Err(CgErr::Invalid);
                    }
                    return self.local_init(ty, addr, &entries[0].init, &lbrace.pos);
                }
                let mut positions = Vec::new();
                self.resolve_init_list(ty, 0, entries, &lbrace.pos, &mut positions)?;
                // zero every leaf first, then store the explicit values
                let mut leaves = Vec::new();
                collect_leaves(ty, 0, &mut leaves);
                for (off, lty, bits) in &leaves {
                    if positions
                        .iter()
                        .any(|p| p.offset == *off && p.bits.map(|b| b.bit_off) == bits.map(|b| b.bit_off))
                    {
                        continue;
                    }
                    let lv = self.lval_at(addr, *off, lty.clone(), *bits);
                    let zero = self.emit_imm(ir_type(lty), 0);
                    self.store_lval(&lv, zero);
                }
                for p in &positions {
                    let lv = self.lval_at(addr, p.offset, p.ty.clone(), p.bits);
                    match p.init {
                        ast::Init::Expr(e) => {
                            let v = self.gen_expr(e)?;
                            let pos = e.pos();
                            let converted = self.assign_convert(v, &p.ty, &pos)?;
                            self.store_lval(&lv, converted.reg());
                        }
                        ast::Init::List { lbrace, .. } => {
                            // nested aggregates were flattened by the
                            // resolver; a list here initializes a scalar
                            self.diags
                                .error(&lbrace.pos, "Invalid initializer for a scalar");
                            return Err(CgErr::Invalid);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn lval_at(&mut self, base: VReg, offset: u64, ty: CgType, bits: Option<BitField>) -> LVal {
        let addr = if offset == 0 {
            base
        } else {
            let off = self.emit_imm(IrType::I16, offset as i64);
            self.emit_to(
                IrOp::Add,
                IrType::Ptr,
                vec![IrOperand::VReg(base), IrOperand::VReg(off)],
            )
        };
        LVal { ty, addr, bits }
    }

    // -- function definitions ---------------------------------------------

    fn func_def(&mut self, f: &ast::FuncDef) -> CgResult<()> {
        let (storage, base) = self.check_decl_specs(&f.specs)?;
        let ty = self.declarator_type(base, &f.decl)?;
        let name_tok = match f.decl.name() {
            Some(tok) => tok.clone(),
            None => {
                let pos = f.decl.pos();
                self.diags.error(&pos, "Function definition has no name");
                return Err(CgErr::Invalid);
            }
        };
        let ft = match &ty.kind {
            TyKind::Func(ft) => (**ft).clone(),
            _ => {
                self.diags
                    .error(&name_tok.pos, "Function body requires a function declarator");
                return Err(CgErr::Invalid);
            }
        };
        let is_static = storage == Some(ast::StorageClass::Static);
        if matches!(
            storage,
            Some(ast::StorageClass::Typedef) | Some(ast::StorageClass::Auto)
                | Some(ast::StorageClass::Register)
        ) {
            self.diags
                .error(&name_tok.pos, "Invalid storage class for a function");
            return Err(CgErr::Invalid);
        }
        let attrs = self.proc_attrs(&[&f.specs.attrs, &f.attrs]);
        self.declare_function(&name_tok, ty.clone(), is_static, attrs)?;
        if !self.defined_fns.insert(name_tok.text.clone()) {
            self.diags.error(
                &name_tok.pos,
                format!("Redefinition of '{}'", name_tok.text),
            );
            return Err(CgErr::Invalid);
        }
        let attrs = self
            .fn_attrs
            .get(&name_tok.text)
            .copied()
            .unwrap_or(attrs);

        let ret_hidden = !ft.ret.is_void() && ret_needs_hidden_ptr(&ft.ret);
        let mut ctx = ProcCtx::new(name_tok.text.clone(), ft.ret.clone(), ret_hidden, attrs);
        if ret_hidden {
            ctx.args.push((RET_SLOT.to_string(), IrType::Ptr));
            ctx.slot_names.insert(RET_SLOT.to_string());
        }
        self.cur = Some(ctx);
        self.scopes.push();

        let body_result = self.func_body(f, &ft);

        // finish the procedure even when the body had recoverable errors
        if !self.ctx().terminated {
            if self.ctx().ret.is_void() || self.ctx().ret_hidden {
                self.set_term(IrTerm::Ret {
                    ty: IrType::Void,
                    value: None,
                });
            } else {
                self.diags.warn(
                    &f.body.rbrace.pos,
                    "Control reaches the end of a non-void function",
                );
                let ret_ty = self.ctx().ret.clone();
                let zero = self.emit_imm(ir_type(&ret_ty), 0);
                self.set_term(IrTerm::Ret {
                    ty: ir_type(&ret_ty),
                    value: Some(IrOperand::VReg(zero)),
                });
            }
        }

        let mut used: Vec<(String, SourcePos)> = self
            .ctx()
            .labels_used
            .iter()
            .map(|(n, p)| (n.clone(), p.clone()))
            .collect();
        used.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, pos) in used {
            if !self.ctx().labels_defined.contains(&name) {
                self.diags
                    .error(&pos, format!("Label '{}' used but not defined", name));
            }
        }

        self.scopes.pop();
        let ctx = self.cur.take().expect("procedure context");
        let blocks = prune_blocks(ctx.blocks, &ctx.extra_roots);
        let ret = if ctx.ret_hidden || ctx.ret.is_void() {
            IrType::Void
        } else {
            ir_type(&ctx.ret)
        };
        self.procs.push(IrProc {
            name: ctx.name,
            args: ctx.args,
            ret,
            attrs: ctx.attrs,
            lvars: ctx.lvars,
            blocks,
        });
        match body_result {
            Err(CgErr::Fatal(e)) => Err(CgErr::Fatal(e)),
            _ => Ok(()),
        }
    }

    fn func_body(&mut self, f: &ast::FuncDef, ft: &FuncType) -> CgResult<()> {
        let params = def_params(&f.decl).map(|(p, _)| p).unwrap_or(&[]);
        let mut record_copies = Vec::new();
        for (i, p) in params.iter().enumerate() {
            let pty = match ft.params.get(i) {
                Some(t) => t.clone(),
                None => break,
            };
            let ptok = match p.decl.name() {
                Some(tok) => tok.clone(),
                None => {
                    let pos = p.decl.pos();
                    self.diags.error(&pos, "Parameter name omitted");
                    continue;
                }
            };
            mark_enum_strict(&pty);
            if pty.is_record() {
                // by-value record: the caller passes a pointer and the
                // callee copies into a private slot
                self.ctx().args.push((ptok.text.clone(), IrType::Ptr));
                self.ctx().slot_names.insert(ptok.text.clone());
                let slot = self.new_slot(&format!("{}.v", ptok.text), pty.size());
                record_copies.push((ptok.text.clone(), slot.clone(), pty.size()));
                let _ = self.declare_sym(&ptok, SymKind::Local { slot }, pty);
            } else {
                self.ctx().args.push((ptok.text.clone(), ir_type(&pty)));
                self.ctx().slot_names.insert(ptok.text.clone());
                let _ = self.declare_sym(&ptok, SymKind::Arg { index: i }, pty);
            }
        }
        for (arg, slot, size) in record_copies {
            let a = self.emit_to(IrOp::Lvarptr, IrType::Ptr, vec![IrOperand::Local(arg)]);
            let src = self.emit_to(IrOp::Read, IrType::Ptr, vec![IrOperand::VReg(a)]);
            let dst = self.emit_to(IrOp::Lvarptr, IrType::Ptr, vec![IrOperand::Local(slot)]);
            self.emit(
                None,
                IrOp::Copymem,
                IrType::Ptr,
                vec![
                    IrOperand::VReg(dst),
                    IrOperand::VReg(src),
                    IrOperand::Imm(size as i64),
                ],
            );
        }
        self.gen_block_items(&f.body.items)
    }

    // -- initializer resolution -------------------------------------------

    /// Array extent implied by an initializer list.
    fn list_array_extent(&mut self, entries: &[ast::InitEntry]) -> CgResult<u64> {
        let mut cursor: u64 = 0;
        let mut extent: u64 = 0;
        for entry in entries {
            if let Some(Designator::Index { expr, .. }) = entry.designators.first() {
                let c = self.eval_const_expr(expr)?;
                if c.value < 0 {
                    self.diags
                        .error(&expr.pos(), "Array designator index is negative");
                    return Err(CgErr::Invalid);
                }
                cursor = c.value as u64;
            }
            extent = extent.max(cursor + 1);
            cursor += 1;
        }
        Ok(extent.max(1))
    }

    /// Flatten an initializer list for `ty` into scalar positions.
    /// Duplicate fully-designated entries are diagnosed and the last
    /// one wins.
    fn resolve_init_list<'t>(
        &mut self,
        ty: &CgType,
        base: u64,
        entries: &'t [ast::InitEntry],
        pos: &SourcePos,
        out: &mut Vec<InitPos<'t>>,
    ) -> CgResult<()> {
        match &ty.kind {
            TyKind::Array { elem, size } => {
                let size = size.unwrap_or(u64::MAX);
                let mut cursor: u64 = 0;
                for entry in entries {
                    if let Some(Designator::Index { expr, .. }) = entry.designators.first() {
                        let c = self.eval_const_expr(expr)?;
                        cursor = c.value as u64;
                    } else if !entry.designators.is_empty() {
                        let p = entry.init.pos();
                        self.diags
                            .error(&p, "Field designator in array initializer");
                        return Err(CgErr::Invalid);
                    }
                    if cursor >= size {
                        let p = entry.init.pos();
                        self.diags.error(&p, "Excess elements in initializer");
                        return Err(CgErr::Invalid);
                    }
                    let rest = if entry.designators.is_empty() {
                        &entry.designators[..]
                    } else {
                        &entry.designators[1..]
                    };
                    let off = base + cursor * elem.size();
                    self.bind_init(elem, off, None, &entry.init, rest, pos, out)?;
                    cursor += 1;
                }
                Ok(())
            }
            TyKind::Record(def) => {
                let layout = def.layout.borrow().clone();
                let layout = match layout {
                    Some(l) => l,
                    None => {
                        self.diags
                            .error(pos, "Initializer for an incomplete type");
                        return Err(CgErr::Invalid);
                    }
                };
                let is_union = def.kind == RecordKind::Union;
                let mut cursor = 0usize;
                for (n, entry) in entries.iter().enumerate() {
                    if let Some(Designator::Field { name, .. }) = entry.designators.first() {
                        match layout.members.iter().position(|m| m.name == name.text) {
                            Some(idx) => cursor = idx,
                            None => {
                                self.diags.error(
                                    &name.pos,
                                    format!("'{}' has no member named '{}'", ty, name.text),
                                );
                                return Err(CgErr::Invalid);
                            }
                        }
                    } else if !entry.designators.is_empty() {
                        let p = entry.init.pos();
                        self.diags
                            .error(&p, "Index designator in record initializer");
                        return Err(CgErr::Invalid);
                    } else if is_union && n > 0 {
                        // only the first union member initializes
                        let p = entry.init.pos();
                        self.diags
                            .warn(&p, "Excess initializer entries for union");
                        break;
                    }
                    if cursor >= layout.members.len() {
                        let p = entry.init.pos();
                        self.diags.error(&p, "Excess elements in initializer");
                        return Err(CgErr::Invalid);
                    }
                    let member = &layout.members[cursor];
                    let rest = if entry.designators.is_empty() {
                        &entry.designators[..]
                    } else {
                        &entry.designators[1..]
                    };
                    self.bind_init(
                        &member.ty,
                        base + member.offset,
                        member.bits,
                        &entry.init,
                        rest,
                        pos,
                        out,
                    )?;
                    cursor += 1;
                }
                Ok(())
            }
            _ => {
                self.diags
                    .error(pos, "Brace initializer for a scalar object");
                Err(CgErr::Invalid)
            }
        }
    }

    /// Navigate any remaining designators, then bind the initializer to
    /// its resolved position.
    #[allow(clippy::too_many_arguments)]
    fn bind_init<'t>(
        &mut self,
        ty: &CgType,
        off: u64,
        bits: Option<BitField>,
        init: &'t ast::Init,
        designators: &'t [Designator],
        pos: &SourcePos,
        out: &mut Vec<InitPos<'t>>,
    ) -> CgResult<()> {
        if let Some(first) = designators.first() {
            match first {
                Designator::Field { name, .. } => {
                    let (m, _) = self.member_lookup(ty, name, false)?;
                    return self.bind_init(
                        &m.ty.clone(),
                        off + m.offset,
                        m.bits,
                        init,
                        &designators[1..],
                        pos,
                        out,
                    );
                }
                Designator::Index { expr, lbracket } => {
                    let (elem, size) = match &ty.kind {
                        TyKind::Array { elem, size } => (elem.clone(), size.unwrap_or(u64::MAX)),
                        _ => {
                            self.diags
                                .error(&lbracket.pos, "Index designator on a non-array");
                            return Err(CgErr::Invalid);
                        }
                    };
                    let c = self.eval_const_expr(expr)?;
                    if c.value < 0 || c.value as u64 >= size {
                        self.diags
                            .error(&lbracket.pos, "Array designator index out of range");
                        return Err(CgErr::Invalid);
                    }
                    let off = off + c.value as u64 * elem.size();
                    return self.bind_init(&elem, off, None, init, &designators[1..], pos, out);
                }
            }
        }

        if ty.is_record() || ty.is_array() {
            match init {
                ast::Init::List { lbrace, entries } => {
                    return self.resolve_init_list(ty, off, entries, &lbrace.pos, out);
                }
                ast::Init::Expr(e) => {
                    let p = e.pos();
                    self.diags
                        .error(&p, "Initializer for an aggregate member requires braces");
                    return Err(CgErr::Invalid);
                }
            }
        }

        // scalar target; the last fully-designated write wins
        if let Some(idx) = out.iter().position(|p| {
            p.offset == off && p.bits.map(|b| b.bit_off) == bits.map(|b| b.bit_off)
        }) {
            let p = init.pos();
            self.diags
                .warn(&p, "Initializer overrides a prior initialization");
            out.remove(idx);
        }
        out.push(InitPos {
            offset: off,
            ty: ty.clone(),
            bits,
            init,
        });
        Ok(())
    }

    /// Constant initializer entries for a module-level object.
    fn global_init_entries(
        &mut self,
        ty: &CgType,
        init: &ast::Init,
    ) -> CgResult<Vec<IrDataEntry>> {
        if ty.is_scalar() {
            let expr = match init {
                ast::Init::Expr(e) => e,
                ast::Init::List { lbrace, entries } => {
                    if entries.len() != 1 || !entries[0].designators.is_empty() {
                        self.diags
                            .error(&lbrace.pos, "Invalid initializer for a scalar");
                        return Err(CgErr::Invalid);
                    }
                    match &entries[0].init {
                        ast::Init::Expr(e) => e,
                        ast::Init::List { lbrace, .. } => {
                            self.diags
                                .error(&lbrace.pos, "Invalid initializer for a scalar");
                            return Err(CgErr::Invalid);
                        }
                    }
                }
            };
            return Ok(vec![self.const_scalar_entry(ty, expr)?]);
        }

        // character arrays initialize from a string literal
        if let (TyKind::Array { elem, size }, ast::Init::Expr(e)) = (&ty.kind, init) {
            if let ast::Expr::StrLit(parts) = e.unparen() {
                if elem.int_elem().map(IntElem::size) == Some(1) {
                    let (bytes, _) = self.string_bytes(parts)?;
                    let size = size.unwrap_or(bytes.len() as u64 + 1);
                    let mut entries: Vec<IrDataEntry> = bytes
                        .iter()
                        .take(size as usize)
                        .map(|&b| IrDataEntry::Int(IrType::I8, b as i64))
                        .collect();
                    let used = entries.len() as u64;
                    if size > used {
                        entries.push(IrDataEntry::Zero(size - used));
                    }
                    return Ok(entries);
                }
            }
        }

        let entries = match init {
            ast::Init::List { lbrace, entries } => {
                let mut positions = Vec::new();
                self.resolve_init_list(ty, 0, entries, &lbrace.pos, &mut positions)?;
                positions
            }
            ast::Init::Expr(e) => {
                let p = e.pos();
                self.diags
                    .error(&p, "Aggregate initializer requires braces");
                return Err(CgErr::Invalid);
            }
        };

        // render into a byte image with address relocations
        let size = ty.size() as usize;
        let mut image = vec![0u8; size];
        let mut relocs: Vec<(u64, String, i64)> = Vec::new();
        for p in &entries {
            let expr = match p.init {
                ast::Init::Expr(e) => e,
                ast::Init::List { lbrace, .. } => {
                    self.diags
                        .error(&lbrace.pos, "Invalid initializer for a scalar");
                    return Err(CgErr::Invalid);
                }
            };
            if p.ty.is_pointer() {
                if let Some((sym, addend)) = self.eval_addr_const(expr)? {
                    relocs.push((p.offset, sym, addend));
                    continue;
                }
            }
            let c = self.eval_const_expr(expr)?;
            let wrapped = wrap_const(c.value, &p.ty);
            if wrapped != c.value && self.config.warnings.conversion {
                let pos = expr.pos();
                self.diags.warn(
                    &pos,
                    format!("Initializer value does not fit in '{}'", p.ty),
                );
            }
            match p.bits {
                Some(bf) => {
                    let unit_size = p.ty.size() as usize;
                    let mut unit: u128 = 0;
                    for i in 0..unit_size {
                        unit |= (image[p.offset as usize + i] as u128) << (8 * i);
                    }
                    let mask = (1u128 << bf.width) - 1;
                    unit &= !(mask << bf.bit_off);
                    unit |= ((wrapped as u128) & mask) << bf.bit_off;
                    for i in 0..unit_size {
                        image[p.offset as usize + i] = (unit >> (8 * i)) as u8;
                    }
                }
                None => {
                    let bytes = (wrapped as u128).to_le_bytes();
                    let n = p.ty.size() as usize;
                    image[p.offset as usize..p.offset as usize + n]
                        .copy_from_slice(&bytes[..n]);
                }
            }
        }
        Ok(entries_from_image(&image, &mut relocs))
    }

    /// One constant entry for a scalar global.
    fn const_scalar_entry(&mut self, ty: &CgType, expr: &ast::Expr) -> CgResult<IrDataEntry> {
        if ty.is_pointer() {
            if let Some((sym, offset)) = self.eval_addr_const(expr)? {
                return Ok(IrDataEntry::Addr { sym, offset });
            }
        }
        let c = self.eval_const_expr(expr)?;
        let wrapped = wrap_const(c.value, ty);
        if wrapped != c.value && self.config.warnings.conversion {
            let pos = expr.pos();
            self.diags
                .warn(&pos, format!("Initializer value does not fit in '{}'", ty));
        }
        self.warn_implicit_int_conv(&c.ty, ty, &expr.pos());
        Ok(IrDataEntry::Int(ir_type(ty), wrapped as i64))
    }

    /// Address-constant forms: string literals, `&global`, `&g.f`,
    /// `&g[i]`, bare array/function names, casts and constant offsets
    /// thereof. `Ok(None)` means the expression is not an address
    /// constant.
    fn eval_addr_const(&mut self, e: &ast::Expr) -> CgResult<Option<(String, i64)>> {
        match e.unparen() {
            ast::Expr::StrLit(parts) => {
                let (bytes, wide) = self.string_bytes(parts)?;
                Ok(Some((self.intern_string(&bytes, wide), 0)))
            }
            ast::Expr::Unary {
                op: UnOp::Addr,
                expr,
                ..
            } => self.addr_const_lval(expr),
            ast::Expr::Ident(tok) => match self.scopes.lookup_ord(&tok.text) {
                Some(sym)
                    if matches!(sym.kind, SymKind::Global { .. })
                        && (sym.ty.is_array() || sym.ty.is_func()) =>
                {
                    Ok(Some((sym.name.clone(), 0)))
                }
                _ => Ok(None),
            },
            ast::Expr::Cast { tname, expr, .. } => {
                let to = self.type_name_type(tname)?;
                if to.is_pointer() {
                    self.eval_addr_const(expr)
                } else {
                    Ok(None)
                }
            }
            ast::Expr::Binary {
                op: op @ (BinOp::Add | BinOp::Sub),
                lhs,
                rhs,
                ..
            } => {
                let base = self.eval_addr_const(lhs)?;
                if let Some((sym, off)) = base {
                    let c = self.eval_const_expr(rhs)?;
                    let delta = if *op == BinOp::Sub { -c.value } else { c.value };
                    return Ok(Some((sym, off + delta as i64)));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn addr_const_lval(&mut self, e: &ast::Expr) -> CgResult<Option<(String, i64)>> {
        match e.unparen() {
            ast::Expr::Ident(tok) => match self.scopes.lookup_ord(&tok.text) {
                Some(sym) if matches!(sym.kind, SymKind::Global { .. }) => {
                    Ok(Some((sym.name.clone(), 0)))
                }
                _ => Ok(None),
            },
            ast::Expr::Member {
                base,
                member,
                indirect: false,
                ..
            } => {
                let inner = self.addr_const_lval(base)?;
                if let Some((sym, off)) = inner {
                    let bty = self.expr_type_quiet(base)?;
                    let (m, _) = self.member_lookup(&bty, member, false)?;
                    return Ok(Some((sym, off + m.offset as i64)));
                }
                Ok(None)
            }
            ast::Expr::Index { base, index, .. } => {
                let inner = self.addr_const_lval(base)?;
                if let Some((sym, off)) = inner {
                    let bty = decay(self.expr_type_quiet(base)?);
                    let elem_size = bty.pointee().map(CgType::size).unwrap_or(1);
                    let c = self.eval_const_expr(index)?;
                    return Ok(Some((sym, off + c.value as i64 * elem_size as i64)));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::StringSource;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile(src: &str) -> (IrModule, Diagnostics) {
        let config = CompilerConfig::new();
        let mut source = StringSource::new("t.c", src);
        let lexer = Lexer::new(&mut source);
        let (module, mut diags) = Parser::new(lexer).parse_module().unwrap();
        let ir = generate(&module, &config, &mut diags).unwrap();
        (ir, diags)
    }

    fn compile_ok(src: &str) -> IrModule {
        let (ir, diags) = compile(src);
        assert!(
            !diags.has_errors(),
            "unexpected errors: {:?}",
            diags.iter().collect::<Vec<_>>()
        );
        ir
    }

    fn find_proc<'m>(m: &'m IrModule, name: &str) -> &'m IrProc {
        m.procs()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no proc '{}'", name))
    }

    fn find_data<'m>(m: &'m IrModule, name: &str) -> &'m IrData {
        m.data()
            .find(|d| d.name == name)
            .unwrap_or_else(|| panic!("no data '{}'", name))
    }

    fn all_instrs(p: &IrProc) -> impl Iterator<Item = &IrInstr> {
        p.blocks.iter().flat_map(|b| b.instrs.iter())
    }

    /// Every non-entry block must have at least one predecessor.
    fn check_block_invariant(p: &IrProc) {
        for (i, block) in p.blocks.iter().enumerate() {
            if i == 0 {
                continue;
            }
            let has_pred = p.blocks.iter().any(|b| match &b.term {
                IrTerm::Jump { target } => *target == block.label,
                IrTerm::Branch {
                    then_label,
                    else_label,
                    ..
                } => *then_label == block.label || *else_label == block.label,
                IrTerm::Ret { .. } => false,
            });
            assert!(
                has_pred,
                "block '{}' in '{}' has no predecessor",
                block.label, p.name
            );
        }
    }

    #[test]
    fn test_return_zero() {
        let ir = compile_ok("int main(void) { return 0; }");
        let main = find_proc(&ir, "main");
        assert_eq!(main.ret, IrType::I16);
        assert_eq!(main.blocks.len(), 1);
        let entry = &main.blocks[0];
        assert_eq!(entry.label, "entry");
        assert_eq!(entry.instrs.len(), 1);
        assert_eq!(entry.instrs[0].op, IrOp::Imm);
        assert_eq!(entry.instrs[0].ty, IrType::I16);
        assert_eq!(entry.instrs[0].args, vec![IrOperand::Imm(0)]);
        match &entry.term {
            IrTerm::Ret { ty, value } => {
                assert_eq!(*ty, IrType::I16);
                assert!(value.is_some());
            }
            other => panic!("expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_globals_and_load() {
        let ir = compile_ok("int a, b = 1, c = 2; int f(void) { return c; }");
        assert_eq!(find_data(&ir, "a").entries, vec![IrDataEntry::Zero(2)]);
        assert_eq!(
            find_data(&ir, "b").entries,
            vec![IrDataEntry::Int(IrType::I16, 1)]
        );
        assert_eq!(
            find_data(&ir, "c").entries,
            vec![IrDataEntry::Int(IrType::I16, 2)]
        );
        let f = find_proc(&ir, "f");
        assert!(all_instrs(f).any(|i| i.op == IrOp::Gvarptr
            && i.args == vec![IrOperand::Sym("c".to_string())]));
        assert!(all_instrs(f).any(|i| i.op == IrOp::Read && i.ty == IrType::I16));
    }

    #[test]
    fn test_args_store_and_call() {
        let ir = compile_ok(
            "int a; int f(int x, int y) { return x + y; } \
             int g(void) { a = 1; return f(a, a); }",
        );
        let f = find_proc(&ir, "f");
        assert_eq!(
            f.args,
            vec![("x".to_string(), IrType::I16), ("y".to_string(), IrType::I16)]
        );
        assert!(all_instrs(f).any(|i| i.op == IrOp::Add && i.ty == IrType::I16));
        let g = find_proc(&ir, "g");
        assert!(all_instrs(g).any(|i| i.op == IrOp::Write));
        let call = all_instrs(g).find(|i| i.op == IrOp::Call).expect("call");
        assert_eq!(call.ty, IrType::I16);
        assert_eq!(call.args[0], IrOperand::Sym("f".to_string()));
        assert_eq!(call.args.len(), 3);
    }

    #[test]
    fn test_for_loop_shape() {
        let ir = compile_ok(
            "int g; int f(void) { int i; for (i = 10; i; i = i - 1) g = i; return 0; }",
        );
        let f = find_proc(&ir, "f");
        check_block_invariant(f);
        let header = f
            .blocks
            .iter()
            .find(|b| b.label.starts_with("for_header"))
            .expect("header block");
        assert!(f.blocks.iter().any(|b| b.label.starts_with("for_body")));
        let step = f
            .blocks
            .iter()
            .find(|b| b.label.starts_with("for_step"))
            .expect("step block");
        assert!(f.blocks.iter().any(|b| b.label.starts_with("for_join")));
        // exactly one back-edge, from the step block to the header
        let jumps_to_header: Vec<&str> = f
            .blocks
            .iter()
            .filter(|b| match &b.term {
                IrTerm::Jump { target } => *target == header.label,
                _ => false,
            })
            .map(|b| b.label.as_str())
            .collect();
        assert_eq!(jumps_to_header.len(), 2); // entry fall-in + back-edge
        assert!(jumps_to_header.contains(&step.label.as_str()));
        // g is written inside the loop body
        assert!(all_instrs(f).any(|i| i.op == IrOp::Write));
    }

    #[test]
    fn test_bool_conversion_warning() {
        let (_, diags) = compile("int c; _Bool b; void f(void) { c = b; }");
        assert!(!diags.has_errors());
        assert_eq!(diags.warning_count(), 1);
        let warning = diags
            .iter()
            .find(|d| d.level == crate::diagnostics::Level::Warning)
            .expect("warning");
        assert_eq!(warning.message, "Implicit conversion from _Bool to int");
    }

    #[test]
    fn test_enum_switch_exhaustiveness() {
        let (_, diags) = compile(
            "enum E { E1, E2 }; void f(enum E x) { switch (x) { case E1: break; } }",
        );
        assert!(!diags.has_errors());
        assert_eq!(diags.warning_count(), 1);
        let warning = diags.iter().next().expect("warning");
        assert_eq!(
            warning.message,
            "Enumeration value 'E2' not handled in switch."
        );
    }

    #[test]
    fn test_enum_switch_with_default_is_silent() {
        let (_, diags) = compile(
            "enum E { E1, E2 }; void f(enum E x) { switch (x) { case E1: break; default: break; } }",
        );
        assert_eq!(diags.warning_count(), 0);
    }

    #[test]
    fn test_promotion_in_arithmetic() {
        let ir = compile_ok("char a; char b; int f(void) { return a + b; }");
        let f = find_proc(&ir, "f");
        // operands widen to int before the add
        assert!(all_instrs(f).any(|i| i.op == IrOp::Sext && i.ty == IrType::I16));
        assert!(all_instrs(f).any(|i| i.op == IrOp::Add && i.ty == IrType::I16));
    }

    #[test]
    fn test_mixed_sign_comparison_warns() {
        let (_, diags) =
            compile("int f(int a, unsigned b) { if (a < b) return 1; return 0; }");
        assert!(
            diags
                .iter()
                .any(|d| d.message == "Comparison of mixed-sign integers")
        );
    }

    #[test]
    fn test_narrower_unsigned_comparison_is_silent() {
        let (_, diags) =
            compile("int f(long a, unsigned b) { if (a < b) return 1; return 0; }");
        assert!(
            !diags
                .iter()
                .any(|d| d.message == "Comparison of mixed-sign integers")
        );
    }

    #[test]
    fn test_unsigned_division_selects_udiv() {
        let ir = compile_ok("unsigned f(unsigned a, unsigned b) { return a / b; }");
        assert!(all_instrs(find_proc(&ir, "f")).any(|i| i.op == IrOp::Udiv));
        let ir = compile_ok("int f(int a, int b) { return a / b; }");
        assert!(all_instrs(find_proc(&ir, "f")).any(|i| i.op == IrOp::Sdiv));
    }

    #[test]
    fn test_shift_keeps_left_type() {
        let ir = compile_ok("long f(long a, int s) { return a << s; }");
        let f = find_proc(&ir, "f");
        assert!(all_instrs(f).any(|i| i.op == IrOp::Shl && i.ty == IrType::I32));
    }

    #[test]
    fn test_strict_enum_assignment_warns() {
        let (_, diags) = compile("enum E { E1 }; int f(enum E x) { int y; y = x; return y; }");
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("Implicit conversion from enum E to int"))
        );
    }

    #[test]
    fn test_anonymous_enum_is_not_strict() {
        let (_, diags) = compile("enum { A, B }; int f(void) { int y; y = A; return y; }");
        assert!(
            !diags
                .iter()
                .any(|d| d.message.contains("Implicit conversion"))
        );
    }

    #[test]
    fn test_pointer_qualifier_discard_warns() {
        let (_, diags) = compile("void f(void) { const int c; int *p; p = &c; *p; }");
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("discards 'const' qualifier"))
        );
    }

    #[test]
    fn test_assign_to_const_is_error() {
        let (_, diags) = compile("void f(void) { const int c; c = 1; }");
        assert!(diags.has_errors());
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("read-only"))
        );
    }

    #[test]
    fn test_struct_layout_and_copy() {
        let ir = compile_ok(
            "struct p { int x; int y; }; \
             void f(void) { struct p a; struct p b; a.y = 1; b = a; }",
        );
        let f = find_proc(&ir, "f");
        // y sits at offset 2, the copy moves 4 bytes
        let copy = all_instrs(f).find(|i| i.op == IrOp::Copymem).expect("copy");
        assert_eq!(copy.args[2], IrOperand::Imm(4));
    }

    #[test]
    fn test_union_overlays_at_zero() {
        let ir = compile_ok(
            "union u { int a; char b; }; union u g = { 258 };",
        );
        // size of the union is the largest member
        assert_eq!(find_data(&ir, "g").size, 2);
    }

    #[test]
    fn test_bitfield_rmw_and_fold() {
        let ir = compile_ok(
            "struct f { unsigned a : 3; unsigned b : 16; }; \
             void g(void) { struct f x; x.a = 2; x.b = 5; }",
        );
        let g = find_proc(&ir, "g");
        // a:3 needs read-modify-write; b:16 covers its unit and folds
        // to a plain store, so exactly one read-or-and-shift cycle
        let ors = all_instrs(g).filter(|i| i.op == IrOp::Or).count();
        assert_eq!(ors, 1);
    }

    #[test]
    fn test_bitfield_range_warning() {
        let (_, diags) = compile(
            "struct f { unsigned a : 2; }; void g(void) { struct f x; x.a = 9; }",
        );
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("does not fit in a 2-bit field"))
        );
    }

    #[test]
    fn test_shortcircuit_blocks() {
        let ir = compile_ok("_Bool f(int a, int b) { return a && b; }");
        let f = find_proc(&ir, "f");
        check_block_invariant(f);
        assert!(f.blocks.iter().any(|b| b.label.starts_with("and_rhs")));
        assert!(f.blocks.iter().any(|b| b.label.starts_with("and_join")));
    }

    #[test]
    fn test_unused_value_warns() {
        let (_, diags) = compile("int f(int a) { a + 1; return a; }");
        assert!(
            diags
                .iter()
                .any(|d| d.message == "Computed expression value is not used")
        );
    }

    #[test]
    fn test_may_ignore_return_suppresses_warning() {
        let (_, diags) = compile(
            "int h(void) __attribute__((may_ignore_return)); \
             int h(void) { return 1; } void f(void) { h(); }",
        );
        assert!(
            !diags
                .iter()
                .any(|d| d.message == "Computed expression value is not used")
        );
    }

    #[test]
    fn test_usr_attribute_reaches_ir() {
        let ir = compile_ok("void f(void) __attribute__((usr)) { }");
        assert!(find_proc(&ir, "f").attrs.contains(ProcAttrs::USR));
    }

    #[test]
    fn test_duplicate_case_is_error() {
        let (_, diags) =
            compile("void f(int x) { switch (x) { case 1: break; case 1: break; } }");
        assert!(diags.has_errors());
        assert!(diags.iter().any(|d| d.message.contains("Duplicate case")));
    }

    #[test]
    fn test_goto_and_labels() {
        let ir = compile_ok(
            "int f(int x) { if (x) goto done; x = 1; done: return x; }",
        );
        let f = find_proc(&ir, "f");
        assert!(f.blocks.iter().any(|b| b.label == "u_done"));
    }

    #[test]
    fn test_undefined_label_is_error() {
        let (_, diags) = compile("void f(void) { goto nowhere; }");
        assert!(diags.has_errors());
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("used but not defined"))
        );
    }

    #[test]
    fn test_string_literal_becomes_rodata() {
        let ir = compile_ok("const char *s = \"hi\";");
        let strdata = ir.data().find(|d| d.readonly).expect("rodata");
        assert_eq!(strdata.size, 3);
        assert_eq!(
            find_data(&ir, "s").entries,
            vec![IrDataEntry::Addr {
                sym: strdata.name.clone(),
                offset: 0
            }]
        );
    }

    #[test]
    fn test_designated_initializers_last_wins() {
        let (ir, diags) = compile("int a[3] = { [0] = 1, [2] = 3, [0] = 7 };");
        assert!(!diags.has_errors());
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("overrides a prior initialization"))
        );
        let a = find_data(&ir, "a");
        // 7, 0, 3 little-endian bytes with zero gaps folded
        assert_eq!(a.size, 6);
        assert_eq!(a.entries[0], IrDataEntry::Int(IrType::I8, 7));
    }

    #[test]
    fn test_array_size_from_initializer() {
        let ir = compile_ok("int a[] = { 1, 2, 3 };");
        assert_eq!(find_data(&ir, "a").size, 6);
    }

    #[test]
    fn test_static_local_is_module_data() {
        let ir = compile_ok("int f(void) { static int n = 4; return n; }");
        assert_eq!(
            find_data(&ir, "f.n").entries,
            vec![IrDataEntry::Int(IrType::I16, 4)]
        );
    }

    #[test]
    fn test_record_return_uses_hidden_pointer() {
        let ir = compile_ok(
            "struct p { int x; int y; }; struct p mk(void) { struct p r; r.x = 1; r.y = 2; return r; } \
             int f(void) { struct p q; q = mk(); return q.x; }",
        );
        let mk = find_proc(&ir, "mk");
        assert_eq!(mk.ret, IrType::Void);
        assert_eq!(mk.args[0], (RET_SLOT.to_string(), IrType::Ptr));
    }

    #[test]
    fn test_wide_scalar_return_uses_hidden_pointer() {
        let ir = compile_ok("long long f(void) { return 1; }");
        let f = find_proc(&ir, "f");
        assert_eq!(f.ret, IrType::Void);
        assert_eq!(f.args[0], (RET_SLOT.to_string(), IrType::Ptr));
    }

    #[test]
    fn test_long_return_stays_direct() {
        let ir = compile_ok("long f(void) { return 1; }");
        assert_eq!(find_proc(&ir, "f").ret, IrType::I32);
    }

    #[test]
    fn test_inline_asm_passes_through() {
        let ir = compile_ok("void f(void) { asm(\"halt\"); }");
        let f = find_proc(&ir, "f");
        let asm = all_instrs(f).find(|i| i.op == IrOp::Asm).expect("asm");
        assert_eq!(asm.args[0], IrOperand::Str("halt".to_string()));
    }

    #[test]
    fn test_multiple_storage_classes_rejected() {
        let (_, diags) = compile("static extern int x;");
        assert!(diags.has_errors());
    }

    #[test]
    fn test_qualifier_order_warning() {
        let (_, diags) = compile("volatile const int x;");
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("out of preferred order"))
        );
    }

    #[test]
    fn test_duplicate_qualifier_accepted_with_warning() {
        let (_, diags) = compile("const const int x;");
        assert!(!diags.has_errors());
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("Duplicate 'const'"))
        );
    }

    #[test]
    fn test_function_returning_array_rejected() {
        let (_, diags) = compile("typedef int arr[4]; arr f(void);");
        assert!(diags.has_errors());
    }

    #[test]
    fn test_block_invariant_across_samples() {
        let sources = [
            "int f(int x) { while (x) { if (x > 5) break; x = x + 1; } return x; }",
            "int f(int x) { do { x = x - 1; } while (x); return x; }",
            "int f(int x) { switch (x) { case 1: return 1; case 2: break; default: x = 0; } return x; }",
            "int f(int x) { return x ? 1 : 2; }",
        ];
        for src in sources {
            let ir = compile_ok(src);
            for p in ir.procs() {
                check_block_invariant(p);
            }
        }
    }

    #[test]
    fn test_float_is_rejected() {
        let (_, diags) = compile("float f(void);");
        assert!(diags.has_errors());
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("Floating point"))
        );
    }

    #[test]
    fn test_int128_flows_through() {
        let ir = compile_ok("__int128 f(__int128 a) { return a; }");
        let f = find_proc(&ir, "f");
        // wider than 32 bits: hidden-pointer return, i128 argument
        assert_eq!(f.args.iter().find(|(n, _)| n == "a").unwrap().1, IrType::I128);
        assert_eq!(f.ret, IrType::Void);
    }
}

/// A resolved scalar initializer position.
struct InitPos<'t> {
    offset: u64,
    ty: CgType,
    bits: Option<BitField>,
    init: &'t ast::Init,
}

const RET_SLOT: &str = ".ret";

fn user_label(name: &str) -> String {
    format!("u_{}", name)
}

/// Is the loop condition a compile-time non-zero constant? Used to
/// rotate the test out of `for` loops.
fn const_nonzero(e: &ast::Expr) -> bool {
    match e.unparen() {
        ast::Expr::IntLit(tok) => lexer::parse_int_text(&tok.text)
            .map(|p| p.value != 0)
            .unwrap_or(false),
        ast::Expr::CharLit(tok) => lexer::parse_char_text(&tok.text)
            .map(|(v, _)| v != 0)
            .unwrap_or(false),
        _ => false,
    }
}

/// Collect the `case` expressions and `default` presence of a switch
/// body in source order, without descending into nested switches.
fn collect_cases<'t>(s: &'t ast::Stmt, out: &mut Vec<&'t ast::Expr>, has_default: &mut bool) {
    match s {
        ast::Stmt::Case { expr, stmt, .. } => {
            out.push(expr);
            collect_cases(stmt, out, has_default);
        }
        ast::Stmt::Default { stmt, .. } => {
            *has_default = true;
            collect_cases(stmt, out, has_default);
        }
        ast::Stmt::Labeled { stmt, .. } => collect_cases(stmt, out, has_default),
        ast::Stmt::Compound(block) => {
            for item in &block.items {
                if let ast::BlockItem::Stmt(s) = item {
                    collect_cases(s, out, has_default);
                }
            }
        }
        ast::Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_cases(then_branch, out, has_default);
            if let Some(e) = else_branch {
                collect_cases(e, out, has_default);
            }
        }
        ast::Stmt::While { body, .. }
        | ast::Stmt::DoWhile { body, .. }
        | ast::Stmt::For { body, .. } => collect_cases(body, out, has_default),
        ast::Stmt::Switch { .. } => {}
        _ => {}
    }
}

/// Enumerate every scalar leaf of a type with its offset, for
/// zero-filling partially initialized locals. Unions contribute their
/// first member only.
fn collect_leaves(ty: &CgType, base: u64, out: &mut Vec<(u64, CgType, Option<BitField>)>) {
    match &ty.kind {
        TyKind::Int { .. } | TyKind::Pointer(_) | TyKind::Enum(_) => {
            out.push((base, ty.clone(), None));
        }
        TyKind::Array { elem, size } => {
            for i in 0..size.unwrap_or(0) {
                collect_leaves(elem, base + i * elem.size(), out);
            }
        }
        TyKind::Record(def) => {
            let layout = def.layout.borrow();
            if let Some(layout) = layout.as_ref() {
                let members: &[RecordMember] = if def.kind == RecordKind::Union {
                    &layout.members[..layout.members.len().min(1)]
                } else {
                    &layout.members
                };
                for m in members {
                    match m.bits {
                        Some(bits) => out.push((base + m.offset, m.ty.clone(), Some(bits))),
                        None => collect_leaves(&m.ty, base + m.offset, out),
                    }
                }
            }
        }
        TyKind::Void | TyKind::Func(_) => {}
    }
}

/// Render a byte image plus relocations into data entries: address
/// entries where relocations land, zero runs elsewhere, byte constants
/// for the rest.
fn entries_from_image(image: &[u8], relocs: &mut Vec<(u64, String, i64)>) -> Vec<IrDataEntry> {
    relocs.sort_by_key(|(off, _, _)| *off);
    let mut entries = Vec::new();
    let mut at = 0usize;
    let mut reloc_at = 0usize;
    while at < image.len() {
        if reloc_at < relocs.len() && relocs[reloc_at].0 as usize == at {
            let (_, sym, offset) = relocs[reloc_at].clone();
            entries.push(IrDataEntry::Addr { sym, offset });
            reloc_at += 1;
            at += 2;
            continue;
        }
        let next_reloc = relocs
            .get(reloc_at)
            .map(|(off, _, _)| *off as usize)
            .unwrap_or(image.len());
        if image[at] == 0 {
            let mut run = 0;
            while at + run < next_reloc && image[at + run] == 0 {
                run += 1;
            }
            entries.push(IrDataEntry::Zero(run as u64));
            at += run;
        } else {
            entries.push(IrDataEntry::Int(IrType::I8, image[at] as i64));
            at += 1;
        }
    }
    entries
}

/// Drop blocks that no terminator references, keeping the entry block
/// and declared extra roots, to a fixpoint.
fn prune_blocks(blocks: Vec<IrBlock>, extra_roots: &HashSet<String>) -> Vec<IrBlock> {
    if blocks.is_empty() {
        return blocks;
    }
    let mut reachable: HashSet<String> = HashSet::new();
    reachable.insert(blocks[0].label.clone());
    for root in extra_roots {
        reachable.insert(root.clone());
    }
    loop {
        let mut changed = false;
        for block in &blocks {
            if !reachable.contains(&block.label) {
                continue;
            }
            let targets: Vec<&String> = match &block.term {
                IrTerm::Jump { target } => vec![target],
                IrTerm::Branch {
                    then_label,
                    else_label,
                    ..
                } => vec![then_label, else_label],
                IrTerm::Ret { .. } => vec![],
            };
            for t in targets {
                if reachable.insert(t.clone()) {
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    blocks
        .into_iter()
        .filter(|b| reachable.contains(&b.label))
        .collect()
}

/// Parameters of the function being defined: the function derivation
/// nearest the identifier.
fn def_params(decl: &ast::Declarator) -> Option<(&[ast::ParamDecl], bool)> {
    fn has_func(d: &ast::Declarator) -> bool {
        match d {
            ast::Declarator::Function { .. } => true,
            ast::Declarator::Pointer { inner, .. }
            | ast::Declarator::Array { inner, .. }
            | ast::Declarator::Paren(inner) => has_func(inner),
            _ => false,
        }
    }
    match decl {
        ast::Declarator::Function {
            inner,
            params,
            variadic,
            ..
        } => {
            if has_func(inner) {
                def_params(inner)
            } else {
                Some((params, *variadic))
            }
        }
        ast::Declarator::Pointer { inner, .. }
        | ast::Declarator::Array { inner, .. }
        | ast::Declarator::Paren(inner) => def_params(inner),
        _ => None,
    }
}

// -- free helpers ----------------------------------------------------------

fn record_type(def: &Rc<RecordDef>) -> CgType {
    CgType::new(TyKind::Record(def.clone()))
}

fn enum_type(def: &Rc<EnumDef>) -> CgType {
    CgType::new(TyKind::Enum(def.clone()))
}

/// An enum with an instance becomes strict.
fn mark_enum_strict(ty: &CgType) {
    if let TyKind::Enum(def) = &ty.kind {
        def.strict.set(true);
    }
}

/// Array-to-pointer and function-to-pointer decay.
fn decay(ty: CgType) -> CgType {
    match ty.kind {
        TyKind::Array { elem, .. } => CgType::ptr_to(*elem),
        TyKind::Func(_) => CgType::ptr_to(ty),
        _ => ty,
    }
}

fn func_of(ty: &CgType) -> Option<&FuncType> {
    match &ty.kind {
        TyKind::Func(ft) => Some(ft),
        TyKind::Pointer(p) => match &p.kind {
            TyKind::Func(ft) => Some(ft),
            _ => None,
        },
        _ => None,
    }
}

/// Integer promotion on the type level.
fn promote_type(ty: &CgType) -> CgType {
    match ty.int_elem() {
        Some(elem) if elem < IntElem::Int => CgType::int(IntElem::Int, true),
        Some(elem) => CgType::int(elem, ty.is_signed()),
        None => ty.clone(),
    }
}

/// Common type of two promoted arithmetic operands: the larger rank
/// wins; at equal size, unsigned wins.
fn uac_type(l: &CgType, r: &CgType) -> CgType {
    let lp = promote_type(l);
    let rp = promote_type(r);
    let le = lp.int_elem().unwrap_or(IntElem::Int);
    let re = rp.int_elem().unwrap_or(IntElem::Int);
    if le.size() > re.size() {
        return CgType::int(le, lp.is_signed());
    }
    if re.size() > le.size() {
        return CgType::int(re, rp.is_signed());
    }
    let elem = le.max(re);
    CgType::int(elem, lp.is_signed() && rp.is_signed())
}

/// Wrap a constant to the width and signedness of `ty`.
fn wrap_const(value: i128, ty: &CgType) -> i128 {
    let bits = ty.int_elem().map(IntElem::bits).unwrap_or(16);
    if bits >= 128 {
        return value;
    }
    let masked = (value as u128) & ((1u128 << bits) - 1);
    if ty.is_signed() && masked >= 1u128 << (bits - 1) {
        masked as i128 - (1i128 << bits)
    } else {
        masked as i128
    }
}

fn wrap_unsigned(value: i128, bits: u32) -> u128 {
    if bits >= 128 {
        value as u128
    } else {
        (value as u128) & ((1u128 << bits) - 1)
    }
}

/// Map a semantic type to its IR type. Record values travel by address.
fn ir_type(ty: &CgType) -> IrType {
    match &ty.kind {
        TyKind::Void => IrType::Void,
        TyKind::Pointer(_) | TyKind::Array { .. } | TyKind::Func(_) | TyKind::Record(_) => {
            IrType::Ptr
        }
        TyKind::Enum(_) => IrType::I16,
        TyKind::Int { elem, .. } => match elem.size() {
            1 => IrType::I8,
            2 => IrType::I16,
            4 => IrType::I32,
            8 => IrType::I64,
            _ => IrType::I128,
        },
    }
}

/// Does a scalar return of this type fit the register convention, or
/// does it need a hidden pointer?
fn ret_needs_hidden_ptr(ty: &CgType) -> bool {
    if ty.is_record() {
        return true;
    }
    match ty.int_elem() {
        Some(elem) => elem.bits() > MAX_REG_RET_BITS,
        None => false,
    }
}
