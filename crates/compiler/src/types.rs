//! Semantic types
//!
//! The code generator's view of a C type, separate from the syntactic
//! specifier lists in the AST. Types are small value-like trees; record
//! and enum types hold an `Rc` reference to their definition so that two
//! mentions of `struct point` compare as the same type (by definition
//! identity, not by structure). Definitions use interior mutability so a
//! forward-declared tag can be completed in place.

use crate::ast::RecordKind;
use bitflags::bitflags;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

bitflags! {
    /// Type qualifier set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Quals: u8 {
        const CONST = 1;
        const VOLATILE = 2;
        const RESTRICT = 4;
    }
}

/// Integer element kind in rank order. `_Bool` ranks below `char`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntElem {
    Bool,
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Int128,
}

impl IntElem {
    /// Size in bytes on the Z80 target. `int` and pointers are 16-bit.
    pub fn size(self) -> u64 {
        match self {
            IntElem::Bool | IntElem::Char => 1,
            IntElem::Short | IntElem::Int => 2,
            IntElem::Long => 4,
            IntElem::LongLong => 8,
            IntElem::Int128 => 16,
        }
    }

    pub fn bits(self) -> u32 {
        self.size() as u32 * 8
    }

    pub fn name(self, signed: bool) -> String {
        let base = match self {
            IntElem::Bool => return "_Bool".to_string(),
            IntElem::Char => "char",
            IntElem::Short => "short",
            IntElem::Int => "int",
            IntElem::Long => "long",
            IntElem::LongLong => "long long",
            IntElem::Int128 => "__int128",
        };
        if signed {
            base.to_string()
        } else {
            format!("unsigned {}", base)
        }
    }
}

/// Function type: return type, ordered parameter types, variadic flag.
#[derive(Debug, Clone)]
pub struct FuncType {
    pub ret: CgType,
    pub params: Vec<CgType>,
    pub variadic: bool,
}

/// Bit-field placement within a member's storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub bit_off: u32,
    pub width: u32,
}

/// One laid-out record member.
#[derive(Debug, Clone)]
pub struct RecordMember {
    pub name: String,
    pub ty: CgType,
    pub offset: u64,
    pub bits: Option<BitField>,
}

/// Completed layout of a record.
#[derive(Debug, Clone, Default)]
pub struct RecordLayout {
    pub members: Vec<RecordMember>,
    pub size: u64,
}

impl RecordLayout {
    pub fn member(&self, name: &str) -> Option<&RecordMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A struct/union definition. Shared by every type that references it;
/// completed in place when the body is seen.
#[derive(Debug)]
pub struct RecordDef {
    pub kind: RecordKind,
    pub tag: Option<String>,
    pub layout: RefCell<Option<RecordLayout>>,
}

impl RecordDef {
    pub fn new(kind: RecordKind, tag: Option<String>) -> Rc<Self> {
        Rc::new(RecordDef {
            kind,
            tag,
            layout: RefCell::new(None),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.layout.borrow().is_some()
    }

    pub fn size(&self) -> u64 {
        self.layout.borrow().as_ref().map_or(0, |l| l.size)
    }
}

/// An enum definition. `strict` marks an enum that has a tag, typedef or
/// instance; implicit conversions involving a strict enum are diagnosed.
#[derive(Debug)]
pub struct EnumDef {
    pub tag: Option<String>,
    pub elems: RefCell<Vec<(String, i64)>>,
    pub complete: Cell<bool>,
    pub strict: Cell<bool>,
}

impl EnumDef {
    pub fn new(tag: Option<String>) -> Rc<Self> {
        let strict = tag.is_some();
        Rc::new(EnumDef {
            tag,
            elems: RefCell::new(Vec::new()),
            complete: Cell::new(false),
            strict: Cell::new(strict),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<i64> {
        self.elems
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// The type proper: a qualifier set over a structural kind.
#[derive(Debug, Clone)]
pub struct CgType {
    pub quals: Quals,
    pub kind: TyKind,
}

#[derive(Debug, Clone)]
pub enum TyKind {
    Void,
    Int { elem: IntElem, signed: bool },
    Pointer(Box<CgType>),
    Func(Box<FuncType>),
    Record(Rc<RecordDef>),
    Enum(Rc<EnumDef>),
    Array { elem: Box<CgType>, size: Option<u64> },
}

impl CgType {
    pub fn new(kind: TyKind) -> Self {
        CgType {
            quals: Quals::empty(),
            kind,
        }
    }

    pub fn void() -> Self {
        CgType::new(TyKind::Void)
    }

    pub fn int(elem: IntElem, signed: bool) -> Self {
        CgType::new(TyKind::Int { elem, signed })
    }

    pub fn bool() -> Self {
        CgType::int(IntElem::Bool, false)
    }

    pub fn ptr_to(target: CgType) -> Self {
        CgType::new(TyKind::Pointer(Box::new(target)))
    }

    pub fn with_quals(mut self, quals: Quals) -> Self {
        self.quals |= quals;
        self
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TyKind::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(
            self.kind,
            TyKind::Int {
                elem: IntElem::Bool,
                ..
            }
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, TyKind::Int { .. } | TyKind::Enum(_))
    }

    /// Arithmetic types; on this target that is exactly the integer and
    /// enum types.
    pub fn is_arith(&self) -> bool {
        self.is_integer()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TyKind::Pointer(_))
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arith() || self.is_pointer()
    }

    pub fn is_record(&self) -> bool {
        matches!(self.kind, TyKind::Record(_))
    }

    pub fn is_func(&self) -> bool {
        matches!(self.kind, TyKind::Func(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TyKind::Array { .. })
    }

    pub fn is_signed(&self) -> bool {
        match &self.kind {
            TyKind::Int { signed, .. } => *signed,
            TyKind::Enum(_) => true,
            _ => false,
        }
    }

    /// Integer element kind, with enums behaving as `int`.
    pub fn int_elem(&self) -> Option<IntElem> {
        match &self.kind {
            TyKind::Int { elem, .. } => Some(*elem),
            TyKind::Enum(_) => Some(IntElem::Int),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&CgType> {
        match &self.kind {
            TyKind::Pointer(t) => Some(t),
            _ => None,
        }
    }

    /// A type is complete when its size is known.
    pub fn is_complete(&self) -> bool {
        match &self.kind {
            TyKind::Void => false,
            TyKind::Int { .. } | TyKind::Pointer(_) => true,
            TyKind::Func(_) => false,
            TyKind::Record(def) => def.is_complete(),
            TyKind::Enum(def) => def.complete.get(),
            TyKind::Array { elem, size } => size.is_some() && elem.is_complete(),
        }
    }

    /// Size in bytes. Incomplete and function types have size zero; the
    /// analyzer rejects sizeof on those before asking.
    pub fn size(&self) -> u64 {
        match &self.kind {
            TyKind::Void | TyKind::Func(_) => 0,
            TyKind::Int { elem, .. } => elem.size(),
            TyKind::Pointer(_) => 2,
            TyKind::Record(def) => def.size(),
            TyKind::Enum(_) => 2,
            TyKind::Array { elem, size } => elem.size() * size.unwrap_or(0),
        }
    }

    /// Alignment in bytes. The Z80 has no alignment constraints, so every
    /// type aligns to one.
    pub fn align(&self) -> u64 {
        1
    }

    /// Same type, with identity comparison for records and enums and no
    /// regard for the outermost qualifiers of `self` vs `other`'s inner
    /// structure (qualifier checking is done separately).
    pub fn same_as(&self, other: &CgType) -> bool {
        match (&self.kind, &other.kind) {
            (TyKind::Void, TyKind::Void) => true,
            (
                TyKind::Int { elem: e1, signed: s1 },
                TyKind::Int { elem: e2, signed: s2 },
            ) => e1 == e2 && s1 == s2,
            (TyKind::Pointer(a), TyKind::Pointer(b)) => {
                a.quals == b.quals && a.same_as(b)
            }
            (TyKind::Func(a), TyKind::Func(b)) => {
                a.variadic == b.variadic
                    && a.ret.same_as(&b.ret)
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.same_as(y))
            }
            (TyKind::Record(a), TyKind::Record(b)) => Rc::ptr_eq(a, b),
            (TyKind::Enum(a), TyKind::Enum(b)) => Rc::ptr_eq(a, b),
            (
                TyKind::Array { elem: e1, size: s1 },
                TyKind::Array { elem: e2, size: s2 },
            ) => s1 == s2 && e1.same_as(e2),
            _ => false,
        }
    }
}

impl PartialEq for CgType {
    fn eq(&self, other: &Self) -> bool {
        self.quals == other.quals && self.same_as(other)
    }
}

impl fmt::Display for CgType {
    /// C-like spelling used in diagnostics: `const int`, `char *`,
    /// `struct point`, `int [10]`, `int (int, int)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quals.contains(Quals::CONST) {
            write!(f, "const ")?;
        }
        if self.quals.contains(Quals::RESTRICT) {
            write!(f, "restrict ")?;
        }
        if self.quals.contains(Quals::VOLATILE) {
            write!(f, "volatile ")?;
        }
        match &self.kind {
            TyKind::Void => write!(f, "void"),
            TyKind::Int { elem, signed } => write!(f, "{}", elem.name(*signed)),
            TyKind::Pointer(t) => write!(f, "{} *", t),
            TyKind::Func(ft) => {
                write!(f, "{} (", ft.ret)?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if ft.variadic {
                    if !ft.params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            TyKind::Record(def) => match &def.tag {
                Some(tag) => write!(f, "{} {}", def.kind.spelling(), tag),
                None => write!(f, "{} <anonymous>", def.kind.spelling()),
            },
            TyKind::Enum(def) => match &def.tag {
                Some(tag) => write!(f, "enum {}", tag),
                None => write!(f, "enum <anonymous>"),
            },
            TyKind::Array { elem, size } => match size {
                Some(n) => write!(f, "{} [{}]", elem, n),
                None => write!(f, "{} []", elem),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_deterministic() {
        assert_eq!(CgType::int(IntElem::Char, true).size(), 1);
        assert_eq!(CgType::int(IntElem::Int, true).size(), 2);
        assert_eq!(CgType::int(IntElem::Long, true).size(), 4);
        assert_eq!(CgType::int(IntElem::LongLong, false).size(), 8);
        assert_eq!(CgType::int(IntElem::Int128, true).size(), 16);
        assert_eq!(CgType::ptr_to(CgType::void()).size(), 2);
        assert_eq!(CgType::bool().size(), 1);
    }

    #[test]
    fn test_array_size() {
        let arr = CgType::new(TyKind::Array {
            elem: Box::new(CgType::int(IntElem::Int, true)),
            size: Some(10),
        });
        assert_eq!(arr.size(), 20);
        assert!(arr.is_complete());
        let open = CgType::new(TyKind::Array {
            elem: Box::new(CgType::int(IntElem::Int, true)),
            size: None,
        });
        assert!(!open.is_complete());
    }

    #[test]
    fn test_record_identity() {
        let a = RecordDef::new(RecordKind::Struct, Some("s".to_string()));
        let b = RecordDef::new(RecordKind::Struct, Some("s".to_string()));
        let ta = CgType::new(TyKind::Record(a.clone()));
        let tb = CgType::new(TyKind::Record(b));
        let ta2 = CgType::new(TyKind::Record(a));
        assert!(!ta.same_as(&tb));
        assert!(ta.same_as(&ta2));
    }

    #[test]
    fn test_record_completion() {
        let def = RecordDef::new(RecordKind::Struct, Some("p".to_string()));
        let ty = CgType::new(TyKind::Record(def.clone()));
        assert!(!ty.is_complete());
        assert_eq!(ty.size(), 0);
        *def.layout.borrow_mut() = Some(RecordLayout {
            members: vec![
                RecordMember {
                    name: "x".to_string(),
                    ty: CgType::int(IntElem::Int, true),
                    offset: 0,
                    bits: None,
                },
                RecordMember {
                    name: "y".to_string(),
                    ty: CgType::int(IntElem::Int, true),
                    offset: 2,
                    bits: None,
                },
            ],
            size: 4,
        });
        assert!(ty.is_complete());
        assert_eq!(ty.size(), 4);
    }

    #[test]
    fn test_display() {
        let cint = CgType::int(IntElem::Int, true).with_quals(Quals::CONST);
        assert_eq!(cint.to_string(), "const int");
        let p = CgType::ptr_to(CgType::int(IntElem::Char, true));
        assert_eq!(p.to_string(), "char *");
        assert_eq!(CgType::bool().to_string(), "_Bool");
        assert_eq!(
            CgType::int(IntElem::LongLong, false).to_string(),
            "unsigned long long"
        );
    }

    #[test]
    fn test_enum_behaves_as_int() {
        let def = EnumDef::new(Some("e".to_string()));
        let ty = CgType::new(TyKind::Enum(def));
        assert!(ty.is_integer());
        assert!(ty.is_signed());
        assert_eq!(ty.int_elem(), Some(IntElem::Int));
        assert_eq!(ty.size(), 2);
    }
}
