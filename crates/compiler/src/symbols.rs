//! Symbol scopes
//!
//! A stack of scopes (module, function, block), each holding two
//! independent namespaces: ordinary identifiers (variables, typedefs,
//! enum constants, functions) and tags (struct/union/enum). Lookup walks
//! outward; insertion always targets the innermost scope and reports the
//! previous occupant on redefinition so the caller can diagnose it.

use crate::lexer::Token;
use crate::types::CgType;
use std::collections::HashMap;

/// What a name stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum SymKind {
    /// Module-level object or function.
    Global { is_static: bool },
    /// Function argument, by position.
    Arg { index: usize },
    /// Block-local variable; `slot` is its IR local slot name.
    Local { slot: String },
    /// Block-local variable with static storage; `data_name` is its
    /// module-level data symbol.
    StaticLocal { data_name: String },
    Typedef,
    RecordTag,
    EnumTag,
    EnumElem { value: i64 },
}

/// A named entity with its semantic type and defining token.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymKind,
    pub ty: CgType,
    pub tok: Token,
}

#[derive(Debug, Default)]
struct ScopeFrame {
    ord: HashMap<String, Symbol>,
    tags: HashMap<String, Symbol>,
}

/// The scope stack. The module scope is pushed on construction and never
/// popped.
#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            frames: vec![ScopeFrame::default()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(ScopeFrame::default());
    }

    pub fn pop(&mut self) {
        assert!(self.frames.len() > 1, "popping module scope");
        self.frames.pop();
    }

    /// Nesting depth; 1 is the module scope.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Insert into the ordinary namespace of the innermost scope.
    /// On collision the existing symbol is left in place and returned.
    pub fn insert_ord(&mut self, sym: Symbol) -> Result<(), Symbol> {
        let frame = self.frames.last_mut().expect("scope stack empty");
        if let Some(prev) = frame.ord.get(&sym.name) {
            return Err(prev.clone());
        }
        frame.ord.insert(sym.name.clone(), sym);
        Ok(())
    }

    /// Insert into the tag namespace of the innermost scope.
    pub fn insert_tag(&mut self, sym: Symbol) -> Result<(), Symbol> {
        let frame = self.frames.last_mut().expect("scope stack empty");
        if let Some(prev) = frame.tags.get(&sym.name) {
            return Err(prev.clone());
        }
        frame.tags.insert(sym.name.clone(), sym);
        Ok(())
    }

    /// Replace an ordinary-namespace entry in the innermost scope that
    /// already holds `name`. Used for completing tentative definitions.
    pub fn replace_ord(&mut self, sym: Symbol) {
        let frame = self.frames.last_mut().expect("scope stack empty");
        frame.ord.insert(sym.name.clone(), sym);
    }

    pub fn lookup_ord(&self, name: &str) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|f| f.ord.get(name))
    }

    pub fn lookup_tag(&self, name: &str) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|f| f.tags.get(name))
    }

    /// Lookup confined to the innermost scope.
    pub fn lookup_ord_local(&self, name: &str) -> Option<&Symbol> {
        self.frames.last().and_then(|f| f.ord.get(name))
    }

    pub fn lookup_tag_local(&self, name: &str) -> Option<&Symbol> {
        self.frames.last().and_then(|f| f.tags.get(name))
    }

    /// True when `name` resolves in an enclosing scope but not the
    /// innermost one; used for shadowing diagnostics.
    pub fn shadows(&self, name: &str) -> bool {
        self.lookup_ord_local(name).is_none()
            && self
                .frames
                .iter()
                .rev()
                .skip(1)
                .any(|f| f.ord.contains_key(name))
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;
    use crate::pos::SourcePos;
    use crate::types::{CgType, IntElem};

    fn sym(name: &str, kind: SymKind) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind,
            ty: CgType::int(IntElem::Int, true),
            tok: Token::new(
                TokenKind::Ident,
                name.to_string(),
                SourcePos::start("t.c"),
            ),
        }
    }

    #[test]
    fn test_lookup_walks_outward() {
        let mut scopes = ScopeStack::new();
        scopes
            .insert_ord(sym("a", SymKind::Global { is_static: false }))
            .unwrap();
        scopes.push();
        assert!(scopes.lookup_ord("a").is_some());
        assert!(scopes.lookup_ord_local("a").is_none());
        scopes.pop();
    }

    #[test]
    fn test_redefinition_reports_previous() {
        let mut scopes = ScopeStack::new();
        scopes
            .insert_ord(sym("x", SymKind::Global { is_static: false }))
            .unwrap();
        let prev = scopes
            .insert_ord(sym("x", SymKind::Global { is_static: true }))
            .unwrap_err();
        assert_eq!(prev.kind, SymKind::Global { is_static: false });
    }

    #[test]
    fn test_namespaces_independent() {
        let mut scopes = ScopeStack::new();
        scopes
            .insert_ord(sym("point", SymKind::Typedef))
            .unwrap();
        scopes.insert_tag(sym("point", SymKind::RecordTag)).unwrap();
        assert_eq!(scopes.lookup_ord("point").unwrap().kind, SymKind::Typedef);
        assert_eq!(scopes.lookup_tag("point").unwrap().kind, SymKind::RecordTag);
    }

    #[test]
    fn test_shadowing() {
        let mut scopes = ScopeStack::new();
        scopes
            .insert_ord(sym("v", SymKind::Global { is_static: false }))
            .unwrap();
        scopes.push();
        assert!(scopes.shadows("v"));
        scopes
            .insert_ord(sym(
                "v",
                SymKind::Local {
                    slot: "v".to_string(),
                },
            ))
            .unwrap();
        assert!(!scopes.shadows("v"));
        scopes.pop();
        assert!(!scopes.shadows("v"));
    }

    #[test]
    fn test_inner_scope_dropped_on_pop() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes
            .insert_ord(sym(
                "tmp",
                SymKind::Local {
                    slot: "tmp".to_string(),
                },
            ))
            .unwrap();
        scopes.pop();
        assert!(scopes.lookup_ord("tmp").is_none());
    }
}
