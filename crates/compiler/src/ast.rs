//! Abstract syntax tree
//!
//! One node per syntactic construct, as exhaustive sum types. Nodes own
//! their constituent tokens so diagnostics can cite exact positions and a
//! style checker can walk the tree back to the token stream. There are no
//! parent pointers; children are held by value behind `Box`/`Vec` and the
//! whole tree is dropped when the code generator has lowered it.

use crate::lexer::Token;
use crate::pos::SourcePos;

/// A full translation unit: external declarations and function
/// definitions in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub decls: Vec<ExtDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtDecl {
    Decl(Decl),
    FuncDef(FuncDef),
}

/// Declaration: specifiers plus a comma-separated list of init
/// declarators, e.g. `static int a, *b = 0;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub specs: DeclSpecs,
    pub declarators: Vec<InitDeclarator>,
    pub semi: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitDeclarator {
    pub decl: Declarator,
    pub attrs: Vec<Attr>,
    pub init: Option<Init>,
}

/// Function definition: specifiers, declarator (which must be a function
/// declarator) and the body.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub specs: DeclSpecs,
    pub decl: Declarator,
    pub attrs: Vec<Attr>,
    pub body: Block,
}

/// Storage class specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Typedef,
    Extern,
    Static,
    Auto,
    Register,
}

impl StorageClass {
    pub fn spelling(self) -> &'static str {
        match self {
            StorageClass::Typedef => "typedef",
            StorageClass::Extern => "extern",
            StorageClass::Static => "static",
            StorageClass::Auto => "auto",
            StorageClass::Register => "register",
        }
    }
}

/// Type qualifier keyword; `restrict` and `__restrict__` both map to
/// [`QualKind::Restrict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualKind {
    Const,
    Volatile,
    Restrict,
}

impl QualKind {
    pub fn spelling(self) -> &'static str {
        match self {
            QualKind::Const => "const",
            QualKind::Volatile => "volatile",
            QualKind::Restrict => "restrict",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Qual {
    pub kind: QualKind,
    pub tok: Token,
}

/// Declaration specifiers: storage classes, qualifiers, `inline`, type
/// specifiers and attributes, each list in source order. Duplicates are
/// representable; the analyzer diagnoses them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeclSpecs {
    pub storage: Vec<(StorageClass, Token)>,
    pub quals: Vec<Qual>,
    pub inline_tok: Option<Token>,
    pub tspecs: Vec<TypeSpec>,
    pub attrs: Vec<Attr>,
}

impl DeclSpecs {
    /// Position of the first specifier, for diagnostics.
    pub fn pos(&self) -> Option<SourcePos> {
        if let Some((_, tok)) = self.storage.first() {
            return Some(tok.pos.clone());
        }
        if let Some(q) = self.quals.first() {
            return Some(q.tok.pos.clone());
        }
        self.tspecs.first().map(|ts| ts.token().pos.clone())
    }
}

/// One type specifier keyword or construct.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Void(Token),
    Char(Token),
    Short(Token),
    Int(Token),
    Long(Token),
    Signed(Token),
    Unsigned(Token),
    Bool(Token),
    Int128(Token),
    Float(Token),
    Double(Token),
    Record(RecordSpec),
    Enum(EnumSpec),
    /// Identifier resolved as a typedef name during parsing.
    TypedefName(Token),
}

impl TypeSpec {
    pub fn token(&self) -> &Token {
        match self {
            TypeSpec::Void(t)
            | TypeSpec::Char(t)
            | TypeSpec::Short(t)
            | TypeSpec::Int(t)
            | TypeSpec::Long(t)
            | TypeSpec::Signed(t)
            | TypeSpec::Unsigned(t)
            | TypeSpec::Bool(t)
            | TypeSpec::Int128(t)
            | TypeSpec::Float(t)
            | TypeSpec::Double(t)
            | TypeSpec::TypedefName(t) => t,
            TypeSpec::Record(r) => &r.kw,
            TypeSpec::Enum(e) => &e.kw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Struct,
    Union,
}

impl RecordKind {
    pub fn spelling(self) -> &'static str {
        match self {
            RecordKind::Struct => "struct",
            RecordKind::Union => "union",
        }
    }
}

/// `struct`/`union` specifier, named or anonymous, with or without body.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSpec {
    pub kind: RecordKind,
    pub kw: Token,
    pub tag: Option<Token>,
    pub attrs: Vec<Attr>,
    pub body: Option<Vec<MemberDecl>>,
}

/// One member declaration inside a record body.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDecl {
    pub specs: DeclSpecs,
    pub declarators: Vec<MemberDeclarator>,
    pub semi: Token,
}

/// A member declarator may carry a bit-field width; an anonymous
/// bit-field has an abstract declarator.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDeclarator {
    pub decl: Declarator,
    pub width: Option<Expr>,
}

/// `enum` specifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumSpec {
    pub kw: Token,
    pub tag: Option<Token>,
    pub body: Option<Vec<Enumerator>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enumerator {
    pub name: Token,
    pub value: Option<Expr>,
}

/// Declarator chain, innermost (the identifier) outward. Abstract
/// declarators bottom out in [`Declarator::Abstract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Declarator {
    Ident(Token),
    /// Nameless declarator (type names, anonymous bit-fields, prototypes).
    Abstract(SourcePos),
    Pointer {
        star: Token,
        quals: Vec<Qual>,
        inner: Box<Declarator>,
    },
    Array {
        inner: Box<Declarator>,
        lbracket: Token,
        size: Option<Box<Expr>>,
    },
    Function {
        inner: Box<Declarator>,
        lparen: Token,
        params: Vec<ParamDecl>,
        variadic: bool,
    },
    Paren(Box<Declarator>),
}

impl Declarator {
    /// The identifier token at the innermost position, if any.
    pub fn name(&self) -> Option<&Token> {
        match self {
            Declarator::Ident(tok) => Some(tok),
            Declarator::Abstract(_) => None,
            Declarator::Pointer { inner, .. }
            | Declarator::Array { inner, .. }
            | Declarator::Function { inner, .. }
            | Declarator::Paren(inner) => inner.name(),
        }
    }

    pub fn pos(&self) -> SourcePos {
        match self {
            Declarator::Ident(tok) => tok.pos.clone(),
            Declarator::Abstract(pos) => pos.clone(),
            Declarator::Pointer { star, .. } => star.pos.clone(),
            Declarator::Array { inner, .. }
            | Declarator::Function { inner, .. }
            | Declarator::Paren(inner) => inner.pos(),
        }
    }
}

/// Parameter declaration: `int x`, `void`, `int`, `int (*f)(void)`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub specs: DeclSpecs,
    pub decl: Declarator,
}

/// Type name as used by casts and `sizeof`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub specs: DeclSpecs,
    pub decl: Box<Declarator>,
}

/// One `__attribute__((...))` instance: a name plus optional argument
/// expressions, e.g. `usr` or `aligned(2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub kw: Token,
    pub name: Token,
    pub args: Vec<Expr>,
}

/// Initializer: scalar expression or brace-enclosed list whose entries
/// may carry field/index designators.
#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    Expr(Expr),
    List {
        lbrace: Token,
        entries: Vec<InitEntry>,
    },
}

impl Init {
    pub fn pos(&self) -> SourcePos {
        match self {
            Init::Expr(e) => e.pos(),
            Init::List { lbrace, .. } => lbrace.pos.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitEntry {
    pub designators: Vec<Designator>,
    pub init: Init,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Designator {
    /// `.field =`
    Field { dot: Token, name: Token },
    /// `[index] =`
    Index { lbracket: Token, expr: Expr },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

impl BinOp {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq | BinOp::Eq | BinOp::NotEq
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr | BinOp::Shl | BinOp::Shr
        )
    }

    pub fn spelling(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
        }
    }
}

/// Prefix unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    BitNot,
    LogNot,
    Deref,
    Addr,
    PreInc,
    PreDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOp {
    Inc,
    Dec,
}

/// Assignment operators; compound forms name the folded binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Plain,
    Compound(BinOp),
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(Token),
    CharLit(Token),
    /// Adjacent string literal tokens concatenate into one literal.
    StrLit(Vec<Token>),
    Ident(Token),
    Paren {
        lparen: Token,
        inner: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        op: Token,
        /// `true` for `->`, `false` for `.`
        indirect: bool,
        member: Token,
    },
    Call {
        callee: Box<Expr>,
        lparen: Token,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        lbracket: Token,
        index: Box<Expr>,
    },
    Cast {
        lparen: Token,
        tname: TypeName,
        expr: Box<Expr>,
    },
    SizeofExpr {
        kw: Token,
        expr: Box<Expr>,
    },
    SizeofType {
        kw: Token,
        tname: TypeName,
    },
    Unary {
        op: UnOp,
        tok: Token,
        expr: Box<Expr>,
    },
    Postfix {
        op: PostOp,
        tok: Token,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        tok: Token,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        tok: Token,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cond {
        cond: Box<Expr>,
        qtok: Token,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Comma {
        lhs: Box<Expr>,
        comma: Token,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn pos(&self) -> SourcePos {
        match self {
            Expr::IntLit(t) | Expr::CharLit(t) | Expr::Ident(t) => t.pos.clone(),
            Expr::StrLit(toks) => toks[0].pos.clone(),
            Expr::Paren { lparen, .. } => lparen.pos.clone(),
            Expr::Member { base, .. } => base.pos(),
            Expr::Call { callee, .. } => callee.pos(),
            Expr::Index { base, .. } => base.pos(),
            Expr::Cast { lparen, .. } => lparen.pos.clone(),
            Expr::SizeofExpr { kw, .. } | Expr::SizeofType { kw, .. } => kw.pos.clone(),
            Expr::Unary { tok, .. } => tok.pos.clone(),
            Expr::Postfix { expr, .. } => expr.pos(),
            Expr::Binary { lhs, .. } => lhs.pos(),
            Expr::Assign { lhs, .. } => lhs.pos(),
            Expr::Cond { cond, .. } => cond.pos(),
            Expr::Comma { lhs, .. } => lhs.pos(),
        }
    }

    /// Strip grouping parentheses.
    pub fn unparen(&self) -> &Expr {
        match self {
            Expr::Paren { inner, .. } => inner.unparen(),
            other => other,
        }
    }
}

/// `{ ... }` with declarations and statements interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub lbrace: Token,
    pub items: Vec<BlockItem>,
    pub rbrace: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockItem {
    Decl(Decl),
    Stmt(Stmt),
}

/// Initial clause of a `for` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Empty,
    Expr(Expr),
    /// C99 declaration in the init clause.
    Decl(Decl),
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Compound(Block),
    Expr {
        expr: Expr,
        semi: Token,
    },
    If {
        kw: Token,
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        kw: Token,
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        kw: Token,
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        kw: Token,
        init: ForInit,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Switch {
        kw: Token,
        cond: Expr,
        body: Box<Stmt>,
    },
    Case {
        kw: Token,
        expr: Expr,
        stmt: Box<Stmt>,
    },
    Default {
        kw: Token,
        stmt: Box<Stmt>,
    },
    Break {
        kw: Token,
    },
    Continue {
        kw: Token,
    },
    Return {
        kw: Token,
        expr: Option<Expr>,
    },
    Goto {
        kw: Token,
        label: Token,
    },
    Labeled {
        label: Token,
        stmt: Box<Stmt>,
    },
    Empty {
        semi: Token,
    },
    Asm(AsmStmt),
}

impl Stmt {
    pub fn pos(&self) -> SourcePos {
        match self {
            Stmt::Compound(b) => b.lbrace.pos.clone(),
            Stmt::Expr { expr, .. } => expr.pos(),
            Stmt::If { kw, .. }
            | Stmt::While { kw, .. }
            | Stmt::DoWhile { kw, .. }
            | Stmt::For { kw, .. }
            | Stmt::Switch { kw, .. }
            | Stmt::Case { kw, .. }
            | Stmt::Default { kw, .. }
            | Stmt::Break { kw }
            | Stmt::Continue { kw }
            | Stmt::Return { kw, .. }
            | Stmt::Goto { kw, .. } => kw.pos.clone(),
            Stmt::Labeled { label, .. } => label.pos.clone(),
            Stmt::Empty { semi } => semi.pos.clone(),
            Stmt::Asm(a) => a.kw.pos.clone(),
        }
    }
}

/// Inline assembler statement: basic (`asm("...")`) or extended with
/// output/input/clobber/goto-label operand lists.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmStmt {
    pub kw: Token,
    /// Adjacent string-literal template parts.
    pub template: Vec<Token>,
    pub outputs: Vec<AsmOperand>,
    pub inputs: Vec<AsmOperand>,
    pub clobbers: Vec<Token>,
    pub labels: Vec<Token>,
}

/// One operand of an extended asm statement:
/// `[name] "constraint" (expr)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmOperand {
    pub sym_name: Option<Token>,
    pub constraint: Token,
    pub expr: Expr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;

    fn tok(text: &str, line: u32, col: u32) -> Token {
        let mut pos = SourcePos::start("t.c");
        pos.line = line;
        pos.col = col;
        Token::new(TokenKind::Ident, text.to_string(), pos)
    }

    #[test]
    fn test_declarator_name_through_chain() {
        let d = Declarator::Pointer {
            star: tok("*", 1, 5),
            quals: vec![],
            inner: Box::new(Declarator::Array {
                inner: Box::new(Declarator::Ident(tok("xs", 1, 6))),
                lbracket: tok("[", 1, 8),
                size: None,
            }),
        };
        assert_eq!(d.name().unwrap().text, "xs");
    }

    #[test]
    fn test_abstract_declarator_has_no_name() {
        let d = Declarator::Pointer {
            star: tok("*", 1, 1),
            quals: vec![],
            inner: Box::new(Declarator::Abstract(SourcePos::start("t.c"))),
        };
        assert!(d.name().is_none());
    }

    #[test]
    fn test_expr_pos_is_leftmost() {
        let e = Expr::Binary {
            op: BinOp::Add,
            tok: tok("+", 1, 3),
            lhs: Box::new(Expr::Ident(tok("a", 1, 1))),
            rhs: Box::new(Expr::Ident(tok("b", 1, 5))),
        };
        assert_eq!(e.pos().col, 1);
    }

    #[test]
    fn test_unparen() {
        let inner = Expr::Ident(tok("x", 1, 2));
        let e = Expr::Paren {
            lparen: tok("(", 1, 1),
            inner: Box::new(inner.clone()),
        };
        assert_eq!(e.unparen(), &inner);
    }

    #[test]
    fn test_decl_specs_pos_prefers_storage() {
        let mut specs = DeclSpecs::default();
        specs.tspecs.push(TypeSpec::Int(tok("int", 1, 8)));
        specs.storage.push((StorageClass::Static, tok("static", 1, 1)));
        assert_eq!(specs.pos().unwrap().col, 1);
    }
}
