//! Parser
//!
//! Recursive descent over the token stream with a two-token lookahead
//! window. Trivia (whitespace, newlines, comments, preprocessor lines)
//! is filtered here and attached as leading trivia on the following
//! syntactic token.
//!
//! The parser is semantically aware to the extent C requires: it keeps a
//! lightweight per-scope table of declared names so an identifier at the
//! head of a statement can be classified as a typedef name or an
//! expression. Declarations are entered into that table as they are
//! parsed, not afterwards.
//!
//! On a syntax error the parser emits a diagnostic with the offending
//! position, then resynchronizes at the next `;` or balancing `}` and
//! keeps going, so several errors can be reported from one run.

use crate::CompileError;
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::lexer::{Keyword, Lexer, Punct, Token, TokenKind};
use std::collections::HashMap;

/// Identifier spellings of vendor extensions the original code base
/// carries TODOs for; we reject them with a dedicated diagnostic.
const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "_asm",
    "__asm",
    "__cdecl",
    "__fastcall",
    "__pascal",
    "__stdcall",
    "_near",
    "_far",
    "_huge",
    "__near",
    "__far",
];

/// Outcome of one parse production. `Syntax` means the diagnostic has
/// already been recorded and the caller should resynchronize; `Fatal`
/// is an infrastructure failure that aborts the whole parse.
enum PErr {
    Syntax,
    Fatal(CompileError),
}

impl From<CompileError> for PErr {
    fn from(e: CompileError) -> Self {
        PErr::Fatal(e)
    }
}

type PResult<T> = Result<T, PErr>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    toks: Vec<Token>,
    at: usize,
    diags: Diagnostics,
    /// Parse-time name table: name -> is-typedef, one map per scope.
    scopes: Vec<HashMap<String, bool>>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        Parser {
            lexer,
            toks: Vec::new(),
            at: 0,
            diags: Diagnostics::new(),
            scopes: vec![HashMap::new()],
        }
    }

    /// Parse one translation unit. Always returns the module built so
    /// far together with the accumulated diagnostics; the caller decides
    /// success by checking for error diagnostics.
    pub fn parse_module(mut self) -> Result<(Module, Diagnostics), CompileError> {
        let mut decls = Vec::new();
        loop {
            match self.peek(0) {
                Ok(tok) if tok.kind == TokenKind::Eof => break,
                Ok(_) => {}
                Err(PErr::Fatal(e)) => return Err(e),
                Err(PErr::Syntax) => unreachable!("peek does not raise syntax errors"),
            }
            match self.parse_ext_decl() {
                Ok(d) => decls.push(d),
                Err(PErr::Syntax) => {
                    if let Err(PErr::Fatal(e)) = self.recover() {
                        return Err(e);
                    }
                    // a stray closing brace at module level would stall
                    // recovery; skip it
                    match self.accept_punct(Punct::RBrace) {
                        Ok(_) => {}
                        Err(PErr::Fatal(e)) => return Err(e),
                        Err(PErr::Syntax) => unreachable!("accept does not raise syntax errors"),
                    }
                }
                Err(PErr::Fatal(e)) => return Err(e),
            }
        }
        Ok((Module { decls }, self.diags))
    }

    // -- token access -----------------------------------------------------

    /// Ensure at least `n + 1` syntactic tokens (or a trailing EOF
    /// token) are buffered past the cursor.
    fn fill(&mut self, n: usize) -> PResult<()> {
        while self.toks.len() <= self.at + n {
            if let Some(last) = self.toks.last() {
                if last.kind == TokenKind::Eof {
                    return Ok(());
                }
            }
            let mut trivia = Vec::new();
            let tok = loop {
                let tok = self.lexer.next_token().map_err(PErr::Fatal)?;
                if tok.kind.is_trivia() {
                    trivia.push(tok);
                    continue;
                }
                if tok.kind == TokenKind::Invalid {
                    self.diagnose_invalid(&tok);
                    trivia.push(tok);
                    continue;
                }
                break tok;
            };
            let mut tok = tok;
            tok.leading = trivia;
            self.toks.push(tok);
        }
        Ok(())
    }

    fn diagnose_invalid(&mut self, tok: &Token) {
        let msg = if tok.text.starts_with("/*") {
            "Unterminated comment".to_string()
        } else if tok.text.starts_with('"') || tok.text.starts_with("L\"") {
            "Unterminated string literal".to_string()
        } else if tok.text.starts_with('\'') || tok.text.starts_with("L'") {
            "Unterminated character literal".to_string()
        } else {
            format!("Invalid character '{}'", tok.text)
        };
        self.diags.error(&tok.pos, msg);
    }

    fn peek(&mut self, n: usize) -> PResult<&Token> {
        self.fill(n)?;
        let idx = (self.at + n).min(self.toks.len() - 1);
        Ok(&self.toks[idx])
    }

    fn peek_clone(&mut self, n: usize) -> PResult<Token> {
        Ok(self.peek(n)?.clone())
    }

    fn advance(&mut self) -> PResult<Token> {
        self.fill(0)?;
        let idx = self.at.min(self.toks.len() - 1);
        let tok = self.toks[idx].clone();
        if tok.kind != TokenKind::Eof {
            self.at += 1;
        }
        Ok(tok)
    }

    fn check_punct(&mut self, p: Punct) -> PResult<bool> {
        Ok(self.peek(0)?.is_punct(p))
    }

    fn check_kw(&mut self, kw: Keyword) -> PResult<bool> {
        Ok(self.peek(0)?.is_keyword(kw))
    }

    fn accept_punct(&mut self, p: Punct) -> PResult<Option<Token>> {
        if self.check_punct(p)? {
            Ok(Some(self.advance()?))
        } else {
            Ok(None)
        }
    }

    fn accept_kw(&mut self, kw: Keyword) -> PResult<Option<Token>> {
        if self.check_kw(kw)? {
            Ok(Some(self.advance()?))
        } else {
            Ok(None)
        }
    }

    fn expect_punct(&mut self, p: Punct, what: &str) -> PResult<Token> {
        match self.accept_punct(p)? {
            Some(tok) => Ok(tok),
            None => self.unexpected(what),
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<Token> {
        if self.peek(0)?.kind == TokenKind::Ident {
            self.advance()
        } else {
            self.unexpected(what)
        }
    }

    fn unexpected<T>(&mut self, what: &str) -> PResult<T> {
        let tok = self.peek_clone(0)?;
        let found = if tok.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("'{}'", tok.text)
        };
        self.diags
            .error(&tok.pos, format!("Expected {}, found {}", what, found));
        Err(PErr::Syntax)
    }

    /// Skip ahead to the next `;` at brace depth zero (consumed) or the
    /// next balancing `}` (not consumed), whichever comes first.
    fn recover(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            let tok = self.peek_clone(0)?;
            match tok.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::Punct(Punct::Semicolon) if depth == 0 => {
                    self.advance()?;
                    return Ok(());
                }
                TokenKind::Punct(Punct::LBrace) => {
                    depth += 1;
                    self.advance()?;
                }
                TokenKind::Punct(Punct::RBrace) => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                    self.advance()?;
                }
                _ => {
                    self.advance()?;
                }
            }
        }
    }

    // -- parse-time name table --------------------------------------------

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn leave_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, is_typedef: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), is_typedef);
        }
    }

    fn is_typedef_name(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if let Some(&is_typedef) = scope.get(name) {
                return is_typedef;
            }
        }
        false
    }

    /// Could the token open a declaration here? Consults the typedef
    /// table for identifiers.
    fn starts_decl(&mut self, tok: &Token) -> bool {
        match tok.kind {
            TokenKind::Keyword(kw) => matches!(
                kw,
                Keyword::Auto
                    | Keyword::Register
                    | Keyword::Static
                    | Keyword::Extern
                    | Keyword::Typedef
                    | Keyword::Const
                    | Keyword::Volatile
                    | Keyword::Restrict
                    | Keyword::RestrictAlt
                    | Keyword::Inline
                    | Keyword::Void
                    | Keyword::Char
                    | Keyword::Short
                    | Keyword::Int
                    | Keyword::Long
                    | Keyword::Signed
                    | Keyword::Unsigned
                    | Keyword::Bool
                    | Keyword::Int128
                    | Keyword::Float
                    | Keyword::Double
                    | Keyword::Struct
                    | Keyword::Union
                    | Keyword::Enum
                    | Keyword::Attribute
            ),
            TokenKind::Ident => self.is_typedef_name(&tok.text),
            _ => false,
        }
    }

    // -- external declarations --------------------------------------------

    fn parse_ext_decl(&mut self) -> PResult<ExtDecl> {
        let specs = self.parse_decl_specs()?;
        if specs.storage.is_empty()
            && specs.quals.is_empty()
            && specs.tspecs.is_empty()
            && specs.inline_tok.is_none()
        {
            return self.unexpected("declaration");
        }

        if let Some(semi) = self.accept_punct(Punct::Semicolon)? {
            return Ok(ExtDecl::Decl(Decl {
                specs,
                declarators: Vec::new(),
                semi,
            }));
        }

        let first = self.parse_declarator(false)?;
        let attrs = self.parse_attr_specs()?;

        // a function declarator directly followed by a brace is a
        // definition
        if self.check_punct(Punct::LBrace)? && declared_function(&first) {
            return self.parse_func_def(specs, first, attrs).map(ExtDecl::FuncDef);
        }

        let decl = self.parse_decl_tail(specs, first, attrs)?;
        Ok(ExtDecl::Decl(decl))
    }

    fn parse_func_def(
        &mut self,
        specs: DeclSpecs,
        decl: Declarator,
        attrs: Vec<Attr>,
    ) -> PResult<FuncDef> {
        if let Some(name) = decl.name() {
            let is_typedef = specs
                .storage
                .iter()
                .any(|(sc, _)| *sc == StorageClass::Typedef);
            let text = name.text.clone();
            self.declare(&text, is_typedef);
        }
        self.enter_scope();
        declare_params(self, &decl);
        let body = self.parse_block(false);
        self.leave_scope();
        Ok(FuncDef {
            specs,
            decl,
            attrs,
            body: body?,
        })
    }

    /// Declaration after the first declarator has been parsed; used both
    /// at module level and inside blocks.
    fn parse_decl_tail(
        &mut self,
        specs: DeclSpecs,
        first: Declarator,
        first_attrs: Vec<Attr>,
    ) -> PResult<Decl> {
        let is_typedef = specs
            .storage
            .iter()
            .any(|(sc, _)| *sc == StorageClass::Typedef);
        let mut declarators = Vec::new();
        let mut decl = first;
        let mut attrs = first_attrs;
        loop {
            let init = if self.accept_punct(Punct::Assign)?.is_some() {
                Some(self.parse_init()?)
            } else {
                None
            };
            if let Some(name) = decl.name() {
                let text = name.text.clone();
                self.declare(&text, is_typedef);
            }
            declarators.push(InitDeclarator { decl, attrs, init });
            if self.accept_punct(Punct::Comma)?.is_none() {
                break;
            }
            decl = self.parse_declarator(false)?;
            attrs = self.parse_attr_specs()?;
        }
        // tail attributes apply to the last declarator
        let tail_attrs = self.parse_attr_specs()?;
        if let Some(last) = declarators.last_mut() {
            last.attrs.extend(tail_attrs);
        }
        let semi = self.expect_punct(Punct::Semicolon, "';'")?;
        Ok(Decl {
            specs,
            declarators,
            semi,
        })
    }

    fn parse_decl(&mut self) -> PResult<Decl> {
        let specs = self.parse_decl_specs()?;
        if let Some(semi) = self.accept_punct(Punct::Semicolon)? {
            return Ok(Decl {
                specs,
                declarators: Vec::new(),
                semi,
            });
        }
        let first = self.parse_declarator(false)?;
        let attrs = self.parse_attr_specs()?;
        self.parse_decl_tail(specs, first, attrs)
    }

    // -- declaration specifiers -------------------------------------------

    fn parse_decl_specs(&mut self) -> PResult<DeclSpecs> {
        let mut specs = DeclSpecs::default();
        loop {
            let tok = self.peek_clone(0)?;
            match tok.kind {
                TokenKind::Keyword(kw) => {
                    let storage = match kw {
                        Keyword::Typedef => Some(StorageClass::Typedef),
                        Keyword::Extern => Some(StorageClass::Extern),
                        Keyword::Static => Some(StorageClass::Static),
                        Keyword::Auto => Some(StorageClass::Auto),
                        Keyword::Register => Some(StorageClass::Register),
                        _ => None,
                    };
                    if let Some(sc) = storage {
                        let tok = self.advance()?;
                        specs.storage.push((sc, tok));
                        continue;
                    }
                    let qual = match kw {
                        Keyword::Const => Some(QualKind::Const),
                        Keyword::Volatile => Some(QualKind::Volatile),
                        Keyword::Restrict | Keyword::RestrictAlt => Some(QualKind::Restrict),
                        _ => None,
                    };
                    if let Some(kind) = qual {
                        let tok = self.advance()?;
                        specs.quals.push(Qual { kind, tok });
                        continue;
                    }
                    match kw {
                        Keyword::Inline => {
                            let tok = self.advance()?;
                            specs.inline_tok = Some(tok);
                        }
                        Keyword::Void => specs.tspecs.push(TypeSpec::Void(self.advance()?)),
                        Keyword::Char => specs.tspecs.push(TypeSpec::Char(self.advance()?)),
                        Keyword::Short => specs.tspecs.push(TypeSpec::Short(self.advance()?)),
                        Keyword::Int => specs.tspecs.push(TypeSpec::Int(self.advance()?)),
                        Keyword::Long => specs.tspecs.push(TypeSpec::Long(self.advance()?)),
                        Keyword::Signed => specs.tspecs.push(TypeSpec::Signed(self.advance()?)),
                        Keyword::Unsigned => {
                            specs.tspecs.push(TypeSpec::Unsigned(self.advance()?))
                        }
                        Keyword::Bool => specs.tspecs.push(TypeSpec::Bool(self.advance()?)),
                        Keyword::Int128 => specs.tspecs.push(TypeSpec::Int128(self.advance()?)),
                        Keyword::Float => specs.tspecs.push(TypeSpec::Float(self.advance()?)),
                        Keyword::Double => specs.tspecs.push(TypeSpec::Double(self.advance()?)),
                        Keyword::Struct | Keyword::Union => {
                            let spec = self.parse_record_spec()?;
                            specs.tspecs.push(TypeSpec::Record(spec));
                        }
                        Keyword::Enum => {
                            let spec = self.parse_enum_spec()?;
                            specs.tspecs.push(TypeSpec::Enum(spec));
                        }
                        Keyword::Attribute => {
                            let attrs = self.parse_attr_specs()?;
                            specs.attrs.extend(attrs);
                        }
                        _ => break,
                    }
                }
                TokenKind::Ident
                    if specs.tspecs.is_empty() && self.is_typedef_name(&tok.text) =>
                {
                    let tok = self.advance()?;
                    specs.tspecs.push(TypeSpec::TypedefName(tok));
                }
                TokenKind::Ident
                    if UNSUPPORTED_EXTENSIONS.contains(&tok.text.as_str()) =>
                {
                    self.diags.error(
                        &tok.pos,
                        format!("Unsupported extension '{}'", tok.text),
                    );
                    return Err(PErr::Syntax);
                }
                _ => break,
            }
        }
        Ok(specs)
    }

    fn parse_record_spec(&mut self) -> PResult<RecordSpec> {
        let kw = self.advance()?;
        let kind = if kw.is_keyword(Keyword::Struct) {
            RecordKind::Struct
        } else {
            RecordKind::Union
        };
        let attrs = self.parse_attr_specs()?;
        let tag = if self.peek(0)?.kind == TokenKind::Ident {
            Some(self.advance()?)
        } else {
            None
        };
        let body = if self.accept_punct(Punct::LBrace)?.is_some() {
            let mut members = Vec::new();
            while !self.check_punct(Punct::RBrace)? {
                members.push(self.parse_member_decl()?);
            }
            self.expect_punct(Punct::RBrace, "'}'")?;
            Some(members)
        } else {
            None
        };
        if tag.is_none() && body.is_none() {
            return self.unexpected("struct/union tag or body");
        }
        Ok(RecordSpec {
            kind,
            kw,
            tag,
            attrs,
            body,
        })
    }

    fn parse_member_decl(&mut self) -> PResult<MemberDecl> {
        let specs = self.parse_decl_specs()?;
        let mut declarators = Vec::new();
        if !self.check_punct(Punct::Semicolon)? {
            loop {
                let decl = if self.check_punct(Punct::Colon)? {
                    // anonymous bit-field
                    let pos = self.peek(0)?.pos.clone();
                    Declarator::Abstract(pos)
                } else {
                    self.parse_declarator(false)?
                };
                let width = if self.accept_punct(Punct::Colon)?.is_some() {
                    Some(self.parse_cond_expr()?)
                } else {
                    None
                };
                declarators.push(MemberDeclarator { decl, width });
                if self.accept_punct(Punct::Comma)?.is_none() {
                    break;
                }
            }
        }
        let semi = self.expect_punct(Punct::Semicolon, "';'")?;
        Ok(MemberDecl {
            specs,
            declarators,
            semi,
        })
    }

    fn parse_enum_spec(&mut self) -> PResult<EnumSpec> {
        let kw = self.advance()?;
        let tag = if self.peek(0)?.kind == TokenKind::Ident {
            Some(self.advance()?)
        } else {
            None
        };
        let body = if self.accept_punct(Punct::LBrace)?.is_some() {
            let mut enumerators = Vec::new();
            loop {
                let name = self.expect_ident("enumerator name")?;
                let value = if self.accept_punct(Punct::Assign)?.is_some() {
                    Some(self.parse_cond_expr()?)
                } else {
                    None
                };
                // enum constants hide typedef names in expressions
                let text = name.text.clone();
                self.declare(&text, false);
                enumerators.push(Enumerator { name, value });
                if self.accept_punct(Punct::Comma)?.is_none() {
                    break;
                }
                if self.check_punct(Punct::RBrace)? {
                    let tok = self.peek_clone(0)?;
                    self.diags
                        .error(&tok.pos, "Trailing comma in enumerator list");
                    break;
                }
            }
            self.expect_punct(Punct::RBrace, "'}'")?;
            Some(enumerators)
        } else {
            None
        };
        if tag.is_none() && body.is_none() {
            return self.unexpected("enum tag or body");
        }
        Ok(EnumSpec { kw, tag, body })
    }

    // -- declarators ------------------------------------------------------

    fn parse_declarator(&mut self, abstract_ok: bool) -> PResult<Declarator> {
        if let Some(star) = self.accept_punct(Punct::Star)? {
            let mut quals = Vec::new();
            loop {
                let tok = self.peek_clone(0)?;
                let kind = match tok.kind {
                    TokenKind::Keyword(Keyword::Const) => QualKind::Const,
                    TokenKind::Keyword(Keyword::Volatile) => QualKind::Volatile,
                    TokenKind::Keyword(Keyword::Restrict)
                    | TokenKind::Keyword(Keyword::RestrictAlt) => QualKind::Restrict,
                    _ => break,
                };
                let tok = self.advance()?;
                quals.push(Qual { kind, tok });
            }
            let inner = self.parse_declarator(abstract_ok)?;
            return Ok(Declarator::Pointer {
                star,
                quals,
                inner: Box::new(inner),
            });
        }
        let base = self.parse_direct_declarator(abstract_ok)?;
        self.parse_declarator_suffix(base)
    }

    fn parse_direct_declarator(&mut self, abstract_ok: bool) -> PResult<Declarator> {
        let tok = self.peek_clone(0)?;
        match tok.kind {
            TokenKind::Ident if UNSUPPORTED_EXTENSIONS.contains(&tok.text.as_str()) => {
                self.diags.error(
                    &tok.pos,
                    format!("Unsupported extension '{}'", tok.text),
                );
                Err(PErr::Syntax)
            }
            TokenKind::Ident => Ok(Declarator::Ident(self.advance()?)),
            TokenKind::Punct(Punct::LParen) if self.paren_is_declarator()? => {
                self.advance()?;
                let inner = self.parse_declarator(abstract_ok)?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(Declarator::Paren(Box::new(inner)))
            }
            _ if abstract_ok => Ok(Declarator::Abstract(tok.pos)),
            _ => self.unexpected("declarator"),
        }
    }

    /// Decide whether `(` begins a nested declarator (`(*f)`) or a
    /// parameter list on an abstract declarator (`int (int)`); one token
    /// of lookahead past the paren settles it.
    fn paren_is_declarator(&mut self) -> PResult<bool> {
        let next = self.peek_clone(1)?;
        Ok(match next.kind {
            TokenKind::Punct(Punct::Star) | TokenKind::Punct(Punct::LParen) => true,
            TokenKind::Ident => {
                !self.is_typedef_name(&next.text)
                    || UNSUPPORTED_EXTENSIONS.contains(&next.text.as_str())
            }
            _ => false,
        })
    }

    fn parse_declarator_suffix(&mut self, mut decl: Declarator) -> PResult<Declarator> {
        loop {
            if let Some(lbracket) = self.accept_punct(Punct::LBracket)? {
                let size = if self.check_punct(Punct::RBracket)? {
                    None
                } else {
                    Some(Box::new(self.parse_cond_expr()?))
                };
                self.expect_punct(Punct::RBracket, "']'")?;
                decl = Declarator::Array {
                    inner: Box::new(decl),
                    lbracket,
                    size,
                };
            } else if let Some(lparen) = self.accept_punct(Punct::LParen)? {
                let (params, variadic) = self.parse_params()?;
                decl = Declarator::Function {
                    inner: Box::new(decl),
                    lparen,
                    params,
                    variadic,
                };
            } else {
                return Ok(decl);
            }
        }
    }

    fn parse_params(&mut self) -> PResult<(Vec<ParamDecl>, bool)> {
        if self.accept_punct(Punct::RParen)?.is_some() {
            return Ok((Vec::new(), false));
        }
        // `(void)` declares no parameters
        if self.check_kw(Keyword::Void)? && self.peek(1)?.is_punct(Punct::RParen) {
            self.advance()?;
            self.advance()?;
            return Ok((Vec::new(), false));
        }
        let mut params = Vec::new();
        let mut variadic = false;
        loop {
            if self.accept_punct(Punct::Ellipsis)?.is_some() {
                variadic = true;
                break;
            }
            let specs = self.parse_decl_specs()?;
            if specs.tspecs.is_empty() && specs.quals.is_empty() && specs.storage.is_empty() {
                return self.unexpected("parameter declaration");
            }
            let decl = self.parse_declarator(true)?;
            params.push(ParamDecl { specs, decl });
            if self.accept_punct(Punct::Comma)?.is_none() {
                break;
            }
        }
        self.expect_punct(Punct::RParen, "')'")?;
        Ok((params, variadic))
    }

    fn parse_type_name(&mut self) -> PResult<TypeName> {
        let specs = self.parse_decl_specs()?;
        if let Some((_, tok)) = specs.storage.first() {
            self.diags
                .warn(&tok.pos, "Storage class in type name is meaningless");
        }
        let decl = self.parse_declarator(true)?;
        Ok(TypeName {
            specs,
            decl: Box::new(decl),
        })
    }

    // -- attributes -------------------------------------------------------

    /// Zero or more `__attribute__((...))` specifiers.
    fn parse_attr_specs(&mut self) -> PResult<Vec<Attr>> {
        let mut attrs = Vec::new();
        while let Some(kw) = self.accept_kw(Keyword::Attribute)? {
            self.expect_punct(Punct::LParen, "'('")?;
            self.expect_punct(Punct::LParen, "'('")?;
            if !self.check_punct(Punct::RParen)? {
                loop {
                    let name = self.expect_ident("attribute name")?;
                    let mut args = Vec::new();
                    if self.accept_punct(Punct::LParen)?.is_some() {
                        if !self.check_punct(Punct::RParen)? {
                            loop {
                                args.push(self.parse_assign_expr()?);
                                if self.accept_punct(Punct::Comma)?.is_none() {
                                    break;
                                }
                            }
                        }
                        self.expect_punct(Punct::RParen, "')'")?;
                    }
                    attrs.push(Attr {
                        kw: kw.clone(),
                        name,
                        args,
                    });
                    if self.accept_punct(Punct::Comma)?.is_none() {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen, "')'")?;
            self.expect_punct(Punct::RParen, "')'")?;
        }
        Ok(attrs)
    }

    // -- initializers -----------------------------------------------------

    fn parse_init(&mut self) -> PResult<Init> {
        if let Some(lbrace) = self.accept_punct(Punct::LBrace)? {
            let mut entries = Vec::new();
            if !self.check_punct(Punct::RBrace)? {
                loop {
                    let designators = self.parse_designators()?;
                    if !designators.is_empty() {
                        self.expect_punct(Punct::Assign, "'='")?;
                    }
                    let init = self.parse_init()?;
                    entries.push(InitEntry { designators, init });
                    if self.accept_punct(Punct::Comma)?.is_none() {
                        break;
                    }
                    if self.check_punct(Punct::RBrace)? {
                        break; // trailing comma
                    }
                }
            }
            self.expect_punct(Punct::RBrace, "'}'")?;
            return Ok(Init::List { lbrace, entries });
        }
        Ok(Init::Expr(self.parse_assign_expr()?))
    }

    fn parse_designators(&mut self) -> PResult<Vec<Designator>> {
        let mut designators = Vec::new();
        loop {
            if self.check_punct(Punct::Dot)? {
                let dot = self.advance()?;
                let name = self.expect_ident("field name")?;
                designators.push(Designator::Field { dot, name });
            } else if self.check_punct(Punct::LBracket)? {
                let lbracket = self.advance()?;
                let expr = self.parse_cond_expr()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                designators.push(Designator::Index { lbracket, expr });
            } else {
                return Ok(designators);
            }
        }
    }

    // -- statements -------------------------------------------------------

    fn parse_block(&mut self, new_scope: bool) -> PResult<Block> {
        if new_scope {
            self.enter_scope();
        }
        let result = self.parse_block_inner();
        if new_scope {
            self.leave_scope();
        }
        result
    }

    fn parse_block_inner(&mut self) -> PResult<Block> {
        let lbrace = self.expect_punct(Punct::LBrace, "'{'")?;
        let mut items = Vec::new();
        loop {
            if self.check_punct(Punct::RBrace)? || self.peek(0)?.kind == TokenKind::Eof {
                break;
            }
            let head = self.peek_clone(0)?;
            let item = if self.starts_decl(&head) && !self.is_label_here()? {
                self.parse_decl().map(BlockItem::Decl)
            } else {
                self.parse_stmt().map(BlockItem::Stmt)
            };
            match item {
                Ok(item) => items.push(item),
                Err(PErr::Syntax) => self.recover()?,
                Err(fatal) => return Err(fatal),
            }
        }
        let rbrace = self.expect_punct(Punct::RBrace, "'}'")?;
        Ok(Block {
            lbrace,
            items,
            rbrace,
        })
    }

    /// `name:` is a label even when `name` is a typedef.
    fn is_label_here(&mut self) -> PResult<bool> {
        Ok(self.peek(0)?.kind == TokenKind::Ident && self.peek(1)?.is_punct(Punct::Colon))
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.peek_clone(0)?;
        match tok.kind {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Compound(self.parse_block(true)?)),
            TokenKind::Punct(Punct::Semicolon) => {
                let semi = self.advance()?;
                Ok(Stmt::Empty { semi })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
            TokenKind::Keyword(Keyword::Case) => {
                let kw = self.advance()?;
                let expr = self.parse_cond_expr()?;
                self.expect_punct(Punct::Colon, "':'")?;
                let stmt = self.parse_stmt()?;
                Ok(Stmt::Case {
                    kw,
                    expr,
                    stmt: Box::new(stmt),
                })
            }
            TokenKind::Keyword(Keyword::Default) => {
                let kw = self.advance()?;
                self.expect_punct(Punct::Colon, "':'")?;
                let stmt = self.parse_stmt()?;
                Ok(Stmt::Default {
                    kw,
                    stmt: Box::new(stmt),
                })
            }
            TokenKind::Keyword(Keyword::Break) => {
                let kw = self.advance()?;
                self.expect_punct(Punct::Semicolon, "';'")?;
                Ok(Stmt::Break { kw })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                let kw = self.advance()?;
                self.expect_punct(Punct::Semicolon, "';'")?;
                Ok(Stmt::Continue { kw })
            }
            TokenKind::Keyword(Keyword::Return) => {
                let kw = self.advance()?;
                let expr = if self.check_punct(Punct::Semicolon)? {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_punct(Punct::Semicolon, "';'")?;
                Ok(Stmt::Return { kw, expr })
            }
            TokenKind::Keyword(Keyword::Goto) => {
                let kw = self.advance()?;
                let label = self.expect_ident("label name")?;
                self.expect_punct(Punct::Semicolon, "';'")?;
                Ok(Stmt::Goto { kw, label })
            }
            TokenKind::Keyword(Keyword::Asm) => self.parse_asm(),
            TokenKind::Ident if self.is_label_here()? => {
                let label = self.advance()?;
                self.advance()?; // ':'
                let stmt = self.parse_stmt()?;
                Ok(Stmt::Labeled {
                    label,
                    stmt: Box::new(stmt),
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                let semi = self.expect_punct(Punct::Semicolon, "';'")?;
                Ok(Stmt::Expr { expr, semi })
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let kw = self.advance()?;
        self.expect_punct(Punct::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen, "')'")?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch = if self.accept_kw(Keyword::Else)?.is_some() {
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If {
            kw,
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let kw = self.advance()?;
        self.expect_punct(Punct::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen, "')'")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { kw, cond, body })
    }

    fn parse_do_while(&mut self) -> PResult<Stmt> {
        let kw = self.advance()?;
        let body = Box::new(self.parse_stmt()?);
        if self.accept_kw(Keyword::While)?.is_none() {
            return self.unexpected("'while'");
        }
        self.expect_punct(Punct::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen, "')'")?;
        self.expect_punct(Punct::Semicolon, "';'")?;
        Ok(Stmt::DoWhile { kw, body, cond })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let kw = self.advance()?;
        self.expect_punct(Punct::LParen, "'('")?;
        // the C99 init declaration gets its own scope
        self.enter_scope();
        let result = self.parse_for_tail(kw);
        self.leave_scope();
        result
    }

    fn parse_for_tail(&mut self, kw: Token) -> PResult<Stmt> {
        let init = if self.accept_punct(Punct::Semicolon)?.is_some() {
            ForInit::Empty
        } else {
            let head = self.peek_clone(0)?;
            if self.starts_decl(&head) {
                ForInit::Decl(self.parse_decl()?)
            } else {
                let expr = self.parse_expr()?;
                self.expect_punct(Punct::Semicolon, "';'")?;
                ForInit::Expr(expr)
            }
        };
        let cond = if self.check_punct(Punct::Semicolon)? {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(Punct::Semicolon, "';'")?;
        let step = if self.check_punct(Punct::RParen)? {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(Punct::RParen, "')'")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For {
            kw,
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        let kw = self.advance()?;
        self.expect_punct(Punct::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen, "')'")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::Switch { kw, cond, body })
    }

    /// Basic or extended inline assembler:
    /// `asm [volatile] [goto] ("..." [: outs [: ins [: clobbers [: labels]]]]);`
    fn parse_asm(&mut self) -> PResult<Stmt> {
        let kw = self.advance()?;
        self.accept_kw(Keyword::Volatile)?;
        let is_goto = self.peek(0)?.kind == TokenKind::Ident && self.peek(0)?.text == "goto";
        if is_goto {
            self.advance()?;
        }
        self.expect_punct(Punct::LParen, "'('")?;
        let template = self.parse_str_parts()?;
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        let mut clobbers = Vec::new();
        let mut labels = Vec::new();
        if self.accept_punct(Punct::Colon)?.is_some() {
            outputs = self.parse_asm_operands()?;
            if self.accept_punct(Punct::Colon)?.is_some() {
                inputs = self.parse_asm_operands()?;
                if self.accept_punct(Punct::Colon)?.is_some() {
                    while self.peek(0)?.kind == TokenKind::StrLit {
                        clobbers.push(self.advance()?);
                        if self.accept_punct(Punct::Comma)?.is_none() {
                            break;
                        }
                    }
                    if self.accept_punct(Punct::Colon)?.is_some() {
                        loop {
                            labels.push(self.expect_ident("label name")?);
                            if self.accept_punct(Punct::Comma)?.is_none() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        self.expect_punct(Punct::RParen, "')'")?;
        self.expect_punct(Punct::Semicolon, "';'")?;
        Ok(Stmt::Asm(AsmStmt {
            kw,
            template,
            outputs,
            inputs,
            clobbers,
            labels,
        }))
    }

    fn parse_asm_operands(&mut self) -> PResult<Vec<AsmOperand>> {
        let mut operands = Vec::new();
        while self.check_punct(Punct::LBracket)? || self.peek(0)?.kind == TokenKind::StrLit {
            let sym_name = if self.accept_punct(Punct::LBracket)?.is_some() {
                let name = self.expect_ident("operand name")?;
                self.expect_punct(Punct::RBracket, "']'")?;
                Some(name)
            } else {
                None
            };
            let constraint = if self.peek(0)?.kind == TokenKind::StrLit {
                self.advance()?
            } else {
                return self.unexpected("constraint string");
            };
            self.expect_punct(Punct::LParen, "'('")?;
            let expr = self.parse_expr()?;
            self.expect_punct(Punct::RParen, "')'")?;
            operands.push(AsmOperand {
                sym_name,
                constraint,
                expr,
            });
            if self.accept_punct(Punct::Comma)?.is_none() {
                break;
            }
        }
        Ok(operands)
    }

    fn parse_str_parts(&mut self) -> PResult<Vec<Token>> {
        let mut parts = Vec::new();
        while self.peek(0)?.kind == TokenKind::StrLit {
            parts.push(self.advance()?);
        }
        if parts.is_empty() {
            return self.unexpected("string literal");
        }
        Ok(parts)
    }

    // -- expressions ------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_assign_expr()?;
        while let Some(comma) = self.accept_punct(Punct::Comma)? {
            let rhs = self.parse_assign_expr()?;
            expr = Expr::Comma {
                lhs: Box::new(expr),
                comma,
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_assign_expr(&mut self) -> PResult<Expr> {
        let lhs = self.parse_cond_expr()?;
        let tok = self.peek_clone(0)?;
        let op = match tok.kind {
            TokenKind::Punct(Punct::Assign) => AssignOp::Plain,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::Compound(BinOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::Compound(BinOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => AssignOp::Compound(BinOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => AssignOp::Compound(BinOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => AssignOp::Compound(BinOp::Mod),
            TokenKind::Punct(Punct::AmpAssign) => AssignOp::Compound(BinOp::BitAnd),
            TokenKind::Punct(Punct::PipeAssign) => AssignOp::Compound(BinOp::BitOr),
            TokenKind::Punct(Punct::CaretAssign) => AssignOp::Compound(BinOp::BitXor),
            TokenKind::Punct(Punct::ShlAssign) => AssignOp::Compound(BinOp::Shl),
            TokenKind::Punct(Punct::ShrAssign) => AssignOp::Compound(BinOp::Shr),
            _ => return Ok(lhs),
        };
        let tok = self.advance()?;
        let rhs = self.parse_assign_expr()?;
        Ok(Expr::Assign {
            op,
            tok,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_cond_expr(&mut self) -> PResult<Expr> {
        let cond = self.parse_binary_expr(0)?;
        if let Some(qtok) = self.accept_punct(Punct::Question)? {
            let then_expr = self.parse_expr()?;
            self.expect_punct(Punct::Colon, "':'")?;
            let else_expr = self.parse_cond_expr()?;
            return Ok(Expr::Cond {
                cond: Box::new(cond),
                qtok,
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        Ok(cond)
    }

    /// Binary operator precedence, loosest first.
    fn binop_at(&mut self, level: usize) -> PResult<Option<BinOp>> {
        const LEVELS: &[&[(Punct, BinOp)]] = &[
            &[(Punct::PipePipe, BinOp::LogOr)],
            &[(Punct::AmpAmp, BinOp::LogAnd)],
            &[(Punct::Pipe, BinOp::BitOr)],
            &[(Punct::Caret, BinOp::BitXor)],
            &[(Punct::Amp, BinOp::BitAnd)],
            &[(Punct::Eq, BinOp::Eq), (Punct::NotEq, BinOp::NotEq)],
            &[
                (Punct::Lt, BinOp::Lt),
                (Punct::Gt, BinOp::Gt),
                (Punct::LtEq, BinOp::LtEq),
                (Punct::GtEq, BinOp::GtEq),
            ],
            &[(Punct::Shl, BinOp::Shl), (Punct::Shr, BinOp::Shr)],
            &[(Punct::Plus, BinOp::Add), (Punct::Minus, BinOp::Sub)],
            &[
                (Punct::Star, BinOp::Mul),
                (Punct::Slash, BinOp::Div),
                (Punct::Percent, BinOp::Mod),
            ],
        ];
        if level >= LEVELS.len() {
            return Ok(None);
        }
        let tok = self.peek_clone(0)?;
        for (p, op) in LEVELS[level] {
            if tok.is_punct(*p) {
                return Ok(Some(*op));
            }
        }
        Ok(None)
    }

    fn parse_binary_expr(&mut self, level: usize) -> PResult<Expr> {
        const MAX_LEVEL: usize = 10;
        if level >= MAX_LEVEL {
            return self.parse_cast_expr();
        }
        let mut lhs = self.parse_binary_expr(level + 1)?;
        while let Some(op) = self.binop_at(level)? {
            let tok = self.advance()?;
            let rhs = self.parse_binary_expr(level + 1)?;
            lhs = Expr::Binary {
                op,
                tok,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_cast_expr(&mut self) -> PResult<Expr> {
        if self.check_punct(Punct::LParen)? {
            let next = self.peek_clone(1)?;
            if self.starts_decl(&next) {
                let lparen = self.advance()?;
                let tname = self.parse_type_name()?;
                self.expect_punct(Punct::RParen, "')'")?;
                let expr = self.parse_cast_expr()?;
                return Ok(Expr::Cast {
                    lparen,
                    tname,
                    expr: Box::new(expr),
                });
            }
        }
        self.parse_unary_expr()
    }

    fn parse_unary_expr(&mut self) -> PResult<Expr> {
        let tok = self.peek_clone(0)?;
        let op = match tok.kind {
            TokenKind::Punct(Punct::Plus) => Some(UnOp::Plus),
            TokenKind::Punct(Punct::Minus) => Some(UnOp::Minus),
            TokenKind::Punct(Punct::Tilde) => Some(UnOp::BitNot),
            TokenKind::Punct(Punct::Bang) => Some(UnOp::LogNot),
            TokenKind::Punct(Punct::Star) => Some(UnOp::Deref),
            TokenKind::Punct(Punct::Amp) => Some(UnOp::Addr),
            TokenKind::Punct(Punct::Inc) => Some(UnOp::PreInc),
            TokenKind::Punct(Punct::Dec) => Some(UnOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            let tok = self.advance()?;
            let expr = self.parse_cast_expr()?;
            return Ok(Expr::Unary {
                op,
                tok,
                expr: Box::new(expr),
            });
        }
        if tok.is_keyword(Keyword::Sizeof) {
            let kw = self.advance()?;
            if self.check_punct(Punct::LParen)? {
                let next = self.peek_clone(1)?;
                if self.starts_decl(&next) {
                    self.advance()?;
                    let tname = self.parse_type_name()?;
                    self.expect_punct(Punct::RParen, "')'")?;
                    return Ok(Expr::SizeofType { kw, tname });
                }
            }
            let expr = self.parse_unary_expr()?;
            return Ok(Expr::SizeofExpr {
                kw,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let tok = self.peek_clone(0)?;
            match tok.kind {
                TokenKind::Punct(Punct::LBracket) => {
                    let lbracket = self.advance()?;
                    let index = self.parse_expr()?;
                    self.expect_punct(Punct::RBracket, "']'")?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        lbracket,
                        index: Box::new(index),
                    };
                }
                TokenKind::Punct(Punct::LParen) => {
                    let lparen = self.advance()?;
                    let mut args = Vec::new();
                    if !self.check_punct(Punct::RParen)? {
                        loop {
                            args.push(self.parse_assign_expr()?);
                            if self.accept_punct(Punct::Comma)?.is_none() {
                                break;
                            }
                        }
                    }
                    self.expect_punct(Punct::RParen, "')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        lparen,
                        args,
                    };
                }
                TokenKind::Punct(Punct::Dot) => {
                    let op = self.advance()?;
                    let member = self.expect_ident("member name")?;
                    expr = Expr::Member {
                        base: Box::new(expr),
                        op,
                        indirect: false,
                        member,
                    };
                }
                TokenKind::Punct(Punct::Arrow) => {
                    let op = self.advance()?;
                    let member = self.expect_ident("member name")?;
                    expr = Expr::Member {
                        base: Box::new(expr),
                        op,
                        indirect: true,
                        member,
                    };
                }
                TokenKind::Punct(Punct::Inc) => {
                    let tok = self.advance()?;
                    expr = Expr::Postfix {
                        op: PostOp::Inc,
                        tok,
                        expr: Box::new(expr),
                    };
                }
                TokenKind::Punct(Punct::Dec) => {
                    let tok = self.advance()?;
                    expr = Expr::Postfix {
                        op: PostOp::Dec,
                        tok,
                        expr: Box::new(expr),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary_expr(&mut self) -> PResult<Expr> {
        let tok = self.peek_clone(0)?;
        match tok.kind {
            TokenKind::IntLit => Ok(Expr::IntLit(self.advance()?)),
            TokenKind::CharLit => Ok(Expr::CharLit(self.advance()?)),
            TokenKind::StrLit => Ok(Expr::StrLit(self.parse_str_parts()?)),
            TokenKind::Ident => {
                if UNSUPPORTED_EXTENSIONS.contains(&tok.text.as_str()) {
                    self.diags.error(
                        &tok.pos,
                        format!("Unsupported extension '{}'", tok.text),
                    );
                    return Err(PErr::Syntax);
                }
                Ok(Expr::Ident(self.advance()?))
            }
            TokenKind::Punct(Punct::LParen) => {
                let lparen = self.advance()?;
                let inner = self.parse_expr()?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(Expr::Paren {
                    lparen,
                    inner: Box::new(inner),
                })
            }
            _ => self.unexpected("expression"),
        }
    }
}

/// Is the outermost derivation of the declarator (paren wrappers aside)
/// a function?
fn declared_function(decl: &Declarator) -> bool {
    match decl {
        Declarator::Function { .. } => true,
        Declarator::Paren(inner) => declared_function(inner),
        _ => false,
    }
}

/// Enter all named parameters of a function declarator into the parser's
/// innermost scope.
fn declare_params(parser: &mut Parser<'_>, decl: &Declarator) {
    if let Declarator::Function { params, .. } = decl {
        for param in params {
            if let Some(name) = param.decl.name() {
                let text = name.text.clone();
                parser.declare(&text, false);
            }
        }
        return;
    }
    match decl {
        Declarator::Pointer { inner, .. }
        | Declarator::Array { inner, .. }
        | Declarator::Paren(inner) => declare_params(parser, inner),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::StringSource;

    fn parse(text: &str) -> (Module, Diagnostics) {
        let mut src = StringSource::new("t.c", text);
        let lexer = Lexer::new(&mut src);
        Parser::new(lexer).parse_module().unwrap()
    }

    fn parse_ok(text: &str) -> Module {
        let (module, diags) = parse(text);
        assert!(
            !diags.has_errors(),
            "unexpected errors: {:?}",
            diags.iter().collect::<Vec<_>>()
        );
        module
    }

    #[test]
    fn test_parse_simple_function() {
        let module = parse_ok("int main(void) { return 0; }");
        assert_eq!(module.decls.len(), 1);
        match &module.decls[0] {
            ExtDecl::FuncDef(f) => {
                assert_eq!(f.decl.name().unwrap().text, "main");
                assert_eq!(f.body.items.len(), 1);
            }
            other => panic!("expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_globals() {
        let module = parse_ok("int a, b = 1, c = 2;");
        match &module.decls[0] {
            ExtDecl::Decl(d) => {
                assert_eq!(d.declarators.len(), 3);
                assert!(d.declarators[0].init.is_none());
                assert!(d.declarators[1].init.is_some());
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_typedef_disambiguation() {
        let module = parse_ok("typedef int T; int f(void) { T x; x = 1; return x; }");
        match &module.decls[1] {
            ExtDecl::FuncDef(f) => {
                assert!(matches!(f.body.items[0], BlockItem::Decl(_)));
                assert!(matches!(f.body.items[1], BlockItem::Stmt(_)));
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_non_typedef_ident_is_expression() {
        let module = parse_ok("int T; int f(void) { T * 2; return 0; }");
        match &module.decls[1] {
            ExtDecl::FuncDef(f) => {
                assert!(matches!(f.body.items[0], BlockItem::Stmt(Stmt::Expr { .. })));
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_function_pointer_declarator() {
        let module = parse_ok("int (*handler)(int, int);");
        match &module.decls[0] {
            ExtDecl::Decl(d) => {
                assert_eq!(d.declarators[0].decl.name().unwrap().text, "handler");
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_designated_initializers() {
        let module = parse_ok("struct p { int x; int y; }; struct p q = { .y = 2, [0] = 1 };");
        match &module.decls[1] {
            ExtDecl::Decl(d) => match d.declarators[0].init.as_ref().unwrap() {
                Init::List { entries, .. } => {
                    assert_eq!(entries.len(), 2);
                    assert!(matches!(
                        entries[0].designators[0],
                        Designator::Field { .. }
                    ));
                    assert!(matches!(
                        entries[1].designators[0],
                        Designator::Index { .. }
                    ));
                }
                other => panic!("expected list initializer, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_attributes() {
        let module = parse_ok("void f(void) __attribute__((usr));");
        match &module.decls[0] {
            ExtDecl::Decl(d) => {
                assert_eq!(d.declarators[0].attrs[0].name.text, "usr");
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_attribute_with_args() {
        let module = parse_ok("int x __attribute__((aligned(2)));");
        match &module.decls[0] {
            ExtDecl::Decl(d) => {
                let attr = &d.declarators[0].attrs[0];
                assert_eq!(attr.name.text, "aligned");
                assert_eq!(attr.args.len(), 1);
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_attribute() {
        parse_ok("int x __attribute__(());");
    }

    #[test]
    fn test_for_with_decl() {
        let module = parse_ok("int f(void) { for (int i = 0; i; i = i - 1) ; return 0; }");
        match &module.decls[0] {
            ExtDecl::FuncDef(f) => match &f.body.items[0] {
                BlockItem::Stmt(Stmt::For { init, .. }) => {
                    assert!(matches!(init, ForInit::Decl(_)));
                }
                other => panic!("expected for, got {:?}", other),
            },
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_switch_case_default() {
        parse_ok("void f(int x) { switch (x) { case 1: break; default: break; } }");
    }

    #[test]
    fn test_bitfields() {
        let module = parse_ok("struct flags { unsigned a : 1; unsigned : 0; unsigned b : 3; };");
        match &module.decls[0] {
            ExtDecl::Decl(d) => match &d.specs.tspecs[0] {
                TypeSpec::Record(r) => {
                    let members = r.body.as_ref().unwrap();
                    assert_eq!(members.len(), 3);
                    assert!(members[1].declarators[0].decl.name().is_none());
                    assert!(members[1].declarators[0].width.is_some());
                }
                other => panic!("expected record, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_basic_asm() {
        let module = parse_ok("void f(void) { asm(\"halt\"); }");
        match &module.decls[0] {
            ExtDecl::FuncDef(f) => {
                assert!(matches!(f.body.items[0], BlockItem::Stmt(Stmt::Asm(_))));
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_extended_asm() {
        let module =
            parse_ok("int f(int x) { asm(\"ld a, %1\" : \"=r\"(x) : \"r\"(x) : \"a\"); return x; }");
        match &module.decls[0] {
            ExtDecl::FuncDef(f) => match &f.body.items[0] {
                BlockItem::Stmt(Stmt::Asm(a)) => {
                    assert_eq!(a.outputs.len(), 1);
                    assert_eq!(a.inputs.len(), 1);
                    assert_eq!(a.clobbers.len(), 1);
                }
                other => panic!("expected asm, got {:?}", other),
            },
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_error_recovery_continues() {
        let (module, diags) = parse("int f(void) { return $; } int g(void) { return 1; }");
        assert!(diags.has_errors());
        // g still parses after recovery
        assert!(module.decls.iter().any(|d| matches!(
            d,
            ExtDecl::FuncDef(f) if f.decl.name().unwrap().text == "g"
        )));
    }

    #[test]
    fn test_unexpected_token_cites_position() {
        let (_, diags) = parse("int f(void) { int 5; }");
        assert!(diags.has_errors());
        let first = diags.iter().next().unwrap();
        assert!(first.message.contains("Expected"));
    }

    #[test]
    fn test_unsupported_extension() {
        let (_, diags) = parse("int __stdcall f(void);");
        assert!(diags.has_errors());
        assert!(
            diags
                .iter()
                .any(|d| d.message.contains("Unsupported extension"))
        );
    }

    #[test]
    fn test_trivia_attached() {
        let module = parse_ok("/* leading */ int x;");
        match &module.decls[0] {
            ExtDecl::Decl(d) => {
                let int_tok = d.specs.tspecs[0].token();
                assert!(
                    int_tok
                        .leading
                        .iter()
                        .any(|t| t.kind == TokenKind::Comment)
                );
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_string_concatenation() {
        let module = parse_ok("char *s = \"a\" \"b\";");
        match &module.decls[0] {
            ExtDecl::Decl(d) => match d.declarators[0].init.as_ref().unwrap() {
                Init::Expr(Expr::StrLit(parts)) => assert_eq!(parts.len(), 2),
                other => panic!("expected string literal, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let module = parse_ok("int x = 1 + 2 * 3;");
        match &module.decls[0] {
            ExtDecl::Decl(d) => match d.declarators[0].init.as_ref().unwrap() {
                Init::Expr(Expr::Binary { op: BinOp::Add, rhs, .. }) => {
                    assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("expected addition, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_sizeof_forms() {
        parse_ok("int a = sizeof(int); int b = sizeof a;");
    }

    #[test]
    fn test_cast_vs_paren() {
        let module = parse_ok("typedef int T; int x = (T)1; int y = (x) + 1;");
        match &module.decls[1] {
            ExtDecl::Decl(d) => {
                assert!(matches!(
                    d.declarators[0].init.as_ref().unwrap(),
                    Init::Expr(Expr::Cast { .. })
                ));
            }
            other => panic!("expected declaration, got {:?}", other),
        }
        match &module.decls[2] {
            ExtDecl::Decl(d) => {
                assert!(matches!(
                    d.declarators[0].init.as_ref().unwrap(),
                    Init::Expr(Expr::Binary { .. })
                ));
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }
}
