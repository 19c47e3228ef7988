//! Lexer
//!
//! Hand-written maximal-munch scanner. Tokens carry their verbatim text
//! and starting position; whitespace, newlines, comments and preprocessor
//! lines are emitted as first-class tokens rather than discarded, so a
//! style checker can reconstruct the input byte for byte. The parser is
//! the one that filters them out.
//!
//! Malformed input never kills the lexer: unknown bytes and unterminated
//! literals become [`TokenKind::Invalid`] tokens and the consumer decides
//! what to report. The only hard failure is an I/O error from the
//! underlying byte source.

use crate::CompileError;
use crate::input::ByteSource;
use crate::pos::SourcePos;

/// Classification of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Newline,
    Comment,
    DocComment,
    PreprocLine,
    Ident,
    Keyword(Keyword),
    IntLit,
    CharLit,
    StrLit,
    Punct(Punct),
    Invalid,
    Eof,
}

impl TokenKind {
    /// Trivia tokens are skipped by the parser and attached as leading
    /// trivia on the next syntactic token.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace
                | TokenKind::Newline
                | TokenKind::Comment
                | TokenKind::DocComment
                | TokenKind::PreprocLine
        )
    }
}

/// Reserved words: C89 plus the supported extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Asm,
    Attribute,
    Auto,
    Bool,
    Break,
    Case,
    Char,
    Const,
    Continue,
    Default,
    Do,
    Double,
    Else,
    Enum,
    Extern,
    Float,
    For,
    Goto,
    If,
    Inline,
    Int,
    Int128,
    Long,
    Register,
    Restrict,
    RestrictAlt,
    Return,
    Short,
    Signed,
    Sizeof,
    Static,
    Struct,
    Switch,
    Typedef,
    Union,
    Unsigned,
    Void,
    Volatile,
    While,
}

/// The keyword table. Anything matching the identifier grammar that is
/// not listed here is an ordinary identifier.
const KEYWORDS: &[(&str, Keyword)] = &[
    ("_Bool", Keyword::Bool),
    ("__attribute__", Keyword::Attribute),
    ("__int128", Keyword::Int128),
    ("__restrict__", Keyword::RestrictAlt),
    ("asm", Keyword::Asm),
    ("auto", Keyword::Auto),
    ("break", Keyword::Break),
    ("case", Keyword::Case),
    ("char", Keyword::Char),
    ("const", Keyword::Const),
    ("continue", Keyword::Continue),
    ("default", Keyword::Default),
    ("do", Keyword::Do),
    ("double", Keyword::Double),
    ("else", Keyword::Else),
    ("enum", Keyword::Enum),
    ("extern", Keyword::Extern),
    ("float", Keyword::Float),
    ("for", Keyword::For),
    ("goto", Keyword::Goto),
    ("if", Keyword::If),
    ("inline", Keyword::Inline),
    ("int", Keyword::Int),
    ("long", Keyword::Long),
    ("register", Keyword::Register),
    ("restrict", Keyword::Restrict),
    ("return", Keyword::Return),
    ("short", Keyword::Short),
    ("signed", Keyword::Signed),
    ("sizeof", Keyword::Sizeof),
    ("static", Keyword::Static),
    ("struct", Keyword::Struct),
    ("switch", Keyword::Switch),
    ("typedef", Keyword::Typedef),
    ("union", Keyword::Union),
    ("unsigned", Keyword::Unsigned),
    ("void", Keyword::Void),
    ("volatile", Keyword::Volatile),
    ("while", Keyword::While),
];

fn lookup_keyword(text: &str) -> Option<Keyword> {
    KEYWORDS
        .binary_search_by(|(kw, _)| kw.cmp(&text))
        .ok()
        .map(|i| KEYWORDS[i].1)
}

/// Punctuators, longest-match first when scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Arrow,
    Ellipsis,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Shl,
    Shr,
    AmpAmp,
    PipePipe,
    Inc,
    Dec,
}

/// Operator table ordered longest first so the scanner takes the longest
/// valid punctuator at the current position.
const PUNCTS: &[(&str, Punct)] = &[
    ("...", Punct::Ellipsis),
    ("<<=", Punct::ShlAssign),
    (">>=", Punct::ShrAssign),
    ("->", Punct::Arrow),
    ("++", Punct::Inc),
    ("--", Punct::Dec),
    ("<<", Punct::Shl),
    (">>", Punct::Shr),
    ("<=", Punct::LtEq),
    (">=", Punct::GtEq),
    ("==", Punct::Eq),
    ("!=", Punct::NotEq),
    ("&&", Punct::AmpAmp),
    ("||", Punct::PipePipe),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("&=", Punct::AmpAssign),
    ("|=", Punct::PipeAssign),
    ("^=", Punct::CaretAssign),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (";", Punct::Semicolon),
    (",", Punct::Comma),
    (".", Punct::Dot),
    ("?", Punct::Question),
    (":", Punct::Colon),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("&", Punct::Amp),
    ("|", Punct::Pipe),
    ("^", Punct::Caret),
    ("~", Punct::Tilde),
    ("!", Punct::Bang),
    ("=", Punct::Assign),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

/// A lexed token: classification, verbatim text and start position.
///
/// `leading` is filled in by the parser: the trivia tokens (whitespace,
/// comments, preprocessor lines) that preceded this token in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: SourcePos,
    pub leading: Vec<Token>,
}

impl Token {
    pub fn new(kind: TokenKind, text: String, pos: SourcePos) -> Self {
        Token {
            kind,
            text,
            pos,
            leading: Vec::new(),
        }
    }

    pub fn is_punct(&self, p: Punct) -> bool {
        self.kind == TokenKind::Punct(p)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }
}

const CHUNK: usize = 4096;

/// Demand-driven scanner over a byte source.
pub struct Lexer<'a> {
    src: &'a mut dyn ByteSource,
    buf: Vec<u8>,
    idx: usize,
    eof: bool,
    pos: Option<SourcePos>,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a mut dyn ByteSource) -> Self {
        Lexer {
            src,
            buf: Vec::new(),
            idx: 0,
            eof: false,
            pos: None,
            at_line_start: true,
        }
    }

    /// Ensure at least `n + 1` bytes are buffered past the cursor, unless
    /// the source runs out first.
    fn fill(&mut self, n: usize) -> Result<(), CompileError> {
        while !self.eof && self.buf.len() - self.idx <= n {
            if self.idx > 0 && self.buf.len() > CHUNK {
                self.buf.drain(..self.idx);
                self.idx = 0;
            }
            let mut chunk = [0u8; CHUNK];
            let (got, start) = self.src.read(&mut chunk)?;
            if self.pos.is_none() {
                self.pos = Some(start);
            }
            if got == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..got]);
            }
        }
        Ok(())
    }

    fn peek(&mut self, n: usize) -> Result<Option<u8>, CompileError> {
        self.fill(n)?;
        Ok(self.buf.get(self.idx + n).copied())
    }

    /// Consume one byte into `text`, advancing the position.
    fn bump(&mut self, text: &mut String) {
        let b = self.buf[self.idx];
        self.idx += 1;
        text.push(b as char);
        if let Some(pos) = &mut self.pos {
            pos.advance(b);
        }
    }

    fn cur_pos(&self) -> SourcePos {
        // fill() has always run before this is called
        self.pos.clone().expect("lexer position not initialized")
    }

    /// Produce the next token. Returns [`TokenKind::Eof`] at end of input
    /// and fails only on byte-source I/O errors.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.fill(0)?;
        let pos = self.cur_pos();
        let b = match self.peek(0)? {
            Some(b) => b,
            None => return Ok(Token::new(TokenKind::Eof, String::new(), pos)),
        };

        let at_line_start = self.at_line_start;
        let tok = match b {
            b' ' | b'\t' | b'\x0b' | b'\x0c' | b'\r' => self.scan_whitespace(pos)?,
            b'\n' => {
                let mut text = String::new();
                self.bump(&mut text);
                Token::new(TokenKind::Newline, text, pos)
            }
            b'/' if self.peek(1)? == Some(b'*') => self.scan_block_comment(pos)?,
            b'/' if self.peek(1)? == Some(b'/') => self.scan_line_comment(pos)?,
            b'#' if at_line_start => self.scan_preproc(pos)?,
            b'L' if matches!(self.peek(1)?, Some(b'\'') | Some(b'"')) => {
                let mut text = String::new();
                self.bump(&mut text);
                let quote = self.buf[self.idx];
                self.scan_quoted(pos, text, quote)?
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.scan_ident(pos)?,
            b'0'..=b'9' => self.scan_number(pos)?,
            b'\'' | b'"' => self.scan_quoted(pos, String::new(), b)?,
            _ => self.scan_punct(pos)?,
        };

        match tok.kind {
            TokenKind::Newline => self.at_line_start = true,
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::DocComment => {}
            _ => self.at_line_start = false,
        }
        Ok(tok)
    }

    fn scan_whitespace(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        let mut text = String::new();
        loop {
            match self.peek(0)? {
                Some(b' ') | Some(b'\t') | Some(b'\x0b') | Some(b'\x0c') => self.bump(&mut text),
                // a CR directly before LF belongs to the newline token
                Some(b'\r') if self.peek(1)? != Some(b'\n') => self.bump(&mut text),
                Some(b'\r') if text.is_empty() => {
                    let mut nl = String::new();
                    self.bump(&mut nl);
                    self.bump(&mut nl);
                    return Ok(Token::new(TokenKind::Newline, nl, pos));
                }
                _ => break,
            }
        }
        Ok(Token::new(TokenKind::Whitespace, text, pos))
    }

    fn scan_block_comment(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        let mut text = String::new();
        self.bump(&mut text); // /
        self.bump(&mut text); // *
        let doc = self.peek(0)? == Some(b'*') && self.peek(1)? != Some(b'/');
        loop {
            match self.peek(0)? {
                None => {
                    // unterminated comment
                    return Ok(Token::new(TokenKind::Invalid, text, pos));
                }
                Some(b'*') if self.peek(1)? == Some(b'/') => {
                    self.bump(&mut text);
                    self.bump(&mut text);
                    break;
                }
                Some(_) => self.bump(&mut text),
            }
        }
        let kind = if doc {
            TokenKind::DocComment
        } else {
            TokenKind::Comment
        };
        Ok(Token::new(kind, text, pos))
    }

    fn scan_line_comment(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        let mut text = String::new();
        while let Some(b) = self.peek(0)? {
            if b == b'\n' {
                break;
            }
            self.bump(&mut text);
        }
        Ok(Token::new(TokenKind::Comment, text, pos))
    }

    /// Preprocessor line, emitted opaquely. Backslash-newline
    /// continuations are folded into the same token.
    fn scan_preproc(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        let mut text = String::new();
        while let Some(b) = self.peek(0)? {
            if b == b'\\' && self.peek(1)? == Some(b'\n') {
                self.bump(&mut text);
                self.bump(&mut text);
                continue;
            }
            if b == b'\n' {
                break;
            }
            self.bump(&mut text);
        }
        Ok(Token::new(TokenKind::PreprocLine, text, pos))
    }

    fn scan_ident(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        let mut text = String::new();
        while let Some(b) = self.peek(0)? {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.bump(&mut text);
            } else {
                break;
            }
        }
        let kind = match lookup_keyword(&text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident,
        };
        Ok(Token::new(kind, text, pos))
    }

    /// Integer literal. The scanner only delimits the token; digits,
    /// prefix and suffix are validated later by [`parse_int_text`] so the
    /// verbatim text survives for diagnostics.
    fn scan_number(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        let mut text = String::new();
        while let Some(b) = self.peek(0)? {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.bump(&mut text);
            } else {
                break;
            }
        }
        Ok(Token::new(TokenKind::IntLit, text, pos))
    }

    /// Character or string literal, with `prefix` already holding a wide
    /// `L` marker when present. Escaped quotes do not terminate the
    /// literal; an unescaped newline or end of input does, yielding an
    /// invalid token.
    fn scan_quoted(
        &mut self,
        pos: SourcePos,
        prefix: String,
        quote: u8,
    ) -> Result<Token, CompileError> {
        let mut text = prefix;
        self.bump(&mut text); // opening quote
        loop {
            match self.peek(0)? {
                None | Some(b'\n') => {
                    return Ok(Token::new(TokenKind::Invalid, text, pos));
                }
                Some(b'\\') => {
                    self.bump(&mut text);
                    if self.peek(0)?.is_some_and(|b| b != b'\n') {
                        self.bump(&mut text);
                    }
                }
                Some(b) if b == quote => {
                    self.bump(&mut text);
                    break;
                }
                Some(_) => self.bump(&mut text),
            }
        }
        let kind = if quote == b'\'' {
            TokenKind::CharLit
        } else {
            TokenKind::StrLit
        };
        Ok(Token::new(kind, text, pos))
    }

    fn scan_punct(&mut self, pos: SourcePos) -> Result<Token, CompileError> {
        self.fill(2)?;
        let matched = PUNCTS
            .iter()
            .find(|(spelling, _)| self.buf[self.idx..].starts_with(spelling.as_bytes()))
            .map(|(spelling, p)| (spelling.len(), *p));
        let mut text = String::new();
        match matched {
            Some((len, p)) => {
                for _ in 0..len {
                    self.bump(&mut text);
                }
                Ok(Token::new(TokenKind::Punct(p), text, pos))
            }
            None => {
                // unknown byte: one invalid token, keep going
                self.bump(&mut text);
                Ok(Token::new(TokenKind::Invalid, text, pos))
            }
        }
    }
}

/// Suffix of an integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSuffix {
    None,
    Long,
    LongLong,
}

/// Decoded integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInt {
    pub value: u64,
    pub unsigned: bool,
    pub suffix: IntSuffix,
    /// Octal and hex literals pick their type differently from decimal.
    pub decimal: bool,
}

/// Parse the verbatim text of an integer-literal token: `0x`/`0X` hex,
/// leading-zero octal, decimal otherwise, with `u`/`l`/`ll` suffixes in
/// either case and any order. Errors carry a message ready for a
/// diagnostic.
pub fn parse_int_text(text: &str) -> Result<ParsedInt, String> {
    let (digits, radix, decimal) = if let Some(rest) =
        text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
    {
        (rest, 16u32, false)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8, false)
    } else {
        (text, 10, true)
    };

    let suffix_at = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    let (digits, suffix) = digits.split_at(suffix_at);
    // a lone leading zero is a valid octal literal even with a suffix
    if digits.is_empty() && radix != 8 {
        return Err(format!("Invalid integer literal '{}'", text));
    }

    let mut value: u64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(radix).expect("digit checked above") as u64;
        value = value
            .checked_mul(radix as u64)
            .and_then(|v| v.checked_add(d))
            .ok_or_else(|| format!("Integer literal '{}' is too large", text))?;
    }

    let mut unsigned = false;
    let mut longs = 0;
    let mut rest = suffix;
    while !rest.is_empty() {
        if rest.starts_with('u') || rest.starts_with('U') {
            if unsigned {
                return Err(format!("Invalid integer suffix in '{}'", text));
            }
            unsigned = true;
            rest = &rest[1..];
        } else if rest.starts_with("ll") || rest.starts_with("LL") {
            if longs != 0 {
                return Err(format!("Invalid integer suffix in '{}'", text));
            }
            longs = 2;
            rest = &rest[2..];
        } else if rest.starts_with('l') || rest.starts_with('L') {
            if longs != 0 {
                return Err(format!("Invalid integer suffix in '{}'", text));
            }
            longs = 1;
            rest = &rest[1..];
        } else {
            return Err(format!("Invalid integer literal '{}'", text));
        }
    }

    Ok(ParsedInt {
        value,
        unsigned,
        suffix: match longs {
            0 => IntSuffix::None,
            1 => IntSuffix::Long,
            _ => IntSuffix::LongLong,
        },
        decimal,
    })
}

/// Decode one escape sequence starting after the backslash. Returns the
/// byte value and the number of input chars consumed.
fn decode_escape(rest: &[u8]) -> Result<(u8, usize), String> {
    match rest.first() {
        Some(b'n') => Ok((b'\n', 1)),
        Some(b't') => Ok((b'\t', 1)),
        Some(b'r') => Ok((b'\r', 1)),
        Some(b'\\') => Ok((b'\\', 1)),
        Some(b'\'') => Ok((b'\'', 1)),
        Some(b'"') => Ok((b'"', 1)),
        Some(b'x') => {
            let mut val: u32 = 0;
            let mut used = 0;
            for &b in &rest[1..] {
                match (b as char).to_digit(16) {
                    Some(d) if used < 2 => {
                        val = val * 16 + d;
                        used += 1;
                    }
                    _ => break,
                }
            }
            if used == 0 {
                return Err("Invalid hexadecimal escape sequence".to_string());
            }
            Ok((val as u8, 1 + used))
        }
        Some(b @ b'0'..=b'7') => {
            let mut val: u32 = (*b - b'0') as u32;
            let mut used = 1;
            for &b in &rest[1..] {
                match b {
                    b'0'..=b'7' if used < 3 => {
                        val = val * 8 + (b - b'0') as u32;
                        used += 1;
                    }
                    _ => break,
                }
            }
            if val > 0xff {
                return Err("Octal escape sequence out of range".to_string());
            }
            Ok((val as u8, used))
        }
        _ => Err("Invalid escape sequence".to_string()),
    }
}

/// Decode the verbatim text of a character-literal token (quotes and any
/// `L` prefix included) into its value.
pub fn parse_char_text(text: &str) -> Result<(i64, bool), String> {
    let (body, wide) = match text.strip_prefix('L') {
        Some(rest) => (rest, true),
        None => (text, false),
    };
    let body = body
        .strip_prefix('\'')
        .and_then(|b| b.strip_suffix('\''))
        .ok_or_else(|| "Unterminated character literal".to_string())?;
    let bytes = body.as_bytes();
    if bytes.is_empty() {
        return Err("Empty character literal".to_string());
    }
    let (value, used) = if bytes[0] == b'\\' {
        let (v, n) = decode_escape(&bytes[1..])?;
        (v as i64, n + 1)
    } else {
        (bytes[0] as i64, 1)
    };
    if used != bytes.len() {
        return Err("Multi-character literal".to_string());
    }
    Ok((value, wide))
}

/// Decode the verbatim text of a string-literal token into its byte
/// contents (terminating NUL not included).
pub fn parse_str_text(text: &str) -> Result<(Vec<u8>, bool), String> {
    let (body, wide) = match text.strip_prefix('L') {
        Some(rest) => (rest, true),
        None => (text, false),
    };
    let body = body
        .strip_prefix('"')
        .and_then(|b| b.strip_suffix('"'))
        .ok_or_else(|| "Unterminated string literal".to_string())?;
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let (v, n) = decode_escape(&bytes[i + 1..])?;
            out.push(v);
            i += n + 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok((out, wide))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::StringSource;

    fn lex_all(text: &str) -> Vec<Token> {
        let mut src = StringSource::new("t.c", text);
        let mut lexer = Lexer::new(&mut src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok);
            if done {
                break;
            }
        }
        out
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex_all(text).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_roundtrip_verbatim() {
        let text = "int main(void)\t{\n\t/* body */ return 0; // done\n}\n";
        let joined: String = lex_all(text).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_keywords_and_idents() {
        let toks = lex_all("int foo _Bool __int128 intx");
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::Int));
        assert_eq!(toks[2].kind, TokenKind::Ident);
        assert_eq!(toks[4].kind, TokenKind::Keyword(Keyword::Bool));
        assert_eq!(toks[6].kind, TokenKind::Keyword(Keyword::Int128));
        assert_eq!(toks[8].kind, TokenKind::Ident);
    }

    #[test]
    fn test_maximal_munch() {
        let toks = lex_all("a<<=b<<c<d");
        let puncts: Vec<_> = toks
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Punct(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(puncts, vec![Punct::ShlAssign, Punct::Shl, Punct::Lt]);
    }

    #[test]
    fn test_ellipsis_vs_dots() {
        let toks = lex_all("f(...)");
        assert!(toks.iter().any(|t| t.is_punct(Punct::Ellipsis)));
    }

    #[test]
    fn test_comments() {
        let toks = lex_all("/* plain */ /** doc */ /**/ // line");
        let kinds: Vec<_> = toks
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Whitespace | TokenKind::Eof))
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Comment,
                TokenKind::DocComment,
                TokenKind::Comment,
                TokenKind::Comment
            ]
        );
    }

    #[test]
    fn test_unterminated_comment() {
        let toks = lex_all("/* no end");
        assert_eq!(toks[0].kind, TokenKind::Invalid);
    }

    #[test]
    fn test_preproc_line() {
        let toks = lex_all("#include <stdio.h>\nint x;");
        assert_eq!(toks[0].kind, TokenKind::PreprocLine);
        assert_eq!(toks[0].text, "#include <stdio.h>");
        assert_eq!(toks[1].kind, TokenKind::Newline);
    }

    #[test]
    fn test_preproc_needs_line_start() {
        let toks = lex_all("x # y");
        assert!(toks.iter().any(|t| t.kind == TokenKind::Invalid));
    }

    #[test]
    fn test_preproc_after_indent() {
        let toks = lex_all("  #define X 1");
        assert_eq!(toks[1].kind, TokenKind::PreprocLine);
    }

    #[test]
    fn test_char_and_string_literals() {
        let toks = lex_all(r#"'a' '\n' L'x' "hi\"there" L"w""#);
        let kinds: Vec<_> = toks
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Whitespace | TokenKind::Eof))
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::CharLit,
                TokenKind::CharLit,
                TokenKind::CharLit,
                TokenKind::StrLit,
                TokenKind::StrLit
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let toks = lex_all("\"oops\nint x;");
        assert_eq!(toks[0].kind, TokenKind::Invalid);
        // and the lexer keeps going
        assert!(toks.iter().any(|t| t.kind == TokenKind::Keyword(Keyword::Int)));
    }

    #[test]
    fn test_invalid_byte() {
        assert_eq!(kinds("@")[0], TokenKind::Invalid);
    }

    #[test]
    fn test_positions() {
        let toks = lex_all("int\n  x;");
        let x = toks.iter().find(|t| t.text == "x").unwrap();
        assert_eq!((x.pos.line, x.pos.col), (2, 3));
    }

    #[test]
    fn test_parse_int_decimal() {
        let p = parse_int_text("42").unwrap();
        assert_eq!(p.value, 42);
        assert!(!p.unsigned);
        assert_eq!(p.suffix, IntSuffix::None);
        assert!(p.decimal);
    }

    #[test]
    fn test_parse_int_hex_octal() {
        assert_eq!(parse_int_text("0xFF").unwrap().value, 255);
        assert_eq!(parse_int_text("0X10").unwrap().value, 16);
        assert_eq!(parse_int_text("017").unwrap().value, 15);
        assert_eq!(parse_int_text("0").unwrap().value, 0);
    }

    #[test]
    fn test_parse_int_suffixes() {
        let p = parse_int_text("10ul").unwrap();
        assert!(p.unsigned);
        assert_eq!(p.suffix, IntSuffix::Long);
        let p = parse_int_text("10LLU").unwrap();
        assert!(p.unsigned);
        assert_eq!(p.suffix, IntSuffix::LongLong);
        assert!(parse_int_text("10uu").is_err());
        assert!(parse_int_text("10lul").is_err());
    }

    #[test]
    fn test_parse_int_errors() {
        assert!(parse_int_text("0x").is_err());
        assert!(parse_int_text("08").is_err());
        assert!(parse_int_text("99999999999999999999999").is_err());
    }

    #[test]
    fn test_parse_char() {
        assert_eq!(parse_char_text("'a'").unwrap(), (97, false));
        assert_eq!(parse_char_text("'\\n'").unwrap(), (10, false));
        assert_eq!(parse_char_text("'\\x41'").unwrap(), (0x41, false));
        assert_eq!(parse_char_text("'\\101'").unwrap(), (0o101, false));
        assert_eq!(parse_char_text("L'a'").unwrap(), (97, true));
        assert!(parse_char_text("'ab'").is_err());
        assert!(parse_char_text("''").is_err());
    }

    #[test]
    fn test_parse_str() {
        let (bytes, wide) = parse_str_text("\"a\\tb\\0\"").unwrap();
        assert_eq!(bytes, vec![b'a', b'\t', b'b', 0]);
        assert!(!wide);
        let (_, wide) = parse_str_text("L\"x\"").unwrap();
        assert!(wide);
    }
}
