//! zcc compiler library
//!
//! A whole-program C89 compiler for the Zilog Z80. The pipeline is
//! strictly staged and single-threaded: bytes are scanned into tokens,
//! parsed into an AST, lowered to a typed three-address IR by the
//! semantic analyzer, and finally selected into Z80 instructions over
//! virtual registers. Each stage owns its data and hands it to the next;
//! diagnostics accumulate per compilation and are reported together.
//!
//! ```rust
//! use zcc::{CompilerConfig, compile_source};
//!
//! let out = compile_source("demo.c", "int main(void) { return 0; }",
//!                          &CompilerConfig::new()).unwrap();
//! assert!(out.success());
//! println!("{}", out.z80);
//! ```

pub mod ast;
pub mod cgen;
pub mod config;
pub mod diagnostics;
pub mod input;
pub mod ir;
pub mod isel;
pub mod lexer;
pub mod parser;
pub mod pos;
pub mod symbols;
pub mod types;
pub mod z80;

pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Level};
pub use ir::IrModule;
pub use z80::Z80Module;

use input::{ByteSource, FileSource, StringSource};
use lexer::{Lexer, Token, TokenKind};
use parser::Parser;
use std::fmt;
use std::path::Path;

/// Infrastructure failure: not a diagnosis of the user's program but a
/// failure of the compiler's environment or of the compiler itself.
/// These abort the pipeline immediately.
#[derive(Debug)]
pub enum CompileError {
    /// I/O failure reading source input.
    Io(String),
    /// Internal invariant violation; a compiler bug, not a user error.
    Internal(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Io(msg) => write!(f, "i/o error: {}", msg),
            CompileError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

/// Everything one compilation produced. The IR and instruction output
/// are present even when diagnostics contain errors, for inspection;
/// [`CompileOutput::success`] is the authoritative verdict.
#[derive(Debug)]
pub struct CompileOutput {
    pub ast: ast::Module,
    pub ir: IrModule,
    pub z80: Z80Module,
    pub diags: Diagnostics,
}

impl CompileOutput {
    /// A compilation succeeds iff the pipeline completed and no
    /// error-severity diagnostic was recorded.
    pub fn success(&self) -> bool {
        !self.diags.has_errors()
    }
}

/// Compile one translation unit from an in-memory string.
pub fn compile_source(
    file_name: &str,
    text: &str,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileError> {
    let mut src = StringSource::new(file_name, text);
    compile(&mut src, config)
}

/// Compile one translation unit from a file.
pub fn compile_file(path: &Path, config: &CompilerConfig) -> Result<CompileOutput, CompileError> {
    let mut src = FileSource::open(path)?;
    compile(&mut src, config)
}

/// The staged pipeline over any byte source.
pub fn compile(
    src: &mut dyn ByteSource,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileError> {
    let lexer = Lexer::new(src);
    let (ast, mut diags) = Parser::new(lexer).parse_module()?;
    let ir = cgen::generate(&ast, config, &mut diags)?;
    // the selector does not run over an erroneous module; it has no
    // recovery of its own
    let z80 = if diags.has_errors() {
        Z80Module::default()
    } else {
        isel::select(&ir)?
    };
    Ok(CompileOutput {
        ast,
        ir,
        z80,
        diags,
    })
}

/// Scan a whole input into tokens, for `--dump-tokens`. The
/// concatenation of the returned token texts reproduces the input
/// verbatim.
pub fn lex_source(file_name: &str, text: &str) -> Result<Vec<Token>, CompileError> {
    let mut src = StringSource::new(file_name, text);
    let mut lexer = Lexer::new(&mut src);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let done = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_end_to_end_success() {
        let out = compile_source(
            "t.c",
            "int main(void) { return 0; }",
            &CompilerConfig::new(),
        )
        .unwrap();
        assert!(out.success());
        assert!(out.ir.to_string().contains("proc @main() i16"));
        assert!(out.z80.to_string().contains("_main:"));
    }

    #[test]
    fn test_errors_still_produce_ir() {
        let out = compile_source(
            "t.c",
            "int f(void) { return x; } int g(void) { return 1; }",
            &CompilerConfig::new(),
        )
        .unwrap();
        assert!(!out.success());
        // the rest of the module still lowered
        assert!(out.ir.procs().any(|p| p.name == "g"));
        // no instruction selection over an erroneous module
        assert!(out.z80.procs.is_empty());
    }

    #[test]
    fn test_ir_text_roundtrip_through_pipeline() {
        let out = compile_source(
            "t.c",
            "int g; int f(int x) { if (x) g = x; return g; }",
            &CompilerConfig::new(),
        )
        .unwrap();
        assert!(out.success());
        let text = out.ir.to_string();
        let reparsed = ir::parse_module(&text).unwrap();
        assert_eq!(out.ir, reparsed);
        assert_eq!(reparsed.to_string(), text);
    }

    #[test]
    fn test_compile_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "int main(void) {{ return 0; }}\n").unwrap();
        let out = compile_file(tmp.path(), &CompilerConfig::new()).unwrap();
        assert!(out.success());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = compile_file(Path::new("/no/such/file.c"), &CompilerConfig::new()).unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }

    #[test]
    fn test_lex_source_roundtrip() {
        let text = "int x; /* c */\n#define Y 1\nint f(void) { return x; }\n";
        let tokens = lex_source("t.c", text).unwrap();
        let joined: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_config_disables_warning_class() {
        let config = CompilerConfig::from_toml("[warnings]\nconversion = false\n").unwrap();
        let out = compile_source("t.c", "int c; _Bool b; void f(void) { c = b; }", &config)
            .unwrap();
        assert!(out.success());
        assert_eq!(out.diags.warning_count(), 0);
    }

    #[test]
    fn test_diagnostic_format() {
        let out = compile_source("demo.c", "int f(void) { return $; }", &CompilerConfig::new())
            .unwrap();
        assert!(!out.success());
        let first = out.diags.iter().next().unwrap().to_string();
        assert!(first.starts_with("demo.c:1:"));
        assert!(first.contains(": error: "));
    }
}
