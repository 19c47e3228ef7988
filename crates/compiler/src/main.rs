//! zcc command-line driver
//!
//! Compiles a single C source file to Z80 assembler, with options to
//! dump each intermediate artifact. Diagnostics go to stderr in
//! `file:line:col: level: message` form; the exit code classifies the
//! failure: 0 success, 1 source diagnostics, 2 I/O, 3 internal error.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use zcc::{CompileError, CompileOutput, CompilerConfig};

const EXIT_DIAGNOSTICS: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_INTERNAL: i32 = 3;

#[derive(ClapParser)]
#[command(name = "zcc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "C compiler for the Zilog Z80", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a C source file to Z80 assembler
    Build {
        /// Input C source file
        input: PathBuf,

        /// Output assembler path (defaults to the input with .asm)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the token stream
        #[arg(long)]
        dump_tokens: bool,

        /// Print the abstract syntax tree
        #[arg(long)]
        dump_ast: bool,

        /// Print the intermediate representation
        #[arg(long)]
        dump_ir: bool,

        /// Print the selected Z80 instructions
        #[arg(long)]
        dump_z80: bool,

        /// Path to a compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Treat warnings as errors
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Parse and analyze files without emitting code
    Check {
        /// Input C source files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path to a compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Treat warnings as errors
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Build {
            input,
            output,
            dump_tokens,
            dump_ast,
            dump_ir,
            dump_z80,
            config,
            deny_warnings,
        } => run_build(
            &input,
            output.as_deref(),
            DumpFlags {
                tokens: dump_tokens,
                ast: dump_ast,
                ir: dump_ir,
                z80: dump_z80,
            },
            config.as_deref(),
            deny_warnings,
        ),
        Commands::Check {
            inputs,
            config,
            deny_warnings,
        } => run_check(&inputs, config.as_deref(), deny_warnings),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            0
        }
    };
    process::exit(code);
}

struct DumpFlags {
    tokens: bool,
    ast: bool,
    ir: bool,
    z80: bool,
}

fn load_config(path: Option<&Path>) -> Result<CompilerConfig, String> {
    match path {
        None => Ok(CompilerConfig::new()),
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            CompilerConfig::from_toml(&text)
        }
    }
}

fn report(out: &CompileOutput, deny_warnings: bool) -> bool {
    for diag in out.diags.iter() {
        eprintln!("{}", diag);
    }
    out.success() && !(deny_warnings && out.diags.warning_count() > 0)
}

fn error_exit(err: &CompileError) -> i32 {
    eprintln!("zcc: {}", err);
    match err {
        CompileError::Io(_) => EXIT_IO,
        CompileError::Internal(_) => EXIT_INTERNAL,
    }
}

fn run_build(
    input: &Path,
    output: Option<&Path>,
    dumps: DumpFlags,
    config: Option<&Path>,
    deny_warnings: bool,
) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("zcc: {}", msg);
            return EXIT_IO;
        }
    };

    if dumps.tokens {
        let text = match fs::read_to_string(input) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("zcc: {}: {}", input.display(), e);
                return EXIT_IO;
            }
        };
        match zcc::lex_source(&input.display().to_string(), &text) {
            Ok(tokens) => {
                for tok in &tokens {
                    println!("{}: {:?} {:?}", tok.pos, tok.kind, tok.text);
                }
            }
            Err(e) => return error_exit(&e),
        }
    }

    let out = match zcc::compile_file(input, &config) {
        Ok(out) => out,
        Err(e) => return error_exit(&e),
    };

    if dumps.ast {
        println!("{:#?}", out.ast);
    }
    if dumps.ir {
        print!("{}", out.ir);
    }
    if dumps.z80 {
        print!("{}", out.z80);
    }

    if !report(&out, deny_warnings) {
        return EXIT_DIAGNOSTICS;
    }

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("asm"));
    if let Err(e) = fs::write(&output, out.z80.to_string()) {
        eprintln!("zcc: {}: {}", output.display(), e);
        return EXIT_IO;
    }
    0
}

fn run_check(inputs: &[PathBuf], config: Option<&Path>, deny_warnings: bool) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("zcc: {}", msg);
            return EXIT_IO;
        }
    };
    let mut code = 0;
    for input in inputs {
        match zcc::compile_file(input, &config) {
            Ok(out) => {
                if !report(&out, deny_warnings) {
                    code = EXIT_DIAGNOSTICS;
                }
            }
            Err(e) => return error_exit(&e),
        }
    }
    code
}
