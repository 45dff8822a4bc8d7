//! vitte-cli/src/lib.rs — the CLI shell around `vitte-core`/`vitte-vm`.
//!
//! This crate only assembles source text (or loads a serialized `.vitbc`
//! chunk) and drives `vitte_vm::Vm`, translating the result into the exit
//! codes the external CLI collaborator reports:
//!
//!   - `0`  success
//!   - `65` compile (assemble) error
//!   - `70` runtime error
//!   - `74` I/O error
//!
//! Sub-commands:
//!   - `run <file>`    — assemble/load and interpret a program
//!   - `repl`          — line-oriented REPL against a persistent VM
//!   - `disasm <file>` — print a chunk's disassembly

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use vitte_core::bytecode::{Chunk, FunctionProto};
use vitte_core::{asm, disasm};
use vitte_vm::Vm;

/// Process exit code reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    CompileError = 65,
    RuntimeError = 70,
    IoError = 74,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Parser, Debug)]
#[command(name = "vitte", version, about = "Vitte bytecode VM — run, repl, disasm")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Assemble/load and interpret a program (a `.vitbc` chunk, or assembler
    /// source text for anything else).
    Run {
        file: PathBuf,
    },
    /// Line-oriented REPL; globals persist across lines.
    Repl,
    /// Print a chunk's disassembly.
    Disasm {
        file: PathBuf,
    },
}

/// Entry point called by `main`. Returns the process exit code; never
/// panics on user-facing failure (I/O, assemble, runtime errors are all
/// reported on the diagnostic stream and folded into the exit code).
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    log::debug!("dispatching {:?}", cli.cmd);
    match cli.cmd {
        Cmd::Run { file } => cmd_run(&file),
        Cmd::Repl => cmd_repl(),
        Cmd::Disasm { file } => cmd_disasm(&file),
    }
}

/// Load `path` as a chunk: a serialized `.vitbc` if it starts with the chunk
/// magic, assembler source text otherwise.
fn load_chunk(path: &Path) -> Result<Chunk, ExitCode> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading {}", path.display()))
        .map_err(|e| {
            eprintln!("error: {e:#}");
            ExitCode::IoError
        })?;

    if bytes.starts_with(&vitte_core::bytecode::chunk::CHUNK_MAGIC) {
        return Chunk::from_bytes(&bytes)
            .with_context(|| format!("loading chunk {}", path.display()))
            .map_err(|e| {
                eprintln!("error: {e:#}");
                ExitCode::IoError
            });
    }

    let src = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8 assembler source", path.display()))
        .map_err(|e| {
            eprintln!("error: {e:#}");
            ExitCode::IoError
        })?;
    assemble_or_report(&src)
}

fn assemble_or_report(src: &str) -> Result<Chunk, ExitCode> {
    asm::assemble(src).map_err(|e| {
        eprintln!("compile error: {e}");
        ExitCode::CompileError
    })
}

/// Wrap an assembled chunk as the top-level script (arity 0, upvalue
/// count 0, name absent) and run it to completion on a fresh VM.
fn interpret_chunk(chunk: Chunk) -> Result<(), ExitCode> {
    let mut vm = Vm::new();
    interpret_on(&mut vm, chunk)
}

fn interpret_on(vm: &mut Vm, chunk: Chunk) -> Result<(), ExitCode> {
    let script = Rc::new(FunctionProto::new(None, 0, 0, chunk));
    vm.interpret(script).map_err(|_| ExitCode::RuntimeError)
}

fn cmd_run(file: &Path) -> ExitCode {
    match load_chunk(file) {
        Ok(chunk) => match interpret_chunk(chunk) {
            Ok(()) => ExitCode::Ok,
            Err(code) => code,
        },
        Err(code) => code,
    }
}

fn cmd_disasm(file: &Path) -> ExitCode {
    match load_chunk(file) {
        Ok(chunk) => {
            let title = file.file_name().and_then(|s| s.to_str()).unwrap_or("chunk");
            println!("{}", disasm::disassemble_full(&chunk, title));
            ExitCode::Ok
        }
        Err(code) => code,
    }
}

/// Each line is assembled and run against the same `Vm` in turn, so globals
/// defined on one line are visible to the next.
fn cmd_repl() -> ExitCode {
    println!("vitte REPL — one assembler line per prompt, Ctrl+D to quit");
    let mut vm = Vm::new();
    let mut line = String::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::IoError;
        }
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => return ExitCode::Ok,
            Ok(_) => {}
            Err(e) => {
                eprintln!("error: reading stdin: {e}");
                return ExitCode::IoError;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        let chunk = match assemble_or_report(&line) {
            Ok(c) => c,
            Err(_) => continue,
        };
        if let Err(_e) = interpret_on(&mut vm, chunk) {
            // The VM has already printed the canonical runtime-error report
            // already; the REPL itself stays usable for the next line.
            continue;
        }
    }
}
