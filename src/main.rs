// File: src/main.rs
//
// Entry point: reads a single Lox source file, runs it through
// lex -> parse -> compile -> execute, and maps failures at each stage to
// the process exit code a shell script driving this binary expects
// (spec.md §6 "Command-line interface").

mod ast;
mod chunk;
mod compiler;
mod errors;
mod heap;
mod lexer;
mod object;
mod parser;
mod value;
mod vm;

use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use errors::LoxError;

#[derive(ClapParser)]
#[command(name = "lox", about = "Lox: tree-walk-to-bytecode compiler and stack VM", version)]
struct Cli {
    /// Path to the .lox script to run
    file: PathBuf,
}

const EXIT_OK: u8 = 0;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: could not open '{}': {}", cli.file.display(), e);
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    let (tokens, lex_errors) = lexer::tokenize(&source);
    if !lex_errors.is_empty() {
        for e in &lex_errors {
            eprintln!("Syntax Error: {} (line {})", e.message, e.line);
        }
        return ExitCode::from(EXIT_COMPILE_ERROR);
    }

    let (statements, parse_errors) = parser::Parser::new(tokens).parse();
    if !parse_errors.is_empty() {
        report_errors(&parse_errors);
        return ExitCode::from(EXIT_COMPILE_ERROR);
    }

    let mut vm = vm::VM::new();
    let script = match compiler::Compiler::compile(&statements, vm.heap_mut()) {
        Ok(script) => script,
        Err(errs) => {
            report_errors(&errs);
            return ExitCode::from(EXIT_COMPILE_ERROR);
        }
    };

    match vm.interpret(script) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn report_errors(errors: &[LoxError]) {
    for e in errors {
        eprintln!("{}", e);
    }
}
