// File: src/main.rs
//
// Command-line entry point for the Lox interpreter. Dispatches to script
// execution, the REPL, or the expect-comment script harness. Exit codes: 0
// on success, 65 for compile errors, 70 for runtime errors, 74 when the
// source file cannot be read.

use clap::{Parser as ClapParser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use lox::repl::Repl;
use lox::test_runner;
use lox::vm::VM;

#[derive(ClapParser)]
#[command(
    name = "lox",
    about = "Lox: a bytecode interpreter for a small class-based scripting language",
    version = env!("CARGO_PKG_VERSION"),
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Script to execute (shorthand for `lox run <SCRIPT>`)
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lox script file
    Run {
        /// Path to the .lox file
        file: PathBuf,
    },

    /// Launch the interactive REPL
    Repl,

    /// Run the `// expect:` script corpus
    Test {
        /// Directory of .lox scripts (default: tests/scripts)
        dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match (cli.command, cli.script) {
        (Some(Commands::Run { file }), _) | (None, Some(file)) => run_file(&file),
        (Some(Commands::Repl), _) | (None, None) => run_repl(),
        (Some(Commands::Test { dir }), _) => {
            let dir = dir.unwrap_or_else(|| PathBuf::from("tests/scripts"));
            std::process::exit(test_runner::run_all(&dir));
        }
    }
}

fn run_file(path: &Path) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("could not read {}: {}", path.display(), error);
            std::process::exit(74);
        }
    };

    let mut vm = VM::new();
    if let Err(error) = vm.interpret(&source) {
        eprintln!("{}", error);
        std::process::exit(error.exit_code());
    }
}

fn run_repl() {
    match Repl::new() {
        Ok(mut repl) => {
            if let Err(error) = repl.run() {
                eprintln!("repl error: {}", error);
                std::process::exit(1);
            }
        }
        Err(error) => {
            eprintln!("failed to start repl: {}", error);
            std::process::exit(1);
        }
    }
}
