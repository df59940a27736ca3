// File: src/repl.rs
//
// Interactive session for the Lox interpreter. One VM instance persists
// across inputs, so globals, classes, and closures defined earlier stay
// usable. Input with unbalanced delimiters keeps buffering until it parses
// as a complete form.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::vm::VM;

pub struct Repl {
    vm: VM,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: VM::new(), editor })
    }

    fn show_banner(&self) {
        println!(
            "{}",
            format!("Lox {} - interactive session", env!("CARGO_PKG_VERSION")).bright_cyan()
        );
        println!("  {} {} for commands, {} to leave", "Tip:".bright_magenta(), ":help", ":quit");
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                "lox> ".bright_green().to_string()
            } else {
                "...> ".bright_blue().to_string()
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim_start().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            continue;
                        }
                        break;
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.eval(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{} {}", "error:".bright_red(), err);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handles `:commands`; false means quit.
    fn handle_command(&mut self, command: &str) -> bool {
        match command {
            ":help" | ":h" => {
                self.show_help();
                true
            }
            ":quit" | ":q" | ":exit" => false,
            _ => {
                println!("unknown command '{}', try :help", command);
                true
            }
        }
    }

    fn show_help(&self) {
        println!("  :help   show this message");
        println!("  :quit   leave the session");
        println!();
        println!("  Statements run as entered; unbalanced braces keep reading.");
    }

    fn eval(&mut self, source: &str) {
        if let Err(error) = self.vm.interpret(source) {
            eprintln!("{}", error);
        }
    }
}

/// Complete input has balanced parentheses, braces, and string quotes.
/// Comments are skipped so delimiters inside them don't count.
fn is_input_complete(source: &str) -> bool {
    let mut parens = 0i32;
    let mut braces = 0i32;
    let mut in_string = false;

    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if c == b'"' {
                in_string = false;
            }
        } else {
            match c {
                b'"' => in_string = true,
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
                b'(' => parens += 1,
                b')' => parens -= 1,
                b'{' => braces += 1,
                b'}' => braces -= 1,
                _ => {}
            }
        }
        i += 1;
    }

    parens <= 0 && braces <= 0 && !in_string
}
