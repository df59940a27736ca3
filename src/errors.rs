// File: src/errors.rs
//
// Error types for the two reportable failure classes: compile errors
// (collected by the parser, exit code 65) and runtime errors (carrying a
// call-stack traceback, exit code 70). Rendering matches the interpreter's
// wire format exactly; `colored` styles the headline and steps aside on
// non-TTY output so harnesses diff plain text.

use colored::Colorize;
use std::fmt;

/// Where a compile error points: a lexeme, end of input, or nowhere (scanner
/// error tokens already carry their own message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    Lexeme(String),
    Eof,
    None,
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub location: ErrorLocation,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = "error".red().bold();
        match &self.location {
            ErrorLocation::Lexeme(lexeme) => {
                write!(f, "[line {}] {} at '{}': {}", self.line, head, lexeme, self.message)
            }
            ErrorLocation::Eof => {
                write!(f, "[line {}] {} at end: {}", self.line, head, self.message)
            }
            ErrorLocation::None => write!(f, "[line {}] {}: {}", self.line, head, self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// One line of a runtime traceback, innermost call first.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// Function name, or None for the top-level script.
    pub function: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message.red().bold())?;
        for frame in &self.trace {
            match &frame.function {
                Some(name) => write!(f, "\n[line {}] in {}()", frame.line, name)?,
                None => write!(f, "\n[line {}] in script", frame.line)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Outcome of `interpret` when a program fails.
#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime(RuntimeError),
}

impl InterpretError {
    /// Process exit code convention: 65 for malformed programs, 70 for
    /// failures while running them.
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                let mut first = true;
                for error in errors {
                    if !first {
                        writeln!(f)?;
                    }
                    write!(f, "{}", error)?;
                    first = false;
                }
                Ok(())
            }
            InterpretError::Runtime(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for InterpretError {}
