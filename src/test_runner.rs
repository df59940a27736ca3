// File: src/test_runner.rs
//
// The `// expect:` script harness behind `lox test`. Each *.lox file under
// the corpus directory records its expected output inline:
//
//     print 1 + 2; // expect: 3
//
// The harness runs every script as a subprocess of the current executable,
// captures combined stdout+stderr, and checks that each expectation is a
// prefix of the corresponding output line, in order.

use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::vm::VM;

const EXPECT_MARKER: &str = "// expect: ";

/// Pulls the expectation lines out of a script, in source order.
pub fn parse_expectations(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.find(EXPECT_MARKER).map(|at| line[at + EXPECT_MARKER.len()..].to_string()))
        .collect()
}

/// A script passes when output and expectations agree line by line, each
/// expectation matching as a prefix.
pub fn check_output(output: &str, expectations: &[String]) -> Result<(), String> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() != expectations.len() {
        return Err(format!(
            "expected {} output lines, got {}:\n{}",
            expectations.len(),
            lines.len(),
            output.trim_end()
        ));
    }

    for (index, (line, expectation)) in lines.iter().zip(expectations).enumerate() {
        if !line.starts_with(expectation.as_str()) {
            return Err(format!(
                "line {}: expected '{}', got '{}'",
                index + 1,
                expectation,
                line
            ));
        }
    }

    Ok(())
}

/// Runs a source string in-process with captured print output. Errors are
/// appended the way the CLI prints them to stderr, minus styling, so the
/// result matches what a subprocess run produces through a pipe.
pub fn run_source_captured(source: &str) -> String {
    colored::control::set_override(false);

    let mut vm = VM::new();
    let buffer = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(buffer.clone());
    let result = vm.interpret(source);

    let mut output = String::from_utf8_lossy(&buffer.lock().unwrap()).to_string();
    if let Err(error) = result {
        output.push_str(&format!("{}\n", error));
    }
    output
}

/// Runs the whole corpus; returns a process exit code (0 = all passed).
pub fn run_all(dir: &Path) -> i32 {
    let scripts = discover(dir);
    if scripts.is_empty() {
        eprintln!("no .lox scripts found under {}", dir.display());
        return 1;
    }

    let mut passed = 0;
    for path in &scripts {
        let source = fs::read_to_string(path).unwrap_or_default();
        let expectations = parse_expectations(&source);

        let start = Instant::now();
        let outcome = run_script_subprocess(path)
            .and_then(|output| check_output(&output, &expectations));

        match outcome {
            Ok(()) => {
                println!("[{}] {} ({:.2?})", "✓".green(), path.display(), start.elapsed());
                passed += 1;
            }
            Err(reason) => {
                println!("[{}] {}", "✗".red(), path.display());
                println!("    {}", reason);
            }
        }
    }

    println!();
    println!("Passed {}/{} scripts", passed, scripts.len());
    if passed == scripts.len() {
        0
    } else {
        1
    }
}

fn discover(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut scripts: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|e| e == "lox").unwrap_or(false))
        .collect();
    scripts.sort();
    scripts
}

fn run_script_subprocess(path: &Path) -> Result<String, String> {
    let exe = std::env::current_exe().map_err(|e| e.to_string())?;
    let output = Command::new(exe)
        .arg("run")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run interpreter: {}", e))?;

    // One combined stream, the way a pipe-sharing child would produce it;
    // an error, if any, ends the run, so stderr text follows all of stdout.
    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expectations_are_collected_in_order() {
        let source = "print 1; // expect: 1\nprint 2;\nprint 3; // expect: 3\n";
        assert_eq!(parse_expectations(source), vec!["1".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_check_matches_prefixes_line_by_line() {
        let expectations = vec!["1".to_string(), "foo".to_string()];
        assert!(check_output("1\nfoobar\n", &expectations).is_ok());
        assert!(check_output("1\nbar\n", &expectations).is_err());
        assert!(check_output("1\n", &expectations).is_err());
        assert!(check_output("1\nfoo\n2\n", &expectations).is_err());
    }

    #[test]
    fn test_captured_run_includes_runtime_errors() {
        let output = run_source_captured("print 1;\nprint nil + 2;");
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "1");
        assert_eq!(lines[1], "operands must be two numbers or two strings");
        assert_eq!(lines[2], "[line 2] in script");
    }

    #[test]
    fn test_captured_run_includes_compile_errors() {
        let output = run_source_captured("var 1 = 2;");
        assert!(output.contains("error at '1'"));
    }
}
