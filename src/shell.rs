use lunapr_vm::{Exception, Value, VirtualMachine, exceptions::format_exception};
use rustyline::{DefaultEditor, error::ReadlineError};
use std::path::{Path, PathBuf};

const PROMPT: &str = "> ";
const CONTINUE_PROMPT: &str = ">> ";
const CHUNK_NAME: &str = "=stdin";

enum ShellExecResult {
    Ok,
    Err(Exception),
    Continue,
}

/// Evaluate one complete input. A line is first tried as an expression so
/// its values get printed.
fn shell_exec(vm: &VirtualMachine, source: &str) -> ShellExecResult {
    let chunk = match vm.load(&format!("return {source}"), CHUNK_NAME) {
        Ok(chunk) => chunk,
        Err(_) => match vm.load(source, CHUNK_NAME) {
            Ok(chunk) => chunk,
            Err(err) if err.is_incomplete() => return ShellExecResult::Continue,
            Err(err) => return ShellExecResult::Err(vm.new_error(Value::from(err.to_string()))),
        },
    };
    match vm.call(&chunk, Vec::new()) {
        Ok(values) => {
            if !values.is_empty() {
                let line: Vec<String> = values.iter().map(ToString::to_string).collect();
                println!("{}", line.join("\t"));
            }
            ShellExecResult::Ok
        }
        Err(exc) => ShellExecResult::Err(exc),
    }
}

fn history_path() -> PathBuf {
    match dirs::config_dir() {
        Some(mut path) => {
            path.push("lunapr");
            path.push("repl_history.txt");
            path
        }
        None => ".lunapr_history.txt".into(),
    }
}

fn save_history(repl: &mut DefaultEditor, path: &Path) {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    if let Err(err) = repl.save_history(path) {
        warn!("cannot save history to {}: {err}", path.display());
    }
}

pub fn run_shell(vm: &VirtualMachine) {
    if !vm.settings.quiet {
        println!("lunapr {} (threads via apr.thread)", env!("CARGO_PKG_VERSION"));
    }

    let mut repl = match DefaultEditor::new() {
        Ok(repl) => repl,
        Err(err) => {
            eprintln!("Readline error: {err}");
            return;
        }
    };
    let history_path = history_path();
    if repl.load_history(&history_path).is_err() {
        debug!("no previous history at {}", history_path.display());
    }

    let mut full_input = String::new();
    loop {
        let prompt = if full_input.is_empty() {
            PROMPT
        } else {
            CONTINUE_PROMPT
        };
        match repl.readline(prompt) {
            Ok(line) => {
                debug!("You entered {line:?}");
                let _ = repl.add_history_entry(line.trim_end());
                if !full_input.is_empty() {
                    full_input.push('\n');
                }
                full_input.push_str(&line);
                // a leading `=` is shorthand for `return`
                let source = match full_input.strip_prefix('=') {
                    Some(expr) => format!("return {expr}"),
                    None => full_input.clone(),
                };
                match shell_exec(vm, &source) {
                    ShellExecResult::Ok => full_input.clear(),
                    ShellExecResult::Continue => {}
                    ShellExecResult::Err(exc) => {
                        full_input.clear();
                        eprintln!("{}", format_exception(&exc));
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                full_input.clear();
                eprintln!("interrupted");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }
    save_history(&mut repl, &history_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunapr_vm::Interpreter;

    #[test]
    fn test_incomplete_input_continues() {
        Interpreter::default().enter(|vm| {
            assert!(matches!(
                shell_exec(vm, "function f()"),
                ShellExecResult::Continue
            ));
            assert!(matches!(
                shell_exec(vm, "function f()\n  x = 3\nend"),
                ShellExecResult::Ok
            ));
            assert!(matches!(shell_exec(vm, "f() return x"), ShellExecResult::Ok));
            assert_eq!(vm.get_global("x").to_string(), "3");
        })
    }

    #[test]
    fn test_errors_are_reported() {
        Interpreter::default().enter(|vm| {
            match shell_exec(vm, "x = = 1") {
                ShellExecResult::Err(exc) => assert!(exc.message().starts_with("stdin:1:")),
                _ => panic!("expected a syntax error"),
            }
            match shell_exec(vm, "error('oops')") {
                ShellExecResult::Err(exc) => assert_eq!(exc.message(), "stdin:1: oops"),
                _ => panic!("expected a runtime error"),
            }
        })
    }
}
