use super::{VirtualMachine, setting::Settings};
use crate::exceptions::{Exception, ScriptResult, format_exception};
use std::io::Write;

/// The general interface for the VM
///
/// # Examples
/// Runs a simple embedded hello world program.
/// ```
/// use lunapr_vm::Interpreter;
/// Interpreter::new(Default::default()).enter(|vm| {
///     vm.run_source(r#"print("Hello World!")"#, "=embedded").unwrap();
/// });
/// ```
pub struct Interpreter {
    vm: VirtualMachine,
}

impl Interpreter {
    /// An interpreter with the standard library loaded.
    pub fn new(settings: Settings) -> Self {
        Self::with_init(settings, |_| {})
    }

    /// Create with initialize function taking mutable vm reference.
    /// ```
    /// use lunapr_vm::{Interpreter, value::Value};
    /// Interpreter::with_init(Default::default(), |vm| {
    ///     vm.set_global("answer", Value::Integer(42));
    /// }).enter(|vm| {
    ///     vm.run_source("assert(answer == 42)", "=embedded").unwrap();
    /// });
    /// ```
    pub fn with_init<F>(settings: Settings, init: F) -> Self
    where
        F: FnOnce(&mut VirtualMachine),
    {
        let mut vm = VirtualMachine::new(settings);
        init(&mut vm);
        Self { vm }
    }

    /// Run a function with the virtual machine and return its result.
    ///
    /// `enter` is lightweight, so an interpreter can be entered any number of
    /// times before it is finalized or dropped.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&VirtualMachine) -> R,
    {
        f(&self.vm)
    }

    /// Run a function with the virtual machine, finalize it and return an
    /// exit code. An escaping error is printed to stderr with its traceback.
    pub fn run<F>(self, f: F) -> u8
    where
        F: FnOnce(&VirtualMachine) -> ScriptResult<()>,
    {
        let res = self.enter(|vm| f(vm));
        self.finalize(res.err())
    }

    /// Finalize vm and turn an error into an exit code.
    ///
    /// Finalization steps:
    /// 1. Report the error, if any.
    /// 1. Flush stdout.
    /// 1. Release every table and captured variable, which runs the
    ///    finalizers of native objects such as unjoined threads.
    pub fn finalize(self, exc: Option<Exception>) -> u8 {
        let exit_code = match exc {
            Some(exc) => {
                eprintln!("lunapr: {}", format_exception(&exc));
                1
            }
            None => 0,
        };
        let _ = std::io::stdout().flush();
        drop(self);
        exit_code
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.vm.teardown();
    }
}
