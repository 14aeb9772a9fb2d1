use super::VirtualMachine;
use crate::{
    exceptions::ScriptResult,
    value::{Closure, Function, Value},
};
use lunapr_compiler::CompileError;
use std::rc::Rc;

impl VirtualMachine {
    /// Compile a chunk into a function value taking its arguments as `...`.
    pub fn load(&self, source: &str, source_path: &str) -> Result<Value, CompileError> {
        let proto = lunapr_compiler::compile(source, source_path)?;
        let closure = Closure {
            proto,
            upvalues: Vec::new(),
        };
        Ok(Value::Function(Function::Closure(Rc::new(closure))))
    }

    /// [`Self::load`], with compile errors raised as script errors.
    pub fn compile(&self, source: &str, source_path: &str) -> ScriptResult<Value> {
        self.load(source, source_path)
            .map_err(|err| self.new_error(Value::from(err.to_string())))
    }

    pub fn run_source(&self, source: &str, source_path: &str) -> ScriptResult<Vec<Value>> {
        self.run_chunk(source, source_path, Vec::new())
    }

    pub fn run_chunk(
        &self,
        source: &str,
        source_path: &str,
        args: Vec<Value>,
    ) -> ScriptResult<Vec<Value>> {
        let chunk = self.compile(source, source_path)?;
        self.call(&chunk, args)
    }

    /// Run a script file; its chunk name is `@path`.
    pub fn run_file(&self, path: &str, args: Vec<Value>) -> ScriptResult<Vec<Value>> {
        debug!("running file {path}");
        let source = std::fs::read_to_string(path)
            .map_err(|err| self.new_error(Value::from(format!("cannot open {path}: {err}"))))?;
        self.run_chunk(&source, &format!("@{path}"), args)
    }
}
