use crate::{
    VirtualMachine,
    exceptions::{Exception, ScriptResult},
    value::{TableRef, UserData, Value},
};
use std::rc::Rc;

/// Positional arguments passed to a native function, along with the name
/// the function was registered under for use in argument errors.
#[derive(Default, Clone)]
pub struct FuncArgs {
    pub args: Vec<Value>,
    name: &'static str,
}

impl FuncArgs {
    pub fn new(args: Vec<Value>, name: &'static str) -> Self {
        Self { args, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument `index` (0-based), nil when absent.
    pub fn get(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn is_none(&self, index: usize) -> bool {
        self.args.get(index).is_none_or(Value::is_nil)
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.args
    }

    /// `bad argument #n to 'name' (msg)`, numbered from 1 like scripts see it.
    pub fn arg_error(&self, vm: &VirtualMachine, index: usize, msg: &str) -> Exception {
        vm.new_runtime_error(format!(
            "bad argument #{} to '{}' ({msg})",
            index + 1,
            self.name
        ))
    }

    fn type_error(&self, vm: &VirtualMachine, index: usize, expected: &str) -> Exception {
        let got = match self.args.get(index) {
            Some(value) => value.type_name(),
            None => "no value",
        };
        self.arg_error(vm, index, &format!("{expected} expected, got {got}"))
    }

    pub fn check_any(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<Value> {
        self.args
            .get(index)
            .cloned()
            .ok_or_else(|| self.arg_error(vm, index, "value expected"))
    }

    pub fn check_table(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<TableRef> {
        match self.args.get(index) {
            Some(Value::Table(table)) => Ok(table.clone()),
            _ => Err(self.type_error(vm, index, "table")),
        }
    }

    pub fn check_str(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<Rc<str>> {
        self.args
            .get(index)
            .and_then(Value::to_str_coerced)
            .ok_or_else(|| self.type_error(vm, index, "string"))
    }

    pub fn opt_str(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<Option<Rc<str>>> {
        if self.is_none(index) {
            Ok(None)
        } else {
            self.check_str(vm, index).map(Some)
        }
    }

    /// An integer or float argument; numeric strings are converted.
    pub fn check_number(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<Value> {
        self.args
            .get(index)
            .and_then(Value::to_number)
            .ok_or_else(|| self.type_error(vm, index, "number"))
    }

    pub fn check_f64(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<f64> {
        self.args
            .get(index)
            .and_then(Value::to_f64)
            .ok_or_else(|| self.type_error(vm, index, "number"))
    }

    pub fn check_int(&self, vm: &VirtualMachine, index: usize) -> ScriptResult<i64> {
        let number = self.check_number(vm, index)?;
        number
            .to_integer()
            .ok_or_else(|| self.arg_error(vm, index, "number has no integer representation"))
    }

    pub fn opt_int(&self, vm: &VirtualMachine, index: usize, default: i64) -> ScriptResult<i64> {
        if self.is_none(index) {
            Ok(default)
        } else {
            self.check_int(vm, index)
        }
    }

    /// The native object behind argument `index`, which must be a `T`.
    pub fn check_userdata<T: UserData>(
        &self,
        vm: &VirtualMachine,
        index: usize,
        type_name: &str,
    ) -> ScriptResult<&T> {
        self.args
            .get(index)
            .and_then(Value::downcast_userdata::<T>)
            .ok_or_else(|| self.type_error(vm, index, type_name))
    }
}
