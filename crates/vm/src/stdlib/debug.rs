//! The `debug` library.

use crate::{
    VirtualMachine,
    exceptions::{ScriptResult, write_traceback},
    function::FuncArgs,
    value::{NativeFn, TableRef, Value},
};

const FUNCTIONS: &[(&str, NativeFn)] = &[("traceback", traceback)];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    super::new_module(vm, FUNCTIONS)
}

/// `traceback([message [, level]])`: the call stack starting `level` frames
/// up, 1 being the caller.
fn traceback(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let message = args.get(0);
    if !matches!(message, Value::Nil | Value::String(_) | Value::Integer(_) | Value::Number(_)) {
        return Ok(vec![message]);
    }
    let level = args.opt_int(vm, 1, 1)?.max(0) as usize;
    let entries: Vec<_> = vm.traceback().into_iter().skip(level).collect();
    let mut output = String::new();
    if !message.is_nil() {
        output.push_str(&message.to_string());
        output.push('\n');
    }
    // Writing into a String cannot fail.
    let _ = write_traceback(&mut output, &entries);
    Ok(vec![Value::from(output)])
}
