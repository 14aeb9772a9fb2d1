//! Global functions available without a library prefix.

use super::{package, table};
use crate::{
    VirtualMachine,
    exceptions::ScriptResult,
    function::FuncArgs,
    value::{NativeFn, Value},
};
use itertools::Itertools;
use lunapr_common::str::{parse_int_radix, parse_number};
use std::io::Write;

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("assert", assert),
    ("error", error),
    ("ipairs", ipairs),
    ("load", load),
    ("next", next),
    ("pairs", pairs),
    ("pcall", pcall),
    ("print", print),
    ("rawequal", rawequal),
    ("rawget", rawget),
    ("rawset", rawset),
    ("require", package::require),
    ("select", select),
    ("tonumber", tonumber),
    ("tostring", tostring),
    ("type", type_),
    ("unpack", table::unpack),
];

pub(crate) fn init(vm: &VirtualMachine) {
    super::add_functions(&vm.globals, FUNCTIONS);
    vm.set_global("_G", vm.globals.clone());
    vm.set_global("_VERSION", format!("lunapr {}", env!("CARGO_PKG_VERSION")));
    if !vm.settings.argv.is_empty() {
        let arg = vm.new_table();
        for (index, value) in (0..).zip(&vm.settings.argv) {
            arg.set_int(index, Value::new_str(value));
        }
        vm.set_global("arg", arg);
    }
}

fn print(_vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let line = args.args.iter().join("\t");
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    Ok(Vec::new())
}

fn type_(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = args.check_any(vm, 0)?;
    Ok(vec![Value::from(value.type_name())])
}

fn tostring(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = args.check_any(vm, 0)?;
    Ok(vec![Value::from(value.to_string())])
}

fn tonumber(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    if args.is_none(1) {
        let value = args.check_any(vm, 0)?;
        let number = match &value {
            Value::Integer(_) | Value::Number(_) => value.clone(),
            Value::String(s) => parse_number(s).map_or(Value::Nil, Value::from_parsed),
            _ => Value::Nil,
        };
        return Ok(vec![number]);
    }
    let base = args.check_int(vm, 1)?;
    if !(2..=36).contains(&base) {
        return Err(args.arg_error(vm, 1, "base out of range"));
    }
    let text = match args.get(0) {
        Value::String(s) => s,
        other => {
            return Err(args.arg_error(
                vm,
                0,
                &format!("string expected, got {}", other.type_name()),
            ));
        }
    };
    let number = parse_int_radix(&text, base as u32).map_or(Value::Nil, Value::Integer);
    Ok(vec![number])
}

/// `error(message [, level])`: string messages get the position of the
/// function `level` steps up the stack.
fn error(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = args.get(0);
    let level = args.opt_int(vm, 1, 1)?;
    let value = match (&value, level) {
        (Value::String(msg), level) if level > 0 => {
            match vm.position(level as usize + 1) {
                Some(position) => Value::from(format!("{position} {msg}")),
                None => value,
            }
        }
        _ => value,
    };
    Err(vm.new_error(value))
}

fn assert(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = args.check_any(vm, 0)?;
    if value.is_truthy() {
        return Ok(args.into_vec());
    }
    if args.is_none(1) {
        Err(vm.new_runtime_error("assertion failed!"))
    } else {
        Err(vm.new_error(args.get(1)))
    }
}

fn pcall(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let func = args.check_any(vm, 0)?;
    let mut call_args = args.into_vec();
    call_args.remove(0);
    match vm.call(&func, call_args) {
        Ok(results) => {
            let mut values = Vec::with_capacity(results.len() + 1);
            values.push(Value::Boolean(true));
            values.extend(results);
            Ok(values)
        }
        Err(exc) => Ok(vec![Value::Boolean(false), exc.into_value()]),
    }
}

fn select(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let count = args.len() as i64 - 1;
    if args.get(0).as_str() == Some("#") {
        return Ok(vec![Value::Integer(count)]);
    }
    let n = args.check_int(vm, 0)?;
    let start = if n < 0 { count + n } else { n - 1 };
    if n == 0 || start < 0 {
        return Err(args.arg_error(vm, 0, "index out of range"));
    }
    let mut values = args.into_vec();
    let start = (start as usize + 1).min(values.len());
    Ok(values.split_off(start))
}

fn next(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    match table.next(&args.get(1)) {
        Ok(Some((key, value))) => Ok(vec![key, value]),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(msg) => Err(vm.new_runtime_error(msg)),
    }
}

fn pairs(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    Ok(vec![
        Value::native("next", next),
        Value::Table(table),
        Value::Nil,
    ])
}

fn ipairs_step(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    let index = args.check_int(vm, 1)?.wrapping_add(1);
    let value = table.get_int(index);
    if value.is_nil() {
        Ok(vec![Value::Nil])
    } else {
        Ok(vec![Value::Integer(index), value])
    }
}

fn ipairs(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    Ok(vec![
        Value::native("ipairs_step", ipairs_step),
        Value::Table(table),
        Value::Integer(0),
    ])
}

fn rawequal(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let a = args.check_any(vm, 0)?;
    let b = args.check_any(vm, 1)?;
    Ok(vec![Value::Boolean(a.raw_equals(&b))])
}

fn rawget(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    Ok(vec![table.get(&args.get(1))])
}

fn rawset(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    table
        .set(args.get(1), args.get(2))
        .map_err(|msg| vm.new_runtime_error(msg))?;
    Ok(vec![Value::Table(table)])
}

/// `load(chunk [, chunkname])`: `chunk` is a string or a function returning
/// successive pieces of it.
fn load(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let source = match args.get(0) {
        Value::String(source) => source.to_string(),
        func @ Value::Function(_) => {
            let mut source = String::new();
            loop {
                let piece = vm.call(&func, Vec::new())?;
                match piece.into_iter().next() {
                    Some(Value::String(piece)) if !piece.is_empty() => source.push_str(&piece),
                    Some(Value::Nil) | None => break,
                    Some(Value::String(_)) => break,
                    Some(_) => {
                        return Ok(vec![
                            Value::Nil,
                            Value::new_str("reader function must return a string"),
                        ]);
                    }
                }
            }
            source
        }
        other => {
            return Err(args.arg_error(
                vm,
                0,
                &format!("string expected, got {}", other.type_name()),
            ));
        }
    };
    let chunk_name = match args.opt_str(vm, 1)? {
        Some(name) => name.to_string(),
        None if args.get(0).as_str().is_some() => source.clone(),
        None => "=(load)".to_owned(),
    };
    match vm.load(&source, &chunk_name) {
        Ok(func) => Ok(vec![func]),
        Err(err) => Ok(vec![Value::Nil, Value::from(err.to_string())]),
    }
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, value::Value};

    fn eval(source: &str) -> Vec<String> {
        Interpreter::default().enter(|vm| {
            vm.run_source(source, "=test")
                .unwrap()
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }

    #[test]
    fn test_pcall_and_error_levels() {
        assert_eq!(
            eval(
                "local function f() error('boom') end
                 local function g() error('bare', 0) end
                 local function h() error({}) end
                 local _, a = pcall(f)
                 local _, b = pcall(g)
                 local ok, c = pcall(h)
                 return a, b, ok, type(c)"
            ),
            ["test:1: boom", "bare", "false", "table"]
        );
    }

    #[test]
    fn test_error_level_two_blames_caller() {
        assert_eq!(
            eval(
                "local function check(x) if not x then error('bad input', 2) end end
                 local function caller()
                   check(false)
                 end
                 local _, msg = pcall(caller)
                 return msg"
            ),
            ["test:3: bad input"]
        );
    }

    #[test]
    fn test_select_and_tonumber() {
        assert_eq!(
            eval(
                "return select('#', 1, nil, 3), select(2, 'a', 'b', 'c'), select(-1, 'x', 'y'),
                        tonumber('0x1F'), tonumber('z', 36), tonumber('12', 2), tonumber(' 2.5 ')"
            ),
            ["3", "b", "y", "31", "35", "nil", "2.5"]
        );
    }

    #[test]
    fn test_load_with_reader() {
        assert_eq!(
            eval(
                "local parts = {'return ', '1 + ', '2'}
                 local i = 0
                 local f = load(function() i = i + 1 return parts[i] end)
                 local g, err = load('return +', '=chunk')
                 return f(), g, err:sub(1, 8)"
            ),
            ["3", "nil", "chunk:1:"]
        );
    }

    #[test]
    fn test_assert_passes_values_through() {
        Interpreter::default().enter(|vm| {
            let res = vm.run_source("return assert(1, 'unused')", "=test").unwrap();
            assert!(res[0].raw_equals(&Value::Integer(1)));
            assert_eq!(res[1].as_str(), Some("unused"));
            let exc = vm.run_source("assert(false)", "=test").unwrap_err();
            assert_eq!(exc.message(), "test:1: assertion failed!");
            let exc = vm.run_source("assert(nil, 'custom')", "=test").unwrap_err();
            assert_eq!(exc.message(), "custom");
        });
    }
}
