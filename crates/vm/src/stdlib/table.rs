//! The `table` library.

use crate::{
    VirtualMachine,
    exceptions::ScriptResult,
    function::FuncArgs,
    value::{NativeFn, TableRef, Value},
};

/// Most values `unpack` returns at once.
const MAX_UNPACK: i64 = 1 << 20;

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("concat", concat),
    ("insert", insert),
    ("remove", remove),
    ("sort", sort),
    ("unpack", unpack),
];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    super::new_module(vm, FUNCTIONS)
}

fn insert(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    let end = table.len() + 1;
    match args.len() {
        2 => table.set_int(end, args.get(1)),
        3 => {
            let pos = args.check_int(vm, 1)?;
            if !(1..=end).contains(&pos) {
                return Err(args.arg_error(vm, 1, "position out of bounds"));
            }
            for i in (pos + 1..=end).rev() {
                table.set_int(i, table.get_int(i - 1));
            }
            table.set_int(pos, args.get(2));
        }
        _ => return Err(vm.new_runtime_error("wrong number of arguments to 'insert'")),
    }
    Ok(Vec::new())
}

fn remove(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    let size = table.len();
    let pos = args.opt_int(vm, 1, size)?;
    if !args.is_none(1) && pos != size && !(1..=size + 1).contains(&pos) {
        return Err(args.arg_error(vm, 1, "position out of bounds"));
    }
    let removed = table.get_int(pos);
    for i in pos..size {
        table.set_int(i, table.get_int(i + 1));
    }
    if pos <= size {
        table.set_int(size, Value::Nil);
    }
    Ok(vec![removed])
}

fn concat(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    let sep = args.opt_str(vm, 1)?;
    let start = args.opt_int(vm, 2, 1)?;
    let end = if args.is_none(3) {
        table.len()
    } else {
        args.check_int(vm, 3)?
    };
    let mut out = String::new();
    for i in start..=end {
        let item = table.get_int(i);
        let text = match &item {
            Value::String(_) | Value::Integer(_) | Value::Number(_) => item.to_string(),
            other => {
                return Err(vm.new_runtime_error(format!(
                    "invalid value (at index {i}) in table for 'concat' ({} found)",
                    other.type_name()
                )));
            }
        };
        out.push_str(&text);
        if i < end {
            if let Some(sep) = &sep {
                out.push_str(sep);
            }
        }
    }
    Ok(vec![Value::from(out)])
}

pub(crate) fn unpack(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    let start = args.opt_int(vm, 1, 1)?;
    let end = if args.is_none(2) {
        table.len()
    } else {
        args.check_int(vm, 2)?
    };
    if start > end {
        return Ok(Vec::new());
    }
    if end.saturating_sub(start) >= MAX_UNPACK {
        return Err(vm.new_runtime_error("too many results to unpack"));
    }
    Ok((start..=end).map(|i| table.get_int(i)).collect())
}

/// Stable merge sort driven by a comparison that may fail.
fn merge_sort<F>(mut values: Vec<Value>, less: &mut F) -> ScriptResult<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> ScriptResult<bool>,
{
    if values.len() <= 1 {
        return Ok(values);
    }
    let right = values.split_off(values.len() / 2);
    let left = merge_sort(values, less)?;
    let right = merge_sort(right, less)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => less(b, a)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn sort(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let table = args.check_table(vm, 0)?;
    let comparator = args.get(1);
    if !matches!(comparator, Value::Nil | Value::Function(_)) {
        return Err(args.arg_error(
            vm,
            1,
            &format!("function expected, got {}", comparator.type_name()),
        ));
    }
    let len = table.len();
    let values: Vec<Value> = (1..=len).map(|i| table.get_int(i)).collect();
    let sorted = merge_sort(values, &mut |a, b| {
        if comparator.is_nil() {
            vm.less_than(a, b).map_err(|err| vm.op_error(err))
        } else {
            let result = vm.call(&comparator, vec![a.clone(), b.clone()])?;
            Ok(result.first().is_some_and(Value::is_truthy))
        }
    })?;
    for (i, value) in (1..).zip(sorted) {
        table.set_int(i, value);
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use crate::Interpreter;

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
    fn test_insert_remove() {
        assert_eq!(
            eval(
                "local t = {1, 2, 3}
                 table.insert(t, 4)
                 table.insert(t, 1, 0)
                 local last = table.remove(t)
                 local first = table.remove(t, 1)
                 return table.concat(t, ','), last, first, #t"
            ),
            ["1,2,3", "4", "0", "3"]
        );
    }

    #[test]
    fn test_sort() {
        assert_eq!(
            eval(
                "local a = {5, 2, 8, 1, 9}
                 table.sort(a)
                 local b = {'pear', 'fig', 'apple'}
                 table.sort(b, function(x, y) return #x < #y end)
                 return table.concat(a, ' '), table.concat(b, ' ')"
            ),
            ["1 2 5 8 9", "fig pear apple"]
        );
    }

    #[test]
    fn test_sort_errors() {
        Interpreter::default().enter(|vm| {
            let exc = vm
                .run_source("table.sort({1, 'x', 2})", "=test")
                .unwrap_err();
            assert!(exc.message().contains("attempt to compare"), "{}", exc.message());
            let exc = vm
                .run_source("table.sort({2, 1}, function() error('cmp') end)", "=test")
                .unwrap_err();
            assert_eq!(exc.message(), "test:1: cmp");
        });
    }

    #[test]
    fn test_unpack_and_concat_errors() {
        assert_eq!(
            eval("return table.unpack({1, 2, 3}, 2)"),
            ["2", "3"]
        );
        Interpreter::default().enter(|vm| {
            let exc = vm
                .run_source("return table.concat({1, {}, 3})", "=test")
                .unwrap_err();
            assert_eq!(
                exc.message(),
                "test:1: invalid value (at index 2) in table for 'concat' (table found)"
            );
        });
    }
}
