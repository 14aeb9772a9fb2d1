//! The `os` library.

use crate::{
    VirtualMachine,
    exceptions::ScriptResult,
    function::FuncArgs,
    value::{NativeFn, TableRef, Value},
};
use lunapr_common::lock::LazyLock;
use std::{
    io,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("clock", clock),
    ("getenv", getenv),
    ("remove", remove),
    ("rename", rename),
    ("time", time),
];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    LazyLock::force(&PROCESS_START);
    super::new_module(vm, FUNCTIONS)
}

/// `nil, message, code` for a failed file system call.
pub(super) fn io_result(filename: Option<&str>, err: &io::Error) -> Vec<Value> {
    let message = match filename {
        Some(filename) => format!("{filename}: {err}"),
        None => err.to_string(),
    };
    let code = err.raw_os_error().map_or(Value::Nil, |code| Value::Integer(code.into()));
    vec![Value::Nil, Value::from(message), code]
}

fn time(_vm: &VirtualMachine, _args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64);
    Ok(vec![Value::Integer(seconds)])
}

/// Seconds since the process started, as a float.
fn clock(_vm: &VirtualMachine, _args: FuncArgs) -> ScriptResult<Vec<Value>> {
    Ok(vec![Value::Number(PROCESS_START.elapsed().as_secs_f64())])
}

fn getenv(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let name = args.check_str(vm, 0)?;
    let value = std::env::var_os(&*name)
        .map_or(Value::Nil, |value| Value::from(value.to_string_lossy().into_owned()));
    Ok(vec![value])
}

fn remove(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let path = args.check_str(vm, 0)?;
    let result = match std::fs::metadata(&*path) {
        Ok(metadata) if metadata.is_dir() => std::fs::remove_dir(&*path),
        _ => std::fs::remove_file(&*path),
    };
    Ok(match result {
        Ok(()) => vec![Value::Boolean(true)],
        Err(err) => io_result(Some(&*path), &err),
    })
}

fn rename(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let from = args.check_str(vm, 0)?;
    let to = args.check_str(vm, 1)?;
    Ok(match std::fs::rename(&*from, &*to) {
        Ok(()) => vec![Value::Boolean(true)],
        Err(err) => io_result(Some(&*from), &err),
    })
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, value::Value};

    #[test]
    fn test_remove_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.txt");
        std::fs::write(&path, "x").unwrap();
        Interpreter::default().enter(|vm| {
            vm.set_global("path", path.to_string_lossy().into_owned());
            let res = vm
                .run_source(
                    "local ok = os.remove(path)
                     local again, msg, code = os.remove(path)
                     return ok, again, msg, code",
                    "=test",
                )
                .unwrap();
            assert!(res[0].raw_equals(&Value::Boolean(true)));
            assert!(res[1].is_nil());
            assert!(res[2].as_str().unwrap().starts_with(&*path.to_string_lossy()));
            assert!(matches!(res[3], Value::Integer(_)));
        });
        assert!(!path.exists());
    }

    #[test]
    fn test_time_and_clock() {
        Interpreter::default().enter(|vm| {
            let res = vm
                .run_source(
                    "return math.type(os.time()), math.type(os.clock()), os.time() > 0,
                            os.getenv('LUNAPR_SURELY_UNSET_VARIABLE')",
                    "=test",
                )
                .unwrap();
            let res: Vec<String> = res.iter().map(ToString::to_string).collect();
            assert_eq!(res, ["integer", "float", "true", "nil"]);
        });
    }
}
