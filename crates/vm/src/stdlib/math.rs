//! The `math` library.

use crate::{
    VirtualMachine,
    exceptions::ScriptResult,
    function::FuncArgs,
    value::{NativeFn, TableRef, Value},
};
use lunapr_common::float_ops;

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("abs", abs),
    ("ceil", ceil),
    ("cos", cos),
    ("exp", exp),
    ("floor", floor),
    ("fmod", fmod),
    ("log", log),
    ("max", max),
    ("min", min),
    ("sin", sin),
    ("sqrt", sqrt),
    ("tan", tan),
    ("tointeger", tointeger),
    ("type", type_),
];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    let module = super::new_module(vm, FUNCTIONS);
    module.set_str("pi", Value::Number(std::f64::consts::PI));
    module.set_str("huge", Value::Number(f64::INFINITY));
    module.set_str("maxinteger", Value::Integer(i64::MAX));
    module.set_str("mininteger", Value::Integer(i64::MIN));
    module
}

/// An integer when the float has an exact integer value.
fn float_to_value(value: f64) -> Value {
    float_ops::to_integer(value).map_or(Value::Number(value), Value::Integer)
}

fn floor(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = match args.check_number(vm, 0)? {
        Value::Number(n) => float_to_value(n.floor()),
        integer => integer,
    };
    Ok(vec![value])
}

fn ceil(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = match args.check_number(vm, 0)? {
        Value::Number(n) => float_to_value(n.ceil()),
        integer => integer,
    };
    Ok(vec![value])
}

fn abs(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = match args.check_number(vm, 0)? {
        Value::Integer(i) => Value::Integer(i.wrapping_abs()),
        Value::Number(n) => Value::Number(n.abs()),
        other => other,
    };
    Ok(vec![value])
}

/// Shared body of `max` and `min`: keeps the first argument for which
/// `replace(best, candidate)` never holds.
fn extreme(
    vm: &VirtualMachine,
    args: &FuncArgs,
    replace: fn(&VirtualMachine, &Value, &Value) -> ScriptResult<bool>,
) -> ScriptResult<Vec<Value>> {
    let mut best = args.check_number(vm, 0)?;
    for i in 1..args.len() {
        let candidate = args.check_number(vm, i)?;
        if replace(vm, &best, &candidate)? {
            best = candidate;
        }
    }
    Ok(vec![best])
}

fn max(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    extreme(vm, &args, |vm, best, candidate| {
        vm.less_than(best, candidate).map_err(|err| vm.op_error(err))
    })
}

fn min(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    extreme(vm, &args, |vm, best, candidate| {
        vm.less_than(candidate, best).map_err(|err| vm.op_error(err))
    })
}

fn sqrt(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    Ok(vec![Value::Number(args.check_f64(vm, 0)?.sqrt())])
}

fn exp(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    Ok(vec![Value::Number(args.check_f64(vm, 0)?.exp())])
}

fn sin(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    Ok(vec![Value::Number(args.check_f64(vm, 0)?.sin())])
}

fn cos(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    Ok(vec![Value::Number(args.check_f64(vm, 0)?.cos())])
}

fn tan(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    Ok(vec![Value::Number(args.check_f64(vm, 0)?.tan())])
}

fn log(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let x = args.check_f64(vm, 0)?;
    let value = if args.is_none(1) {
        x.ln()
    } else {
        let base = args.check_f64(vm, 1)?;
        if base == 2.0 {
            x.log2()
        } else if base == 10.0 {
            x.log10()
        } else {
            x.ln() / base.ln()
        }
    };
    Ok(vec![Value::Number(value)])
}

fn fmod(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = match (args.check_number(vm, 0)?, args.check_number(vm, 1)?) {
        (Value::Integer(_), Value::Integer(0)) => {
            return Err(args.arg_error(vm, 1, "zero"));
        }
        (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.wrapping_rem(b)),
        (a, b) => {
            let (a, b) = (a.to_f64().unwrap_or(f64::NAN), b.to_f64().unwrap_or(f64::NAN));
            Value::Number(a % b)
        }
    };
    Ok(vec![value])
}

fn tointeger(_vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = match args.get(0) {
        integer @ Value::Integer(_) => integer,
        Value::Number(n) => float_ops::to_integer(n).map_or(Value::Nil, Value::Integer),
        _ => Value::Nil,
    };
    Ok(vec![value])
}

fn type_(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let value = match args.check_any(vm, 0)? {
        Value::Integer(_) => Value::new_str("integer"),
        Value::Number(_) => Value::new_str("float"),
        _ => Value::Nil,
    };
    Ok(vec![value])
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
    fn test_rounding_keeps_integers() {
        assert_eq!(
            eval(
                "return math.floor(3.7), math.ceil(3.2), math.floor(-0.5), math.floor(1e100),
                        math.abs(-4), math.type(1), math.type(1.0), math.type('1'),
                        math.tointeger(3.0), math.tointeger(3.5)"
            ),
            ["3", "4", "-1", "1e+100", "4", "integer", "float", "nil", "3", "nil"]
        );
    }

    #[test]
    fn test_min_max_and_constants() {
        assert_eq!(
            eval(
                "return math.max(3, 7.5, 2), math.min(3, -1, 2), math.maxinteger,
                        math.huge > math.maxinteger, math.sqrt(16), math.fmod(7, 3), math.fmod(-7, 3)"
            ),
            ["7.5", "-1", "9223372036854775807", "true", "4.0", "1", "-1"]
        );
    }
}
