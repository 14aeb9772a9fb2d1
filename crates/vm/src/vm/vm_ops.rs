use super::VirtualMachine;
use crate::value::{Function, Value};
use lunapr_common::float_ops;
use lunapr_compiler::ast::BinOp;
use std::{cmp::Ordering, rc::Rc};

/// A failed primitive operation. The evaluator turns it into an error
/// message, naming the offending variable when it knows it.
#[derive(Debug, Clone, PartialEq)]
pub enum OpError {
    Arith {
        operand: usize,
        type_name: &'static str,
    },
    Concat {
        operand: usize,
        type_name: &'static str,
    },
    Compare(&'static str, &'static str),
    Length(&'static str),
    Index(&'static str),
    DivideByZero(&'static str),
    BadKey(&'static str),
}

impl OpError {
    /// Which operand (0 or 1) the message is about.
    pub fn operand(&self) -> Option<usize> {
        match self {
            Self::Arith { operand, .. } | Self::Concat { operand, .. } => Some(*operand),
            Self::Length(_) | Self::Index(_) => Some(0),
            _ => None,
        }
    }

    pub fn to_message(&self, description: Option<String>) -> String {
        let suffix = description.map(|d| format!(" ({d})")).unwrap_or_default();
        match self {
            Self::Arith { type_name, .. } => {
                format!("attempt to perform arithmetic on a {type_name} value{suffix}")
            }
            Self::Concat { type_name, .. } => {
                format!("attempt to concatenate a {type_name} value{suffix}")
            }
            Self::Compare(a, b) if a == b => format!("attempt to compare two {a} values"),
            Self::Compare(a, b) => format!("attempt to compare {a} with {b}"),
            Self::Length(type_name) => {
                format!("attempt to get length of a {type_name} value{suffix}")
            }
            Self::Index(type_name) => format!("attempt to index a {type_name} value{suffix}"),
            Self::DivideByZero(op) => format!("attempt to perform {op}"),
            Self::BadKey(msg) => (*msg).to_owned(),
        }
    }
}

pub type OpResult<T = Value> = Result<T, OpError>;

fn arith_error(a: &Value, b: &Value) -> OpError {
    let (operand, culprit) = if a.to_number().is_some() {
        (1, b)
    } else {
        (0, a)
    };
    OpError::Arith {
        operand,
        type_name: culprit.type_name(),
    }
}

fn float_arith(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => float_ops::float_floordiv(x, y),
        BinOp::Mod => float_ops::float_mod(x, y),
        BinOp::Pow => x.powf(y),
        _ => unreachable!("{} is not arithmetic", op.as_str()),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Number(n) => *n,
        _ => f64::NAN,
    }
}

impl VirtualMachine {
    /// Arithmetic on numbers and numeric strings. Integer operands stay
    /// integers except for `/` and `^`.
    pub fn arith(&self, op: BinOp, a: &Value, b: &Value) -> OpResult {
        let (Some(x), Some(y)) = (a.to_number(), b.to_number()) else {
            return Err(arith_error(a, b));
        };
        if let (Value::Integer(x), Value::Integer(y)) = (&x, &y) {
            let (x, y) = (*x, *y);
            let value = match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::FloorDiv => {
                    float_ops::int_floordiv(x, y).ok_or(OpError::DivideByZero("'n//0'"))?
                }
                BinOp::Mod => float_ops::int_mod(x, y).ok_or(OpError::DivideByZero("'n%%0'"))?,
                _ => return Ok(Value::Number(float_arith(op, x as f64, y as f64))),
            };
            return Ok(Value::Integer(value));
        }
        Ok(Value::Number(float_arith(op, as_f64(&x), as_f64(&y))))
    }

    pub fn negate(&self, value: &Value) -> OpResult {
        match value.to_number() {
            Some(Value::Integer(i)) => Ok(Value::Integer(i.wrapping_neg())),
            Some(Value::Number(n)) => Ok(Value::Number(-n)),
            _ => Err(OpError::Arith {
                operand: 0,
                type_name: value.type_name(),
            }),
        }
    }

    pub fn concat(&self, a: &Value, b: &Value) -> OpResult {
        match (a.to_str_coerced(), b.to_str_coerced()) {
            (Some(x), Some(y)) => {
                let mut joined = String::with_capacity(x.len() + y.len());
                joined.push_str(&x);
                joined.push_str(&y);
                Ok(Value::from(joined))
            }
            (Some(_), None) => Err(OpError::Concat {
                operand: 1,
                type_name: b.type_name(),
            }),
            (None, _) => Err(OpError::Concat {
                operand: 0,
                type_name: a.type_name(),
            }),
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> OpResult<Option<Ordering>> {
        match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => Ok(Some(x.cmp(y))),
            (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
                Ok(as_f64(a).partial_cmp(&as_f64(b)))
            }
            (Value::String(x), Value::String(y)) => Ok(Some(x.as_bytes().cmp(y.as_bytes()))),
            _ => Err(OpError::Compare(a.type_name(), b.type_name())),
        }
    }

    pub fn less_than(&self, a: &Value, b: &Value) -> OpResult<bool> {
        Ok(self.compare(a, b)? == Some(Ordering::Less))
    }

    pub fn less_equal(&self, a: &Value, b: &Value) -> OpResult<bool> {
        Ok(matches!(
            self.compare(a, b)?,
            Some(Ordering::Less | Ordering::Equal)
        ))
    }

    pub fn length(&self, value: &Value) -> OpResult {
        match value {
            Value::String(s) => Ok(Value::Integer(s.len() as i64)),
            Value::Table(t) => Ok(Value::Integer(t.len())),
            other => Err(OpError::Length(other.type_name())),
        }
    }

    /// `obj[key]`. Strings index into the string library, native objects
    /// expose their methods by name.
    pub fn index(&self, obj: &Value, key: &Value) -> OpResult {
        match obj {
            Value::Table(table) => Ok(table.get(key)),
            Value::String(_) => Ok(self.string_lib.get(key)),
            Value::UserData(data) => Ok(key
                .as_str()
                .and_then(|name| data.method(name))
                .map(|native| Value::Function(Function::Native(Rc::new(native))))
                .unwrap_or_default()),
            other => Err(OpError::Index(other.type_name())),
        }
    }

    pub fn set_index(&self, obj: &Value, key: Value, value: Value) -> OpResult<()> {
        match obj {
            Value::Table(table) => table.set(key, value).map_err(OpError::BadKey),
            other => Err(OpError::Index(other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, value::Value};
    use lunapr_compiler::ast::BinOp;

    #[test]
    fn test_integer_and_float_arith() {
        Interpreter::default().enter(|vm| {
            let res = vm.arith(BinOp::Add, &Value::Integer(2), &Value::Integer(3));
            assert!(matches!(res, Ok(Value::Integer(5))));
            let res = vm.arith(BinOp::Div, &Value::Integer(7), &Value::Integer(2));
            assert!(matches!(res, Ok(Value::Number(n)) if n == 3.5));
            let res = vm.arith(BinOp::Mul, &Value::new_str("4"), &Value::Number(0.5));
            assert!(matches!(res, Ok(Value::Number(n)) if n == 2.0));
        })
    }

    #[test]
    fn test_arith_errors() {
        Interpreter::default().enter(|vm| {
            let err = vm
                .arith(BinOp::Add, &Value::Integer(1), &Value::Nil)
                .unwrap_err();
            assert_eq!(err.operand(), Some(1));
            assert_eq!(
                err.to_message(Some("global 'x'".to_owned())),
                "attempt to perform arithmetic on a nil value (global 'x')"
            );
            let err = vm
                .arith(BinOp::Mod, &Value::Integer(1), &Value::Integer(0))
                .unwrap_err();
            assert_eq!(err.to_message(None), "attempt to perform 'n%%0'");
        })
    }

    #[test]
    fn test_compare() {
        Interpreter::default().enter(|vm| {
            assert!(vm.less_than(&Value::Integer(1), &Value::Number(1.5)).unwrap());
            assert!(vm.less_equal(&"a".into(), &"b".into()).unwrap());
            let err = vm.less_than(&Value::Integer(1), &Value::Nil).unwrap_err();
            assert_eq!(err.to_message(None), "attempt to compare number with nil");
        })
    }
}
