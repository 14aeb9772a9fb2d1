//! The `string` library. Its table doubles as the method table for string
//! values, so `s:upper()` works.

use super::pattern::{self, Capture, PatternError};
use crate::{
    VirtualMachine,
    exceptions::{Exception, ScriptResult},
    function::FuncArgs,
    value::{NativeFn, TableRef, UserData, Value},
};
use lunapr_common::{
    cformat::{CFormatError, CFormatPart, CFormatString, CFormatType},
    float_ops,
    str::{byte_range, quote},
};
use std::{any::Any, cell::Cell, rc::Rc};

/// Longest string `rep` will build.
const MAX_STRING_SIZE: usize = i32::MAX as usize;

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("byte", byte),
    ("char", char_),
    ("find", find),
    ("format", format),
    ("gmatch", gmatch),
    ("gsub", gsub),
    ("len", len),
    ("lower", lower),
    ("match", match_),
    ("rep", rep),
    ("reverse", reverse),
    ("sub", sub),
    ("upper", upper),
];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    super::add_functions(&vm.string_lib, FUNCTIONS);
    vm.string_lib.clone()
}

fn lossy(bytes: &[u8]) -> Value {
    Value::from(String::from_utf8_lossy(bytes).into_owned())
}

fn pattern_error(vm: &VirtualMachine, err: PatternError) -> Exception {
    vm.new_runtime_error(err.to_string())
}

/// Normalize a 1-based, possibly negative start offset into a byte index.
/// `None` when it lies past the end of the subject.
fn start_index(init: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let init = match init {
        i if i < 0 => (len + i + 1).max(1),
        0 => 1,
        i => i,
    };
    (init <= len + 1).then(|| (init - 1) as usize)
}

fn capture_value(src: &[u8], capture: Capture) -> Value {
    match capture {
        Capture::Range(start, end) => lossy(&src[start..end]),
        Capture::Position(position) => Value::Integer(position as i64),
    }
}

fn len(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    Ok(vec![Value::Integer(s.len() as i64)])
}

fn sub(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    let start = args.opt_int(vm, 1, 1)?;
    let end = args.opt_int(vm, 2, -1)?;
    let value = match byte_range(s.len(), start, end) {
        Some((start, end)) => lossy(&s.as_bytes()[start..end]),
        None => Value::new_str(""),
    };
    Ok(vec![value])
}

fn upper(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    Ok(vec![Value::from(s.to_ascii_uppercase())])
}

fn lower(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    Ok(vec![Value::from(s.to_ascii_lowercase())])
}

fn reverse(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    Ok(vec![Value::from(s.chars().rev().collect::<String>())])
}

fn rep(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    let n = args.check_int(vm, 1)?;
    let sep = args.opt_str(vm, 2)?.unwrap_or_else(|| Rc::from(""));
    if n <= 0 {
        return Ok(vec![Value::new_str("")]);
    }
    let n = n as usize;
    let total = s
        .len()
        .checked_mul(n)
        .and_then(|size| size.checked_add(sep.len().checked_mul(n - 1)?))
        .filter(|&size| size <= MAX_STRING_SIZE)
        .ok_or_else(|| vm.new_runtime_error("resulting string too large"))?;
    let mut out = String::with_capacity(total);
    for i in 0..n {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&s);
    }
    Ok(vec![Value::from(out)])
}

fn byte(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    let start = args.opt_int(vm, 1, 1)?;
    let end = args.opt_int(vm, 2, start)?;
    Ok(match byte_range(s.len(), start, end) {
        Some((start, end)) => s.as_bytes()[start..end]
            .iter()
            .map(|&b| Value::Integer(i64::from(b)))
            .collect(),
        None => Vec::new(),
    })
}

fn char_(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let bytes = (0..args.len())
        .map(|i| {
            let code = args.check_int(vm, i)?;
            u8::try_from(code).map_err(|_| args.arg_error(vm, i, "value out of range"))
        })
        .collect::<ScriptResult<Vec<u8>>>()?;
    Ok(vec![lossy(&bytes)])
}

/// `%q`: a literal that reads back as the same value.
fn quoted(vm: &VirtualMachine, args: &FuncArgs, index: usize) -> ScriptResult<String> {
    Ok(match args.get(index) {
        Value::String(s) => quote(&s),
        Value::Integer(i) if i == i64::MIN => "0x8000000000000000".to_owned(),
        Value::Number(n) if n.is_nan() => "(0/0)".to_owned(),
        Value::Number(n) if n.is_infinite() => {
            (if n > 0.0 { "1e9999" } else { "-1e9999" }).to_owned()
        }
        Value::Number(n) => {
            let text = float_ops::to_string(n);
            if text.contains(['.', 'e', 'n', 'i']) {
                text
            } else {
                format!("{text}.0")
            }
        }
        value @ (Value::Nil | Value::Boolean(_) | Value::Integer(_)) => value.to_string(),
        _ => return Err(args.arg_error(vm, index, "value has no literal form")),
    })
}

fn format(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let fmt = args.check_str(vm, 0)?;
    let parsed: CFormatString = fmt
        .parse()
        .map_err(|err: CFormatError| vm.new_runtime_error(err.to_string()))?;
    let mut out = String::with_capacity(fmt.len());
    let mut index = 0;
    for (_, part) in parsed.iter() {
        let spec = match part {
            CFormatPart::Literal(text) => {
                out.push_str(text);
                continue;
            }
            CFormatPart::Spec(spec) => spec,
        };
        index += 1;
        if index >= args.len() {
            return Err(args.arg_error(vm, index, "no value"));
        }
        let formatted = match spec.format_type {
            CFormatType::Number(_) => spec.format_number(args.check_int(vm, index)?),
            CFormatType::Float(_) => spec.format_float(args.check_f64(vm, index)?),
            CFormatType::Character => {
                let code = args.check_int(vm, index)?;
                spec.format_char(char::from(code as u8))
            }
            CFormatType::String => spec.format_string(args.get(index).to_string()),
            CFormatType::Quoted => quoted(vm, &args, index)?,
        };
        out.push_str(&formatted);
    }
    Ok(vec![Value::from(out)])
}

fn find_plain(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Shared body of `find` and `match`.
fn str_find(vm: &VirtualMachine, args: &FuncArgs, find: bool) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    let pat = args.check_str(vm, 1)?;
    let src = s.as_bytes();
    let Some(init) = start_index(args.opt_int(vm, 2, 1)?, src.len()) else {
        return Ok(vec![Value::Nil]);
    };
    let plain = args.get(3).is_truthy() || !pattern::has_specials(pat.as_bytes());
    if find && plain {
        return Ok(match find_plain(&src[init..], pat.as_bytes()) {
            Some(offset) => {
                let start = init + offset;
                vec![
                    Value::Integer(start as i64 + 1),
                    Value::Integer((start + pat.len()) as i64),
                ]
            }
            None => vec![Value::Nil],
        });
    }
    let Some(m) = pattern::find(src, pat.as_bytes(), init).map_err(|e| pattern_error(vm, e))?
    else {
        return Ok(vec![Value::Nil]);
    };
    if find {
        let mut values = vec![
            Value::Integer(m.start as i64 + 1),
            Value::Integer(m.end as i64),
        ];
        values.extend(m.captures.iter().map(|&c| capture_value(src, c)));
        Ok(values)
    } else {
        Ok(m.values().into_iter().map(|c| capture_value(src, c)).collect())
    }
}

fn find(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    str_find(vm, &args, true)
}

fn match_(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    str_find(vm, &args, false)
}

/// Iteration state of a `gmatch` loop.
struct GmatchState {
    subject: Rc<str>,
    pattern: Rc<str>,
    position: Cell<usize>,
}

impl UserData for GmatchState {
    fn type_name(&self) -> &'static str {
        "gmatch state"
    }

    fn to_display(&self) -> String {
        format!("gmatch state ({:p})", self)
    }

    fn methods(&self) -> &'static [(&'static str, NativeFn)] {
        &[]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn gmatch(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let subject = args.check_str(vm, 0)?;
    let pattern = args.check_str(vm, 1)?;
    let state = GmatchState {
        subject,
        pattern,
        position: Cell::new(0),
    };
    Ok(vec![
        Value::native("gmatch_step", gmatch_step),
        Value::UserData(Rc::new(state)),
        Value::Nil,
    ])
}

fn gmatch_step(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let state = args.check_userdata::<GmatchState>(vm, 0, "gmatch state")?;
    let src = state.subject.as_bytes();
    let position = state.position.get();
    if position > src.len() {
        return Ok(vec![Value::Nil]);
    }
    let found = pattern::find(src, state.pattern.as_bytes(), position)
        .map_err(|e| pattern_error(vm, e))?;
    let Some(m) = found else {
        state.position.set(src.len() + 1);
        return Ok(vec![Value::Nil]);
    };
    let next = if m.end == m.start { m.end + 1 } else { m.end };
    state.position.set(next);
    Ok(m.values().into_iter().map(|c| capture_value(src, c)).collect())
}

/// Expand `%0`-`%9` and `%%` in a `gsub` replacement string.
fn expand_replacement(
    vm: &VirtualMachine,
    out: &mut Vec<u8>,
    repl: &[u8],
    src: &[u8],
    m: &pattern::Match,
) -> ScriptResult<()> {
    let mut bytes = repl.iter();
    while let Some(&b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'%') => out.push(b'%'),
            Some(b'0') => out.extend_from_slice(&src[m.start..m.end]),
            Some(&d) if d.is_ascii_digit() => {
                let index = usize::from(d - b'1');
                let capture = m
                    .values()
                    .get(index)
                    .copied()
                    .ok_or_else(|| pattern_error(vm, PatternError::InvalidCaptureIndex(index + 1)))?;
                match capture_value(src, capture) {
                    Value::String(s) => out.extend_from_slice(s.as_bytes()),
                    other => out.extend_from_slice(other.to_string().as_bytes()),
                }
            }
            _ => {
                return Err(vm.new_runtime_error(
                    "invalid use of '%' in replacement string",
                ));
            }
        }
    }
    Ok(())
}

fn gsub(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let s = args.check_str(vm, 0)?;
    let pat = args.check_str(vm, 1)?;
    let repl = args.get(2);
    match &repl {
        Value::String(_) | Value::Integer(_) | Value::Number(_) | Value::Table(_)
        | Value::Function(_) => {}
        other => {
            return Err(args.arg_error(
                vm,
                2,
                &format!(
                    "string/function/table expected, got {}",
                    other.type_name()
                ),
            ));
        }
    }
    let max_n = if args.is_none(3) {
        i64::MAX
    } else {
        args.check_int(vm, 3)?
    };
    let repl_text = repl.to_string();
    let src = s.as_bytes();
    let anchored = pat.starts_with('^');
    let mut out = Vec::with_capacity(src.len());
    let mut position = 0;
    let mut count = 0;
    while count < max_n {
        let found = pattern::find(src, pat.as_bytes(), position)
            .map_err(|e| pattern_error(vm, e))?;
        let Some(m) = found else { break };
        count += 1;
        out.extend_from_slice(&src[position..m.start]);
        let replacement = match &repl {
            Value::Table(table) => table.get(&capture_value(src, m.values()[0])),
            Value::Function(_) => {
                let captures = m.values().into_iter().map(|c| capture_value(src, c)).collect();
                vm.call(&repl, captures)?.into_iter().next().unwrap_or_default()
            }
            _ => {
                expand_replacement(vm, &mut out, repl_text.as_bytes(), src, &m)?;
                Value::Boolean(true)
            }
        };
        // Table and function results: false or nil keeps the original text.
        match replacement {
            Value::Boolean(true) => {}
            Value::Nil | Value::Boolean(false) => out.extend_from_slice(&src[m.start..m.end]),
            Value::String(text) => out.extend_from_slice(text.as_bytes()),
            value @ (Value::Integer(_) | Value::Number(_)) => {
                out.extend_from_slice(value.to_string().as_bytes())
            }
            other => {
                return Err(vm.new_runtime_error(format!(
                    "invalid replacement value (a {})",
                    other.type_name()
                )));
            }
        }
        if m.end > m.start {
            position = m.end;
        } else {
            if let Some(&b) = src.get(m.start) {
                out.push(b);
            }
            position = m.start + 1;
        }
        if anchored || position > src.len() {
            break;
        }
    }
    if position < src.len() {
        out.extend_from_slice(&src[position..]);
    }
    Ok(vec![lossy(&out), Value::Integer(count)])
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
    fn test_basic_functions() {
        assert_eq!(
            eval(
                "local s = 'Hello'
                 return s:len(), s:upper(), s:lower(), s:sub(2, -2), s:sub(-3),
                        ('ab'):rep(3, ','), s:reverse(), s:byte(1), string.char(72, 105)"
            ),
            ["5", "HELLO", "hello", "ell", "llo", "ab,ab,ab", "olleH", "72", "Hi"]
        );
    }

    #[test]
    fn test_format() {
        assert_eq!(
            eval(
                r#"return string.format('%d|%5.2f|%s|%-4s|%x|%q', 42, 3.14159, nil, 'ab', 255, 'a"b'),
                          string.format('%5s%%', 'x'), string.format('%c%c', 76, 117)"#
            ),
            [r#"42| 3.14|nil|ab  |ff|"a\"b""#, "    x%", "Lu"]
        );
    }

    #[test]
    fn test_format_errors() {
        Interpreter::default().enter(|vm| {
            let exc = vm.run_source("return string.format('%d', 1.5)", "=test").unwrap_err();
            assert_eq!(
                exc.message(),
                "test:1: bad argument #2 to 'format' (number has no integer representation)"
            );
            let exc = vm.run_source("return string.format('%d')", "=test").unwrap_err();
            assert_eq!(exc.message(), "test:1: bad argument #2 to 'format' (no value)");
        });
    }

    #[test]
    fn test_find_and_match() {
        assert_eq!(
            eval(
                "local s = 'key = value'
                 local a, b = s:find('=', 1, true)
                 local c, d, k, v = s:find('(%w+) = (%w+)')
                 return a, b, c, d, k, v, s:match('%a+$'), s:find('x'), s:find('.', 1, true)"
            ),
            ["5", "5", "1", "11", "key", "value", "value", "nil", "nil"]
        );
    }

    #[test]
    fn test_gmatch_and_gsub() {
        assert_eq!(
            eval(
                "local words = {}
                 for w in ('one two  three'):gmatch('%a+') do words[#words + 1] = w end
                 local a = ('hello world'):gsub('o', '0')
                 local b, n = ('hello world'):gsub('(%w+)', '<%1>')
                 local c = ('$x and $y'):gsub('%$(%w+)', {x = 'X'})
                 local d = ('abc'):gsub('%w', function(ch) return ch:upper() end, 2)
                 return table.concat(words, ','), a, b, n, c, d"
            ),
            [
                "one,two,three",
                "hell0 w0rld",
                "<hello> <world>",
                "2",
                "X and $y",
                "ABc"
            ]
        );
    }
}
