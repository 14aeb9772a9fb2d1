//! Script errors and their tracebacks.

use crate::value::Value;
use itertools::Itertools;
use std::fmt;

pub type ScriptResult<T> = Result<T, Exception>;

/// One line of a traceback, innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// `chunk:line`, or `[C]` for native functions.
    pub location: String,
    /// `in function 'name'`, `in main chunk`, ...
    pub what: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.what)
    }
}

/// A raised error value together with the call stack at the point it was
/// raised.
#[derive(Clone)]
pub struct Exception {
    value: Value,
    traceback: Vec<TraceEntry>,
}

impl Exception {
    pub fn new(value: Value, traceback: Vec<TraceEntry>) -> Self {
        Self { value, traceback }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn traceback(&self) -> &[TraceEntry] {
        &self.traceback
    }

    /// The error message as a string; non-string error objects are
    /// described by their type.
    pub fn message(&self) -> String {
        match &self.value {
            Value::String(_) | Value::Integer(_) | Value::Number(_) => self.value.to_string(),
            Value::Nil => "nil".to_owned(),
            other => format!("(error object is a {} value)", other.type_name()),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("value", &self.value)
            .field("traceback", &self.traceback)
            .finish()
    }
}

impl std::error::Error for Exception {}

pub fn write_traceback<W: fmt::Write>(output: &mut W, entries: &[TraceEntry]) -> fmt::Result {
    write!(output, "stack traceback:")?;
    if !entries.is_empty() {
        write!(output, "\n\t{}", entries.iter().join("\n\t"))?;
    }
    Ok(())
}

/// Write the message of `exc` followed by its traceback.
pub fn write_exception<W: fmt::Write>(output: &mut W, exc: &Exception) -> fmt::Result {
    writeln!(output, "{}", exc.message())?;
    write_traceback(output, exc.traceback())
}

/// [`write_exception`] into a fresh string.
pub fn format_exception(exc: &Exception) -> String {
    let mut output = String::new();
    // Writing into a String cannot fail.
    let _ = write_exception(&mut output, exc);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_exception() {
        let exc = Exception::new(
            Value::new_str("input:1: boom"),
            vec![
                TraceEntry {
                    location: "[C]".to_owned(),
                    what: "in function 'error'".to_owned(),
                },
                TraceEntry {
                    location: "input:1".to_owned(),
                    what: "in main chunk".to_owned(),
                },
            ],
        );
        assert_eq!(
            format_exception(&exc),
            "input:1: boom\nstack traceback:\n\t[C]: in function 'error'\n\tinput:1: in main chunk"
        );
    }

    #[test]
    fn test_non_string_message() {
        let exc = Exception::new(Value::Boolean(true), Vec::new());
        assert_eq!(exc.message(), "(error object is a boolean value)");
    }
}
