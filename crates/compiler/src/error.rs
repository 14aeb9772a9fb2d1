use std::{borrow::Cow, fmt};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorType {
    #[error("unfinished string")]
    UnterminatedString,
    #[error("unfinished long string")]
    UnterminatedLongString,
    #[error("unfinished long comment")]
    UnterminatedComment,
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),
    #[error("malformed number near '{0}'")]
    MalformedNumber(String),
    #[error("unexpected symbol near '{0}'")]
    UnexpectedCharacter(char),
    #[error("{expected} expected near {found}")]
    Expected { expected: String, found: String },
    #[error("unexpected symbol near {0}")]
    UnexpectedToken(String),
    #[error("cannot use '...' outside a vararg function near '...'")]
    VarargOutsideFunction,
    #[error("no loop to break")]
    BreakOutsideLoop,
    #[error("syntax error near {0}")]
    InvalidAssignment(String),
}

/// A syntax error with the chunk name and line it was found on.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct CompileError {
    #[source]
    pub error: ParseErrorType,
    pub source_path: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(error: ParseErrorType, source_path: &str, line: u32) -> Self {
        Self {
            error,
            source_path: source_path.to_owned(),
            line,
        }
    }

    /// Whether more input could complete the chunk, as when a block is still
    /// open at the end of the text.
    pub fn is_incomplete(&self) -> bool {
        match &self.error {
            ParseErrorType::UnterminatedLongString | ParseErrorType::UnterminatedComment => true,
            ParseErrorType::Expected { found, .. } | ParseErrorType::UnexpectedToken(found) => {
                found == "<eof>"
            }
            _ => false,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}",
            short_source(&self.source_path),
            self.line,
            self.error
        )
    }
}

/// The chunk name as shown in messages. A leading `=` or `@` marks a name
/// printed verbatim; anything else is source text and is abbreviated to its
/// first line.
pub fn short_source(source_path: &str) -> Cow<'_, str> {
    const MAX_LEN: usize = 45;
    if let Some(name) = source_path
        .strip_prefix('=')
        .or_else(|| source_path.strip_prefix('@'))
    {
        return Cow::Borrowed(name);
    }
    let first_line = source_path.lines().next().unwrap_or("");
    if first_line.len() < source_path.len() || first_line.chars().count() > MAX_LEN {
        let shown = first_line.chars().take(MAX_LEN).collect::<String>();
        Cow::Owned(format!("[string \"{shown}...\"]"))
    } else {
        Cow::Owned(format!("[string \"{first_line}\"]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_source() {
        assert_eq!(short_source("=stdin"), "stdin");
        assert_eq!(short_source("@lib/util.lua"), "lib/util.lua");
        assert_eq!(short_source("return 1"), "[string \"return 1\"]");
        assert_eq!(
            short_source("local x = 1\nreturn x"),
            "[string \"local x = 1...\"]"
        );
    }

    #[test]
    fn test_new_error_display() {
        let err = CompileError::new(ParseErrorType::BreakOutsideLoop, "@main.lua", 7);
        assert_eq!(err.source_path, "@main.lua");
        assert_eq!(err.to_string(), "main.lua:7: no loop to break");
        assert!(!err.is_incomplete());
    }
}
