//! Conversions between strings and numbers, and string quoting.

use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedNumber {
    Int(i64),
    Float(f64),
}

/// Parse the numeral syntax accepted by `tonumber` and string coercion:
/// surrounding whitespace, an optional sign, hex integers, decimal integers
/// and decimal floats. Decimal integers that overflow become floats, hex
/// integers wrap around.
pub fn parse_number(text: &str) -> Option<ParsedNumber> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let value = hex.bytes().fold(0i64, |acc, b| {
            let digit = (b as char).to_digit(16).unwrap_or(0) as i64;
            acc.wrapping_mul(16).wrapping_add(digit)
        });
        return Some(ParsedNumber::Int(if negative {
            value.wrapping_neg()
        } else {
            value
        }));
    }
    if digits.is_empty()
        || !digits
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        || !digits.bytes().any(|b| b.is_ascii_digit())
    {
        return None;
    }
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(value) = text.trim_start_matches('+').parse::<i64>() {
            return Some(ParsedNumber::Int(value));
        }
    }
    let value: f64 = digits.parse().ok()?;
    Some(ParsedNumber::Float(if negative { -value } else { value }))
}

/// Parse an integer in the given base (2..=36), as `tonumber(s, base)` does.
pub fn parse_int_radix(text: &str, base: u32) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(base)?;
        value = value.wrapping_mul(base as i64).wrapping_add(digit as i64);
    }
    Some(if negative { value.wrapping_neg() } else { value })
}

/// Quote a string so that reading it back yields the same string, as
/// `string.format("%q")` does.
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\\n"),
            '\r' => quoted.push_str("\\r"),
            c if c.is_ascii_control() => {
                // A following digit would be read as part of the escape.
                if chars.peek().is_some_and(char::is_ascii_digit) {
                    let _ = write!(quoted, "\\{:03}", c as u32);
                } else {
                    let _ = write!(quoted, "\\{}", c as u32);
                }
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Take a byte range of `text` using 1-based inclusive indices where negative
/// values count from the end, as `string.sub` does.
pub fn byte_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = match start {
        s if s < 0 => (len + s + 1).max(1),
        0 => 1,
        s => s,
    };
    let end = match end {
        e if e < 0 => len + e + 1,
        e if e > len => len,
        e => e,
    };
    (start <= end).then(|| ((start - 1) as usize, end as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 "), Some(ParsedNumber::Int(42)));
        assert_eq!(parse_number("-0x10"), Some(ParsedNumber::Int(-16)));
        assert_eq!(parse_number("1.5e2"), Some(ParsedNumber::Float(150.0)));
        assert_eq!(parse_number("-.5"), Some(ParsedNumber::Float(-0.5)));
        assert_eq!(
            parse_number("9223372036854775808"),
            Some(ParsedNumber::Float(9223372036854775808.0))
        );
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("1x"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("."), None);
    }

    #[test]
    fn test_parse_int_radix() {
        assert_eq!(parse_int_radix("ff", 16), Some(255));
        assert_eq!(parse_int_radix("-101", 2), Some(-5));
        assert_eq!(parse_int_radix("19", 8), None);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("a\"b\\c"), r#""a\"b\\c""#);
        assert_eq!(quote("line\nnext"), "\"line\\\nnext\"");
        assert_eq!(quote("\u{0}1"), "\"\\0001\"");
    }

    #[test]
    fn test_byte_range() {
        assert_eq!(byte_range(5, 2, 4), Some((1, 4)));
        assert_eq!(byte_range(5, -3, -1), Some((2, 5)));
        assert_eq!(byte_range(5, 0, 100), Some((0, 5)));
        assert_eq!(byte_range(5, 4, 2), None);
    }
}
