//! Float formatting and the integer/float arithmetic rules of the language.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Lower,
    Upper,
}

fn format_nan(case: Case) -> String {
    match case {
        Case::Lower => "nan".to_owned(),
        Case::Upper => "NAN".to_owned(),
    }
}

fn format_inf(case: Case) -> String {
    match case {
        Case::Lower => "inf".to_owned(),
        Case::Upper => "INF".to_owned(),
    }
}

/// `%f`, applied to a non-negative magnitude.
pub fn format_fixed(precision: usize, magnitude: f64, case: Case, alternate_form: bool) -> String {
    match magnitude {
        magnitude if magnitude.is_finite() => {
            let mut result = format!("{magnitude:.precision$}");
            if alternate_form && precision == 0 {
                result.push('.');
            }
            result
        }
        magnitude if magnitude.is_nan() => format_nan(case),
        _ => format_inf(case),
    }
}

/// Split Rust's `{:e}` output into mantissa and exponent.
fn split_exponent(formatted: &str) -> (&str, i32) {
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse().unwrap_or(0)),
        None => (formatted, 0),
    }
}

/// `%e`, applied to a non-negative magnitude. The exponent always carries a
/// sign and at least two digits, like C's printf.
pub fn format_exponent(
    precision: usize,
    magnitude: f64,
    case: Case,
    alternate_form: bool,
) -> String {
    match magnitude {
        magnitude if magnitude.is_finite() => {
            let formatted = format!("{magnitude:.precision$e}");
            let (mantissa, exponent) = split_exponent(&formatted);
            let point = if alternate_form && precision == 0 {
                "."
            } else {
                ""
            };
            let e = match case {
                Case::Lower => 'e',
                Case::Upper => 'E',
            };
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}{point}{e}{sign}{:02}", exponent.unsigned_abs())
        }
        magnitude if magnitude.is_nan() => format_nan(case),
        _ => format_inf(case),
    }
}

fn strip_trailing_zeros(mut number: String) -> String {
    if number.contains('.') {
        let trimmed = number.trim_end_matches('0').trim_end_matches('.').len();
        number.truncate(trimmed);
    }
    number
}

/// `%g`, applied to a non-negative magnitude.
pub fn format_general(
    precision: usize,
    magnitude: f64,
    case: Case,
    alternate_form: bool,
) -> String {
    if !magnitude.is_finite() {
        return if magnitude.is_nan() {
            format_nan(case)
        } else {
            format_inf(case)
        };
    }
    let precision = precision.max(1);
    let formatted = format!("{:.*e}", precision - 1, magnitude);
    let (_, exponent) = split_exponent(&formatted);
    if exponent >= -4 && (exponent as i64) < precision as i64 {
        let digits = (precision as i64 - 1 - exponent as i64) as usize;
        let fixed = format!("{magnitude:.digits$}");
        if alternate_form {
            fixed
        } else {
            strip_trailing_zeros(fixed)
        }
    } else {
        let result = format_exponent(precision - 1, magnitude, case, alternate_form);
        if alternate_form {
            return result;
        }
        let split_at = result.find(['e', 'E']).unwrap_or(result.len());
        let (mantissa, exponent) = result.split_at(split_at);
        format!("{}{exponent}", strip_trailing_zeros(mantissa.to_owned()))
    }
}

/// The canonical text of a float value: `%.14g`, with `.0` appended when the
/// result would otherwise read as an integer.
pub fn to_string(value: f64) -> String {
    if value.is_nan() {
        return if value.is_sign_negative() {
            "-nan".to_owned()
        } else {
            "nan".to_owned()
        };
    }
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let magnitude = format_general(14, value.abs(), Case::Lower, false);
    let looks_like_int = magnitude.bytes().all(|b| b.is_ascii_digit());
    if looks_like_int {
        format!("{sign}{magnitude}.0")
    } else {
        format!("{sign}{magnitude}")
    }
}

/// Exact conversion of a float with an integral value to `i64`.
pub fn to_integer(value: f64) -> Option<i64> {
    // 2^63 itself is out of range, -2^63 is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if value.fract() == 0.0 && (-LIMIT..LIMIT).contains(&value) {
        Some(value as i64)
    } else {
        None
    }
}

/// Floor division of integers; `None` on division by zero.
pub fn int_floordiv(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a ^ b) < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Modulo of integers taking the sign of the divisor; `None` on zero.
pub fn int_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let m = a.wrapping_rem(b);
    if m != 0 && ((m ^ b) < 0) {
        Some(m + b)
    } else {
        Some(m)
    }
}

pub fn float_floordiv(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

pub fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && ((m < 0.0) != (b < 0.0)) {
        m + b
    } else {
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string() {
        assert_eq!(to_string(3.0), "3.0");
        assert_eq!(to_string(-0.5), "-0.5");
        assert_eq!(to_string(0.1), "0.1");
        assert_eq!(to_string(1e100), "1e+100");
        assert_eq!(to_string(1.0 / 3.0), "0.33333333333333");
        assert_eq!(to_string(f64::INFINITY), "inf");
        assert_eq!(to_string(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_format_exponent() {
        assert_eq!(format_exponent(2, 1234.5, Case::Lower, false), "1.23e+03");
        assert_eq!(format_exponent(0, 0.001, Case::Upper, false), "1E-03");
    }

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(6, 100000.0, Case::Lower, false), "100000");
        assert_eq!(format_general(6, 1000000.0, Case::Lower, false), "1e+06");
        assert_eq!(format_general(6, 0.0001, Case::Lower, false), "0.0001");
        assert_eq!(format_general(6, 0.00001, Case::Lower, false), "1e-05");
    }

    #[test]
    fn test_integer_division_rounds_down() {
        assert_eq!(int_floordiv(7, 2), Some(3));
        assert_eq!(int_floordiv(-7, 2), Some(-4));
        assert_eq!(int_mod(-7, 3), Some(2));
        assert_eq!(int_mod(7, -3), Some(-2));
        assert_eq!(int_mod(1, 0), None);
        assert_eq!(float_mod(-7.0, 3.0), 2.0);
    }

    #[test]
    fn test_to_integer() {
        assert_eq!(to_integer(3.0), Some(3));
        assert_eq!(to_integer(3.5), None);
        assert_eq!(to_integer(9.3e18), None);
        assert_eq!(to_integer(f64::NAN), None);
    }
}
