//! Implementation of printf-style string formatting as used by
//! `string.format`.

use crate::float_ops::{self, Case};
use bitflags::bitflags;
use itertools::Itertools;
use std::{cmp, fmt, iter::Peekable, str::CharIndices};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CFormatErrorType {
    UnsupportedFormatChar(char),
    IncompleteFormat,
    IntTooBig,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CFormatError {
    pub typ: CFormatErrorType,
    pub index: usize,
}

impl fmt::Display for CFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CFormatErrorType::*;
        match self.typ {
            UnsupportedFormatChar(c) => write!(f, "invalid conversion '%{c}' to 'format'"),
            IncompleteFormat => write!(f, "invalid conversion '%' to 'format'"),
            IntTooBig => write!(f, "invalid conversion (width or precision too long)"),
        }
    }
}

impl std::error::Error for CFormatError {}

#[derive(Debug, PartialEq, Clone, Copy)]
#[repr(u8)]
pub enum CNumberType {
    DecimalD = b'd',
    DecimalI = b'i',
    DecimalU = b'u',
    Octal = b'o',
    HexLower = b'x',
    HexUpper = b'X',
}

#[derive(Debug, PartialEq, Clone, Copy)]
#[repr(u8)]
pub enum CFloatType {
    ExponentLower = b'e',
    ExponentUpper = b'E',
    PointDecimalLower = b'f',
    PointDecimalUpper = b'F',
    GeneralLower = b'g',
    GeneralUpper = b'G',
}

impl CFloatType {
    const fn case(self) -> Case {
        use CFloatType::*;

        match self {
            ExponentLower | PointDecimalLower | GeneralLower => Case::Lower,
            ExponentUpper | PointDecimalUpper | GeneralUpper => Case::Upper,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CFormatType {
    Number(CNumberType),
    Float(CFloatType),
    Character,
    String,
    Quoted,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq)]
    pub struct CConversionFlags: u32 {
        const ALTERNATE_FORM = 0b0000_0001;
        const ZERO_PAD = 0b0000_0010;
        const LEFT_ADJUST = 0b0000_0100;
        const BLANK_SIGN = 0b0000_1000;
        const SIGN_CHAR = 0b0001_0000;
    }
}

impl CConversionFlags {
    #[inline]
    pub const fn sign_string(&self) -> &'static str {
        if self.contains(Self::SIGN_CHAR) {
            "+"
        } else if self.contains(Self::BLANK_SIGN) {
            " "
        } else {
            ""
        }
    }
}

/// Width and precision are limited to two digits, as in C libraries that
/// format into a fixed buffer.
const MAX_QUANTITY: usize = 99;

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct CFormatSpec {
    pub flags: CConversionFlags,
    pub min_field_width: Option<usize>,
    pub precision: Option<usize>,
    pub format_type: CFormatType,
}

impl CFormatSpec {
    fn fill_string(&self, string: String, fill_char: char, num_prefix_chars: usize) -> String {
        let num_chars = string.chars().count() + num_prefix_chars;
        let width = cmp::max(self.min_field_width.unwrap_or(0), num_chars);
        let fill_chars_needed = width - num_chars;
        if fill_chars_needed == 0 {
            return string;
        }
        let fill_string = std::iter::repeat_n(fill_char, fill_chars_needed).collect::<String>();
        if self.flags.contains(CConversionFlags::LEFT_ADJUST) {
            string + &fill_string
        } else {
            fill_string + &string
        }
    }

    /// Pad numeric text with zeros or spaces after its sign, honoring `-`.
    fn fill_number(&self, sign_and_prefix: String, magnitude: String, zero_pad: bool) -> String {
        if zero_pad && !self.flags.contains(CConversionFlags::LEFT_ADJUST) {
            let prefix_len = sign_and_prefix.chars().count();
            sign_and_prefix + &self.fill_string(magnitude, '0', prefix_len)
        } else {
            self.fill_string(sign_and_prefix + &magnitude, ' ', 0)
        }
    }

    pub fn format_string(&self, string: String) -> String {
        let string = match self.precision {
            Some(precision) if string.chars().count() > precision => {
                string.chars().take(precision).collect()
            }
            _ => string,
        };
        self.fill_string(string, ' ', 0)
    }

    pub fn format_char(&self, ch: char) -> String {
        self.fill_string(ch.to_string(), ' ', 0)
    }

    pub fn format_number(&self, num: i64) -> String {
        use CNumberType::*;
        let CFormatType::Number(format_type) = self.format_type else {
            unreachable!()
        };
        // Octal and hex conversions see the two's complement bits.
        let (negative, magnitude_string) = match format_type {
            DecimalD | DecimalI | DecimalU => (num < 0, num.unsigned_abs().to_string()),
            Octal => (false, format!("{:o}", num as u64)),
            HexLower => (false, format!("{:x}", num as u64)),
            HexUpper => (false, format!("{:X}", num as u64)),
        };
        let prefix = if self.flags.contains(CConversionFlags::ALTERNATE_FORM) && num != 0 {
            match format_type {
                Octal => "0",
                HexLower => "0x",
                HexUpper => "0X",
                _ => "",
            }
        } else {
            ""
        };
        let sign_string = if negative {
            "-"
        } else {
            self.flags.sign_string()
        };
        let magnitude_string = match self.precision {
            Some(precision) if magnitude_string.len() < precision => {
                format!("{magnitude_string:0>precision$}")
            }
            Some(0) if num == 0 => String::new(),
            _ => magnitude_string,
        };
        let zero_pad = self.flags.contains(CConversionFlags::ZERO_PAD) && self.precision.is_none();
        self.fill_number(format!("{sign_string}{prefix}"), magnitude_string, zero_pad)
    }

    pub fn format_float(&self, num: f64) -> String {
        let sign_string = if num.is_sign_negative() && !num.is_nan() {
            "-"
        } else {
            self.flags.sign_string()
        };
        let precision = self.precision.unwrap_or(6);
        let CFormatType::Float(format_type) = self.format_type else {
            unreachable!()
        };
        let magnitude = num.abs();
        let case = format_type.case();
        let alternate = self.flags.contains(CConversionFlags::ALTERNATE_FORM);

        let magnitude_string = match format_type {
            CFloatType::PointDecimalLower | CFloatType::PointDecimalUpper => {
                float_ops::format_fixed(precision, magnitude, case, alternate)
            }
            CFloatType::ExponentLower | CFloatType::ExponentUpper => {
                float_ops::format_exponent(precision, magnitude, case, alternate)
            }
            CFloatType::GeneralLower | CFloatType::GeneralUpper => {
                float_ops::format_general(precision, magnitude, case, alternate)
            }
        };
        let zero_pad = self.flags.contains(CConversionFlags::ZERO_PAD) && magnitude.is_finite();
        self.fill_number(sign_string.to_owned(), magnitude_string, zero_pad)
    }
}

#[derive(Debug, PartialEq)]
pub enum CFormatPart {
    Literal(String),
    Spec(CFormatSpec),
}

impl CFormatPart {
    #[inline]
    pub const fn is_specifier(&self) -> bool {
        matches!(self, Self::Spec(_))
    }
}

/// A parsed format string: literal runs interleaved with conversion specs.
#[derive(Debug, PartialEq)]
pub struct CFormatString {
    parts: Vec<(usize, CFormatPart)>,
}

impl CFormatString {
    pub fn iter(&self) -> impl Iterator<Item = &(usize, CFormatPart)> {
        self.parts.iter()
    }

    pub fn specifier_count(&self) -> usize {
        self.parts.iter().filter(|(_, part)| part.is_specifier()).count()
    }
}

type ParseIter<'a> = Peekable<CharIndices<'a>>;

fn parse_flags(iter: &mut ParseIter<'_>) -> CConversionFlags {
    let mut flags = CConversionFlags::empty();
    iter.peeking_take_while(|(_, c)| {
        let flag = match c {
            '#' => CConversionFlags::ALTERNATE_FORM,
            '0' => CConversionFlags::ZERO_PAD,
            '-' => CConversionFlags::LEFT_ADJUST,
            ' ' => CConversionFlags::BLANK_SIGN,
            '+' => CConversionFlags::SIGN_CHAR,
            _ => return false,
        };
        flags |= flag;
        true
    })
    .for_each(drop);
    flags
}

fn parse_quantity(iter: &mut ParseIter<'_>) -> Result<Option<usize>, CFormatError> {
    let mut quantity = None;
    while let Some(&(index, c)) = iter.peek() {
        let Some(digit) = c.to_digit(10) else {
            break;
        };
        iter.next();
        let value = quantity.unwrap_or(0) * 10 + digit as usize;
        if value > MAX_QUANTITY {
            return Err(CFormatError {
                typ: CFormatErrorType::IntTooBig,
                index,
            });
        }
        quantity = Some(value);
    }
    Ok(quantity)
}

fn parse_precision(iter: &mut ParseIter<'_>) -> Result<Option<usize>, CFormatError> {
    if iter.next_if(|(_, c)| *c == '.').is_some() {
        return Ok(Some(parse_quantity(iter)?.unwrap_or(0)));
    }
    Ok(None)
}

fn parse_format_type(iter: &mut ParseIter<'_>, start: usize) -> Result<CFormatType, CFormatError> {
    use CFloatType::*;
    use CNumberType::*;
    let (index, c) = iter.next().ok_or(CFormatError {
        typ: CFormatErrorType::IncompleteFormat,
        index: start,
    })?;
    let format_type = match c {
        'd' => CFormatType::Number(DecimalD),
        'i' => CFormatType::Number(DecimalI),
        'u' => CFormatType::Number(DecimalU),
        'o' => CFormatType::Number(Octal),
        'x' => CFormatType::Number(HexLower),
        'X' => CFormatType::Number(HexUpper),
        'e' => CFormatType::Float(ExponentLower),
        'E' => CFormatType::Float(ExponentUpper),
        'f' => CFormatType::Float(PointDecimalLower),
        'F' => CFormatType::Float(PointDecimalUpper),
        'g' => CFormatType::Float(GeneralLower),
        'G' => CFormatType::Float(GeneralUpper),
        'c' => CFormatType::Character,
        's' => CFormatType::String,
        'q' => CFormatType::Quoted,
        _ => {
            return Err(CFormatError {
                typ: CFormatErrorType::UnsupportedFormatChar(c),
                index,
            });
        }
    };
    Ok(format_type)
}

impl std::str::FromStr for CFormatString {
    type Err = CFormatError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut iter = text.char_indices().peekable();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut literal_start = 0;
        while let Some((index, c)) = iter.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if iter.next_if(|(_, c)| *c == '%').is_some() {
                literal.push('%');
                continue;
            }
            if !literal.is_empty() {
                parts.push((literal_start, CFormatPart::Literal(std::mem::take(&mut literal))));
            }
            let flags = parse_flags(&mut iter);
            let min_field_width = parse_quantity(&mut iter)?;
            let precision = parse_precision(&mut iter)?;
            let format_type = parse_format_type(&mut iter, index)?;
            parts.push((
                index,
                CFormatPart::Spec(CFormatSpec {
                    flags,
                    min_field_width,
                    precision,
                    format_type,
                }),
            ));
            literal_start = iter.peek().map_or(text.len(), |&(index, _)| index);
        }
        if !literal.is_empty() {
            parts.push((literal_start, CFormatPart::Literal(literal)));
        }
        Ok(Self { parts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(text: &str) -> CFormatSpec {
        let format: CFormatString = text.parse().unwrap();
        match format.iter().next() {
            Some((_, CFormatPart::Spec(spec))) => *spec,
            other => panic!("expected a spec, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_parts() {
        let format: CFormatString = "x=%5.2f, %% done %s".parse().unwrap();
        assert_eq!(format.specifier_count(), 2);
        let parts = format.iter().map(|(index, _)| *index).collect::<Vec<_>>();
        assert_eq!(parts, vec![0, 2, 7, 17]);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(spec("%5d").format_number(-42), "  -42");
        assert_eq!(spec("%-5d|").format_number(42), "42   ");
        assert_eq!(spec("%05d").format_number(-42), "-0042");
        assert_eq!(spec("%+d").format_number(7), "+7");
        assert_eq!(spec("%.3d").format_number(7), "007");
        assert_eq!(spec("%x").format_number(255), "ff");
        assert_eq!(spec("%#X").format_number(255), "0XFF");
        assert_eq!(spec("%x").format_number(-1), "ffffffffffffffff");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(spec("%.2f").format_float(3.14159), "3.14");
        assert_eq!(spec("%8.3f").format_float(-1.5), "  -1.500");
        assert_eq!(spec("%e").format_float(12345.678), "1.234568e+04");
        assert_eq!(spec("%g").format_float(0.5), "0.5");
        assert_eq!(spec("%010.1f").format_float(-2.5), "-0000002.5");
    }

    #[test]
    fn test_format_string() {
        assert_eq!(spec("%5s").format_string("ab".to_owned()), "   ab");
        assert_eq!(spec("%.1s").format_string("ab".to_owned()), "a");
        assert_eq!(spec("%-3c").format_char('z'), "z  ");
    }

    #[test]
    fn test_errors() {
        let err = "%y".parse::<CFormatString>().unwrap_err();
        assert_eq!(err.typ, CFormatErrorType::UnsupportedFormatChar('y'));
        let err = "abc%".parse::<CFormatString>().unwrap_err();
        assert_eq!(err.typ, CFormatErrorType::IncompleteFormat);
        let err = "%100d".parse::<CFormatString>().unwrap_err();
        assert_eq!(err.typ, CFormatErrorType::IntTooBig);
    }
}
