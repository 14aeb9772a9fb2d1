//! This module takes care of lexing source text. This means source code is
//! translated into separate tokens, each tagged with the line it starts on.

pub use super::token::Tok;
use crate::error::{CompileError, ParseErrorType};

pub type Spanned = Result<(u32, Tok), CompileError>;

pub fn make_tokenizer<'a>(
    source: &'a str,
    source_path: &'a str,
) -> Lexer<'a, NewlineHandler<std::str::Chars<'a>>> {
    Lexer::new(NewlineHandler::new(source.chars()), source_path)
}

// The newline handler is an iterator which collapses different newline
// types into \n always.
pub struct NewlineHandler<T: Iterator<Item = char>> {
    source: T,
    chr0: Option<char>,
    chr1: Option<char>,
}

impl<T> NewlineHandler<T>
where
    T: Iterator<Item = char>,
{
    pub fn new(source: T) -> Self {
        let mut nlh = NewlineHandler {
            source,
            chr0: None,
            chr1: None,
        };
        nlh.shift();
        nlh.shift();
        nlh
    }

    fn shift(&mut self) -> Option<char> {
        let result = self.chr0;
        self.chr0 = self.chr1;
        self.chr1 = self.source.next();
        result
    }
}

impl<T> Iterator for NewlineHandler<T>
where
    T: Iterator<Item = char>,
{
    type Item = char;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chr0 == Some('\r') {
            if self.chr1 == Some('\n') {
                // Transform windows EOL into \n
                self.shift();
            } else {
                // Transform MAC EOL into \n
                self.chr0 = Some('\n')
            }
        }
        self.shift()
    }
}

pub struct Lexer<'a, T: Iterator<Item = char>> {
    chars: T,
    chr0: Option<char>,
    chr1: Option<char>,
    line: u32,
    source_path: &'a str,
    done: bool,
}

impl<'a, T> Lexer<'a, T>
where
    T: Iterator<Item = char>,
{
    pub fn new(input: T, source_path: &'a str) -> Self {
        let mut lxr = Lexer {
            chars: input,
            chr0: None,
            chr1: None,
            line: 1,
            source_path,
            done: false,
        };
        lxr.chr0 = lxr.chars.next();
        lxr.chr1 = lxr.chars.next();
        // Skip a shebang line, a script may be directly executable.
        if lxr.chr0 == Some('#') && lxr.chr1 == Some('!') {
            while !matches!(lxr.chr0, Some('\n') | None) {
                lxr.next_char();
            }
        }
        lxr
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chr0;
        self.chr0 = self.chr1;
        self.chr1 = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn error(&self, error: ParseErrorType) -> CompileError {
        CompileError::new(error, self.source_path, self.line)
    }

    fn inner_next(&mut self) -> Spanned {
        loop {
            let Some(c) = self.chr0 else {
                return Ok((self.line, Tok::EndOfFile));
            };
            match c {
                ' ' | '\t' | '\n' | '\x0b' | '\x0c' => {
                    self.next_char();
                }
                '-' if self.chr1 == Some('-') => {
                    self.next_char();
                    self.next_char();
                    self.lex_comment()?;
                }
                _ => break,
            }
        }

        let line = self.line;
        let Some(c) = self.chr0 else {
            return Ok((line, Tok::EndOfFile));
        };
        let tok = match c {
            'a'..='z' | 'A'..='Z' | '_' => self.lex_identifier(),
            '0'..='9' => self.lex_number()?,
            '.' if matches!(self.chr1, Some('0'..='9')) => self.lex_number()?,
            '"' | '\'' => self.lex_string(c)?,
            '[' if matches!(self.chr1, Some('[' | '=')) => match self.long_bracket_level() {
                Some(level) => Tok::String {
                    value: self.lex_long_bracket(level, ParseErrorType::UnterminatedLongString)?,
                },
                None => Tok::Lsqb,
            },
            _ => self.lex_operator(c)?,
        };
        Ok((line, tok))
    }

    fn lex_comment(&mut self) -> Result<(), CompileError> {
        if self.chr0 == Some('[') {
            match self.long_bracket_level() {
                Some(level) if level != usize::MAX => {
                    self.lex_long_bracket(level, ParseErrorType::UnterminatedComment)?;
                    return Ok(());
                }
                _ => {}
            }
        }
        while !matches!(self.chr0, Some('\n') | None) {
            self.next_char();
        }
        Ok(())
    }

    /// Consumes an opening long bracket (`[[`, `[==[`, ...) and returns its
    /// level, or leaves the input after the first `[` when it is not one.
    fn long_bracket_level(&mut self) -> Option<usize> {
        self.next_char();
        let mut level = 0;
        while self.chr0 == Some('=') {
            self.next_char();
            level += 1;
        }
        if self.chr0 == Some('[') {
            self.next_char();
            Some(level)
        } else if level == 0 {
            None
        } else {
            // `[=` without a second bracket is not valid anywhere.
            Some(usize::MAX)
        }
    }

    fn lex_long_bracket(
        &mut self,
        level: usize,
        unterminated: ParseErrorType,
    ) -> Result<String, CompileError> {
        if level == usize::MAX {
            return Err(self.error(ParseErrorType::UnexpectedCharacter('[')));
        }
        // A newline right after the opening bracket is skipped.
        if self.chr0 == Some('\n') {
            self.next_char();
        }
        let mut value = String::new();
        loop {
            match self.next_char() {
                None => return Err(self.error(unterminated)),
                Some(']') => {
                    let mut closing = 0;
                    while self.chr0 == Some('=') {
                        self.next_char();
                        closing += 1;
                    }
                    if closing == level && self.chr0 == Some(']') {
                        self.next_char();
                        return Ok(value);
                    }
                    value.push(']');
                    value.extend(std::iter::repeat_n('=', closing));
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn lex_identifier(&mut self) -> Tok {
        let mut name = String::new();
        while let Some(c @ ('a'..='z' | 'A'..='Z' | '0'..='9' | '_')) = self.chr0 {
            name.push(c);
            self.next_char();
        }
        Tok::keyword(&name).unwrap_or(Tok::Name { name })
    }

    fn lex_number(&mut self) -> Result<Tok, CompileError> {
        let mut text = String::new();
        if self.chr0 == Some('0') && matches!(self.chr1, Some('x' | 'X')) {
            self.next_char();
            self.next_char();
            while let Some(c) = self.chr0.filter(|c| c.is_ascii_alphanumeric()) {
                text.push(c);
                self.next_char();
            }
            return u64::from_str_radix(&text, 16)
                .map(|value| Tok::Int {
                    value: value as i64,
                })
                .map_err(|_| self.error(ParseErrorType::MalformedNumber(format!("0x{text}"))));
        }

        let mut is_float = false;
        loop {
            match self.chr0 {
                Some(c @ '0'..='9') => text.push(c),
                Some('.') => {
                    is_float = true;
                    text.push('.');
                }
                Some(c @ ('e' | 'E')) => {
                    is_float = true;
                    text.push(c);
                    if let Some(sign @ ('+' | '-')) = self.chr1 {
                        self.next_char();
                        text.push(sign);
                    }
                }
                Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                    text.push(c);
                    self.next_char();
                    return Err(self.error(ParseErrorType::MalformedNumber(text)));
                }
                _ => break,
            }
            self.next_char();
        }

        if !is_float {
            if let Ok(value) = text.parse::<i64>() {
                return Ok(Tok::Int { value });
            }
        }
        text.parse::<f64>()
            .map(|value| Tok::Float { value })
            .map_err(|_| self.error(ParseErrorType::MalformedNumber(text)))
    }

    fn lex_string(&mut self, quote: char) -> Result<Tok, CompileError> {
        self.next_char();
        let mut value = String::new();
        loop {
            match self.next_char() {
                None | Some('\n') => return Err(self.error(ParseErrorType::UnterminatedString)),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = self
                        .next_char()
                        .ok_or_else(|| self.error(ParseErrorType::UnterminatedString))?;
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        'a' => value.push('\x07'),
                        'b' => value.push('\x08'),
                        'f' => value.push('\x0c'),
                        'v' => value.push('\x0b'),
                        '\\' | '"' | '\'' | '\n' => value.push(escaped),
                        'x' => {
                            let mut code = 0u32;
                            for _ in 0..2 {
                                let digit = self
                                    .next_char()
                                    .and_then(|c| c.to_digit(16))
                                    .ok_or_else(|| self.error(ParseErrorType::InvalidEscape('x')))?;
                                code = code * 16 + digit;
                            }
                            value.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                        }
                        '0'..='9' => {
                            let mut code = escaped.to_digit(10).unwrap_or(0);
                            for _ in 0..2 {
                                match self.chr0.and_then(|c| c.to_digit(10)) {
                                    Some(digit) => {
                                        code = code * 10 + digit;
                                        self.next_char();
                                    }
                                    None => break,
                                }
                            }
                            if code > 255 {
                                return Err(self.error(ParseErrorType::InvalidEscape(escaped)));
                            }
                            value.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                        }
                        other => return Err(self.error(ParseErrorType::InvalidEscape(other))),
                    }
                }
                Some(c) => value.push(c),
            }
        }
        Ok(Tok::String { value })
    }

    fn lex_operator(&mut self, c: char) -> Result<Tok, CompileError> {
        self.next_char();
        let tok = match c {
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '/' if self.chr0 == Some('/') => {
                self.next_char();
                Tok::DoubleSlash
            }
            '/' => Tok::Slash,
            '%' => Tok::Percent,
            '^' => Tok::Caret,
            '#' => Tok::Hash,
            '=' if self.chr0 == Some('=') => {
                self.next_char();
                Tok::EqEqual
            }
            '=' => Tok::Equal,
            '~' if self.chr0 == Some('=') => {
                self.next_char();
                Tok::NotEqual
            }
            '<' if self.chr0 == Some('=') => {
                self.next_char();
                Tok::LessEqual
            }
            '<' => Tok::Less,
            '>' if self.chr0 == Some('=') => {
                self.next_char();
                Tok::GreaterEqual
            }
            '>' => Tok::Greater,
            '(' => Tok::Lpar,
            ')' => Tok::Rpar,
            '{' => Tok::Lbrace,
            '}' => Tok::Rbrace,
            '[' => Tok::Lsqb,
            ']' => Tok::Rsqb,
            ';' => Tok::Semi,
            ':' => Tok::Colon,
            ',' => Tok::Comma,
            '.' if self.chr0 == Some('.') => {
                self.next_char();
                if self.chr0 == Some('.') {
                    self.next_char();
                    Tok::Ellipsis
                } else {
                    Tok::DoubleDot
                }
            }
            '.' => Tok::Dot,
            other => return Err(self.error(ParseErrorType::UnexpectedCharacter(other))),
        };
        Ok(tok)
    }
}

impl<T> Iterator for Lexer<'_, T>
where
    T: Iterator<Item = char>,
{
    type Item = Spanned;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let token = self.inner_next();
        if matches!(token, Ok((_, Tok::EndOfFile)) | Err(_)) {
            self.done = true;
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_source(source: &str) -> Vec<Tok> {
        make_tokenizer(source, "=test")
            .map(|x| x.unwrap().1)
            .collect()
    }

    #[test]
    fn test_numbers() {
        let tokens = lex_source("3 0x1F 2.5 1e3 9223372036854775808");
        assert_eq!(
            tokens,
            vec![
                Tok::Int { value: 3 },
                Tok::Int { value: 31 },
                Tok::Float { value: 2.5 },
                Tok::Float { value: 1000.0 },
                Tok::Float {
                    value: 9223372036854775808.0
                },
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        let tokens = lex_source("-- line comment\n'a\\tb' --[[ long\ncomment ]] [==[raw]]==]");
        assert_eq!(
            tokens,
            vec![
                Tok::String {
                    value: "a\tb".to_owned()
                },
                Tok::String {
                    value: "raw]".to_owned()
                },
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = lex_source("a..b ... ~= // ==");
        assert_eq!(
            tokens,
            vec![
                Tok::Name {
                    name: "a".to_owned()
                },
                Tok::DoubleDot,
                Tok::Name {
                    name: "b".to_owned()
                },
                Tok::Ellipsis,
                Tok::NotEqual,
                Tok::DoubleSlash,
                Tok::EqEqual,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let lines: Vec<u32> = make_tokenizer("a\nb\n\nc", "=test")
            .map(|x| x.unwrap().0)
            .collect();
        assert_eq!(lines, vec![1, 2, 4, 4]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = make_tokenizer("'abc", "=test")
            .find_map(Result::err)
            .unwrap();
        assert_eq!(err.error, ParseErrorType::UnterminatedString);
        assert!(!err.is_incomplete());
    }
}
