//! Different token definitions.

use std::fmt;

/// Tokens produced by the [`Lexer`](crate::lexer::Lexer).
#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Name { name: String },
    Int { value: i64 },
    Float { value: f64 },
    String { value: String },
    EndOfFile,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    Hash,
    EqEqual,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Equal,
    Lpar,
    Rpar,
    Lbrace,
    Rbrace,
    Lsqb,
    Rsqb,
    Semi,
    Colon,
    Comma,
    Dot,
    DoubleDot,
    Ellipsis,

    // Keywords (alphabetically):
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
}

impl Tok {
    pub fn keyword(name: &str) -> Option<Self> {
        let tok = match name {
            "and" => Self::And,
            "break" => Self::Break,
            "do" => Self::Do,
            "else" => Self::Else,
            "elseif" => Self::Elseif,
            "end" => Self::End,
            "false" => Self::False,
            "for" => Self::For,
            "function" => Self::Function,
            "if" => Self::If,
            "in" => Self::In,
            "local" => Self::Local,
            "nil" => Self::Nil,
            "not" => Self::Not,
            "or" => Self::Or,
            "repeat" => Self::Repeat,
            "return" => Self::Return,
            "then" => Self::Then,
            "true" => Self::True,
            "until" => Self::Until,
            "while" => Self::While,
            _ => return None,
        };
        Some(tok)
    }
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Tok::*;
        match self {
            Name { name } => write!(f, "'{name}'"),
            Int { value } => write!(f, "'{value}'"),
            Float { value } => write!(f, "'{value}'"),
            String { value } => write!(f, "'{value}'"),
            EndOfFile => f.write_str("<eof>"),
            Plus => f.write_str("'+'"),
            Minus => f.write_str("'-'"),
            Star => f.write_str("'*'"),
            Slash => f.write_str("'/'"),
            DoubleSlash => f.write_str("'//'"),
            Percent => f.write_str("'%'"),
            Caret => f.write_str("'^'"),
            Hash => f.write_str("'#'"),
            EqEqual => f.write_str("'=='"),
            NotEqual => f.write_str("'~='"),
            LessEqual => f.write_str("'<='"),
            GreaterEqual => f.write_str("'>='"),
            Less => f.write_str("'<'"),
            Greater => f.write_str("'>'"),
            Equal => f.write_str("'='"),
            Lpar => f.write_str("'('"),
            Rpar => f.write_str("')'"),
            Lbrace => f.write_str("'{'"),
            Rbrace => f.write_str("'}'"),
            Lsqb => f.write_str("'['"),
            Rsqb => f.write_str("']'"),
            Semi => f.write_str("';'"),
            Colon => f.write_str("':'"),
            Comma => f.write_str("','"),
            Dot => f.write_str("'.'"),
            DoubleDot => f.write_str("'..'"),
            Ellipsis => f.write_str("'...'"),
            And => f.write_str("'and'"),
            Break => f.write_str("'break'"),
            Do => f.write_str("'do'"),
            Else => f.write_str("'else'"),
            Elseif => f.write_str("'elseif'"),
            End => f.write_str("'end'"),
            False => f.write_str("'false'"),
            For => f.write_str("'for'"),
            Function => f.write_str("'function'"),
            If => f.write_str("'if'"),
            In => f.write_str("'in'"),
            Local => f.write_str("'local'"),
            Nil => f.write_str("'nil'"),
            Not => f.write_str("'not'"),
            Or => f.write_str("'or'"),
            Repeat => f.write_str("'repeat'"),
            Return => f.write_str("'return'"),
            Then => f.write_str("'then'"),
            True => f.write_str("'true'"),
            Until => f.write_str("'until'"),
            While => f.write_str("'while'"),
        }
    }
}
