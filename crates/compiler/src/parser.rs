//! Recursive descent parser producing the syntax tree in [`crate::ast`].
//!
//! Besides building the tree, the parser tracks which locals are visible in
//! every enclosing function so that each [`FunctionProto`] knows the names it
//! captures from its parents.

use crate::ast::{
    BinOp, Block, Expr, ExprKind, FunctionProto, Stmt, StmtKind, TableField, UnaryOp,
};
use crate::error::{CompileError, ParseErrorType};
use crate::lexer::{Tok, make_tokenizer};
use std::rc::Rc;

const UNARY_PRIORITY: u8 = 8;

/// Left and right binding power of a binary operator.
fn binary_priority(tok: &Tok) -> Option<(BinOpKind, u8, u8)> {
    let entry = match tok {
        Tok::Or => (BinOpKind::Or, 1, 1),
        Tok::And => (BinOpKind::And, 2, 2),
        Tok::Less => (BinOpKind::Op(BinOp::Lt), 3, 3),
        Tok::LessEqual => (BinOpKind::Op(BinOp::LtE), 3, 3),
        Tok::Greater => (BinOpKind::Op(BinOp::Gt), 3, 3),
        Tok::GreaterEqual => (BinOpKind::Op(BinOp::GtE), 3, 3),
        Tok::EqEqual => (BinOpKind::Op(BinOp::Eq), 3, 3),
        Tok::NotEqual => (BinOpKind::Op(BinOp::NotEq), 3, 3),
        Tok::DoubleDot => (BinOpKind::Op(BinOp::Concat), 5, 4),
        Tok::Plus => (BinOpKind::Op(BinOp::Add), 6, 6),
        Tok::Minus => (BinOpKind::Op(BinOp::Sub), 6, 6),
        Tok::Star => (BinOpKind::Op(BinOp::Mul), 7, 7),
        Tok::Slash => (BinOpKind::Op(BinOp::Div), 7, 7),
        Tok::DoubleSlash => (BinOpKind::Op(BinOp::FloorDiv), 7, 7),
        Tok::Percent => (BinOpKind::Op(BinOp::Mod), 7, 7),
        Tok::Caret => (BinOpKind::Op(BinOp::Pow), 10, 9),
        _ => return None,
    };
    Some(entry)
}

#[derive(Clone, Copy)]
enum BinOpKind {
    And,
    Or,
    Op(BinOp),
}

#[derive(Default)]
struct FuncState {
    blocks: Vec<Vec<String>>,
    upvalues: Vec<String>,
    is_vararg: bool,
    loop_depth: usize,
}

impl FuncState {
    fn has_local(&self, name: &str) -> bool {
        self.blocks
            .iter()
            .any(|block| block.iter().any(|local| local == name))
    }

    fn add_upvalue(&mut self, name: &str) {
        if !self.upvalues.iter().any(|upvalue| upvalue == name) {
            self.upvalues.push(name.to_owned());
        }
    }
}

pub struct Parser<'a> {
    tokens: Vec<(u32, Tok)>,
    pos: usize,
    source_path: &'a str,
    funcs: Vec<FuncState>,
}

/// Parse a complete chunk. The result is the vararg main function of the
/// chunk, named after `source_path`.
pub fn parse_program(source: &str, source_path: &str) -> Result<FunctionProto, CompileError> {
    let tokens = make_tokenizer(source, source_path).collect::<Result<Vec<_>, _>>()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_path,
        funcs: Vec::new(),
    };
    parser.main_chunk()
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map_or(&Tok::EndOfFile, |(_, tok)| tok)
    }

    fn peek_nth(&self, n: usize) -> &Tok {
        self.tokens
            .get(self.pos + n)
            .map_or(&Tok::EndOfFile, |(_, tok)| tok)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(line, _)| *line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, error: ParseErrorType) -> CompileError {
        CompileError::new(error, self.source_path, self.line())
    }

    fn expected(&self, what: &str) -> CompileError {
        self.error(ParseErrorType::Expected {
            expected: what.to_owned(),
            found: self.peek().to_string(),
        })
    }

    fn check(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), CompileError> {
        if self.check(&tok) {
            Ok(())
        } else {
            Err(self.expected(&tok.to_string()))
        }
    }

    /// Expect the token closing a construct opened at `line`, mentioning the
    /// opener in the error when it sits on another line.
    fn expect_match(&mut self, what: Tok, who: Tok, line: u32) -> Result<(), CompileError> {
        if self.check(&what) {
            return Ok(());
        }
        if line == self.line() {
            Err(self.expected(&what.to_string()))
        } else {
            Err(self.expected(&format!("{what} (to close {who} at line {line})")))
        }
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        match self.peek() {
            Tok::Name { name } => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.expected("<name>")),
        }
    }

    fn func(&mut self) -> &mut FuncState {
        let last = self.funcs.len() - 1;
        &mut self.funcs[last]
    }

    fn declare_local(&mut self, name: &str) {
        let func = self.func();
        if let Some(block) = func.blocks.last_mut() {
            block.push(name.to_owned());
        }
    }

    /// Record a reference to `name`, turning it into an upvalue of every
    /// function between the one declaring it and the current one.
    fn reference(&mut self, name: &str) {
        let depth = self.funcs.len();
        for level in (0..depth).rev() {
            if self.funcs[level].has_local(name) {
                for inner in &mut self.funcs[level + 1..] {
                    inner.add_upvalue(name);
                }
                return;
            }
        }
    }

    fn main_chunk(&mut self) -> Result<FunctionProto, CompileError> {
        self.funcs.push(FuncState {
            is_vararg: true,
            ..Default::default()
        });
        let body = self.block()?;
        if *self.peek() != Tok::EndOfFile {
            return Err(self.expected("<eof>"));
        }
        let state = self.funcs.pop().unwrap_or_default();
        Ok(FunctionProto {
            name: "main chunk".to_owned(),
            source_path: self.source_path.to_owned(),
            line: 0,
            params: Vec::new(),
            is_vararg: true,
            upvalues: state.upvalues,
            body,
        })
    }

    fn block_follow(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Else | Tok::Elseif | Tok::End | Tok::Until | Tok::EndOfFile
        )
    }

    /// Parse a block in a fresh local scope.
    fn block(&mut self) -> Result<Block, CompileError> {
        self.func().blocks.push(Vec::new());
        let result = self.statements();
        self.func().blocks.pop();
        result
    }

    fn statements(&mut self) -> Result<Block, CompileError> {
        let mut body = Vec::new();
        while !self.block_follow() {
            if self.check(&Tok::Semi) {
                continue;
            }
            if *self.peek() == Tok::Return {
                body.push(self.return_stat()?);
                break;
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn return_stat(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance();
        let values = if self.block_follow() || *self.peek() == Tok::Semi {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.check(&Tok::Semi);
        if !self.block_follow() {
            return Err(self.expected("<eof>"));
        }
        Ok(Stmt {
            line,
            node: StmtKind::Return(values),
        })
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        let node = match self.peek() {
            Tok::If => self.if_stat(line)?,
            Tok::While => {
                self.advance();
                let test = self.expr()?;
                self.expect(Tok::Do)?;
                let body = self.loop_block()?;
                self.expect_match(Tok::End, Tok::While, line)?;
                StmtKind::While { test, body }
            }
            Tok::Do => {
                self.advance();
                let body = self.block()?;
                self.expect_match(Tok::End, Tok::Do, line)?;
                StmtKind::Do(body)
            }
            Tok::For => self.for_stat(line)?,
            Tok::Repeat => {
                self.advance();
                // The condition is evaluated inside the body's scope.
                self.func().blocks.push(Vec::new());
                self.func().loop_depth += 1;
                let body = self.statements();
                self.func().loop_depth -= 1;
                let body = body.and_then(|body| {
                    self.expect_match(Tok::Until, Tok::Repeat, line)?;
                    let test = self.expr()?;
                    Ok(StmtKind::Repeat { body, test })
                });
                self.func().blocks.pop();
                body?
            }
            Tok::Function => self.function_stat(line)?,
            Tok::Local => {
                self.advance();
                if self.check(&Tok::Function) {
                    let name = self.expect_name()?;
                    self.declare_local(&name);
                    let func = self.function_body(name.clone(), false, line)?;
                    StmtKind::LocalFunction {
                        name,
                        func: Rc::new(func),
                    }
                } else {
                    let mut names = vec![self.expect_name()?];
                    while self.check(&Tok::Comma) {
                        names.push(self.expect_name()?);
                    }
                    let values = if self.check(&Tok::Equal) {
                        self.expr_list()?
                    } else {
                        Vec::new()
                    };
                    for name in &names {
                        self.declare_local(name);
                    }
                    StmtKind::Local { names, values }
                }
            }
            Tok::Break => {
                self.advance();
                if self.func().loop_depth == 0 {
                    return Err(self.error(ParseErrorType::BreakOutsideLoop));
                }
                StmtKind::Break
            }
            _ => self.expr_stat()?,
        };
        Ok(Stmt { line, node })
    }

    fn loop_block(&mut self) -> Result<Block, CompileError> {
        self.func().loop_depth += 1;
        let body = self.block();
        self.func().loop_depth -= 1;
        body
    }

    fn if_stat(&mut self, line: u32) -> Result<StmtKind, CompileError> {
        let mut branches = Vec::new();
        let mut orelse = None;
        self.advance();
        loop {
            let test = self.expr()?;
            self.expect(Tok::Then)?;
            let body = self.block()?;
            branches.push((test, body));
            match self.peek() {
                Tok::Elseif => {
                    self.advance();
                }
                Tok::Else => {
                    self.advance();
                    orelse = Some(self.block()?);
                    self.expect_match(Tok::End, Tok::If, line)?;
                    break;
                }
                _ => {
                    self.expect_match(Tok::End, Tok::If, line)?;
                    break;
                }
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn for_stat(&mut self, line: u32) -> Result<StmtKind, CompileError> {
        self.advance();
        let first = self.expect_name()?;
        let node = match self.peek() {
            Tok::Equal => {
                self.advance();
                let start = self.expr()?;
                self.expect(Tok::Comma)?;
                let limit = self.expr()?;
                let step = if self.check(&Tok::Comma) {
                    Some(self.expr()?)
                } else {
                    None
                };
                self.expect(Tok::Do)?;
                let body = self.for_body(std::slice::from_ref(&first))?;
                StmtKind::NumericFor {
                    var: first,
                    start,
                    limit,
                    step,
                    body,
                }
            }
            Tok::Comma | Tok::In => {
                let mut names = vec![first];
                while self.check(&Tok::Comma) {
                    names.push(self.expect_name()?);
                }
                self.expect(Tok::In)?;
                let exprs = self.expr_list()?;
                self.expect(Tok::Do)?;
                let body = self.for_body(&names)?;
                StmtKind::GenericFor { names, exprs, body }
            }
            _ => return Err(self.expected("'=' or 'in'")),
        };
        self.expect_match(Tok::End, Tok::For, line)?;
        Ok(node)
    }

    fn for_body(&mut self, names: &[String]) -> Result<Block, CompileError> {
        self.func().blocks.push(names.to_vec());
        let body = self.loop_block();
        self.func().blocks.pop();
        body
    }

    fn function_stat(&mut self, line: u32) -> Result<StmtKind, CompileError> {
        self.advance();
        let name_line = self.line();
        let first = self.expect_name()?;
        self.reference(&first);
        let mut full_name = first.clone();
        let mut target = Expr {
            line: name_line,
            node: ExprKind::Name(first),
        };
        let mut is_method = false;
        loop {
            let sep = match self.peek() {
                Tok::Dot => '.',
                Tok::Colon => ':',
                _ => break,
            };
            self.advance();
            let key = self.expect_name()?;
            full_name.push(sep);
            full_name.push_str(&key);
            target = Expr {
                line: name_line,
                node: ExprKind::Index {
                    object: Box::new(target),
                    key: Box::new(Expr {
                        line: name_line,
                        node: ExprKind::Str(key),
                    }),
                },
            };
            if sep == ':' {
                is_method = true;
                break;
            }
        }
        let func = self.function_body(full_name, is_method, line)?;
        Ok(StmtKind::Assign {
            targets: vec![target],
            values: vec![Expr {
                line,
                node: ExprKind::Function(Rc::new(func)),
            }],
        })
    }

    /// Parse `(params) body end`; the opening `function` keyword and name have
    /// already been consumed.
    fn function_body(
        &mut self,
        name: String,
        is_method: bool,
        line: u32,
    ) -> Result<FunctionProto, CompileError> {
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_owned());
        }
        let mut is_vararg = false;
        self.expect(Tok::Lpar)?;
        if *self.peek() != Tok::Rpar {
            loop {
                match self.peek() {
                    Tok::Ellipsis => {
                        self.advance();
                        is_vararg = true;
                        break;
                    }
                    Tok::Name { .. } => params.push(self.expect_name()?),
                    _ => return Err(self.expected("<name>")),
                }
                if !self.check(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::Rpar)?;

        self.funcs.push(FuncState {
            blocks: vec![params.clone()],
            is_vararg,
            ..Default::default()
        });
        let body = self.statements();
        let state = self.funcs.pop().unwrap_or_default();
        let body = body?;
        self.expect_match(Tok::End, Tok::Function, line)?;

        Ok(FunctionProto {
            name,
            source_path: self.source_path.to_owned(),
            line,
            params,
            is_vararg,
            upvalues: state.upvalues,
            body,
        })
    }

    fn expr_stat(&mut self) -> Result<StmtKind, CompileError> {
        let first = self.suffixed_expr()?;
        if matches!(self.peek(), Tok::Equal | Tok::Comma) {
            let mut targets = vec![first];
            while self.check(&Tok::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            for target in &targets {
                if !matches!(target.node, ExprKind::Name(_) | ExprKind::Index { .. }) {
                    return Err(self.error(ParseErrorType::InvalidAssignment(
                        self.peek().to_string(),
                    )));
                }
            }
            self.expect(Tok::Equal)?;
            let values = self.expr_list()?;
            Ok(StmtKind::Assign { targets, values })
        } else if matches!(first.node, ExprKind::Call { .. } | ExprKind::Method { .. }) {
            Ok(StmtKind::Expr(first))
        } else {
            Err(self.error(ParseErrorType::InvalidAssignment(self.peek().to_string())))
        }
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut exprs = vec![self.expr()?];
        while self.check(&Tok::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    pub fn expr(&mut self) -> Result<Expr, CompileError> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> Result<Expr, CompileError> {
        let line = self.line();
        let unary = match self.peek() {
            Tok::Not => Some(UnaryOp::Not),
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Hash => Some(UnaryOp::Len),
            _ => None,
        };
        let mut left = match unary {
            Some(op) => {
                self.advance();
                let operand = self.sub_expr(UNARY_PRIORITY)?;
                fold_unary(op, operand, line)
            }
            None => self.simple_expr()?,
        };

        while let Some((kind, left_priority, right_priority)) = binary_priority(self.peek()) {
            if left_priority <= limit {
                break;
            }
            let line = self.line();
            self.advance();
            let right = Box::new(self.sub_expr(right_priority)?);
            let left_box = Box::new(left);
            let node = match kind {
                BinOpKind::And => ExprKind::And(left_box, right),
                BinOpKind::Or => ExprKind::Or(left_box, right),
                BinOpKind::Op(op) => ExprKind::BinOp {
                    op,
                    left: left_box,
                    right,
                },
            };
            left = Expr { line, node };
        }
        Ok(left)
    }

    fn simple_expr(&mut self) -> Result<Expr, CompileError> {
        let line = self.line();
        let node = match self.peek() {
            Tok::Nil => ExprKind::Nil,
            Tok::True => ExprKind::True,
            Tok::False => ExprKind::False,
            Tok::Int { value } => ExprKind::Int(*value),
            Tok::Float { value } => ExprKind::Float(*value),
            Tok::String { value } => ExprKind::Str(value.clone()),
            Tok::Ellipsis => {
                if !self.func().is_vararg {
                    return Err(self.error(ParseErrorType::VarargOutsideFunction));
                }
                ExprKind::Vararg
            }
            Tok::Lbrace => return self.table_constructor(),
            Tok::Function => {
                self.advance();
                let func = self.function_body(String::new(), false, line)?;
                return Ok(Expr {
                    line,
                    node: ExprKind::Function(Rc::new(func)),
                });
            }
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(Expr { line, node })
    }

    fn primary_expr(&mut self) -> Result<Expr, CompileError> {
        let line = self.line();
        match self.peek() {
            Tok::Name { .. } => {
                let name = self.expect_name()?;
                self.reference(&name);
                Ok(Expr {
                    line,
                    node: ExprKind::Name(name),
                })
            }
            Tok::Lpar => {
                self.advance();
                let inner = self.expr()?;
                self.expect_match(Tok::Rpar, Tok::Lpar, line)?;
                Ok(Expr {
                    line,
                    node: ExprKind::Paren(Box::new(inner)),
                })
            }
            other => Err(self.error(ParseErrorType::UnexpectedToken(other.to_string()))),
        }
    }

    fn suffixed_expr(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary_expr()?;
        loop {
            let line = self.line();
            expr = match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let key = self.expect_name()?;
                    Expr {
                        line,
                        node: ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(Expr {
                                line,
                                node: ExprKind::Str(key),
                            }),
                        },
                    }
                }
                Tok::Lsqb => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Tok::Rsqb)?;
                    Expr {
                        line,
                        node: ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(key),
                        },
                    }
                }
                Tok::Colon => {
                    self.advance();
                    let name = self.expect_name()?;
                    let args = self.call_args()?;
                    Expr {
                        line,
                        node: ExprKind::Method {
                            object: Box::new(expr),
                            name,
                            args,
                        },
                    }
                }
                Tok::Lpar | Tok::String { .. } | Tok::Lbrace => {
                    let args = self.call_args()?;
                    Expr {
                        line,
                        node: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                    }
                }
                _ => return Ok(expr),
            };
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let line = self.line();
        match self.peek() {
            Tok::String { value } => {
                let value = value.clone();
                self.advance();
                Ok(vec![Expr {
                    line,
                    node: ExprKind::Str(value),
                }])
            }
            Tok::Lbrace => Ok(vec![self.table_constructor()?]),
            Tok::Lpar => {
                self.advance();
                let args = if *self.peek() == Tok::Rpar {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect_match(Tok::Rpar, Tok::Lpar, line)?;
                Ok(args)
            }
            _ => Err(self.expected("function arguments")),
        }
    }

    fn table_constructor(&mut self) -> Result<Expr, CompileError> {
        let line = self.line();
        self.expect(Tok::Lbrace)?;
        let mut fields = Vec::new();
        while *self.peek() != Tok::Rbrace {
            let field = match (self.peek(), self.peek_nth(1)) {
                (Tok::Name { .. }, Tok::Equal) => {
                    let name = self.expect_name()?;
                    self.advance();
                    TableField::Named(name, self.expr()?)
                }
                (Tok::Lsqb, _) => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Tok::Rsqb)?;
                    self.expect(Tok::Equal)?;
                    TableField::Keyed(key, self.expr()?)
                }
                _ => TableField::Positional(self.expr()?),
            };
            fields.push(field);
            if !self.check(&Tok::Comma) && !self.check(&Tok::Semi) {
                break;
            }
        }
        self.expect_match(Tok::Rbrace, Tok::Lbrace, line)?;
        Ok(Expr {
            line,
            node: ExprKind::Table(fields),
        })
    }
}

/// Negative numeric literals are folded so `-9223372036854775808` stays an
/// integer.
fn fold_unary(op: UnaryOp, operand: Expr, line: u32) -> Expr {
    let node = match (op, &operand.node) {
        (UnaryOp::Neg, ExprKind::Int(value)) => ExprKind::Int(value.wrapping_neg()),
        (UnaryOp::Neg, ExprKind::Float(value)) => ExprKind::Float(-value),
        _ => ExprKind::UnaryOp {
            op,
            operand: Box::new(operand),
        },
    };
    Expr { line, node }
}
