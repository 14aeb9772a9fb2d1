//! Call frames and the evaluator that runs a closure's body.

use crate::{
    VirtualMachine,
    exceptions::{Exception, ScriptResult, TraceEntry},
    value::{Closure, Function, UpvalueCell, Value},
    vm::OpError,
};
use lunapr_compiler::{
    FunctionProto,
    ast::{BinOp, Block, Expr, ExprKind, Stmt, StmtKind, TableField, UnaryOp},
    error::short_source,
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

pub type FrameRef = Rc<Frame>;

#[derive(Debug)]
pub enum FrameKind {
    Native(&'static str),
    Script(Rc<FunctionProto>),
}

/// One activation on the call stack.
pub struct Frame {
    pub kind: FrameKind,
    /// Line currently executing, for script frames.
    line: Cell<u32>,
}

impl Frame {
    pub fn native(name: &'static str) -> Self {
        Self {
            kind: FrameKind::Native(name),
            line: Cell::new(0),
        }
    }

    pub fn script(proto: Rc<FunctionProto>) -> Self {
        let line = proto.line;
        Self {
            kind: FrameKind::Script(proto),
            line: Cell::new(line),
        }
    }

    pub fn current_line(&self) -> u32 {
        self.line.get()
    }

    /// `chunk:line:`, the prefix of errors raised while this frame runs.
    pub fn position(&self) -> Option<String> {
        match &self.kind {
            FrameKind::Native(_) => None,
            FrameKind::Script(proto) => Some(format!(
                "{}:{}:",
                short_source(&proto.source_path),
                self.line.get()
            )),
        }
    }

    pub fn trace_entry(&self) -> TraceEntry {
        match &self.kind {
            FrameKind::Native(name) => TraceEntry {
                location: "[C]".to_owned(),
                what: format!("in function '{name}'"),
            },
            FrameKind::Script(proto) => {
                let chunk = short_source(&proto.source_path);
                let what = if proto.is_main_chunk() {
                    "in main chunk".to_owned()
                } else if proto.name.is_empty() {
                    format!("in function <{chunk}:{}>", proto.line)
                } else {
                    format!("in function '{}'", proto.name)
                };
                TraceEntry {
                    location: format!("{chunk}:{}", self.line.get()),
                    what,
                }
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.trace_entry())
    }
}

/// Run `closure` with `args` in `frame`, which the caller has already pushed.
pub(crate) fn run_closure(
    vm: &VirtualMachine,
    closure: &Rc<Closure>,
    frame: &Frame,
    args: Vec<Value>,
) -> ScriptResult<Vec<Value>> {
    let proto = &*closure.proto;
    let mut args = args.into_iter();
    let mut ctx = ExecutionContext {
        vm,
        closure,
        frame,
        locals: Vec::with_capacity(proto.params.len() + 8),
        varargs: Vec::new(),
    };
    for param in &proto.params {
        ctx.declare(param, args.next().unwrap_or_default());
    }
    if proto.is_vararg {
        ctx.varargs = args.collect();
    }
    match ctx.exec_stmts(&proto.body)? {
        Flow::Return(values) => Ok(values),
        Flow::Normal | Flow::Break => Ok(Vec::new()),
    }
}

/// How a statement finished.
enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

/// Where a name resolves to.
enum Var {
    Local(UpvalueCell),
    Upvalue(UpvalueCell),
    Global,
}

/// An assignment target with its object and key already evaluated.
enum Place<'a> {
    Name(&'a str),
    Index(Value, Value, &'a Expr),
}

struct ExecutionContext<'a> {
    vm: &'a VirtualMachine,
    closure: &'a Closure,
    frame: &'a Frame,
    /// Locals in scope, innermost last. Every local lives in its own cell so
    /// closures can capture it.
    locals: Vec<(&'a str, UpvalueCell)>,
    varargs: Vec<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn declare(&mut self, name: &'a str, value: Value) {
        self.locals.push((name, Rc::new(RefCell::new(value))));
    }

    fn resolve(&self, name: &str) -> Var {
        if let Some((_, cell)) = self.locals.iter().rev().find(|(local, _)| *local == name) {
            return Var::Local(cell.clone());
        }
        match self.closure.proto.upvalues.iter().position(|up| up == name) {
            Some(index) => Var::Upvalue(self.closure.upvalues[index].clone()),
            None => Var::Global,
        }
    }

    fn error(&self, msg: impl Into<String>) -> Exception {
        self.vm.new_runtime_error(msg)
    }

    fn op_error(&self, err: OpError, operands: [&Expr; 2]) -> Exception {
        let description = err.operand().and_then(|index| self.describe(operands[index]));
        self.error(err.to_message(description))
    }

    /// What an expression refers to, for error messages.
    fn describe(&self, expr: &Expr) -> Option<String> {
        match &expr.node {
            ExprKind::Name(name) => Some(match self.resolve(name) {
                Var::Local(_) => format!("local '{name}'"),
                Var::Upvalue(_) => format!("upvalue '{name}'"),
                Var::Global => format!("global '{name}'"),
            }),
            ExprKind::Index { key, .. } => match &key.node {
                ExprKind::Str(key) => Some(format!("field '{key}'")),
                _ => None,
            },
            ExprKind::Method { name, .. } => Some(format!("method '{name}'")),
            _ => None,
        }
    }

    fn make_closure(&self, proto: &Rc<FunctionProto>) -> Value {
        let upvalues = proto
            .upvalues
            .iter()
            .map(|name| {
                let cell = match self.resolve(name) {
                    Var::Local(cell) | Var::Upvalue(cell) => cell,
                    Var::Global => Rc::new(RefCell::new(Value::Nil)),
                };
                self.vm.track_cell(&cell);
                cell
            })
            .collect();
        Value::Function(Function::Closure(Rc::new(Closure {
            proto: proto.clone(),
            upvalues,
        })))
    }

    fn exec_block(&mut self, block: &'a Block) -> ScriptResult<Flow> {
        let mark = self.locals.len();
        let flow = self.exec_stmts(block);
        self.locals.truncate(mark);
        flow
    }

    fn exec_stmts(&mut self, stmts: &'a [Stmt]) -> ScriptResult<Flow> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &'a Stmt) -> ScriptResult<Flow> {
        self.frame.line.set(stmt.line);
        match &stmt.node {
            StmtKind::Local { names, values } => {
                let values = self.eval_list(values)?;
                let mut values = values.into_iter();
                for name in names {
                    self.declare(name, values.next().unwrap_or_default());
                }
            }
            StmtKind::Assign { targets, values } => self.assign(targets, values)?,
            StmtKind::Expr(expr) => {
                self.eval_multi(expr)?;
            }
            StmtKind::LocalFunction { name, func } => {
                self.declare(name, Value::Nil);
                let closure = self.make_closure(func);
                if let Some((_, cell)) = self.locals.last() {
                    *cell.borrow_mut() = closure;
                }
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(body);
                }
            }
            StmtKind::While { test, body } => {
                while self.eval(test)?.is_truthy() {
                    match self.exec_block(body)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow => return Ok(flow),
                    }
                }
            }
            StmtKind::Repeat { body, test } => loop {
                let mark = self.locals.len();
                let flow = self.exec_stmts(body)?;
                let done = match flow {
                    Flow::Normal => self.eval(test)?.is_truthy(),
                    Flow::Break => true,
                    Flow::Return(_) => return Ok(flow),
                };
                self.locals.truncate(mark);
                if done {
                    break;
                }
            },
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => return self.numeric_for(var, start, limit, step.as_ref(), body),
            StmtKind::GenericFor { names, exprs, body } => {
                return self.generic_for(names, exprs, body);
            }
            StmtKind::Do(body) => return self.exec_block(body),
            StmtKind::Return(values) => return Ok(Flow::Return(self.eval_list(values)?)),
            StmtKind::Break => return Ok(Flow::Break),
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, targets: &'a [Expr], values: &'a [Expr]) -> ScriptResult<()> {
        let mut places = Vec::with_capacity(targets.len());
        for target in targets {
            let place = match &target.node {
                ExprKind::Name(name) => Place::Name(name),
                ExprKind::Index { object, key } => {
                    Place::Index(self.eval(object)?, self.eval(key)?, object)
                }
                // The parser only produces names and index expressions here.
                _ => return Err(self.error("cannot assign to this expression")),
            };
            places.push(place);
        }
        let mut values = self.eval_list(values)?.into_iter();
        for place in places {
            let value = values.next().unwrap_or_default();
            match place {
                Place::Name(name) => match self.resolve(name) {
                    Var::Local(cell) | Var::Upvalue(cell) => {
                        cell.replace(value);
                    }
                    Var::Global => self.vm.globals.set_str(name, value),
                },
                Place::Index(object, key, object_expr) => self
                    .vm
                    .set_index(&object, key, value)
                    .map_err(|err| self.op_error(err, [object_expr, object_expr]))?,
            }
        }
        Ok(())
    }

    fn for_number(&self, value: Value, what: &str) -> ScriptResult<Value> {
        value
            .to_number()
            .ok_or_else(|| self.error(format!("'for' {what} must be a number")))
    }

    fn numeric_for(
        &mut self,
        var: &'a str,
        start: &'a Expr,
        limit: &'a Expr,
        step: Option<&'a Expr>,
        body: &'a Block,
    ) -> ScriptResult<Flow> {
        let start = self.eval(start)?;
        let start = self.for_number(start, "initial value")?;
        let limit = self.eval(limit)?;
        let limit = self.for_number(limit, "limit")?;
        let step = match step {
            Some(step) => {
                let step = self.eval(step)?;
                self.for_number(step, "step")?
            }
            None => Value::Integer(1),
        };

        if let (Value::Integer(start), Value::Integer(step)) = (&start, &step) {
            let (mut i, step) = (*start, *step);
            if step == 0 {
                return Err(self.error("'for' step is zero"));
            }
            let limit = match limit {
                Value::Integer(limit) => limit,
                other => {
                    let limit = to_f64(&other);
                    if limit.is_nan() {
                        return Ok(Flow::Normal);
                    }
                    clamp_to_int(if step > 0 { limit.floor() } else { limit.ceil() })
                }
            };
            if (step > 0 && i > limit) || (step < 0 && i < limit) {
                return Ok(Flow::Normal);
            }
            loop {
                match self.for_body(var, Value::Integer(i), body)? {
                    Flow::Normal => {}
                    Flow::Break => break,
                    flow => return Ok(flow),
                }
                match i.checked_add(step) {
                    Some(next) if (step > 0 && next <= limit) || (step < 0 && next >= limit) => {
                        i = next;
                    }
                    _ => break,
                }
            }
            return Ok(Flow::Normal);
        }

        let (mut i, limit, step) = (to_f64(&start), to_f64(&limit), to_f64(&step));
        if step == 0.0 {
            return Err(self.error("'for' step is zero"));
        }
        while (step > 0.0 && i <= limit) || (step < 0.0 && i >= limit) {
            match self.for_body(var, Value::Number(i), body)? {
                Flow::Normal => {}
                Flow::Break => break,
                flow => return Ok(flow),
            }
            i += step;
        }
        Ok(Flow::Normal)
    }

    /// One loop iteration with a fresh control variable, so closures created
    /// in the body capture that iteration's value.
    fn for_body(&mut self, var: &'a str, value: Value, body: &'a Block) -> ScriptResult<Flow> {
        let mark = self.locals.len();
        self.declare(var, value);
        let flow = self.exec_block(body);
        self.locals.truncate(mark);
        flow
    }

    fn generic_for(
        &mut self,
        names: &'a [String],
        exprs: &'a [Expr],
        body: &'a Block,
    ) -> ScriptResult<Flow> {
        let mut init = self.eval_list(exprs)?.into_iter();
        let func = init.next().unwrap_or_default();
        let state = init.next().unwrap_or_default();
        let mut control = init.next().unwrap_or_default();
        loop {
            let results = self.call_value(&func, vec![state.clone(), control.clone()], None)?;
            let mut results = results.into_iter();
            let first = results.next().unwrap_or_default();
            if first.is_nil() {
                break;
            }
            control = first.clone();
            let mark = self.locals.len();
            let mut names = names.iter();
            if let Some(name) = names.next() {
                self.declare(name, first);
            }
            for name in names {
                self.declare(name, results.next().unwrap_or_default());
            }
            let flow = self.exec_block(body);
            self.locals.truncate(mark);
            match flow? {
                Flow::Normal => {}
                Flow::Break => break,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn call_value(
        &self,
        func: &Value,
        args: Vec<Value>,
        description: Option<String>,
    ) -> ScriptResult<Vec<Value>> {
        match func {
            Value::Function(function) => self.vm.call_function(function, args),
            other => {
                let suffix = description.map(|d| format!(" ({d})")).unwrap_or_default();
                Err(self.error(format!(
                    "attempt to call a {} value{suffix}",
                    other.type_name()
                )))
            }
        }
    }

    /// Evaluate an expression list, expanding the results of a trailing call
    /// or `...`.
    fn eval_list(&mut self, exprs: &'a [Expr]) -> ScriptResult<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        if let Some((last, init)) = exprs.split_last() {
            for expr in init {
                values.push(self.eval(expr)?);
            }
            if last.node.is_multi() {
                values.extend(self.eval_multi(last)?);
            } else {
                values.push(self.eval(last)?);
            }
        }
        Ok(values)
    }

    /// Evaluate an expression that may produce any number of values.
    fn eval_multi(&mut self, expr: &'a Expr) -> ScriptResult<Vec<Value>> {
        match &expr.node {
            ExprKind::Vararg => Ok(self.varargs.clone()),
            ExprKind::Call { func, args } => {
                let callee = self.eval(func)?;
                let args = self.eval_list(args)?;
                self.frame.line.set(expr.line);
                self.call_value(&callee, args, self.describe(func))
            }
            ExprKind::Method { object, name, args } => {
                let receiver = self.eval(object)?;
                self.frame.line.set(expr.line);
                let method = self
                    .vm
                    .index(&receiver, &Value::new_str(name))
                    .map_err(|err| self.op_error(err, [&**object, &**object]))?;
                let mut call_args = Vec::with_capacity(args.len() + 1);
                call_args.push(receiver);
                call_args.extend(self.eval_list(args)?);
                self.frame.line.set(expr.line);
                self.call_value(&method, call_args, self.describe(expr))
            }
            _ => Ok(vec![self.eval(expr)?]),
        }
    }

    fn eval(&mut self, expr: &'a Expr) -> ScriptResult<Value> {
        let value = match &expr.node {
            ExprKind::Nil => Value::Nil,
            ExprKind::True => Value::Boolean(true),
            ExprKind::False => Value::Boolean(false),
            ExprKind::Int(value) => Value::Integer(*value),
            ExprKind::Float(value) => Value::Number(*value),
            ExprKind::Str(value) => Value::new_str(value),
            ExprKind::Vararg => self.varargs.first().cloned().unwrap_or_default(),
            ExprKind::Function(proto) => self.make_closure(proto),
            ExprKind::Name(name) => match self.resolve(name) {
                Var::Local(cell) | Var::Upvalue(cell) => cell.borrow().clone(),
                Var::Global => self.vm.globals.get_str(name),
            },
            ExprKind::Index { object, key } => {
                let target = self.eval(object)?;
                let key = self.eval(key)?;
                self.frame.line.set(expr.line);
                self.vm
                    .index(&target, &key)
                    .map_err(|err| self.op_error(err, [&**object, &**object]))?
            }
            ExprKind::Call { .. } | ExprKind::Method { .. } => {
                self.eval_multi(expr)?.into_iter().next().unwrap_or_default()
            }
            ExprKind::BinOp { op, left, right } => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                self.frame.line.set(expr.line);
                self.binary(*op, &a, &b)
                    .map_err(|err| self.op_error(err, [&**left, &**right]))?
            }
            ExprKind::UnaryOp { op, operand } => {
                let value = self.eval(operand)?;
                self.frame.line.set(expr.line);
                let result = match op {
                    UnaryOp::Neg => self.vm.negate(&value),
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Len => self.vm.length(&value),
                };
                result.map_err(|err| self.op_error(err, [&**operand, &**operand]))?
            }
            ExprKind::And(left, right) => {
                let value = self.eval(left)?;
                if value.is_truthy() {
                    self.eval(right)?
                } else {
                    value
                }
            }
            ExprKind::Or(left, right) => {
                let value = self.eval(left)?;
                if value.is_truthy() {
                    value
                } else {
                    self.eval(right)?
                }
            }
            ExprKind::Table(fields) => self.table_constructor(fields)?,
            ExprKind::Paren(inner) => self.eval(inner)?,
        };
        Ok(value)
    }

    fn binary(&self, op: BinOp, a: &Value, b: &Value) -> Result<Value, OpError> {
        let vm = self.vm;
        match op {
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::FloorDiv
            | BinOp::Mod
            | BinOp::Pow => vm.arith(op, a, b),
            BinOp::Concat => vm.concat(a, b),
            BinOp::Eq => Ok(Value::Boolean(a.raw_equals(b))),
            BinOp::NotEq => Ok(Value::Boolean(!a.raw_equals(b))),
            BinOp::Lt => vm.less_than(a, b).map(Value::Boolean),
            BinOp::LtE => vm.less_equal(a, b).map(Value::Boolean),
            BinOp::Gt => vm.less_than(b, a).map(Value::Boolean),
            BinOp::GtE => vm.less_equal(b, a).map(Value::Boolean),
        }
    }

    fn table_constructor(&mut self, fields: &'a [TableField]) -> ScriptResult<Value> {
        let table = self.vm.new_table();
        let mut index = 1;
        for (position, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(expr)
                    if position + 1 == fields.len() && expr.node.is_multi() =>
                {
                    for value in self.eval_multi(expr)? {
                        table.set_int(index, value);
                        index += 1;
                    }
                }
                TableField::Positional(expr) => {
                    let value = self.eval(expr)?;
                    table.set_int(index, value);
                    index += 1;
                }
                TableField::Named(name, expr) => {
                    let value = self.eval(expr)?;
                    table.set_str(name, value);
                }
                TableField::Keyed(key, expr) => {
                    let key = self.eval(key)?;
                    let value = self.eval(expr)?;
                    table.set(key, value).map_err(|msg| self.error(msg))?;
                }
            }
        }
        Ok(Value::Table(table))
    }
}

fn to_f64(value: &Value) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

fn clamp_to_int(value: f64) -> i64 {
    if value >= i64::MAX as f64 {
        i64::MAX
    } else if value <= i64::MIN as f64 {
        i64::MIN
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, value::Value};

    fn eval(source: &str) -> Vec<Value> {
        Interpreter::default().enter(|vm| vm.run_source(source, "=test").unwrap())
    }

    fn eval_err(source: &str) -> String {
        Interpreter::default().enter(|vm| vm.run_source(source, "=test").unwrap_err().message())
    }

    #[test]
    fn test_closures_capture_per_iteration() {
        let res = eval(
            "local fs = {}
             for i = 1, 3 do fs[i] = function() return i end end
             return fs[1]() + fs[2]() * 10 + fs[3]() * 100",
        );
        assert!(res[0].raw_equals(&Value::Integer(321)));
    }

    #[test]
    fn test_shared_upvalue() {
        let res = eval(
            "local function counter()
               local n = 0
               return function() n = n + 1 return n end, function() return n end
             end
             local inc, get = counter()
             inc() inc()
             return get()",
        );
        assert!(res[0].raw_equals(&Value::Integer(2)));
    }

    #[test]
    fn test_multiple_results_and_varargs() {
        let res = eval(
            "local function f(...) return select('#', ...), ... end
             local t = {f(1, 2, 3)}
             return #t, (f(1, 2))",
        );
        assert!(res[0].raw_equals(&Value::Integer(4)));
        assert!(res[1].raw_equals(&Value::Integer(2)));
    }

    #[test]
    fn test_loops() {
        let res = eval(
            "local s = 0
             for i = 10, 1, -3 do s = s + i end
             local j = 0
             repeat local k = j j = j + 1 until k >= 4
             local n = 0
             while true do n = n + 1 if n == 7 then break end end
             for x = 1, 2, 0.5 do s = s + x end
             return s, j, n",
        );
        assert!(res[0].raw_equals(&Value::Number(26.5)));
        assert!(res[1].raw_equals(&Value::Integer(5)));
        assert!(res[2].raw_equals(&Value::Integer(7)));
    }

    #[test]
    fn test_generic_for_over_pairs() {
        let res = eval(
            "local t = {a = 1, b = 2, 10, 20}
             local sum = 0
             for k, v in pairs(t) do sum = sum + v end
             local order = ''
             for i, v in ipairs(t) do order = order .. i .. '=' .. v .. ';' end
             return sum, order",
        );
        assert!(res[0].raw_equals(&Value::Integer(33)));
        assert_eq!(res[1].as_str(), Some("1=10;2=20;"));
    }

    #[test]
    fn test_error_descriptions() {
        assert_eq!(
            eval_err("return undefined_fn()"),
            "test:1: attempt to call a nil value (global 'undefined_fn')"
        );
        assert_eq!(
            eval_err("local t = {}\nreturn t.a.b"),
            "test:2: attempt to index a nil value (field 'a')"
        );
        assert_eq!(
            eval_err("local s = 'x'\nreturn s:nope()"),
            "test:2: attempt to call a nil value (method 'nope')"
        );
        assert_eq!(
            eval_err("local x\nreturn 1 + x"),
            "test:2: attempt to perform arithmetic on a nil value (local 'x')"
        );
        assert_eq!(eval_err("for i = 1, 2, 0 do end"), "test:1: 'for' step is zero");
    }

    #[test]
    fn test_traceback_names_functions() {
        Interpreter::default().enter(|vm| {
            let exc = vm
                .run_source("local function inner()\n  error('x')\nend\ninner()", "=t")
                .unwrap_err();
            let lines: Vec<String> = exc.traceback().iter().map(ToString::to_string).collect();
            assert_eq!(
                lines,
                vec![
                    "[C]: in function 'error'",
                    "t:2: in function 'inner'",
                    "t:4: in main chunk",
                ]
            );
        })
    }
}
