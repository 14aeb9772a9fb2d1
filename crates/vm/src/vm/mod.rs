//! The virtual machine: global state of one isolated interpreter.
//!
//! A `VirtualMachine` is confined to the OS thread that created it. Native
//! threads each build their own instance through [`Interpreter`].

mod compile;
mod interpreter;
mod setting;
mod vm_ops;

use crate::{
    exceptions::{Exception, ScriptResult, TraceEntry},
    frame::{self, Frame, FrameRef},
    function::FuncArgs,
    stdlib,
    value::{Function, Table, TableRef, UpvalueCell, Value},
};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

pub use interpreter::Interpreter;
pub use setting::{DEFAULT_CONFIG, DEFAULT_CPATH, DEFAULT_PATH, Settings, expand_search_path};
pub use vm_ops::OpError;

/// Nested calls beyond this depth raise "stack overflow" instead of
/// exhausting the native stack.
pub const MAX_CALL_DEPTH: usize = 200;

/// Top level container of one interpreter: globals, the call stack and the
/// registry used to break reference cycles on teardown.
///
/// To construct this, please refer to the [`Interpreter`]
pub struct VirtualMachine {
    pub globals: TableRef,
    /// Looked up for `s:method()` calls and indexing on string values.
    pub string_lib: TableRef,
    pub settings: Settings,
    pub frames: RefCell<Vec<FrameRef>>,
    heap: RefCell<Heap>,
}

/// Weak references to every table and captured cell, so that cycles can be
/// cut when the interpreter shuts down.
#[derive(Default)]
struct Heap {
    tables: Vec<Weak<Table>>,
    cells: Vec<Weak<RefCell<Value>>>,
    prune_at: usize,
}

impl Heap {
    const MIN_PRUNE: usize = 1024;

    fn maybe_prune(&mut self) {
        let len = self.tables.len() + self.cells.len();
        if len < self.prune_at.max(Self::MIN_PRUNE) {
            return;
        }
        self.tables.retain(|table| table.strong_count() > 0);
        self.cells.retain(|cell| cell.strong_count() > 0);
        self.prune_at = (self.tables.len() + self.cells.len()) * 2;
    }
}

impl VirtualMachine {
    /// Create a new `VirtualMachine` with the standard library loaded.
    fn new(settings: Settings) -> Self {
        let vm = Self {
            globals: Rc::new(Table::default()),
            string_lib: Rc::new(Table::default()),
            settings,
            frames: RefCell::new(Vec::new()),
            heap: RefCell::default(),
        };
        vm.track_table(&vm.globals);
        vm.track_table(&vm.string_lib);
        stdlib::init(&vm);
        vm
    }

    fn track_table(&self, table: &TableRef) {
        let mut heap = self.heap.borrow_mut();
        heap.tables.push(Rc::downgrade(table));
        heap.maybe_prune();
    }

    pub(crate) fn track_cell(&self, cell: &UpvalueCell) {
        let mut heap = self.heap.borrow_mut();
        heap.cells.push(Rc::downgrade(cell));
        heap.maybe_prune();
    }

    pub fn new_table(&self) -> TableRef {
        let table = Rc::new(Table::default());
        self.track_table(&table);
        table
    }

    /// Build a sequence table from `values`.
    pub fn new_list(&self, values: impl IntoIterator<Item = Value>) -> TableRef {
        let table = self.new_table();
        for (index, value) in values.into_iter().enumerate() {
            table.set_int(index as i64 + 1, value);
        }
        table
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get_str(name)
    }

    pub fn set_global(&self, name: &str, value: impl Into<Value>) {
        self.globals.set_str(name, value.into());
    }

    /// Release everything the interpreter still references. Tables and
    /// captured cells are emptied, which drops native objects stuck in
    /// reference cycles and runs their finalizers.
    pub(crate) fn teardown(&self) {
        let heap = std::mem::take(&mut *self.heap.borrow_mut());
        self.frames.borrow_mut().clear();
        // Hold every live table while emptying them, so a long chain of nested
        // tables is released one level at a time instead of recursively.
        let tables: Vec<TableRef> = heap.tables.iter().filter_map(Weak::upgrade).collect();
        for cell in heap.cells.iter().filter_map(Weak::upgrade) {
            let value = cell.replace(Value::Nil);
            drop(value);
        }
        for table in &tables {
            table.clear();
        }
    }

    /// The current call stack, innermost frame first.
    pub fn traceback(&self) -> Vec<TraceEntry> {
        self.frames
            .borrow()
            .iter()
            .rev()
            .map(|frame| frame.trace_entry())
            .collect()
    }

    /// `chunk:line:` of the frame `level` steps from the top of the stack,
    /// 1 being the running function. Native frames have no position.
    pub fn position(&self, level: usize) -> Option<String> {
        let frames = self.frames.borrow();
        let index = frames.len().checked_sub(level)?;
        frames[index].position()
    }

    /// Raise `value` as an error without adding position information.
    pub fn new_error(&self, value: Value) -> Exception {
        Exception::new(value, self.traceback())
    }

    /// A string error prefixed with the position of the innermost running
    /// script function.
    pub fn new_runtime_error(&self, msg: impl Into<String>) -> Exception {
        let msg = msg.into();
        let position = self
            .frames
            .borrow()
            .iter()
            .rev()
            .find_map(|frame| frame.position());
        let msg = match position {
            Some(position) => format!("{position} {msg}"),
            None => msg,
        };
        self.new_error(Value::from(msg))
    }

    pub fn op_error(&self, err: OpError) -> Exception {
        self.new_runtime_error(err.to_message(None))
    }

    /// Call any value with `args`.
    pub fn call(&self, func: &Value, args: Vec<Value>) -> ScriptResult<Vec<Value>> {
        match func {
            Value::Function(function) => self.call_function(function, args),
            other => Err(self.new_runtime_error(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    pub fn call_function(&self, function: &Function, args: Vec<Value>) -> ScriptResult<Vec<Value>> {
        if self.frames.borrow().len() >= MAX_CALL_DEPTH {
            return Err(self.new_runtime_error("stack overflow"));
        }
        match function {
            Function::Native(native) => {
                self.frames
                    .borrow_mut()
                    .push(Rc::new(Frame::native(native.name)));
                scopeguard::defer! {
                    self.frames.borrow_mut().pop();
                }
                (native.func)(self, FuncArgs::new(args, native.name))
            }
            Function::Closure(closure) => {
                let frame = Rc::new(Frame::script(closure.proto.clone()));
                self.frames.borrow_mut().push(frame.clone());
                scopeguard::defer! {
                    self.frames.borrow_mut().pop();
                }
                frame::run_closure(self, closure, &frame, args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_has_position() {
        Interpreter::default().enter(|vm| {
            let exc = vm
                .run_source("local t = nil\nreturn t.x", "=input")
                .unwrap_err();
            assert_eq!(
                exc.message(),
                "input:2: attempt to index a nil value (local 't')"
            );
            assert_eq!(exc.traceback()[0].to_string(), "input:2: in main chunk");
        });
    }

    #[test]
    fn test_stack_overflow() {
        // Deep recursion needs more native stack than the test harness gives.
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                Interpreter::default().enter(|vm| {
                    let exc = vm
                        .run_source("local function f() return f() + 1 end\nreturn f()", "=input")
                        .unwrap_err();
                    exc.message()
                })
            })
            .unwrap();
        assert!(handle.join().unwrap().ends_with("stack overflow"));
    }

    #[test]
    fn test_frames_are_popped_after_errors() {
        Interpreter::default().enter(|vm| {
            let result = vm.run_source("pcall(error, 'x')\nreturn 1", "=input");
            assert!(result.is_ok());
            assert!(vm.frames.borrow().is_empty());
        });
    }
}
