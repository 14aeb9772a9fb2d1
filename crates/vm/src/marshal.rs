//! Moving values between interpreters.
//!
//! A tuple of values is flattened into a [`Graph`] where tables, closures and
//! captured cells are numbered, so sharing and cycles survive the trip. The
//! graph is encoded with bincode and compressed with lz4. Native objects
//! that are safe to share across threads travel next to the bytes as
//! [`SharedObject`]s.

use crate::{
    VirtualMachine,
    stdlib::thread_queue::{QueueObject, ThreadQueue},
    value::{Closure, Function, Table, TableRef, UpvalueCell, Value},
};
use lunapr_compiler::FunctionProto;
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
    sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("cannot serialize {0}")]
    Unsupported(String),
    #[error("serialization failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("corrupt payload: {0}")]
    Decode(String),
    #[error("corrupt payload: {0}")]
    Corrupt(&'static str),
}

/// A native object that may be referenced from several interpreters.
#[derive(Clone)]
pub enum SharedObject {
    Queue(Arc<ThreadQueue>),
}

impl SharedObject {
    /// Wrap the object for use by scripts of the current interpreter.
    pub fn into_value(self) -> Value {
        match self {
            Self::Queue(queue) => Value::UserData(Rc::new(QueueObject::new(queue))),
        }
    }
}

impl fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(queue) => write!(f, "Queue({:p})", Arc::as_ptr(queue)),
        }
    }
}

/// A serialized tuple of values, owned by nobody in particular and safe to
/// send to another thread.
#[derive(Clone, Debug, Default)]
pub struct Payload {
    data: Vec<u8>,
    shared: Vec<SharedObject>,
}

impl Payload {
    /// Size of the encoded bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Table(u32),
    Function(u32),
    Shared(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionNode {
    proto: u32,
    /// Indices into [`Graph::cells`].
    upvalues: Vec<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Graph {
    values: Vec<Node>,
    tables: Vec<Vec<(Node, Node)>>,
    functions: Vec<FunctionNode>,
    protos: Vec<Rc<FunctionProto>>,
    cells: Vec<Node>,
}

/// A table, closure or cell that has an id but whose contents are still to
/// be encoded.
enum Pending {
    Table(TableRef, u32),
    Closure(Rc<Closure>, u32),
    Cell(UpvalueCell, u32),
}

/// Encodes without recursing: nested tables, closures and cells only get an
/// id when first seen and are filled from the `pending` work list, so
/// nesting depth is bounded by memory rather than the native stack.
#[derive(Default)]
struct Encoder {
    graph: Graph,
    shared: Vec<SharedObject>,
    tables: HashMap<*const Table, u32>,
    functions: HashMap<*const Closure, u32>,
    protos: HashMap<*const FunctionProto, u32>,
    cells: HashMap<*const RefCell<Value>, u32>,
    pending: Vec<Pending>,
}

fn index(len: usize) -> u32 {
    len as u32
}

impl Encoder {
    fn encode(&mut self, value: &Value) -> Result<Node, MarshalError> {
        Ok(match value {
            Value::Nil => Node::Nil,
            Value::Boolean(b) => Node::Boolean(*b),
            Value::Integer(i) => Node::Integer(*i),
            Value::Number(n) => Node::Number(*n),
            Value::String(s) => Node::String(s.to_string()),
            Value::Table(table) => Node::Table(self.table_id(table)),
            Value::Function(Function::Closure(closure)) => Node::Function(self.closure_id(closure)),
            Value::Function(Function::Native(native)) => {
                return Err(MarshalError::Unsupported(format!(
                    "native function '{}'",
                    native.name
                )));
            }
            Value::UserData(data) => match data.to_shared() {
                Some(object) => {
                    self.shared.push(object);
                    Node::Shared(index(self.shared.len() - 1))
                }
                None => {
                    return Err(MarshalError::Unsupported(format!(
                        "{} object",
                        data.type_name()
                    )));
                }
            },
        })
    }

    fn table_id(&mut self, table: &TableRef) -> u32 {
        if let Some(&id) = self.tables.get(&Rc::as_ptr(table)) {
            return id;
        }
        let id = index(self.graph.tables.len());
        self.tables.insert(Rc::as_ptr(table), id);
        self.graph.tables.push(Vec::new());
        self.pending.push(Pending::Table(table.clone(), id));
        id
    }

    fn closure_id(&mut self, closure: &Rc<Closure>) -> u32 {
        if let Some(&id) = self.functions.get(&Rc::as_ptr(closure)) {
            return id;
        }
        let proto = match self.protos.get(&Rc::as_ptr(&closure.proto)) {
            Some(&proto) => proto,
            None => {
                let proto = index(self.graph.protos.len());
                self.protos.insert(Rc::as_ptr(&closure.proto), proto);
                self.graph.protos.push(closure.proto.clone());
                proto
            }
        };
        let id = index(self.graph.functions.len());
        self.functions.insert(Rc::as_ptr(closure), id);
        self.graph.functions.push(FunctionNode {
            proto,
            upvalues: Vec::new(),
        });
        self.pending.push(Pending::Closure(closure.clone(), id));
        id
    }

    fn cell_id(&mut self, cell: &UpvalueCell) -> u32 {
        if let Some(&id) = self.cells.get(&Rc::as_ptr(cell)) {
            return id;
        }
        let id = index(self.graph.cells.len());
        self.cells.insert(Rc::as_ptr(cell), id);
        self.graph.cells.push(Node::Nil);
        self.pending.push(Pending::Cell(cell.clone(), id));
        id
    }

    fn fill_pending(&mut self) -> Result<(), MarshalError> {
        while let Some(item) = self.pending.pop() {
            match item {
                Pending::Table(table, id) => {
                    let mut entries = Vec::new();
                    for (key, value) in table.pairs() {
                        entries.push((self.encode(&key)?, self.encode(&value)?));
                    }
                    self.graph.tables[id as usize] = entries;
                }
                Pending::Closure(closure, id) => {
                    let upvalues = closure
                        .upvalues
                        .iter()
                        .map(|cell| self.cell_id(cell))
                        .collect();
                    self.graph.functions[id as usize].upvalues = upvalues;
                }
                Pending::Cell(cell, id) => {
                    let value = cell.borrow().clone();
                    self.graph.cells[id as usize] = self.encode(&value)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize a tuple of values.
pub fn serialize(values: &[Value]) -> Result<Payload, MarshalError> {
    let mut encoder = Encoder::default();
    for value in values {
        let node = encoder.encode(value)?;
        encoder.graph.values.push(node);
    }
    encoder.fill_pending()?;
    let data = bincode::serialize(&encoder.graph)?;
    Ok(Payload {
        data: lz4_flex::compress_prepend_size(&data),
        shared: encoder.shared,
    })
}

struct Decoder<'a> {
    shared: &'a [SharedObject],
    tables: Vec<TableRef>,
    functions: Vec<Value>,
}

impl Decoder<'_> {
    fn decode(&self, node: &Node) -> Result<Value, MarshalError> {
        const DANGLING: MarshalError = MarshalError::Corrupt("dangling reference");
        Ok(match node {
            Node::Nil => Value::Nil,
            Node::Boolean(b) => Value::Boolean(*b),
            Node::Integer(i) => Value::Integer(*i),
            Node::Number(n) => Value::Number(*n),
            Node::String(s) => Value::new_str(s),
            Node::Table(id) => Value::Table(self.tables.get(*id as usize).ok_or(DANGLING)?.clone()),
            Node::Function(id) => self.functions.get(*id as usize).ok_or(DANGLING)?.clone(),
            Node::Shared(id) => self
                .shared
                .get(*id as usize)
                .ok_or(DANGLING)?
                .clone()
                .into_value(),
        })
    }
}

/// Rebuild the values of `payload` inside `vm`.
pub fn deserialize(vm: &VirtualMachine, payload: &Payload) -> Result<Vec<Value>, MarshalError> {
    let data = lz4_flex::decompress_size_prepended(&payload.data)
        .map_err(|err| MarshalError::Decode(err.to_string()))?;
    let graph: Graph =
        bincode::deserialize(&data).map_err(|err| MarshalError::Decode(err.to_string()))?;

    let cells: Vec<UpvalueCell> = graph
        .cells
        .iter()
        .map(|_| {
            let cell = Rc::new(RefCell::new(Value::Nil));
            vm.track_cell(&cell);
            cell
        })
        .collect();
    let mut decoder = Decoder {
        shared: &payload.shared,
        tables: graph.tables.iter().map(|_| vm.new_table()).collect(),
        functions: Vec::with_capacity(graph.functions.len()),
    };
    for function in &graph.functions {
        let proto = graph
            .protos
            .get(function.proto as usize)
            .ok_or(MarshalError::Corrupt("dangling function prototype"))?;
        if proto.upvalues.len() != function.upvalues.len() {
            return Err(MarshalError::Corrupt("upvalue count mismatch"));
        }
        let upvalues = function
            .upvalues
            .iter()
            .map(|&id| cells.get(id as usize).cloned())
            .collect::<Option<Vec<_>>>()
            .ok_or(MarshalError::Corrupt("dangling upvalue"))?;
        let closure = Closure {
            proto: proto.clone(),
            upvalues,
        };
        decoder
            .functions
            .push(Value::Function(Function::Closure(Rc::new(closure))));
    }
    for (cell, node) in cells.iter().zip(&graph.cells) {
        *cell.borrow_mut() = decoder.decode(node)?;
    }
    for (table, entries) in decoder.tables.iter().zip(&graph.tables) {
        for (key, value) in entries {
            table
                .set(decoder.decode(key)?, decoder.decode(value)?)
                .map_err(MarshalError::Corrupt)?;
        }
    }
    graph.values.iter().map(|node| decoder.decode(node)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    fn run(vm: &VirtualMachine, source: &str) -> Vec<Value> {
        vm.run_source(source, "=test").unwrap()
    }

    #[test]
    fn test_mixed_tuple() {
        let payload = Interpreter::default().enter(|vm| {
            serialize(&run(vm, "return 1, 'two', true, nil, 2.5")).unwrap()
        });
        Interpreter::default().enter(|vm| {
            let values = deserialize(vm, &payload).unwrap();
            assert_eq!(values.len(), 5);
            assert!(values[0].raw_equals(&Value::Integer(1)));
            assert_eq!(values[1].as_str(), Some("two"));
            assert!(values[2].raw_equals(&Value::Boolean(true)));
            assert!(values[3].is_nil());
            assert!(values[4].raw_equals(&Value::Number(2.5)));
        });
    }

    #[test]
    fn test_shared_and_cyclic_tables() {
        let payload = Interpreter::default().enter(|vm| {
            serialize(&run(
                vm,
                "local shared = {x = 1}
                 local t = {a = shared, b = shared, list = {1, 2, {3}}}
                 t.self = t
                 return t",
            ))
            .unwrap()
        });
        Interpreter::default().enter(|vm| {
            let values = deserialize(vm, &payload).unwrap();
            vm.set_global("t", values[0].clone());
            let res = run(
                vm,
                "return t.a == t.b, t.self == t, t.list[3][1], t.a.x",
            );
            assert!(res[0].raw_equals(&Value::Boolean(true)));
            assert!(res[1].raw_equals(&Value::Boolean(true)));
            assert!(res[2].raw_equals(&Value::Integer(3)));
            assert!(res[3].raw_equals(&Value::Integer(1)));
        });
    }

    #[test]
    fn test_closures_keep_shared_upvalues() {
        let payload = Interpreter::default().enter(|vm| {
            serialize(&run(
                vm,
                "local n = 10
                 local function inc() n = n + 1 return n end
                 local function get() return n end
                 return inc, get",
            ))
            .unwrap()
        });
        Interpreter::default().enter(|vm| {
            let values = deserialize(vm, &payload).unwrap();
            vm.call(&values[0], vec![]).unwrap();
            let res = vm.call(&values[1], vec![]).unwrap();
            assert!(res[0].raw_equals(&Value::Integer(11)));
        });
    }

    #[test]
    fn test_payload_crosses_threads() {
        let payload = Interpreter::default().enter(|vm| {
            serialize(&run(vm, "return function(a, b) return a * b end")).unwrap()
        });
        let product = std::thread::spawn(move || {
            Interpreter::default().enter(|vm| {
                let values = deserialize(vm, &payload).unwrap();
                let res = vm
                    .call(&values[0], vec![Value::Integer(6), Value::Integer(7)])
                    .unwrap();
                res[0].to_integer()
            })
        })
        .join()
        .unwrap();
        assert_eq!(product, Some(42));
    }

    #[test]
    fn test_deeply_nested_table() {
        let depth = std::thread::Builder::new()
            .stack_size(8 * 1024 * 1024)
            .spawn(|| {
                let payload = Interpreter::default().enter(|vm| {
                    run(vm, "nested = nil for i = 1, 30000 do nested = {nested} end");
                    serialize(&[vm.get_global("nested")]).unwrap()
                });
                Interpreter::default().enter(|vm| {
                    let values = deserialize(vm, &payload).unwrap();
                    vm.set_global("copy", values[0].clone());
                    drop(values);
                    let res = run(
                        vm,
                        "local n, t = 0, copy while t do n = n + 1 t = t[1] end return n",
                    );
                    res[0].to_integer()
                })
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(depth, Some(30_000));
    }

    #[test]
    fn test_native_functions_are_rejected() {
        Interpreter::default().enter(|vm| {
            let err = serialize(&[vm.get_global("print")]).unwrap_err();
            assert_eq!(err.to_string(), "cannot serialize native function 'print'");
            let err = serialize(&run(vm, "return {f = print}")).unwrap_err();
            assert!(matches!(err, MarshalError::Unsupported(_)));
        });
    }

    #[test]
    fn test_corrupt_payload() {
        Interpreter::default().enter(|vm| {
            let payload = Payload {
                data: vec![3, 0, 0, 0, 1, 2, 3],
                shared: Vec::new(),
            };
            assert!(matches!(
                deserialize(vm, &payload),
                Err(MarshalError::Decode(_))
            ));
        });
    }
}
