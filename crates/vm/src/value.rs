//! Script values and the table type.
//!
//! Values are `Rc`-based and never leave the interpreter that created them.
//! Anything crossing to another OS thread goes through [`crate::marshal`].

use crate::{VirtualMachine, exceptions::ScriptResult, function::FuncArgs, marshal::SharedObject};
use indexmap::IndexMap;
use lunapr_common::{float_ops, str::ParsedNumber};
use lunapr_compiler::FunctionProto;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

pub type TableRef = Rc<Table>;
pub type UpvalueCell = Rc<RefCell<Value>>;
pub type NativeFn = fn(&VirtualMachine, FuncArgs) -> ScriptResult<Vec<Value>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<str>),
    Table(TableRef),
    Function(Function),
    UserData(Rc<dyn UserData>),
}

#[derive(Clone)]
pub enum Function {
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

impl Function {
    fn addr(&self) -> *const () {
        match self {
            Self::Closure(closure) => Rc::as_ptr(closure) as *const (),
            Self::Native(native) => Rc::as_ptr(native) as *const (),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Closure(closure) => &closure.proto.name,
            Self::Native(native) => native.name,
        }
    }
}

/// A function prototype instantiated with the cells it captured.
pub struct Closure {
    pub proto: Rc<FunctionProto>,
    /// One cell per entry of `proto.upvalues`, in the same order.
    pub upvalues: Vec<UpvalueCell>,
}

pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

/// Native objects exposed to scripts.
pub trait UserData: Any {
    fn type_name(&self) -> &'static str;

    fn to_display(&self) -> String;

    fn methods(&self) -> &'static [(&'static str, NativeFn)];

    fn as_any(&self) -> &dyn Any;

    /// A thread-safe handle to the same object, if it may cross into
    /// another interpreter.
    fn to_shared(&self) -> Option<SharedObject> {
        None
    }

    fn method(&self, name: &str) -> Option<NativeFunction> {
        self.methods()
            .iter()
            .find(|(method_name, _)| *method_name == name)
            .map(|&(name, func)| NativeFunction { name, func })
    }
}

impl Value {
    pub fn new_str(s: &str) -> Self {
        Self::String(Rc::from(s))
    }

    pub fn native(name: &'static str, func: NativeFn) -> Self {
        Self::Function(Function::Native(Rc::new(NativeFunction { name, func })))
    }

    pub fn from_parsed(number: ParsedNumber) -> Self {
        match number {
            ParsedNumber::Int(value) => Self::Integer(value),
            ParsedNumber::Float(value) => Self::Number(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Table(_) => "table",
            Self::Function(_) => "function",
            Self::UserData(_) => "userdata",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value, converting numeric strings the way arithmetic does.
    pub fn to_number(&self) -> Option<Self> {
        match self {
            Self::Integer(_) | Self::Number(_) => Some(self.clone()),
            Self::String(s) => lunapr_common::str::parse_number(s).map(Self::from_parsed),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self.to_number()? {
            Self::Integer(value) => Some(value as f64),
            Self::Number(value) => Some(value),
            _ => None,
        }
    }

    /// Integer value of a number with an exact integer representation.
    pub fn to_integer(&self) -> Option<i64> {
        match self.to_number()? {
            Self::Integer(value) => Some(value),
            Self::Number(value) => float_ops::to_integer(value),
            _ => None,
        }
    }

    /// The string form used by concatenation and string library arguments:
    /// only strings and numbers convert.
    pub fn to_str_coerced(&self) -> Option<Rc<str>> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Integer(_) | Self::Number(_) => Some(Rc::from(self.to_string())),
            _ => None,
        }
    }

    /// Primitive equality: numbers compare by value, everything else that
    /// is reference-counted compares by identity.
    pub fn raw_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Integer(a), Self::Number(b)) | (Self::Number(b), Self::Integer(a)) => {
                *a as f64 == *b && float_ops::to_integer(*b) == Some(*a)
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.addr() == b.addr(),
            (Self::UserData(a), Self::UserData(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }

    pub fn downcast_userdata<T: UserData>(&self) -> Option<&T> {
        match self {
            Self::UserData(data) => data.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::new_str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<TableRef> for Value {
    fn from(value: TableRef) -> Self {
        Self::Table(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => f.write_str(&float_ops::to_string(*n)),
            Self::String(s) => f.write_str(s),
            Self::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Self::Function(func) => match func {
                Function::Closure(_) => write!(f, "function: {:p}", func.addr()),
                Function::Native(_) => write!(f, "function: builtin: {:p}", func.addr()),
            },
            Self::UserData(data) => f.write_str(&data.to_display()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

/// A value usable as a table key: never nil or NaN, and floats with an
/// integral value are stored as integers so `t[1]` and `t[1.0]` agree.
#[derive(Clone)]
pub struct Key(Value);

impl Key {
    pub fn new(value: Value) -> Result<Self, &'static str> {
        match value {
            Value::Nil => Err("table index is nil"),
            Value::Number(n) if n.is_nan() => Err("table index is NaN"),
            Value::Number(n) => Ok(Self(
                float_ops::to_integer(n).map_or(Value::Number(n), Value::Integer),
            )),
            other => Ok(Self(other)),
        }
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.raw_equals(&other.0)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Nil => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Table(t) => Rc::as_ptr(t).hash(state),
            Value::Function(func) => func.addr().hash(state),
            Value::UserData(data) => (Rc::as_ptr(data) as *const ()).hash(state),
        }
    }
}

/// Hash table with insertion-ordered traversal.
///
/// Assigning nil leaves a tombstone so that `next` keeps working while a
/// traversal clears fields; tombstones are compacted when new keys arrive.
#[derive(Default)]
pub struct Table {
    entries: RefCell<IndexMap<Key, Value>>,
    tombstones: Cell<usize>,
    border_hint: Cell<i64>,
}

impl Table {
    pub fn get(&self, key: &Value) -> Value {
        match Key::new(key.clone()) {
            Ok(key) => self.entries.borrow().get(&key).cloned().unwrap_or_default(),
            Err(_) => Value::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.get(&Value::new_str(key))
    }

    pub fn get_int(&self, key: i64) -> Value {
        self.entries
            .borrow()
            .get(&Key(Value::Integer(key)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&self, key: Value, value: Value) -> Result<(), &'static str> {
        let key = Key::new(key)?;
        self.set_key(key, value);
        Ok(())
    }

    pub fn set_str(&self, key: &str, value: Value) {
        self.set_key(Key(Value::new_str(key)), value);
    }

    pub fn set_int(&self, key: i64, value: Value) {
        self.set_key(Key(Value::Integer(key)), value);
    }

    fn set_key(&self, key: Key, value: Value) {
        let mut entries = self.entries.borrow_mut();
        if let Some(slot) = entries.get_mut(&key) {
            match (slot.is_nil(), value.is_nil()) {
                (false, true) => self.tombstones.set(self.tombstones.get() + 1),
                (true, false) => self.tombstones.set(self.tombstones.get() - 1),
                _ => {}
            }
            *slot = value;
            return;
        }
        if value.is_nil() {
            return;
        }
        let tombstones = self.tombstones.get();
        if tombstones > 16 && tombstones * 2 > entries.len() {
            entries.retain(|_, value| !value.is_nil());
            self.tombstones.set(0);
        }
        entries.insert(key, value);
    }

    /// A border of the table: `t[n]` is non-nil and `t[n + 1]` is nil.
    pub fn len(&self) -> i64 {
        let mut n = self.border_hint.get();
        if n > 0 && self.get_int(n).is_nil() {
            while n > 0 && self.get_int(n).is_nil() {
                n -= 1;
            }
        } else {
            while !self.get_int(n + 1).is_nil() {
                n += 1;
            }
        }
        self.border_hint.set(n);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().len() == self.tombstones.get()
    }

    /// The entry following `key` in traversal order, `None` at the end.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, &'static str> {
        let entries = self.entries.borrow();
        let start = if key.is_nil() {
            0
        } else {
            let key = Key::new(key.clone())?;
            entries.get_index_of(&key).ok_or("invalid key to 'next'")? + 1
        };
        let found = (start..entries.len())
            .filter_map(|index| entries.get_index(index))
            .find(|(_, value)| !value.is_nil())
            .map(|(key, value)| (key.0.clone(), value.clone()));
        Ok(found)
    }

    /// Snapshot of the live entries.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.entries
            .borrow()
            .iter()
            .filter(|(_, value)| !value.is_nil())
            .map(|(key, value)| (key.0.clone(), value.clone()))
            .collect()
    }

    /// Drop every entry, releasing references the table holds.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        self.tombstones.set(0);
        self.border_hint.set(0);
        drop(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_keys_normalize() {
        let table = Table::default();
        table.set(Value::Number(1.0), "one".into()).unwrap();
        assert_eq!(table.get_int(1).as_str(), Some("one"));
        assert!(table.set(Value::Nil, Value::Nil).is_err());
        assert!(table.set(Value::Number(f64::NAN), 1.into()).is_err());
    }

    #[test]
    fn test_border() {
        let table = Table::default();
        for i in 1..=5 {
            table.set_int(i, Value::Integer(i * 10));
        }
        assert_eq!(table.len(), 5);
        table.set_int(5, Value::Nil);
        assert_eq!(table.len(), 4);
        table.set_int(5, Value::Integer(1));
        table.set_int(6, Value::Integer(1));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_next_survives_clearing_fields() {
        let table = Table::default();
        table.set_str("a", 1.into());
        table.set_str("b", 2.into());
        table.set_str("c", 3.into());
        let mut seen = Vec::new();
        let mut key = Value::Nil;
        while let Some((k, _)) = table.next(&key).unwrap() {
            table.set(k.clone(), Value::Nil).unwrap();
            seen.push(k.to_string());
            key = k;
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_raw_equals_mixed_numbers() {
        assert!(Value::Integer(3).raw_equals(&Value::Number(3.0)));
        assert!(!Value::Integer(3).raw_equals(&Value::Number(3.5)));
        assert!(!Value::new_str("3").raw_equals(&Value::Integer(3)));
    }
}
