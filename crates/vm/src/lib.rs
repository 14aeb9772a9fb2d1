//! Virtual machine of the lunapr scripting language.
//!
//! Each [`Interpreter`] is an isolated instance with its own globals and
//! standard library. The `apr` library runs functions on native threads,
//! each in a fresh interpreter, moving values between them through
//! [`marshal`].

#[macro_use]
extern crate log;

pub mod exceptions;
pub mod frame;
pub mod function;
pub mod marshal;
pub mod stdlib;
pub mod value;
mod vm;

pub use exceptions::{Exception, ScriptResult};
pub use value::Value;
pub use vm::{
    DEFAULT_CONFIG, DEFAULT_CPATH, DEFAULT_PATH, Interpreter, MAX_CALL_DEPTH, OpError, Settings,
    VirtualMachine, expand_search_path,
};
