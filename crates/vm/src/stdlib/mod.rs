//! Standard library, registered into every new interpreter.

mod apr;
pub mod builtins;
mod debug;
mod io;
mod math;
mod os;
mod package;
mod pattern;
mod string;
mod table;
pub mod thread;
pub mod thread_queue;

use crate::{
    VirtualMachine,
    value::{NativeFn, TableRef, Value},
};

type ModuleMaker = fn(&VirtualMachine) -> TableRef;

/// Libraries installed as globals and in `package.loaded`, in
/// initialization order.
const MODULES: &[(&str, ModuleMaker)] = &[
    ("package", package::make_module),
    ("string", string::make_module),
    ("table", table::make_module),
    ("math", math::make_module),
    ("os", os::make_module),
    ("io", io::make_module),
    ("debug", debug::make_module),
    ("apr", apr::make_module),
];

pub(crate) fn init(vm: &VirtualMachine) {
    builtins::init(vm);
    for (name, make_module) in MODULES {
        let module = make_module(vm);
        vm.set_global(name, module);
    }
    let loaded = package::loaded(vm);
    loaded.set_str("_G", Value::Table(vm.globals.clone()));
    for (name, _) in MODULES {
        loaded.set_str(name, vm.get_global(name));
    }
}

/// Fill `module` with native functions.
pub(crate) fn add_functions(module: &TableRef, functions: &[(&'static str, NativeFn)]) {
    for &(name, func) in functions {
        module.set_str(name, Value::native(name, func));
    }
}

/// A new module table holding `functions`.
pub(crate) fn new_module(vm: &VirtualMachine, functions: &[(&'static str, NativeFn)]) -> TableRef {
    let module = vm.new_table();
    add_functions(&module, functions);
    module
}
