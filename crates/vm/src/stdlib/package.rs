//! The `package` library and `require`.

use crate::{
    VirtualMachine,
    exceptions::ScriptResult,
    function::FuncArgs,
    value::{NativeFn, TableRef, Value},
};
use std::path::Path;

const FUNCTIONS: &[(&str, NativeFn)] = &[("searchpath", searchpath)];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    let module = super::new_module(vm, FUNCTIONS);
    module.set_str("path", Value::new_str(&vm.settings.path));
    module.set_str("cpath", Value::new_str(&vm.settings.cpath));
    module.set_str("config", Value::new_str(&vm.settings.config));
    module.set_str("loaded", Value::Table(vm.new_table()));
    module.set_str("preload", Value::Table(vm.new_table()));
    module
}

fn package_table(vm: &VirtualMachine) -> TableRef {
    match vm.get_global("package") {
        Value::Table(package) => package,
        _ => {
            let package = vm.new_table();
            vm.set_global("package", package.clone());
            package
        }
    }
}

fn field_table(vm: &VirtualMachine, name: &str) -> TableRef {
    let package = package_table(vm);
    match package.get_str(name) {
        Value::Table(table) => table,
        _ => {
            let table = vm.new_table();
            package.set_str(name, Value::Table(table.clone()));
            table
        }
    }
}

/// `package.loaded`, recreated if a script replaced it.
pub(crate) fn loaded(vm: &VirtualMachine) -> TableRef {
    field_table(vm, "loaded")
}

/// The directory separator from the first line of `package.config`.
fn directory_separator(vm: &VirtualMachine) -> String {
    package_table(vm)
        .get_str("config")
        .as_str()
        .and_then(|config| config.lines().next())
        .unwrap_or("/")
        .to_owned()
}

/// Try each `;`-separated template of `path` with `?` replaced by `name`.
/// Returns the first readable file, or every candidate that was tried.
fn search_path(name: &str, path: &str, separator: &str) -> Result<String, Vec<String>> {
    let name = name.replace('.', separator);
    let mut tried = Vec::new();
    for template in path.split(';').filter(|template| !template.is_empty()) {
        let filename = template.replace('?', &name);
        if Path::new(&filename).is_file() {
            return Ok(filename);
        }
        tried.push(filename);
    }
    Err(tried)
}

fn searchpath(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let name = args.check_str(vm, 0)?;
    let path = args.check_str(vm, 1)?;
    let separator = args.opt_str(vm, 2)?;
    let separator = separator.as_deref().unwrap_or(".");
    let name = if separator.is_empty() {
        name.to_string()
    } else {
        name.replace(separator, ".")
    };
    Ok(match search_path(&name, &path, &directory_separator(vm)) {
        Ok(filename) => vec![Value::from(filename)],
        Err(tried) => {
            let message: String = tried.iter().map(|f| format!("\n\tno file '{f}'")).collect();
            vec![Value::Nil, Value::from(message)]
        }
    })
}

pub(crate) fn require(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let name = args.check_str(vm, 0)?;
    let loaded = loaded(vm);
    let cached = loaded.get_str(&name);
    if cached.is_truthy() {
        return Ok(vec![cached]);
    }

    let (loader, extra) = match field_table(vm, "preload").get_str(&name) {
        preload @ Value::Function(_) => (preload, Value::new_str(":preload:")),
        _ => {
            let path = match package_table(vm).get_str("path") {
                Value::String(path) => path,
                _ => return Err(vm.new_runtime_error("'package.path' must be a string")),
            };
            let filename = match search_path(&name, &path, &directory_separator(vm)) {
                Ok(filename) => filename,
                Err(tried) => {
                    let mut message = format!(
                        "module '{name}' not found:\n\tno field package.preload['{name}']"
                    );
                    for filename in tried {
                        message.push_str(&format!("\n\tno file '{filename}'"));
                    }
                    return Err(vm.new_runtime_error(message));
                }
            };
            debug!("loading module {name} from {filename}");
            let source = std::fs::read_to_string(&filename).map_err(|err| {
                vm.new_runtime_error(format!(
                    "error loading module '{name}' from file '{filename}':\n\t{err}"
                ))
            })?;
            let chunk = vm.load(&source, &format!("@{filename}")).map_err(|err| {
                vm.new_runtime_error(format!(
                    "error loading module '{name}' from file '{filename}':\n\t{err}"
                ))
            })?;
            (chunk, Value::from(filename))
        }
    };

    let result = vm
        .call(&loader, vec![Value::String(name.clone()), extra.clone()])?
        .into_iter()
        .next()
        .unwrap_or_default();
    if !result.is_nil() {
        loaded.set_str(&name, result);
    }
    // A module may have filled its own slot while running.
    let value = match loaded.get_str(&name) {
        Value::Nil => {
            loaded.set_str(&name, Value::Boolean(true));
            Value::Boolean(true)
        }
        value => value,
    };
    Ok(vec![value, extra])
}
