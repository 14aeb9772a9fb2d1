//! This is the `lunapr` binary. If you're looking to embed lunapr into your
//! application, you're likely looking for the [`lunapr_vm`] crate.
//!
//! The binary runs `-e` chunks, then a script file with its arguments, and
//! drops into an interactive shell when no script is given or `-i` is passed.

#[macro_use]
extern crate log;

mod settings;
mod shell;

pub use lunapr_vm;

use lunapr_vm::{ScriptResult, Value, VirtualMachine};
use settings::{RunMode, RunOpts};
use std::{
    io::{IsTerminal, Read},
    process::ExitCode,
};

/// The main cli of the `lunapr` interpreter. Returns the exit code for the
/// process: 0 on success, 1 when an error escaped the script or the command
/// line could not be parsed.
pub fn run() -> ExitCode {
    let (settings, mode) = match settings::parse_opts() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("lunapr: {err}");
            eprint!("{}", settings::USAGE);
            return ExitCode::FAILURE;
        }
    };
    init_logging(settings.verbose);

    let opts = match mode {
        RunMode::Help => {
            print!("{}", settings::USAGE);
            return ExitCode::SUCCESS;
        }
        RunMode::Version => {
            println!("lunapr {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        RunMode::Run(opts) => opts,
    };

    let interp = lunapr_vm::Interpreter::new(settings);
    ExitCode::from(interp.run(|vm| run_lunapr(vm, &opts)))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run_lunapr(vm: &VirtualMachine, opts: &RunOpts) -> ScriptResult<()> {
    for chunk in &opts.chunks {
        debug!("Running command {chunk}");
        vm.run_source(chunk, "=(command line)")?;
    }

    let script_args: Vec<Value> = vm
        .settings
        .argv
        .iter()
        .skip(1)
        .map(|arg| Value::new_str(arg))
        .collect();
    let stdin_is_terminal = std::io::stdin().is_terminal();
    match opts.script.as_deref() {
        Some("-") => run_stdin(vm, script_args)?,
        Some(path) => {
            vm.run_file(path, script_args)?;
        }
        None if opts.chunks.is_empty() && !stdin_is_terminal => run_stdin(vm, script_args)?,
        None => {}
    }

    let interactive = opts.script.is_none() && opts.chunks.is_empty() && stdin_is_terminal;
    if vm.settings.inspect || interactive {
        shell::run_shell(vm);
    }
    Ok(())
}

fn run_stdin(vm: &VirtualMachine, args: Vec<Value>) -> ScriptResult<()> {
    debug!("Running stdin");
    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .map_err(|err| vm.new_error(Value::from(format!("cannot read stdin: {err}"))))?;
    vm.run_chunk(&source, "=stdin", args)?;
    Ok(())
}
