//! The `io` library: files as native objects, plus the standard streams.

use super::os::io_result;
use crate::{
    VirtualMachine,
    exceptions::ScriptResult,
    function::FuncArgs,
    value::{NativeFn, TableRef, UserData, Value},
};
use lunapr_common::str::parse_number;
use std::{
    any::Any,
    cell::RefCell,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write},
    rc::Rc,
};

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("close", io_close),
    ("open", open),
    ("read", io_read),
    ("write", io_write),
];

const FILE_METHODS: &[(&str, NativeFn)] = &[
    ("close", file_close),
    ("flush", file_flush),
    ("lines", file_lines),
    ("read", file_read),
    ("seek", file_seek),
    ("write", file_write),
];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    let module = super::new_module(vm, FUNCTIONS);
    module.set_str("stdin", FileObject::new_value(Stream::Stdin));
    module.set_str("stdout", FileObject::new_value(Stream::Stdout));
    module.set_str("stderr", FileObject::new_value(Stream::Stderr));
    module
}

enum Stream {
    Stdin,
    Stdout,
    Stderr,
    File(BufReader<File>),
}

impl Stream {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdin => Err(io::Error::new(io::ErrorKind::Unsupported, "Bad file descriptor")),
            Self::Stdout => io::stdout().write_all(data),
            Self::Stderr => io::stderr().write_all(data),
            Self::File(reader) => {
                // Drop read-ahead so the write lands at the logical position.
                reader.seek(SeekFrom::Current(0))?;
                reader.get_mut().write_all(data)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdin => Ok(()),
            Self::Stdout => io::stdout().flush(),
            Self::Stderr => io::stderr().flush(),
            Self::File(reader) => reader.get_mut().flush(),
        }
    }

    fn with_reader<R>(&mut self, f: impl FnOnce(&mut dyn BufRead) -> R) -> io::Result<R> {
        match self {
            Self::Stdin => Ok(f(&mut io::stdin().lock())),
            Self::File(reader) => Ok(f(reader)),
            Self::Stdout | Self::Stderr => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Bad file descriptor",
            )),
        }
    }
}

/// An open file, or a closed one whose methods now fail.
pub(crate) struct FileObject {
    stream: RefCell<Option<Stream>>,
    standard: bool,
}

impl FileObject {
    fn new_value(stream: Stream) -> Value {
        let standard = !matches!(stream, Stream::File(_));
        Value::UserData(Rc::new(Self {
            stream: RefCell::new(Some(stream)),
            standard,
        }))
    }
}

impl UserData for FileObject {
    fn type_name(&self) -> &'static str {
        "file"
    }

    fn to_display(&self) -> String {
        if self.stream.borrow().is_some() {
            format!("file ({:p})", self)
        } else {
            "file (closed)".to_owned()
        }
    }

    fn methods(&self) -> &'static [(&'static str, NativeFn)] {
        FILE_METHODS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn check_file<'a>(vm: &VirtualMachine, args: &'a FuncArgs) -> ScriptResult<&'a FileObject> {
    let file = args.check_userdata::<FileObject>(vm, 0, "file")?;
    if file.stream.borrow().is_none() {
        return Err(vm.new_runtime_error("attempt to use a closed file"));
    }
    Ok(file)
}

/// Translate an `fopen` mode string.
fn open_options(mode: &str) -> Option<OpenOptions> {
    let mode = mode.strip_suffix('b').unwrap_or(mode);
    let mut options = OpenOptions::new();
    match mode {
        "r" => options.read(true),
        "w" => options.write(true).create(true).truncate(true),
        "a" => options.append(true).create(true),
        "r+" => options.read(true).write(true),
        "w+" => options.read(true).write(true).create(true).truncate(true),
        "a+" => options.read(true).append(true).create(true),
        _ => return None,
    };
    Some(options)
}

fn open(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let filename = args.check_str(vm, 0)?;
    let mode = args.opt_str(vm, 1)?;
    let options = open_options(mode.as_deref().unwrap_or("r"))
        .ok_or_else(|| args.arg_error(vm, 1, "invalid mode"))?;
    Ok(match options.open(&*filename) {
        Ok(file) => {
            debug!("opened file {filename}");
            vec![FileObject::new_value(Stream::File(BufReader::new(file)))]
        }
        Err(err) => io_result(Some(&*filename), &err),
    })
}

fn write_values(
    vm: &VirtualMachine,
    args: &FuncArgs,
    first: usize,
    stream: &mut Stream,
) -> ScriptResult<io::Result<()>> {
    for i in first..args.len() {
        let text = args.check_str(vm, i)?;
        if let Err(err) = stream.write_all(text.as_bytes()) {
            return Ok(Err(err));
        }
    }
    Ok(Ok(()))
}

fn io_write(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let mut stdout = Stream::Stdout;
    Ok(match write_values(vm, &args, 0, &mut stdout)? {
        Ok(()) => vec![Value::Boolean(true)],
        Err(err) => io_result(None, &err),
    })
}

fn file_write(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let file = check_file(vm, &args)?;
    let mut guard = file.stream.borrow_mut();
    let Some(stream) = guard.as_mut() else {
        return Err(vm.new_runtime_error("attempt to use a closed file"));
    };
    Ok(match write_values(vm, &args, 1, stream)? {
        Ok(()) => vec![args.get(0)],
        Err(err) => io_result(None, &err),
    })
}

enum ReadFormat {
    Line { keep_newline: bool },
    Number,
    All,
    Count(usize),
}

fn parse_format(vm: &VirtualMachine, args: &FuncArgs, index: usize) -> ScriptResult<ReadFormat> {
    if let Value::Integer(n) = args.get(index) {
        return Ok(ReadFormat::Count(n.max(0) as usize));
    }
    let format = args.check_str(vm, index)?;
    match format.trim_start_matches('*').chars().next() {
        Some('l') => Ok(ReadFormat::Line {
            keep_newline: false,
        }),
        Some('L') => Ok(ReadFormat::Line { keep_newline: true }),
        Some('n') => Ok(ReadFormat::Number),
        Some('a') => Ok(ReadFormat::All),
        _ => Err(args.arg_error(vm, index, "invalid format")),
    }
}

fn read_one(reader: &mut dyn BufRead, format: &ReadFormat) -> io::Result<Value> {
    let lossy = |bytes: &[u8]| Value::from(String::from_utf8_lossy(bytes).into_owned());
    match *format {
        ReadFormat::Line { keep_newline } => {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(Value::Nil);
            }
            if !keep_newline && line.last() == Some(&b'\n') {
                line.pop();
            }
            Ok(lossy(&line))
        }
        ReadFormat::Number => {
            let mut line = String::new();
            reader.read_line(&mut line)?;
            Ok(parse_number(&line).map_or(Value::Nil, Value::from_parsed))
        }
        ReadFormat::All => {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            Ok(lossy(&data))
        }
        ReadFormat::Count(count) => {
            let mut data = Vec::with_capacity(count);
            Read::take(&mut *reader, count as u64).read_to_end(&mut data)?;
            if data.is_empty() && count > 0 {
                Ok(Value::Nil)
            } else {
                Ok(lossy(&data))
            }
        }
    }
}

fn read_values(
    vm: &VirtualMachine,
    args: &FuncArgs,
    first: usize,
    stream: &mut Stream,
) -> ScriptResult<Vec<Value>> {
    let formats = if args.len() <= first {
        vec![ReadFormat::Line {
            keep_newline: false,
        }]
    } else {
        (first..args.len())
            .map(|i| parse_format(vm, args, i))
            .collect::<ScriptResult<_>>()?
    };
    let result = stream.with_reader(|reader| {
        let mut values = Vec::with_capacity(formats.len());
        for format in &formats {
            let value = read_one(reader, format)?;
            let done = value.is_nil();
            values.push(value);
            if done {
                break;
            }
        }
        Ok::<_, io::Error>(values)
    });
    Ok(match result.and_then(|inner| inner) {
        Ok(values) => values,
        Err(err) => io_result(None, &err),
    })
}

fn io_read(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    read_values(vm, &args, 0, &mut Stream::Stdin)
}

fn file_read(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let file = check_file(vm, &args)?;
    let mut guard = file.stream.borrow_mut();
    match guard.as_mut() {
        Some(stream) => read_values(vm, &args, 1, stream),
        None => Err(vm.new_runtime_error("attempt to use a closed file")),
    }
}

fn lines_step(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let file = args.check_userdata::<FileObject>(vm, 0, "file")?;
    let mut guard = file.stream.borrow_mut();
    let Some(stream) = guard.as_mut() else {
        return Err(vm.new_runtime_error("file is already closed"));
    };
    let format = ReadFormat::Line {
        keep_newline: false,
    };
    stream
        .with_reader(|reader| read_one(reader, &format))
        .and_then(|inner| inner)
        .map(|line| vec![line])
        .map_err(|err| vm.new_runtime_error(err.to_string()))
}

fn file_lines(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    check_file(vm, &args)?;
    Ok(vec![
        Value::native("lines_step", lines_step),
        args.get(0),
        Value::Nil,
    ])
}

fn file_seek(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let file = check_file(vm, &args)?;
    let whence = args.opt_str(vm, 1)?;
    let offset = args.opt_int(vm, 2, 0)?;
    let target = match whence.as_deref().unwrap_or("cur") {
        "set" => SeekFrom::Start(offset.max(0) as u64),
        "cur" => SeekFrom::Current(offset),
        "end" => SeekFrom::End(offset),
        _ => return Err(args.arg_error(vm, 1, "invalid option")),
    };
    let mut guard = file.stream.borrow_mut();
    let result = match guard.as_mut() {
        Some(Stream::File(reader)) => reader.seek(target),
        _ => Err(io::Error::new(io::ErrorKind::Unsupported, "Illegal seek")),
    };
    Ok(match result {
        Ok(position) => vec![Value::Integer(position as i64)],
        Err(err) => io_result(None, &err),
    })
}

fn file_flush(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let file = check_file(vm, &args)?;
    let mut guard = file.stream.borrow_mut();
    let result = guard.as_mut().map_or(Ok(()), Stream::flush);
    Ok(match result {
        Ok(()) => vec![args.get(0)],
        Err(err) => io_result(None, &err),
    })
}

fn close_file(vm: &VirtualMachine, file: &FileObject) -> ScriptResult<Vec<Value>> {
    if file.standard {
        return Ok(vec![Value::Nil, Value::new_str("cannot close standard file")]);
    }
    let stream = file.stream.borrow_mut().take();
    let Some(mut stream) = stream else {
        return Err(vm.new_runtime_error("attempt to use a closed file"));
    };
    Ok(match stream.flush() {
        Ok(()) => vec![Value::Boolean(true)],
        Err(err) => io_result(None, &err),
    })
}

fn file_close(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let file = args.check_userdata::<FileObject>(vm, 0, "file")?;
    close_file(vm, file)
}

fn io_close(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    if args.is_empty() {
        return Ok(vec![Value::Nil, Value::new_str("cannot close standard file")]);
    }
    file_close(vm, args)
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, value::Value};

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        Interpreter::default().enter(|vm| {
            vm.set_global("path", path.to_string_lossy().into_owned());
            let res = vm
                .run_source(
                    "local f = assert(io.open(path, 'w'))
                     f:write('first line\\n', 42, '\\n', 'rest')
                     f:close()
                     local f = assert(io.open(path))
                     local a, n, b = f:read('l', 'n', 'a')
                     f:close()
                     local lines = {}
                     for line in assert(io.open(path)):lines() do lines[#lines + 1] = line end
                     return a, n, b, #lines, tostring(f)",
                    "=test",
                )
                .unwrap();
            let res: Vec<String> = res.iter().map(ToString::to_string).collect();
            assert_eq!(res, ["first line", "42", "rest", "3", "file (closed)"]);
        });
    }

    #[test]
    fn test_open_failures() {
        Interpreter::default().enter(|vm| {
            let res = vm
                .run_source("return io.open('/nonexistent/dir/file.txt')", "=test")
                .unwrap();
            assert!(res[0].is_nil());
            assert!(res[1].as_str().unwrap().starts_with("/nonexistent/dir/file.txt:"));
            assert!(matches!(res[2], Value::Integer(_)));
            let exc = vm.run_source("io.open('x', 'rw')", "=test").unwrap_err();
            assert_eq!(exc.message(), "test:1: bad argument #2 to 'open' (invalid mode)");
        });
    }

    #[test]
    fn test_closed_file_rejects_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.txt");
        Interpreter::default().enter(|vm| {
            vm.set_global("path", path.to_string_lossy().into_owned());
            let exc = vm
                .run_source(
                    "local f = io.open(path, 'w')
                     f:close()
                     f:read()",
                    "=test",
                )
                .unwrap_err();
            assert_eq!(exc.message(), "test:3: attempt to use a closed file");
            let res = vm.run_source("return io.stdout:close()", "=test").unwrap();
            assert_eq!(res[1].as_str(), Some("cannot close standard file"));
        });
    }
}
