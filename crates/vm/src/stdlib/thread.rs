//! Native threads, each running one function in a fresh interpreter.
//!
//! The function and its arguments are serialized by the spawning
//! interpreter, rebuilt by the worker in its own [`Interpreter`], and the
//! results travel back the same way. A [`ThreadHandle`] that goes away
//! without being joined or detached joins the thread in its `Drop` impl, so
//! a worker never outlives the handle that could still observe it.

use crate::{
    Interpreter, Settings, VirtualMachine,
    exceptions::{ScriptResult, format_exception},
    function::FuncArgs,
    marshal::{self, MarshalError, Payload},
    value::{NativeFn, UserData, Value},
};
use crossbeam_utils::atomic::AtomicCell;
use lunapr_common::lock::SharedMutex;
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

/// Native stack of worker threads; the evaluator recurses once per nested
/// call and expression.
const THREAD_STACK_SIZE: usize = 32 * 1024 * 1024;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Spawned, the worker is still setting up its interpreter.
    Init,
    Running,
    Done,
    Error,
    Detached,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Detached => "detach",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] MarshalError),
    #[error("failed to join thread: {0}")]
    Join(String),
    #[error("{0}")]
    Detach(&'static str),
    #[error("thread has been detached")]
    Detached,
}

/// `package.path`, `package.cpath` and `package.config` of the spawning
/// interpreter; missing values leave the worker's defaults.
#[derive(Debug, Clone, Default)]
pub struct ThreadConfig {
    pub path: Option<String>,
    pub cpath: Option<String>,
    pub config: Option<String>,
}

impl ThreadConfig {
    pub fn from_vm(vm: &VirtualMachine) -> Self {
        let Value::Table(package) = vm.get_global("package") else {
            return Self::default();
        };
        let field = |name: &str| package.get_str(name).as_str().map(str::to_owned);
        Self {
            path: field("path"),
            cpath: field("cpath"),
            config: field("config"),
        }
    }

    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(path) = &self.path {
            settings = settings.with_path(path.as_str());
        }
        if let Some(cpath) = &self.cpath {
            settings = settings.with_cpath(cpath.as_str());
        }
        if let Some(config) = &self.config {
            settings = settings.with_config(config.as_str());
        }
        settings
    }
}

/// What a finished worker left behind: its serialized results, or the
/// error message with traceback.
pub type ThreadOutput = Result<Payload, String>;

#[derive(Default)]
struct JoinState {
    handle: Option<thread::JoinHandle<()>>,
    joined: bool,
    /// Number of times the OS thread was actually waited on.
    #[cfg(test)]
    waits: usize,
}

struct ThreadInner {
    id: u64,
    status: AtomicCell<ThreadStatus>,
    input: SharedMutex<Option<Payload>>,
    output: SharedMutex<Option<ThreadOutput>>,
    config: ThreadConfig,
    join: SharedMutex<JoinState>,
    error_reported: AtomicBool,
}

impl ThreadInner {
    /// Record the outcome of the worker. A detached thread keeps its status.
    fn finish(&self, outcome: ThreadOutput) {
        let status = match &outcome {
            Ok(_) => ThreadStatus::Done,
            Err(message) => {
                debug!("thread {} failed: {message}", self.id);
                ThreadStatus::Error
            }
        };
        *self.output.lock() = Some(outcome);
        let _ = self
            .status
            .fetch_update(|current| (current != ThreadStatus::Detached).then_some(status));
        self.report_detached_error();
    }

    /// Nobody can collect the error of a detached thread, so it is logged,
    /// once.
    fn report_detached_error(&self) {
        if self.status.load() != ThreadStatus::Detached {
            return;
        }
        let message = match &*self.output.lock() {
            Some(Err(message)) => message.clone(),
            _ => return,
        };
        if !self.error_reported.swap(true, Ordering::AcqRel) {
            report_error(self.id, &message);
        }
    }
}

fn report_error(id: u64, message: &str) {
    error!("error in thread {id}: {message}");
    eprintln!("lunapr: error in thread {id}: {message}");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Supervisor side of a native thread.
pub struct ThreadHandle {
    inner: Arc<ThreadInner>,
}

impl ThreadHandle {
    /// Run `callable(args...)` on a new thread. `callable` is a function or
    /// the source text of a chunk receiving the arguments as `...`.
    pub fn spawn(
        vm: &VirtualMachine,
        callable: &Value,
        args: &[Value],
    ) -> Result<Self, ThreadError> {
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(callable.clone());
        values.extend_from_slice(args);
        let input = marshal::serialize(&values)?;
        Self::spawn_payload(input, ThreadConfig::from_vm(vm))
    }

    /// Spawn from an already serialized `{callable, args...}` tuple.
    pub fn spawn_payload(input: Payload, config: ThreadConfig) -> Result<Self, ThreadError> {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(ThreadInner {
            id,
            status: AtomicCell::new(ThreadStatus::Init),
            input: SharedMutex::new(Some(input)),
            output: SharedMutex::new(None),
            config,
            join: SharedMutex::default(),
            error_reported: AtomicBool::new(false),
        });
        let worker = inner.clone();
        let handle = thread::Builder::new()
            .name(format!("lunapr-thread-{id}"))
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || run_thread(worker))
            .map_err(ThreadError::Spawn)?;
        inner.join.lock().handle = Some(handle);
        debug!("spawned thread {id}");
        Ok(Self { inner })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Non-blocking snapshot of the lifecycle state.
    pub fn status(&self) -> ThreadStatus {
        self.inner.status.load()
    }

    pub fn is_joined(&self) -> bool {
        self.inner.join.lock().joined
    }

    /// Wait for the thread to finish and return its output. Later calls
    /// return the same output without waiting.
    pub fn join(&self) -> Result<ThreadOutput, ThreadError> {
        let mut state = self.inner.join.lock();
        if self.status() == ThreadStatus::Detached {
            return Err(ThreadError::Detached);
        }
        if !state.joined {
            let result = match state.handle.take() {
                Some(handle) => {
                    #[cfg(test)]
                    {
                        state.waits += 1;
                    }
                    handle.join()
                }
                None => Ok(()),
            };
            state.joined = true;
            result.map_err(|panic| ThreadError::Join(panic_message(&*panic)))?;
            trace!("joined thread {}", self.inner.id);
        }
        drop(state);
        let output = self.inner.output.lock().clone();
        Ok(output.unwrap_or_else(|| Err("thread exited without a result".to_owned())))
    }

    /// Let the thread run on its own. Its results can no longer be
    /// retrieved and its error, if any, is only logged.
    pub fn detach(&self) -> Result<(), ThreadError> {
        let mut state = self.inner.join.lock();
        if state.joined {
            return Err(ThreadError::Detach("thread has already been joined"));
        }
        if self.status() == ThreadStatus::Detached {
            return Err(ThreadError::Detach("thread has already been detached"));
        }
        self.inner.status.store(ThreadStatus::Detached);
        drop(state.handle.take());
        drop(state);
        debug!("detached thread {}", self.inner.id);
        self.inner.report_detached_error();
        Ok(())
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if self.status() == ThreadStatus::Detached {
            self.inner.report_detached_error();
            return;
        }
        if self.is_joined() {
            return;
        }
        warn!("joining child thread from finalizer");
        eprintln!("lunapr: joining child thread from finalizer");
        match self.join() {
            Ok(Ok(_)) => {}
            Ok(Err(message)) => report_error(self.inner.id, &message),
            Err(err) => report_error(self.inner.id, &err.to_string()),
        }
    }
}

/// Entry point of the worker thread. Never unwinds.
fn run_thread(inner: Arc<ThreadInner>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(&inner)))
        .unwrap_or_else(|panic| Err(format!("thread panicked: {}", panic_message(&*panic))));
    inner.finish(outcome);
}

fn execute(inner: &ThreadInner) -> ThreadOutput {
    let input = inner
        .input
        .lock()
        .take()
        .ok_or_else(|| "thread input already consumed".to_owned())?;
    let settings = inner.config.apply(Settings::default());
    let interp = panic::catch_unwind(|| Interpreter::new(settings))
        .map_err(|_| "failed to create interpreter".to_owned())?;
    interp.enter(|vm| {
        let mut values = marshal::deserialize(vm, &input)
            .map_err(|err| err.to_string())?
            .into_iter();
        let callable = values.next().unwrap_or_default();
        let args: Vec<Value> = values.collect();
        let func = match &callable {
            Value::String(source) => vm.load(source, source).map_err(|err| err.to_string())?,
            other => other.clone(),
        };
        let _ = inner
            .status
            .compare_exchange(ThreadStatus::Init, ThreadStatus::Running);
        match vm.call(&func, args) {
            Ok(results) => marshal::serialize(&results).map_err(|err| err.to_string()),
            Err(exc) => Err(format_exception(&exc)),
        }
    })
}

/// Give up the rest of the current time slice.
pub fn thread_yield() {
    thread::yield_now();
}

/// Script-side owner of a [`ThreadHandle`].
pub struct ThreadObject {
    handle: ThreadHandle,
}

impl ThreadObject {
    pub fn handle(&self) -> &ThreadHandle {
        &self.handle
    }
}

static THREAD_METHODS: &[(&str, NativeFn)] = &[
    ("join", thread_join),
    ("detach", thread_detach),
    ("status", thread_status),
];

impl UserData for ThreadObject {
    fn type_name(&self) -> &'static str {
        "thread"
    }

    fn to_display(&self) -> String {
        format!("thread ({})", self.handle.status())
    }

    fn methods(&self) -> &'static [(&'static str, NativeFn)] {
        THREAD_METHODS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn failure(message: impl Into<String>) -> Vec<Value> {
    vec![Value::Nil, Value::from(message.into())]
}

fn thread_join(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let object = args.check_userdata::<ThreadObject>(vm, 0, "thread")?;
    match object.handle.join() {
        Ok(Ok(payload)) => {
            let results = marshal::deserialize(vm, &payload)
                .map_err(|err| vm.new_runtime_error(err.to_string()))?;
            let mut values = Vec::with_capacity(results.len() + 1);
            values.push(Value::Boolean(true));
            values.extend(results);
            Ok(values)
        }
        Ok(Err(message)) => Ok(vec![Value::Boolean(false), Value::from(message)]),
        Err(err) => Ok(failure(err.to_string())),
    }
}

fn thread_detach(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let object = args.check_userdata::<ThreadObject>(vm, 0, "thread")?;
    match object.handle.detach() {
        Ok(()) => Ok(vec![Value::Boolean(true)]),
        Err(err) => Ok(failure(err.to_string())),
    }
}

fn thread_status(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let object = args.check_userdata::<ThreadObject>(vm, 0, "thread")?;
    Ok(vec![Value::from(object.handle.status().as_str())])
}

/// `apr.thread(f, ...)`
pub(crate) fn thread(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let callable = args.check_any(vm, 0)?;
    if !matches!(callable, Value::Function(_) | Value::String(_)) {
        return Err(args.arg_error(
            vm,
            0,
            &format!("function or string expected, got {}", callable.type_name()),
        ));
    }
    match ThreadHandle::spawn(vm, &callable, &args.args[1..]) {
        Ok(handle) => Ok(vec![Value::UserData(Rc::new(ThreadObject { handle }))]),
        Err(ThreadError::Serialization(err)) => Err(vm.new_runtime_error(err.to_string())),
        Err(err) => Ok(failure(err.to_string())),
    }
}

/// `apr.thread_yield()`
pub(crate) fn yield_now(_vm: &VirtualMachine, _args: FuncArgs) -> ScriptResult<Vec<Value>> {
    thread_yield();
    Ok(Vec::new())
}

/// `apr.sleep(seconds)`
pub(crate) fn sleep(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let seconds = args.check_f64(vm, 0)?;
    if seconds > 0.0 && seconds.is_finite() {
        thread::sleep(Duration::from_secs_f64(seconds));
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        let names: Vec<_> = [
            ThreadStatus::Init,
            ThreadStatus::Running,
            ThreadStatus::Done,
            ThreadStatus::Error,
            ThreadStatus::Detached,
        ]
        .iter()
        .map(|status| status.to_string())
        .collect();
        assert_eq!(names, ["init", "running", "done", "error", "detach"]);
    }

    #[test]
    fn test_config_follows_package_table() {
        Interpreter::default().enter(|vm| {
            vm.run_source("package.path = 'lib/?.lua'", "=test").unwrap();
            let config = ThreadConfig::from_vm(vm);
            assert_eq!(config.path.as_deref(), Some("lib/?.lua"));
            let settings = config.apply(Settings::default());
            assert_eq!(settings.path, "lib/?.lua");
            assert_eq!(settings.cpath, crate::DEFAULT_CPATH);
        });
    }

    #[test]
    fn test_source_text_receives_arguments() {
        let output = Interpreter::default().enter(|vm| {
            let source = Value::new_str("local a, b = ... return a .. b");
            let handle = ThreadHandle::spawn(vm, &source, &["x".into(), "y".into()]).unwrap();
            handle.join().unwrap()
        });
        let payload = output.unwrap();
        Interpreter::default().enter(|vm| {
            let values = marshal::deserialize(vm, &payload).unwrap();
            assert_eq!(values[0].as_str(), Some("xy"));
        });
    }

    #[test]
    fn test_compile_error_is_output() {
        let output = Interpreter::default().enter(|vm| {
            let handle = ThreadHandle::spawn(vm, &Value::new_str("return +"), &[]).unwrap();
            handle.join().unwrap()
        });
        let message = output.unwrap_err();
        assert!(message.starts_with("[string \"return +\"]:1:"), "{message}");
    }

    #[test]
    fn test_detach_twice() {
        Interpreter::default().enter(|vm| {
            let handle = ThreadHandle::spawn(vm, &Value::new_str("return 1"), &[]).unwrap();
            handle.detach().unwrap();
            assert_eq!(handle.status(), ThreadStatus::Detached);
            assert_eq!(
                handle.detach().unwrap_err().to_string(),
                "thread has already been detached"
            );
            assert!(matches!(handle.join(), Err(ThreadError::Detached)));
        });
    }

    #[test]
    fn test_second_join_does_not_wait_again() {
        Interpreter::default().enter(|vm| {
            let handle = ThreadHandle::spawn(vm, &Value::new_str("return 7"), &[]).unwrap();
            assert!(!handle.is_joined());
            let first = handle.join().unwrap().unwrap();
            assert!(handle.is_joined());
            assert_eq!(handle.inner.join.lock().waits, 1);
            let second = handle.join().unwrap().unwrap();
            assert_eq!(handle.inner.join.lock().waits, 1);
            assert_eq!(first.len(), second.len());
            let values = marshal::deserialize(vm, &second).unwrap();
            assert!(values[0].raw_equals(&Value::Integer(7)));
        });
    }

    #[test]
    fn test_missing_output_is_a_failed_join() {
        let handle = ThreadHandle {
            inner: Arc::new(ThreadInner {
                id: 0,
                status: AtomicCell::new(ThreadStatus::Init),
                input: SharedMutex::new(None),
                output: SharedMutex::new(None),
                config: ThreadConfig::default(),
                join: SharedMutex::default(),
                error_reported: AtomicBool::new(false),
            }),
        };
        assert_eq!(
            handle.join().unwrap().unwrap_err(),
            "thread exited without a result"
        );
        assert!(handle.is_joined());
    }

    #[test]
    fn test_panic_message() {
        let panic = panic::catch_unwind(|| panic!("worker exploded")).unwrap_err();
        assert_eq!(panic_message(&*panic), "worker exploded");
    }
}
