//! Bounded FIFO queues of serialized tuples, shared between interpreters.

use crate::{
    VirtualMachine,
    exceptions::{Exception, ScriptResult},
    function::FuncArgs,
    marshal::{self, Payload, SharedObject},
    value::{NativeFn, UserData, Value},
};
use lunapr_common::lock::{Condvar, SharedMutex, SharedMutexGuard};
use std::{any::Any, cell::RefCell, collections::VecDeque, rc::Rc, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A blocked operation was woken by [`ThreadQueue::interrupt`].
    #[error("Interrupted system call")]
    Interrupted,
    /// A non-blocking operation found the queue full or empty.
    #[error("Resource temporarily unavailable")]
    WouldBlock,
    /// The queue has been terminated.
    #[error("End of file found")]
    Terminated,
}

impl QueueError {
    /// The short code scripts receive as third return value.
    pub fn code(self) -> &'static str {
        match self {
            Self::Interrupted => "EINTR",
            Self::WouldBlock => "EAGAIN",
            Self::Terminated => "EOF",
        }
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Payload>,
    terminated: bool,
    /// Bumped by every interrupt, so waiters can tell a wakeup caused by one.
    interrupts: u64,
}

pub struct ThreadQueue {
    state: SharedMutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ThreadQueue {
    /// A queue holding at most `capacity` tuples; a zero capacity is
    /// raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: SharedMutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(64)),
                ..Default::default()
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Wait on `condvar` until `ready` holds. Termination and interrupts end
    /// the wait early.
    fn wait_until(
        &self,
        state: &mut SharedMutexGuard<'_, QueueState>,
        condvar: &Condvar,
        ready: impl Fn(&QueueState) -> bool,
    ) -> Result<(), QueueError> {
        let generation = state.interrupts;
        loop {
            if state.terminated {
                return Err(QueueError::Terminated);
            }
            if ready(&**state) {
                return Ok(());
            }
            if state.interrupts != generation {
                return Err(QueueError::Interrupted);
            }
            condvar.wait(state);
        }
    }

    fn enqueue(&self, mut state: SharedMutexGuard<'_, QueueState>, payload: Payload) {
        state.items.push_back(payload);
        drop(state);
        self.not_empty.notify_one();
    }

    fn dequeue(&self, mut state: SharedMutexGuard<'_, QueueState>) -> Result<Payload, QueueError> {
        let payload = state.items.pop_front().ok_or(QueueError::WouldBlock)?;
        drop(state);
        self.not_full.notify_one();
        Ok(payload)
    }

    /// Append a tuple, blocking while the queue is full.
    pub fn push(&self, payload: Payload) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        self.wait_until(&mut state, &self.not_full, |s| s.items.len() < self.capacity)?;
        self.enqueue(state, payload);
        Ok(())
    }

    pub fn try_push(&self, payload: Payload) -> Result<(), QueueError> {
        let state = self.state.lock();
        if state.terminated {
            return Err(QueueError::Terminated);
        }
        if state.items.len() >= self.capacity {
            return Err(QueueError::WouldBlock);
        }
        self.enqueue(state, payload);
        Ok(())
    }

    /// Remove the oldest tuple, blocking while the queue is empty.
    pub fn pop(&self) -> Result<Payload, QueueError> {
        let mut state = self.state.lock();
        self.wait_until(&mut state, &self.not_empty, |s| !s.items.is_empty())?;
        self.dequeue(state)
    }

    pub fn try_pop(&self) -> Result<Payload, QueueError> {
        let state = self.state.lock();
        if state.terminated {
            return Err(QueueError::Terminated);
        }
        self.dequeue(state)
    }

    /// Wake every blocked operation; they fail with [`QueueError::Interrupted`].
    pub fn interrupt(&self) {
        self.state.lock().interrupts += 1;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wake every blocked operation and fail all later ones with
    /// [`QueueError::Terminated`].
    pub fn terminate(&self) {
        {
            let mut state = self.state.lock();
            state.terminated = true;
            state.items.clear();
        }
        debug!("thread queue terminated");
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Script-side reference to a queue. `close` drops the reference early.
pub struct QueueObject {
    queue: RefCell<Option<Arc<ThreadQueue>>>,
}

impl QueueObject {
    pub fn new(queue: Arc<ThreadQueue>) -> Self {
        Self {
            queue: RefCell::new(Some(queue)),
        }
    }

    pub fn queue(&self) -> Option<Arc<ThreadQueue>> {
        self.queue.borrow().clone()
    }
}

static QUEUE_METHODS: &[(&str, NativeFn)] = &[
    ("push", queue_push),
    ("pop", queue_pop),
    ("trypush", queue_trypush),
    ("trypop", queue_trypop),
    ("interrupt", queue_interrupt),
    ("terminate", queue_terminate),
    ("close", queue_close),
];

impl UserData for QueueObject {
    fn type_name(&self) -> &'static str {
        "thread queue"
    }

    fn to_display(&self) -> String {
        match &*self.queue.borrow() {
            Some(queue) => format!("thread queue ({:p})", Arc::as_ptr(queue)),
            None => "thread queue (closed)".to_owned(),
        }
    }

    fn methods(&self) -> &'static [(&'static str, NativeFn)] {
        QUEUE_METHODS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_shared(&self) -> Option<SharedObject> {
        self.queue().map(SharedObject::Queue)
    }
}

fn check_queue(vm: &VirtualMachine, args: &FuncArgs) -> ScriptResult<Arc<ThreadQueue>> {
    args.check_userdata::<QueueObject>(vm, 0, "thread queue")?
        .queue()
        .ok_or_else(|| vm.new_runtime_error("attempt to use a closed thread queue"))
}

/// `nil, message, code` on failure.
fn queue_result(result: Result<Vec<Value>, QueueError>) -> Vec<Value> {
    match result {
        Ok(values) => values,
        Err(err) => vec![Value::Nil, Value::from(err.to_string()), Value::from(err.code())],
    }
}

fn marshal_error(vm: &VirtualMachine, err: marshal::MarshalError) -> Exception {
    vm.new_runtime_error(err.to_string())
}

fn push_with(
    vm: &VirtualMachine,
    args: FuncArgs,
    push: fn(&ThreadQueue, Payload) -> Result<(), QueueError>,
) -> ScriptResult<Vec<Value>> {
    let queue = check_queue(vm, &args)?;
    let payload = marshal::serialize(args.args.get(1..).unwrap_or_default())
        .map_err(|err| marshal_error(vm, err))?;
    Ok(queue_result(
        push(&queue, payload).map(|()| vec![Value::Boolean(true)]),
    ))
}

fn pop_with(
    vm: &VirtualMachine,
    args: FuncArgs,
    pop: fn(&ThreadQueue) -> Result<Payload, QueueError>,
) -> ScriptResult<Vec<Value>> {
    let queue = check_queue(vm, &args)?;
    match pop(&queue) {
        Ok(payload) => marshal::deserialize(vm, &payload).map_err(|err| marshal_error(vm, err)),
        Err(err) => Ok(queue_result(Err(err))),
    }
}

fn queue_push(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    push_with(vm, args, ThreadQueue::push)
}

fn queue_trypush(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    push_with(vm, args, ThreadQueue::try_push)
}

fn queue_pop(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    pop_with(vm, args, ThreadQueue::pop)
}

fn queue_trypop(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    pop_with(vm, args, ThreadQueue::try_pop)
}

fn queue_interrupt(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    check_queue(vm, &args)?.interrupt();
    Ok(vec![Value::Boolean(true)])
}

fn queue_terminate(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    check_queue(vm, &args)?.terminate();
    Ok(vec![Value::Boolean(true)])
}

fn queue_close(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let object = args.check_userdata::<QueueObject>(vm, 0, "thread queue")?;
    let queue = object.queue.borrow_mut().take();
    drop(queue);
    Ok(vec![Value::Boolean(true)])
}

/// `apr.thread_queue([capacity])`
pub(crate) fn thread_queue(vm: &VirtualMachine, args: FuncArgs) -> ScriptResult<Vec<Value>> {
    let capacity = args.opt_int(vm, 0, 1)?;
    if capacity < 1 {
        return Err(args.arg_error(vm, 0, "capacity must be >= 1"));
    }
    let queue = Arc::new(ThreadQueue::new(capacity as usize));
    Ok(vec![Value::UserData(Rc::new(QueueObject::new(queue)))])
}
