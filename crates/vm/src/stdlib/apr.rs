//! The `apr` library: native threads and thread queues.

use super::{thread, thread_queue};
use crate::{
    VirtualMachine,
    value::{NativeFn, TableRef},
};

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("sleep", thread::sleep),
    ("thread", thread::thread),
    ("thread_queue", thread_queue::thread_queue),
    ("thread_yield", thread::yield_now),
];

pub(crate) fn make_module(vm: &VirtualMachine) -> TableRef {
    super::new_module(vm, FUNCTIONS)
}
