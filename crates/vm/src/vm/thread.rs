use crate::VirtualMachine;
use core::{cell::RefCell, ptr::NonNull};
use std::thread_local;

thread_local! {
    pub(super) static VM_STACK: RefCell<Vec<NonNull<VirtualMachine>>> = Vec::with_capacity(1).into();
}

scoped_tls::scoped_thread_local!(static VM_CURRENT: VirtualMachine);

/// Runs `f` with the virtual machine the current thread entered last.
///
/// # Panics
/// When called outside [`Interpreter::enter`](crate::Interpreter::enter).
pub fn with_current_vm<R>(f: impl FnOnce(&VirtualMachine) -> R) -> R {
    if !VM_CURRENT.is_set() {
        panic!("call with_current_vm() but VM_CURRENT is null");
    }
    VM_CURRENT.with(f)
}

pub fn enter_vm<R>(vm: &VirtualMachine, f: impl FnOnce() -> R) -> R {
    VM_STACK.with(|vms| {
        vms.borrow_mut().push(vm.into());
        scopeguard::defer! { vms.borrow_mut().pop(); }
        VM_CURRENT.set(vm, f)
    })
}

/// How many virtual machines the current thread has entered and not yet left.
pub fn entered_depth() -> usize {
    VM_STACK.with(|vms| vms.borrow().len())
}

/// Native stack that holds a default recursion limit's worth of Python frames, even in
/// unoptimized builds. Platform default thread stacks overflow well before the limit.
pub const INTERPRETER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Runs `f` on a fresh thread with [`INTERPRETER_STACK_SIZE`] bytes of stack and waits for it.
/// The interpreter must be created inside `f`; a panic in `f` resumes on the calling thread.
pub fn run_with_interpreter_stack<R: Send>(f: impl FnOnce() -> R + Send) -> std::io::Result<R> {
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("kython-main".to_owned())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn_scoped(scope, f)?;
        Ok(handle
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
    })
}
