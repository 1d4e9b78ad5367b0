//! The suspend/resume state machine behind generator objects.

use crate::{
    PyObjectRef, PyResult, VirtualMachine,
    builtins::{PyBaseExceptionRef, PyStrRef},
    frame::{ExecutionResult, FrameRef},
    protocol::PyIterReturn,
};
use core::cell::{Cell, RefCell};

impl ExecutionResult {
    /// Turn an ExecutionResult into a PyResult that would be returned from a generator
    fn into_iter_return(self, vm: &VirtualMachine) -> PyIterReturn {
        match self {
            Self::Yield(value) => PyIterReturn::Return(value),
            Self::Return(value) => PyIterReturn::StopIteration(vm.option_if_none(value)),
        }
    }
}

#[derive(Debug)]
pub struct Coro {
    frame: FrameRef,
    closed: Cell<bool>,
    running: Cell<bool>,
    name: RefCell<PyStrRef>,
    qualname: RefCell<PyStrRef>,
    // exc_state: the exception the body was handling when it last yielded
    exception: RefCell<Option<PyBaseExceptionRef>>,
    // what the body returned, handed out again by every later send
    return_value: RefCell<Option<PyObjectRef>>,
}

impl Coro {
    pub fn new(frame: FrameRef, name: PyStrRef, qualname: PyStrRef) -> Self {
        Self {
            frame,
            closed: Cell::new(false),
            running: Cell::new(false),
            name: RefCell::new(name),
            qualname: RefCell::new(qualname),
            exception: RefCell::default(),
            return_value: RefCell::default(),
        }
    }

    fn maybe_close(&self, res: &PyResult<ExecutionResult>, vm: &VirtualMachine) {
        match res {
            Ok(ExecutionResult::Return(value)) => {
                self.closed.set(true);
                *self.return_value.borrow_mut() = vm.option_if_none(value.clone());
            }
            Err(_) => self.closed.set(true),
            Ok(ExecutionResult::Yield(_)) => {}
        }
    }

    fn run_with_context<F>(&self, vm: &VirtualMachine, func: F) -> PyResult<ExecutionResult>
    where
        F: FnOnce(FrameRef) -> PyResult<ExecutionResult>,
    {
        if self.running.replace(true) {
            return Err(vm.new_value_error("generator already executing"));
        }
        scopeguard::defer! { self.running.set(false) }

        let gen_exc = self.exception.borrow_mut().take();
        trace!("resuming generator {}", self.name.borrow().as_str());
        vm.with_frame(self.frame.clone(), |f| {
            // with_frame gave the body an empty exception slot; put back the one it was
            // handling at its last yield
            vm.set_exception(gen_exc);
            let result = func(f);
            *self.exception.borrow_mut() = vm.current_exception();
            result
        })
    }

    /// Resumes the body with `value` as the result of the pending `yield`.
    pub fn send(&self, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
        if self.closed.get() {
            return Ok(PyIterReturn::StopIteration(self.return_value.borrow().clone()));
        }
        let value = if self.frame.lasti() > 0 {
            Some(value)
        } else if !vm.is_none(&value) {
            return Err(vm.new_type_error(
                "can't send non-None value to a just-started generator",
            ));
        } else {
            None
        };
        let result = self.run_with_context(vm, |f| f.resume(value, vm));
        self.maybe_close(&result, vm);
        match result {
            Ok(exec_res) => Ok(exec_res.into_iter_return(vm)),
            Err(e) => Err(self.escaped_stop_iteration(e, vm)),
        }
    }

    /// A StopIteration leaving the body would look like exhaustion to the caller.
    fn escaped_stop_iteration(
        &self,
        e: PyBaseExceptionRef,
        vm: &VirtualMachine,
    ) -> PyBaseExceptionRef {
        if e.fast_isinstance(&vm.ctx.exceptions.stop_iteration) {
            debug!(
                "StopIteration escaped generator {}",
                self.name.borrow().as_str()
            );
            let err = vm.new_runtime_error("generator raised StopIteration");
            err.set_cause(Some(e));
            err
        } else {
            e
        }
    }

    pub fn throw(
        &self,
        exc_type: PyObjectRef,
        exc_val: Option<PyObjectRef>,
        vm: &VirtualMachine,
    ) -> PyResult<PyIterReturn> {
        let exc = vm.normalize_exception(exc_type, exc_val)?;
        if self.closed.get() {
            return Err(exc);
        }
        let result = self.run_with_context(vm, |f| f.gen_throw(exc, vm));
        self.maybe_close(&result, vm);
        match result {
            Ok(exec_res) => Ok(exec_res.into_iter_return(vm)),
            Err(e) => Err(self.escaped_stop_iteration(e, vm)),
        }
    }

    pub fn close(&self, vm: &VirtualMachine) -> PyResult<()> {
        if self.closed.get() {
            return Ok(());
        }
        // a body that never started has no handlers to run
        if self.frame.lasti() == 0 {
            self.closed.set(true);
            return Ok(());
        }
        let exit = vm.new_exception_empty(vm.ctx.exceptions.generator_exit.clone());
        let result = self.run_with_context(vm, |f| f.gen_throw(exit, vm));
        self.closed.set(true);
        match result {
            Ok(ExecutionResult::Yield(_)) => {
                Err(vm.new_runtime_error("generator ignored GeneratorExit"))
            }
            Err(e) if !is_gen_exit(&e, vm) => Err(e),
            _ => Ok(()),
        }
    }

    pub fn running(&self) -> bool {
        self.running.get()
    }

    pub fn closed(&self) -> bool {
        self.closed.get()
    }

    pub fn frame(&self) -> FrameRef {
        self.frame.clone()
    }

    pub fn name(&self) -> PyStrRef {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: PyStrRef) {
        *self.name.borrow_mut() = name;
    }

    pub fn qualname(&self) -> PyStrRef {
        self.qualname.borrow().clone()
    }

    pub fn set_qualname(&self, qualname: PyStrRef) {
        *self.qualname.borrow_mut() = qualname;
    }

    pub fn repr(&self, id: usize) -> String {
        format!(
            "<generator object {} at {:#x}>",
            self.qualname.borrow().as_str(),
            id
        )
    }
}

pub fn is_gen_exit(exc: &PyBaseExceptionRef, vm: &VirtualMachine) -> bool {
    exc.fast_isinstance(&vm.ctx.exceptions.generator_exit)
}
