use super::{Context, VirtualMachine, setting::Settings, thread};
use crate::{PyResult, fatal::FatalError, import::SourceCompiler};
use std::panic::{self, AssertUnwindSafe};

/// The general interface for the VM
///
/// # Examples
/// Runs a hand-assembled module that evaluates `1 + 2`.
/// ```
/// use kython_vm::{Interpreter, bytecode::{CodeBuilder, Opcode}};
/// let mut builder = CodeBuilder::new("<module>");
/// builder.load_int(1).load_int(2).emit(Opcode::BinaryAdd, 0).return_value();
/// let code = builder.finish().unwrap();
/// Interpreter::new(Default::default()).enter(|vm| {
///     let result = vm.run_module(code, "__main__").unwrap();
///     assert_eq!(result.str(vm).unwrap().as_str(), "3");
/// });
/// ```
pub struct Interpreter {
    vm: VirtualMachine,
}

impl Interpreter {
    /// Builds the types, the exception hierarchy and the builtins before any code runs.
    pub fn new(settings: Settings) -> Self {
        let ctx = Context::genesis();
        let vm = VirtualMachine::new(settings, ctx);
        vm.initialize();
        Self { vm }
    }

    /// Lets `import` load `.py` files from `sys.path` by compiling them with `compiler`.
    pub fn with_source_compiler(mut self, compiler: impl SourceCompiler + 'static) -> Self {
        self.vm.source_compiler = Some(Box::new(compiler));
        self
    }

    /// Run a function with the main virtual machine and return a PyResult of the result.
    ///
    /// `enter` is lightweight: the interpreter can be entered any number of times and keeps
    /// its modules between entries.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&VirtualMachine) -> R,
    {
        thread::enter_vm(&self.vm, || f(&self.vm))
    }

    /// Root-thread entry point: runs `f` and turns its outcome into a process exit status.
    ///
    /// - `0` when `f` succeeds,
    /// - the `SystemExit` code, or `1` after printing the traceback of any other unhandled
    ///   exception,
    /// - `70` after printing the dump of an interpreter invariant violation.
    pub fn run_main<F>(self, f: F) -> u8
    where
        F: FnOnce(&VirtualMachine) -> PyResult<()>,
    {
        self.enter(|vm| {
            match panic::catch_unwind(AssertUnwindSafe(|| f(vm))) {
                Ok(Ok(())) => 0,
                Ok(Err(exc)) => vm.handle_exit_exception(exc),
                Err(payload) => match payload.downcast::<FatalError>() {
                    Ok(fatal) => {
                        eprint!("{fatal}");
                        FatalError::EXIT_STATUS
                    }
                    Err(other) => panic::resume_unwind(other),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        PyObjectRef,
        builtins::{PyInt, PyStr},
    };
    use malachite_bigint::BigInt;

    #[test]
    fn test_add_py_integers() {
        Interpreter::new(Default::default()).enter(|vm| {
            let a: PyObjectRef = vm.ctx.new_int(33_i32).into();
            let b: PyObjectRef = vm.ctx.new_int(12_i32).into();
            let res = vm._add(&a, &b).unwrap();
            let value = res.payload::<PyInt>().unwrap();
            assert_eq!(*value.as_bigint(), BigInt::from(45));
        })
    }

    #[test]
    fn test_multiply_str() {
        Interpreter::new(Default::default()).enter(|vm| {
            let a: PyObjectRef = vm.ctx.new_str("Hello ").into();
            let b: PyObjectRef = vm.ctx.new_int(4_i32).into();
            let res = vm._mul(&a, &b).unwrap();
            let value = res.payload::<PyStr>().unwrap();
            assert_eq!(value.as_str(), "Hello Hello Hello Hello ")
        })
    }

    #[test]
    fn system_exit_sets_the_status() {
        let status = Interpreter::new(Default::default()).run_main(|vm| {
            let code: PyObjectRef = vm.ctx.new_int(3).into();
            Err(vm.new_exception(vm.ctx.exceptions.system_exit.clone(), vec![code]))
        });
        assert_eq!(status, 3);
    }
}
