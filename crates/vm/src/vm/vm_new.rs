use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult,
    builtins::{PyBaseException, PyBaseExceptionRef, PyCode, PyDictRef, PyModule, PyTypeRef},
    bytecode::CodeObject,
    convert::ToPyObject,
    scope::Scope,
    vm::VirtualMachine,
};

macro_rules! define_exception_fn {
    (
        fn $fn_name:ident, $attr:ident, $python_repr:ident
    ) => {
        #[doc = concat!(
            "Create a new python ",
            stringify!($python_repr),
            " object.\nUseful for raising errors from python functions implemented in rust."
        )]
        pub fn $fn_name(&self, msg: impl Into<String>) -> PyBaseExceptionRef {
            let err = self.ctx.exceptions.$attr.clone();
            self.new_exception_msg(err, msg.into())
        }
    };
}

/// Collection of object creation helpers
impl VirtualMachine {
    /// Create a new python object
    pub fn new_pyobj(&self, value: impl ToPyObject) -> PyObjectRef {
        value.to_pyobject(self)
    }

    /// A module object whose attributes live in `dict`.
    pub fn new_module(&self, name: &str, dict: PyDictRef) -> PyRef<PyModule> {
        if dict.get_item_str("__name__", self).is_none() {
            dict.set_item_str("__name__", self.ctx.new_str(name).into(), self);
        }
        PyRef::new_ref(
            PyModule::new(name),
            self.ctx.types.module_type.clone(),
            Some(dict),
        )
    }

    /// A `code` object; its constant pool is turned into objects up front.
    pub fn new_code(&self, code: CodeObject) -> PyResult<PyRef<PyCode>> {
        Ok(PyCode::new(code, self)?.into_ref(&self.ctx))
    }

    /// Globals of a fresh module that can see the builtins.
    pub fn new_scope_with_builtins(&self) -> Scope {
        Scope::with_builtins(None, self.ctx.new_dict(), self)
    }

    /// Instantiate an exception with arguments.
    /// This function should only be used with builtin exception types; if a user-defined exception
    /// type is passed in, it may not be fully initialized; try using
    /// [`vm.invoke_exception()`][Self::invoke_exception] or
    /// [`exceptions::ExceptionCtor`][crate::exceptions::ExceptionCtor] instead.
    pub fn new_exception(&self, exc_type: PyTypeRef, args: Vec<PyObjectRef>) -> PyBaseExceptionRef {
        PyRef::new_ref(
            PyBaseException::new(args, self),
            exc_type,
            Some(self.ctx.new_dict()),
        )
    }

    /// Instantiate an exception with no arguments.
    pub fn new_exception_empty(&self, exc_type: PyTypeRef) -> PyBaseExceptionRef {
        self.new_exception(exc_type, vec![])
    }

    /// Instantiate an exception with `msg` as the only argument.
    pub fn new_exception_msg(&self, exc_type: PyTypeRef, msg: String) -> PyBaseExceptionRef {
        self.new_exception(exc_type, vec![self.ctx.new_str(msg).into()])
    }

    /// Calls an exception class the way `raise Cls(args)` does, so user-defined
    /// `__init__` methods run.
    pub fn invoke_exception(
        &self,
        cls: PyTypeRef,
        args: Vec<PyObjectRef>,
    ) -> crate::PyResult<PyBaseExceptionRef> {
        let res = cls.call(args.into(), self)?;
        res.downcast::<PyBaseException>().map_err(|obj| {
            self.new_type_error(format!(
                "calling {} should have returned an instance of BaseException, not {}",
                cls.name(),
                obj.class().name()
            ))
        })
    }

    pub fn new_key_error(&self, key: PyObjectRef) -> PyBaseExceptionRef {
        self.new_exception(self.ctx.exceptions.key_error.clone(), vec![key])
    }

    /// `StopIteration`, carrying `value` unless it is absent.
    pub fn new_stop_iteration(&self, value: Option<PyObjectRef>) -> PyBaseExceptionRef {
        let args = value.into_iter().collect();
        self.new_exception(self.ctx.exceptions.stop_iteration.clone(), args)
    }

    pub fn new_name_error(&self, name: &str) -> PyBaseExceptionRef {
        self.new_exception_msg(
            self.ctx.exceptions.name_error.clone(),
            format!("name '{name}' is not defined"),
        )
    }

    pub fn new_unsupported_bin_op_error(
        &self,
        a: &PyObjectRef,
        b: &PyObjectRef,
        op: &str,
    ) -> PyBaseExceptionRef {
        self.new_type_error(format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            a.class().name(),
            b.class().name()
        ))
    }

    pub fn new_unsupported_unary_error(&self, a: &PyObjectRef, op: &str) -> PyBaseExceptionRef {
        self.new_type_error(format!(
            "bad operand type for {op}: '{}'",
            a.class().name()
        ))
    }

    define_exception_fn!(fn new_assertion_error, assertion_error, AssertionError);
    define_exception_fn!(fn new_attribute_error, attribute_error, AttributeError);
    define_exception_fn!(fn new_type_error, type_error, TypeError);
    define_exception_fn!(fn new_value_error, value_error, ValueError);
    define_exception_fn!(fn new_index_error, index_error, IndexError);
    define_exception_fn!(fn new_import_error, import_error, ImportError);
    define_exception_fn!(fn new_runtime_error, runtime_error, RuntimeError);
    define_exception_fn!(fn new_system_error, system_error, SystemError);
    define_exception_fn!(fn new_not_implemented_error, not_implemented_error, NotImplementedError);
    define_exception_fn!(fn new_recursion_error, recursion_error, RecursionError);
    define_exception_fn!(fn new_zero_division_error, zero_division_error, ZeroDivisionError);
    define_exception_fn!(fn new_overflow_error, overflow_error, OverflowError);
    define_exception_fn!(fn new_unbound_local_error, unbound_local_error, UnboundLocalError);
}
