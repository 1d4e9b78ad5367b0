//! Implement virtual machine to run instructions.
//!
//! See also:
//!   <https://github.com/ProgVal/pythonvm-rust/blob/master/src/processor/mod.rs>

mod context;
mod interpreter;
mod setting;
pub mod thread;
mod vm_new;
mod vm_ops;

use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult,
    builtins::{
        PyBaseExceptionRef, PyBoundMethod, PyBuiltinFunction, PyClassMethod, PyCode, PyDictRef,
        PyFunction, PyInt, PyList, PyMethodDescriptor, PyModule, PyProperty, PyStaticMethod,
        PyStr, PyTuple, PyType, PyTypeFlags,
        type_::{type_getattro, type_setattro},
    },
    bytecode::CodeObject,
    fatal::{FatalError, InvariantViolation},
    frame::{ExecutionResult, Frame, FrameRef},
    function::{FuncArgs, IntoFuncArgs},
    import::{self, SourceCompiler},
    scope::Scope,
    stdlib,
};
use core::cell::{Cell, RefCell};
use num_traits::ToPrimitive;
use std::{
    any::Any,
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

pub use context::Context;
pub use interpreter::Interpreter;
pub use setting::Settings;

// Objects are live when they are on stack, or referenced by a name (for now)

/// Top level container of a python virtual machine. In theory you could
/// create more instances of this struct and have them operate fully isolated.
///
/// To construct this, please refer to the [`Interpreter`]
pub struct VirtualMachine {
    pub builtins: PyRef<PyModule>,
    pub sys_module: PyRef<PyModule>,
    /// `sys.modules`: every module that can be imported.
    pub modules: PyDictRef,
    pub ctx: Rc<Context>,
    /// The thread's call stack, innermost frame last.
    pub frames: RefCell<Vec<FrameRef>>,
    pub settings: Settings,
    exceptions: RefCell<ExceptionStack>,
    pub recursion_limit: Cell<usize>,
    recursion_depth: Cell<usize>,
    pub repr_guards: RefCell<HashSet<usize>>,
    pub(crate) source_compiler: Option<Box<dyn SourceCompiler>>,
}

/// The exception being handled, one slot per frame on the call stack.
#[derive(Debug, Default)]
struct ExceptionStack {
    exc: Option<PyBaseExceptionRef>,
    prev: Option<Box<ExceptionStack>>,
}

impl VirtualMachine {
    /// Create a new `VirtualMachine` structure.
    fn new(settings: Settings, ctx: Rc<Context>) -> Self {
        let new_module = |name: &str| {
            PyRef::new_ref(
                PyModule::new(name),
                ctx.types.module_type.clone(),
                Some(ctx.new_dict()),
            )
        };
        let builtins = new_module("builtins");
        let sys_module = new_module("sys");
        Self {
            builtins,
            sys_module,
            modules: ctx.new_dict(),
            frames: RefCell::new(vec![]),
            exceptions: RefCell::default(),
            recursion_limit: Cell::new(settings.recursion_limit),
            recursion_depth: Cell::new(0),
            repr_guards: RefCell::default(),
            source_compiler: None,
            settings,
            ctx,
        }
    }

    fn initialize(&self) {
        stdlib::builtins::init_module(self, &self.builtins);
        stdlib::sys::init_module(self, &self.sys_module);
        for module in [&self.builtins, &self.sys_module] {
            module
                .dict()
                .set_item_str("__name__", self.ctx.new_str(module.name()).into(), self);
            self.modules
                .set_item_str(module.name(), module.clone().into(), self);
        }
        debug!("interpreter initialized");
    }

    /// Executes a code object as the module `name`, returning the value its frame returns.
    pub fn run_module(&self, code: CodeObject, name: &str) -> PyResult {
        let module = import::new_module_for(self, name, &code);
        self.modules.set_item_str(name, module.clone().into(), self);
        info!("running module {name} from {}", code.filename);
        let code = self.new_code(code)?;
        self.run_code_obj(code, Scope::new(None, module.dict()))
    }

    pub fn run_code_obj(&self, code: PyRef<PyCode>, scope: Scope) -> PyResult {
        let frame = Frame::new(code, scope, self.builtins.dict(), &[], self).into_ref(&self.ctx);
        self.run_frame(frame)
    }

    pub fn run_frame(&self, frame: FrameRef) -> PyResult {
        match self.with_frame(frame.clone(), |f| f.run(self))? {
            ExecutionResult::Return(value) => Ok(value),
            ExecutionResult::Yield(_) => self.fatal(InvariantViolation::UnexpectedYield {
                code: frame.code.name.clone(),
            }),
        }
    }

    pub fn current_recursion_depth(&self) -> usize {
        self.recursion_depth.get()
    }

    /// Used to run the body of a (possibly) recursive function. It will raise a
    /// RecursionError if recursive functions are nested far too many times.
    pub fn with_recursion<R, F: FnOnce() -> PyResult<R>>(&self, _where: &str, f: F) -> PyResult<R> {
        self.check_recursive_call(_where)?;
        self.recursion_depth.set(self.recursion_depth.get() + 1);
        scopeguard::defer! { self.recursion_depth.set(self.recursion_depth.get() - 1) }
        f()
    }

    /// Pushes `frame` on the call stack for the duration of `f`.
    ///
    /// An invariant violation unwinding through here picks up this frame's dump on its way
    /// to the root entry point.
    pub fn with_frame<R, F: FnOnce(FrameRef) -> PyResult<R>>(
        &self,
        frame: FrameRef,
        f: F,
    ) -> PyResult<R> {
        self.with_recursion("", || {
            self.frames.borrow_mut().push(frame.clone());
            // each frame starts with no exception being handled
            self.push_exception(None);
            scopeguard::defer! {
                self.pop_exception();
                self.frames.borrow_mut().pop();
            }
            match panic::catch_unwind(AssertUnwindSafe(|| f(frame.clone()))) {
                Ok(result) => result,
                Err(payload) => Self::unwind_fatal(payload, &frame),
            }
        })
    }

    fn unwind_fatal(payload: Box<dyn Any + Send>, frame: &FrameRef) -> ! {
        match payload.downcast::<FatalError>() {
            Ok(mut fatal) => {
                fatal.frames.push(frame.dump());
                panic::resume_unwind(fatal)
            }
            Err(other) => panic::resume_unwind(other),
        }
    }

    /// Aborts the current thread with an invariant violation. The violation can never be
    /// caught by python code.
    #[cold]
    pub fn fatal(&self, violation: InvariantViolation) -> ! {
        error!("interpreter invariant violated: {violation}");
        panic::resume_unwind(Box::new(FatalError::new(violation)))
    }

    // To be called right before raising the recursion depth.
    fn check_recursive_call(&self, _where: &str) -> PyResult<()> {
        if self.recursion_depth.get() >= self.recursion_limit.get() {
            Err(self.new_recursion_error(format!("maximum recursion depth exceeded{_where}")))
        } else {
            Ok(())
        }
    }

    pub fn current_frame(&self) -> Option<FrameRef> {
        self.frames.borrow().last().cloned()
    }

    pub fn current_globals(&self) -> Option<PyDictRef> {
        self.current_frame().map(|frame| frame.globals.clone())
    }

    /// `import module_name`: a module already in `sys.modules`, else one found on `sys.path`.
    pub fn import(&self, module_name: &str) -> PyResult {
        import::import(self, module_name)
    }

    /// The items of a tuple, a list or any other iterable.
    pub fn extract_elements(&self, value: &PyObjectRef) -> PyResult<Vec<PyObjectRef>> {
        if let Some(tuple) = value.payload_if_exact::<PyTuple>(self) {
            return Ok(tuple.to_vec());
        }
        if let Some(list) = value.payload_if_exact::<PyList>(self) {
            return Ok(list.borrow_vec().clone());
        }
        let iter = value.get_iter(self)?;
        iter.into_iter(self).collect()
    }

    pub(crate) fn push_exception(&self, exc: Option<PyBaseExceptionRef>) {
        let mut excs = self.exceptions.borrow_mut();
        let prev = core::mem::take(&mut *excs);
        excs.prev = Some(Box::new(prev));
        excs.exc = exc
    }

    pub(crate) fn pop_exception(&self) -> Option<PyBaseExceptionRef> {
        let mut excs = self.exceptions.borrow_mut();
        let cur = core::mem::take(&mut *excs);
        *excs = cur.prev.map(|prev| *prev).unwrap_or_default();
        cur.exc
    }

    pub(crate) fn current_exception(&self) -> Option<PyBaseExceptionRef> {
        self.exceptions.borrow().exc.clone()
    }

    pub(crate) fn set_exception(&self, exc: Option<PyBaseExceptionRef>) {
        // don't be holding the RefCell guard while the old value is dropped
        let prev = core::mem::replace(&mut self.exceptions.borrow_mut().exc, exc);
        drop(prev);
    }

    /// The exception being handled by this frame or, failing that, by one of its callers.
    pub fn topmost_exception(&self) -> Option<PyBaseExceptionRef> {
        let excs = self.exceptions.borrow();
        let mut cur = &*excs;
        loop {
            if let Some(exc) = &cur.exc {
                return Some(exc.clone());
            }
            cur = cur.prev.as_deref()?;
        }
    }

    /// Sets `__context__` of a newly raised exception to the one being handled.
    pub(crate) fn contextualize_exception(&self, exception: &PyBaseExceptionRef) {
        if let Some(context_exc) = self.topmost_exception()
            && !context_exc.is(exception)
        {
            // break the cycle if `exception` is already part of the chain
            let mut o = context_exc.clone();
            while let Some(context) = o.context() {
                if context.is(exception) {
                    o.set_context(None);
                    break;
                }
                o = context;
            }
            exception.set_context(Some(context_exc))
        }
    }

    /// Turns an exception that escaped the root frame into an exit status, printing its
    /// traceback unless it is a `SystemExit`.
    pub fn handle_exit_exception(&self, exc: PyBaseExceptionRef) -> u8 {
        if exc.fast_isinstance(&self.ctx.exceptions.system_exit) {
            let args = exc.args();
            let msg = match args.as_slice() {
                [] => return 0,
                [arg] => {
                    if let Some(i) = arg.payload::<PyInt>() {
                        return i.as_bigint().to_i64().map_or(1, |code| code as u8);
                    }
                    if self.is_none(arg) {
                        return 0;
                    }
                    arg.str(self).ok()
                }
                _ => args.as_object().repr(self).ok(),
            };
            if let Some(msg) = msg {
                eprintln!("{}", msg.as_str());
            }
            1
        } else {
            self.print_exception(&exc);
            if self.settings.debug {
                for frame in self.frames.borrow().iter().rev() {
                    eprint!("{}", frame.dump());
                }
            }
            1
        }
    }

    pub fn print_exception(&self, exc: &PyBaseExceptionRef) {
        let mut stderr = std::io::stderr();
        if let Err(err) = crate::exceptions::write_exception(&mut stderr, self, exc) {
            warn!("could not write traceback: {err}");
        }
    }

    /// Calls any callable object.
    pub fn invoke(&self, callable: &PyObjectRef, args: impl IntoFuncArgs) -> PyResult {
        self._invoke(callable, args.into_args(self))
    }

    fn _invoke(&self, callable: &PyObjectRef, args: FuncArgs) -> PyResult {
        vm_trace!("Invoke: {:?} {:?}", callable, args);
        if let Some(function) = callable.payload::<PyFunction>() {
            return function.invoke(args, self);
        }
        if let Some(method) = callable.payload::<PyBoundMethod>() {
            return self.call_with_self(&method.function, method.object.clone(), args);
        }
        if let Some(builtin) = callable.payload::<PyBuiltinFunction>() {
            return builtin.call(args, self);
        }
        if let Some(descr) = callable.payload::<PyMethodDescriptor>() {
            return descr.call(args, self);
        }
        if callable.class().is(&self.ctx.types.type_type)
            && let Some(cls) = callable.clone().downcast::<PyType>().ok()
        {
            return cls.call(args, self);
        }
        match callable.class().get_attr("__call__") {
            Some(call) => self.call_with_self(&call, callable.clone(), args),
            None => Err(self.new_type_error(format!(
                "'{}' object is not callable",
                callable.class().name()
            ))),
        }
    }

    pub fn is_callable(&self, obj: &PyObjectRef) -> bool {
        obj.payload_is::<PyFunction>()
            || obj.payload_is::<PyBoundMethod>()
            || obj.payload_is::<PyBuiltinFunction>()
            || obj.payload_is::<PyMethodDescriptor>()
            || obj.class().has_attr("__call__")
    }

    /// Calls `func`, an attribute found on the class of `zelf`, as a method of `zelf`.
    pub fn call_with_self(
        &self,
        func: &PyObjectRef,
        zelf: PyObjectRef,
        mut args: FuncArgs,
    ) -> PyResult {
        if func.payload_is::<PyFunction>() || func.payload_is::<PyMethodDescriptor>() {
            args.prepend_arg(zelf);
            return self._invoke(func, args);
        }
        let cls = zelf.class().clone();
        match self.call_get_descriptor(func, Some(&zelf), cls.as_object()) {
            Some(bound) => self._invoke(&bound?, args),
            None => self._invoke(func, args),
        }
    }

    /// A class attribute defining a set or delete hook takes precedence over the instance
    /// dictionary.
    pub fn is_data_descriptor(&self, attr: &PyObjectRef) -> bool {
        let cls = attr.class();
        cls.has_attr("__set__") || cls.has_attr("__delete__")
    }

    /// Runs the descriptor get hook of `attr`, found on the class `cls`, for `obj`, or for
    /// the class itself when `obj` is `None`. Returns `None` when `attr` is no descriptor.
    pub fn call_get_descriptor(
        &self,
        attr: &PyObjectRef,
        obj: Option<&PyObjectRef>,
        cls: &PyObjectRef,
    ) -> Option<PyResult> {
        if attr.payload_is::<PyFunction>() {
            return Some(Ok(match obj {
                Some(obj) => PyBoundMethod::new(obj.clone(), attr.clone())
                    .into_ref(&self.ctx)
                    .into(),
                None => attr.clone(),
            }));
        }
        if let Some(descr) = attr.payload::<PyMethodDescriptor>() {
            return Some(Ok(match obj {
                Some(obj) => descr.bind(obj.clone(), &self.ctx).into(),
                None => attr.clone(),
            }));
        }
        if let Some(classmethod) = attr.payload_if_exact::<PyClassMethod>(self) {
            let method = PyBoundMethod::new(cls.clone(), classmethod.callable());
            return Some(Ok(method.into_ref(&self.ctx).into()));
        }
        if let Some(staticmethod) = attr.payload_if_exact::<PyStaticMethod>(self) {
            return Some(Ok(staticmethod.callable()));
        }
        if let Some(property) = attr.payload_if_exact::<PyProperty>(self) {
            return Some(match obj {
                Some(obj) => property.get(obj, self),
                None => Ok(attr.clone()),
            });
        }
        let descr_get = attr.class().get_attr("__get__")?;
        let obj = obj.cloned().unwrap_or_else(|| self.ctx.none());
        Some(self.call_with_self(&descr_get, attr.clone(), vec![obj, cls.clone()].into()))
    }

    /// Runs the set hook (`value` is `Some`) or delete hook of `attr` for `obj`. Returns
    /// `false` when `attr` is no data descriptor.
    pub fn call_set_descriptor(
        &self,
        attr: &PyObjectRef,
        obj: &PyObjectRef,
        value: Option<PyObjectRef>,
    ) -> PyResult<bool> {
        if let Some(property) = attr.payload_if_exact::<PyProperty>(self) {
            property.set(obj, value, self)?;
            return Ok(true);
        }
        let cls = attr.class();
        let hook = if value.is_some() { "__set__" } else { "__delete__" };
        if let Some(func) = cls.get_attr(hook) {
            let mut args = vec![obj.clone()];
            args.extend(value);
            self.call_with_self(&func, attr.clone(), args.into())?;
            return Ok(true);
        }
        if self.is_data_descriptor(attr) {
            return Err(self.new_attribute_error(hook.to_owned()));
        }
        Ok(false)
    }

    /// The attribute `name` of the class of `obj`, without binding it.
    pub(crate) fn get_method(&self, obj: &PyObjectRef, name: &str) -> Option<PyObjectRef> {
        obj.class().get_attr(name)
    }

    /// Looks up a special method on the class of `obj`, bound to `obj`.
    pub fn get_special_method(
        &self,
        obj: &PyObjectRef,
        name: &str,
    ) -> PyResult<Option<PyObjectRef>> {
        let Some(attr) = self.get_method(obj, name) else {
            return Ok(None);
        };
        let cls = obj.class().clone();
        match self.call_get_descriptor(&attr, Some(obj), cls.as_object()) {
            Some(bound) => bound.map(Some),
            None => Ok(Some(attr)),
        }
    }

    /// Calls a special method found on the class of `obj`, bypassing the instance dict.
    pub fn call_special_method(
        &self,
        obj: &PyObjectRef,
        name: &str,
        args: impl IntoFuncArgs,
    ) -> PyResult {
        let func = self.get_method(obj, name).ok_or_else(|| {
            self.new_attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                obj.class().name()
            ))
        })?;
        self.call_with_self(&func, obj.clone(), args.into_args(self))
    }

    pub fn call_method(&self, obj: &PyObjectRef, name: &str, args: impl IntoFuncArgs) -> PyResult {
        let func = obj.get_attr(name, self)?;
        self.invoke(&func, args)
    }

    /// Attribute lookup: `__getattribute__` overrides, type and instance lookup, then the
    /// `__getattr__` fallback.
    pub fn get_attribute(&self, obj: &PyObjectRef, name: &str) -> PyResult {
        let cls = obj.class();
        let result = if cls.flags.contains(PyTypeFlags::HAS_GETATTRIBUTE)
            && let Some(getattribute) = cls.get_attr("__getattribute__")
        {
            let name_obj = self.ctx.new_str(name);
            match self.call_with_self(&getattribute, obj.clone(), vec![name_obj.into()].into()) {
                Ok(value) => Some(value),
                Err(err) if err.fast_isinstance(&self.ctx.exceptions.attribute_error) => {
                    if cls.has_attr("__getattr__") {
                        None
                    } else {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        } else if let Ok(typ) = obj.clone().downcast::<PyType>() {
            type_getattro(&typ, name, self)?
        } else {
            self.generic_getattr_opt(obj, name)?
        };
        if let Some(value) = result {
            return Ok(value);
        }
        if let Some(getattr) = cls.get_attr("__getattr__") {
            let name_obj = self.ctx.new_str(name);
            return self.call_with_self(&getattr, obj.clone(), vec![name_obj.into()].into());
        }
        Err(self.attribute_error_for(obj, name))
    }

    fn attribute_error_for(&self, obj: &PyObjectRef, name: &str) -> PyBaseExceptionRef {
        let msg = if let Some(typ) = obj.payload::<PyType>() {
            format!("type object '{}' has no attribute '{name}'", typ.name())
        } else if let Some(module) = obj.payload::<PyModule>() {
            format!("module '{}' has no attribute '{name}'", module.name())
        } else {
            format!("'{}' object has no attribute '{name}'", obj.class().name())
        };
        self.new_attribute_error(msg)
    }

    /// `object.__getattribute__` without the `__getattr__` fallback: data descriptors on the
    /// type, then the instance dict, then other class attributes.
    pub fn generic_getattr_opt(
        &self,
        obj: &PyObjectRef,
        name: &str,
    ) -> PyResult<Option<PyObjectRef>> {
        let cls = obj.class().clone();
        let cls_attr = cls.get_attr(name);

        if let Some(attr) = &cls_attr
            && self.is_data_descriptor(attr)
            && let Some(result) = self.call_get_descriptor(attr, Some(obj), cls.as_object())
        {
            return result.map(Some);
        }

        if let Some(dict) = obj.dict() {
            if name == "__dict__" {
                return Ok(Some(dict.clone().into()));
            }
            if let Some(value) = dict.get_item_str(name, self) {
                return Ok(Some(value));
            }
        }

        match cls_attr {
            Some(attr) => match self.call_get_descriptor(&attr, Some(obj), cls.as_object()) {
                Some(result) => result.map(Some),
                None => Ok(Some(attr)),
            },
            None => Ok(None),
        }
    }

    /// Like [`get_attribute`](Self::get_attribute), mapping AttributeError to `None`.
    pub fn get_attribute_opt(&self, obj: &PyObjectRef, name: &str) -> PyResult<Option<PyObjectRef>> {
        match self.get_attribute(obj, name) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.fast_isinstance(&self.ctx.exceptions.attribute_error) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Attribute assignment; a `value` of `None` deletes the attribute.
    pub fn set_attribute(
        &self,
        obj: &PyObjectRef,
        name: &str,
        value: Option<PyObjectRef>,
    ) -> PyResult<()> {
        let cls = obj.class();
        if cls.flags.contains(PyTypeFlags::HAS_SETATTR) {
            let hook = if value.is_some() { "__setattr__" } else { "__delattr__" };
            if let Some(func) = cls.get_attr(hook) {
                let mut args = vec![self.ctx.new_str(name).into()];
                args.extend(value);
                self.call_with_self(&func, obj.clone(), args.into())?;
                return Ok(());
            }
        }
        if obj.payload_is::<PyType>()
            && let Ok(typ) = obj.clone().downcast::<PyType>()
        {
            return type_setattro(&typ, name, value, self);
        }
        self.generic_setattr(obj, name, value)
    }

    /// `object.__setattr__` and `object.__delattr__`.
    pub fn generic_setattr(
        &self,
        obj: &PyObjectRef,
        name: &str,
        value: Option<PyObjectRef>,
    ) -> PyResult<()> {
        if let Some(attr) = obj.class().get_attr(name)
            && self.call_set_descriptor(&attr, obj, value.clone())?
        {
            return Ok(());
        }
        let Some(dict) = obj.dict() else {
            return Err(self.attribute_error_for(obj, name));
        };
        match value {
            Some(value) => {
                dict.set_item_str(name, value, self);
                Ok(())
            }
            None => match dict.del_item_str(name, self) {
                Some(_) => Ok(()),
                None => Err(self.attribute_error_for(obj, name)),
            },
        }
    }

    pub fn is_none(&self, obj: &PyObjectRef) -> bool {
        obj.is(&self.ctx.none)
    }

    pub fn option_if_none(&self, obj: PyObjectRef) -> Option<PyObjectRef> {
        if self.is_none(&obj) { None } else { Some(obj) }
    }

    /// Name of the class of `obj`, as used in error messages.
    pub fn type_name(&self, obj: &PyObjectRef) -> String {
        obj.class().name().to_owned()
    }

    /// Guards `repr` of containers against infinite recursion through themselves.
    pub fn with_repr_guard<F>(&self, obj: &PyObjectRef, placeholder: &str, f: F) -> PyResult<String>
    where
        F: FnOnce() -> PyResult<String>,
    {
        let id = obj.get_id();
        if !self.repr_guards.borrow_mut().insert(id) {
            return Ok(placeholder.to_owned());
        }
        scopeguard::defer! { self.repr_guards.borrow_mut().remove(&id); }
        f()
    }

    /// A python `str` object as a rust `String`, or TypeError naming `what`.
    pub fn expect_str(&self, obj: &PyObjectRef, what: &str) -> PyResult<String> {
        obj.payload::<PyStr>()
            .map(|s| s.as_str().to_owned())
            .ok_or_else(|| {
                self.new_type_error(format!(
                    "{what} must be str, not {}",
                    obj.class().name()
                ))
            })
    }
}

impl AsRef<Context> for VirtualMachine {
    fn as_ref(&self) -> &Context {
        &self.ctx
    }
}
