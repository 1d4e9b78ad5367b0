//! The exception hierarchy, exception values and traceback rendering.

use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, TryFromObject, VirtualMachine,
    builtins::{PyStrRef, PyTuple, PyTupleRef, PyType, PyTypeFlags, PyTypeRef},
    function::FuncArgs,
    types::TypeZoo,
    vm::Context,
};
use core::cell::{Cell, RefCell};
use itertools::Itertools;
use std::{
    collections::HashSet,
    io::{self, BufRead, BufReader, Write},
};

/// An exception value: its arguments, where it travelled and how it is chained.
pub struct PyBaseException {
    args: RefCell<PyTupleRef>,
    traceback: RefCell<Vec<TracebackEntry>>,
    cause: RefCell<Option<PyBaseExceptionRef>>,
    context: RefCell<Option<PyBaseExceptionRef>>,
    suppress_context: Cell<bool>,
}

pub type PyBaseExceptionRef = PyRef<PyBaseException>;

/// One line of a rendered traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracebackEntry {
    pub filename: String,
    pub lineno: u32,
    pub name: String,
}

impl core::fmt::Debug for PyBaseException {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // the args and the chain may refer back to this exception
        f.write_str("PyBaseException")
    }
}

impl PyPayload for PyBaseException {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.exceptions.base_exception_type
    }
}

impl PyBaseException {
    pub(crate) fn new(args: Vec<PyObjectRef>, vm: &VirtualMachine) -> Self {
        Self {
            args: RefCell::new(vm.ctx.new_tuple(args)),
            traceback: RefCell::default(),
            cause: RefCell::default(),
            context: RefCell::default(),
            suppress_context: Cell::new(false),
        }
    }

    pub fn args(&self) -> PyTupleRef {
        self.args.borrow().clone()
    }

    pub fn set_args(&self, args: PyTupleRef) {
        *self.args.borrow_mut() = args;
    }

    pub fn get_arg(&self, idx: usize) -> Option<PyObjectRef> {
        self.args.borrow().as_slice().get(idx).cloned()
    }

    /// The frames the exception passed through, outermost first.
    pub fn traceback(&self) -> Vec<TracebackEntry> {
        self.traceback.borrow().clone()
    }

    /// Records the frame the exception is currently unwinding; callers are added in front
    /// of their callees.
    pub fn push_traceback(&self, entry: TracebackEntry) {
        self.traceback.borrow_mut().insert(0, entry);
    }

    pub fn cause(&self) -> Option<PyBaseExceptionRef> {
        self.cause.borrow().clone()
    }

    /// Setting a cause also hides the context when the chain is printed.
    pub fn set_cause(&self, cause: Option<PyBaseExceptionRef>) {
        self.suppress_context.set(true);
        *self.cause.borrow_mut() = cause;
    }

    pub fn context(&self) -> Option<PyBaseExceptionRef> {
        self.context.borrow().clone()
    }

    pub fn set_context(&self, context: Option<PyBaseExceptionRef>) {
        *self.context.borrow_mut() = context;
    }
}

/// What `raise` and `generator.throw` accept: an exception class or instance.
#[derive(Clone)]
pub enum ExceptionCtor {
    Class(PyTypeRef),
    Instance(PyBaseExceptionRef),
}

impl TryFromObject for ExceptionCtor {
    fn try_from_object(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Self> {
        obj.downcast::<PyType>()
            .and_then(|cls| {
                if cls.fast_issubclass(&vm.ctx.exceptions.base_exception_type) {
                    Ok(Self::Class(cls))
                } else {
                    Err(cls.into())
                }
            })
            .or_else(|obj| obj.downcast::<PyBaseException>().map(Self::Instance))
            .map_err(|obj| {
                vm.new_type_error(format!(
                    "exceptions must be classes or instances deriving from BaseException, not {}",
                    obj.class().name()
                ))
            })
    }
}

impl ExceptionCtor {
    pub fn instantiate(self, vm: &VirtualMachine) -> PyResult<PyBaseExceptionRef> {
        match self {
            Self::Class(cls) => vm.invoke_exception(cls, vec![]),
            Self::Instance(exc) => Ok(exc),
        }
    }

    pub fn instantiate_value(
        self,
        value: PyObjectRef,
        vm: &VirtualMachine,
    ) -> PyResult<PyBaseExceptionRef> {
        let exc_inst = value.clone().downcast::<PyBaseException>().ok();
        match (self, exc_inst) {
            // both are instances; which would we choose?
            (Self::Instance(_exc_a), Some(_exc_b)) => {
                Err(vm.new_type_error("instance exception may not have a separate value"))
            }
            // if the "type" is an instance and the value isn't, use the "type"
            (Self::Instance(exc), None) => Ok(exc),
            // if the value is an instance of the type, use the instance value
            (Self::Class(cls), Some(exc)) if exc.fast_isinstance(&cls) => Ok(exc),
            // otherwise; construct an exception of the type using the value as args
            (Self::Class(cls), _) => {
                let args = if vm.is_none(&value) {
                    vec![]
                } else if let Some(tuple) = value.payload_if_exact::<PyTuple>(vm) {
                    tuple.to_vec()
                } else if let Some(exc) = value.payload::<PyBaseException>() {
                    exc.args().to_vec()
                } else {
                    vec![value]
                };
                vm.invoke_exception(cls, args)
            }
        }
    }
}

impl VirtualMachine {
    /// Turns the operands of `raise` or `throw` into an exception value.
    pub fn normalize_exception(
        &self,
        exc_type: PyObjectRef,
        exc_val: Option<PyObjectRef>,
    ) -> PyResult<PyBaseExceptionRef> {
        let ctor = ExceptionCtor::try_from_object(self, exc_type)?;
        match exc_val {
            Some(value) => ctor.instantiate_value(value, self),
            None => ctor.instantiate(self),
        }
    }
}

/// Writes the traceback of `exc`, preceded by its cause or context chain.
pub fn write_exception<W: Write>(
    output: &mut W,
    vm: &VirtualMachine,
    exc: &PyBaseExceptionRef,
) -> io::Result<()> {
    let seen = &mut HashSet::<usize>::new();
    write_exception_recursive(output, vm, exc, seen)
}

fn write_exception_recursive<W: Write>(
    output: &mut W,
    vm: &VirtualMachine,
    exc: &PyBaseExceptionRef,
    seen: &mut HashSet<usize>,
) -> io::Result<()> {
    seen.insert(exc.get_id());

    let chained = if let Some(cause) = exc.cause() {
        Some((
            cause,
            "\nThe above exception was the direct cause of the following exception:\n",
        ))
    } else if let Some(context) = exc.context().filter(|_| !exc.suppress_context.get()) {
        Some((
            context,
            "\nDuring handling of the above exception, another exception occurred:\n",
        ))
    } else {
        None
    };
    if let Some((cause_or_context, msg)) = chained {
        // `raise e from e` and self-referencing contexts print once
        if seen.insert(cause_or_context.get_id()) {
            write_exception_recursive(output, vm, &cause_or_context, seen)?;
            writeln!(output, "{msg}")?;
        }
    }

    write_exception_inner(output, vm, exc)
}

/// Writes one exception: its traceback entries, then `Type: message`.
pub fn write_exception_inner<W: Write>(
    output: &mut W,
    vm: &VirtualMachine,
    exc: &PyBaseExceptionRef,
) -> io::Result<()> {
    let traceback = exc.traceback();
    if !traceback.is_empty() {
        writeln!(output, "Traceback (most recent call last):")?;
        for entry in &traceback {
            write_traceback_entry(output, entry)?;
        }
    }
    let exc_name = exc.class().name().to_owned();
    let message = exception_message(vm, exc);
    if message.is_empty() {
        writeln!(output, "{exc_name}")
    } else {
        writeln!(output, "{exc_name}: {message}")
    }
}

/// `str(exc)`, falling back to a placeholder when `__str__` itself fails.
fn exception_message(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    match exc.as_object().str(vm) {
        Ok(s) => s.as_str().to_owned(),
        Err(_) => "<exception str() failed>".to_owned(),
    }
}

fn print_source_line<W: Write>(output: &mut W, filename: &str, lineno: u32) -> io::Result<()> {
    let file = match std::fs::File::open(filename) {
        Ok(file) => file,
        Err(_) => return Ok(()),
    };
    let line = BufReader::new(file)
        .lines()
        .nth(lineno.saturating_sub(1) as usize);
    if let Some(Ok(line)) = line {
        // Indented with 4 spaces
        writeln!(output, "    {}", line.trim())?;
    }
    Ok(())
}

/// Print exception occurrence location from traceback element
fn write_traceback_entry<W: Write>(output: &mut W, entry: &TracebackEntry) -> io::Result<()> {
    writeln!(
        output,
        r##"  File "{}", line {}, in {}"##,
        entry.filename, entry.lineno, entry.name
    )?;
    if entry.lineno > 0 {
        print_source_line(output, &entry.filename, entry.lineno)?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct ExceptionZoo {
    pub base_exception_type: PyTypeRef,
    pub system_exit: PyTypeRef,
    pub keyboard_interrupt: PyTypeRef,
    pub generator_exit: PyTypeRef,
    pub exception_type: PyTypeRef,
    pub stop_iteration: PyTypeRef,
    pub arithmetic_error: PyTypeRef,
    pub overflow_error: PyTypeRef,
    pub zero_division_error: PyTypeRef,
    pub assertion_error: PyTypeRef,
    pub attribute_error: PyTypeRef,
    pub import_error: PyTypeRef,
    pub module_not_found_error: PyTypeRef,
    pub lookup_error: PyTypeRef,
    pub index_error: PyTypeRef,
    pub key_error: PyTypeRef,
    pub name_error: PyTypeRef,
    pub unbound_local_error: PyTypeRef,
    pub runtime_error: PyTypeRef,
    pub not_implemented_error: PyTypeRef,
    pub recursion_error: PyTypeRef,
    pub system_error: PyTypeRef,
    pub type_error: PyTypeRef,
    pub value_error: PyTypeRef,
}

impl ExceptionZoo {
    pub(crate) fn init(types: &TypeZoo) -> Self {
        let new = |name: &str, base: &PyTypeRef| {
            PyType::new_static(name, base, PyTypeFlags::BASETYPE, &types.type_type)
        };

        let base_exception_type = new("BaseException", &types.object_type);

        // Sorted By Hierarchy then alphabetized.
        let system_exit = new("SystemExit", &base_exception_type);
        let keyboard_interrupt = new("KeyboardInterrupt", &base_exception_type);
        let generator_exit = new("GeneratorExit", &base_exception_type);

        let exception_type = new("Exception", &base_exception_type);
        let stop_iteration = new("StopIteration", &exception_type);
        let arithmetic_error = new("ArithmeticError", &exception_type);
        let overflow_error = new("OverflowError", &arithmetic_error);
        let zero_division_error = new("ZeroDivisionError", &arithmetic_error);

        let assertion_error = new("AssertionError", &exception_type);
        let attribute_error = new("AttributeError", &exception_type);

        let import_error = new("ImportError", &exception_type);
        let module_not_found_error = new("ModuleNotFoundError", &import_error);

        let lookup_error = new("LookupError", &exception_type);
        let index_error = new("IndexError", &lookup_error);
        let key_error = new("KeyError", &lookup_error);

        let name_error = new("NameError", &exception_type);
        let unbound_local_error = new("UnboundLocalError", &name_error);

        let runtime_error = new("RuntimeError", &exception_type);
        let not_implemented_error = new("NotImplementedError", &runtime_error);
        let recursion_error = new("RecursionError", &runtime_error);

        let system_error = new("SystemError", &exception_type);
        let type_error = new("TypeError", &exception_type);
        let value_error = new("ValueError", &exception_type);

        Self {
            base_exception_type,
            system_exit,
            keyboard_interrupt,
            generator_exit,
            exception_type,
            stop_iteration,
            arithmetic_error,
            overflow_error,
            zero_division_error,
            assertion_error,
            attribute_error,
            import_error,
            module_not_found_error,
            lookup_error,
            index_error,
            key_error,
            name_error,
            unbound_local_error,
            runtime_error,
            not_implemented_error,
            recursion_error,
            system_error,
            type_error,
            value_error,
        }
    }

    /// Every exception type, for the builtins namespace.
    pub fn iter(&self) -> impl Iterator<Item = &PyTypeRef> {
        [
            &self.base_exception_type,
            &self.system_exit,
            &self.keyboard_interrupt,
            &self.generator_exit,
            &self.exception_type,
            &self.stop_iteration,
            &self.arithmetic_error,
            &self.overflow_error,
            &self.zero_division_error,
            &self.assertion_error,
            &self.attribute_error,
            &self.import_error,
            &self.module_not_found_error,
            &self.lookup_error,
            &self.index_error,
            &self.key_error,
            &self.name_error,
            &self.unbound_local_error,
            &self.runtime_error,
            &self.not_implemented_error,
            &self.recursion_error,
            &self.system_error,
            &self.type_error,
            &self.value_error,
        ]
        .into_iter()
    }

    pub(crate) fn extend(ctx: &Context) {
        let excs = &ctx.exceptions;

        extend_class!(ctx, &excs.base_exception_type, {
            "__new__" => ctx.new_staticmethod("__new__", exception_new),
            "__init__" => ctx.new_method("__init__", exception_init),
            "__str__" => ctx.new_method("__str__", exception_str),
            "__repr__" => ctx.new_method("__repr__", exception_repr),
            "with_traceback" => ctx.new_method("with_traceback", exception_with_traceback),
            "args" => ctx.new_getset("args", exception_get_args, exception_set_args),
            "__cause__" => ctx.new_getset("__cause__", exception_get_cause, exception_set_cause),
            "__context__" => ctx.new_getset("__context__", exception_get_context, exception_set_context),
            "__suppress_context__" => ctx.new_readonly_getset("__suppress_context__", exception_get_suppress_context),
            "__traceback__" => ctx.new_readonly_getset("__traceback__", exception_get_traceback),
        });

        extend_class!(ctx, &excs.system_exit, {
            "code" => ctx.new_readonly_getset("code", system_exit_code),
        });
        extend_class!(ctx, &excs.stop_iteration, {
            "value" => ctx.new_readonly_getset("value", first_arg_getter),
        });
        extend_class!(ctx, &excs.key_error, {
            "__str__" => ctx.new_method("__str__", key_error_str),
        });
        extend_class!(ctx, &excs.import_error, {
            "msg" => ctx.new_readonly_getset("msg", first_arg_getter),
        });
    }
}

fn exception_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("BaseException.__new__", vm)?.try_into_value(vm)?;
    if !cls.fast_issubclass(&vm.ctx.exceptions.base_exception_type) {
        return Err(vm.new_type_error(format!(
            "'{}' is not a subtype of 'BaseException'",
            cls.name()
        )));
    }
    let exc = PyBaseException::new(args.args, vm);
    Ok(PyRef::new_ref(exc, cls, Some(vm.ctx.new_dict())).into())
}

fn exception_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBaseException>("__init__", vm)?;
    if let Some(kw) = args.kwargs.keys().next() {
        return Err(vm.new_type_error(format!(
            "{}() got an unexpected keyword argument '{kw}'",
            zelf.class().name()
        )));
    }
    zelf.set_args(vm.ctx.new_tuple(args.args));
    Ok(vm.ctx.none())
}

/// No arguments give an empty message, one gives its `str`, several the tuple's `repr`.
fn exception_str(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBaseException>("__str__", vm)?;
    args.bind::<0>("__str__", vm)?;
    let exc_args = zelf.args();
    let s: PyStrRef = match exc_args.as_slice() {
        [] => vm.ctx.empty_str.clone(),
        [arg] => arg.str(vm)?,
        _ => exc_args.as_object().repr(vm)?,
    };
    Ok(s.into())
}

fn key_error_str(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBaseException>("__str__", vm)?;
    args.bind::<0>("__str__", vm)?;
    let exc_args = zelf.args();
    match exc_args.as_slice() {
        [key] => Ok(key.repr(vm)?.into()),
        _ => exception_str(vm, FuncArgs::from(vec![zelf.into()])),
    }
}

fn exception_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBaseException>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let reprs = zelf
        .args()
        .iter()
        .map(|arg| arg.repr(vm).map(|r| r.as_str().to_owned()))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(vm
        .ctx
        .new_str(format!("{}({})", zelf.class().name(), reprs.iter().format(", ")))
        .into())
}

fn exception_with_traceback(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBaseException>("with_traceback", vm)?;
    args.bind::<1>("with_traceback", vm)?;
    Ok(zelf.into())
}

fn exc_zelf(args: FuncArgs, name: &str, vm: &VirtualMachine) -> PyResult<(PyBaseExceptionRef, Option<PyObjectRef>)> {
    let [zelf, value] = args.bind_optional::<2>(name, 1, vm)?;
    let zelf = zelf
        .unwrap_or_else(|| vm.ctx.none())
        .try_downcast::<PyBaseException>(vm)?;
    Ok((zelf, value))
}

fn exception_get_args(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = exc_zelf(args, "args", vm)?;
    Ok(zelf.args().into())
}

fn exception_set_args(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, value) = exc_zelf(args, "args", vm)?;
    let value = value.unwrap_or_else(|| vm.ctx.none());
    let elements = vm.extract_elements(&value)?;
    zelf.set_args(vm.ctx.new_tuple(elements));
    Ok(vm.ctx.none())
}

/// `None` or an exception, for the chaining attributes.
fn chain_value(
    value: Option<PyObjectRef>,
    what: &str,
    vm: &VirtualMachine,
) -> PyResult<Option<PyBaseExceptionRef>> {
    match value.and_then(|value| vm.option_if_none(value)) {
        None => Ok(None),
        Some(value) => value.downcast::<PyBaseException>().map(Some).map_err(|_| {
            vm.new_type_error(format!(
                "exception {what} must be None or derive from BaseException"
            ))
        }),
    }
}

fn exception_get_cause(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = exc_zelf(args, "__cause__", vm)?;
    Ok(zelf.cause().map_or_else(|| vm.ctx.none(), Into::into))
}

fn exception_set_cause(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, value) = exc_zelf(args, "__cause__", vm)?;
    zelf.set_cause(chain_value(value, "cause", vm)?);
    Ok(vm.ctx.none())
}

fn exception_get_context(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = exc_zelf(args, "__context__", vm)?;
    Ok(zelf.context().map_or_else(|| vm.ctx.none(), Into::into))
}

fn exception_set_context(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, value) = exc_zelf(args, "__context__", vm)?;
    zelf.set_context(chain_value(value, "context", vm)?);
    Ok(vm.ctx.none())
}

fn exception_get_suppress_context(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = exc_zelf(args, "__suppress_context__", vm)?;
    Ok(vm.ctx.new_bool(zelf.suppress_context.get()))
}

/// Traceback objects are not modelled; the entries are only rendered.
fn exception_get_traceback(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    exc_zelf(args, "__traceback__", vm)?;
    Ok(vm.ctx.none())
}

fn first_arg_getter(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = exc_zelf(args, "value", vm)?;
    Ok(zelf.get_arg(0).unwrap_or_else(|| vm.ctx.none()))
}

fn system_exit_code(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = exc_zelf(args, "code", vm)?;
    let exc_args = zelf.args();
    Ok(match exc_args.as_slice() {
        [] => vm.ctx.none(),
        [code] => code.clone(),
        _ => exc_args.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    fn render(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
        let mut out = Vec::new();
        write_exception(&mut out, vm, exc).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn message_depends_on_arg_count() {
        Interpreter::new(Default::default()).enter(|vm| {
            let none = vm.new_exception_empty(vm.ctx.exceptions.value_error.clone());
            assert_eq!(render(vm, &none), "ValueError\n");
            let one = vm.new_value_error("bad value");
            assert_eq!(render(vm, &one), "ValueError: bad value\n");
            let two = vm.new_exception(
                vm.ctx.exceptions.value_error.clone(),
                vec![vm.ctx.new_int(1).into(), vm.ctx.new_str("x").into()],
            );
            assert_eq!(render(vm, &two), "ValueError: (1, 'x')\n");
        })
    }

    #[test]
    fn key_error_shows_the_key_repr() {
        Interpreter::new(Default::default()).enter(|vm| {
            let exc = vm.new_key_error(vm.ctx.new_str("k").into());
            assert_eq!(render(vm, &exc), "KeyError: 'k'\n");
        })
    }

    #[test]
    fn cause_is_rendered_first() {
        Interpreter::new(Default::default()).enter(|vm| {
            let cause = vm.new_type_error("inner");
            let exc = vm.new_runtime_error("outer");
            exc.set_cause(Some(cause));
            exc.push_traceback(TracebackEntry {
                filename: "<nowhere>".to_owned(),
                lineno: 3,
                name: "f".to_owned(),
            });
            exc.push_traceback(TracebackEntry {
                filename: "<nowhere>".to_owned(),
                lineno: 7,
                name: "<module>".to_owned(),
            });
            assert_eq!(
                render(vm, &exc),
                "TypeError: inner\n\
                 \n\
                 The above exception was the direct cause of the following exception:\n\
                 \n\
                 Traceback (most recent call last):\n  \
                 File \"<nowhere>\", line 7, in <module>\n  \
                 File \"<nowhere>\", line 3, in f\n\
                 RuntimeError: outer\n"
            );
        })
    }

    #[test]
    fn hierarchy_follows_python() {
        Interpreter::new(Default::default()).enter(|vm| {
            let excs = &vm.ctx.exceptions;
            assert!(excs.module_not_found_error.fast_issubclass(&excs.import_error));
            assert!(excs.key_error.fast_issubclass(&excs.lookup_error));
            assert!(excs.recursion_error.fast_issubclass(&excs.runtime_error));
            assert!(!excs.generator_exit.fast_issubclass(&excs.exception_type));
        })
    }
}
