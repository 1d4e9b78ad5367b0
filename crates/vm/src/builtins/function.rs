use super::{PyCode, PyDictRef, PyGenerator, PyStr, PyStrRef, PyTupleRef, PyTypeRef};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine,
    frame::Frame,
    function::{FuncArgs, Signature},
    scope::Scope,
    types::PyComparisonOp,
    vm::Context,
};
use core::{cell::RefCell, fmt};

/// A function defined in python: a code object, the globals it runs in, the defaults of
/// its optional parameters and the cells it closes over.
pub struct PyFunction {
    code: PyRef<PyCode>,
    globals: PyDictRef,
    closure: Box<[PyCellRef]>,
    defaults: Option<PyTupleRef>,
    kwdefaults: Option<PyDictRef>,
    name: RefCell<PyStrRef>,
    qualname: RefCell<PyStrRef>,
    signature: Signature,
}

impl fmt::Debug for PyFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PyFunction {}]", self.qualname.borrow().as_str())
    }
}

impl PyPayload for PyFunction {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.function_type
    }
}

impl PyFunction {
    pub(crate) fn new(
        code: PyRef<PyCode>,
        globals: PyDictRef,
        closure: Vec<PyCellRef>,
        defaults: Option<PyTupleRef>,
        kwdefaults: Option<PyDictRef>,
        qualname: PyStrRef,
        vm: &VirtualMachine,
    ) -> Self {
        let name = vm.ctx.new_str(code.name.as_str());
        let kwdefault_items = kwdefaults
            .iter()
            .flat_map(|kwdefaults| kwdefaults.items())
            .filter_map(|(key, value)| {
                let key = key.payload::<PyStr>()?.as_str().to_owned();
                Some((key, value))
            });
        let signature = Signature::from_code(
            code.name.as_str(),
            &code,
            defaults.as_ref().map_or(&[], |d| d.as_slice()),
            kwdefault_items,
        );
        Self {
            code,
            globals,
            closure: closure.into_boxed_slice(),
            defaults,
            kwdefaults,
            name: RefCell::new(name),
            qualname: RefCell::new(qualname),
            signature,
        }
    }

    pub fn code(&self) -> &PyRef<PyCode> {
        &self.code
    }

    pub fn globals(&self) -> &PyDictRef {
        &self.globals
    }

    pub fn name(&self) -> PyStrRef {
        self.name.borrow().clone()
    }

    pub fn qualname(&self) -> PyStrRef {
        self.qualname.borrow().clone()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Binds the call arguments and stores them in the frame's fast locals, moving the
    /// arguments that inner functions capture into their cells.
    fn fill_locals_from_args(&self, frame: &Frame, args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        let bound = self.signature.bind(args, vm)?;
        let code = &self.code;
        let nargs = self.signature.parameters.len().min(code.varnames.len());
        let arg_names = &code.varnames[..nargs];

        let mut fastlocals = frame.fastlocals.borrow_mut();
        for (name, value) in bound {
            if let Some(i) = arg_names.iter().position(|arg| *arg == name) {
                fastlocals[i] = Some(value);
            }
        }
        for (cell, cellname) in frame.cells_frees.iter().zip(&code.cellvars) {
            if let Some(i) = arg_names.iter().position(|arg| arg == cellname) {
                cell.set(fastlocals[i].take());
            }
        }
        Ok(())
    }

    /// Runs the function with `locals` as its local namespace; a class body runs this way
    /// on the namespace the class is built from.
    pub fn invoke_with_locals(
        &self,
        args: FuncArgs,
        locals: Option<PyDictRef>,
        vm: &VirtualMachine,
    ) -> PyResult {
        let code = self.code.clone();
        let locals = if code.flags.contains(crate::bytecode::CodeFlags::NEWLOCALS) {
            Some(vm.ctx.new_dict())
        } else {
            locals
        };
        let frame = Frame::new(
            code.clone(),
            Scope::new(locals, self.globals.clone()),
            vm.builtins.dict(),
            &self.closure,
            vm,
        )
        .into_ref(&vm.ctx);
        self.fill_locals_from_args(&frame, args, vm)?;

        if code.is_generator() {
            trace!("created generator for {}", code.name);
            Ok(PyGenerator::new(frame, self.name(), self.qualname()).into_pyobject(vm))
        } else {
            vm.run_frame(frame)
        }
    }

    #[inline(always)]
    pub fn invoke(&self, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        self.invoke_with_locals(args, None, vm)
    }

    fn repr(&self, id: usize) -> String {
        format!("<function {} at {id:#x}>", self.qualname.borrow().as_str())
    }
}

fn function_call(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFunction>("__call__", vm)?;
    zelf.invoke(args, vm)
}

fn function_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_first("__get__", vm)?;
    let [obj, _cls] = args.bind_optional::<2>("__get__", 1, vm)?;
    match obj.and_then(|obj| vm.option_if_none(obj)) {
        Some(obj) => Ok(PyBoundMethod::new(obj, zelf).into_pyobject(vm)),
        None => Ok(zelf),
    }
}

fn function_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyFunction>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    Ok(vm.ctx.new_str(zelf.repr(zelf.get_id())).into())
}

fn function_zelf(args: FuncArgs, name: &str, vm: &VirtualMachine) -> PyResult<PyRef<PyFunction>> {
    let [zelf] = args.bind(name, vm)?;
    zelf.try_into_value(vm)
}

fn function_get_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(function_zelf(args, "__name__", vm)?.name().into())
}

fn function_set_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, value] = args.bind("__name__", vm)?;
    let zelf: PyRef<PyFunction> = zelf.try_into_value(vm)?;
    let value = value
        .downcast::<PyStr>()
        .map_err(|_| vm.new_type_error("__name__ must be set to a string object"))?;
    *zelf.name.borrow_mut() = value;
    Ok(vm.ctx.none())
}

fn function_get_qualname(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(function_zelf(args, "__qualname__", vm)?.qualname().into())
}

fn function_set_qualname(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, value] = args.bind("__qualname__", vm)?;
    let zelf: PyRef<PyFunction> = zelf.try_into_value(vm)?;
    let value = value
        .downcast::<PyStr>()
        .map_err(|_| vm.new_type_error("__qualname__ must be set to a string object"))?;
    *zelf.qualname.borrow_mut() = value;
    Ok(vm.ctx.none())
}

fn function_get_code(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(function_zelf(args, "__code__", vm)?.code.clone().into())
}

fn function_get_globals(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    Ok(function_zelf(args, "__globals__", vm)?.globals.clone().into())
}

fn function_get_defaults(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = function_zelf(args, "__defaults__", vm)?;
    Ok(zelf
        .defaults
        .clone()
        .map_or_else(|| vm.ctx.none(), Into::into))
}

fn function_get_kwdefaults(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = function_zelf(args, "__kwdefaults__", vm)?;
    Ok(zelf
        .kwdefaults
        .clone()
        .map_or_else(|| vm.ctx.none(), Into::into))
}

fn function_get_closure(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = function_zelf(args, "__closure__", vm)?;
    if zelf.closure.is_empty() {
        return Ok(vm.ctx.none());
    }
    let cells = zelf.closure.iter().map(|cell| cell.clone().into()).collect();
    Ok(vm.ctx.new_tuple(cells).into())
}

fn function_get_doc(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = function_zelf(args, "__doc__", vm)?;
    match zelf.code.constants.first() {
        Some(doc) if doc.payload_is::<PyStr>() => Ok(doc.clone()),
        _ => Ok(vm.ctx.none()),
    }
}

fn function_get_module(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let zelf = function_zelf(args, "__module__", vm)?;
    Ok(zelf
        .globals
        .get_item_str("__name__", vm)
        .unwrap_or_else(|| vm.ctx.none()))
}

/// A function bound to the object it was looked up on; calling it passes the object first.
#[derive(Debug)]
pub struct PyBoundMethod {
    pub object: PyObjectRef,
    pub function: PyObjectRef,
}

impl PyPayload for PyBoundMethod {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.bound_method_type
    }
}

impl PyBoundMethod {
    pub const fn new(object: PyObjectRef, function: PyObjectRef) -> Self {
        Self { object, function }
    }
}

fn method_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("method.__new__", vm)?.try_into_value(vm)?;
    let [function, object] = args.bind("method", vm)?;
    if !vm.is_callable(&function) {
        return Err(vm.new_type_error("first argument must be callable"));
    }
    if vm.is_none(&object) {
        return Err(vm.new_type_error("instance must not be None"));
    }
    Ok(PyBoundMethod::new(object, function)
        .into_ref_with_type(vm, cls)?
        .into())
}

fn method_call(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBoundMethod>("__call__", vm)?;
    vm.call_with_self(&zelf.function, zelf.object.clone(), args)
}

fn method_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBoundMethod>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let func_name = match vm.get_attribute_opt(&zelf.function, "__qualname__")? {
        Some(name) => Some(name),
        None => vm.get_attribute_opt(&zelf.function, "__name__")?,
    };
    let func_name = func_name
        .and_then(|name| name.downcast::<PyStr>().ok())
        .map_or_else(|| "?".to_owned(), |name| name.as_str().to_owned());
    let object_repr = zelf.object.repr(vm)?;
    Ok(vm
        .ctx
        .new_str(format!(
            "<bound method {func_name} of {}>",
            object_repr.as_str()
        ))
        .into())
}

fn method_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyBoundMethod>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    let Some(other) = other.payload::<PyBoundMethod>() else {
        return Ok(vm.ctx.not_implemented());
    };
    let eq = zelf.object.is(&other.object) && vm.bool_eq(&zelf.function, &other.function)?;
    Ok(vm.ctx.new_bool(eq == (op == PyComparisonOp::Eq)))
}

fn method_hash(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBoundMethod>("__hash__", vm)?;
    args.bind::<0>("__hash__", vm)?;
    let hash = crate::hash::hash_iter([zelf.object.get_id() as i64, zelf.function.hash(vm)?].into_iter());
    Ok(vm.ctx.new_int(hash).into())
}

/// Attributes the method object does not have itself come from the function.
fn method_getattr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBoundMethod>("__getattr__", vm)?;
    let [name] = args.bind("__getattr__", vm)?;
    let name = vm.expect_str(&name, "attribute name")?;
    zelf.function.get_attr(&name, vm)
}

fn method_get_self(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__self__", vm)?;
    let zelf: PyRef<PyBoundMethod> = zelf.try_into_value(vm)?;
    Ok(zelf.object.clone())
}

fn method_get_func(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__func__", vm)?;
    let zelf: PyRef<PyBoundMethod> = zelf.try_into_value(vm)?;
    Ok(zelf.function.clone())
}

/// Storage of one closed-over variable, shared by the defining frame and every inner
/// function that refers to it.
#[derive(Debug, Default)]
pub struct PyCell {
    contents: RefCell<Option<PyObjectRef>>,
}
pub type PyCellRef = PyRef<PyCell>;

impl PyPayload for PyCell {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.cell_type
    }
}

impl PyCell {
    pub fn new(contents: Option<PyObjectRef>) -> Self {
        Self {
            contents: RefCell::new(contents),
        }
    }

    pub fn get(&self) -> Option<PyObjectRef> {
        self.contents.borrow().clone()
    }

    pub fn set(&self, x: Option<PyObjectRef>) {
        let prev = self.contents.replace(x);
        drop(prev);
    }
}

fn cell_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("cell.__new__", vm)?.try_into_value(vm)?;
    let [value] = args.bind_optional::<1>("cell", 0, vm)?;
    Ok(PyCell::new(value).into_ref_with_type(vm, cls)?.into())
}

fn cell_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyCell>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let repr = match zelf.get() {
        Some(value) => format!(
            "<cell at {:#x}: {} object at {:#x}>",
            zelf.get_id(),
            value.class().name(),
            value.get_id()
        ),
        None => format!("<cell at {:#x}: empty>", zelf.get_id()),
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn cell_get_contents(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("cell_contents", vm)?;
    let zelf: PyCellRef = zelf.try_into_value(vm)?;
    zelf.get().ok_or_else(|| vm.new_value_error("Cell is empty"))
}

fn cell_set_contents(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf, value] = args.bind("cell_contents", vm)?;
    let zelf: PyCellRef = zelf.try_into_value(vm)?;
    zelf.set(Some(value));
    Ok(vm.ctx.none())
}

macro_rules! method_cmp_method {
    ($ctx:expr, $op:ident) => {
        $ctx.new_method(PyComparisonOp::$op.method_name(), |vm, args| {
            method_cmp(vm, args, PyComparisonOp::$op)
        })
    };
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.function_type, {
        "__call__" => ctx.new_method("__call__", function_call),
        "__get__" => ctx.new_method("__get__", function_get),
        "__repr__" => ctx.new_method("__repr__", function_repr),
        "__name__" => ctx.new_getset("__name__", function_get_name, function_set_name),
        "__qualname__" => ctx.new_getset("__qualname__", function_get_qualname, function_set_qualname),
        "__code__" => ctx.new_readonly_getset("__code__", function_get_code),
        "__globals__" => ctx.new_readonly_getset("__globals__", function_get_globals),
        "__defaults__" => ctx.new_readonly_getset("__defaults__", function_get_defaults),
        "__kwdefaults__" => ctx.new_readonly_getset("__kwdefaults__", function_get_kwdefaults),
        "__closure__" => ctx.new_readonly_getset("__closure__", function_get_closure),
        "__doc__" => ctx.new_readonly_getset("__doc__", function_get_doc),
        "__module__" => ctx.new_readonly_getset("__module__", function_get_module),
    });
    extend_class!(ctx, &ctx.types.bound_method_type, {
        "__new__" => ctx.new_staticmethod("__new__", method_new),
        "__call__" => ctx.new_method("__call__", method_call),
        "__repr__" => ctx.new_method("__repr__", method_repr),
        "__eq__" => method_cmp_method!(ctx, Eq),
        "__ne__" => method_cmp_method!(ctx, Ne),
        "__hash__" => ctx.new_method("__hash__", method_hash),
        "__getattr__" => ctx.new_method("__getattr__", method_getattr),
        "__self__" => ctx.new_readonly_getset("__self__", method_get_self),
        "__func__" => ctx.new_readonly_getset("__func__", method_get_func),
    });
    extend_class!(ctx, &ctx.types.cell_type, {
        "__new__" => ctx.new_staticmethod("__new__", cell_new),
        "__repr__" => ctx.new_method("__repr__", cell_repr),
        "cell_contents" => ctx.new_getset("cell_contents", cell_get_contents, cell_set_contents),
    });
}
