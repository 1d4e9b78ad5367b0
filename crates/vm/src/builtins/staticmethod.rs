use super::PyTypeRef;
use crate::{PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, vm::Context};
use core::cell::RefCell;

/// `staticmethod(f)`: looked up on a class or an instance, gives back `f` unbound.
#[derive(Debug)]
pub struct PyStaticMethod {
    pub callable: RefCell<PyObjectRef>,
}

impl PyPayload for PyStaticMethod {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.staticmethod_type
    }
}

impl PyStaticMethod {
    pub fn new(callable: PyObjectRef) -> Self {
        Self {
            callable: RefCell::new(callable),
        }
    }

    pub fn callable(&self) -> PyObjectRef {
        self.callable.borrow().clone()
    }
}

fn staticmethod_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("staticmethod.__new__", vm)?.try_into_value(vm)?;
    let [callable] = args.bind("staticmethod", vm)?;
    Ok(PyStaticMethod::new(callable)
        .into_ref_with_type(vm, cls)?
        .into())
}

fn staticmethod_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStaticMethod>("__init__", vm)?;
    let [callable] = args.bind("staticmethod", vm)?;
    *zelf.callable.borrow_mut() = callable;
    Ok(vm.ctx.none())
}

fn staticmethod_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStaticMethod>("__get__", vm)?;
    args.bind_optional::<2>("__get__", 1, vm)?;
    Ok(zelf.callable())
}

fn staticmethod_func(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__func__", vm)?;
    Ok(zelf.try_downcast::<PyStaticMethod>(vm)?.callable())
}

fn staticmethod_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyStaticMethod>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let callable = zelf.callable().repr(vm)?;
    Ok(vm
        .ctx
        .new_str(format!("<staticmethod({})>", callable.as_str()))
        .into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.staticmethod_type, {
        "__new__" => ctx.new_staticmethod("__new__", staticmethod_new),
        "__init__" => ctx.new_method("__init__", staticmethod_init),
        "__get__" => ctx.new_method("__get__", staticmethod_get),
        "__repr__" => ctx.new_method("__repr__", staticmethod_repr),
        "__func__" => ctx.new_readonly_getset("__func__", staticmethod_func),
    });
}
