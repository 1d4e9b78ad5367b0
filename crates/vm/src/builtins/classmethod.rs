use super::{PyBoundMethod, PyTypeRef};
use crate::{PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, vm::Context};
use core::cell::RefCell;

/// classmethod(function) -> method
///
/// Convert a function to be a class method.
///
/// A class method receives the class as implicit first argument,
/// just like an instance method receives the instance.
/// To declare a class method, use this idiom:
///
///   class C:
///       @classmethod
///       def f(cls, arg1, arg2, ...):
///           ...
///
/// It can be called either on the class (e.g. C.f()) or on an instance
/// (e.g. C().f()).  The instance is ignored except for its class.
/// If a class method is called for a derived class, the derived class
/// object is passed as the implied first argument.
#[derive(Debug)]
pub struct PyClassMethod {
    callable: RefCell<PyObjectRef>,
}

impl PyPayload for PyClassMethod {
    #[inline]
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.classmethod_type
    }
}

impl PyClassMethod {
    pub fn new(callable: PyObjectRef) -> Self {
        Self {
            callable: RefCell::new(callable),
        }
    }

    pub fn callable(&self) -> PyObjectRef {
        self.callable.borrow().clone()
    }
}

fn classmethod_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("classmethod.__new__", vm)?.try_into_value(vm)?;
    let [callable] = args.bind("classmethod", vm)?;
    Ok(PyClassMethod::new(callable)
        .into_ref_with_type(vm, cls)?
        .into())
}

fn classmethod_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyClassMethod>("__init__", vm)?;
    let [callable] = args.bind("classmethod", vm)?;
    *zelf.callable.borrow_mut() = callable;
    Ok(vm.ctx.none())
}

fn classmethod_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyClassMethod>("__get__", vm)?;
    let [obj, cls] = args.bind_optional::<2>("__get__", 1, vm)?;
    let cls = match cls.and_then(|cls| vm.option_if_none(cls)) {
        Some(cls) => cls,
        None => match obj {
            Some(obj) => obj.class().clone().into(),
            None => return Err(vm.new_type_error("__get__(None, None) is invalid")),
        },
    };
    Ok(PyBoundMethod::new(cls, zelf.callable())
        .into_ref(&vm.ctx)
        .into())
}

fn classmethod_func(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__func__", vm)?;
    Ok(zelf.try_downcast::<PyClassMethod>(vm)?.callable())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.classmethod_type, {
        "__new__" => ctx.new_staticmethod("__new__", classmethod_new),
        "__init__" => ctx.new_method("__init__", classmethod_init),
        "__get__" => ctx.new_method("__get__", classmethod_get),
        "__func__" => ctx.new_readonly_getset("__func__", classmethod_func),
    });
}
