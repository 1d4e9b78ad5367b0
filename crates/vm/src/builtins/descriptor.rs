use super::{PyBuiltinFunction, PyTypeRef, builtin_func::NativeFn};
use crate::{
    PyObjectRef, PyPayload, PyRef, PyResult, VirtualMachine, function::FuncArgs, vm::Context,
};
use core::{cell::OnceCell, fmt};

/// A method of a builtin type, as found in the type's attributes.
///
/// Looked up through an instance it binds to that instance; looked up through the class it
/// is a plain function taking the instance as its first argument.
pub struct PyMethodDescriptor {
    pub name: &'static str,
    pub method: NativeFn,
    objclass: OnceCell<PyTypeRef>,
}

impl PyPayload for PyMethodDescriptor {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.method_descriptor_type
    }
}

impl fmt::Debug for PyMethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method descriptor for '{}'", self.name)
    }
}

impl PyMethodDescriptor {
    pub fn new(name: &'static str, method: NativeFn) -> Self {
        Self {
            name,
            method,
            objclass: OnceCell::new(),
        }
    }

    /// Records the class the method was defined on; the first class wins.
    pub fn set_objclass(&self, cls: &PyTypeRef) {
        let _ = self.objclass.set(cls.clone());
    }

    pub fn objclass(&self) -> Option<&PyTypeRef> {
        self.objclass.get()
    }

    pub fn bind(&self, obj: PyObjectRef, ctx: &Context) -> PyRef<PyBuiltinFunction> {
        PyBuiltinFunction::bound(self.name, self.method, obj).into_ref(ctx)
    }

    #[inline]
    pub fn call(&self, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        (self.method)(vm, args)
    }
}

fn descr_get(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyMethodDescriptor>("__get__", vm)?;
    let [obj, _cls] = args.bind_optional::<2>("__get__", 1, vm)?;
    match obj.and_then(|obj| vm.option_if_none(obj)) {
        Some(obj) => Ok(zelf.bind(obj, &vm.ctx).into()),
        None => Ok(zelf.into()),
    }
}

fn descr_call(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyMethodDescriptor>("__call__", vm)?;
    zelf.call(args, vm)
}

fn descr_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyMethodDescriptor>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let repr = match zelf.objclass() {
        Some(cls) => format!("<method '{}' of '{}' objects>", zelf.name, cls.name()),
        None => format!("<method '{}'>", zelf.name),
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn descr_get_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__name__", vm)?;
    let zelf = zelf.try_downcast::<PyMethodDescriptor>(vm)?;
    Ok(vm.ctx.new_str(zelf.name).into())
}

fn descr_get_qualname(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__qualname__", vm)?;
    let zelf = zelf.try_downcast::<PyMethodDescriptor>(vm)?;
    let qualname = match zelf.objclass() {
        Some(cls) => format!("{}.{}", cls.name(), zelf.name),
        None => zelf.name.to_owned(),
    };
    Ok(vm.ctx.new_str(qualname).into())
}

fn descr_get_objclass(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__objclass__", vm)?;
    let zelf = zelf.try_downcast::<PyMethodDescriptor>(vm)?;
    Ok(zelf
        .objclass()
        .map_or_else(|| vm.ctx.none(), |cls| cls.clone().into()))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.method_descriptor_type, {
        "__get__" => ctx.new_method("__get__", descr_get),
        "__call__" => ctx.new_method("__call__", descr_call),
        "__repr__" => ctx.new_method("__repr__", descr_repr),
        "__name__" => ctx.new_readonly_getset("__name__", descr_get_name),
        "__qualname__" => ctx.new_readonly_getset("__qualname__", descr_get_qualname),
        "__objclass__" => ctx.new_readonly_getset("__objclass__", descr_get_objclass),
    });
}
