use super::PyTypeRef;
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine, function::FuncArgs, types::PyComparisonOp,
    vm::Context,
};
use core::fmt;

/// The signature every function implemented in rust has.
pub type NativeFn = fn(&VirtualMachine, FuncArgs) -> PyResult;

/// A function implemented in rust, optionally bound to the object it was looked up on.
pub struct PyBuiltinFunction {
    pub(crate) name: &'static str,
    pub(crate) value: NativeFn,
    pub(crate) zelf: Option<PyObjectRef>,
}

impl PyPayload for PyBuiltinFunction {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.builtin_function_or_method_type
    }
}

impl fmt::Debug for PyBuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "builtin function {} self as instance of {:?}",
            self.name,
            self.zelf.as_ref().map(|z| z.class().name().to_owned())
        )
    }
}

impl PyBuiltinFunction {
    pub fn new(name: &'static str, value: NativeFn) -> Self {
        Self {
            name,
            value,
            zelf: None,
        }
    }

    /// The same function with `zelf` passed as its first argument.
    pub fn bound(name: &'static str, value: NativeFn, zelf: PyObjectRef) -> Self {
        Self {
            name,
            value,
            zelf: Some(zelf),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_self(&self) -> Option<&PyObjectRef> {
        self.zelf.as_ref()
    }

    #[inline]
    pub fn call(&self, mut args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        if let Some(z) = &self.zelf {
            args.prepend_arg(z.clone());
        }
        (self.value)(vm, args)
    }
}

fn builtin_call(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBuiltinFunction>("__call__", vm)?;
    zelf.call(args, vm)
}

fn builtin_repr(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyBuiltinFunction>("__repr__", vm)?;
    args.bind::<0>("__repr__", vm)?;
    let repr = match &zelf.zelf {
        Some(obj) => format!(
            "<built-in method {} of {} object at {:#x}>",
            zelf.name,
            obj.class().name(),
            obj.get_id()
        ),
        None => format!("<built-in function {}>", zelf.name),
    };
    Ok(vm.ctx.new_str(repr).into())
}

fn builtin_cmp(vm: &VirtualMachine, mut args: FuncArgs, op: PyComparisonOp) -> PyResult {
    let zelf = args.take_zelf::<PyBuiltinFunction>(op.method_name(), vm)?;
    let [other] = args.bind(op.method_name(), vm)?;
    let Some(other) = other.payload::<PyBuiltinFunction>() else {
        return Ok(vm.ctx.not_implemented());
    };
    let same_self = match (&zelf.zelf, &other.zelf) {
        (Some(a), Some(b)) => a.is(b),
        (None, None) => true,
        _ => false,
    };
    let eq = same_self && core::ptr::fn_addr_eq(zelf.value, other.value);
    Ok(vm.ctx.new_bool(eq == (op == PyComparisonOp::Eq)))
}

fn builtin_get_name(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__name__", vm)?;
    let zelf = zelf.try_downcast::<PyBuiltinFunction>(vm)?;
    Ok(vm.ctx.new_str(zelf.name).into())
}

fn builtin_get_self(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__self__", vm)?;
    let zelf = zelf.try_downcast::<PyBuiltinFunction>(vm)?;
    Ok(zelf.zelf.clone().unwrap_or_else(|| vm.ctx.none()))
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.builtin_function_or_method_type, {
        "__call__" => ctx.new_method("__call__", builtin_call),
        "__repr__" => ctx.new_method("__repr__", builtin_repr),
        "__eq__" => ctx.new_method("__eq__", |vm, args| builtin_cmp(vm, args, PyComparisonOp::Eq)),
        "__ne__" => ctx.new_method("__ne__", |vm, args| builtin_cmp(vm, args, PyComparisonOp::Ne)),
        "__name__" => ctx.new_readonly_getset("__name__", builtin_get_name),
        "__qualname__" => ctx.new_readonly_getset("__qualname__", builtin_get_name),
        "__self__" => ctx.new_readonly_getset("__self__", builtin_get_self),
    });
}
