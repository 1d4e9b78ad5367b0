use crate::{PyPayload, PyResult, VirtualMachine, builtins::PyTypeRef, function::FuncArgs, vm::Context};

#[derive(Debug)]
pub struct PyNone;

impl PyPayload for PyNone {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.none_type
    }
}

#[derive(Debug)]
pub struct PyNotImplemented;

impl PyPayload for PyNotImplemented {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.not_implemented_type
    }
}

#[derive(Debug)]
pub struct PyEllipsis;

impl PyPayload for PyEllipsis {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.ellipsis_type
    }
}

fn none_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    args.take_first("NoneType.__new__", vm)?;
    args.bind::<0>("NoneType", vm)?;
    Ok(vm.ctx.none())
}

fn none_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<1>("__repr__", vm)?;
    Ok(vm.ctx.new_str("None").into())
}

fn none_bool(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<1>("__bool__", vm)?;
    Ok(vm.ctx.new_bool(false))
}

fn not_implemented_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<1>("__repr__", vm)?;
    Ok(vm.ctx.new_str("NotImplemented").into())
}

fn ellipsis_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    args.bind::<1>("__repr__", vm)?;
    Ok(vm.ctx.new_str("Ellipsis").into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.none_type, {
        "__new__" => ctx.new_staticmethod("__new__", none_new),
        "__repr__" => ctx.new_method("__repr__", none_repr),
        "__bool__" => ctx.new_method("__bool__", none_bool),
    });
    extend_class!(ctx, &ctx.types.not_implemented_type, {
        "__repr__" => ctx.new_method("__repr__", not_implemented_repr),
    });
    extend_class!(ctx, &ctx.types.ellipsis_type, {
        "__repr__" => ctx.new_method("__repr__", ellipsis_repr),
    });
}
