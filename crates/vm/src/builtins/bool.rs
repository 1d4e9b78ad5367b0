use super::PyInt;
use crate::{PyObjectRef, PyResult, VirtualMachine, function::FuncArgs, vm::Context};
use num_traits::Zero;

/// `True` and `False` are the only instances of `bool`; both carry an int payload.
pub(crate) fn get_value(obj: &PyObjectRef) -> bool {
    obj.payload::<PyInt>()
        .is_some_and(|int| !int.as_bigint().is_zero())
}

fn bool_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    args.take_first("bool.__new__", vm)?;
    let [x] = args.bind_optional::<1>("bool", 0, vm)?;
    match x {
        Some(x) => Ok(vm.ctx.new_bool(x.is_true(vm)?)),
        None => Ok(vm.ctx.new_bool(false)),
    }
}

fn bool_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [zelf] = args.bind("__repr__", vm)?;
    let repr = if get_value(&zelf) { "True" } else { "False" };
    Ok(vm.ctx.new_str(repr).into())
}

/// The logical operators stay in `bool` when both sides are bools and fall back to the int
/// operator otherwise.
fn bool_logical(
    vm: &VirtualMachine,
    args: FuncArgs,
    name: &'static str,
    op: fn(bool, bool) -> bool,
) -> PyResult {
    let [zelf, other] = args.bind(name, vm)?;
    let bool_type = &vm.ctx.types.bool_type;
    if zelf.class().is(bool_type) && other.class().is(bool_type) {
        return Ok(vm.ctx.new_bool(op(get_value(&zelf), get_value(&other))));
    }
    let int_op = vm
        .ctx
        .types
        .int_type
        .get_attr(name)
        .ok_or_else(|| vm.new_attribute_error(name))?;
    vm.call_with_self(&int_op, zelf, vec![other].into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.bool_type, {
        "__new__" => ctx.new_staticmethod("__new__", bool_new),
        "__repr__" => ctx.new_method("__repr__", bool_repr),
        "__and__" => ctx.new_method("__and__", |vm, args| bool_logical(vm, args, "__and__", |a, b| a & b)),
        "__rand__" => ctx.new_method("__rand__", |vm, args| bool_logical(vm, args, "__rand__", |a, b| a & b)),
        "__or__" => ctx.new_method("__or__", |vm, args| bool_logical(vm, args, "__or__", |a, b| a | b)),
        "__ror__" => ctx.new_method("__ror__", |vm, args| bool_logical(vm, args, "__ror__", |a, b| a | b)),
        "__xor__" => ctx.new_method("__xor__", |vm, args| bool_logical(vm, args, "__xor__", |a, b| a ^ b)),
        "__rxor__" => ctx.new_method("__rxor__", |vm, args| bool_logical(vm, args, "__rxor__", |a, b| a ^ b)),
    });
}
