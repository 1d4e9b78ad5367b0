use super::PyTypeRef;
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine,
    function::FuncArgs,
    protocol::{PyIter, PyIterReturn},
    vm::Context,
};
use core::cell::{Cell, RefCell};
use malachite_bigint::BigInt;
use num_traits::{One, Zero};

/// `enumerate(iterable, start=0)`: pairs each item with a running count.
#[derive(Debug)]
pub struct PyEnumerate {
    counter: RefCell<BigInt>,
    iterator: PyIter,
}

impl PyPayload for PyEnumerate {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.enumerate_type
    }
}

fn enumerate_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("enumerate.__new__", vm)?.try_into_value(vm)?;
    let start_kw = args.take_keyword("start");
    let [iterable, start] = args.bind_optional::<2>("enumerate", 1, vm)?;
    let iterable = iterable.unwrap_or_else(|| vm.ctx.none());
    let counter = match start.or(start_kw) {
        Some(start) => start.try_into_value::<BigInt>(vm)?,
        None => BigInt::zero(),
    };
    Ok(PyEnumerate {
        counter: RefCell::new(counter),
        iterator: iterable.get_iter(vm)?,
    }
    .into_ref_with_type(vm, cls)?
    .into())
}

fn enumerate_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyEnumerate>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let item = match zelf.iterator.next(vm)? {
        PyIterReturn::Return(item) => item,
        PyIterReturn::StopIteration(value) => return Err(vm.new_stop_iteration(value)),
    };
    let position = zelf.counter.replace_with(|counter| &*counter + BigInt::one());
    Ok(vm
        .ctx
        .new_tuple(vec![vm.ctx.new_int(position).into(), item])
        .into())
}

/// `reversed(seq)` over an object with `__len__` and `__getitem__`.
#[derive(Debug)]
pub struct PyReversed {
    obj: PyObjectRef,
    /// Items still to produce; the next one is at `remaining - 1`.
    remaining: Cell<usize>,
}

impl PyPayload for PyReversed {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.reverse_iter_type
    }
}

impl PyReversed {
    pub fn new(obj: PyObjectRef, len: usize) -> Self {
        Self {
            obj,
            remaining: Cell::new(len),
        }
    }
}

/// `reversed(obj)`: `__reversed__` when the class defines it, else the sequence protocol.
fn reversed_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("reversed.__new__", vm)?.try_into_value(vm)?;
    let [seq] = args.bind("reversed", vm)?;
    if let Some(reversed) = vm.get_special_method(&seq, "__reversed__")? {
        if vm.is_none(&reversed) {
            return Err(not_reversible(&seq, vm));
        }
        return vm.invoke(&reversed, ());
    }
    if !seq.class().has_attr("__getitem__") {
        return Err(not_reversible(&seq, vm));
    }
    let len = seq.length_opt(vm).ok_or_else(|| not_reversible(&seq, vm))??;
    Ok(PyReversed::new(seq, len).into_ref_with_type(vm, cls)?.into())
}

fn not_reversible(obj: &PyObjectRef, vm: &VirtualMachine) -> crate::builtins::PyBaseExceptionRef {
    vm.new_type_error(format!(
        "'{}' object is not reversible",
        obj.class().name()
    ))
}

fn reversed_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyReversed>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    let remaining = zelf.remaining.get();
    if remaining == 0 {
        return Err(vm.new_stop_iteration(None));
    }
    zelf.remaining.set(remaining - 1);
    let index = vm.ctx.new_int(remaining - 1).into();
    match PyIterReturn::from_getitem_result(zelf.obj.get_item(&index, vm), vm)? {
        PyIterReturn::Return(item) => Ok(item),
        PyIterReturn::StopIteration(_) => {
            zelf.remaining.set(0);
            Err(vm.new_stop_iteration(None))
        }
    }
}

fn reversed_length_hint(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyReversed>("__length_hint__", vm)?;
    args.bind::<0>("__length_hint__", vm)?;
    Ok(vm.ctx.new_int(zelf.remaining.get()).into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.enumerate_type, {
        "__new__" => ctx.new_staticmethod("__new__", enumerate_new),
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", enumerate_next),
    });
    extend_class!(ctx, &ctx.types.reverse_iter_type, {
        "__new__" => ctx.new_staticmethod("__new__", reversed_new),
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", reversed_next),
        "__length_hint__" => ctx.new_method("__length_hint__", reversed_length_hint),
    });
}
