use super::PyTypeRef;
use crate::{
    PyObjectRef, PyPayload, PyResult, VirtualMachine,
    function::FuncArgs,
    protocol::{PyIter, PyIterReturn},
    vm::Context,
};

/// `zip(*iterables)`: tuples of the items at the same position, stopping at the shortest.
#[derive(Debug)]
pub struct PyZip {
    iterators: Vec<PyIter>,
}

impl PyPayload for PyZip {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.zip_type
    }
}

fn zip_new(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let cls: PyTypeRef = args.take_first("zip.__new__", vm)?.try_into_value(vm)?;
    args.check_kwargs_empty("zip", vm)?;
    let iterators = args
        .args
        .iter()
        .map(|iterable| iterable.get_iter(vm))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(PyZip { iterators }.into_ref_with_type(vm, cls)?.into())
}

fn zip_next(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let zelf = args.take_zelf::<PyZip>("__next__", vm)?;
    args.bind::<0>("__next__", vm)?;
    if zelf.iterators.is_empty() {
        return Err(vm.new_stop_iteration(None));
    }
    let mut items: Vec<PyObjectRef> = Vec::with_capacity(zelf.iterators.len());
    for iterator in &zelf.iterators {
        match iterator.next(vm)? {
            PyIterReturn::Return(item) => items.push(item),
            PyIterReturn::StopIteration(_) => return Err(vm.new_stop_iteration(None)),
        }
    }
    Ok(vm.ctx.new_tuple(items).into())
}

pub(crate) fn init(ctx: &Context) {
    extend_class!(ctx, &ctx.types.zip_type, {
        "__new__" => ctx.new_staticmethod("__new__", zip_new),
        "__iter__" => ctx.new_method("__iter__", super::iter::iter_self),
        "__next__" => ctx.new_method("__next__", zip_next),
    });
}
